//! COPY and MOVE share the resolution of their destination and only differ
//! by their terminal action.

use hyper::StatusCode;

use super::codec::{self, HttpResponse};
use super::error::DavError;
use super::resource::ArcResource;
use super::services::{split_parent, DavContext, DavEvent, DavRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relocation {
    Copy,
    Move,
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

pub(crate) async fn relocate(
    ctx: &DavContext,
    req: &DavRequest,
    source: ArcResource,
    op: Relocation,
) -> Result<HttpResponse, DavError> {
    let capable = match op {
        Relocation::Copy => source.as_copyable().is_some(),
        Relocation::Move => source.as_movable().is_some(),
    };
    if !capable {
        return Err(DavError::MethodNotAllowed);
    }
    if op == Relocation::Move && ctx.locks.is_locked_out(req, source.as_ref()) {
        return Err(DavError::Locked);
    }

    // 1. destination
    let dest_path = req
        .header("Destination")
        .and_then(codec::destination)
        .ok_or_else(|| DavError::BadRequest("missing or invalid Destination header".into()))?;
    if same_path(&dest_path, &req.path) {
        return Err(DavError::Forbidden);
    }
    let (parent_path, name) = split_parent(&dest_path)
        .ok_or_else(|| DavError::Conflict("the root can not be a destination".into()))?;

    // 2. destination collection
    let parent = ctx
        .resource(req, &parent_path)
        .await?
        .ok_or_else(|| DavError::Conflict("destination collection does not exist".into()))?;
    let collection = parent
        .as_collection()
        .ok_or_else(|| DavError::Conflict("destination parent is not a collection".into()))?;

    // 3. lock state of the destination
    let existing = collection.child(&name).await?;
    let guarded = existing.as_ref().unwrap_or(&parent);
    if ctx.locks.is_locked_out(req, guarded.as_ref()) {
        return Err(DavError::Locked);
    }

    // 4. overwrite rules
    let replaced = match existing {
        Some(dest) => {
            let allowed = codec::overwrite(req.header("Overwrite")) || codec::is_finder(req.user_agent());
            if !allowed {
                return Err(DavError::PreconditionFailed);
            }
            if ctx.locks.is_locked(dest.as_ref()) {
                return Err(match op {
                    Relocation::Copy => DavError::PreconditionFailed,
                    Relocation::Move => DavError::Locked,
                });
            }
            let deletable = dest
                .as_deletable()
                .ok_or_else(|| DavError::Conflict("destination can not be deleted".into()))?;
            ctx.check_authorised(req, dest.as_ref())?;
            deletable.delete().await?;
            tracing::debug!(path=%dest_path, "existing destination deleted");
            true
        }
        None => false,
    };

    // 5. authorisation on the destination collection
    ctx.check_authorised(req, parent.as_ref())?;

    // 6. terminal action
    match op {
        Relocation::Copy => {
            if let Some(copyable) = source.as_copyable() {
                copyable.copy_to(&parent, &name).await?;
            }
            ctx.events.fire(DavEvent::Copy {
                from: req.path.clone(),
                to: dest_path.clone(),
            });
        }
        Relocation::Move => {
            ctx.events.fire(DavEvent::Move {
                from: req.path.clone(),
                to: dest_path.clone(),
            });
            if let Some(movable) = source.as_movable() {
                movable.move_to(&parent, &name).await?;
            }
        }
    }
    tracing::info!(op=?op, from=%req.path, to=%dest_path, replaced, "resource relocated");

    // 7. outcome
    match replaced {
        true => codec::status(StatusCode::NO_CONTENT),
        false => codec::status(StatusCode::CREATED),
    }
}
