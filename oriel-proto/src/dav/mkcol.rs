use hyper::StatusCode;

use super::codec::{self, HttpResponse};
use super::error::DavError;
use super::resource::ArcResource;
use super::services::{split_parent, DavContext, DavEvent, DavRequest};

/// MKCOL only succeeds on an unmapped URL: an existing target, the root
/// included, is answered with 405 rather than 409.
pub(crate) async fn mkcol(
    ctx: &DavContext,
    req: &DavRequest,
    target: Option<ArcResource>,
) -> Result<HttpResponse, DavError> {
    let (parent_path, name) = match split_parent(&req.path) {
        Some(v) => v,
        None => return Err(DavError::MethodNotAllowed),
    };
    let parent = ctx
        .resource(req, &parent_path)
        .await?
        .ok_or_else(|| DavError::Conflict("parent collection does not exist".into()))?;
    if ctx.locks.is_locked_out(req, parent.as_ref()) {
        return Err(DavError::Locked);
    }
    if target.is_some() {
        return Err(DavError::MethodNotAllowed);
    }
    let collection = parent
        .as_collection()
        .ok_or_else(|| DavError::Conflict("parent is not a collection".into()))?;
    ctx.check_authorised(req, parent.as_ref())?;

    if ctx.settings.strict_mkcol_body && !req.is_body_empty() {
        return Err(DavError::UnsupportedMediaType);
    }

    match collection.create_collection(&name).await? {
        Some(_) => {
            ctx.events.fire(DavEvent::NewFolder {
                path: req.path.clone(),
            });
            tracing::info!(path=%req.path, "collection created");
            codec::status(StatusCode::CREATED)
        }
        None => Err(DavError::MethodNotAllowed),
    }
}
