//! The plain HTTP side of a WebDAV resource: OPTIONS, GET, HEAD, PUT and
//! DELETE.

use hyper::body::Bytes;
use hyper::{Response, StatusCode};

use oriel_dav::value::http_date;

use super::codec::{self, HttpResponse, RangeRequest};
use super::error::DavError;
use super::resource::{ArcResource, DavResource};
use super::services::{split_parent, DavContext, DavEvent, DavRequest};

/// `DAV` compliance classes of a resource, class 2 when it can be locked
pub(crate) fn dav_level(resource: Option<&dyn DavResource>) -> &'static str {
    match resource {
        Some(r) if !r.is_lockable() => "1",
        _ => "1, 2",
    }
}

fn allowed_methods(resource: Option<&dyn DavResource>) -> Vec<&'static str> {
    let r = match resource {
        Some(r) => r,
        None => return vec!["OPTIONS", "MKCOL", "PUT", "LOCK"],
    };
    let mut allow = vec!["OPTIONS", "GET", "HEAD", "PROPFIND", "PROPPATCH"];
    if r.as_content().is_some() {
        allow.push("PUT");
    }
    if r.as_deletable().is_some() {
        allow.push("DELETE");
    }
    if r.as_copyable().is_some() {
        allow.push("COPY");
    }
    if r.as_movable().is_some() {
        allow.push("MOVE");
    }
    if r.is_lockable() {
        allow.extend(["LOCK", "UNLOCK"]);
    }
    allow
}

pub(crate) fn options(target: Option<&ArcResource>) -> Result<HttpResponse, DavError> {
    let resource = target.map(|r| r.as_ref());
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("DAV", dav_level(resource))
        .header("Allow", allowed_methods(resource).join(", "))
        .header("MS-Author-Via", "DAV")
        .body(codec::empty_body())?)
}

/// GET and HEAD. A collection is rendered as a plain text listing.
pub(crate) async fn get(
    ctx: &DavContext,
    req: &DavRequest,
    resource: ArcResource,
    head: bool,
) -> Result<HttpResponse, DavError> {
    ctx.check_authorised(req, resource.as_ref())?;

    let (content, content_type) = match (resource.as_content(), resource.as_collection()) {
        (Some(c), _) => (
            c.content().await?,
            resource
                .content_type()
                .unwrap_or_else(|| "application/octet-stream".into()),
        ),
        (None, Some(coll)) => {
            let listing = coll
                .children()
                .await?
                .iter()
                .map(|c| match c.is_collection() {
                    true => format!("{}/\n", c.name()),
                    false => format!("{}\n", c.name()),
                })
                .collect::<String>();
            (Bytes::from(listing), "text/plain; charset=utf-8".into())
        }
        (None, None) => return Err(DavError::MethodNotAllowed),
    };

    let len = content.len() as u64;
    let mut builder = Response::builder()
        .header("Content-Type", content_type)
        .header("Accept-Ranges", "bytes");
    if let Some(etag) = resource.etag() {
        builder = builder.header("ETag", etag);
    }
    if let Some(modified) = resource.modified() {
        builder = builder.header("Last-Modified", http_date(&modified));
    }

    let (status, body) = match codec::range(req.header("Range"), len) {
        RangeRequest::Full => (StatusCode::OK, content),
        RangeRequest::Partial(start, end) => {
            builder = builder.header("Content-Range", format!("bytes {}-{}/{}", start, end, len));
            (
                StatusCode::PARTIAL_CONTENT,
                content.slice(start as usize..=end as usize),
            )
        }
        RangeRequest::Unsatisfiable => {
            return Ok(Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header("Content-Range", format!("bytes */{}", len))
                .body(codec::empty_body())?)
        }
    };

    let builder = builder
        .status(status)
        .header("Content-Length", body.len());
    match head {
        true => Ok(builder.body(codec::empty_body())?),
        false => Ok(builder.body(codec::bytes_body(body))?),
    }
}

/// Conditional headers of a PUT against the current etag, `None` when the
/// target does not exist yet.
fn check_preconditions(req: &DavRequest, etag: Option<String>, exists: bool) -> Result<(), DavError> {
    if let Some(if_match) = req.header("If-Match") {
        if !exists || !codec::etag_matches(if_match, etag.as_deref()) {
            return Err(DavError::PreconditionFailed);
        }
    }
    if let Some(if_none_match) = req.header("If-None-Match") {
        if exists && (if_none_match.trim() == "*" || codec::etag_matches(if_none_match, etag.as_deref())) {
            return Err(DavError::PreconditionFailed);
        }
    }
    Ok(())
}

fn stored(status: StatusCode, resource: &dyn DavResource) -> Result<HttpResponse, DavError> {
    let mut builder = Response::builder().status(status);
    if let Some(etag) = resource.etag() {
        builder = builder.header("ETag", etag);
    }
    Ok(builder.body(codec::empty_body())?)
}

pub(crate) async fn put(
    ctx: &DavContext,
    req: &DavRequest,
    target: Option<ArcResource>,
) -> Result<HttpResponse, DavError> {
    let content_type = req.header("Content-Type").map(str::to_string);

    if let Some(existing) = target {
        if existing.is_collection() {
            return Err(DavError::MethodNotAllowed);
        }
        check_preconditions(req, existing.etag(), true)?;
        if ctx.locks.is_locked_out(req, existing.as_ref()) {
            return Err(DavError::Locked);
        }
        let content = existing.as_content().ok_or(DavError::MethodNotAllowed)?;
        ctx.check_authorised(req, existing.as_ref())?;
        content.replace(req.body.clone(), content_type).await?;
        ctx.events.fire(DavEvent::Put {
            path: req.path.clone(),
        });
        tracing::debug!(path=%req.path, size=req.body.len(), "content replaced");
        return stored(StatusCode::NO_CONTENT, existing.as_ref());
    }

    check_preconditions(req, None, false)?;
    let (parent_path, name) = split_parent(&req.path).ok_or(DavError::MethodNotAllowed)?;
    let parent = ctx
        .resource(req, &parent_path)
        .await?
        .ok_or_else(|| DavError::Conflict("parent collection does not exist".into()))?;
    let collection = parent
        .as_collection()
        .ok_or_else(|| DavError::Conflict("parent is not a collection".into()))?;
    if ctx.locks.is_locked_out(req, parent.as_ref()) {
        return Err(DavError::Locked);
    }
    ctx.check_authorised(req, parent.as_ref())?;

    let created = collection
        .put_child(&name, req.body.clone(), content_type)
        .await?;
    ctx.events.fire(DavEvent::Put {
        path: req.path.clone(),
    });
    tracing::debug!(path=%req.path, size=req.body.len(), "content created");
    stored(StatusCode::CREATED, created.as_ref())
}

pub(crate) async fn delete(
    ctx: &DavContext,
    req: &DavRequest,
    resource: ArcResource,
) -> Result<HttpResponse, DavError> {
    if ctx.locks.is_locked_out(req, resource.as_ref()) {
        return Err(DavError::Locked);
    }
    let deletable = resource.as_deletable().ok_or(DavError::MethodNotAllowed)?;
    ctx.check_authorised(req, resource.as_ref())?;
    deletable.delete().await?;
    ctx.events.fire(DavEvent::Delete {
        path: req.path.clone(),
    });
    tracing::info!(path=%req.path, "resource deleted");
    codec::status(StatusCode::NO_CONTENT)
}
