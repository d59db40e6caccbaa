use hyper::StatusCode;

use oriel_dav::decoder::parse_proppatch;
use oriel_dav::encoder::{response_namespaces, MultistatusBody};
use oriel_dav::types::{PropFindResponse, PropPatchParseResult, QName};
use oriel_dav::value::ValueType;

use super::codec::{self, HttpResponse};
use super::error::DavError;
use super::propfind::resource_href;
use super::property::{PropertyError, PropertySources};
use super::resource::{ArcResource, DavResource};
use super::services::{DavContext, DavEvent, DavRequest};

/// Applies a parsed `propertyupdate` to a resource through the property
/// sources. Values are never echoed back, a success is an empty element in
/// the 200 propstat.
pub struct PropPatchSetter<'a> {
    pub sources: &'a PropertySources,
}

impl<'a> PropPatchSetter<'a> {
    pub fn new(sources: &'a PropertySources) -> Self {
        Self { sources }
    }

    pub async fn apply(
        &self,
        href: &str,
        patch: &PropPatchParseResult,
        resource: &dyn DavResource,
    ) -> Result<PropFindResponse, DavError> {
        let mut resp = PropFindResponse::new(href);

        for (name, raw) in patch.to_set.iter() {
            let (source, kind) = match self.sources.find_writable(name, resource) {
                Some(found) => found,
                None => {
                    self.unwritable(&mut resp, name, resource);
                    continue;
                }
            };
            let value = match kind.parse(raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(property=%name, err=?e, "invalid property value");
                    resp.add_error(400, name.clone(), Some("Invalid value"));
                    continue;
                }
            };
            record(&mut resp, name, kind, source.set(name, value, resource));
        }

        for name in patch.to_remove.iter() {
            match self.sources.find_writable(name, resource) {
                Some((source, kind)) => record(&mut resp, name, kind, source.clear(name, resource)),
                None => self.unwritable(&mut resp, name, resource),
            }
        }

        if let Some(commitable) = resource.as_commitable() {
            commitable.commit(&resp).await?;
        }
        Ok(resp)
    }

    fn unwritable(&self, resp: &mut PropFindResponse, name: &QName, resource: &dyn DavResource) {
        match self.sources.find(name, resource) {
            Some(_) => resp.add_error(403, name.clone(), Some("Property is read only")),
            None => resp.add_error(404, name.clone(), Some("Unknown property")),
        };
    }
}

fn record(
    resp: &mut PropFindResponse,
    name: &QName,
    kind: ValueType,
    outcome: Result<(), PropertyError>,
) {
    match outcome {
        Ok(()) => resp.add_known(name.clone(), None, kind),
        Err(PropertyError::NotAuthorized) => {
            resp.add_error(401, name.clone(), Some("Not authorised"))
        }
        Err(PropertyError::Rejected { status, note }) => {
            resp.add_error(status, name.clone(), Some(&note))
        }
    };
}

pub(crate) async fn proppatch(
    ctx: &DavContext,
    req: &DavRequest,
    resource: ArcResource,
) -> Result<HttpResponse, DavError> {
    if ctx.locks.is_locked_out(req, resource.as_ref()) {
        return Err(DavError::Locked);
    }
    ctx.check_authorised(req, resource.as_ref())?;
    let patch = parse_proppatch(&req.body)?;

    let href = resource_href(&req.raw_path, resource.is_collection());
    let resp = PropPatchSetter::new(&ctx.sources)
        .apply(&href, &patch, resource.as_ref())
        .await?;
    ctx.events.fire(DavEvent::PropPatch {
        path: req.path.clone(),
    });

    let responses = vec![resp];
    let ns = response_namespaces(&responses);
    let brief = codec::brief(&req.headers, ctx.settings.brief_default);
    codec::serialize(
        StatusCode::MULTI_STATUS,
        MultistatusBody { responses, brief },
        ns,
    )
}
