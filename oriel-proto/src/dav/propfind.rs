use hyper::StatusCode;
use itertools::Itertools;

use oriel_dav::decoder::parse_properties_request;
use oriel_dav::encoder::{response_namespaces, MultistatusBody};
use oriel_dav::types::{Depth, PropFindResponse, PropertiesRequest, QName};
use oriel_dav::value::{PropertyValue, ValueType};

use super::codec::{self, HttpResponse};
use super::error::DavError;
use super::property::{PropertyError, PropertySources};
use super::resource::{ArcResource, DavResource};
use super::services::{DavContext, DavRequest};

/// Href of a resource as written in a multistatus.
///
/// `&` is sent percent-encoded, some clients can not cope with `&amp;` in an
/// href. Collections always end with a slash.
pub(crate) fn resource_href(raw_path: &str, is_collection: bool) -> String {
    let mut href = raw_path.replace('&', "%26");
    if href.is_empty() {
        href.push('/');
    }
    if is_collection && !href.ends_with('/') {
        href.push('/');
    }
    href
}

fn child_href(parent: &str, child: &dyn DavResource) -> String {
    let mut href = parent.to_string();
    if !href.ends_with('/') {
        href.push('/');
    }
    href.push_str(&urlencoding::encode(&child.name()));
    if child.is_collection() {
        href.push('/');
    }
    href
}

/// Resolves the properties of a resource and of its descendants
pub struct PropFindBuilder<'a> {
    pub sources: &'a PropertySources,
    pub max_depth: u32,
}

impl<'a> PropFindBuilder<'a> {
    pub fn new(sources: &'a PropertySources, max_depth: u32) -> Self {
        Self { sources, max_depth }
    }

    /// One response per resource, in document order: the target first, then
    /// each child followed by its own descendants.
    pub async fn build(
        &self,
        resource: ArcResource,
        depth: Depth,
        request: &PropertiesRequest,
        base_href: &str,
    ) -> Result<Vec<PropFindResponse>, DavError> {
        let levels = depth.levels(self.max_depth);
        let href = resource_href(base_href, resource.is_collection());

        let mut responses = vec![];
        let mut stack = vec![(resource, href, 0u32)];
        while let Some((current, href, level)) = stack.pop() {
            responses.push(self.properties(current.as_ref(), &href, request));

            let collection = match current.as_collection() {
                Some(c) if level < levels => c,
                _ => continue,
            };
            let children = collection.children().await?;
            for child in children.into_iter().rev() {
                if child.name().is_empty() {
                    continue;
                }
                let child_href = child_href(&href, child.as_ref());
                stack.push((child, child_href, level + 1));
            }
        }
        Ok(responses)
    }

    fn requested_names(&self, request: &PropertiesRequest, resource: &dyn DavResource) -> Vec<QName> {
        match request {
            PropertiesRequest::PropName => self.sources.all_property_names(resource),
            PropertiesRequest::AllProp(include) => self
                .sources
                .all_property_names(resource)
                .into_iter()
                .chain(include.iter().map(|p| p.name.clone()))
                .unique()
                .collect(),
            PropertiesRequest::Prop(list) => list.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Every requested name ends up in exactly one bucket of the response
    pub fn properties(
        &self,
        resource: &dyn DavResource,
        href: &str,
        request: &PropertiesRequest,
    ) -> PropFindResponse {
        let names_only = matches!(request, PropertiesRequest::PropName);
        let mut resp = PropFindResponse::new(href);

        for name in self.requested_names(request, resource) {
            if name.local == "href" {
                let value = match names_only {
                    true => None,
                    false => Some(PropertyValue::Href(href.to_string())),
                };
                resp.add_known(name, value, ValueType::Href);
                continue;
            }

            let (source, meta) = match self.sources.find(&name, resource) {
                Some(found) => found,
                None => {
                    resp.add_error(404, name, None);
                    continue;
                }
            };
            let kind = meta.value_type().unwrap_or(ValueType::Text);
            if names_only {
                resp.add_known(name, None, kind);
                continue;
            }
            match source.get(&name, resource) {
                Ok(value) => {
                    resp.add_known(name, value, kind);
                }
                Err(PropertyError::NotAuthorized) => {
                    tracing::debug!(property=%name, "property read denied");
                    resp.add_error(401, name, Some("Not authorised"));
                }
                Err(PropertyError::Rejected { status, note }) => {
                    resp.add_error(status, name, Some(&note));
                }
            }
        }
        resp
    }
}

pub(crate) async fn propfind(
    ctx: &DavContext,
    req: &DavRequest,
    resource: ArcResource,
) -> Result<HttpResponse, DavError> {
    ctx.check_authorised(req, resource.as_ref())?;
    let request = parse_properties_request(&req.body).await?;
    let depth = codec::depth(&req.headers, Depth::Infinity);
    let brief = codec::brief(&req.headers, ctx.settings.brief_default);

    let responses = PropFindBuilder::new(&ctx.sources, ctx.settings.max_depth)
        .build(resource, depth, &request, &req.raw_path)
        .await?;
    tracing::debug!(path=%req.path, depth=depth.as_str(), count=responses.len(), "propfind");

    let ns = response_namespaces(&responses);
    codec::serialize(
        StatusCode::MULTI_STATUS,
        MultistatusBody { responses, brief },
        ns,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dav::lock::MemoryLockManager;
    use crate::dav::memory::MemoryFs;
    use crate::dav::standard::{DeadProperties, StandardProperties};

    fn sources() -> PropertySources {
        PropertySources::new(vec![
            Arc::new(StandardProperties::new(Arc::new(MemoryLockManager::default()))),
            Arc::new(DeadProperties),
        ])
    }

    fn tree() -> MemoryFs {
        let fs = MemoryFs::new(None);
        fs.write_file("/docs/a b.txt", "hello", Some("text/plain")).unwrap();
        fs.write_file("/docs/sub/deep.txt", "deep", None).unwrap();
        fs.write_file("/docs/fish&chips", "", None).unwrap();
        fs
    }

    #[tokio::test]
    async fn depth_walks_the_tree() {
        let fs = tree();
        let sources = sources();
        let builder = PropFindBuilder::new(&sources, 3);
        let docs = fs.lookup("/docs").unwrap();
        let request = PropertiesRequest::names([QName::dav("getetag")]);

        let zero = builder
            .build(docs.clone(), Depth::Zero, &request, "/docs")
            .await
            .unwrap();
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].href, "/docs/");

        let one = builder
            .build(docs.clone(), Depth::One, &request, "/docs/")
            .await
            .unwrap();
        let hrefs: Vec<_> = one.iter().map(|r| r.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec!["/docs/", "/docs/a%20b.txt", "/docs/sub/", "/docs/fish%26chips"]
        );

        let all = builder
            .build(docs, Depth::Infinity, &request, "/docs/")
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[3].href, "/docs/sub/deep.txt");
    }

    #[tokio::test]
    async fn infinity_is_capped() {
        let fs = MemoryFs::new(None);
        fs.write_file("/1/2/3/4/f", "", None).unwrap();
        let sources = sources();
        let responses = PropFindBuilder::new(&sources, 2)
            .build(fs.root(), Depth::Infinity, &PropertiesRequest::PropName, "/")
            .await
            .unwrap();
        let hrefs: Vec<_> = responses.iter().map(|r| r.href.as_str()).collect();
        assert_eq!(hrefs, vec!["/", "/1/", "/1/2/"]);
    }

    #[test]
    fn allprop_is_the_union_of_sources() {
        let fs = tree();
        let sources = sources();
        let file = fs.lookup("/docs/a b.txt").unwrap();
        file.as_dead_properties()
            .unwrap()
            .set_dead_property(&QName::new("urn:x", "color"), "blue".into());

        let builder = PropFindBuilder::new(&sources, 3);
        let resp = builder.properties(file.as_ref(), "/docs/a%20b.txt", &PropertiesRequest::default());

        let expected = sources.all_property_names(file.as_ref());
        let got: Vec<_> = resp.known.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(got, expected);
        assert!(resp.errors.is_empty());
        assert_eq!(
            resp.known_value(&QName::new("urn:x", "color"))
                .and_then(|v| v.value.clone()),
            Some(PropertyValue::Text("blue".into()))
        );
    }

    #[test]
    fn unknown_and_pseudo_properties() {
        let fs = tree();
        let sources = sources();
        let builder = PropFindBuilder::new(&sources, 3);
        let root = fs.root();
        let request = PropertiesRequest::names([
            QName::dav("href"),
            QName::dav("getcontentlength"),
            QName::dav("displayname"),
            QName::new("urn:x", "missing"),
        ]);
        let resp = builder.properties(root.as_ref(), "/", &request);

        assert_eq!(
            resp.known_value(&QName::dav("href")).unwrap().value,
            Some(PropertyValue::Href("/".into()))
        );
        assert_eq!(resp.status_of(&QName::dav("getcontentlength")), Some(404));
        assert_eq!(resp.status_of(&QName::dav("displayname")), Some(200));
        assert_eq!(resp.status_of(&QName::new("urn:x", "missing")), Some(404));
        assert_eq!(resp.names().count(), 4);
    }

    #[test]
    fn propname_has_no_values() {
        let fs = tree();
        let sources = sources();
        let resp = PropFindBuilder::new(&sources, 3).properties(
            fs.root().as_ref(),
            "/",
            &PropertiesRequest::PropName,
        );
        assert!(!resp.known.is_empty());
        assert!(resp.known.iter().all(|(_, v)| v.value.is_none()));
    }
}
