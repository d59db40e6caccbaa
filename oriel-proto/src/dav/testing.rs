use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;

use oriel_user::config::DavSettings;
use oriel_user::login::Principal;

use super::codec::HttpResponse;
use super::memory::MemoryFs;
use super::services::{DavContext, DavRequest};

pub(crate) fn context(fs: &MemoryFs) -> DavContext {
    DavContext::new(Arc::new(fs.clone()), DavSettings::default())
}

pub(crate) fn request(method: &str, path: &str, headers: &[(&'static str, &str)]) -> DavRequest {
    with_body(method, path, headers, "")
}

pub(crate) fn with_body(
    method: &str,
    path: &str,
    headers: &[(&'static str, &str)],
    body: &'static str,
) -> DavRequest {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        map.insert(
            HeaderName::from_bytes(k.as_bytes()).unwrap(),
            HeaderValue::from_str(v).unwrap(),
        );
    }
    DavRequest {
        method: method.to_string(),
        host: "localhost".into(),
        path: urlencoding::decode(path).unwrap().into_owned(),
        raw_path: path.to_string(),
        headers: map,
        body: Bytes::from_static(body.as_bytes()),
        principal: Some(Principal {
            username: "alice".into(),
        }),
    }
}

pub(crate) async fn body_string(resp: HttpResponse) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
