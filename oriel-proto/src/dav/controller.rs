use anyhow::Result;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::{Request, Response, StatusCode};

use oriel_user::login::Principal;

use super::codec::{self, HttpResponse};
use super::content;
use super::error::DavError;
use super::lock;
use super::mkcol::mkcol;
use super::propfind::propfind;
use super::proppatch::proppatch;
use super::relocate::{relocate, Relocation};
use super::resource::ArcResource;
use super::services::{DavContext, DavRequest};

pub struct Controller;

impl Controller {
    /// Receive the whole request then dispatch it
    pub(crate) async fn route(
        ctx: DavContext,
        principal: Option<Principal>,
        req: Request<Incoming>,
    ) -> Result<HttpResponse> {
        let (parts, body) = req.into_parts();
        let body: Bytes = body.collect().await?.to_bytes();

        let raw_path = parts.uri.path().to_string();
        let path = match decode_path(&raw_path) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        let host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|h| h.to_str().ok())
            .or(parts.uri.host())
            .unwrap_or_default()
            .to_string();

        let dav_req = DavRequest {
            method: parts.method.as_str().to_uppercase(),
            host,
            path,
            raw_path,
            headers: parts.headers,
            body,
            principal,
        };
        Ok(Self::dispatch(&ctx, dav_req).await)
    }

    /// Run a method handler, errors become a status response. Every
    /// response, errors included, advertises the DAV compliance classes.
    pub async fn dispatch(ctx: &DavContext, req: DavRequest) -> HttpResponse {
        let target = match ctx.resource(&req, &req.path).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(err=?e, path=%req.path, "resource lookup failed");
                return with_dav_header(error_response(&e), codec::DAV_CLASSES);
            }
        };
        let level = content::dav_level(target.as_ref().map(|t| t.as_ref()));

        let outcome = Self::handle(ctx, &req, target).await;

        let resp = match outcome {
            Ok(r) => r,
            Err(e) => {
                tracing::info!(method=%req.method, path=%req.path, err=%e, "request refused");
                error_response(&e)
            }
        };
        with_dav_header(resp, level)
    }

    async fn handle(
        ctx: &DavContext,
        req: &DavRequest,
        target: Option<ArcResource>,
    ) -> Result<HttpResponse, DavError> {
        match req.method.as_str() {
            "OPTIONS" => content::options(target.as_ref()),
            "GET" => content::get(ctx, req, found(target)?, false).await,
            "HEAD" => content::get(ctx, req, found(target)?, true).await,
            "PUT" => content::put(ctx, req, target).await,
            "DELETE" => content::delete(ctx, req, found(target)?).await,
            "PROPFIND" => propfind(ctx, req, found(target)?).await,
            "PROPPATCH" => proppatch(ctx, req, found(target)?).await,
            "MKCOL" => mkcol(ctx, req, target).await,
            "COPY" => relocate(ctx, req, found(target)?, Relocation::Copy).await,
            "MOVE" => relocate(ctx, req, found(target)?, Relocation::Move).await,
            "LOCK" => lock::lock(ctx, req, target).await,
            "UNLOCK" => lock::unlock(ctx, req, found(target)?).await,
            _ => Ok(Response::builder()
                .status(501)
                .body(codec::text_body("HTTP Method not implemented"))?),
        }
    }
}

fn decode_path(raw: &str) -> Result<String, HttpResponse> {
    urlencoding::decode(raw)
        .map(|p| p.into_owned())
        .map_err(|_| codec::rejection(StatusCode::BAD_REQUEST, "Path is not valid UTF-8"))
}

fn found(target: Option<ArcResource>) -> Result<ArcResource, DavError> {
    target.ok_or(DavError::NotFound)
}

fn error_response(err: &DavError) -> HttpResponse {
    let mut resp = Response::new(codec::bytes_body(Bytes::from(err.to_string())));
    *resp.status_mut() = err.status();
    if err.status() == StatusCode::UNAUTHORIZED {
        resp.headers_mut().insert(
            "WWW-Authenticate",
            HeaderValue::from_static("Basic realm=\"Oriel\""),
        );
    }
    resp
}

fn with_dav_header(mut resp: HttpResponse, level: &'static str) -> HttpResponse {
    resp.headers_mut()
        .insert("DAV", HeaderValue::from_static(level));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::memory::MemoryFs;
    use crate::dav::testing::{body_string, context, request, with_body};

    #[tokio::test]
    async fn errors_keep_the_dav_header() {
        let fs = MemoryFs::new(None);
        let ctx = context(&fs);

        let resp = Controller::dispatch(&ctx, request("PROPFIND", "/missing", &[])).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()["DAV"], "1, 2");

        let resp = Controller::dispatch(&ctx, request("REPORT", "/", &[])).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        assert!(resp.headers().contains_key("DAV"));
    }

    #[test]
    fn undecodable_paths_are_refused() {
        assert_eq!(decode_path("/a%20b/c").ok().as_deref(), Some("/a b/c"));
        let resp = match decode_path("/bad%FF") {
            Ok(p) => panic!("decoded into {}", p),
            Err(resp) => resp,
        };
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()["DAV"], "1, 2");
    }

    #[tokio::test]
    async fn anonymous_requests_are_challenged() {
        let fs = MemoryFs::new(None);
        let ctx = context(&fs);
        let mut req = request("PROPFIND", "/", &[]);
        req.principal = None;

        let resp = Controller::dispatch(&ctx, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn propfind_depth_one() {
        let fs = MemoryFs::new(None);
        fs.write_file("/docs/a.txt", "hello", Some("text/plain")).unwrap();
        fs.mkdir_all("/docs/sub").unwrap();
        let ctx = context(&fs);

        let req = with_body(
            "PROPFIND",
            "/docs",
            &[("Depth", "1")],
            r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/><D:getcontentlength/></D:prop></D:propfind>"#,
        );
        let resp = Controller::dispatch(&ctx, req).await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);

        let body = body_string(resp).await;
        let ms = oriel_dav::decoder::parse_multistatus(body.as_bytes())
            .await
            .unwrap();
        let hrefs: Vec<_> = ms.responses.iter().map(|r| r.href.as_str()).collect();
        assert_eq!(hrefs, vec!["/docs/", "/docs/a.txt", "/docs/sub/"]);
        assert!(ms.responses[0].is_collection());
        assert_eq!(
            ms.responses[1].found_text(&oriel_dav::types::QName::dav("getcontentlength")),
            Some("5")
        );
        // a collection has no length
        assert!(ms.responses[0].propstats.iter().any(|ps| ps.status == 404));
    }

    #[tokio::test]
    async fn proppatch_reports_unknown_properties() {
        let fs = MemoryFs::new(None);
        fs.write_file("/f.txt", "x", None).unwrap();
        let ctx = context(&fs);

        let req = with_body(
            "PROPPATCH",
            "/f.txt",
            &[],
            r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
  <D:set><D:prop><D:bogus>1</D:bogus><Z:color>red</Z:color></D:prop></D:set>
</D:propertyupdate>"#,
        );
        let resp = Controller::dispatch(&ctx, req).await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let body = body_string(resp).await;
        let ms = oriel_dav::decoder::parse_multistatus(body.as_bytes())
            .await
            .unwrap();
        let statuses: Vec<_> = ms.responses[0]
            .propstats
            .iter()
            .map(|ps| (ps.status, ps.props[0].name.local.clone()))
            .collect();
        assert_eq!(
            statuses,
            vec![(200, "color".to_string()), (404, "bogus".to_string())]
        );
    }

    #[tokio::test]
    async fn lock_then_unlock() {
        let fs = MemoryFs::new(None);
        fs.mkdir_all("/dir").unwrap();
        let ctx = context(&fs);

        let req = with_body(
            "LOCK",
            "/dir/new.txt",
            &[("Timeout", "Second-3600")],
            r#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope><D:locktype><D:write/></D:locktype><D:owner>http://example.org/~alice</D:owner></D:lockinfo>"#,
        );
        let resp = Controller::dispatch(&ctx, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let token = resp.headers()["Lock-Token"].to_str().unwrap().to_string();
        let body = body_string(resp).await;
        let discovered = oriel_dav::decoder::parse_lock_discovery(body.as_bytes())
            .await
            .unwrap()
            .0
            .unwrap();
        assert_eq!(discovered.timeout.as_deref(), Some("Second-3600"));
        assert_eq!(discovered.owner.as_deref(), Some("http://example.org/~alice"));
        assert_eq!(
            discovered.token.map(|t| format!("<{}>", t)),
            Some(token.clone())
        );

        // locked out without the token
        let resp = Controller::dispatch(&ctx, with_body("PUT", "/dir/new.txt", &[], "x")).await;
        assert_eq!(resp.status(), StatusCode::LOCKED);

        let resp = Controller::dispatch(&ctx, request("UNLOCK", "/dir/new.txt", &[("Lock-Token", "<opaquelocktoken:wrong>")])).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = Controller::dispatch(&ctx, request("UNLOCK", "/dir/new.txt", &[("Lock-Token", token.as_str())])).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = Controller::dispatch(&ctx, with_body("PUT", "/dir/new.txt", &[], "x")).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
