use std::io::{Error, ErrorKind};

use futures::sink::SinkExt;
use futures::stream::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Response, StatusCode};
use tokio_util::io::{CopyToBytes, SinkWriter};
use tokio_util::sync::PollSender;

use oriel_dav::types::Depth;
use oriel_dav::xml as dxml;

use super::error::DavError;

pub type HttpResponse = Response<BoxBody<Bytes, std::io::Error>>;

const LOCK_TOKEN_SCHEME: &str = "opaquelocktoken:";

/// Compliance classes advertised when no resource is at hand
pub(crate) const DAV_CLASSES: &str = "1, 2";

// ---- Bodies ----

pub(crate) fn text_body(txt: &'static str) -> BoxBody<Bytes, std::io::Error> {
    BoxBody::new(Full::new(Bytes::from(txt)).map_err(|e| match e {}))
}

pub(crate) fn bytes_body(content: Bytes) -> BoxBody<Bytes, std::io::Error> {
    BoxBody::new(Full::new(content).map_err(|e| match e {}))
}

pub(crate) fn empty_body() -> BoxBody<Bytes, std::io::Error> {
    BoxBody::new(Empty::new().map_err(|e| match e {}))
}

/// Refusal sent before any resource is resolved, it still advertises DAV
pub(crate) fn rejection(code: StatusCode, msg: &'static str) -> HttpResponse {
    let mut resp = Response::new(text_body(msg));
    *resp.status_mut() = code;
    resp.headers_mut()
        .insert("DAV", HeaderValue::from_static(DAV_CLASSES));
    resp
}

/// Response without body
pub(crate) fn status(code: StatusCode) -> Result<HttpResponse, DavError> {
    Ok(Response::builder().status(code).body(empty_body())?)
}

/// Stream an XML document as the body of the response.
///
/// The document is written by a dedicated task, serialization errors can
/// only be logged once the status is sent.
pub(crate) fn serialize<T: dxml::QWrite + Send + 'static>(
    status_ok: StatusCode,
    elem: T,
    ns: dxml::Namespaces,
) -> Result<Response<BoxBody<Bytes, std::io::Error>>, DavError> {
    serialize_with(Response::builder().status(status_ok), elem, ns)
}

pub(crate) fn serialize_with<T: dxml::QWrite + Send + 'static>(
    builder: http::response::Builder,
    elem: T,
    ns: dxml::Namespaces,
) -> Result<HttpResponse, DavError> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(1);

    // Build the writer
    tokio::task::spawn(async move {
        let sink = PollSender::new(tx).sink_map_err(|_| Error::from(ErrorKind::BrokenPipe));
        let mut writer = SinkWriter::new(CopyToBytes::new(sink));
        let q = quick_xml::writer::Writer::new_with_indent(&mut writer, b' ', 4);
        let mut qwriter = dxml::Writer::new(q, ns);
        let decl = quick_xml::events::BytesDecl::new("1.0", Some("utf-8"), None);
        match qwriter
            .q
            .write_event_async(quick_xml::events::Event::Decl(decl))
            .await
        {
            Ok(_) => (),
            Err(e) => tracing::error!(err=?e, "unable to write XML declaration <?xml ... >"),
        }
        match elem.qwrite(&mut qwriter).await {
            Ok(_) => tracing::trace!("fully serialized object"),
            Err(e) => tracing::error!(err=?e, "failed to serialize object"),
        }
    });

    // Build the reader
    let recv = tokio_stream::wrappers::ReceiverStream::new(rx);
    let stream = StreamBody::new(recv.map(|v| Ok(Frame::data(v))));
    let boxed_body = BoxBody::new(stream);

    let response = builder
        .header("content-type", "application/xml; charset=\"utf-8\"")
        .body(boxed_body)?;

    Ok(response)
}

// ---- Request headers ----

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `Depth` header, `default` when absent or garbled
pub(crate) fn depth(headers: &HeaderMap, default: Depth) -> Depth {
    header(headers, "Depth")
        .and_then(Depth::parse)
        .unwrap_or(default)
}

/// Decoded path of a `Destination` header, absolute URL or absolute path
pub(crate) fn destination(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let encoded = match url::Url::parse(raw) {
        Ok(u) if u.has_host() => u.path().to_string(),
        Ok(_) => return None,
        Err(url::ParseError::RelativeUrlWithoutBase) if raw.starts_with('/') => raw.to_string(),
        Err(_) => return None,
    };
    urlencoding::decode(&encoded).ok().map(|p| p.into_owned())
}

/// `Overwrite: T` is the only way to allow an overwrite
pub(crate) fn overwrite(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some("T") | Some("t"))
}

/// The macOS Finder never sends `Overwrite` but expects replacing to work
pub(crate) fn is_finder(user_agent: Option<&str>) -> bool {
    user_agent
        .map(|ua| ua.starts_with("WebDAVFS") || ua.starts_with("WebDAVLib"))
        .unwrap_or(false)
}

fn strip_token(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix(LOCK_TOKEN_SCHEME).unwrap_or(raw).to_string()
}

/// Lock tokens of the state lists of an `If` header.
///
/// If = "If" ":" ( 1*No-tag-list | 1*Tagged-list )
///
/// Resource tags, outside of the parentheses, are ignored.
pub fn if_tokens(raw: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut in_list = false;
    let mut rest = raw;
    while let Some(c) = rest.chars().next() {
        match c {
            '(' => in_list = true,
            ')' => in_list = false,
            '<' => {
                let end = match rest.find('>') {
                    Some(e) => e,
                    None => break,
                };
                if in_list {
                    tokens.push(strip_token(&rest[1..end]));
                }
                rest = &rest[end + 1..];
                continue;
            }
            '[' => {
                // entity tag, may contain parentheses
                let end = match rest.find(']') {
                    Some(e) => e,
                    None => break,
                };
                rest = &rest[end + 1..];
                continue;
            }
            _ => (),
        }
        rest = &rest[c.len_utf8()..];
    }
    tokens
}

/// `Lock-Token: <opaquelocktoken:...>`
pub(crate) fn lock_token(raw: &str) -> Option<String> {
    let inner = raw.trim().strip_prefix('<')?.strip_suffix('>')?;
    match inner.trim().is_empty() {
        true => None,
        false => Some(strip_token(inner)),
    }
}

/// RFC 7240 `Prefer: return=minimal` and the older `Brief: t`
pub(crate) fn brief(headers: &HeaderMap, default: bool) -> bool {
    if let Some(b) = header(headers, "Brief") {
        return matches!(b.trim(), "t" | "T");
    }
    match header(headers, "Prefer") {
        Some(p) => p.split(',').any(|v| v.trim() == "return=minimal") || default,
        None => default,
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum RangeRequest {
    Full,
    /// Inclusive bounds
    Partial(u64, u64),
    Unsatisfiable,
}

/// A single `bytes=` range, multiple ranges are served in full
pub(crate) fn range(raw: Option<&str>, len: u64) -> RangeRequest {
    let spec = match raw.and_then(|r| r.trim().strip_prefix("bytes=")) {
        Some(s) if !s.contains(',') => s.trim(),
        _ => return RangeRequest::Full,
    };
    let (start, end) = match spec.split_once('-') {
        Some(v) => v,
        None => return RangeRequest::Full,
    };
    let bounds = match (start.trim(), end.trim()) {
        ("", "") => return RangeRequest::Full,
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => return RangeRequest::Unsatisfiable,
            Ok(n) => (len.saturating_sub(n), len.saturating_sub(1)),
            Err(_) => return RangeRequest::Full,
        },
        (first, "") => match first.parse::<u64>() {
            Ok(f) => (f, len.saturating_sub(1)),
            Err(_) => return RangeRequest::Full,
        },
        (first, last) => match (first.parse::<u64>(), last.parse::<u64>()) {
            (Ok(f), Ok(l)) if f <= l => (f, l.min(len.saturating_sub(1))),
            _ => return RangeRequest::Full,
        },
    };
    match bounds.0 < len {
        true => RangeRequest::Partial(bounds.0, bounds.1),
        false => RangeRequest::Unsatisfiable,
    }
}

/// `If-Match` / `If-None-Match` entity tag list against the current etag.
///
/// `*` matches any existing resource, weak tags compare equal to strong ones.
pub(crate) fn etag_matches(raw: &str, etag: Option<&str>) -> bool {
    let current = match etag {
        Some(e) => e.trim_start_matches("W/"),
        None => return false,
    };
    raw.split(',')
        .map(|t| t.trim().trim_start_matches("W/"))
        .any(|t| t == "*" || t == current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_advertise_dav() {
        let resp = rejection(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers()["DAV"], "1, 2");
    }

    #[test]
    fn destination_header() {
        assert_eq!(
            destination("http://example.com/c/b%20c.txt").as_deref(),
            Some("/c/b c.txt")
        );
        assert_eq!(destination("/c/b.txt").as_deref(), Some("/c/b.txt"));
        assert_eq!(destination("c/b.txt"), None);
        assert_eq!(destination("mailto:bob@example.com"), None);
    }

    #[test]
    fn if_header_tokens() {
        assert_eq!(
            if_tokens("(<opaquelocktoken:abc> [\"etag(1)\"]) (Not <DAV:no-lock>)"),
            vec!["abc".to_string(), "DAV:no-lock".to_string()]
        );
        assert_eq!(
            if_tokens("<http://example.com/a> (<opaquelocktoken:xyz>)"),
            vec!["xyz".to_string()]
        );
        assert!(if_tokens("garbage").is_empty());
        assert_eq!(lock_token("<opaquelocktoken:abc>").as_deref(), Some("abc"));
        assert_eq!(lock_token("abc"), None);
    }

    #[test]
    fn byte_ranges() {
        assert_eq!(range(None, 10), RangeRequest::Full);
        assert_eq!(range(Some("bytes=2-4"), 10), RangeRequest::Partial(2, 4));
        assert_eq!(range(Some("bytes=5-"), 10), RangeRequest::Partial(5, 9));
        assert_eq!(range(Some("bytes=-3"), 10), RangeRequest::Partial(7, 9));
        assert_eq!(range(Some("bytes=8-100"), 10), RangeRequest::Partial(8, 9));
        assert_eq!(range(Some("bytes=10-"), 10), RangeRequest::Unsatisfiable);
        assert_eq!(range(Some("bytes=0-1,4-5"), 10), RangeRequest::Full);
    }

    #[test]
    fn overwrite_and_agents() {
        assert!(overwrite(Some("T")));
        assert!(!overwrite(Some("F")));
        assert!(!overwrite(None));
        assert!(is_finder(Some("WebDAVFS/3.0.0 (03008000) Darwin/21.0.0")));
        assert!(!is_finder(Some("curl/8.0")));
    }

    #[test]
    fn entity_tags() {
        assert!(etag_matches("\"a\", \"b\"", Some("\"b\"")));
        assert!(etag_matches("*", Some("\"b\"")));
        assert!(!etag_matches("*", None));
        assert!(etag_matches("W/\"a\"", Some("\"a\"")));
        assert!(!etag_matches("\"a\"", Some("\"c\"")));
    }
}
