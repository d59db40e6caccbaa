use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, IF_MATCH, IF_NONE_MATCH, LOCATION};
use reqwest::{Body, Client, Method, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

use crate::error::{ClientError, Result};
use crate::listener::{ConnectionListener, ProgressListener};

pub const MAX_REDIRECTS: usize = 10;
const CHUNK_SIZE: usize = 64 * 1024;

/// Methods re-issued on a 301, 302 or 307, any other one surfaces the
/// redirect as an error
const REDIRECTABLE: [&str; 6] = ["PROPFIND", "LOCK", "UNLOCK", "DELETE", "GET", "HEAD"];

pub(crate) fn method(name: &str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|_| ClientError::BadRequest(format!("invalid method {}", name)))
}

pub(crate) fn header_value(raw: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw)
        .map_err(|_| ClientError::BadRequest(format!("invalid header value {:?}", raw)))
}

/// Conditional upload.
///
/// With an etag the upload only replaces that exact version (`If-Match`),
/// without one it only creates a new resource (`If-None-Match: *`).
#[derive(Debug, Clone, PartialEq)]
pub struct IfMatchCheck {
    pub etag: Option<String>,
}
impl IfMatchCheck {
    pub fn new(etag: Option<String>) -> Self {
        Self { etag }
    }

    pub(crate) fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        match &self.etag {
            Some(etag) => headers.insert(IF_MATCH, header_value(etag)?),
            None => headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*")),
        };
        Ok(())
    }
}

/// `bytes=start-finish`, an open range when `finish` is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub finish: Option<u64>,
}

pub(crate) fn range_header(ranges: &[ByteRange]) -> Option<String> {
    if ranges.is_empty() {
        return None;
    }
    let specs = ranges
        .iter()
        .map(|r| match r.finish {
            Some(f) => format!("{}-{}", r.start, f),
            None => format!("{}-", r.start),
        })
        .collect::<Vec<_>>()
        .join(",");
    Some(format!("bytes={}", specs))
}

/// Status and new etag of a PUT
#[derive(Debug, Clone, PartialEq)]
pub struct PutResult {
    pub status: u16,
    pub etag: Option<String>,
}

/// The HTTP side of a host.
///
/// Exchanges are serialized: a caller first obtains an [`Exchange`], which
/// holds the transfer guard until it is dropped.
pub(crate) struct TransferService {
    client: Client,
    credentials: Option<(String, Option<String>)>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
    serial: Mutex<()>,
}

impl TransferService {
    pub fn new(timeout: Duration, credentials: Option<(String, Option<String>)>) -> Result<Self> {
        // reqwest never retries by itself, redirects are followed below
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            credentials,
            listeners: RwLock::new(vec![]),
            serial: Mutex::new(()),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn begin(&self) -> Exchange<'_> {
        let guard = self.serial.lock().await;
        self.listeners().iter().for_each(|l| l.on_start_request());
        Exchange {
            service: self,
            _guard: guard,
        }
    }

    fn request(&self, method: Method, url: &str, headers: HeaderMap) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url).headers(headers);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }
}

pub(crate) struct Exchange<'a> {
    service: &'a TransferService,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        self.service
            .listeners()
            .iter()
            .for_each(|l| l.on_finish_request());
    }
}

impl Exchange<'_> {
    /// Send a request, following up to [`MAX_REDIRECTS`] redirects when the
    /// method allows it.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response> {
        let mut current = url.to_string();
        let mut hops = 0;
        loop {
            tracing::trace!(method=%method, url=%current, "sending");
            let mut builder = self.service.request(method.clone(), &current, headers.clone());
            if let Some(b) = &body {
                builder = builder.body(b.clone());
            }
            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            if !matches!(status, 301 | 302 | 307) || !REDIRECTABLE.contains(&method.as_str()) {
                return Ok(resp);
            }
            if hops == MAX_REDIRECTS {
                tracing::warn!(url=%current, "too many redirects");
                return Err(ClientError::Redirect {
                    status,
                    href: current,
                });
            }
            let location = match resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
                Some(l) => l.to_string(),
                None => {
                    return Err(ClientError::Redirect {
                        status,
                        href: current,
                    })
                }
            };
            let next = Url::parse(&current)?.join(&location)?;
            tracing::debug!(from=%current, to=%next, status, "following redirect");
            current = next.to_string();
            hops += 1;
        }
    }

    /// Send a request with a streamed body, a redirect is never followed
    pub async fn send_body(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Result<Response> {
        tracing::trace!(method=%method, url=%url, "sending body");
        Ok(self
            .service
            .request(method, url, headers)
            .body(body)
            .send()
            .await?)
    }
}

/// Upload body reporting progress per chunk.
///
/// A cancellation fails the stream and raises `cancelled`, so that the
/// caller can tell it apart from a network failure.
pub(crate) fn progress_body(
    content: Bytes,
    name: String,
    listener: Option<Arc<dyn ProgressListener>>,
    cancelled: Arc<AtomicBool>,
) -> Body {
    let listener = match listener {
        Some(l) => l,
        None => return Body::from(content),
    };
    let total = content.len() as u64;
    let chunks = (0..content.len())
        .step_by(CHUNK_SIZE)
        .map(|start| content.slice(start..(start + CHUNK_SIZE).min(content.len())))
        .collect::<Vec<_>>();

    let mut sent = 0u64;
    let mut last = Instant::now();
    let stream = stream::iter(chunks).map(move |chunk| {
        if listener.is_cancelled() {
            cancelled.store(true, Ordering::SeqCst);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "upload cancelled",
            ));
        }
        sent += chunk.len() as u64;
        listener.on_read(chunk.len(), last.elapsed());
        listener.on_progress(sent, Some(total), &name);
        last = Instant::now();
        Ok(chunk)
    });
    Body::wrap_stream(stream)
}

/// Copy a response body into `out`, checking for cancellation before every
/// chunk. Dropping the response on cancellation aborts the exchange.
pub(crate) async fn read_body<W: AsyncWrite + Unpin>(
    mut resp: Response,
    out: &mut W,
    name: &str,
    listener: Option<&dyn ProgressListener>,
) -> Result<u64> {
    let total = resp.content_length();
    let mut received = 0u64;
    loop {
        if listener.map(|l| l.is_cancelled()).unwrap_or(false) {
            tracing::info!(name, received, "download cancelled");
            return Err(ClientError::Cancelled);
        }
        let started = Instant::now();
        let chunk = match resp.chunk().await? {
            Some(c) => c,
            None => break,
        };
        out.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if let Some(l) = listener {
            l.on_read(chunk.len(), started.elapsed());
            l.on_progress(received, total, name);
        }
    }
    out.flush().await?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_headers() {
        assert_eq!(range_header(&[]), None);
        assert_eq!(
            range_header(&[
                ByteRange {
                    start: 0,
                    finish: Some(99)
                },
                ByteRange {
                    start: 200,
                    finish: None
                }
            ])
            .as_deref(),
            Some("bytes=0-99,200-")
        );
    }

    #[test]
    fn if_match_check() {
        let mut headers = HeaderMap::new();
        IfMatchCheck::new(Some("\"v1\"".into()))
            .apply(&mut headers)
            .unwrap();
        assert_eq!(headers[IF_MATCH], "\"v1\"");
        assert!(!headers.contains_key(IF_NONE_MATCH));

        let mut headers = HeaderMap::new();
        IfMatchCheck::new(None).apply(&mut headers).unwrap();
        assert_eq!(headers[IF_NONE_MATCH], "*");
        assert!(!headers.contains_key(IF_MATCH));
    }
}
