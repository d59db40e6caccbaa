use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RANGE};
use reqwest::Method;
use tokio::io::AsyncWrite;
use url::Url;

use oriel_dav::decoder::{parse_lock_discovery, parse_multistatus};
use oriel_dav::encoder::request_namespaces;
use oriel_dav::error::ParsingError;
use oriel_dav::types::{Depth, LockInfo, LockScope, LockType, PropertiesRequest, QName, ResponseEntry};
use oriel_dav::xml::{to_bytes, Namespaces};

use crate::cache::FolderCache;
use crate::error::{process_result_code, ClientError, Result};
use crate::folder::Folder;
use crate::listener::{ConnectionListener, FolderListener, ProgressListener, ResourceListener};
use crate::path::Path;
use crate::resource::Resource;
use crate::transfer::{
    header_value, method, progress_body, range_header, read_body, ByteRange, IfMatchCheck,
    PutResult, TransferService,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Properties asked for when listing a folder
pub fn default_fields() -> Vec<QName> {
    [
        "resourcetype",
        "getetag",
        "displayname",
        "getcontentlength",
        "getcontenttype",
        "creationdate",
        "getlastmodified",
        "iscollection",
        "lockdiscovery",
    ]
    .into_iter()
    .map(QName::dav)
    .collect()
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Base URL, its path is the root of the remote tree
    pub url: Url,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Connect and read timeout of every exchange
    pub timeout: Duration,
    pub cache_capacity: usize,
}

impl HostConfig {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            user: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        })
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.user = Some(user.to_string());
        self.password = Some(password.to_string());
        self
    }
}

/// Where a request goes.
///
/// A [`Path`] is relative to the host root and gets percent-encoded, a
/// `str` is taken as an already encoded absolute URL.
pub trait Target {
    fn url(&self, host: &Host) -> String;
}
impl Target for Path {
    fn url(&self, host: &Host) -> String {
        host.build_encoded_url(self)
    }
}
impl Target for str {
    fn url(&self, _host: &Host) -> String {
        self.to_string()
    }
}

struct HostInner {
    config: HostConfig,
    base_path: Path,
    transfer: TransferService,
    cache: FolderCache,
    folder_listeners: Mutex<HashMap<Path, Vec<Arc<dyn FolderListener>>>>,
    resource_listeners: Mutex<HashMap<Path, Vec<Arc<dyn ResourceListener>>>>,
}

/// A remote WebDAV server, and the root of its resource tree.
///
/// Cloning is cheap, clones share the connection pool, the children cache
/// and the transfer guard.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("url", &self.inner.config.url.as_str())
            .finish()
    }
}

impl Host {
    pub fn new(config: HostConfig) -> Result<Self> {
        let credentials = config
            .user
            .clone()
            .map(|u| (u, config.password.clone()));
        let transfer = TransferService::new(config.timeout, credentials)?;
        let base_path = Path::from_encoded(config.url.path());
        let cache = FolderCache::new(config.cache_capacity);
        Ok(Self {
            inner: Arc::new(HostInner {
                config,
                base_path,
                transfer,
                cache,
                folder_listeners: Mutex::new(HashMap::new()),
                resource_listeners: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn root(&self) -> Folder {
        Folder::new(self.clone(), Path::root())
    }

    pub fn build_encoded_url(&self, path: &Path) -> String {
        let base = self.inner.config.url.as_str().trim_end_matches('/');
        format!("{}{}", base, path.encoded())
    }

    /// Path below the host root designated by a response href, `None` when
    /// the href points outside of it
    pub fn path_of_href(&self, href: &str) -> Option<Path> {
        let raw = match Url::parse(href) {
            Ok(u) => u.path().to_string(),
            Err(_) => href.to_string(),
        };
        Path::from_encoded(&raw).strip_prefix(&self.inner.base_path)
    }

    pub(crate) fn cache(&self) -> &FolderCache {
        &self.inner.cache
    }

    // ---- tree navigation ----

    pub async fn find(&self, path: &Path) -> Result<Option<Resource>> {
        self.find_with(path, false).await
    }

    /// Walk the tree from the root, flushing every visited folder first
    /// when `invalidate_cache` is set
    pub async fn find_with(&self, path: &Path, invalidate_cache: bool) -> Result<Option<Resource>> {
        let mut current = self.root();
        let (last, dirs) = match path.parts().split_last() {
            Some(v) => v,
            None => return Ok(Some(Resource::Folder(current))),
        };
        for name in dirs {
            if invalidate_cache {
                current.flush();
            }
            match current.child(name).await? {
                Some(Resource::Folder(f)) => current = f,
                _ => return Ok(None),
            }
        }
        if invalidate_cache {
            current.flush();
        }
        current.child(last).await
    }

    pub async fn get_folder(&self, path: &Path) -> Result<Option<Folder>> {
        match self.find(path).await? {
            Some(Resource::Folder(f)) => Ok(Some(f)),
            Some(Resource::File(_)) => Err(ClientError::NotAFolder(path.to_string())),
            None => Ok(None),
        }
    }

    /// Resolve a folder, creating the missing levels when `create` is set.
    /// A file standing where a folder is expected gives `None`.
    pub async fn get_or_create_folder(&self, path: &Path, create: bool) -> Result<Option<Folder>> {
        tracing::trace!(path=%path, create, "get or create folder");
        let mut current = self.root();
        for name in path.parts() {
            current = match current.child(name).await? {
                Some(Resource::Folder(f)) => f,
                Some(Resource::File(_)) => {
                    tracing::warn!(path=%path, name=%name, "a file exists with the name of a folder");
                    return Ok(None);
                }
                None if create => current.create_folder(name).await?,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    // ---- listeners ----

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner.transfer.add_listener(listener);
    }

    pub(crate) fn add_folder_listener(&self, path: &Path, listener: Arc<dyn FolderListener>) {
        self.inner
            .folder_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path.clone())
            .or_default()
            .push(listener);
    }

    pub(crate) fn remove_folder_listener(&self, path: &Path, listener: &Arc<dyn FolderListener>) {
        if let Some(list) = self
            .inner
            .folder_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(path)
        {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    pub(crate) fn add_resource_listener(&self, path: &Path, listener: Arc<dyn ResourceListener>) {
        self.inner
            .resource_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path.clone())
            .or_default()
            .push(listener);
    }

    pub(crate) fn remove_resource_listener(&self, path: &Path, listener: &Arc<dyn ResourceListener>) {
        if let Some(list) = self
            .inner
            .resource_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(path)
        {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn folder_listeners(&self, path: &Path) -> Vec<Arc<dyn FolderListener>> {
        self.inner
            .folder_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// The cached listing of `parent` is stale afterwards, it is dropped
    pub(crate) fn notify_child_added(&self, parent: &Path, child: &Resource) {
        for l in self.folder_listeners(parent) {
            l.on_child_added(parent, child);
        }
        self.inner.cache.remove(parent);
    }

    pub(crate) fn notify_child_removed(&self, parent: &Path, child: &Resource) {
        for l in self.folder_listeners(parent) {
            l.on_child_removed(parent, child);
        }
        self.inner.cache.remove(parent);
    }

    pub(crate) fn notify_deleted(&self, resource: &Resource) {
        let listeners = self
            .inner
            .resource_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(resource.path())
            .unwrap_or_default();
        for l in listeners {
            l.on_deleted(resource);
        }
    }

    // ---- HTTP methods ----

    /// GET into `out`, returns the number of bytes received
    pub async fn do_get<T, W>(
        &self,
        target: &T,
        ranges: &[ByteRange],
        out: &mut W,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<u64>
    where
        T: Target + ?Sized,
        W: AsyncWrite + Unpin + Send,
    {
        let url = target.url(self);
        let mut headers = HeaderMap::new();
        if let Some(r) = range_header(ranges) {
            headers.insert(RANGE, header_value(&r)?);
        }
        let exchange = self.inner.transfer.begin().await;
        let resp = exchange.send(Method::GET, &url, headers, None).await?;
        process_result_code(resp.status().as_u16(), &url)?;
        read_body(resp, out, last_segment(&url), listener).await
    }

    pub async fn get<T: Target + ?Sized>(&self, target: &T) -> Result<Bytes> {
        let mut buffer = Vec::new();
        self.do_get(target, &[], &mut buffer, None).await?;
        Ok(Bytes::from(buffer))
    }

    pub async fn do_put<T: Target + ?Sized>(
        &self,
        target: &T,
        content: Bytes,
        content_type: Option<&str>,
        check: Option<&IfMatchCheck>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<PutResult> {
        let url = target.url(self);
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, header_value(ct)?);
        }
        if let Some(check) = check {
            check.apply(&mut headers)?;
        }

        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let body = progress_body(
            content,
            last_segment(&url).to_string(),
            listener,
            cancelled.clone(),
        );
        let exchange = self.inner.transfer.begin().await;
        let resp = match exchange.send_body(Method::PUT, &url, headers, body).await {
            Ok(r) => r,
            Err(_) if cancelled.load(std::sync::atomic::Ordering::SeqCst) => {
                tracing::info!(url=%url, "upload cancelled");
                return Err(ClientError::Cancelled);
            }
            Err(e) => return Err(e),
        };
        let status = resp.status().as_u16();
        process_result_code(status, &url)?;
        let etag = resp
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        tracing::debug!(url=%url, status, "uploaded");
        Ok(PutResult { status, etag })
    }

    pub async fn do_mkcol<T: Target + ?Sized>(&self, target: &T) -> Result<u16> {
        self.simple(method("MKCOL")?, &target.url(self), HeaderMap::new())
            .await
    }

    pub async fn do_delete<T: Target + ?Sized>(&self, target: &T) -> Result<u16> {
        self.simple(Method::DELETE, &target.url(self), HeaderMap::new())
            .await
    }

    pub async fn do_move<T, D>(&self, from: &T, to: &D) -> Result<u16>
    where
        T: Target + ?Sized,
        D: Target + ?Sized,
    {
        let mut headers = HeaderMap::new();
        headers.insert("Destination", header_value(&to.url(self))?);
        self.simple(method("MOVE")?, &from.url(self), headers).await
    }

    /// COPY, replacing whatever exists at the destination
    pub async fn do_copy<T, D>(&self, from: &T, to: &D) -> Result<u16>
    where
        T: Target + ?Sized,
        D: Target + ?Sized,
    {
        let mut headers = HeaderMap::new();
        headers.insert("Destination", header_value(&to.url(self))?);
        headers.insert("Overwrite", HeaderValue::from_static("T"));
        self.simple(method("COPY")?, &from.url(self), headers).await
    }

    /// Take an exclusive write lock, owned by the configured user. Returns
    /// the lock token, read from the response body first.
    pub async fn do_lock<T: Target + ?Sized>(&self, target: &T, timeout: Option<u64>) -> Result<String> {
        let url = target.url(self);
        let info = LockInfo {
            scope: LockScope::Exclusive,
            kind: LockType::Write,
            owner: self.inner.config.user.clone(),
        };
        let body = to_bytes(&info, Namespaces::default())
            .await
            .map_err(ParsingError::from)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"));
        if let Some(secs) = timeout {
            headers.insert("Timeout", header_value(&format!("Second-{}", secs))?);
        }

        let exchange = self.inner.transfer.begin().await;
        let resp = exchange
            .send(method("LOCK")?, &url, headers, Some(Bytes::from(body)))
            .await?;
        process_result_code(resp.status().as_u16(), &url)?;

        let header_token = resp
            .headers()
            .get("Lock-Token")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string());
        let raw = resp.bytes().await?;
        let body_token = match parse_lock_discovery(&raw).await {
            Ok(discovery) => discovery.0.and_then(|l| l.token),
            Err(e) => {
                tracing::debug!(err=%e, url=%url, "lock response body not understood");
                None
            }
        };
        body_token
            .or(header_token)
            .ok_or(ClientError::Parsing(ParsingError::MissingChild))
    }

    pub async fn do_unlock<T: Target + ?Sized>(&self, target: &T, token: &str) -> Result<u16> {
        let mut headers = HeaderMap::new();
        headers.insert("Lock-Token", header_value(&format!("<{}>", token))?);
        self.simple(method("UNLOCK")?, &target.url(self), headers)
            .await
    }

    /// PROPFIND, every response of the multistatus is returned, the target
    /// itself included. Without `fields`, [`default_fields`] are asked for.
    pub async fn propfind<T: Target + ?Sized>(
        &self,
        target: &T,
        depth: Depth,
        fields: Option<&[QName]>,
    ) -> Result<Vec<ResponseEntry>> {
        let url = target.url(self);
        let names = match fields {
            Some(f) => f.to_vec(),
            None => default_fields(),
        };
        let req = PropertiesRequest::names(names);
        let body = to_bytes(&req, request_namespaces(&req))
            .await
            .map_err(ParsingError::from)?;

        let mut headers = HeaderMap::new();
        headers.insert("Depth", HeaderValue::from_static(depth.as_str()));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"));
        headers.insert("Accept", HeaderValue::from_static("text/xml"));
        headers.insert("Accept-Charset", HeaderValue::from_static("utf-8,*;q=0.1"));

        let exchange = self.inner.transfer.begin().await;
        let resp = exchange
            .send(method("PROPFIND")?, &url, headers, Some(Bytes::from(body)))
            .await?;
        let status = resp.status().as_u16();
        if status != 207 {
            process_result_code(status, &url)?;
            tracing::warn!(url=%url, status, "PROPFIND answered without a multistatus");
            return Ok(vec![]);
        }
        let raw = resp.bytes().await?;
        Ok(parse_multistatus(&raw).await?.responses)
    }

    /// OPTIONS, returns the advertised `DAV` compliance classes. A redirect
    /// gives `None`.
    pub async fn options<T: Target + ?Sized>(&self, target: &T) -> Result<Option<String>> {
        let url = target.url(self);
        let exchange = self.inner.transfer.begin().await;
        let resp = exchange
            .send(Method::OPTIONS, &url, HeaderMap::new(), None)
            .await?;
        let status = resp.status().as_u16();
        if status == 301 || status == 302 {
            return Ok(None);
        }
        process_result_code(status, &url)?;
        Ok(resp
            .headers()
            .get("DAV")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    async fn simple(&self, method: Method, url: &str, headers: HeaderMap) -> Result<u16> {
        let exchange = self.inner.transfer.begin().await;
        let resp = exchange.send(method.clone(), url, headers, None).await?;
        let status = resp.status().as_u16();
        tracing::debug!(method=%method, url, status, "done");
        process_result_code(status, url)?;
        Ok(status)
    }
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').find(|s| !s.is_empty()).unwrap_or(url)
}
