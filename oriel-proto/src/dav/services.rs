//! Collaborators of the method handlers: resource lookup, authorisation,
//! lock state and event emission, plus the request view they all receive.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::HeaderMap;

use oriel_dav::types::{ActiveLock, Depth, LockInfo, LockTimeout};
use oriel_user::config::DavSettings;
use oriel_user::login::Principal;

use super::codec;
use super::error::DavError;
use super::lock::MemoryLockManager;
use super::property::PropertySources;
use super::resource::{ArcResource, DavResource};
use super::standard::{DeadProperties, StandardProperties};

/// A fully received request, path already percent-decoded
#[derive(Debug, Clone)]
pub struct DavRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    pub raw_path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub principal: Option<Principal>,
}
impl DavRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Lock tokens submitted in the `If` header
    pub fn if_tokens(&self) -> Vec<String> {
        self.header("If").map(codec::if_tokens).unwrap_or_default()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("User-Agent")
    }

    pub fn is_body_empty(&self) -> bool {
        self.body.iter().all(|b| b.is_ascii_whitespace())
    }
}

/// Path segments of a decoded path, empty ones removed
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split a path into its parent path and its last segment, `None` for the root
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut parts = segments(path);
    let name = parts.pop()?;
    let parent = match parts.is_empty() {
        true => "/".to_string(),
        false => format!("/{}/", parts.join("/")),
    };
    Some((parent, name.to_string()))
}

#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn resource(&self, host: &str, path: &str) -> Result<Option<ArcResource>, DavError>;
}

pub trait Authorizer: Send + Sync {
    fn authorise(&self, resource: &dyn DavResource, method: &str, principal: Option<&Principal>)
        -> bool;
}

pub struct AllowAll;
impl Authorizer for AllowAll {
    fn authorise(&self, _: &dyn DavResource, _: &str, _: Option<&Principal>) -> bool {
        true
    }
}

pub struct AuthenticatedOnly;
impl Authorizer for AuthenticatedOnly {
    fn authorise(&self, _: &dyn DavResource, _: &str, principal: Option<&Principal>) -> bool {
        principal.is_some()
    }
}

/// Lock state of resources, keyed by their unique id.
///
/// Tokens are compared without their `opaquelocktoken:` scheme.
pub trait LockManager: Send + Sync {
    fn lock(
        &self,
        resource: &dyn DavResource,
        info: &LockInfo,
        depth: Depth,
        timeout: LockTimeout,
        root: &str,
    ) -> Result<ActiveLock, DavError>;

    /// `None` when the token does not match a live lock of the resource
    fn refresh(
        &self,
        resource: &dyn DavResource,
        token: &str,
        timeout: LockTimeout,
    ) -> Option<ActiveLock>;

    fn unlock(&self, resource: &dyn DavResource, token: &str) -> bool;

    fn current(&self, resource: &dyn DavResource) -> Vec<ActiveLock>;

    fn is_locked(&self, resource: &dyn DavResource) -> bool {
        !self.current(resource).is_empty()
    }

    /// A resource is locked out for a request that does not submit the
    /// token of any of its locks.
    fn is_locked_out(&self, req: &DavRequest, resource: &dyn DavResource) -> bool {
        let locks = self.current(resource);
        if locks.is_empty() {
            return false;
        }
        let submitted = req.if_tokens();
        !locks
            .iter()
            .any(|l| submitted.iter().any(|t| t == &l.token))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DavEvent {
    Move { from: String, to: String },
    Copy { from: String, to: String },
    NewFolder { path: String },
    PropPatch { path: String },
    Delete { path: String },
    Put { path: String },
}

pub trait EventSink: Send + Sync {
    fn fire(&self, event: DavEvent);
}

/// Default sink, events only end up in the logs
pub struct TracingEvents;
impl EventSink for TracingEvents {
    fn fire(&self, event: DavEvent) {
        tracing::debug!(event=?event, "dav event");
    }
}

/// Everything a method handler needs besides the request itself
#[derive(Clone)]
pub struct DavContext {
    pub factory: Arc<dyn ResourceFactory>,
    pub authorizer: Arc<dyn Authorizer>,
    pub locks: Arc<dyn LockManager>,
    pub events: Arc<dyn EventSink>,
    pub sources: PropertySources,
    pub settings: DavSettings,
}
impl DavContext {
    /// In-memory locks, logged events, standard then dead properties
    pub fn new(factory: Arc<dyn ResourceFactory>, settings: DavSettings) -> Self {
        let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::default());
        let sources = PropertySources::new(vec![
            Arc::new(StandardProperties::new(locks.clone())),
            Arc::new(DeadProperties),
        ]);
        Self {
            factory,
            authorizer: Arc::new(AuthenticatedOnly),
            locks,
            events: Arc::new(TracingEvents),
            sources,
            settings,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub async fn resource(&self, req: &DavRequest, path: &str) -> Result<Option<ArcResource>, DavError> {
        self.factory.resource(&req.host, path).await
    }

    /// 401 when nobody is logged in, 403 otherwise
    pub fn check_authorised(
        &self,
        req: &DavRequest,
        resource: &dyn DavResource,
    ) -> Result<(), DavError> {
        match self
            .authorizer
            .authorise(resource, &req.method, req.principal.as_ref())
        {
            true => Ok(()),
            false if req.principal.is_none() => Err(DavError::NotAuthorized),
            false => Err(DavError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_split() {
        assert_eq!(split_parent("/"), None);
        assert_eq!(
            split_parent("/a"),
            Some(("/".to_string(), "a".to_string()))
        );
        assert_eq!(
            split_parent("/a/b/c/"),
            Some(("/a/b/".to_string(), "c".to_string()))
        );
    }
}
