use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

use oriel_dav::decoder::parse_lockinfo;
use oriel_dav::encoder::LockDiscoveryBody;
use oriel_dav::types::{ActiveLock, Depth, LockInfo, LockScope, LockTimeout};
use oriel_dav::xml::Namespaces;

use super::codec::{self, HttpResponse};
use super::error::DavError;
use super::resource::{ArcResource, DavResource};
use super::services::{split_parent, DavContext, DavRequest, LockManager};

struct Held {
    lock: ActiveLock,
    expires: Option<DateTime<Utc>>,
}
impl Held {
    fn expiry(timeout: LockTimeout) -> Option<DateTime<Utc>> {
        timeout
            .seconds()
            .map(|s| Utc::now() + Duration::seconds(s as i64))
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e > now).unwrap_or(true)
    }
}

/// Locks kept in memory, lost on restart. Expired locks are purged lazily.
#[derive(Default)]
pub struct MemoryLockManager {
    held: Mutex<HashMap<String, Vec<Held>>>,
}

impl MemoryLockManager {
    fn with_live<T>(&self, id: &str, f: impl FnOnce(&mut Vec<Held>) -> T) -> T {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let entry = held.entry(id.to_string()).or_default();
        entry.retain(|h| h.is_live(now));
        let res = f(entry);
        if entry.is_empty() {
            held.remove(id);
        }
        res
    }
}

impl LockManager for MemoryLockManager {
    fn lock(
        &self,
        resource: &dyn DavResource,
        info: &LockInfo,
        depth: Depth,
        timeout: LockTimeout,
        root: &str,
    ) -> Result<ActiveLock, DavError> {
        self.with_live(&resource.unique_id(), |locks| {
            let conflict = locks.iter().any(|h| h.lock.scope == LockScope::Exclusive)
                || (info.scope == LockScope::Exclusive && !locks.is_empty());
            if conflict {
                return Err(DavError::Locked);
            }
            let lock = ActiveLock {
                scope: info.scope,
                kind: info.kind,
                depth,
                owner: info.owner.clone(),
                timeout,
                token: uuid::Uuid::new_v4().to_string(),
                root: root.to_string(),
            };
            locks.push(Held {
                lock: lock.clone(),
                expires: Held::expiry(timeout),
            });
            tracing::debug!(resource=%resource.unique_id(), token=%lock.token, "lock granted");
            Ok(lock)
        })
    }

    fn refresh(
        &self,
        resource: &dyn DavResource,
        token: &str,
        timeout: LockTimeout,
    ) -> Option<ActiveLock> {
        self.with_live(&resource.unique_id(), |locks| {
            let held = locks.iter_mut().find(|h| h.lock.token == token)?;
            held.lock.timeout = timeout;
            held.expires = Held::expiry(timeout);
            Some(held.lock.clone())
        })
    }

    fn unlock(&self, resource: &dyn DavResource, token: &str) -> bool {
        self.with_live(&resource.unique_id(), |locks| {
            let before = locks.len();
            locks.retain(|h| h.lock.token != token);
            before != locks.len()
        })
    }

    fn current(&self, resource: &dyn DavResource) -> Vec<ActiveLock> {
        self.with_live(&resource.unique_id(), |locks| {
            locks.iter().map(|h| h.lock.clone()).collect()
        })
    }
}

fn granted(status: StatusCode, lock: ActiveLock) -> Result<HttpResponse, DavError> {
    let builder = Response::builder()
        .status(status)
        .header("Lock-Token", format!("<{}>", lock.token_uri()));
    codec::serialize_with(builder, LockDiscoveryBody(vec![lock]), Namespaces::default())
}

/// LOCK, either a new lock described by a `lockinfo` body or, with an empty
/// body, the refresh of the lock named in the `If` header.
pub(crate) async fn lock(
    ctx: &DavContext,
    req: &DavRequest,
    target: Option<ArcResource>,
) -> Result<HttpResponse, DavError> {
    let timeout = LockTimeout::parse(req.header("Timeout"));
    let info = match parse_lockinfo(&req.body).await? {
        Some(info) => info,
        None => return refresh(ctx, req, target, timeout),
    };

    let depth = match codec::depth(&req.headers, Depth::Infinity) {
        Depth::One => return Err(DavError::BadRequest("Depth: 1 is not allowed for LOCK".into())),
        d => d,
    };

    let (resource, created) = match target {
        Some(r) => (r, false),
        None => (lock_null(ctx, req).await?, true),
    };
    ctx.check_authorised(req, resource.as_ref())?;
    if !resource.is_lockable() {
        return Err(DavError::MethodNotAllowed);
    }

    let lock = ctx
        .locks
        .lock(resource.as_ref(), &info, depth, timeout, &req.raw_path)?;
    tracing::info!(path=%req.path, token=%lock.token, "resource locked");

    match created {
        true => granted(StatusCode::CREATED, lock),
        false => granted(StatusCode::OK, lock),
    }
}

fn refresh(
    ctx: &DavContext,
    req: &DavRequest,
    target: Option<ArcResource>,
    timeout: LockTimeout,
) -> Result<HttpResponse, DavError> {
    let resource = target.ok_or(DavError::NotFound)?;
    let tokens = req.if_tokens();
    if tokens.is_empty() {
        return Err(DavError::BadRequest("a lock refresh needs an If header".into()));
    }
    let lock = tokens
        .iter()
        .find_map(|t| ctx.locks.refresh(resource.as_ref(), t, timeout))
        .ok_or(DavError::PreconditionFailed)?;
    granted(StatusCode::OK, lock)
}

/// Empty file created by a LOCK on an unmapped URL
async fn lock_null(ctx: &DavContext, req: &DavRequest) -> Result<ArcResource, DavError> {
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
    collection.put_child(&name, Bytes::new(), None).await
}

pub(crate) async fn unlock(
    ctx: &DavContext,
    req: &DavRequest,
    resource: ArcResource,
) -> Result<HttpResponse, DavError> {
    let token = req
        .header("Lock-Token")
        .and_then(codec::lock_token)
        .ok_or_else(|| DavError::BadRequest("missing Lock-Token header".into()))?;
    ctx.check_authorised(req, resource.as_ref())?;

    match ctx.locks.unlock(resource.as_ref(), &token) {
        true => {
            tracing::info!(path=%req.path, token=%token, "resource unlocked");
            codec::status(StatusCode::NO_CONTENT)
        }
        false => Err(DavError::Conflict("lock-token-matches-request-uri".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::memory::MemoryFs;
    use oriel_dav::types::LockType;

    fn info(scope: LockScope) -> LockInfo {
        LockInfo {
            scope,
            kind: LockType::Write,
            owner: Some("alice".into()),
        }
    }

    #[test]
    fn exclusive_and_shared() {
        let fs = MemoryFs::new(None);
        let file = fs.write_file("/f", "x", None).unwrap();
        let locks = MemoryLockManager::default();

        let shared = locks
            .lock(file.as_ref(), &info(LockScope::Shared), Depth::Zero, LockTimeout::Infinite, "/f")
            .unwrap();
        locks
            .lock(file.as_ref(), &info(LockScope::Shared), Depth::Zero, LockTimeout::Infinite, "/f")
            .unwrap();
        assert!(matches!(
            locks.lock(file.as_ref(), &info(LockScope::Exclusive), Depth::Zero, LockTimeout::Infinite, "/f"),
            Err(DavError::Locked)
        ));
        assert_eq!(locks.current(file.as_ref()).len(), 2);

        assert!(locks.unlock(file.as_ref(), &shared.token));
        assert!(!locks.unlock(file.as_ref(), &shared.token));
        assert_eq!(locks.current(file.as_ref()).len(), 1);
    }

    #[test]
    fn expired_locks_are_dropped() {
        let fs = MemoryFs::new(None);
        let file = fs.write_file("/f", "x", None).unwrap();
        let locks = MemoryLockManager::default();

        let lock = locks
            .lock(file.as_ref(), &info(LockScope::Exclusive), Depth::Zero, LockTimeout::Seconds(0), "/f")
            .unwrap();
        assert!(!locks.is_locked(file.as_ref()));
        assert!(locks.refresh(file.as_ref(), &lock.token, LockTimeout::Infinite).is_none());

        let lock = locks
            .lock(file.as_ref(), &info(LockScope::Exclusive), Depth::Zero, LockTimeout::Seconds(60), "/f")
            .unwrap();
        let refreshed = locks
            .refresh(file.as_ref(), &lock.token, LockTimeout::Seconds(120))
            .unwrap();
        assert_eq!(refreshed.timeout, LockTimeout::Seconds(120));
    }
}
