//! A resource tree held in memory, served by the daemon and used by tests.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::body::Bytes;

use oriel_dav::types::{PropFindResponse, QName};

use super::error::DavError;
use super::resource::*;
use super::services::{segments, ResourceFactory};

const ROOT: u64 = 0;

#[derive(Debug, Clone)]
enum Kind {
    Folder(Vec<u64>),
    File {
        content: Bytes,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<u64>,
    kind: Kind,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    version: u64,
    display_name: Option<String>,
    dead: BTreeMap<QName, String>,
}
impl Node {
    fn new(name: &str, parent: Option<u64>, kind: Kind) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            parent,
            kind,
            created: now,
            modified: now,
            version: 1,
            display_name: None,
            dead: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.modified = Utc::now();
    }
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    quota: Option<u64>,
}
impl Tree {
    fn children(&self, id: u64) -> Option<&Vec<u64>> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(Kind::Folder(children)) => Some(children),
            _ => None,
        }
    }

    fn child_id(&self, parent: u64, name: &str) -> Option<u64> {
        self.children(parent)?
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).map(|n| n.name == name).unwrap_or(false))
    }

    fn resolve(&self, path: &str) -> Option<u64> {
        segments(path)
            .into_iter()
            .try_fold(ROOT, |id, name| self.child_id(id, name))
    }

    fn used(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| match &n.kind {
                Kind::File { content, .. } => content.len() as u64,
                Kind::Folder(_) => 0,
            })
            .sum()
    }

    fn check_quota(&self, added: u64) -> Result<(), DavError> {
        match self.quota {
            Some(q) if self.used() + added > q => Err(DavError::InsufficientStorage),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, parent: u64, name: &str, kind: Kind) -> Result<u64, DavError> {
        let id = self.next_id;
        match self.nodes.get_mut(&parent).map(|n| &mut n.kind) {
            Some(Kind::Folder(children)) => children.push(id),
            _ => return Err(DavError::Conflict("parent is not a collection".into())),
        }
        self.next_id += 1;
        self.nodes.insert(id, Node::new(name, Some(parent), kind));
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.touch();
        }
        Ok(id)
    }

    fn detach(&mut self, id: u64) {
        let parent = match self.nodes.get(&id).and_then(|n| n.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            if let Kind::Folder(children) = &mut p.kind {
                children.retain(|c| *c != id);
            }
            p.touch();
        }
    }

    fn remove_subtree(&mut self, id: u64) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                if let Kind::Folder(children) = node.kind {
                    stack.extend(children);
                }
            }
        }
    }

    fn size_of(&self, id: u64) -> u64 {
        let mut total = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.nodes.get(&current).map(|n| &n.kind) {
                Some(Kind::File { content, .. }) => total += content.len() as u64,
                Some(Kind::Folder(children)) => stack.extend(children.iter().copied()),
                None => (),
            }
        }
        total
    }

    fn copy_subtree(&mut self, id: u64, dest: u64, name: &str) -> Result<u64, DavError> {
        let source = self.nodes.get(&id).cloned().ok_or(DavError::NotFound)?;
        let kind = match &source.kind {
            Kind::Folder(_) => Kind::Folder(vec![]),
            file => file.clone(),
        };
        let copy = self.insert(dest, name, kind)?;
        if let Some(node) = self.nodes.get_mut(&copy) {
            node.dead = source.dead.clone();
            node.display_name = source.display_name.clone();
        }
        if let Kind::Folder(children) = source.kind {
            for child in children {
                let child_name = match self.nodes.get(&child) {
                    Some(n) => n.name.clone(),
                    None => continue,
                };
                self.copy_subtree(child, copy, &child_name)?;
            }
        }
        Ok(copy)
    }

    /// `ancestor` is `id` itself or one of its parents
    fn is_within(&self, id: u64, ancestor: u64) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }
}

/// Handle on the whole tree, cheap to clone
#[derive(Clone)]
pub struct MemoryFs {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFs {
    pub fn new(quota: Option<u64>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::new("", None, Kind::Folder(vec![])));
        Self {
            tree: Arc::new(Mutex::new(Tree {
                nodes,
                next_id: ROOT + 1,
                quota,
            })),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resource(&self, id: u64) -> ArcResource {
        Arc::new(MemoryResource {
            fs: self.clone(),
            id,
        })
    }

    pub fn root(&self) -> ArcResource {
        self.resource(ROOT)
    }

    pub fn lookup(&self, path: &str) -> Option<ArcResource> {
        let id = self.tree().resolve(path)?;
        Some(self.resource(id))
    }

    /// Create every missing folder along the path
    pub fn mkdir_all(&self, path: &str) -> Result<ArcResource, DavError> {
        let mut tree = self.tree();
        let mut current = ROOT;
        for name in segments(path) {
            current = match tree.child_id(current, name) {
                Some(id) => id,
                None => tree.insert(current, name, Kind::Folder(vec![]))?,
            };
        }
        drop(tree);
        Ok(self.resource(current))
    }

    /// Create or replace a file, creating its parent folders
    pub fn write_file(
        &self,
        path: &str,
        content: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Result<ArcResource, DavError> {
        let mut parts = segments(path);
        let name = parts
            .pop()
            .ok_or_else(|| DavError::Conflict("the root is not a file".into()))?
            .to_string();
        let parent = self.mkdir_all(&parts.join("/"))?;
        let parent = downcast(&parent)?;
        parent.write_child(&name, content.into(), content_type.map(str::to_string))
    }

    pub fn used_bytes(&self) -> u64 {
        self.tree().used()
    }
}

#[async_trait]
impl ResourceFactory for MemoryFs {
    async fn resource(&self, _host: &str, path: &str) -> Result<Option<ArcResource>, DavError> {
        Ok(self.lookup(path))
    }
}

fn downcast(resource: &ArcResource) -> Result<&MemoryResource, DavError> {
    resource
        .as_any()
        .downcast_ref::<MemoryResource>()
        .ok_or_else(|| DavError::Conflict("destination belongs to another store".into()))
}

/// A node of a [`MemoryFs`], identified by its id.
///
/// Once its node is deleted, a resource answers with empty metadata.
pub struct MemoryResource {
    fs: MemoryFs,
    id: u64,
}

impl MemoryResource {
    fn read<T>(&self, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.fs.tree().nodes.get(&self.id).map(f)
    }

    fn is_folder(&self) -> bool {
        self.read(|n| matches!(n.kind, Kind::Folder(_)))
            .unwrap_or(false)
    }

    fn is_file(&self) -> bool {
        self.read(|n| matches!(n.kind, Kind::File { .. }))
            .unwrap_or(false)
    }

    fn write_child(
        &self,
        name: &str,
        content: Bytes,
        content_type: Option<String>,
    ) -> Result<ArcResource, DavError> {
        let mut tree = self.fs.tree();
        let existing = tree.child_id(self.id, name);
        let previous = existing.map(|id| tree.size_of(id)).unwrap_or(0);
        tree.check_quota((content.len() as u64).saturating_sub(previous))?;

        let id = match existing {
            Some(id) => {
                let node = tree.nodes.get_mut(&id).ok_or(DavError::NotFound)?;
                if let Kind::Folder(_) = node.kind {
                    return Err(DavError::MethodNotAllowed);
                }
                node.kind = Kind::File {
                    content,
                    content_type,
                };
                node.touch();
                id
            }
            None => tree.insert(
                self.id,
                name,
                Kind::File {
                    content,
                    content_type,
                },
            )?,
        };
        drop(tree);
        Ok(self.fs.resource(id))
    }
}

impl DavResource for MemoryResource {
    fn name(&self) -> String {
        self.read(|n| n.name.clone()).unwrap_or_default()
    }

    fn unique_id(&self) -> String {
        format!("mem-{:x}", self.id)
    }

    fn etag(&self) -> Option<String> {
        self.read(|n| format!("\"{:x}-{:x}\"", self.id, n.version))
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.read(|n| n.modified)
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.read(|n| n.created)
    }

    fn display_name(&self) -> String {
        self.read(|n| n.display_name.clone().unwrap_or_else(|| n.name.clone()))
            .unwrap_or_default()
    }

    fn content_type(&self) -> Option<String> {
        self.read(|n| match &n.kind {
            Kind::File { content_type, .. } => content_type.clone(),
            Kind::Folder(_) => None,
        })
        .flatten()
    }

    fn content_length(&self) -> Option<u64> {
        self.read(|n| match &n.kind {
            Kind::File { content, .. } => Some(content.len() as u64),
            Kind::Folder(_) => None,
        })
        .flatten()
    }

    fn quota(&self) -> Option<Quota> {
        let tree = self.fs.tree();
        let total = tree.quota?;
        let used = tree.used();
        Some(Quota {
            used,
            available: total.saturating_sub(used),
        })
    }

    fn is_lockable(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_collection(&self) -> Option<&dyn Collection> {
        match self.is_folder() {
            true => Some(self),
            false => None,
        }
    }

    fn as_deletable(&self) -> Option<&dyn Deletable> {
        match self.id {
            ROOT => None,
            _ => Some(self),
        }
    }

    fn as_copyable(&self) -> Option<&dyn Copyable> {
        match self.id {
            ROOT => None,
            _ => Some(self),
        }
    }

    fn as_movable(&self) -> Option<&dyn Movable> {
        match self.id {
            ROOT => None,
            _ => Some(self),
        }
    }

    fn as_commitable(&self) -> Option<&dyn Commitable> {
        Some(self)
    }

    fn as_content(&self) -> Option<&dyn Content> {
        match self.is_file() {
            true => Some(self),
            false => None,
        }
    }

    fn as_dead_properties(&self) -> Option<&dyn DeadPropertyStore> {
        Some(self)
    }

    fn as_display_name_store(&self) -> Option<&dyn DisplayNameStore> {
        Some(self)
    }
}

#[async_trait]
impl Collection for MemoryResource {
    async fn children(&self) -> Result<Vec<ArcResource>, DavError> {
        let ids = self
            .fs
            .tree()
            .children(self.id)
            .cloned()
            .ok_or(DavError::NotFound)?;
        Ok(ids.into_iter().map(|id| self.fs.resource(id)).collect())
    }

    async fn child(&self, name: &str) -> Result<Option<ArcResource>, DavError> {
        let id = self.fs.tree().child_id(self.id, name);
        Ok(id.map(|id| self.fs.resource(id)))
    }

    async fn create_collection(&self, name: &str) -> Result<Option<ArcResource>, DavError> {
        let mut tree = self.fs.tree();
        if name.is_empty() || tree.child_id(self.id, name).is_some() {
            return Ok(None);
        }
        let id = tree.insert(self.id, name, Kind::Folder(vec![]))?;
        drop(tree);
        Ok(Some(self.fs.resource(id)))
    }

    async fn put_child(
        &self,
        name: &str,
        content: Bytes,
        content_type: Option<String>,
    ) -> Result<ArcResource, DavError> {
        self.write_child(name, content, content_type)
    }
}

#[async_trait]
impl Deletable for MemoryResource {
    async fn delete(&self) -> Result<(), DavError> {
        let mut tree = self.fs.tree();
        if !tree.nodes.contains_key(&self.id) {
            return Err(DavError::NotFound);
        }
        tree.remove_subtree(self.id);
        Ok(())
    }
}

#[async_trait]
impl Copyable for MemoryResource {
    async fn copy_to(&self, dest: &ArcResource, name: &str) -> Result<(), DavError> {
        let dest = downcast(dest)?;
        let mut tree = self.fs.tree();
        if tree.is_within(dest.id, self.id) {
            return Err(DavError::Forbidden);
        }
        if tree.child_id(dest.id, name).is_some() {
            return Err(DavError::PreconditionFailed);
        }
        tree.check_quota(tree.size_of(self.id))?;
        tree.copy_subtree(self.id, dest.id, name)?;
        Ok(())
    }
}

#[async_trait]
impl Movable for MemoryResource {
    async fn move_to(&self, dest: &ArcResource, name: &str) -> Result<(), DavError> {
        let dest = downcast(dest)?;
        let mut tree = self.fs.tree();
        if tree.is_within(dest.id, self.id) {
            return Err(DavError::Forbidden);
        }
        if tree.child_id(dest.id, name).is_some() {
            return Err(DavError::PreconditionFailed);
        }
        match tree.nodes.get_mut(&dest.id).map(|n| &mut n.kind) {
            Some(Kind::Folder(children)) => children.push(self.id),
            _ => return Err(DavError::Conflict("destination is not a collection".into())),
        }
        // the node is still listed in its old parent at this point
        let old_parent = tree.nodes.get(&self.id).and_then(|n| n.parent);
        if let Some(p) = old_parent.and_then(|p| tree.nodes.get_mut(&p)) {
            if let Kind::Folder(children) = &mut p.kind {
                if let Some(pos) = children.iter().position(|c| *c == self.id) {
                    children.remove(pos);
                }
            }
            p.touch();
        }
        let node = tree.nodes.get_mut(&self.id).ok_or(DavError::NotFound)?;
        node.parent = Some(dest.id);
        node.name = name.to_string();
        node.touch();
        Ok(())
    }
}

#[async_trait]
impl Commitable for MemoryResource {
    async fn commit(&self, outcome: &PropFindResponse) -> Result<(), DavError> {
        if outcome.known.is_empty() {
            return Ok(());
        }
        let mut tree = self.fs.tree();
        if let Some(node) = tree.nodes.get_mut(&self.id) {
            node.touch();
        }
        Ok(())
    }
}

#[async_trait]
impl Content for MemoryResource {
    async fn content(&self) -> Result<Bytes, DavError> {
        self.read(|n| match &n.kind {
            Kind::File { content, .. } => Some(content.clone()),
            Kind::Folder(_) => None,
        })
        .flatten()
        .ok_or(DavError::NotFound)
    }

    async fn replace(&self, content: Bytes, content_type: Option<String>) -> Result<(), DavError> {
        let mut tree = self.fs.tree();
        let previous = tree.size_of(self.id);
        tree.check_quota((content.len() as u64).saturating_sub(previous))?;
        let node = tree.nodes.get_mut(&self.id).ok_or(DavError::NotFound)?;
        let kept_type = match &node.kind {
            Kind::File { content_type, .. } => content_type.clone(),
            Kind::Folder(_) => return Err(DavError::MethodNotAllowed),
        };
        node.kind = Kind::File {
            content,
            content_type: content_type.or(kept_type),
        };
        node.touch();
        Ok(())
    }
}

impl DeadPropertyStore for MemoryResource {
    fn dead_property(&self, name: &QName) -> Option<String> {
        self.read(|n| n.dead.get(name).cloned()).flatten()
    }

    fn set_dead_property(&self, name: &QName, value: String) {
        if let Some(node) = self.fs.tree().nodes.get_mut(&self.id) {
            node.dead.insert(name.clone(), value);
        }
    }

    fn remove_dead_property(&self, name: &QName) {
        if let Some(node) = self.fs.tree().nodes.get_mut(&self.id) {
            node.dead.remove(name);
        }
    }

    fn dead_property_names(&self) -> Vec<QName> {
        self.read(|n| n.dead.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl DisplayNameStore for MemoryResource {
    fn set_display_name(&self, name: &str) -> Result<(), DavError> {
        let mut tree = self.fs.tree();
        let node = tree.nodes.get_mut(&self.id).ok_or(DavError::NotFound)?;
        node.display_name = match name.is_empty() {
            true => None,
            false => Some(name.to_string()),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tree_operations() {
        let fs = MemoryFs::new(None);
        fs.write_file("/a/b.txt", "hello", Some("text/plain")).unwrap();
        let c = fs.mkdir_all("/c").unwrap();

        let b = fs.lookup("/a/b.txt").unwrap();
        assert_eq!(b.content_length(), Some(5));
        assert!(fs.lookup("/a/").unwrap().is_collection());

        b.as_copyable().unwrap().copy_to(&c, "copy.txt").await.unwrap();
        let copy = fs.lookup("/c/copy.txt").unwrap();
        assert_eq!(copy.as_content().unwrap().content().await.unwrap(), "hello");
        assert_eq!(fs.used_bytes(), 10);

        b.as_movable().unwrap().move_to(&c, "moved.txt").await.unwrap();
        assert!(fs.lookup("/a/b.txt").is_none());
        assert_eq!(fs.lookup("/c/moved.txt").unwrap().unique_id(), b.unique_id());

        let a = fs.lookup("/a").unwrap();
        let names: Vec<_> = c
            .as_collection()
            .unwrap()
            .children()
            .await
            .unwrap()
            .iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(names, vec!["copy.txt", "moved.txt"]);

        a.as_deletable().unwrap().delete().await.unwrap();
        assert!(fs.lookup("/a").is_none());
        assert_eq!(a.name(), "");
    }

    #[tokio::test]
    async fn refuses_moving_into_itself() {
        let fs = MemoryFs::new(None);
        let a = fs.mkdir_all("/a").unwrap();
        let inner = fs.mkdir_all("/a/inner").unwrap();
        assert!(matches!(
            a.as_movable().unwrap().move_to(&inner, "a").await,
            Err(DavError::Forbidden)
        ));
        assert!(fs.root().as_movable().is_none());
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let fs = MemoryFs::new(Some(8));
        fs.write_file("/one", "12345", None).unwrap();
        assert!(matches!(
            fs.write_file("/two", "12345", None),
            Err(DavError::InsufficientStorage)
        ));
        // replacing counts the difference only
        fs.write_file("/one", "12345678", None).unwrap();
        assert_eq!(
            fs.root().quota(),
            Some(Quota {
                used: 8,
                available: 0
            })
        );
    }

    #[test]
    fn etag_changes_with_content() {
        let fs = MemoryFs::new(None);
        let file = fs.write_file("/f", "v1", None).unwrap();
        let before = file.etag();
        fs.write_file("/f", "v2", None).unwrap();
        assert_ne!(before, file.etag());
    }
}
