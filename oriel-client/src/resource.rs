use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use oriel_dav::types::{QName, ResponseEntry};
use oriel_dav::value::{parse_http_date, parse_iso_date};

use crate::error::{ClientError, Result};
use crate::file::File;
use crate::folder::Folder;
use crate::host::Host;
use crate::listener::ResourceListener;
use crate::path::Path;

/// What is known locally about a remote resource, independent of any host.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: Path,
    pub display_name: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub lock_token: Option<String>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Folder,
    File {
        content_type: Option<String>,
        content_length: Option<u64>,
        etag: Option<String>,
    },
}

impl Entry {
    pub(crate) fn folder(path: Path) -> Self {
        Self {
            display_name: path.name().map(str::to_string),
            path,
            modified: None,
            created: None,
            lock_owner: None,
            lock_token: None,
            kind: EntryKind::Folder,
        }
    }

    pub(crate) fn file(
        path: Path,
        content_type: Option<String>,
        content_length: Option<u64>,
        etag: Option<String>,
    ) -> Self {
        Self {
            kind: EntryKind::File {
                content_type,
                content_length,
                etag,
            },
            ..Self::folder(path)
        }
    }

    pub(crate) fn from_response(path: Path, resp: &ResponseEntry) -> Self {
        let text = |local: &str| resp.found_text(&QName::dav(local)).map(str::to_string);
        let is_folder = resp.is_collection() || text("iscollection").as_deref() == Some("1");
        let kind = match is_folder {
            true => EntryKind::Folder,
            false => EntryKind::File {
                content_type: text("getcontenttype"),
                content_length: text("getcontentlength").and_then(|v| v.parse().ok()),
                etag: text("getetag"),
            },
        };
        let lock = resp.lock();
        Self {
            display_name: text("displayname"),
            modified: text("getlastmodified").and_then(|v| parse_http_date(&v).ok()),
            created: text("creationdate").and_then(|v| parse_iso_date(&v).ok()),
            lock_owner: lock.and_then(|l| l.owner.clone()),
            lock_token: lock.and_then(|l| l.token.clone()),
            path,
            kind,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntryKind::Folder)
    }

    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }
}

/// A resource of a host: the operations shared by files and folders.
#[derive(Debug, Clone)]
pub struct Remote {
    pub(crate) host: Host,
    pub(crate) entry: Entry,
}

impl Remote {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn display_name(&self) -> Option<&str> {
        self.entry.display_name.as_deref()
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.entry.modified
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.entry.created
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.entry.lock_token.as_deref()
    }

    pub fn lock_owner(&self) -> Option<&str> {
        self.entry.lock_owner.as_deref()
    }

    /// Folders end with a slash
    pub fn encoded_url(&self) -> String {
        let mut url = self.host.build_encoded_url(&self.entry.path);
        if self.entry.is_folder() && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    pub fn add_listener(&self, listener: Arc<dyn ResourceListener>) {
        self.host.add_resource_listener(self.path(), listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ResourceListener>) {
        self.host.remove_resource_listener(self.path(), listener);
    }

    fn as_resource(&self) -> Resource {
        Resource::from_entry(self.host.clone(), self.entry.clone())
    }

    fn flush_parent(&self) {
        if let Some(parent) = self.path().parent() {
            self.host.cache().remove(&parent);
        }
    }

    pub async fn delete(&self) -> Result<()> {
        self.host.do_delete(self.encoded_url().as_str()).await?;
        tracing::info!(path=%self.path(), "deleted");

        let me = self.as_resource();
        if let Some(parent) = self.path().parent() {
            self.host.notify_child_removed(&parent, &me);
        }
        if self.entry.is_folder() {
            self.host.cache().remove(self.path());
        }
        self.host.notify_deleted(&me);
        Ok(())
    }

    /// Copy into `folder`, under `dest_name` or the current name
    pub async fn copy_to(&self, folder: &Folder, dest_name: Option<&str>) -> Result<()> {
        let name = dest_name.unwrap_or(self.name());
        let dest = format!("{}{}", folder.encoded_url(), urlencoding::encode(name));
        self.host
            .do_copy(self.encoded_url().as_str(), dest.as_str())
            .await?;
        folder.flush();
        Ok(())
    }

    pub async fn move_to(&mut self, folder: &Folder, dest_name: Option<&str>) -> Result<()> {
        let name = dest_name.unwrap_or(self.name()).to_string();
        let dest = format!("{}{}", folder.encoded_url(), urlencoding::encode(&name));
        tracing::info!(from=%self.path(), to=%folder.path(), "move");
        self.host
            .do_move(self.encoded_url().as_str(), dest.as_str())
            .await?;

        self.flush_parent();
        folder.flush();
        if self.entry.is_folder() {
            self.host.cache().remove(self.path());
        }
        self.entry.path = folder.path().child(&name);
        Ok(())
    }

    /// Rename in place, the root can not be renamed
    pub async fn rename(&mut self, new_name: &str) -> Result<()> {
        let parent = self
            .path()
            .parent()
            .ok_or_else(|| ClientError::MethodNotAllowed(self.encoded_url()))?;
        let dest = self.host.build_encoded_url(&parent.child(new_name));
        self.host
            .do_move(self.encoded_url().as_str(), dest.as_str())
            .await?;

        self.host.cache().remove(&parent);
        if self.entry.is_folder() {
            self.host.cache().remove(self.path());
        }
        // displayname is a property of its own, the URL name does not drive it
        self.entry.path = parent.child(new_name);
        Ok(())
    }

    /// Lock for writing, `None` asks for no expiry
    pub async fn lock(&mut self, timeout: Option<u64>) -> Result<()> {
        if let Some(token) = &self.entry.lock_token {
            tracing::warn!(path=%self.path(), token=%token, "already locked");
        }
        let token = self
            .host
            .do_lock(self.encoded_url().as_str(), timeout)
            .await?;
        self.entry.lock_token = Some(token);
        self.entry.lock_owner = self.host.config().user.clone();
        Ok(())
    }

    /// Release the lock held by this client, there must be one
    pub async fn unlock(&mut self) -> Result<u16> {
        let token = self
            .entry
            .lock_token
            .clone()
            .ok_or_else(|| ClientError::NotLocked(self.path().to_string()))?;
        let status = self
            .host
            .do_unlock(self.encoded_url().as_str(), &token)
            .await?;
        self.entry.lock_token = None;
        self.entry.lock_owner = None;
        Ok(status)
    }
}

/// A file or a folder
#[derive(Debug, Clone)]
pub enum Resource {
    File(File),
    Folder(Folder),
}

impl Resource {
    pub(crate) fn from_entry(host: Host, entry: Entry) -> Self {
        let remote = Remote { host, entry };
        match remote.entry.kind {
            EntryKind::Folder => Self::Folder(Folder(remote)),
            EntryKind::File { .. } => Self::File(File(remote)),
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Self::Folder(f) => Some(f),
            Self::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Self::File(f) => Some(f),
            Self::Folder(_) => None,
        }
    }
}

impl Deref for Resource {
    type Target = Remote;
    fn deref(&self) -> &Remote {
        match self {
            Self::File(f) => &f.0,
            Self::Folder(f) => &f.0,
        }
    }
}

impl DerefMut for Resource {
    fn deref_mut(&mut self) -> &mut Remote {
        match self {
            Self::File(f) => &mut f.0,
            Self::Folder(f) => &mut f.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use oriel_dav::decoder::parse_multistatus;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{file, host, Recorder};

    const LOCKED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:prop xmlns:d="DAV:"><d:lockdiscovery><d:activelock>
<d:locktype><d:write/></d:locktype><d:lockscope><d:exclusive/></d:lockscope>
<d:depth>0</d:depth><d:owner>alice</d:owner><d:timeout>Infinite</d:timeout>
<d:locktoken><d:href>opaquelocktoken:abcd</d:href></d:locktoken>
</d:activelock></d:lockdiscovery></d:prop>"#;

    #[tokio::test]
    async fn entry_from_response() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/a.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:displayname>Report</d:displayname>
        <d:getcontenttype>text/plain</d:getcontenttype>
        <d:getcontentlength>42</d:getcontentlength>
        <d:getetag>"x1"</d:getetag>
        <d:getlastmodified>Mon, 12 Jan 1998 09:25:56 GMT</d:getlastmodified>
        <d:creationdate>1997-12-01T17:42:21-08:00</d:creationdate>
        <d:lockdiscovery><d:activelock>
          <d:owner>bob</d:owner>
          <d:locktoken><d:href>opaquelocktoken:1</d:href></d:locktoken>
        </d:activelock></d:lockdiscovery>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/b</d:href>
    <d:propstat>
      <d:prop><d:iscollection>1</d:iscollection></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;
        let responses = parse_multistatus(body.as_bytes()).await.unwrap().responses;

        let entry = Entry::from_response(Path::parse("/a.txt"), &responses[0]);
        assert_eq!(entry.display_name.as_deref(), Some("Report"));
        assert_eq!(entry.modified.map(|d| d.timestamp()), Some(884597156));
        assert!(entry.created.is_some());
        assert_eq!(entry.lock_owner.as_deref(), Some("bob"));
        assert_eq!(entry.lock_token.as_deref(), Some("opaquelocktoken:1"));
        assert_eq!(
            entry.kind,
            EntryKind::File {
                content_type: Some("text/plain".into()),
                content_length: Some(42),
                etag: Some("\"x1\"".into()),
            }
        );

        let entry = Entry::from_response(Path::parse("/b"), &responses[1]);
        assert!(entry.is_folder());
        assert_eq!(entry.name(), "b");
    }

    #[tokio::test]
    async fn unlock_needs_a_token() {
        let server = MockServer::start().await;
        let mut f = file(&host(&server), "/f.txt", None);
        assert!(matches!(f.unlock().await, Err(ClientError::NotLocked(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_then_unlock() {
        let server = MockServer::start().await;
        Mock::given(method("LOCK"))
            .and(path("/dav/f.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOCKED))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("UNLOCK"))
            .and(path("/dav/f.txt"))
            .and(header("Lock-Token", "<opaquelocktoken:abcd>"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut f = file(&host(&server), "/f.txt", None);
        f.lock(None).await.unwrap();
        assert_eq!(f.lock_token(), Some("opaquelocktoken:abcd"));
        assert_eq!(f.lock_owner(), Some("alice"));
        assert_eq!(f.unlock().await.unwrap(), 204);
        assert_eq!(f.lock_token(), None);
        assert_eq!(f.lock_owner(), None);
    }

    #[tokio::test]
    async fn move_flushes_both_parents() {
        let server = MockServer::start().await;
        Mock::given(method("MOVE"))
            .and(path("/dav/a/f.txt"))
            .and(header(
                "Destination",
                format!("{}/dav/b/g%20h.txt", server.uri()).as_str(),
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let host = host(&server);
        host.cache().put(Path::parse("/a"), vec![]);
        host.cache().put(Path::parse("/b"), vec![]);
        let dest = Folder::new(host.clone(), Path::parse("/b"));
        let mut f = file(&host, "/a/f.txt", None);
        f.move_to(&dest, Some("g h.txt")).await.unwrap();

        assert_eq!(f.path(), &Path::parse("/b/g h.txt"));
        assert!(host.cache().get(&Path::parse("/a")).is_none());
        assert!(host.cache().get(&Path::parse("/b")).is_none());
    }

    #[tokio::test]
    async fn rename_root_is_refused() {
        let server = MockServer::start().await;
        let mut root = host(&server).root();
        assert!(matches!(
            root.rename("other").await,
            Err(ClientError::MethodNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn rename_keeps_the_display_name() {
        let server = MockServer::start().await;
        Mock::given(method("MOVE"))
            .and(path("/dav/a/f.txt"))
            .and(header(
                "Destination",
                format!("{}/dav/a/g.txt", server.uri()).as_str(),
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let host = host(&server);
        host.cache().put(Path::parse("/a"), vec![]);
        let mut f = file(&host, "/a/f.txt", None);
        f.entry.display_name = Some("Quarterly report".into());
        f.rename("g.txt").await.unwrap();

        assert_eq!(f.path(), &Path::parse("/a/g.txt"));
        assert_eq!(f.name(), "g.txt");
        assert_eq!(f.display_name(), Some("Quarterly report"));
        assert!(host.cache().get(&Path::parse("/a")).is_none());
    }

    #[derive(Default)]
    struct Deleted(AtomicUsize);
    impl ResourceListener for Deleted {
        fn on_deleted(&self, _resource: &Resource) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn delete_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/dav/a/f.txt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let host = host(&server);
        let recorder = Arc::new(Recorder::default());
        host.add_folder_listener(&Path::parse("/a"), recorder.clone());
        let deleted = Arc::new(Deleted::default());
        let f = file(&host, "/a/f.txt", None);
        f.add_listener(deleted.clone());

        f.delete().await.unwrap();
        assert_eq!(recorder.events(), vec!["removed f.txt from /a"]);
        assert_eq!(deleted.0.load(Ordering::SeqCst), 1);
    }
}
