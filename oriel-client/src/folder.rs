use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};

use oriel_dav::types::Depth;

use crate::error::{ClientError, Result};
use crate::file::File;
use crate::host::Host;
use crate::listener::{FolderListener, ProgressListener};
use crate::path::Path;
use crate::resource::{Entry, Remote, Resource};
use crate::transfer::IfMatchCheck;

/// A remote collection. Its listing is fetched lazily and cached by the host.
#[derive(Debug, Clone)]
pub struct Folder(pub(crate) Remote);

impl Deref for Folder {
    type Target = Remote;
    fn deref(&self) -> &Remote {
        &self.0
    }
}

impl DerefMut for Folder {
    fn deref_mut(&mut self) -> &mut Remote {
        &mut self.0
    }
}

fn is_hidden(local: &std::path::Path) -> bool {
    local
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}

impl Folder {
    pub(crate) fn new(host: Host, path: Path) -> Self {
        Self(Remote {
            host,
            entry: Entry::folder(path),
        })
    }

    /// Cached listing, or a depth 1 PROPFIND when there is none. The
    /// response describing the folder itself is left out.
    pub async fn children(&self) -> Result<Vec<Resource>> {
        if let Some(entries) = self.host.cache().get(self.path()) {
            return Ok(self.resources(entries));
        }

        tracing::trace!(path=%self.path(), "loading children");
        let responses = self
            .host
            .propfind(self.encoded_url().as_str(), Depth::One, None)
            .await?;

        let mut entries = Vec::with_capacity(responses.len());
        for resp in responses.iter() {
            let path = match self.host.path_of_href(&resp.href) {
                Some(p) => p,
                None => {
                    tracing::warn!(href=%resp.href, "response outside of the host root, skipped");
                    continue;
                }
            };
            if &path == self.path() {
                continue;
            }
            let entry = Entry::from_response(path, resp);
            self.host.notify_child_added(
                self.path(),
                &Resource::from_entry(self.host.clone(), entry.clone()),
            );
            entries.push(entry);
        }
        self.host.cache().put(self.path().clone(), entries.clone());
        Ok(self.resources(entries))
    }

    fn resources(&self, entries: Vec<Entry>) -> Vec<Resource> {
        entries
            .into_iter()
            .map(|e| Resource::from_entry(self.host.clone(), e))
            .collect()
    }

    pub async fn child(&self, name: &str) -> Result<Option<Resource>> {
        Ok(self
            .children()
            .await?
            .into_iter()
            .find(|r| r.name() == name))
    }

    /// Drop the cached listing, the next `children` call fetches it again
    pub fn flush(&self) -> bool {
        self.host.cache().remove(self.path())
    }

    /// Register a listener, the current children are reported to it first
    pub async fn add_listener(&self, listener: Arc<dyn FolderListener>) -> Result<()> {
        for child in self.children().await? {
            listener.on_child_added(self.path(), &child);
        }
        self.host.add_folder_listener(self.path(), listener);
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FolderListener>) {
        self.host.remove_folder_listener(self.path(), listener);
    }

    /// PUT a new child. The returned file is a local placeholder carrying
    /// the etag of the response, the listing is fetched again on next use.
    pub async fn upload(
        &self,
        name: &str,
        content: Bytes,
        check: Option<&IfMatchCheck>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<File> {
        let url = format!("{}{}", self.encoded_url(), urlencoding::encode(name));
        let content_type = mime_guess::from_path(name).first().map(|m| m.to_string());
        let length = content.len() as u64;
        tracing::trace!(url=%url, length, "upload");

        let result = self
            .host
            .do_put(url.as_str(), content, content_type.as_deref(), check, listener)
            .await?;

        let file = File(Remote {
            host: self.host.clone(),
            entry: Entry::file(
                self.path().child(name),
                content_type,
                Some(length),
                result.etag,
            ),
        });
        self.flush();
        self.host
            .notify_child_added(self.path(), &Resource::File(file.clone()));
        Ok(file)
    }

    pub async fn upload_file(
        &self,
        local: &std::path::Path,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<File> {
        let name = local.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no usable file name", local.display()),
            )
        })?;
        let content = tokio::fs::read(local).await?;
        self.upload(name, Bytes::from(content), None, listener).await
    }

    /// Recreate a local directory below this folder. Dot entries are
    /// skipped, a skipped directory gives `None`.
    pub fn upload_folder<'a>(
        &'a self,
        local: &'a std::path::Path,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> BoxFuture<'a, Result<Option<Folder>>> {
        async move {
            if is_hidden(local) {
                tracing::debug!(path=%local.display(), "hidden directory skipped");
                return Ok(None);
            }
            let name = local.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let created = self.create_folder(name).await?;

            let mut dir = tokio::fs::read_dir(local).await?;
            while let Some(item) = dir.next_entry().await? {
                let item_path = item.path();
                if item.file_type().await?.is_dir() {
                    created.upload_folder(&item_path, listener.clone()).await?;
                } else if !is_hidden(&item_path) {
                    created.upload_file(&item_path, listener.clone()).await?;
                }
            }
            Ok(Some(created))
        }
        .boxed()
    }

    /// MKCOL a child. When the server refuses because the name is taken by
    /// a folder, that folder is returned instead.
    pub async fn create_folder(&self, name: &str) -> Result<Folder> {
        let url = format!("{}{}", self.encoded_url(), urlencoding::encode(name));
        match self.host.do_mkcol(url.as_str()).await {
            Ok(_) => {
                self.flush();
                let folder = match self.child(name).await? {
                    Some(Resource::Folder(f)) => f,
                    _ => Folder::new(self.host.clone(), self.path().child(name)),
                };
                self.host
                    .notify_child_added(self.path(), &Resource::Folder(folder.clone()));
                Ok(folder)
            }
            Err(ClientError::Conflict(_)) | Err(ClientError::MethodNotAllowed(_)) => {
                self.flush();
                match self.child(name).await? {
                    Some(Resource::Folder(f)) => Ok(f),
                    Some(Resource::File(_)) => {
                        tracing::error!(url=%url, "a file exists with the name of the new folder");
                        Err(ClientError::MethodNotAllowed(url))
                    }
                    None => {
                        tracing::error!(url=%url, "remote collection could not be created");
                        Err(ClientError::MethodNotAllowed(url))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{host, multistatus, Recorder};

    #[tokio::test]
    async fn children_are_cached_until_flushed() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/docs/"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&[
                "/dav/docs/",
                "/dav/docs/a%20b.txt",
                "/dav/docs/sub/",
            ])))
            .expect(2)
            .mount(&server)
            .await;

        let folder = Folder::new(host(&server), Path::parse("/docs"));
        let children = folder.children().await.unwrap();
        let names = children.iter().map(|c| c.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a b.txt", "sub"]);
        assert!(children[0].as_file().is_some());
        assert!(children[1].as_folder().is_some());

        assert_eq!(folder.children().await.unwrap().len(), 2);
        assert!(folder.flush());
        assert!(!folder.flush());
        assert_eq!(folder.children().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listeners_see_existing_children_first() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/docs/"))
            .respond_with(
                ResponseTemplate::new(207).set_body_string(multistatus(&["/dav/docs/", "/dav/docs/a.txt"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/dav/docs/b.txt"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let folder = Folder::new(host(&server), Path::parse("/docs"));
        let recorder = Arc::new(Recorder::default());
        folder.add_listener(recorder.clone()).await.unwrap();
        folder
            .upload("b.txt", Bytes::from_static(b"abc"), None, None)
            .await
            .unwrap();

        let listener: Arc<dyn FolderListener> = recorder.clone();
        folder.remove_listener(&listener);
        folder
            .upload("b.txt", Bytes::from_static(b"abc"), None, None)
            .await
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec!["added a.txt in /docs", "added b.txt in /docs"]
        );
    }

    #[tokio::test]
    async fn upload_preconditions() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).insert_header("ETag", "\"v2\""))
            .expect(3)
            .mount(&server)
            .await;

        let folder = Folder::new(host(&server), Path::parse("/docs"));
        let replace = IfMatchCheck::new(Some("\"v1\"".into()));
        let create = IfMatchCheck::new(None);
        let file = folder
            .upload("a.txt", Bytes::from_static(b"one"), Some(&replace), None)
            .await
            .unwrap();
        folder
            .upload("b.txt", Bytes::from_static(b"two"), Some(&create), None)
            .await
            .unwrap();
        folder
            .upload("c.bin", Bytes::from_static(b"three"), None, None)
            .await
            .unwrap();

        assert_eq!(file.path(), &Path::parse("/docs/a.txt"));
        assert_eq!(file.etag(), Some("\"v2\""));
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.content_length(), Some(3));

        let requests = server.received_requests().await.unwrap();
        let conditions = requests
            .iter()
            .map(|r| {
                (
                    r.url.path().to_string(),
                    r.headers.get("If-Match").map(|v| v.to_str().unwrap().to_string()),
                    r.headers.get("If-None-Match").map(|v| v.to_str().unwrap().to_string()),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            conditions,
            vec![
                ("/dav/docs/a.txt".to_string(), Some("\"v1\"".to_string()), None),
                ("/dav/docs/b.txt".to_string(), None, Some("*".to_string())),
                ("/dav/docs/c.bin".to_string(), None, None),
            ]
        );
    }

    #[tokio::test]
    async fn create_existing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(path("/dav/docs/new"))
            .respond_with(ResponseTemplate::new(405))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path("/dav/docs/a.txt"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/docs/"))
            .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&[
                "/dav/docs/",
                "/dav/docs/new/",
                "/dav/docs/a.txt",
            ])))
            .mount(&server)
            .await;

        let folder = Folder::new(host(&server), Path::parse("/docs"));
        let created = folder.create_folder("new").await.unwrap();
        assert_eq!(created.path(), &Path::parse("/docs/new"));
        assert!(matches!(
            folder.create_folder("a.txt").await,
            Err(ClientError::MethodNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn upload_folder_skips_dot_entries() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let base = std::env::temp_dir().join(format!("oriel-upload-{}-{}", std::process::id(), stamp));
        let tree = base.join("tree");
        std::fs::create_dir_all(tree.join(".git")).unwrap();
        std::fs::write(tree.join("a.txt"), b"abc").unwrap();
        std::fs::write(tree.join(".hidden"), b"secret").unwrap();
        std::fs::write(tree.join(".git").join("HEAD"), b"ref").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(path("/dav/tree"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/"))
            .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&["/dav/", "/dav/tree/"])))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/dav/tree/a.txt"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let root = host(&server).root();
        let uploaded = root.upload_folder(&tree, None).await;
        let hidden = root.upload_folder(&tree.join(".git"), None).await;
        std::fs::remove_dir_all(&base).unwrap();

        assert_eq!(
            uploaded.unwrap().map(|f| f.path().clone()),
            Some(Path::parse("/tree"))
        );
        assert!(hidden.unwrap().is_none());
    }
}
