use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::listener::ProgressListener;
use crate::resource::{EntryKind, Remote};
use crate::transfer::{ByteRange, IfMatchCheck};

/// A remote non-collection resource
#[derive(Debug, Clone)]
pub struct File(pub(crate) Remote);

impl Deref for File {
    type Target = Remote;
    fn deref(&self) -> &Remote {
        &self.0
    }
}

impl DerefMut for File {
    fn deref_mut(&mut self) -> &mut Remote {
        &mut self.0
    }
}

impl File {
    pub fn content_type(&self) -> Option<&str> {
        match &self.entry.kind {
            EntryKind::File { content_type, .. } => content_type.as_deref(),
            EntryKind::Folder => None,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match &self.entry.kind {
            EntryKind::File { content_length, .. } => *content_length,
            EntryKind::Folder => None,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        match &self.entry.kind {
            EntryKind::File { etag, .. } => etag.as_deref(),
            EntryKind::Folder => None,
        }
    }

    /// Stream the content, or the given ranges of it, into `out`.
    ///
    /// A cancelled download returns [`crate::ClientError::Cancelled`] and
    /// never reports completion.
    pub async fn download<W: AsyncWrite + Unpin + Send>(
        &self,
        out: &mut W,
        listener: Option<&dyn ProgressListener>,
        ranges: &[ByteRange],
    ) -> Result<u64> {
        if let Some(l) = listener {
            l.on_progress(0, None, self.name());
        }
        let received = self
            .host
            .do_get(self.encoded_url().as_str(), ranges, out, listener)
            .await?;
        if let Some(l) = listener {
            l.on_progress(received, Some(received), self.name());
            l.on_complete(self.name());
        }
        Ok(received)
    }

    /// Download to a local file, or into a local directory under the remote
    /// name
    pub async fn download_to_file(
        &self,
        dest: &std::path::Path,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<u64> {
        let target = match tokio::fs::metadata(dest).await {
            Ok(m) if m.is_dir() => dest.join(self.name()),
            _ => dest.to_path_buf(),
        };
        tracing::trace!(name=%self.name(), dest=%target.display(), "download to file");
        let mut out = tokio::fs::File::create(&target).await?;
        self.download(&mut out, listener, &[]).await
    }

    /// Replace the content, only if the remote version is still the one
    /// this file was read at
    pub async fn set_content(
        &mut self,
        content: Bytes,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<()> {
        let check = IfMatchCheck::new(self.etag().map(str::to_string));
        let length = content.len() as u64;
        let content_type = self.content_type().map(str::to_string);
        let result = self
            .host
            .do_put(
                self.encoded_url().as_str(),
                content,
                content_type.as_deref(),
                Some(&check),
                listener,
            )
            .await?;
        if let EntryKind::File {
            content_length,
            etag,
            ..
        } = &mut self.entry.kind
        {
            *content_length = Some(length);
            *etag = result.etag;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ClientError;
    use crate::testing::{file, host};

    #[derive(Default)]
    struct Progress {
        seen: Mutex<Vec<(u64, Option<u64>)>>,
        completed: AtomicBool,
        cancel: bool,
    }
    impl ProgressListener for Progress {
        fn on_progress(&self, bytes: u64, total: Option<u64>, _name: &str) {
            self.seen.lock().unwrap().push((bytes, total));
        }
        fn on_complete(&self, _name: &str) {
            self.completed.store(true, Ordering::SeqCst);
        }
        fn is_cancelled(&self) -> bool {
            self.cancel
        }
    }

    #[tokio::test]
    async fn download_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dav/f.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let host = host(&server);
        let progress = Progress::default();
        let mut out = Vec::new();
        let received = file(&host, "/f.txt", None)
            .download(&mut out, Some(&progress), &[])
            .await
            .unwrap();

        assert_eq!(received, 5);
        assert_eq!(out, b"hello");
        let seen = progress.seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&(0, None)));
        assert_eq!(seen.last(), Some(&(5, Some(5))));
        assert!(progress.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_transfers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let host = host(&server);
        let progress = Arc::new(Progress {
            cancel: true,
            ..Default::default()
        });
        let mut out = Vec::new();
        let mut f = file(&host, "/f.txt", None);
        assert!(matches!(
            f.download(&mut out, Some(progress.as_ref()), &[]).await,
            Err(ClientError::Cancelled)
        ));
        assert!(out.is_empty());
        assert!(!progress.completed.load(Ordering::SeqCst));

        assert!(matches!(
            f.set_content(Bytes::from_static(b"abcdef"), Some(progress.clone()))
                .await,
            Err(ClientError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn ranged_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dav/f.txt"))
            .and(header("Range", "bytes=2-4"))
            .respond_with(ResponseTemplate::new(206).set_body_string("llo"))
            .expect(1)
            .mount(&server)
            .await;

        let host = host(&server);
        let mut out = Vec::new();
        let range = ByteRange {
            start: 2,
            finish: Some(4),
        };
        let received = file(&host, "/f.txt", None)
            .download(&mut out, None, &[range])
            .await
            .unwrap();
        assert_eq!(received, 3);
        assert_eq!(out, b"llo");
    }

    #[tokio::test]
    async fn set_content_is_conditional() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/dav/f.txt"))
            .and(header("If-Match", "\"e1\""))
            .respond_with(ResponseTemplate::new(204).insert_header("ETag", "\"e2\""))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/dav/f.txt"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let host = host(&server);
        let mut f = file(&host, "/f.txt", Some("\"e1\""));
        f.set_content(Bytes::from_static(b"abcdef"), None)
            .await
            .unwrap();
        assert_eq!(f.etag(), Some("\"e2\""));
        assert_eq!(f.content_length(), Some(6));

        let mut stale = file(&host, "/f.txt", Some("\"e0\""));
        assert!(matches!(
            stale.set_content(Bytes::from_static(b"x"), None).await,
            Err(ClientError::PreconditionFailed(_))
        ));
    }
}
