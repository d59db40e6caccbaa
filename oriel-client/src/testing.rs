use std::sync::Mutex;

use wiremock::MockServer;

use crate::file::File;
use crate::host::{Host, HostConfig};
use crate::listener::FolderListener;
use crate::path::Path;
use crate::resource::{Entry, Remote, Resource};

pub fn host(server: &MockServer) -> Host {
    let config = HostConfig::new(&format!("{}/dav/", server.uri()))
        .unwrap()
        .with_credentials("alice", "hunter2");
    Host::new(config).unwrap()
}

pub fn file(host: &Host, path: &str, etag: Option<&str>) -> File {
    File(Remote {
        host: host.clone(),
        entry: Entry::file(Path::parse(path), None, Some(3), etag.map(str::to_string)),
    })
}

/// A multistatus listing, hrefs ending with a slash are collections
pub fn multistatus(hrefs: &[&str]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<d:multistatus xmlns:d=\"DAV:\">\n",
    );
    for (i, href) in hrefs.iter().enumerate() {
        let props = match href.ends_with('/') {
            true => "<d:resourcetype><d:collection/></d:resourcetype>".to_string(),
            false => format!(
                "<d:resourcetype/><d:getetag>\"e{}\"</d:getetag><d:getcontentlength>3</d:getcontentlength>",
                i
            ),
        };
        out.push_str(&format!(
            "  <d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>\n",
            href, props
        ));
    }
    out.push_str("</d:multistatus>\n");
    out
}

#[derive(Default)]
pub struct Recorder(pub Mutex<Vec<String>>);
impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
impl FolderListener for Recorder {
    fn on_child_added(&self, parent: &Path, child: &Resource) {
        self.0
            .lock()
            .unwrap()
            .push(format!("added {} in {}", child.name(), parent));
    }
    fn on_child_removed(&self, parent: &Path, child: &Resource) {
        self.0
            .lock()
            .unwrap()
            .push(format!("removed {} from {}", child.name(), parent));
    }
}
