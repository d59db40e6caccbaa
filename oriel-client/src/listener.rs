use std::time::Duration;

use crate::path::Path;
use crate::resource::Resource;

/// Notified around every HTTP exchange of a host
pub trait ConnectionListener: Send + Sync {
    fn on_start_request(&self);
    fn on_finish_request(&self);
}

/// Changes to the children of a folder, as observed by this client
pub trait FolderListener: Send + Sync {
    fn on_child_added(&self, parent: &Path, child: &Resource);
    fn on_child_removed(&self, parent: &Path, child: &Resource);
}

pub trait ResourceListener: Send + Sync {
    fn on_deleted(&self, resource: &Resource);
}

/// Progress of an upload or a download.
///
/// `is_cancelled` is polled once per chunk, a transfer never stops in the
/// middle of one.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, bytes: u64, total: Option<u64>, name: &str);

    fn on_complete(&self, _name: &str) {}

    /// Raw throughput: size of the last chunk and the time it took
    fn on_read(&self, _bytes: usize, _elapsed: Duration) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}
