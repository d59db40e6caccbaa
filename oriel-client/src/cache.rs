use std::sync::Arc;

use moka::notification::RemovalCause;

use crate::path::Path;
use crate::resource::Entry;

/// Children listings of the folders a host has already visited,
/// keyed by folder path and bounded in number of folders.
pub struct FolderCache {
    listings: moka::sync::Cache<Path, Vec<Entry>>,
}

impl FolderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            listings: moka::sync::Cache::builder()
                .max_capacity(capacity.max(1) as u64)
                .eviction_listener(|path: Arc<Path>, _: Vec<Entry>, cause: RemovalCause| {
                    tracing::trace!(path=%path.encoded(), ?cause, "folder listing dropped");
                })
                .build(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Vec<Entry>> {
        self.listings.get(path)
    }

    pub fn put(&self, path: Path, entries: Vec<Entry>) {
        self.listings.insert(path, entries);
    }

    /// `true` when something was actually removed
    pub fn remove(&self, path: &Path) -> bool {
        self.listings.remove(path).is_some()
    }

    /// Approximate until pending maintenance has run
    pub fn len(&self) -> u64 {
        self.listings.run_pending_tasks();
        self.listings.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.listings.invalidate_all();
    }
}
