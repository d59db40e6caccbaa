use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::body::Bytes;

use oriel_dav::types::{PropFindResponse, QName};

use super::error::DavError;

pub type ArcResource = Arc<dyn DavResource>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub used: u64,
    pub available: u64,
}

/// A node of the served tree.
///
/// Everything a handler may do besides reading metadata is an optional
/// capability, exposed through the `as_*` accessors. A handler that needs a
/// missing capability answers 405.
pub trait DavResource: Send + Sync {
    fn name(&self) -> String;
    /// Stable identifier, used to key locks
    fn unique_id(&self) -> String;
    fn etag(&self) -> Option<String>;
    fn modified(&self) -> Option<DateTime<Utc>>;
    fn created(&self) -> Option<DateTime<Utc>>;

    fn display_name(&self) -> String {
        self.name()
    }
    fn content_type(&self) -> Option<String> {
        None
    }
    fn content_length(&self) -> Option<u64> {
        None
    }
    fn quota(&self) -> Option<Quota> {
        None
    }
    fn is_lockable(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;

    // capabilities
    fn as_collection(&self) -> Option<&dyn Collection> {
        None
    }
    fn as_deletable(&self) -> Option<&dyn Deletable> {
        None
    }
    fn as_copyable(&self) -> Option<&dyn Copyable> {
        None
    }
    fn as_movable(&self) -> Option<&dyn Movable> {
        None
    }
    fn as_commitable(&self) -> Option<&dyn Commitable> {
        None
    }
    fn as_content(&self) -> Option<&dyn Content> {
        None
    }
    fn as_dead_properties(&self) -> Option<&dyn DeadPropertyStore> {
        None
    }
    fn as_display_name_store(&self) -> Option<&dyn DisplayNameStore> {
        None
    }

    fn is_collection(&self) -> bool {
        self.as_collection().is_some()
    }
}

#[async_trait]
pub trait Collection: Send + Sync {
    async fn children(&self) -> Result<Vec<ArcResource>, DavError>;

    async fn child(&self, name: &str) -> Result<Option<ArcResource>, DavError> {
        Ok(self
            .children()
            .await?
            .into_iter()
            .find(|c| c.name() == name))
    }

    /// `None` when the collection refuses to create it
    async fn create_collection(&self, name: &str) -> Result<Option<ArcResource>, DavError>;

    async fn put_child(
        &self,
        name: &str,
        content: Bytes,
        content_type: Option<String>,
    ) -> Result<ArcResource, DavError>;
}

#[async_trait]
pub trait Deletable: Send + Sync {
    async fn delete(&self) -> Result<(), DavError>;
}

#[async_trait]
pub trait Copyable: Send + Sync {
    /// `dest` is the destination collection, `name` the name of the copy
    async fn copy_to(&self, dest: &ArcResource, name: &str) -> Result<(), DavError>;
}

#[async_trait]
pub trait Movable: Send + Sync {
    async fn move_to(&self, dest: &ArcResource, name: &str) -> Result<(), DavError>;
}

/// Called once at the end of a PROPPATCH with everything that was applied
#[async_trait]
pub trait Commitable: Send + Sync {
    async fn commit(&self, outcome: &PropFindResponse) -> Result<(), DavError>;
}

#[async_trait]
pub trait Content: Send + Sync {
    async fn content(&self) -> Result<Bytes, DavError>;
    async fn replace(&self, content: Bytes, content_type: Option<String>) -> Result<(), DavError>;
}

pub trait DeadPropertyStore: Send + Sync {
    fn dead_property(&self, name: &QName) -> Option<String>;
    fn set_dead_property(&self, name: &QName, value: String);
    fn remove_dead_property(&self, name: &QName);
    fn dead_property_names(&self) -> Vec<QName>;
}

pub trait DisplayNameStore: Send + Sync {
    fn set_display_name(&self, name: &str) -> Result<(), DavError>;
}
