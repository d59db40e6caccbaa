// local model
pub mod cache;
pub mod error;
pub mod listener;
pub mod path;

// remote tree
pub mod file;
pub mod folder;
pub mod host;
pub mod resource;

// http
pub mod transfer;

#[cfg(test)]
mod testing;

pub use error::{ClientError, Result};
pub use file::File;
pub use folder::Folder;
pub use host::{Host, HostConfig, Target};
pub use path::Path;
pub use resource::{Entry, EntryKind, Remote, Resource};
pub use transfer::{ByteRange, IfMatchCheck, PutResult};
