// utils
pub mod error;
pub mod xml;

// webdav property model
pub mod types;
pub mod value;

// wire format
pub mod encoder;
pub mod decoder;
pub mod proppatch;
