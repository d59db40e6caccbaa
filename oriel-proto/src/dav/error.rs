use hyper::StatusCode;
use thiserror::Error;

use oriel_dav::error::ParsingError;

/// Failure of a method handler or of a collaborator, mapped to a single
/// top level HTTP status.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("authentication required")]
    NotAuthorized,
    #[error("access denied")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("resource not found")]
    NotFound,
    #[error("method not allowed on this resource")]
    MethodNotAllowed,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("resource is locked")]
    Locked,
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,
    #[error("insufficient storage")]
    InsufficientStorage,
    #[error("unable to parse the request body: {0}")]
    Parsing(#[from] ParsingError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) | Self::Parsing(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::Locked => StatusCode::LOCKED,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<http::Error> for DavError {
    fn from(value: http::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
