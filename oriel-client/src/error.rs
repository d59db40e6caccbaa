use thiserror::Error;

/// Outcome of a remote operation that did not succeed.
///
/// Status based variants carry the URL that was requested.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authorised: {0}")]
    NotAuthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("locked: {0}")]
    Locked(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("unexpected status {status}: {href}")]
    GenericHttp { status: u16, href: String },
    #[error("server error {status}: {href}")]
    InternalServerError { status: u16, href: String },
    #[error("redirected with {status}: {href}")]
    Redirect { status: u16, href: String },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("local i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Parsing(#[from] oriel_dav::error::ParsingError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0} is not a folder")]
    NotAFolder(String),
    #[error("{0} is not locked, there is no token to release")]
    NotLocked(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Map a response status to its error, 2xx and `304 Not Modified` pass.
pub fn process_result_code(status: u16, href: &str) -> Result<()> {
    let href = href.to_string();
    match status {
        200..=299 | 304 => Ok(()),
        300..=399 => Err(ClientError::Redirect { status, href }),
        400 => Err(ClientError::BadRequest(href)),
        401 | 403 => Err(ClientError::NotAuthorized(href)),
        404 => Err(ClientError::NotFound(href)),
        405 => Err(ClientError::MethodNotAllowed(href)),
        409 => Err(ClientError::Conflict(href)),
        412 => Err(ClientError::PreconditionFailed(href)),
        423 => Err(ClientError::Locked(href)),
        500..=599 => Err(ClientError::InternalServerError { status, href }),
        _ => Err(ClientError::GenericHttp { status, href }),
    }
}
