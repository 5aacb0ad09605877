use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the relay.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    QueueFull,
}

/// Failures while framing an HTTP request out of the inbound buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Reasons an upgrade token is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("invalid user id")]
    InvalidUser,
}
