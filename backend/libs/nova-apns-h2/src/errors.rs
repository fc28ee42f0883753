use thiserror::Error;

/// Failures raised by the HTTP/2 transport underneath a session
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP/2 protocol error: {0}")]
    Protocol(String),

    #[error("stream reset by peer (error code {0})")]
    Reset(u32),

    #[error("session is closed")]
    SessionClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// APNs Client Error Types
///
/// None of these are returned from `ApnsClient::write` directly; they are
/// carried inside `Outcome::Failed`.
#[derive(Error, Debug)]
pub enum ApnsError {
    #[error("failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: TransportError,
    },

    #[error("APNs terminated the connection")]
    GoAway { error_code: u32, last_stream_id: u32 },

    #[error("Error 500, stream ended unexpectedly")]
    InternalServerError,

    #[error("stream ended unexpectedly")]
    UnexpectedEndOfStream { status: Option<u16> },

    #[error("apn write failed: {0}")]
    Write(#[from] TransportError),

    #[error("failed to parse APNs response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("failed to serialize notification payload: {0}")]
    Payload(String),

    #[error("provider token error: {0}")]
    Token(String),

    #[error("APNs configuration error: {0}")]
    Config(String),
}

impl From<ApnsError> for String {
    fn from(err: ApnsError) -> Self {
        err.to_string()
    }
}
