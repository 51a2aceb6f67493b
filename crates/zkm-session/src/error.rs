use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("JAAS configuration {path}: {reason}")]
    Jaas { path: String, reason: String },

    #[error("unsupported authentication: {0}")]
    UnsupportedAuth(String),

    #[error("unable to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLoss(String),

    #[error("session expired")]
    SessionExpired,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("session closed")]
    Closed,

    #[error("no node: {0}")]
    NoNode(String),

    #[error("node exists: {0}")]
    NodeExists(String),

    #[error("not authorized: {0}")]
    NoAuth(String),

    #[error("invalid ACL for {0}")]
    InvalidAcl(String),

    #[error("ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("request for {path} not sent: {reason}")]
    RequestRejected { path: String, reason: String },

    #[error("server error {code} on {path}")]
    Server { code: i32, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Errors that end the session as a whole rather than one request.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectionLoss(_)
                | Self::SessionExpired
                | Self::Timeout(_)
                | Self::Closed
                | Self::Io(_)
        )
    }

    /// Errors raised by the server's authorization checks.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::NoAuth(_) | Self::InvalidAcl(_) | Self::AuthFailed(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
