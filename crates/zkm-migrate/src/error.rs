use thiserror::Error;
use zkm_codec::CodecError;
use zkm_session::SessionError;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        source: SessionError,
    },

    #[error("malformed node stream: {0}")]
    Codec(#[from] CodecError),

    #[error("parent of {path} does not exist at the destination")]
    MissingParent { path: String },

    #[error("permission denied at {path}: {source}")]
    Permission { path: String, source: SessionError },

    #[error("export root {path} does not exist")]
    MissingRoot { path: String },

    #[error("operation on {path} failed: {source}")]
    Session { path: String, source: SessionError },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Classify a session failure at `path` on the session described by `endpoint`.
    pub fn from_session(endpoint: &str, path: &str, source: SessionError) -> Self {
        if source.is_connection() {
            Self::Connection {
                endpoint: endpoint.to_string(),
                source,
            }
        } else if source.is_permission() {
            Self::Permission {
                path: path.to_string(),
                source,
            }
        } else {
            Self::Session {
                path: path.to_string(),
                source,
            }
        }
    }
}

pub type MigrateResult<T> = Result<T, MigrateError>;
