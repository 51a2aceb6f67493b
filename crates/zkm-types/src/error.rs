use thiserror::Error;

/// Errors produced by type validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid permission bits: {0:#x}")]
    InvalidPerms(u32),

    #[error("invalid ACL entry {entry:?}: {reason}")]
    InvalidAcl { entry: String, reason: String },
}

pub type TypeResult<T> = Result<T, TypeError>;
