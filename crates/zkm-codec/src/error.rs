use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("record {path} written before its parent {parent}")]
    OutOfOrder { path: String, parent: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
