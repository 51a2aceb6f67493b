use zkm_protocol::{codes, ProtocolError};
use zkm_session::SessionError;

/// Why an in-flight request produced no response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReplyError {
    /// The server answered with a non-zero error code.
    Server(i32),
    /// The connection went away before the reply arrived.
    Connection(String),
    /// The request could not be sent; the connection is unaffected.
    Rejected(String),
}

impl From<ProtocolError> for ReplyError {
    fn from(e: ProtocolError) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Map a server error code to the session error for `path`.
pub fn from_code(code: i32, path: &str) -> SessionError {
    let path = path.to_string();
    match code {
        codes::NO_NODE => SessionError::NoNode(path),
        codes::NODE_EXISTS => SessionError::NodeExists(path),
        codes::NO_AUTH => SessionError::NoAuth(path),
        codes::INVALID_ACL => SessionError::InvalidAcl(path),
        codes::NO_CHILDREN_FOR_EPHEMERALS => SessionError::NoChildrenForEphemerals(path),
        codes::AUTH_FAILED => SessionError::AuthFailed(format!("server rejected credentials at {path}")),
        codes::SESSION_EXPIRED => SessionError::SessionExpired,
        codes::CONNECTION_LOSS => SessionError::ConnectionLoss(format!("server reported connection loss at {path}")),
        codes::OPERATION_TIMEOUT => SessionError::Timeout(format!("server timed out {path}")),
        code => SessionError::Server { code, path },
    }
}
