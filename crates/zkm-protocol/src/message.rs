use zkm_types::Acl;

use crate::error::{ProtocolError, ProtocolResult};
use crate::jute::{read_acl, write_acl, JuteReader, JuteRecord, JuteWriter};

pub const PROTOCOL_VERSION: i32 = 0;

/// Reserved transaction ids.
pub mod xid {
    pub const WATCH_EVENT: i32 = -1;
    pub const PING: i32 = -2;
    pub const AUTH: i32 = -4;
}

/// Server error codes carried in [`ReplyHeader::err`].
pub mod codes {
    pub const OK: i32 = 0;
    pub const SYSTEM_ERROR: i32 = -1;
    pub const CONNECTION_LOSS: i32 = -4;
    pub const MARSHALLING_ERROR: i32 = -5;
    pub const OPERATION_TIMEOUT: i32 = -7;
    pub const BAD_ARGUMENTS: i32 = -8;
    pub const API_ERROR: i32 = -100;
    pub const NO_NODE: i32 = -101;
    pub const NO_AUTH: i32 = -102;
    pub const BAD_VERSION: i32 = -103;
    pub const NO_CHILDREN_FOR_EPHEMERALS: i32 = -108;
    pub const NODE_EXISTS: i32 = -110;
    pub const SESSION_EXPIRED: i32 = -112;
    pub const INVALID_ACL: i32 = -114;
    pub const AUTH_FAILED: i32 = -115;

    pub fn name(code: i32) -> &'static str {
        match code {
            OK => "Ok",
            SYSTEM_ERROR => "SystemError",
            CONNECTION_LOSS => "ConnectionLoss",
            MARSHALLING_ERROR => "MarshallingError",
            OPERATION_TIMEOUT => "OperationTimeout",
            BAD_ARGUMENTS => "BadArguments",
            API_ERROR => "APIError",
            NO_NODE => "NoNode",
            NO_AUTH => "NoAuth",
            BAD_VERSION => "BadVersion",
            NO_CHILDREN_FOR_EPHEMERALS => "NoChildrenForEphemerals",
            NODE_EXISTS => "NodeExists",
            SESSION_EXPIRED => "SessionExpired",
            INVALID_ACL => "InvalidACL",
            AUTH_FAILED => "AuthFailed",
            _ => "Unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Create = 1,
    Exists = 3,
    GetData = 4,
    SetData = 5,
    GetAcl = 6,
    SetAcl = 7,
    GetChildren = 8,
    Ping = 11,
    Auth = 100,
    Sasl = 102,
    CloseSession = -11,
}

impl OpCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for OpCode {
    type Error = ProtocolError;

    fn try_from(code: i32) -> ProtocolResult<Self> {
        Ok(match code {
            1 => Self::Create,
            3 => Self::Exists,
            4 => Self::GetData,
            5 => Self::SetData,
            6 => Self::GetAcl,
            7 => Self::SetAcl,
            8 => Self::GetChildren,
            11 => Self::Ping,
            100 => Self::Auth,
            102 => Self::Sasl,
            -11 => Self::CloseSession,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        })
    }
}

/// Session handshake sent by the client as the first frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub passwd: Vec<u8>,
    pub read_only: bool,
}

impl ConnectRequest {
    /// A request for a brand-new session.
    pub fn new_session(timeout_ms: i32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: 0,
            timeout_ms,
            session_id: 0,
            passwd: vec![0; 16],
            read_only: false,
        }
    }
}

impl JuteRecord for ConnectRequest {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.protocol_version);
        w.write_long(self.last_zxid_seen);
        w.write_int(self.timeout_ms);
        w.write_long(self.session_id);
        w.write_buffer(Some(&self.passwd));
        w.write_bool(self.read_only);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            protocol_version: r.read_int()?,
            last_zxid_seen: r.read_long()?,
            timeout_ms: r.read_int()?,
            session_id: r.read_long()?,
            passwd: r.read_buffer()?.unwrap_or_default(),
            read_only: r.remaining() > 0 && r.read_bool()?,
        })
    }
}

/// Handshake reply. A zero `timeout_ms` means the server refused the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub passwd: Vec<u8>,
    pub read_only: bool,
}

impl JuteRecord for ConnectResponse {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.protocol_version);
        w.write_int(self.timeout_ms);
        w.write_long(self.session_id);
        w.write_buffer(Some(&self.passwd));
        w.write_bool(self.read_only);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            protocol_version: r.read_int()?,
            timeout_ms: r.read_int()?,
            session_id: r.read_long()?,
            passwd: r.read_buffer()?.unwrap_or_default(),
            // Older servers omit the flag.
            read_only: r.remaining() > 0 && r.read_bool()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub xid: i32,
    pub op: i32,
}

impl JuteRecord for RequestHeader {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.xid);
        w.write_int(self.op);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            xid: r.read_int()?,
            op: r.read_int()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl JuteRecord for ReplyHeader {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.xid);
        w.write_long(self.zxid);
        w.write_int(self.err);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            xid: r.read_int()?,
            zxid: r.read_long()?,
            err: r.read_int()?,
        })
    }
}

/// Node metadata returned alongside most responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

impl JuteRecord for Stat {
    fn write(&self, w: &mut JuteWriter) {
        w.write_long(self.czxid);
        w.write_long(self.mzxid);
        w.write_long(self.ctime);
        w.write_long(self.mtime);
        w.write_int(self.version);
        w.write_int(self.cversion);
        w.write_int(self.aversion);
        w.write_long(self.ephemeral_owner);
        w.write_int(self.data_length);
        w.write_int(self.num_children);
        w.write_long(self.pzxid);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            czxid: r.read_long()?,
            mzxid: r.read_long()?,
            ctime: r.read_long()?,
            mtime: r.read_long()?,
            version: r.read_int()?,
            cversion: r.read_int()?,
            aversion: r.read_int()?,
            ephemeral_owner: r.read_long()?,
            data_length: r.read_int()?,
            num_children: r.read_int()?,
            pzxid: r.read_long()?,
        })
    }
}

/// Push notification delivered with [`xid::WATCH_EVENT`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatcherEvent {
    pub event_type: i32,
    pub state: i32,
    pub path: String,
}

impl JuteRecord for WatcherEvent {
    fn write(&self, w: &mut JuteWriter) {
        w.write_int(self.event_type);
        w.write_int(self.state);
        w.write_string(&self.path);
    }

    fn read(r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(Self {
            event_type: r.read_int()?,
            state: r.read_int()?,
            path: r.read_string()?,
        })
    }
}

/// Request bodies, one per operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Create {
        path: String,
        data: Vec<u8>,
        acl: Vec<Acl>,
        flags: i32,
    },
    Exists {
        path: String,
        watch: bool,
    },
    GetData {
        path: String,
        watch: bool,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        acl: Vec<Acl>,
        version: i32,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    Auth {
        auth_type: i32,
        scheme: String,
        auth: Vec<u8>,
    },
    /// One client token of a SASL exchange.
    Sasl {
        token: Vec<u8>,
    },
    Ping,
    CloseSession,
}

impl Request {
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Create { .. } => OpCode::Create,
            Self::Exists { .. } => OpCode::Exists,
            Self::GetData { .. } => OpCode::GetData,
            Self::SetData { .. } => OpCode::SetData,
            Self::GetAcl { .. } => OpCode::GetAcl,
            Self::SetAcl { .. } => OpCode::SetAcl,
            Self::GetChildren { .. } => OpCode::GetChildren,
            Self::Auth { .. } => OpCode::Auth,
            Self::Sasl { .. } => OpCode::Sasl,
            Self::Ping => OpCode::Ping,
            Self::CloseSession => OpCode::CloseSession,
        }
    }

    /// Path the request targets, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Create { path, .. }
            | Self::Exists { path, .. }
            | Self::GetData { path, .. }
            | Self::SetData { path, .. }
            | Self::GetAcl { path }
            | Self::SetAcl { path, .. }
            | Self::GetChildren { path, .. } => Some(path),
            Self::Auth { .. } | Self::Sasl { .. } | Self::Ping | Self::CloseSession => None,
        }
    }

    pub fn write_body(&self, w: &mut JuteWriter) {
        match self {
            Self::Create { path, data, acl, flags } => {
                w.write_string(path);
                w.write_buffer(Some(data));
                write_acl(w, acl);
                w.write_int(*flags);
            }
            Self::Exists { path, watch }
            | Self::GetData { path, watch }
            | Self::GetChildren { path, watch } => {
                w.write_string(path);
                w.write_bool(*watch);
            }
            Self::SetData { path, data, version } => {
                w.write_string(path);
                w.write_buffer(Some(data));
                w.write_int(*version);
            }
            Self::GetAcl { path } => w.write_string(path),
            Self::SetAcl { path, acl, version } => {
                w.write_string(path);
                write_acl(w, acl);
                w.write_int(*version);
            }
            Self::Auth { auth_type, scheme, auth } => {
                w.write_int(*auth_type);
                w.write_string(scheme);
                w.write_buffer(Some(auth));
            }
            Self::Sasl { token } => w.write_buffer(Some(token)),
            Self::Ping | Self::CloseSession => {}
        }
    }

    pub fn read_body(op: OpCode, r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(match op {
            OpCode::Create => Self::Create {
                path: r.read_string()?,
                data: r.read_buffer()?.unwrap_or_default(),
                acl: read_acl(r)?,
                flags: r.read_int()?,
            },
            OpCode::Exists => Self::Exists {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::GetData => Self::GetData {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::SetData => Self::SetData {
                path: r.read_string()?,
                data: r.read_buffer()?.unwrap_or_default(),
                version: r.read_int()?,
            },
            OpCode::GetAcl => Self::GetAcl {
                path: r.read_string()?,
            },
            OpCode::SetAcl => Self::SetAcl {
                path: r.read_string()?,
                acl: read_acl(r)?,
                version: r.read_int()?,
            },
            OpCode::GetChildren => Self::GetChildren {
                path: r.read_string()?,
                watch: r.read_bool()?,
            },
            OpCode::Auth => Self::Auth {
                auth_type: r.read_int()?,
                scheme: r.read_string()?,
                auth: r.read_buffer()?.unwrap_or_default(),
            },
            OpCode::Sasl => Self::Sasl {
                token: r.read_buffer()?.unwrap_or_default(),
            },
            OpCode::Ping => Self::Ping,
            OpCode::CloseSession => Self::CloseSession,
        })
    }
}

/// Successful response bodies. Error replies carry no body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Create { path: String },
    Stat(Stat),
    GetData { data: Vec<u8>, stat: Stat },
    GetAcl { acl: Vec<Acl>, stat: Stat },
    GetChildren { children: Vec<String> },
    /// Server token of a SASL exchange; empty once the server is done.
    Sasl { token: Vec<u8> },
    Empty,
}

impl Response {
    pub fn write_body(&self, w: &mut JuteWriter) {
        match self {
            Self::Create { path } => w.write_string(path),
            Self::Stat(stat) => stat.write(w),
            Self::GetData { data, stat } => {
                w.write_buffer(Some(data));
                stat.write(w);
            }
            Self::GetAcl { acl, stat } => {
                write_acl(w, acl);
                stat.write(w);
            }
            Self::GetChildren { children } => {
                w.write_vec(children, |w, name| w.write_string(name));
            }
            Self::Sasl { token } => w.write_buffer(Some(token)),
            Self::Empty => {}
        }
    }

    /// Decode the body that follows a successful reply to `op`.
    pub fn read_body(op: OpCode, r: &mut JuteReader) -> ProtocolResult<Self> {
        Ok(match op {
            OpCode::Create => Self::Create {
                path: r.read_string()?,
            },
            OpCode::Exists | OpCode::SetData | OpCode::SetAcl => Self::Stat(r.read_record()?),
            OpCode::GetData => Self::GetData {
                data: r.read_buffer()?.unwrap_or_default(),
                stat: r.read_record()?,
            },
            OpCode::GetAcl => Self::GetAcl {
                acl: read_acl(r)?,
                stat: r.read_record()?,
            },
            OpCode::GetChildren => Self::GetChildren {
                children: r.read_vec(JuteReader::read_string)?,
            },
            OpCode::Sasl => Self::Sasl {
                token: r.read_buffer()?.unwrap_or_default(),
            },
            OpCode::Ping | OpCode::Auth | OpCode::CloseSession => Self::Empty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkm_types::{open_acl_unsafe, Id, Perms};

    fn round_trip_request(req: Request) {
        let mut w = JuteWriter::new();
        req.write_body(&mut w);
        let mut r = JuteReader::new(w.into_bytes());
        assert_eq!(Request::read_body(req.op_code(), &mut r).unwrap(), req);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn op_codes_match_wire_values() {
        assert_eq!(OpCode::Create.code(), 1);
        assert_eq!(OpCode::GetChildren.code(), 8);
        assert_eq!(OpCode::CloseSession.code(), -11);
        assert_eq!(OpCode::try_from(100).unwrap(), OpCode::Auth);
        assert!(matches!(OpCode::try_from(99), Err(ProtocolError::UnknownOpCode(99))));
    }

    #[test]
    fn create_request_layout() {
        let req = Request::Create {
            path: "/a".into(),
            data: vec![0xde, 0xad],
            acl: open_acl_unsafe(),
            flags: 1,
        };
        let mut w = JuteWriter::new();
        req.write_body(&mut w);
        let bytes = w.into_bytes();
        // path
        assert_eq!(&bytes[..6], &[0, 0, 0, 2, b'/', b'a']);
        // data
        assert_eq!(&bytes[6..12], &[0, 0, 0, 2, 0xde, 0xad]);
        // flags trail the ACL vector
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 1]);
        round_trip_request(req);
    }

    #[test]
    fn request_bodies_round_trip() {
        let acl = vec![Acl::new(Perms::ALL, Id::new("digest", "u:h"))];
        round_trip_request(Request::SetData { path: "/x".into(), data: vec![], version: -1 });
        round_trip_request(Request::SetAcl { path: "/x".into(), acl, version: -1 });
        round_trip_request(Request::GetChildren { path: "/".into(), watch: false });
        round_trip_request(Request::Auth { auth_type: 0, scheme: "digest".into(), auth: b"u:p".to_vec() });
        round_trip_request(Request::Sasl { token: vec![0x60, 0x82, 0x01] });
        round_trip_request(Request::Ping);
    }

    #[test]
    fn sasl_response_with_null_token() {
        let mut w = JuteWriter::new();
        w.write_buffer(None);
        let resp = Response::read_body(OpCode::Sasl, &mut JuteReader::new(w.into_bytes())).unwrap();
        assert_eq!(resp, Response::Sasl { token: Vec::new() });
        assert_eq!(OpCode::try_from(102).unwrap(), OpCode::Sasl);
        assert!(matches!(OpCode::try_from(2), Err(ProtocolError::UnknownOpCode(2))));
    }

    #[test]
    fn watcher_event_layout() {
        let mut w = JuteWriter::new();
        w.write_int(3);
        w.write_int(3);
        w.write_string("/a");
        let event = WatcherEvent::read(&mut JuteReader::new(w.into_bytes())).unwrap();
        assert_eq!(event, WatcherEvent { event_type: 3, state: 3, path: "/a".into() });
    }

    #[test]
    fn children_response_decodes() {
        let resp = Response::GetChildren { children: vec!["b".into(), "a".into()] };
        let mut w = JuteWriter::new();
        resp.write_body(&mut w);
        let back = Response::read_body(OpCode::GetChildren, &mut JuteReader::new(w.into_bytes())).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn stat_is_68_bytes() {
        let mut w = JuteWriter::new();
        Stat::default().write(&mut w);
        assert_eq!(w.len(), 68);
    }

    #[test]
    fn connect_response_without_read_only_flag() {
        let mut w = JuteWriter::new();
        w.write_int(0);
        w.write_int(30_000);
        w.write_long(42);
        w.write_buffer(Some(&[7; 16]));
        let resp = ConnectResponse::read(&mut JuteReader::new(w.into_bytes())).unwrap();
        assert_eq!(resp.session_id, 42);
        assert!(!resp.read_only);
    }

    #[test]
    fn code_names() {
        assert_eq!(codes::name(codes::NO_NODE), "NoNode");
        assert_eq!(codes::name(-9999), "Unknown");
    }
}
