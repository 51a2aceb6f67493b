//! Wire protocol spoken by coordination-service clusters.
//!
//! Records are encoded with jute (big-endian integers, length-prefixed
//! buffers) and every message travels in a length-prefixed frame. Both the
//! client and server directions are implemented so tests can stand up a
//! fake server.

pub mod codec;
pub mod error;
pub mod jute;
pub mod message;

pub use codec::{
    decode_record, decode_reply_header, decode_request, encode_record, encode_reply,
    encode_request, FrameCodec, MAX_FRAME_SIZE,
};
pub use error::{ProtocolError, ProtocolResult};
pub use jute::{JuteReader, JuteRecord, JuteWriter};
pub use message::{
    codes, xid, ConnectRequest, ConnectResponse, OpCode, ReplyHeader, Request, RequestHeader,
    Response, Stat, WatcherEvent, PROTOCOL_VERSION,
};
