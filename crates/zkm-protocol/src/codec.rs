use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{ProtocolError, ProtocolResult};
use crate::jute::{JuteReader, JuteRecord, JuteWriter};
use crate::message::{OpCode, ReplyHeader, Request, RequestHeader, Response};

/// Largest frame accepted in either direction. Matches the server's default
/// `jute.maxbuffer` plus room for headers.
pub const MAX_FRAME_SIZE: usize = 0xfffff + 1024;

/// Length-prefixed framing: `[4 byte big-endian length][payload]`.
pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(payload: &[u8]) -> ProtocolResult<Bytes> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Split one complete frame off the front of `buf`, or `None` if more
    /// bytes are needed.
    pub fn decode(buf: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        Ok(Some(buf.split_to(len).freeze()))
    }

    /// Read one frame. `Ok(None)` on a clean end of stream between frames.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::FramingError(format!("stream ended inside a {len} byte frame"))
            } else {
                e.into()
            }
        })?;
        trace!(len, "frame read");
        Ok(Some(Bytes::from(payload)))
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()> {
        let frame = Self::encode(payload)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!(len = payload.len(), "frame written");
        Ok(())
    }
}

/// Serialize a bare record such as a connect handshake.
pub fn encode_record<T: JuteRecord>(record: &T) -> Bytes {
    let mut w = JuteWriter::new();
    record.write(&mut w);
    w.into_bytes()
}

pub fn decode_record<T: JuteRecord>(payload: Bytes) -> ProtocolResult<T> {
    JuteReader::new(payload).read_record()
}

/// Header plus body of a client request.
pub fn encode_request(xid: i32, request: &Request) -> Bytes {
    let mut w = JuteWriter::new();
    RequestHeader {
        xid,
        op: request.op_code().code(),
    }
    .write(&mut w);
    request.write_body(&mut w);
    w.into_bytes()
}

pub fn decode_request(payload: Bytes) -> ProtocolResult<(RequestHeader, Request)> {
    let mut r = JuteReader::new(payload);
    let header: RequestHeader = r.read_record()?;
    let op = OpCode::try_from(header.op)?;
    let request = Request::read_body(op, &mut r)?;
    Ok((header, request))
}

/// Header plus, for successful replies, the response body.
pub fn encode_reply(header: ReplyHeader, response: Option<&Response>) -> Bytes {
    let mut w = JuteWriter::new();
    header.write(&mut w);
    if let Some(response) = response {
        response.write_body(&mut w);
    }
    w.into_bytes()
}

/// Split a reply into its header and a reader over the remaining body.
pub fn decode_reply_header(payload: Bytes) -> ProtocolResult<(ReplyHeader, JuteReader)> {
    let mut r = JuteReader::new(payload);
    let header = r.read_record()?;
    Ok((header, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{codes, ConnectRequest, Stat};

    #[test]
    fn frame_round_trip() {
        let frame = FrameCodec::encode(b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(FrameCodec::decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits() {
        let frame = FrameCodec::encode(b"hello").unwrap();
        let mut buf = BytesMut::from(&frame[..6]);
        assert!(FrameCodec::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 6);
        let mut short = BytesMut::from(&[0u8, 0][..]);
        assert!(FrameCodec::decode(&mut short).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xff][..]);
        assert!(matches!(FrameCodec::decode(&mut buf), Err(ProtocolError::FrameTooLarge { .. })));
        assert!(FrameCodec::encode(&vec![0; MAX_FRAME_SIZE + 1]).is_err());
    }

    #[test]
    fn request_round_trip() {
        let payload = encode_request(7, &Request::Exists { path: "/a".into(), watch: false });
        let (header, req) = decode_request(payload).unwrap();
        assert_eq!(header, RequestHeader { xid: 7, op: 3 });
        assert_eq!(req, Request::Exists { path: "/a".into(), watch: false });
    }

    #[test]
    fn error_reply_has_no_body() {
        let header = ReplyHeader { xid: 3, zxid: 10, err: codes::NO_NODE };
        let payload = encode_reply(header, None);
        let (back, body) = decode_reply_header(payload).unwrap();
        assert_eq!(back, header);
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn success_reply_body_follows_header() {
        let stat = Stat { num_children: 2, ..Stat::default() };
        let payload = encode_reply(ReplyHeader { xid: 1, zxid: 0, err: 0 }, Some(&Response::Stat(stat)));
        let (_, mut body) = decode_reply_header(payload).unwrap();
        assert_eq!(Response::read_body(OpCode::Exists, &mut body).unwrap(), Response::Stat(stat));
    }

    #[test]
    fn handshake_record_round_trip() {
        let req = ConnectRequest::new_session(30_000);
        let back: ConnectRequest = decode_record(encode_record(&req)).unwrap();
        assert_eq!(back, req);
        assert_eq!(back.passwd.len(), 16);
    }

    #[tokio::test]
    async fn async_read_write() {
        let (mut a, mut b) = tokio::io::duplex(64);
        FrameCodec::write_to(&mut a, b"ping").await.unwrap();
        drop(a);
        assert_eq!(FrameCodec::read_from(&mut b).await.unwrap().unwrap(), Bytes::from_static(b"ping"));
        assert!(FrameCodec::read_from(&mut b).await.unwrap().is_none());
    }
}
