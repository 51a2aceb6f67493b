//! One TCP connection and the task that multiplexes requests over it.
//!
//! The server answers requests strictly in submission order, so replies
//! are matched against a FIFO of pending calls. Pings and watch events use
//! reserved xids and never enter the queue.
//!
//! A server that stays silent for two thirds of the negotiated session
//! timeout is treated as lost: pings go out every third, so at least one
//! reply was missed.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use zkm_protocol::{
    codes, decode_record, decode_reply_header, encode_record, encode_request, xid, ConnectRequest,
    ConnectResponse, FrameCodec, OpCode, ProtocolResult, Request, Response, WatcherEvent,
};
use zkm_session::{HostPort, SessionError, SessionResult};

use crate::error::ReplyError;

pub(crate) type Reply = Result<Response, ReplyError>;

struct Call {
    request: Request,
    reply: oneshot::Sender<Reply>,
}

struct Pending {
    xid: i32,
    op: OpCode,
    reply: oneshot::Sender<Reply>,
}

/// Handle to a live connection. Dropping it stops both background tasks.
pub(crate) struct Connection {
    calls: mpsc::Sender<Call>,
    session_id: i64,
    negotiated_timeout: Duration,
    reader: JoinHandle<()>,
    actor: JoinHandle<()>,
}

impl Connection {
    /// Connect to one host and complete the session handshake.
    pub(crate) async fn open(host: &HostPort, session_timeout: Duration) -> SessionResult<Self> {
        let connect_err = |reason: String| SessionError::Connect {
            endpoint: host.to_string(),
            reason,
        };

        let mut stream = TcpStream::connect((host.host.as_str(), host.port))
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        stream.set_nodelay(true)?;

        let timeout_ms = i32::try_from(session_timeout.as_millis()).unwrap_or(i32::MAX);
        let hello = encode_record(&ConnectRequest::new_session(timeout_ms));
        FrameCodec::write_to(&mut stream, &hello)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        let frame = FrameCodec::read_from(&mut stream)
            .await
            .map_err(|e| connect_err(e.to_string()))?
            .ok_or_else(|| connect_err("server closed the connection during handshake".into()))?;
        let accepted: ConnectResponse =
            decode_record(frame).map_err(|e| connect_err(e.to_string()))?;
        if accepted.timeout_ms <= 0 {
            return Err(SessionError::SessionExpired);
        }

        let negotiated_timeout = Duration::from_millis(accepted.timeout_ms as u64);
        debug!(
            host = %host,
            session_id = %format!("{:#x}", accepted.session_id),
            timeout_ms = accepted.timeout_ms,
            "session handshake complete"
        );

        let (mut read_half, write_half) = stream.into_split();
        let (frames_tx, frames_rx) = mpsc::channel::<ProtocolResult<Bytes>>(64);
        let reader = tokio::spawn(async move {
            loop {
                match FrameCodec::read_from(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if frames_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = frames_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let (calls_tx, calls_rx) = mpsc::channel::<Call>(64);
        let ping_every = (negotiated_timeout / 3).max(Duration::from_millis(10));
        let read_timeout = negotiated_timeout * 2 / 3;
        let actor = tokio::spawn(run(write_half, frames_rx, calls_rx, ping_every, read_timeout));

        Ok(Self {
            calls: calls_tx,
            session_id: accepted.session_id,
            negotiated_timeout,
            reader,
            actor,
        })
    }

    pub(crate) fn session_id(&self) -> i64 {
        self.session_id
    }

    pub(crate) fn negotiated_timeout(&self) -> Duration {
        self.negotiated_timeout
    }

    /// Submit a request and wait for its reply.
    pub(crate) async fn call(&self, request: Request) -> Reply {
        let (tx, rx) = oneshot::channel();
        self.calls
            .send(Call { request, reply: tx })
            .await
            .map_err(|_| ReplyError::Connection("connection task has stopped".into()))?;
        rx.await
            .map_err(|_| ReplyError::Connection("connection task dropped the request".into()))?
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.actor.abort();
    }
}

async fn run(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<ProtocolResult<Bytes>>,
    mut calls: mpsc::Receiver<Call>,
    ping_every: Duration,
    read_timeout: Duration,
) {
    let mut pending: VecDeque<Pending> = VecDeque::new();
    let mut next_xid: i32 = 1;
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    let failure: String = loop {
        tokio::select! {
            call = calls.recv() => {
                let Some(Call { request, reply }) = call else {
                    break "session handle dropped".into();
                };
                let op = request.op_code();
                let xid = if op == OpCode::Auth {
                    xid::AUTH
                } else {
                    let xid = next_xid;
                    next_xid = next_xid.wrapping_add(1).max(1);
                    xid
                };
                let frame = match FrameCodec::encode(&encode_request(xid, &request)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(xid, op = ?op, error = %e, "request not sent");
                        let _ = reply.send(Err(ReplyError::Rejected(e.to_string())));
                        continue;
                    }
                };
                if let Err(e) = send_frame(&mut writer, &frame).await {
                    let reason = e.to_string();
                    let _ = reply.send(Err(ReplyError::Connection(reason.clone())));
                    break reason;
                }
                trace!(xid, op = ?op, "request sent");
                pending.push_back(Pending { xid, op, reply });
            }
            frame = frames.recv() => {
                let payload = match frame {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => break e.to_string(),
                    None => break "server closed the connection".into(),
                };
                last_heard = Instant::now();
                match dispatch(payload, &mut pending) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Closed) => break "session closed".into(),
                    Err(reason) => break reason,
                }
            }
            _ = tokio::time::sleep_until(last_heard + read_timeout) => {
                break format!(
                    "no response from server for {}ms",
                    last_heard.elapsed().as_millis()
                );
            }
            _ = ping.tick() => {
                let payload = encode_request(xid::PING, &Request::Ping);
                if let Err(e) = FrameCodec::write_to(&mut writer, &payload).await {
                    break e.to_string();
                }
                trace!("ping sent");
            }
        }
    };

    if !pending.is_empty() {
        warn!(pending = pending.len(), reason = %failure, "connection ended with requests in flight");
    }
    for call in pending.drain(..) {
        let _ = call.reply.send(Err(ReplyError::Connection(failure.clone())));
    }
    debug!(reason = %failure, "connection task finished");
}

enum Flow {
    Continue,
    Closed,
}

fn dispatch(payload: Bytes, pending: &mut VecDeque<Pending>) -> Result<Flow, String> {
    let (header, mut body) = decode_reply_header(payload).map_err(|e| e.to_string())?;
    match header.xid {
        xid::PING => return Ok(Flow::Continue),
        xid::WATCH_EVENT => {
            // No watches are set; a stray notification is logged and dropped.
            let event: WatcherEvent = body.read_record().map_err(|e| e.to_string())?;
            trace!(path = %event.path, event_type = event.event_type, "ignoring watch notification");
            return Ok(Flow::Continue);
        }
        _ => {}
    }

    let call = pending
        .pop_front()
        .ok_or_else(|| format!("unexpected reply xid {}", header.xid))?;
    if call.xid != header.xid {
        let reason = format!("reply xid {} does not match request xid {}", header.xid, call.xid);
        let _ = call.reply.send(Err(ReplyError::Connection(reason.clone())));
        return Err(reason);
    }

    let reply = if header.err != codes::OK {
        Err(ReplyError::Server(header.err))
    } else {
        Response::read_body(call.op, &mut body).map_err(ReplyError::from)
    };
    let closed = call.op == OpCode::CloseSession;
    let _ = call.reply.send(reply);
    Ok(if closed { Flow::Closed } else { Flow::Continue })
}

async fn send_frame(writer: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
