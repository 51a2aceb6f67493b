use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use zkm_protocol::{codes, Request, Response};
use zkm_session::{
    AuthMode, Endpoint, HostPort, SaslCredential, SessionError, SessionFactory, SessionResult,
    TreeSession,
};
use zkm_types::path::{self, prepend_chroot, validate_path};
use zkm_types::{open_acl_unsafe, Acl, CreateMode, NodeSnapshot};

use crate::connection::Connection;
use crate::error::{from_code, ReplyError};
use crate::sasl::{self, SaslMechanism};

/// A session on a live cluster.
///
/// Paths given to the [`TreeSession`] methods are relative to the
/// endpoint's chroot; the prefix is added before anything goes on the wire.
pub struct ZkSession {
    conn: Connection,
    chroot: Option<String>,
    target: String,
    closed: AtomicBool,
}

impl ZkSession {
    pub fn session_id(&self) -> i64 {
        self.conn.session_id()
    }

    pub fn negotiated_timeout(&self) -> Duration {
        self.conn.negotiated_timeout()
    }

    fn full_path(&self, path: &str) -> SessionResult<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        validate_path(path).map_err(|_| SessionError::Server {
            code: codes::BAD_ARGUMENTS,
            path: path.to_string(),
        })?;
        Ok(prepend_chroot(self.chroot.as_deref(), path))
    }

    fn map_err(&self, e: ReplyError, path: &str) -> SessionError {
        match e {
            ReplyError::Server(code) => from_code(code, path),
            ReplyError::Connection(_) if self.closed.load(Ordering::Acquire) => SessionError::Closed,
            ReplyError::Connection(reason) => SessionError::ConnectionLoss(reason),
            ReplyError::Rejected(reason) => SessionError::RequestRejected {
                path: path.to_string(),
                reason,
            },
        }
    }

    async fn request(&self, request: Request, path: &str) -> SessionResult<Response> {
        self.conn.call(request).await.map_err(|e| self.map_err(e, path))
    }

    /// Like [`request`](Self::request) but a `NoNode` reply becomes `None`.
    async fn request_if_exists(&self, request: Request, path: &str) -> SessionResult<Option<Response>> {
        match self.conn.call(request).await {
            Ok(response) => Ok(Some(response)),
            Err(ReplyError::Server(codes::NO_NODE)) => Ok(None),
            Err(e) => Err(self.map_err(e, path)),
        }
    }

    async fn authenticate(&self, auth: &AuthMode, host: &HostPort) -> SessionResult<()> {
        let cred = match auth {
            AuthMode::Open => return Ok(()),
            AuthMode::Sasl(cred) => return self.authenticate_sasl(cred, host).await,
            AuthMode::Digest(cred) => cred,
        };
        let request = Request::Auth {
            auth_type: 0,
            scheme: "digest".into(),
            auth: cred.auth_bytes(),
        };
        match self.conn.call(request).await {
            Ok(_) => Ok(()),
            Err(ReplyError::Server(codes::AUTH_FAILED)) => Err(SessionError::AuthFailed(format!(
                "digest credentials for {} rejected",
                cred.username
            ))),
            Err(e) => Err(self.map_err(e, "/")),
        }
    }

    /// Run the token exchange until the mechanism completes.
    async fn authenticate_sasl(&self, cred: &SaslCredential, host: &HostPort) -> SessionResult<()> {
        let mut mechanism: Box<dyn SaslMechanism> = sasl::mechanism_for(cred, host)?;
        let mut outgoing = Some(mechanism.initial_response()?);
        while let Some(token) = outgoing.take() {
            let challenge = match self.conn.call(Request::Sasl { token }).await {
                Ok(Response::Sasl { token }) => token,
                Ok(_) => return Err(unexpected("/")),
                Err(ReplyError::Server(codes::AUTH_FAILED)) => {
                    return Err(SessionError::AuthFailed(format!(
                        "{} login from JAAS section {} rejected",
                        mechanism.name(),
                        cred.section
                    )))
                }
                Err(e) => return Err(self.map_err(e, "/")),
            };
            if mechanism.is_complete() {
                break;
            }
            outgoing = mechanism.evaluate(&challenge)?;
        }
        if !mechanism.is_complete() {
            return Err(SessionError::AuthFailed(format!(
                "{} exchange ended before completion",
                mechanism.name()
            )));
        }
        debug!(mechanism = mechanism.name(), section = %cred.section, "SASL authentication complete");
        Ok(())
    }
}

fn unexpected(path: &str) -> SessionError {
    SessionError::ConnectionLoss(format!("unexpected response shape for {path}"))
}

#[async_trait]
impl TreeSession for ZkSession {
    fn describe(&self) -> String {
        self.target.clone()
    }

    async fn get_node(&self, path: &str) -> SessionResult<Option<NodeSnapshot>> {
        let full = self.full_path(path)?;
        let data_req = Request::GetData {
            path: full.clone(),
            watch: false,
        };
        let Some(Response::GetData { data, stat }) = self.request_if_exists(data_req, path).await? else {
            return Ok(None);
        };
        // The node may vanish between the two reads.
        let acl_req = Request::GetAcl { path: full };
        let Some(response) = self.request_if_exists(acl_req, path).await? else {
            return Ok(None);
        };
        let Response::GetAcl { acl, .. } = response else {
            return Err(unexpected(path));
        };
        Ok(Some(NodeSnapshot {
            data,
            acl,
            ephemeral_owner: stat.ephemeral_owner,
            num_children: stat.num_children,
        }))
    }

    async fn get_children(&self, path: &str) -> SessionResult<Option<Vec<String>>> {
        let full = self.full_path(path)?;
        let request = Request::GetChildren { path: full, watch: false };
        match self.request_if_exists(request, path).await? {
            None => Ok(None),
            Some(Response::GetChildren { children }) => Ok(Some(children)),
            Some(_) => Err(unexpected(path)),
        }
    }

    async fn exists(&self, path: &str) -> SessionResult<bool> {
        let full = self.full_path(path)?;
        let request = Request::Exists { path: full, watch: false };
        Ok(self.request_if_exists(request, path).await?.is_some())
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> SessionResult<()> {
        let full = self.full_path(path)?;
        let request = Request::Create {
            path: full,
            data: data.to_vec(),
            acl: acl.to_vec(),
            flags: mode.flag(),
        };
        self.request(request, path).await.map(|_| ())
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> SessionResult<()> {
        let full = self.full_path(path)?;
        let request = Request::SetData {
            path: full,
            data: data.to_vec(),
            version: -1,
        };
        self.request(request, path).await.map(|_| ())
    }

    async fn set_acl(&self, path: &str, acl: &[Acl]) -> SessionResult<()> {
        let full = self.full_path(path)?;
        let request = Request::SetAcl {
            path: full,
            acl: acl.to_vec(),
            version: -1,
        };
        self.request(request, path).await.map(|_| ())
    }

    async fn ensure_root(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let Some(chroot) = self.chroot.clone() else {
            return Ok(());
        };
        let mut chain = path::ancestors(&chroot);
        chain.push(chroot);
        for full in chain {
            // Creating an existing node still needs CREATE on its parent.
            let lookup = Request::Exists {
                path: full.clone(),
                watch: false,
            };
            match self.conn.call(lookup).await {
                Ok(_) => continue,
                Err(ReplyError::Server(codes::NO_NODE)) => {}
                Err(e) => return Err(self.map_err(e, &full)),
            }
            let request = Request::Create {
                path: full.clone(),
                data: Vec::new(),
                acl: open_acl_unsafe(),
                flags: CreateMode::Persistent.flag(),
            };
            match self.conn.call(request).await {
                Ok(_) => debug!(path = %full, "created chroot node"),
                Err(ReplyError::Server(codes::NODE_EXISTS)) => {}
                Err(e) => return Err(self.map_err(e, &full)),
            }
        }
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let reply = tokio::time::timeout(self.negotiated_timeout(), self.conn.call(Request::CloseSession));
        match reply.await {
            Ok(Ok(_)) => {
                debug!(endpoint = %self.target, "session closed");
                Ok(())
            }
            // Nothing left to close.
            Ok(Err(ReplyError::Connection(reason))) => {
                debug!(endpoint = %self.target, %reason, "connection already gone at close");
                Ok(())
            }
            Ok(Err(ReplyError::Server(code))) => Err(from_code(code, "/")),
            Ok(Err(ReplyError::Rejected(reason))) => Err(SessionError::RequestRejected {
                path: "/".into(),
                reason,
            }),
            Err(_) => {
                warn!(endpoint = %self.target, "no reply to close; dropping the connection");
                Ok(())
            }
        }
    }
}

/// Opens [`ZkSession`]s over TCP.
#[derive(Clone, Debug, Default)]
pub struct ZkSessionFactory;

impl ZkSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for ZkSessionFactory {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        auth: &AuthMode,
        session_timeout: Duration,
    ) -> SessionResult<Box<dyn TreeSession>> {
        let mut hosts = endpoint.hosts.clone();
        hosts.shuffle(&mut rand::thread_rng());

        let mut last_error = None;
        let mut conn = None;
        for host in &hosts {
            match Connection::open(host, session_timeout).await {
                Ok(c) => {
                    conn = Some((c, host));
                    break;
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "host unavailable, trying next");
                    last_error = Some(e);
                }
            }
        }
        let Some((conn, host)) = conn else {
            return Err(match last_error {
                Some(SessionError::SessionExpired) => SessionError::SessionExpired,
                Some(e) => SessionError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                },
                None => SessionError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "no hosts".into(),
                },
            });
        };

        let session = ZkSession {
            conn,
            chroot: endpoint.chroot.clone(),
            target: endpoint.to_string(),
            closed: AtomicBool::new(false),
        };
        session.authenticate(auth, host).await?;
        info!(
            endpoint = %session.target,
            session_id = %format!("{:#x}", session.session_id()),
            "connected"
        );
        Ok(Box::new(session))
    }
}
