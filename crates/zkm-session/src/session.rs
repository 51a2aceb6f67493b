use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use zkm_types::{Acl, CreateMode, NodeSnapshot};

use crate::auth::AuthMode;
use crate::endpoint::Endpoint;
use crate::error::{SessionError, SessionResult};

/// An authenticated session against one tree.
///
/// Paths are absolute within the session's chroot. Read operations return
/// `Ok(None)` when the node does not exist so callers can treat a vanished
/// node as absent without matching on errors.
#[async_trait]
pub trait TreeSession: Send + Sync {
    /// Human-readable target, used in logs and errors.
    fn describe(&self) -> String;

    /// Read a node's data, ACL and ownership.
    async fn get_node(&self, path: &str) -> SessionResult<Option<NodeSnapshot>>;

    /// Names (not paths) of a node's direct children, unsorted.
    async fn get_children(&self, path: &str) -> SessionResult<Option<Vec<String>>>;

    async fn exists(&self, path: &str) -> SessionResult<bool>;

    /// Create a node. Fails with `NoNode` when the parent is missing and
    /// `NodeExists` when the path is taken.
    async fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode)
        -> SessionResult<()>;

    /// Overwrite a node's data regardless of its version.
    async fn set_data(&self, path: &str, data: &[u8]) -> SessionResult<()>;

    /// Overwrite a node's ACL regardless of its version.
    async fn set_acl(&self, path: &str, acl: &[Acl]) -> SessionResult<()>;

    /// Make sure the chroot path exists, creating missing ancestors with an
    /// open ACL. No-op without a chroot.
    async fn ensure_root(&self) -> SessionResult<()>;

    /// End the session. Ephemeral nodes it owns are removed.
    async fn close(&self) -> SessionResult<()>;
}

/// Opens sessions for endpoints.
///
/// Credentials arrive fully resolved in [`AuthMode`]; factories must not
/// depend on process-wide security settings.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        auth: &AuthMode,
        session_timeout: Duration,
    ) -> SessionResult<Box<dyn TreeSession>>;
}

/// Timeouts applied while opening sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            session_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns endpoint strings into authenticated sessions.
#[derive(Clone, Debug, Default)]
pub struct EndpointResolver {
    options: ConnectOptions,
}

impl EndpointResolver {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn resolve(&self, descriptor: &str) -> SessionResult<Endpoint> {
        Endpoint::parse(descriptor)
    }

    /// Open a session, bounded by the connect timeout.
    pub async fn connect(
        &self,
        factory: &dyn SessionFactory,
        endpoint: &Endpoint,
        auth: &AuthMode,
    ) -> SessionResult<Box<dyn TreeSession>> {
        let attempt = factory.connect(endpoint, auth, self.options.session_timeout);
        match tokio::time::timeout(self.options.connect_timeout, attempt).await {
            Ok(Ok(session)) => {
                info!(endpoint = %endpoint, auth = auth.display_name(), "session established");
                Ok(session)
            }
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "session failed");
                Err(e)
            }
            Err(_) => Err(SessionError::Timeout(format!(
                "connecting to {endpoint} after {:?}",
                self.options.connect_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverConnects;

    #[async_trait]
    impl SessionFactory for NeverConnects {
        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _auth: &AuthMode,
            _session_timeout: Duration,
        ) -> SessionResult<Box<dyn TreeSession>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn connect_times_out() {
        let resolver = EndpointResolver::new(ConnectOptions {
            connect_timeout: Duration::from_millis(50),
            session_timeout: Duration::from_secs(1),
        });
        let endpoint = resolver.resolve("nowhere:2181").unwrap();
        let err = resolver
            .connect(&NeverConnects, &endpoint, &AuthMode::Open)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Timeout(_)));
    }

    #[test]
    fn default_options() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.connect_timeout, Duration::from_secs(15));
        assert_eq!(opts.session_timeout, Duration::from_secs(30));
    }
}
