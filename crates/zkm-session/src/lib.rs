//! Sessions against coordination trees.
//!
//! This crate turns endpoint descriptors and credentials into live
//! [`TreeSession`]s. The export and import engines only ever see the trait;
//! the wire client and the in-memory tree both implement it.
//!
//! # Key Types
//!
//! - [`Endpoint`]: Parsed `host:port[,host:port][/chroot]` descriptor
//! - [`AuthMode`]: Open, digest, or SASL (JAAS-configured) authentication
//! - [`EndpointResolver`]: Opens sessions through a [`SessionFactory`] under a timeout
//! - [`InMemoryTree`]: A namespace held in memory, with ACL and ephemeral semantics

pub mod auth;
pub mod endpoint;
pub mod error;
pub mod jaas;
pub mod memory;
pub mod session;

pub use auth::{digest_id, AuthMode, DigestCredential, SaslCredential, DEFAULT_JAAS_SECTION};
pub use endpoint::{Endpoint, HostPort, DEFAULT_PORT};
pub use error::{SessionError, SessionResult};
pub use jaas::{JaasConfig, LoginModuleEntry};
pub use memory::{InMemoryTree, MemorySession, MemorySessionFactory};
pub use session::{ConnectOptions, EndpointResolver, SessionFactory, TreeSession};
