//! Network sessions for zk-migrator.
//!
//! [`ZkSessionFactory`] dials the hosts of an [`Endpoint`](zkm_session::Endpoint)
//! in random order, completes the session handshake on the first that
//! answers and authenticates before handing back a [`ZkSession`]: digest
//! credentials go out as an auth packet, JAAS-configured logins run a SASL
//! exchange (`DIGEST-MD5`, or `GSSAPI` with the `gssapi` feature). A
//! background task per connection keeps the session alive with pings,
//! matches replies to requests in order and gives up on a silent server.

mod connection;
pub mod error;
mod sasl;
pub mod session;

pub use error::from_code;
pub use session::{ZkSession, ZkSessionFactory};
