//! Foundation types for zk-migrator.
//!
//! Every other zk-migrator crate depends on `zkm-types` for the shape of a
//! captured node and the rules that govern paths and permissions.
//!
//! # Key Types
//!
//! - [`NodeRecord`]: One exported node: path, payload, ACL, ephemeral flag
//! - [`NodeSnapshot`]: A node as read from a live tree
//! - [`Acl`], [`Id`], [`Perms`]: Access control entries
//! - [`CreateMode`]: Persistent or ephemeral creation

pub mod acl;
pub mod error;
pub mod path;
pub mod record;

pub use acl::{creator_all_acl, display_acl, open_acl_unsafe, read_acl_unsafe, Acl, Id, Perms};
pub use error::{TypeError, TypeResult};
pub use record::{CreateMode, NodeRecord, NodeSnapshot};
