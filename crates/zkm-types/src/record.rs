use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::error::TypeResult;
use crate::path::validate_path;

/// How a node is created on the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    #[default]
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
}

impl CreateMode {
    /// Flag value used on the wire.
    pub fn flag(self) -> i32 {
        match self {
            Self::Persistent => 0,
            Self::Ephemeral => 1,
        }
    }

    pub fn from_flag(flag: i32) -> Option<Self> {
        match flag {
            0 => Some(Self::Persistent),
            1 => Some(Self::Ephemeral),
            _ => None,
        }
    }
}

/// One captured tree node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub path: String,
    pub data: Vec<u8>,
    pub acl: Vec<Acl>,
    pub ephemeral: bool,
}

impl NodeRecord {
    /// Build a persistent record, validating the path.
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>, acl: Vec<Acl>) -> TypeResult<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            data: data.into(),
            acl,
            ephemeral: false,
        })
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn parent(&self) -> Option<&str> {
        crate::path::parent(&self.path)
    }
}

/// A node as read from a live tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub data: Vec<u8>,
    pub acl: Vec<Acl>,
    /// Owning session id for ephemeral nodes, zero otherwise.
    pub ephemeral_owner: i64,
    pub num_children: i32,
}

impl NodeSnapshot {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }

    pub fn into_record(self, path: impl Into<String>) -> NodeRecord {
        let ephemeral = self.is_ephemeral();
        NodeRecord {
            path: path.into(),
            data: self.data,
            acl: self.acl,
            ephemeral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::open_acl_unsafe;

    #[test]
    fn record_validates_path() {
        assert!(NodeRecord::new("/a", b"x".to_vec(), open_acl_unsafe()).is_ok());
        assert!(NodeRecord::new("a", Vec::new(), open_acl_unsafe()).is_err());
    }

    #[test]
    fn record_parent() {
        let rec = NodeRecord::new("/a/b", Vec::new(), vec![]).unwrap();
        assert_eq!(rec.parent(), Some("/a"));
    }

    #[test]
    fn snapshot_into_record_keeps_ephemeral_flag() {
        let snap = NodeSnapshot {
            data: b"v".to_vec(),
            acl: open_acl_unsafe(),
            ephemeral_owner: 0x1234,
            num_children: 0,
        };
        let rec = snap.into_record("/lock");
        assert!(rec.ephemeral);
        assert_eq!(rec.data, b"v");
    }

    #[test]
    fn create_mode_flags() {
        assert_eq!(CreateMode::from_flag(CreateMode::Ephemeral.flag()), Some(CreateMode::Ephemeral));
        assert_eq!(CreateMode::from_flag(2), None);
    }
}
