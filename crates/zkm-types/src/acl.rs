use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Permission bitmask attached to an ACL entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Perms(u32);

impl Perms {
    pub const READ: Perms = Perms(1);
    pub const WRITE: Perms = Perms(1 << 1);
    pub const CREATE: Perms = Perms(1 << 2);
    pub const DELETE: Perms = Perms(1 << 3);
    pub const ADMIN: Perms = Perms(1 << 4);
    pub const ALL: Perms = Perms(0b1_1111);
    pub const NONE: Perms = Perms(0);

    /// Build from raw bits, rejecting bits outside [`Perms::ALL`].
    pub fn from_bits(bits: u32) -> TypeResult<Self> {
        if bits & !Self::ALL.0 != 0 {
            return Err(TypeError::InvalidPerms(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit in `other` is granted.
    pub fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Perms) -> Perms {
        Perms(self.0 | other.0)
    }
}

impl TryFrom<u32> for Perms {
    type Error = TypeError;

    fn try_from(bits: u32) -> TypeResult<Self> {
        Self::from_bits(bits)
    }
}

impl From<Perms> for u32 {
    fn from(perms: Perms) -> u32 {
        perms.0
    }
}

/// Renders in the `cdrwa` letter form used by the server's CLI.
impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = [
            (Perms::CREATE, 'c'),
            (Perms::DELETE, 'd'),
            (Perms::READ, 'r'),
            (Perms::WRITE, 'w'),
            (Perms::ADMIN, 'a'),
        ];
        for (perm, letter) in letters {
            if self.contains(perm) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// Authentication identity: a scheme and a scheme-specific id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
    pub scheme: String,
    pub id: String,
}

impl Id {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// `world:anyone`, matching every session.
    pub fn anyone() -> Self {
        Self::new("world", "anyone")
    }

    /// `auth:` placeholder, expanded to the creating session's identities.
    pub fn auth() -> Self {
        Self::new("auth", "")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

/// One ACL entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: Perms,
    #[serde(flatten)]
    pub id: Id,
}

impl Acl {
    pub fn new(perms: Perms, id: Id) -> Self {
        Self { perms, id }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.perms)
    }
}

/// Fully open ACL: `world:anyone` with every permission.
pub fn open_acl_unsafe() -> Vec<Acl> {
    vec![Acl::new(Perms::ALL, Id::anyone())]
}

/// World-readable ACL.
pub fn read_acl_unsafe() -> Vec<Acl> {
    vec![Acl::new(Perms::READ, Id::anyone())]
}

/// Every permission for the creating session's identities.
pub fn creator_all_acl() -> Vec<Acl> {
    vec![Acl::new(Perms::ALL, Id::auth())]
}

/// Render an ACL list as `scheme:id:perms` entries separated by commas.
pub fn display_acl(acl: &[Acl]) -> String {
    acl.iter().map(Acl::to_string).collect::<Vec<_>>().join(",")
}
