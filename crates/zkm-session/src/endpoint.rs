//! Endpoint strings: `host[:port][,host[:port]...][/chroot]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zkm_types::path::{validate_path, ROOT};

use crate::error::{SessionError, SessionResult};

pub const DEFAULT_PORT: u16 = 2181;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A parsed cluster endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub hosts: Vec<HostPort>,
    /// Path that every operation is scoped under. `None` is the real root.
    pub chroot: Option<String>,
}

impl Endpoint {
    /// Parse an endpoint descriptor.
    ///
    /// ```
    /// use zkm_session::Endpoint;
    ///
    /// let ep = Endpoint::parse("zk1:2181,zk2/nifi").unwrap();
    /// assert_eq!(ep.hosts.len(), 2);
    /// assert_eq!(ep.hosts[1].port, 2181);
    /// assert_eq!(ep.chroot.as_deref(), Some("/nifi"));
    /// ```
    pub fn parse(input: &str) -> SessionResult<Self> {
        let invalid = |reason: String| SessionError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        let (hosts_part, chroot_part) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], Some(&trimmed[idx..])),
            None => (trimmed, None),
        };

        if hosts_part.is_empty() {
            return Err(invalid("no hosts".into()));
        }

        let mut hosts = Vec::new();
        for raw in hosts_part.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(invalid("empty host entry".into()));
            }
            hosts.push(parse_host_port(raw).map_err(invalid)?);
        }

        let chroot = match chroot_part {
            None => None,
            Some(ROOT) => None,
            Some(path) => {
                validate_path(path).map_err(|e| invalid(e.to_string()))?;
                Some(path.to_string())
            }
        };

        Ok(Self { hosts, chroot })
    }

    /// Host list without the chroot, as sent to the transport.
    pub fn connect_string(&self) -> String {
        self.hosts
            .iter()
            .map(HostPort::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }

    /// Whether two endpoints address the same subtree of the same cluster.
    pub fn same_target(&self, other: &Endpoint) -> bool {
        let mut a = self.hosts.clone();
        let mut b = other.hosts.clone();
        a.sort_by(|x, y| (&x.host, x.port).cmp(&(&y.host, y.port)));
        b.sort_by(|x, y| (&x.host, x.port).cmp(&(&y.host, y.port)));
        a == b && self.chroot == other.chroot
    }
}

fn parse_host_port(raw: &str) -> Result<HostPort, String> {
    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 literal in {raw:?}"))?;
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(format!("unexpected text after IPv6 literal in {raw:?}")),
            },
        }
    } else {
        match raw.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };

    if host.is_empty() {
        return Err(format!("empty host in {raw:?}"));
    }
    let port = match port {
        None => DEFAULT_PORT,
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err(format!("invalid port {p:?}")),
            Ok(port) => port,
        },
    };
    Ok(HostPort {
        host: host.to_string(),
        port,
    })
}

impl FromStr for Endpoint {
    type Err = SessionError;

    fn from_str(s: &str) -> SessionResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connect_string())?;
        if let Some(chroot) = &self.chroot {
            write!(f, "{chroot}")?;
        }
        Ok(())
    }
}
