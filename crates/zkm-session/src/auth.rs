use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use zkm_types::Id;

use crate::error::{SessionError, SessionResult};
use crate::jaas::JaasConfig;

/// Section read from a JAAS file when none is named.
pub const DEFAULT_JAAS_SECTION: &str = "Client";

const KERBEROS_MODULE: &str = "com.sun.security.auth.module.Krb5LoginModule";
const DIGEST_MODULE: &str = "org.apache.zookeeper.server.auth.DigestLoginModule";

/// `digest` identity id for a username and password:
/// `username:base64(sha1("username:password"))`.
pub fn digest_id(username: &str, password: &str) -> String {
    let hash = Sha1::digest(format!("{username}:{password}").as_bytes());
    format!("{username}:{}", STANDARD.encode(hash))
}

/// Username/password pair for `digest` authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct DigestCredential {
    pub username: String,
    password: String,
}

impl DigestCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> SessionResult<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::InvalidCredential(
                "username and password must both be non-empty".into(),
            ));
        }
        Ok(Self { username, password })
    }

    /// Parse `username:password` bytes, splitting on the first `:`.
    pub fn parse(raw: &[u8]) -> SessionResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| SessionError::InvalidCredential("credential is not UTF-8".into()))?;
        let (user, pass) = text.split_once(':').ok_or_else(|| {
            SessionError::InvalidCredential("expected username:password".into())
        })?;
        Self::new(user, pass)
    }

    /// Bytes sent in the `digest` auth packet.
    pub fn auth_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.username, self.password).into_bytes()
    }

    pub fn identity(&self) -> Id {
        Id::new("digest", digest_id(&self.username, &self.password))
    }
}

impl fmt::Debug for DigestCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login settings resolved from a JAAS file, passed to the session factory.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredential {
    pub jaas_path: PathBuf,
    pub section: String,
    pub login_module: String,
    pub options: BTreeMap<String, String>,
}

impl SaslCredential {
    /// Resolve the `Client` section of a JAAS file.
    pub fn from_jaas_file(path: &Path) -> SessionResult<Self> {
        Self::from_jaas_section(path, DEFAULT_JAAS_SECTION)
    }

    pub fn from_jaas_section(path: &Path, section: &str) -> SessionResult<Self> {
        let config = JaasConfig::load(path)?;
        let jaas_err = |reason: String| SessionError::Jaas {
            path: path.display().to_string(),
            reason,
        };
        let entries = config
            .section(section)
            .ok_or_else(|| jaas_err(format!("no {section} section")))?;
        let entry = entries
            .first()
            .ok_or_else(|| jaas_err(format!("section {section} has no login module")))?;
        Ok(Self {
            jaas_path: path.to_path_buf(),
            section: section.to_string(),
            login_module: entry.class.clone(),
            options: entry.options.clone(),
        })
    }

    pub fn is_kerberos(&self) -> bool {
        self.login_module == KERBEROS_MODULE
    }

    /// Username/password login, negotiated as `DIGEST-MD5`.
    pub fn is_digest(&self) -> bool {
        self.login_module == DIGEST_MODULE
    }

    /// SASL mechanism name implied by the login module.
    pub fn mechanism(&self) -> Option<&'static str> {
        if self.is_kerberos() {
            Some("GSSAPI")
        } else if self.is_digest() {
            Some("DIGEST-MD5")
        } else {
            None
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.options.get("username").map(String::as_str)
    }

    pub fn password(&self) -> Option<&str> {
        self.options.get("password").map(String::as_str)
    }

    pub fn principal(&self) -> Option<&str> {
        self.options.get("principal").map(String::as_str)
    }

    pub fn keytab(&self) -> Option<&str> {
        self.options.get("keyTab").map(String::as_str)
    }

    pub fn uses_ticket_cache(&self) -> bool {
        self.options
            .get("useTicketCache")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Identity the server assigns once SASL succeeds.
    pub fn identity(&self) -> Option<Id> {
        self.principal()
            .or_else(|| self.username())
            .map(|name| Id::new("sasl", name))
    }
}

impl fmt::Debug for SaslCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&String> = self.options.keys().collect();
        f.debug_struct("SaslCredential")
            .field("jaas_path", &self.jaas_path)
            .field("section", &self.section)
            .field("login_module", &self.login_module)
            .field("option_keys", &keys)
            .finish()
    }
}

/// How a session authenticates. Exactly one mode per session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    Open,
    Digest(DigestCredential),
    Sasl(SaslCredential),
}

impl AuthMode {
    /// Build from the two mutually exclusive command-line inputs.
    pub fn from_options(digest: Option<&str>, jaas: Option<&Path>) -> SessionResult<Self> {
        match (digest, jaas) {
            (Some(_), Some(_)) => Err(SessionError::InvalidCredential(
                "digest and SASL authentication are mutually exclusive".into(),
            )),
            (Some(raw), None) => Ok(Self::Digest(DigestCredential::parse(raw.as_bytes())?)),
            (None, Some(path)) => Ok(Self::Sasl(SaslCredential::from_jaas_file(path)?)),
            (None, None) => Ok(Self::Open),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Digest(_) => "digest",
            Self::Sasl(_) => "sasl",
        }
    }

    /// Identities a session holds after authenticating in this mode.
    pub fn identities(&self) -> Vec<Id> {
        match self {
            Self::Open => Vec::new(),
            Self::Digest(cred) => vec![cred.identity()],
            Self::Sasl(cred) => cred.identity().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_id_matches_server_format() {
        // Known value produced by the server's DigestAuthenticationProvider.
        assert_eq!(digest_id("super", "test"), "super:D/InIHSb7yEEbrWz8b9l71RjZJU=");
    }

    #[test]
    fn digest_parse_splits_on_first_colon() {
        let cred = DigestCredential::parse(b"alice:pa:ss").unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.auth_bytes(), b"alice:pa:ss");
        assert_eq!(cred.identity().scheme, "digest");
    }

    #[test]
    fn digest_parse_rejects_bad_input() {
        assert!(DigestCredential::parse(b"nocolon").is_err());
        assert!(DigestCredential::parse(b":pass").is_err());
        assert!(DigestCredential::parse(b"user:").is_err());
        assert!(DigestCredential::parse(&[0xff, b':', b'x']).is_err());
    }

    #[test]
    fn digest_debug_redacts_password() {
        let cred = DigestCredential::new("bob", "hunter2").unwrap();
        let dbg = format!("{cred:?}");
        assert!(dbg.contains("bob"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        let err = AuthMode::from_options(Some("a:b"), Some(Path::new("/tmp/jaas.conf"))).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredential(_)));
        assert_eq!(AuthMode::from_options(None, None).unwrap(), AuthMode::Open);
        assert_eq!(AuthMode::from_options(Some("a:b"), None).unwrap().display_name(), "digest");
    }

    #[test]
    fn sasl_from_jaas_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Client {{ com.sun.security.auth.module.Krb5LoginModule required useKeyTab=true keyTab=\"/k.keytab\" useTicketCache=true principal=\"zk@EX.COM\"; }};"
        )
        .unwrap();
        let mode = AuthMode::from_options(None, Some(file.path())).unwrap();
        let AuthMode::Sasl(cred) = &mode else { panic!("expected sasl") };
        assert!(cred.is_kerberos());
        assert!(cred.uses_ticket_cache());
        assert_eq!(cred.keytab(), Some("/k.keytab"));
        assert_eq!(mode.identities(), vec![Id::new("sasl", "zk@EX.COM")]);
        assert_eq!(cred.mechanism(), Some("GSSAPI"));
    }

    #[test]
    fn sasl_digest_login_module() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Client {{ org.apache.zookeeper.server.auth.DigestLoginModule required username=\"bob\" password=\"pw\"; }};"
        )
        .unwrap();
        let cred = SaslCredential::from_jaas_file(file.path()).unwrap();
        assert!(cred.is_digest());
        assert_eq!(cred.mechanism(), Some("DIGEST-MD5"));
        assert_eq!((cred.username(), cred.password()), (Some("bob"), Some("pw")));
        assert_eq!(cred.identity(), Some(Id::new("sasl", "bob")));
        assert!(!format!("{cred:?}").contains("\"pw\""));
    }

    #[test]
    fn sasl_missing_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Other {{ a.B required; }};").unwrap();
        let err = SaslCredential::from_jaas_file(file.path()).unwrap_err();
        assert!(matches!(err, SessionError::Jaas { .. }));
    }

    #[test]
    fn open_has_no_identities() {
        assert!(AuthMode::Open.identities().is_empty());
    }
}
