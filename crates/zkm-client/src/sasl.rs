//! Client side of the `sasl` request (op 102).
//!
//! The client sends an initial token, the server answers each token with a
//! challenge, and the exchange ends once the mechanism reports completion.
//! `DIGEST-MD5` backs the `DigestLoginModule` JAAS entry; `GSSAPI` backs
//! `Krb5LoginModule` and needs the `gssapi` feature.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use zkm_session::{HostPort, SaslCredential, SessionError, SessionResult};

/// Service name the servers register under.
pub(crate) const SERVICE: &str = "zookeeper";

/// Server name the servers use for `DIGEST-MD5`.
const DIGEST_SERVER_NAME: &str = "zk-sasl-md5";

pub(crate) trait SaslMechanism: Send {
    fn name(&self) -> &'static str;

    /// First token, sent before any challenge. May be empty.
    fn initial_response(&mut self) -> SessionResult<Vec<u8>>;

    /// Answer a server challenge. `None` when nothing more is to be sent.
    fn evaluate(&mut self, challenge: &[u8]) -> SessionResult<Option<Vec<u8>>>;

    fn is_complete(&self) -> bool;
}

/// Pick the mechanism implied by the JAAS login module.
pub(crate) fn mechanism_for(cred: &SaslCredential, host: &HostPort) -> SessionResult<Box<dyn SaslMechanism>> {
    if cred.is_digest() {
        let (Some(username), Some(password)) = (cred.username(), cred.password()) else {
            return Err(SessionError::InvalidCredential(format!(
                "JAAS section {} needs username and password for DIGEST-MD5",
                cred.section
            )));
        };
        return Ok(Box::new(DigestMd5::new(username, password)));
    }
    if cred.is_kerberos() {
        return kerberos(cred, host);
    }
    Err(SessionError::UnsupportedAuth(format!(
        "no SASL mechanism for login module {}",
        cred.login_module
    )))
}

#[cfg(feature = "gssapi")]
fn kerberos(cred: &SaslCredential, host: &HostPort) -> SessionResult<Box<dyn SaslMechanism>> {
    if cred.keytab().is_some() && !cred.uses_ticket_cache() {
        tracing::warn!(
            section = %cred.section,
            "keyTab is not read directly; credentials come from the ticket cache"
        );
    }
    Ok(Box::new(gssapi::Gssapi::new(cred.principal(), &host.host)?))
}

#[cfg(not(feature = "gssapi"))]
fn kerberos(cred: &SaslCredential, _host: &HostPort) -> SessionResult<Box<dyn SaslMechanism>> {
    Err(SessionError::UnsupportedAuth(format!(
        "Kerberos login module in JAAS section {} needs a build with the gssapi feature",
        cred.section
    )))
}

/// RFC 2831 `DIGEST-MD5` with `qop=auth`.
pub(crate) struct DigestMd5 {
    username: String,
    password: String,
    cnonce: String,
    expected_rspauth: Option<String>,
    complete: bool,
}

impl DigestMd5 {
    pub(crate) fn new(username: &str, password: &str) -> Self {
        let cnonce = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_cnonce(username, password, cnonce)
    }

    fn with_cnonce(username: &str, password: &str, cnonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            cnonce,
            expected_rspauth: None,
            complete: false,
        }
    }

    fn respond(&mut self, challenge: &BTreeMap<String, String>) -> SessionResult<Vec<u8>> {
        let nonce = challenge
            .get("nonce")
            .ok_or_else(|| SessionError::AuthFailed("DIGEST-MD5 challenge without nonce".into()))?;
        let offers_auth = challenge
            .get("qop")
            .map_or(true, |qop| qop.split(',').any(|q| q.trim() == "auth"));
        if !offers_auth {
            return Err(SessionError::AuthFailed("server does not offer qop=auth".into()));
        }
        let realm = challenge.get("realm").map(String::as_str).unwrap_or("");
        let digest_uri = format!("{SERVICE}/{DIGEST_SERVER_NAME}");
        let nc = "00000001";

        let response = digest_response(&DigestInput {
            username: &self.username,
            realm,
            password: &self.password,
            nonce,
            cnonce: &self.cnonce,
            nc,
            digest_uri: &digest_uri,
            a2_prefix: "AUTHENTICATE",
        });
        self.expected_rspauth = Some(digest_response(&DigestInput {
            username: &self.username,
            realm,
            password: &self.password,
            nonce,
            cnonce: &self.cnonce,
            nc,
            digest_uri: &digest_uri,
            a2_prefix: "",
        }));

        Ok(format!(
            "charset=utf-8,username=\"{}\",realm=\"{}\",nonce=\"{}\",nc={nc},cnonce=\"{}\",\
             digest-uri=\"{digest_uri}\",maxbuf=65536,response={response},qop=auth",
            quote(&self.username),
            quote(realm),
            quote(nonce),
            self.cnonce,
        )
        .into_bytes())
    }
}

impl SaslMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> SessionResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn evaluate(&mut self, challenge: &[u8]) -> SessionResult<Option<Vec<u8>>> {
        let text = std::str::from_utf8(challenge)
            .map_err(|_| SessionError::AuthFailed("DIGEST-MD5 challenge is not UTF-8".into()))?;
        let fields = parse_challenge(text)?;
        match self.expected_rspauth.as_deref() {
            None => self.respond(&fields).map(Some),
            Some(expected) => {
                if fields.get("rspauth").map(String::as_str) != Some(expected) {
                    return Err(SessionError::AuthFailed(
                        "server failed to prove knowledge of the password".into(),
                    ));
                }
                self.complete = true;
                Ok(None)
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

struct DigestInput<'a> {
    username: &'a str,
    realm: &'a str,
    password: &'a str,
    nonce: &'a str,
    cnonce: &'a str,
    nc: &'a str,
    digest_uri: &'a str,
    a2_prefix: &'a str,
}

/// `response` (or `rspauth` with an empty A2 prefix) per RFC 2831 2.1.2.1.
fn digest_response(input: &DigestInput<'_>) -> String {
    let secret = Md5::digest(format!("{}:{}:{}", input.username, input.realm, input.password));
    let mut a1 = secret.to_vec();
    a1.extend_from_slice(format!(":{}:{}", input.nonce, input.cnonce).as_bytes());
    let ha1 = hex::encode(Md5::digest(&a1));
    let ha2 = hex::encode(Md5::digest(format!("{}:{}", input.a2_prefix, input.digest_uri)));
    hex::encode(Md5::digest(format!(
        "{ha1}:{}:{}:{}:auth:{ha2}",
        input.nonce, input.nc, input.cnonce
    )))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse `key=value,key="quoted value",...`. The first occurrence of a key wins.
fn parse_challenge(text: &str) -> SessionResult<BTreeMap<String, String>> {
    let malformed = || SessionError::AuthFailed(format!("malformed DIGEST-MD5 challenge {text:?}"));
    let mut fields = BTreeMap::new();
    let mut chars = text.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(malformed());
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.push(chars.next().ok_or_else(malformed)?),
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return Err(malformed());
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }
        fields.entry(key).or_insert_with(|| value.trim().to_string());
    }
    Ok(fields)
}

#[cfg(feature = "gssapi")]
mod gssapi {
    use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext};
    use libgssapi::credential::{Cred, CredUsage};
    use libgssapi::error::Error;
    use libgssapi::name::Name;
    use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE, GSS_NT_KRB5_PRINCIPAL};
    use zkm_session::{SessionError, SessionResult};

    use super::{SaslMechanism, SERVICE};

    fn failed(e: Error) -> SessionError {
        SessionError::AuthFailed(format!("GSSAPI: {e}"))
    }

    /// RFC 4752 over a Kerberos context from the external ticket cache.
    pub(crate) struct Gssapi {
        ctx: ClientCtx,
        authzid: String,
        established: bool,
        complete: bool,
    }

    impl Gssapi {
        pub(crate) fn new(principal: Option<&str>, host: &str) -> SessionResult<Self> {
            let mut mechs = OidSet::new().map_err(failed)?;
            mechs.add(&GSS_MECH_KRB5).map_err(failed)?;
            let client = principal
                .map(|p| Name::new(p.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL)))
                .transpose()
                .map_err(failed)?;
            let cred = Cred::acquire(client.as_ref(), None, CredUsage::Initiate, Some(&mechs)).map_err(failed)?;
            let target = Name::new(format!("{SERVICE}@{host}").as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
                .map_err(failed)?;
            let ctx = ClientCtx::new(Some(cred), target, CtxFlags::GSS_C_MUTUAL_FLAG, Some(&GSS_MECH_KRB5));
            Ok(Self {
                ctx,
                authzid: principal.unwrap_or_default().to_string(),
                established: false,
                complete: false,
            })
        }
    }

    impl SaslMechanism for Gssapi {
        fn name(&self) -> &'static str {
            "GSSAPI"
        }

        fn initial_response(&mut self) -> SessionResult<Vec<u8>> {
            let token = self.ctx.step(None, None).map_err(failed)?;
            self.established = self.ctx.is_complete();
            Ok(token.map(|t| t.to_vec()).unwrap_or_default())
        }

        fn evaluate(&mut self, challenge: &[u8]) -> SessionResult<Option<Vec<u8>>> {
            if !self.established {
                let token = self.ctx.step(Some(challenge), None).map_err(failed)?;
                self.established = self.ctx.is_complete();
                return Ok(Some(token.map(|t| t.to_vec()).unwrap_or_default()));
            }
            // Security layer offer: one byte of layer flags, three of max size.
            let offer = self.ctx.unwrap(challenge).map_err(failed)?;
            if offer.len() != 4 || offer[0] & 0x01 == 0 {
                return Err(SessionError::AuthFailed(
                    "server does not accept an unprotected GSSAPI session".into(),
                ));
            }
            let mut reply = vec![0x01, 0, 0, 0];
            reply.extend_from_slice(self.authzid.as_bytes());
            let wrapped = self.ctx.wrap(false, &reply).map_err(failed)?;
            self.complete = true;
            Ok(Some(wrapped.to_vec()))
        }

        fn is_complete(&self) -> bool {
            self.complete
        }
    }
}
