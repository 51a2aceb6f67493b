//! End-to-end tests against an in-process server that speaks the wire
//! protocol on top of an `InMemoryTree`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use md5::{Digest, Md5};
use tokio::net::{TcpListener, TcpStream};
use zkm_client::ZkSessionFactory;
use zkm_protocol::{
    codes, decode_record, decode_request, encode_record, encode_reply, ConnectRequest,
    ConnectResponse, FrameCodec, ReplyHeader, Request, Response, Stat,
};
use zkm_session::{
    AuthMode, DigestCredential, Endpoint, InMemoryTree, MemorySession, SessionError,
    SessionFactory, TreeSession,
};
use zkm_types::{open_acl_unsafe, Acl, CreateMode, Id, Perms};

struct FakeServer {
    addr: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start(tree: Arc<InMemoryTree>) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(serve(stream, Arc::clone(&tree)));
        }
    });
    FakeServer { addr, task }
}

fn error_code(e: &SessionError) -> i32 {
    match e {
        SessionError::NoNode(_) => codes::NO_NODE,
        SessionError::NodeExists(_) => codes::NODE_EXISTS,
        SessionError::NoAuth(_) => codes::NO_AUTH,
        SessionError::InvalidAcl(_) => codes::INVALID_ACL,
        SessionError::NoChildrenForEphemerals(_) => codes::NO_CHILDREN_FOR_EPHEMERALS,
        SessionError::Server { code, .. } => *code,
        _ => codes::SYSTEM_ERROR,
    }
}

async fn handle(session: &MemorySession, request: Request) -> Result<Response, i32> {
    let err = |e: SessionError| error_code(&e);
    match request {
        Request::Create { path, data, acl, flags } => {
            let mode = CreateMode::from_flag(flags).unwrap_or_default();
            session.create(&path, &data, &acl, mode).await.map_err(err)?;
            Ok(Response::Create { path })
        }
        Request::Exists { path, .. } => match session.exists(&path).await.map_err(err)? {
            true => Ok(Response::Stat(Stat::default())),
            false => Err(codes::NO_NODE),
        },
        Request::GetData { path, .. } => {
            let node = session.get_node(&path).await.map_err(err)?.ok_or(codes::NO_NODE)?;
            let stat = Stat {
                ephemeral_owner: node.ephemeral_owner,
                num_children: node.num_children,
                data_length: node.data.len() as i32,
                ..Stat::default()
            };
            Ok(Response::GetData { data: node.data, stat })
        }
        Request::GetAcl { path } => {
            let node = session.get_node(&path).await.map_err(err)?.ok_or(codes::NO_NODE)?;
            Ok(Response::GetAcl { acl: node.acl, stat: Stat::default() })
        }
        Request::SetData { path, data, .. } => {
            session.set_data(&path, &data).await.map_err(err)?;
            Ok(Response::Stat(Stat::default()))
        }
        Request::SetAcl { path, acl, .. } => {
            session.set_acl(&path, &acl).await.map_err(err)?;
            Ok(Response::Stat(Stat::default()))
        }
        Request::GetChildren { path, .. } => {
            let children = session.get_children(&path).await.map_err(err)?.ok_or(codes::NO_NODE)?;
            Ok(Response::GetChildren { children })
        }
        Request::Ping | Request::CloseSession => Ok(Response::Empty),
        Request::Auth { .. } | Request::Sasl { .. } => Err(codes::API_ERROR),
    }
}

const SASL_REALM: &str = "zk-sasl-md5";
const SASL_NONCE: &str = "fake-nonce-1";

fn sasl_password(username: &str) -> Option<&'static str> {
    (username == "bob").then_some("pw")
}

fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data))
}

fn digest_proof(username: &str, password: &str, cnonce: &str, nc: &str, uri: &str, a2_prefix: &str) -> String {
    let mut a1 = Md5::digest(format!("{username}:{SASL_REALM}:{password}")).to_vec();
    a1.extend_from_slice(format!(":{SASL_NONCE}:{cnonce}").as_bytes());
    let ha1 = md5_hex(&a1);
    let ha2 = md5_hex(format!("{a2_prefix}:{uri}"));
    md5_hex(format!("{ha1}:{SASL_NONCE}:{nc}:{cnonce}:auth:{ha2}"))
}

/// Server half of DIGEST-MD5: an empty token opens the exchange, the
/// client's digest response completes it.
fn sasl_step(token: &[u8], identities: &mut Vec<Id>) -> Result<Response, i32> {
    if token.is_empty() {
        let challenge =
            format!("realm=\"{SASL_REALM}\",nonce=\"{SASL_NONCE}\",qop=\"auth\",charset=utf-8,algorithm=md5-sess");
        return Ok(Response::Sasl { token: challenge.into_bytes() });
    }
    let text = std::str::from_utf8(token).map_err(|_| codes::AUTH_FAILED)?;
    let fields: HashMap<&str, &str> = text
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect();
    let get = |key: &str| fields.get(key).copied().ok_or(codes::AUTH_FAILED);
    let username = get("username")?;
    let password = sasl_password(username).ok_or(codes::AUTH_FAILED)?;
    let (cnonce, nc, uri) = (get("cnonce")?, get("nc")?, get("digest-uri")?);
    if get("response")? != digest_proof(username, password, cnonce, nc, uri, "AUTHENTICATE") {
        return Err(codes::AUTH_FAILED);
    }
    identities.push(Id::new("sasl", username));
    let rspauth = digest_proof(username, password, cnonce, nc, uri, "");
    Ok(Response::Sasl { token: format!("rspauth={rspauth}").into_bytes() })
}

async fn serve(mut stream: TcpStream, tree: Arc<InMemoryTree>) {
    let Ok(Some(hello)) = FrameCodec::read_from(&mut stream).await else { return };
    let Ok(req) = decode_record::<ConnectRequest>(hello) else { return };
    let mut identities = Vec::new();
    let mut session = tree.session(identities.clone(), None);
    let accepted = ConnectResponse {
        protocol_version: 0,
        timeout_ms: req.timeout_ms,
        session_id: session.session_id(),
        passwd: vec![1; 16],
        read_only: false,
    };
    if FrameCodec::write_to(&mut stream, &encode_record(&accepted)).await.is_err() {
        return;
    }

    while let Ok(Some(frame)) = FrameCodec::read_from(&mut stream).await {
        let Ok((header, request)) = decode_request(frame) else { return };
        let closing = matches!(request, Request::CloseSession);
        let authenticating = matches!(request, Request::Auth { .. } | Request::Sasl { .. });
        let result = match request {
            Request::Auth { scheme, auth, .. } if scheme == "digest" => match DigestCredential::parse(&auth) {
                Ok(cred) if cred.username != "intruder" => {
                    identities.push(cred.identity());
                    session = tree.session(identities.clone(), None);
                    Ok(Response::Empty)
                }
                _ => Err(codes::AUTH_FAILED),
            },
            Request::Sasl { token } => sasl_step(&token, &mut identities).map(|response| {
                session = tree.session(identities.clone(), None);
                response
            }),
            other => handle(&session, other).await,
        };
        let reply = match &result {
            Ok(response) => encode_reply(ReplyHeader { xid: header.xid, zxid: 1, err: 0 }, Some(response)),
            Err(code) => encode_reply(ReplyHeader { xid: header.xid, zxid: 1, err: *code }, None),
        };
        if FrameCodec::write_to(&mut stream, &reply).await.is_err() {
            return;
        }
        if closing {
            let _ = session.close().await;
            return;
        }
        if authenticating && result.is_err() {
            return;
        }
    }
}

/// Completes the handshake, then reads requests without ever replying.
async fn start_silent() -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let Ok(Some(hello)) = FrameCodec::read_from(&mut stream).await else { return };
                let Ok(req) = decode_record::<ConnectRequest>(hello) else { return };
                let accepted = ConnectResponse {
                    protocol_version: 0,
                    timeout_ms: req.timeout_ms,
                    session_id: 7,
                    passwd: vec![1; 16],
                    read_only: false,
                };
                if FrameCodec::write_to(&mut stream, &encode_record(&accepted)).await.is_err() {
                    return;
                }
                while let Ok(Some(_)) = FrameCodec::read_from(&mut stream).await {}
            });
        }
    });
    FakeServer { addr, task }
}

fn jaas_auth(dir: &tempfile::TempDir, module: &str) -> AuthMode {
    let jaas = dir.path().join("jaas.conf");
    std::fs::write(&jaas, format!("Client {{ {module}; }};")).unwrap();
    AuthMode::from_options(None, Some(&jaas)).unwrap()
}

async fn connect(server: &FakeServer, suffix: &str, auth: AuthMode) -> Box<dyn TreeSession> {
    let endpoint = Endpoint::parse(&format!("{}{suffix}", server.addr)).unwrap();
    ZkSessionFactory::new()
        .connect(&endpoint, &auth, Duration::from_secs(30))
        .await
        .unwrap()
}

#[tokio::test]
async fn create_read_and_list() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "", AuthMode::Open).await;

    session.create("/app", b"root", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();
    session.create("/app/cfg", &[0, 1, 2, 0xff], &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();

    let node = session.get_node("/app/cfg").await.unwrap().unwrap();
    assert_eq!(node.data, vec![0, 1, 2, 0xff]);
    assert_eq!(node.acl, open_acl_unsafe());
    assert!(!node.is_ephemeral());

    let mut children = session.get_children("/").await.unwrap().unwrap();
    children.sort();
    assert_eq!(children, vec!["app", "zookeeper"]);
    assert_eq!(session.get_node("/app").await.unwrap().unwrap().num_children, 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn missing_nodes_and_errors_map() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "", AuthMode::Open).await;

    assert!(session.get_node("/nope").await.unwrap().is_none());
    assert!(session.get_children("/nope").await.unwrap().is_none());
    assert!(!session.exists("/nope").await.unwrap());

    let err = session.create("/a/b", b"", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap_err();
    assert!(matches!(err, SessionError::NoNode(p) if p == "/a/b"));

    session.create("/a", b"", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();
    let err = session.create("/a", b"", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap_err();
    assert!(matches!(err, SessionError::NodeExists(_)));

    session.set_data("/a", b"new").await.unwrap();
    assert_eq!(tree.node("/a").unwrap().data, b"new");
}

#[tokio::test]
async fn digest_auth_grants_access() {
    let tree = Arc::new(InMemoryTree::new());
    let owner = DigestCredential::new("owner", "pw").unwrap();
    tree.put("/secret", b"s".to_vec(), vec![Acl::new(Perms::ALL, owner.identity())]);
    let server = start(Arc::clone(&tree)).await;

    let anon = connect(&server, "", AuthMode::Open).await;
    let err = anon.get_node("/secret").await.unwrap_err();
    assert!(err.is_permission());

    let authed = connect(&server, "", AuthMode::Digest(owner)).await;
    assert_eq!(authed.get_node("/secret").await.unwrap().unwrap().data, b"s");
    authed.set_acl("/secret", &open_acl_unsafe()).await.unwrap();
    assert_eq!(tree.node("/secret").unwrap().acl, open_acl_unsafe());
}

#[tokio::test]
async fn rejected_digest_fails_connect() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(tree).await;
    let endpoint = Endpoint::parse(&server.addr).unwrap();
    let auth = AuthMode::Digest(DigestCredential::new("intruder", "x").unwrap());
    let err = ZkSessionFactory::new()
        .connect(&endpoint, &auth, Duration::from_secs(30))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::AuthFailed(_)));
}

#[tokio::test]
async fn chroot_prefixes_every_path() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "/tenants/blue", AuthMode::Open).await;

    session.ensure_root().await.unwrap();
    session.ensure_root().await.unwrap();
    session.create("/svc", b"1", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();

    assert!(tree.node("/tenants/blue/svc").is_some());
    assert_eq!(session.get_children("/").await.unwrap().unwrap(), vec!["svc"]);
    assert!(session.describe().ends_with("/tenants/blue"));
}

#[tokio::test]
async fn concurrent_requests_are_matched_in_order() {
    let tree = Arc::new(InMemoryTree::new());
    for i in 0..20 {
        tree.put(&format!("/n{i}"), format!("v{i}").into_bytes(), open_acl_unsafe());
    }
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "", AuthMode::Open).await;

    let reads = (0..20).map(|i| {
        let session = &session;
        async move { (i, session.get_node(&format!("/n{i}")).await.unwrap().unwrap()) }
    });
    for (i, node) in join_all(reads).await {
        assert_eq!(node.data, format!("v{i}").into_bytes());
    }
}

#[tokio::test]
async fn ephemerals_removed_when_session_closes() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "", AuthMode::Open).await;

    session.create("/lock", b"", &open_acl_unsafe(), CreateMode::Ephemeral).await.unwrap();
    assert!(session.get_node("/lock").await.unwrap().unwrap().is_ephemeral());

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(matches!(session.exists("/").await, Err(SessionError::Closed)));

    // The server removes ephemerals after acknowledging the close.
    for _ in 0..50 {
        if tree.node("/lock").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(tree.node("/lock").is_none());
}

#[tokio::test]
async fn sasl_digest_login_grants_access() {
    let tree = Arc::new(InMemoryTree::new());
    tree.put("/kafka", b"k".to_vec(), vec![Acl::new(Perms::ALL, Id::new("sasl", "bob"))]);
    let server = start(Arc::clone(&tree)).await;
    let dir = tempfile::tempdir().unwrap();
    let auth = jaas_auth(
        &dir,
        "org.apache.zookeeper.server.auth.DigestLoginModule required username=\"bob\" password=\"pw\"",
    );

    let session = connect(&server, "", auth).await;
    assert_eq!(session.get_node("/kafka").await.unwrap().unwrap().data, b"k");
    session.set_data("/kafka", b"k2").await.unwrap();
    assert_eq!(tree.node("/kafka").unwrap().data, b"k2");
    session.close().await.unwrap();
}

#[tokio::test]
async fn sasl_digest_wrong_password_fails_connect() {
    let server = start(Arc::new(InMemoryTree::new())).await;
    let dir = tempfile::tempdir().unwrap();
    let auth = jaas_auth(
        &dir,
        "org.apache.zookeeper.server.auth.DigestLoginModule required username=\"bob\" password=\"guess\"",
    );
    let endpoint = Endpoint::parse(&server.addr).unwrap();
    let err = ZkSessionFactory::new()
        .connect(&endpoint, &auth, Duration::from_secs(30))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::AuthFailed(_)), "{err}");
}

#[cfg(not(feature = "gssapi"))]
#[tokio::test]
async fn kerberos_login_needs_gssapi_build() {
    let server = start(Arc::new(InMemoryTree::new())).await;
    let dir = tempfile::tempdir().unwrap();
    let auth = jaas_auth(
        &dir,
        "com.sun.security.auth.module.Krb5LoginModule required useTicketCache=true principal=\"a@B\"",
    );
    let endpoint = Endpoint::parse(&server.addr).unwrap();
    let err = ZkSessionFactory::new()
        .connect(&endpoint, &auth, Duration::from_secs(30))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::UnsupportedAuth(_)));
}

#[tokio::test]
async fn silent_server_fails_requests_instead_of_hanging() {
    let server = start_silent().await;
    let endpoint = Endpoint::parse(&server.addr).unwrap();
    let session = ZkSessionFactory::new()
        .connect(&endpoint, &AuthMode::Open, Duration::from_millis(300))
        .await
        .unwrap();

    let started = Instant::now();
    let err = tokio::time::timeout(Duration::from_secs(5), session.get_node("/"))
        .await
        .expect("request must fail on its own")
        .unwrap_err();
    assert!(matches!(err, SessionError::ConnectionLoss(_)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));

    tokio::time::timeout(Duration::from_secs(5), session.close())
        .await
        .expect("close must not hang")
        .unwrap();
}

#[tokio::test]
async fn oversized_request_fails_alone() {
    let tree = Arc::new(InMemoryTree::new());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "", AuthMode::Open).await;
    session.create("/big", b"", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();

    let err = session.set_data("/big", &vec![7u8; 2 * 1024 * 1024]).await.unwrap_err();
    assert!(matches!(err, SessionError::RequestRejected { path, .. } if path == "/big"));
    assert!(session.exists("/big").await.unwrap());
    assert!(tree.node("/big").unwrap().data.is_empty());
}

#[tokio::test]
async fn existing_chroot_under_read_only_parent() {
    let tree = Arc::new(InMemoryTree::new());
    tree.put("/locked", b"".to_vec(), vec![Acl::new(Perms::READ, Id::anyone())]);
    tree.put("/locked/app", b"".to_vec(), open_acl_unsafe());
    let server = start(Arc::clone(&tree)).await;
    let session = connect(&server, "/locked/app", AuthMode::Open).await;

    session.ensure_root().await.unwrap();
    session.create("/cfg", b"1", &open_acl_unsafe(), CreateMode::Persistent).await.unwrap();
    assert!(tree.node("/locked/app/cfg").is_some());

    let missing = connect(&server, "/locked/other", AuthMode::Open).await;
    assert!(missing.ensure_root().await.unwrap_err().is_permission());
}

#[tokio::test]
async fn unreachable_hosts_fail_with_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let endpoint = Endpoint::parse(&addr).unwrap();
    let err = ZkSessionFactory::new()
        .connect(&endpoint, &AuthMode::Open, Duration::from_secs(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Connect { .. }));
}
