//! In-memory tree for tests and embedding.
//!
//! [`InMemoryTree`] models one cluster's namespace behind a `RwLock`:
//! parent checks, ACL enforcement, ephemeral ownership and chroot scoping
//! behave like a real server so the export and import engines can be
//! exercised without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use zkm_types::path::{self, prepend_chroot, validate_path, ROOT, SYSTEM_ROOT};
use zkm_types::{open_acl_unsafe, Acl, CreateMode, Id, NodeSnapshot, Perms};

use crate::auth::AuthMode;
use crate::endpoint::Endpoint;
use crate::error::{SessionError, SessionResult};
use crate::session::{SessionFactory, TreeSession};

#[derive(Clone, Debug)]
struct MemNode {
    data: Vec<u8>,
    acl: Vec<Acl>,
    ephemeral_owner: i64,
}

impl MemNode {
    fn open(data: Vec<u8>) -> Self {
        Self {
            data,
            acl: open_acl_unsafe(),
            ephemeral_owner: 0,
        }
    }
}

/// One cluster's namespace held in memory.
#[derive(Debug)]
pub struct InMemoryTree {
    nodes: RwLock<BTreeMap<String, MemNode>>,
    next_session: AtomicI64,
}

impl InMemoryTree {
    /// A fresh tree holding the root and the reserved system nodes.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), MemNode::open(Vec::new()));
        nodes.insert(SYSTEM_ROOT.to_string(), MemNode::open(Vec::new()));
        nodes.insert(format!("{SYSTEM_ROOT}/quota"), MemNode::open(Vec::new()));
        Self {
            nodes: RwLock::new(nodes),
            next_session: AtomicI64::new(0x100),
        }
    }

    /// Create or replace a node without any permission checks. Missing
    /// ancestors are created empty with an open ACL.
    pub fn put(&self, path: &str, data: impl Into<Vec<u8>>, acl: Vec<Acl>) {
        let mut nodes = self.nodes.write().expect("tree lock poisoned");
        for ancestor in path::ancestors(path) {
            nodes
                .entry(ancestor)
                .or_insert_with(|| MemNode::open(Vec::new()));
        }
        nodes.insert(
            path.to_string(),
            MemNode {
                data: data.into(),
                acl,
                ephemeral_owner: 0,
            },
        );
    }

    /// Remove a node and everything beneath it. Returns `true` if it existed.
    pub fn delete(&self, path: &str) -> bool {
        let mut nodes = self.nodes.write().expect("tree lock poisoned");
        let existed = nodes.remove(path).is_some();
        let prefix = child_prefix(path);
        nodes.retain(|k, _| !k.starts_with(&prefix));
        existed
    }

    /// Snapshot a node without permission checks.
    pub fn node(&self, path: &str) -> Option<NodeSnapshot> {
        let nodes = self.nodes.read().expect("tree lock poisoned");
        nodes.get(path).map(|n| snapshot(&nodes, path, n))
    }

    /// Every path in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        let nodes = self.nodes.read().expect("tree lock poisoned");
        nodes.keys().cloned().collect()
    }

    /// Every path outside the reserved system subtree, sorted.
    pub fn user_paths(&self) -> Vec<String> {
        self.paths()
            .into_iter()
            .filter(|p| !path::is_system_path(p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("tree lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a session holding `identities`, scoped under `chroot`.
    pub fn session(self: &Arc<Self>, identities: Vec<Id>, chroot: Option<String>) -> MemorySession {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        MemorySession {
            tree: Arc::clone(self),
            id,
            identities,
            chroot,
            closed: AtomicBool::new(false),
        }
    }

    fn end_session(&self, session_id: i64) {
        let mut nodes = self.nodes.write().expect("tree lock poisoned");
        nodes.retain(|_, n| n.ephemeral_owner != session_id);
    }
}

impl Default for InMemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

fn child_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

fn children_of(nodes: &BTreeMap<String, MemNode>, path: &str) -> Vec<String> {
    let prefix = child_prefix(path);
    nodes
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter_map(|(k, _)| {
            let rest = &k[prefix.len()..];
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        })
        .collect()
}

fn snapshot(nodes: &BTreeMap<String, MemNode>, path: &str, node: &MemNode) -> NodeSnapshot {
    NodeSnapshot {
        data: node.data.clone(),
        acl: node.acl.clone(),
        ephemeral_owner: node.ephemeral_owner,
        num_children: children_of(nodes, path).len() as i32,
    }
}

fn permits(acl: &[Acl], needed: Perms, identities: &[Id]) -> bool {
    acl.iter().any(|entry| {
        entry.perms.contains(needed)
            && match entry.id.scheme.as_str() {
                "world" => entry.id.id == "anyone",
                _ => identities.contains(&entry.id),
            }
    })
}

/// Validate an ACL and expand `auth` entries to the session's identities.
fn fixup_acl(acl: &[Acl], identities: &[Id], path: &str) -> SessionResult<Vec<Acl>> {
    let invalid = || SessionError::InvalidAcl(path.to_string());
    if acl.is_empty() {
        return Err(invalid());
    }
    let mut out = Vec::with_capacity(acl.len());
    for entry in acl {
        match entry.id.scheme.as_str() {
            "world" if entry.id.id == "anyone" => out.push(entry.clone()),
            "auth" => {
                let authed: Vec<&Id> = identities.iter().filter(|i| i.scheme != "world").collect();
                if authed.is_empty() {
                    return Err(invalid());
                }
                out.extend(authed.into_iter().map(|id| Acl::new(entry.perms, id.clone())));
            }
            "digest" => match entry.id.id.split_once(':') {
                Some((user, hash)) if !user.is_empty() && !hash.is_empty() => out.push(entry.clone()),
                _ => return Err(invalid()),
            },
            "ip" | "sasl" | "x509" if !entry.id.id.is_empty() => out.push(entry.clone()),
            _ => return Err(invalid()),
        }
    }
    Ok(out)
}

/// A session on an [`InMemoryTree`].
#[derive(Debug)]
pub struct MemorySession {
    tree: Arc<InMemoryTree>,
    id: i64,
    identities: Vec<Id>,
    chroot: Option<String>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn session_id(&self) -> i64 {
        self.id
    }

    pub fn tree(&self) -> &Arc<InMemoryTree> {
        &self.tree
    }

    fn resolve(&self, path: &str) -> SessionResult<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        validate_path(path).map_err(|_| SessionError::Server {
            code: -8,
            path: path.to_string(),
        })?;
        Ok(prepend_chroot(self.chroot.as_deref(), path))
    }

    fn create_full(
        &self,
        shown: &str,
        full: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> SessionResult<()> {
        let mut nodes = self.tree.nodes.write().expect("tree lock poisoned");
        let parent = path::parent(full).ok_or_else(|| SessionError::NodeExists(shown.to_string()))?;
        let parent_node = nodes
            .get(parent)
            .ok_or_else(|| SessionError::NoNode(shown.to_string()))?;
        if !permits(&parent_node.acl, Perms::CREATE, &self.identities) {
            return Err(SessionError::NoAuth(shown.to_string()));
        }
        let acl = fixup_acl(acl, &self.identities, shown)?;
        if nodes.contains_key(full) {
            return Err(SessionError::NodeExists(shown.to_string()));
        }
        if parent_node.ephemeral_owner != 0 {
            return Err(SessionError::NoChildrenForEphemerals(shown.to_string()));
        }
        let ephemeral_owner = match mode {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => self.id,
        };
        nodes.insert(
            full.to_string(),
            MemNode {
                data: data.to_vec(),
                acl,
                ephemeral_owner,
            },
        );
        debug!(path = %shown, session = self.id, "node created");
        Ok(())
    }
}

#[async_trait]
impl TreeSession for MemorySession {
    fn describe(&self) -> String {
        format!("memory:{}{}", self.id, self.chroot.as_deref().unwrap_or(""))
    }

    async fn get_node(&self, path: &str) -> SessionResult<Option<NodeSnapshot>> {
        let full = self.resolve(path)?;
        let nodes = self.tree.nodes.read().expect("tree lock poisoned");
        let Some(node) = nodes.get(&full) else {
            return Ok(None);
        };
        if !permits(&node.acl, Perms::READ, &self.identities) {
            return Err(SessionError::NoAuth(path.to_string()));
        }
        Ok(Some(snapshot(&nodes, &full, node)))
    }

    async fn get_children(&self, path: &str) -> SessionResult<Option<Vec<String>>> {
        let full = self.resolve(path)?;
        let nodes = self.tree.nodes.read().expect("tree lock poisoned");
        let Some(node) = nodes.get(&full) else {
            return Ok(None);
        };
        if !permits(&node.acl, Perms::READ, &self.identities) {
            return Err(SessionError::NoAuth(path.to_string()));
        }
        Ok(Some(children_of(&nodes, &full)))
    }

    async fn exists(&self, path: &str) -> SessionResult<bool> {
        let full = self.resolve(path)?;
        let nodes = self.tree.nodes.read().expect("tree lock poisoned");
        Ok(nodes.contains_key(&full))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> SessionResult<()> {
        let full = self.resolve(path)?;
        self.create_full(path, &full, data, acl, mode)
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> SessionResult<()> {
        let full = self.resolve(path)?;
        let mut nodes = self.tree.nodes.write().expect("tree lock poisoned");
        let node = nodes
            .get_mut(&full)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        if !permits(&node.acl, Perms::WRITE, &self.identities) {
            return Err(SessionError::NoAuth(path.to_string()));
        }
        node.data = data.to_vec();
        Ok(())
    }

    async fn set_acl(&self, path: &str, acl: &[Acl]) -> SessionResult<()> {
        let full = self.resolve(path)?;
        let mut nodes = self.tree.nodes.write().expect("tree lock poisoned");
        let node = nodes
            .get_mut(&full)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        if !permits(&node.acl, Perms::ADMIN, &self.identities) {
            return Err(SessionError::NoAuth(path.to_string()));
        }
        node.acl = fixup_acl(acl, &self.identities, path)?;
        Ok(())
    }

    async fn ensure_root(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let Some(chroot) = self.chroot.clone() else {
            return Ok(());
        };
        let mut chain = path::ancestors(&chroot);
        chain.push(chroot);
        for full in chain {
            // Creating an existing node still needs CREATE on its parent.
            let present = self.tree.nodes.read().expect("tree lock poisoned").contains_key(&full);
            if present {
                continue;
            }
            match self.create_full(&full, &full, &[], &open_acl_unsafe(), CreateMode::Persistent) {
                Ok(()) | Err(SessionError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tree.end_session(self.id);
            debug!(session = self.id, "memory session closed");
        }
        Ok(())
    }
}

/// Routes endpoints to registered in-memory clusters by host list.
#[derive(Debug, Default)]
pub struct MemorySessionFactory {
    clusters: RwLock<HashMap<String, Arc<InMemoryTree>>>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cluster under a host list such as `"zk1:2181,zk2:2181"`.
    pub fn register(&self, hosts: &str, tree: Arc<InMemoryTree>) -> SessionResult<()> {
        let key = Endpoint::parse(hosts)?.connect_string();
        self.clusters
            .write()
            .expect("factory lock poisoned")
            .insert(key, tree);
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        auth: &AuthMode,
        _session_timeout: Duration,
    ) -> SessionResult<Box<dyn TreeSession>> {
        let tree = self
            .clusters
            .read()
            .expect("factory lock poisoned")
            .get(&endpoint.connect_string())
            .cloned()
            .ok_or_else(|| SessionError::Connect {
                endpoint: endpoint.to_string(),
                reason: "no such cluster".into(),
            })?;
        let identities = auth.identities();
        if matches!(auth, AuthMode::Sasl(_)) && identities.is_empty() {
            return Err(SessionError::AuthFailed(
                "JAAS login module names no principal".into(),
            ));
        }
        Ok(Box::new(tree.session(identities, endpoint.chroot.clone())))
    }
}
