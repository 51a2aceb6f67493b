use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use zkm_migrate::DEFAULT_ARTIFACT;

/// Settings that may come from a TOML file.
///
/// ```toml
/// file = "/var/tmp/zkData"
/// session_timeout_ms = 30000
/// connect_timeout_ms = 15000
/// concurrency = 4
/// skip_ephemeral = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigratorConfig {
    pub file: PathBuf,
    pub session_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub concurrency: usize,
    pub skip_ephemeral: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_ARTIFACT),
            session_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            concurrency: 1,
            skip_ephemeral: false,
        }
    }
}

impl MigratorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
