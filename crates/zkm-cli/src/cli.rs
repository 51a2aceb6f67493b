use std::path::PathBuf;

use clap::Parser;
use zkm_session::Endpoint;

#[derive(Parser, Debug)]
#[command(
    name = "zk-migrator",
    about = "Copy a ZooKeeper namespace, data and ACLs, from one ensemble to another",
    version
)]
pub struct Cli {
    /// Source ensemble: host:port[,host:port...][/chroot]
    #[arg(
        long = "source",
        visible_alias = "src",
        value_name = "ENDPOINT",
        required_unless_present = "import_only"
    )]
    pub source: Option<Endpoint>,

    /// Destination ensemble: host:port[,host:port...][/chroot]
    #[arg(
        long = "destination",
        visible_alias = "dst",
        value_name = "ENDPOINT",
        required_unless_present = "export_only"
    )]
    pub destination: Option<Endpoint>,

    /// Digest credentials for both ensembles
    #[arg(short = 'a', long, value_name = "USERNAME:PASSWORD", conflicts_with = "krb_conf")]
    pub auth: Option<String>,

    /// JAAS login configuration for SASL authentication
    #[arg(short = 'k', long = "krb-conf", value_name = "JAAS_FILE")]
    pub krb_conf: Option<PathBuf>,

    /// Give created nodes the open ACL instead of the source ACL
    #[arg(long = "ignore-source")]
    pub ignore_source: bool,

    /// Keep the ACL of nodes that already exist at the destination
    #[arg(long)]
    pub use_existing_acl: bool,

    /// Do not recreate ephemeral nodes at the destination
    #[arg(long)]
    pub skip_ephemeral: bool,

    /// Intermediate artifact file [default: zkData]
    #[arg(short = 'f', long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Export the source into the artifact and stop
    #[arg(long, conflicts_with = "import_only")]
    pub export_only: bool,

    /// Import an existing artifact without touching the source
    #[arg(long)]
    pub import_only: bool,

    /// Concurrent reads while exporting
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "MS")]
    pub session_timeout_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    pub connect_timeout_ms: Option<u64>,

    /// TOML settings file; command-line flags take precedence
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}
