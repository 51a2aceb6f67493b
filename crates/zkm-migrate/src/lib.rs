//! Copy a coordination-service namespace from one cluster to another.
//!
//! Migration is two-phase. [`TreeExporter`] walks the source tree and
//! writes every node to a stream artifact; [`TreeImporter`] replays the
//! artifact against the destination. [`Migration`] sequences the two,
//! verifies the artifact in between, and owns both sessions.
//!
//! ```no_run
//! use zkm_client::ZkSessionFactory;
//! use zkm_migrate::{Migration, MigrationOptions};
//! use zkm_session::Endpoint;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let migration = Migration::new(MigrationOptions {
//!     source: Some(Endpoint::parse("old-zk:2181")?),
//!     destination: Some(Endpoint::parse("new-zk:2181/nifi")?),
//!     ..Default::default()
//! })?;
//! let report = migration.run(&ZkSessionFactory::new()).await?;
//! println!("{:?}", report.import);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod export;
pub mod import;
pub mod orchestrator;

pub use error::{MigrateError, MigrateResult};
pub use export::{ExportOptions, ExportReport, TreeExporter};
pub use import::{EphemeralPolicy, ImportOptions, ImportReport, TreeImporter};
pub use orchestrator::{Migration, MigrationMode, MigrationOptions, MigrationReport, DEFAULT_ARTIFACT};
