use tracing::{debug, info};
use zkm_codec::CodecResult;
use zkm_session::{SessionError, TreeSession};
use zkm_types::path::is_system_path;
use zkm_types::{open_acl_unsafe, Acl, CreateMode, NodeRecord};

use crate::error::{MigrateError, MigrateResult};

/// What to do with records captured from ephemeral nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EphemeralPolicy {
    /// Recreate as persistent nodes; the owning session no longer exists.
    #[default]
    Persist,
    Skip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Give every written node the open ACL instead of the recorded one.
    pub ignore_source_acl: bool,
    /// Leave the ACL of nodes that already exist untouched.
    pub use_existing_acl: bool,
    pub ephemeral: EphemeralPolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Nodes created or updated.
    pub written: u64,
    pub created: u64,
    pub updated: u64,
    /// Records not applied: system paths and, under [`EphemeralPolicy::Skip`], ephemerals.
    pub skipped: u64,
}

/// Applies a node stream to a destination tree, one record at a time in
/// stream order.
#[derive(Clone, Debug, Default)]
pub struct TreeImporter {
    options: ImportOptions,
}

impl TreeImporter {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Write every record to `session`.
    ///
    /// Stops at the first failure. Nodes already written stay written.
    pub async fn import<I>(&self, session: &dyn TreeSession, records: I) -> MigrateResult<ImportReport>
    where
        I: IntoIterator<Item = CodecResult<NodeRecord>>,
    {
        let target = session.describe();
        info!(
            destination = %target,
            ignore_source_acl = self.options.ignore_source_acl,
            use_existing_acl = self.options.use_existing_acl,
            "import started"
        );

        let mut report = ImportReport::default();
        for record in records {
            let record = record?;
            if is_system_path(&record.path) {
                debug!(path = %record.path, "skipping system node");
                report.skipped += 1;
                continue;
            }
            if record.ephemeral && self.options.ephemeral == EphemeralPolicy::Skip {
                debug!(path = %record.path, "skipping ephemeral node");
                report.skipped += 1;
                continue;
            }
            if self.write(session, &target, &record).await? {
                report.created += 1;
            } else {
                report.updated += 1;
            }
            report.written += 1;
        }

        info!(
            written = report.written,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "import finished"
        );
        Ok(report)
    }

    /// Write one record. Returns `true` when the node was created.
    async fn write(&self, session: &dyn TreeSession, target: &str, record: &NodeRecord) -> MigrateResult<bool> {
        let path = record.path.as_str();
        let fail = |e: SessionError| MigrateError::from_session(target, path, e);
        let acl: Vec<Acl> = if self.options.ignore_source_acl {
            open_acl_unsafe()
        } else {
            record.acl.clone()
        };

        if !session.exists(path).await.map_err(fail)? {
            match session
                .create(path, &record.data, &acl, CreateMode::Persistent)
                .await
            {
                Ok(()) => {
                    debug!(path, bytes = record.data.len(), "created");
                    return Ok(true);
                }
                // Another writer got there first.
                Err(SessionError::NodeExists(_)) => {
                    debug!(path, "created concurrently, updating instead");
                }
                Err(SessionError::NoNode(_)) => {
                    return Err(MigrateError::MissingParent {
                        path: path.to_string(),
                    })
                }
                Err(e) => return Err(fail(e)),
            }
        }

        session.set_data(path, &record.data).await.map_err(fail)?;
        if !self.options.use_existing_acl {
            session.set_acl(path, &acl).await.map_err(fail)?;
        }
        debug!(path, bytes = record.data.len(), "updated");
        Ok(false)
    }
}
