//! End-to-end migration: export the source to an artifact file, verify it,
//! then import it into the destination.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use zkm_codec::{verify_stream, StreamHeader, StreamReader, StreamSummary, StreamWriter};
use zkm_session::{AuthMode, ConnectOptions, Endpoint, EndpointResolver, SessionFactory, TreeSession};
use zkm_types::path::ROOT;

use crate::error::{MigrateError, MigrateResult};
use crate::export::{ExportOptions, ExportReport, TreeExporter};
use crate::import::{ImportOptions, ImportReport, TreeImporter};

/// Default artifact file name, relative to the working directory.
pub const DEFAULT_ARTIFACT: &str = "zkData";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MigrationMode {
    /// Export, verify, import.
    #[default]
    Full,
    /// Export into the artifact and stop.
    ExportOnly,
    /// Verify and import an existing artifact.
    ImportOnly,
}

impl MigrationMode {
    fn exports(self) -> bool {
        matches!(self, Self::Full | Self::ExportOnly)
    }

    fn imports(self) -> bool {
        matches!(self, Self::Full | Self::ImportOnly)
    }
}

#[derive(Clone, Debug)]
pub struct MigrationOptions {
    pub source: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    /// Credentials used for both sessions.
    pub auth: AuthMode,
    pub artifact: PathBuf,
    pub mode: MigrationMode,
    pub connect: ConnectOptions,
    pub export: ExportOptions,
    pub import: ImportOptions,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            auth: AuthMode::Open,
            artifact: PathBuf::from(DEFAULT_ARTIFACT),
            mode: MigrationMode::Full,
            connect: ConnectOptions::default(),
            export: ExportOptions::default(),
            import: ImportOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub artifact: PathBuf,
    pub export: Option<ExportReport>,
    pub verified: Option<StreamSummary>,
    pub import: Option<ImportReport>,
}

/// One configured migration run.
#[derive(Debug)]
pub struct Migration {
    options: MigrationOptions,
}

impl Migration {
    /// Check that the options name every endpoint the mode needs.
    pub fn new(options: MigrationOptions) -> MigrateResult<Self> {
        if options.mode.exports() && options.source.is_none() {
            return Err(MigrateError::Config("a source endpoint is required".into()));
        }
        if options.mode.imports() && options.destination.is_none() {
            return Err(MigrateError::Config("a destination endpoint is required".into()));
        }
        if options.export.concurrency == 0 {
            return Err(MigrateError::Config("concurrency must be at least 1".into()));
        }
        if options.import.ignore_source_acl && options.import.use_existing_acl {
            warn!("ignore-source and use-existing-acl both set; existing nodes keep their ACL");
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Run every step of the configured mode. Both sessions are closed
    /// before returning, whatever the outcome.
    pub async fn run(&self, factory: &dyn SessionFactory) -> MigrateResult<MigrationReport> {
        let run_id = Uuid::now_v7();
        let span = info_span!("migration", %run_id);
        self.run_inner(factory, run_id).instrument(span).await
    }

    async fn run_inner(&self, factory: &dyn SessionFactory, run_id: Uuid) -> MigrateResult<MigrationReport> {
        let opts = &self.options;
        let resolver = EndpointResolver::new(opts.connect);
        let source_ep = opts.source.as_ref().filter(|_| opts.mode.exports());
        let dest_ep = opts.destination.as_ref().filter(|_| opts.mode.imports());

        if let (Some(src), Some(dst)) = (source_ep, dest_ep) {
            if src.same_target(dst) {
                warn!(endpoint = %src, "source and destination are the same tree");
            }
        }
        info!(
            mode = ?opts.mode,
            source = ?source_ep.map(ToString::to_string),
            destination = ?dest_ep.map(ToString::to_string),
            artifact = %opts.artifact.display(),
            "migration started"
        );

        let source = match source_ep {
            Some(ep) => Some(open(&resolver, factory, ep, &opts.auth).await?),
            None => None,
        };
        let destination = match dest_ep {
            Some(ep) => match open(&resolver, factory, ep, &opts.auth).await {
                Ok(session) => Some(session),
                Err(e) => {
                    close(source.as_deref()).await;
                    return Err(e);
                }
            },
            None => None,
        };

        let result = self
            .steps(run_id, source.as_deref(), destination.as_deref())
            .await;
        close(source.as_deref()).await;
        close(destination.as_deref()).await;

        match &result {
            Ok(report) => info!(
                exported = report.export.as_ref().map(|r| r.records),
                imported = report.import.as_ref().map(|r| r.written),
                "migration finished"
            ),
            Err(e) => warn!(error = %e, "migration failed"),
        }
        result
    }

    async fn steps(
        &self,
        run_id: Uuid,
        source: Option<&dyn TreeSession>,
        destination: Option<&dyn TreeSession>,
    ) -> MigrateResult<MigrationReport> {
        let opts = &self.options;
        let mut report = MigrationReport {
            run_id,
            artifact: opts.artifact.clone(),
            export: None,
            verified: None,
            import: None,
        };

        if let Some(source) = source {
            remove_artifact(&opts.artifact)?;
            let mut header = StreamHeader::new(source.describe(), ROOT);
            header.run_id = run_id;
            let mut writer = StreamWriter::new(BufWriter::new(File::create(&opts.artifact)?), header)?;
            let exported = TreeExporter::new(opts.export)
                .export(source, ROOT, &mut writer)
                .await?;
            let (buffered, _) = writer.finish()?;
            let file = buffered.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            info!(records = exported.records, artifact = %opts.artifact.display(), "artifact written");
            report.export = Some(exported);
        }

        if let Some(destination) = destination {
            let summary = verify_stream(BufReader::new(File::open(&opts.artifact)?))?;
            info!(records = summary.records, source = %summary.header.source, "artifact verified");
            report.verified = Some(summary);

            destination.ensure_root().await.map_err(|e| {
                MigrateError::from_session(&destination.describe(), ROOT, e)
            })?;
            let records = StreamReader::open(&opts.artifact)?;
            let imported = TreeImporter::new(opts.import)
                .import(destination, records)
                .await?;
            report.import = Some(imported);
        }

        Ok(report)
    }
}

async fn open(
    resolver: &EndpointResolver,
    factory: &dyn SessionFactory,
    endpoint: &Endpoint,
    auth: &AuthMode,
) -> MigrateResult<Box<dyn TreeSession>> {
    resolver
        .connect(factory, endpoint, auth)
        .await
        .map_err(|source| MigrateError::Connection {
            endpoint: endpoint.to_string(),
            source,
        })
}

async fn close(session: Option<&dyn TreeSession>) {
    let Some(session) = session else { return };
    if let Err(e) = session.close().await {
        warn!(endpoint = %session.describe(), error = %e, "failed to close session");
    }
}

fn remove_artifact(path: &Path) -> MigrateResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(artifact = %path.display(), "removed previous artifact");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
