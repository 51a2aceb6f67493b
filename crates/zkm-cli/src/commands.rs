use std::time::Duration;

use colored::Colorize;
use tracing::debug;
use zkm_client::ZkSessionFactory;
use zkm_migrate::{
    EphemeralPolicy, ExportOptions, ImportOptions, Migration, MigrationMode, MigrationOptions,
    MigrationReport,
};
use zkm_session::{AuthMode, ConnectOptions};

use crate::cli::Cli;
use crate::config::MigratorConfig;

/// Merge defaults, the optional config file and command-line flags, in
/// increasing order of precedence.
pub fn build_options(cli: &Cli) -> anyhow::Result<MigrationOptions> {
    let mut config = match &cli.config {
        Some(path) => MigratorConfig::load(path)?,
        None => MigratorConfig::default(),
    };
    if let Some(file) = &cli.file {
        config.file = file.clone();
    }
    if let Some(n) = cli.concurrency {
        config.concurrency = n;
    }
    if let Some(ms) = cli.session_timeout_ms {
        config.session_timeout_ms = ms;
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    config.skip_ephemeral |= cli.skip_ephemeral;

    let mode = if cli.export_only {
        MigrationMode::ExportOnly
    } else if cli.import_only {
        MigrationMode::ImportOnly
    } else {
        MigrationMode::Full
    };

    Ok(MigrationOptions {
        source: cli.source.clone(),
        destination: cli.destination.clone(),
        auth: AuthMode::from_options(cli.auth.as_deref(), cli.krb_conf.as_deref())?,
        artifact: config.file,
        mode,
        connect: ConnectOptions {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            session_timeout: Duration::from_millis(config.session_timeout_ms),
        },
        export: ExportOptions {
            concurrency: config.concurrency,
        },
        import: ImportOptions {
            ignore_source_acl: cli.ignore_source,
            use_existing_acl: cli.use_existing_acl,
            ephemeral: if config.skip_ephemeral {
                EphemeralPolicy::Skip
            } else {
                EphemeralPolicy::Persist
            },
        },
    })
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = build_options(&cli)?;
    debug!(
        auth = options.auth.display_name(),
        concurrency = options.export.concurrency,
        import = ?options.import,
        "resolved options"
    );
    let migration = Migration::new(options)?;
    let report = migration.run(&ZkSessionFactory::new()).await?;
    print_report(migration.options(), &report);
    Ok(())
}

fn print_report(options: &MigrationOptions, report: &MigrationReport) {
    let artifact = report.artifact.display().to_string();
    if let Some(export) = &report.export {
        let source = options.source.as_ref().map(ToString::to_string).unwrap_or_default();
        println!(
            "{} Exported {} nodes from {} into {}",
            "✓".green().bold(),
            export.records.to_string().bold(),
            source.cyan(),
            artifact.yellow()
        );
        if export.vanished > 0 {
            println!("  {} {} nodes vanished during export", "!".yellow(), export.vanished);
        }
    }
    if let Some(summary) = &report.verified {
        println!(
            "{} Verified {} ({} records, checksum {})",
            "✓".green().bold(),
            artifact.yellow(),
            summary.records,
            summary.checksum.get(..12).unwrap_or(&summary.checksum).dimmed()
        );
    }
    if let Some(import) = &report.import {
        let destination = options.destination.as_ref().map(ToString::to_string).unwrap_or_default();
        println!(
            "{} Imported {} nodes into {} ({} created, {} updated, {} skipped)",
            "✓".green().bold(),
            import.written.to_string().bold(),
            destination.cyan(),
            import.created,
            import.updated,
            import.skipped
        );
    }
    println!("  Run: {}", report.run_id.to_string().dimmed());
}
