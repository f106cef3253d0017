mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use kept_backup::{BasicRestore, RestoreGrouper, RetentionSweeper};
use kept_config::{Settings, StoreSettings};
use kept_storage::StoreHandle;
use kept_storage::backend::{LocalStore, ReadOnlyStore};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const STORE_NAME: &str = "kept";

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

async fn open_store(settings: &StoreSettings) -> Result<StoreHandle> {
    match settings {
        StoreSettings::Local { root } => {
            let store = LocalStore::new(STORE_NAME, root).or_raise(|| ErrorKind::Store)?;
            Ok(Arc::new(store))
        },
        #[cfg(feature = "s3")]
        StoreSettings::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            key_id,
            key_secret,
        } => {
            let store = kept_storage::backend::S3Store::new(
                STORE_NAME,
                bucket,
                prefix.clone(),
                region,
                endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Store)?;
            Ok(Arc::new(store))
        },
        #[cfg(not(feature = "s3"))]
        StoreSettings::S3 { .. } => exn::bail!(ErrorKind::UnsupportedStore("s3")),
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupted, finishing the current change"),
            Err(err) => tracing::warn!(error = %err, "Unable to listen for Ctrl-C"),
        }
        token.cancel();
    });
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    let store = open_store(&settings.store).await?;
    match command {
        Command::Backup => {
            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            kept_backup::run_backup(store, &settings.backup, cancel).await.or_raise(|| ErrorKind::Backup)?;
        },
        Command::Retention { dry_run } => {
            let store: StoreHandle = match dry_run {
                true => Arc::new(ReadOnlyStore::new(store)),
                false => store,
            };
            let report = RetentionSweeper::new(store)
                .sweep(&settings.retention.folders)
                .await
                .or_raise(|| ErrorKind::Retention)?;
            tracing::info!(examined = report.examined, deleted = report.deleted, dry_run, "Retention finished");
        },
        Command::Restore => {
            let report = RestoreGrouper::new(store)
                .restore_all(&settings.restore.jobs)
                .await
                .or_raise(|| ErrorKind::Restore)?;
            tracing::info!(groups = report.groups, backups = report.backups, logs = report.logs, "Restore finished");
        },
        Command::RestoreBasic => {
            let restored = BasicRestore::new(store)
                .restore_all(&settings.restore.basic)
                .await
                .or_raise(|| ErrorKind::Restore)?;
            tracing::info!(restored, "Basic restore finished");
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match kept_config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(settings) => run(cli.command, settings).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "{}", &*err);
            ExitCode::FAILURE
        },
    }
}
