// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Command-line tool taking consistent backups of a sharded transactional
//! key-value cluster.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use keelback_cluster_client::{
    ClusterLockResolver, HttpCatalog, HttpPlacementDriver, HttpStoreClient,
    catalog::CatalogOptions, pd::PlacementDriver,
};
use keelback_service::{
    backup::BackupClient,
    config::BackupConfig,
    progress::start_progress,
    storage::make_storage,
};
use keelback_utils::config::LoadConfig;
use prometheus::Registry;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[clap(rename_all = "kebab-case")]
#[command(
    author,
    version,
    about = "Consistent backups of a sharded key-value cluster",
    long_about = None
)]
struct App {
    /// Placement driver endpoint.
    #[clap(long, default_value = "http://127.0.0.1:2379")]
    pd: String,
    /// SQL gateway endpoint used for catalog access.
    #[clap(long, default_value = "http://127.0.0.1:4000")]
    catalog: String,
    /// Engine configuration file; built-in defaults apply if omitted.
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
#[clap(rename_all = "kebab-case")]
enum Commands {
    /// Back up cluster data to external storage.
    #[command(subcommand)]
    Backup(BackupCommands),
}

#[derive(Subcommand, Debug, Clone)]
#[clap(rename_all = "kebab-case")]
enum BackupCommands {
    /// Snapshot every non-system database.
    Full {
        #[clap(flatten)]
        args: BackupArgs,
    },
    /// Snapshot a single table.
    Table {
        #[clap(flatten)]
        args: BackupArgs,
        /// Database holding the table.
        #[clap(long)]
        db: String,
        /// The table to back up.
        #[clap(short, long)]
        table: String,
    },
}

#[derive(Args, Debug, Clone)]
struct BackupArgs {
    /// Destination storage url, e.g. `local:///backups/nightly` or
    /// `s3://bucket/prefix`.
    #[clap(short = 's', long = "storage")]
    storage: String,
    /// Back up the state this long ago, e.g. 1m or 1h. Must not cross the
    /// GC safepoint.
    #[clap(long, value_parser = humantime::parse_duration)]
    timeago: Option<Duration>,
    /// Rate limit per storage node, in MiB/s; 0 disables the limit.
    #[clap(long, default_value_t = 0)]
    ratelimit: u64,
    /// Backup threads per storage node.
    #[clap(long, default_value_t = 4)]
    concurrency: u32,
    /// Verify file checksums against the catalog before writing the
    /// manifest.
    #[clap(long, action, hide = true)]
    checksum: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let app = App::parse();
    let config = match &app.config {
        Some(path) => BackupConfig::load(path)?,
        None => BackupConfig::default(),
    };
    match app.command.clone() {
        Commands::Backup(command) => run_backup(&app, config, command).await,
    }
}

async fn run_backup(app: &App, config: BackupConfig, command: BackupCommands) -> Result<()> {
    let (args, table) = match &command {
        BackupCommands::Full { args } => (args, None),
        BackupCommands::Table { args, db, table } => (args, Some((db.as_str(), table.as_str()))),
    };
    if args.storage.is_empty() {
        bail!("empty backup storage is not allowed");
    }
    if args.concurrency == 0 {
        bail!("at least one backup thread is required");
    }
    if let Some((db, table)) = table {
        if db.is_empty() {
            bail!("empty database name is not allowed");
        }
        if table.is_empty() {
            bail!("empty table name is not allowed");
        }
    }

    let pd = Arc::new(HttpPlacementDriver::new(&app.pd)?);
    let stores = pd.get_all_stores().await?;
    let store_client = Arc::new(HttpStoreClient::new(&stores)?);
    let catalog = Arc::new(HttpCatalog::new(&app.catalog, CatalogOptions::default())?);
    let lock_resolver = Arc::new(ClusterLockResolver::new(pd.clone(), store_client.clone()));

    let registry = Registry::new();
    let mut client = BackupClient::new(
        pd,
        store_client,
        catalog,
        lock_resolver,
        config,
        &registry,
    )
    .await?;
    client.set_storage(make_storage(&args.storage).await?).await?;

    let backup_ts = client.backup_ts(args.timeago).await?;
    let (label, ranges) = match table {
        None => ("full backup", client.plan_all_tables(backup_ts).await?),
        Some((db, table)) => (
            "table backup",
            client.plan_table(db, table, backup_ts).await?,
        ),
    };

    // Advisory only; sizes the progress bar.
    let mut approximate_regions = 0;
    match table {
        None => approximate_regions = client.range_region_count(&[], &[]).await?,
        Some(_) => {
            for range in &ranges {
                approximate_regions +=
                    client.range_region_count(&range.start, &range.end).await?;
            }
        }
    }
    let (progress, progress_task) = start_progress(label, approximate_regions as u64);

    // The protocol takes bytes per second, per node.
    let rate_limit = args.ratelimit * 1024 * 1024;
    client
        .backup_ranges(
            ranges,
            &args.storage,
            backup_ts,
            rate_limit,
            args.concurrency,
            &progress,
        )
        .await?;
    client.complete_meta().await?;

    if args.checksum && !client.fast_checksum()? {
        tracing::error!("backup fast checksum failed");
    }

    client.save_backup_meta(&args.storage).await?;
    drop(progress);
    let _ = progress_task.await;
    tracing::info!("backup complete");
    Ok(())
}
