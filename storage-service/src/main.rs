// SPDX-License-Identifier: GPL-3.0-only

//! storage-planner - plan, check and write storage layouts offline
//!
//! Works on JSON snapshots of a scanned system so that layouts can be tried
//! without touching any device.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use storage_contracts::StorageEvent;
use storage_planner::CustomLayout;
use storage_service::{GraphSnapshot, PartitioningMethod, ServiceConfig, StorageSession};
use storage_sys::{DirectoryReader, Discoverer};
use storage_types::{MountPointRequest, PartitioningRequest};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "storage-planner")]
#[command(about = "Plan installer storage layouts on device graph snapshots", version)]
struct PlannerCli {
    /// Service configuration (TOML)
    #[arg(long, global = true, default_value = "/etc/storage-planner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: PlannerCommand,
}

#[derive(Debug, Subcommand)]
enum PlannerCommand {
    /// Run a planner and print the resulting actions as JSON
    Plan {
        /// Device graph snapshot (JSON)
        #[arg(long)]
        graph: PathBuf,
        #[command(flatten)]
        method: MethodArgs,
    },
    /// Write fstab, crypttab and mdadm.conf of a snapshot
    Write {
        #[arg(long)]
        graph: PathBuf,
        /// Root of the target system
        #[arg(long)]
        target: PathBuf,
    },
    /// Look for installations in file systems unpacked under a directory
    Discover {
        #[arg(long)]
        graph: PathBuf,
        /// One directory per device name; defaults to the configured physical root
        #[arg(long)]
        roots: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct MethodArgs {
    /// Automatic partitioning request (TOML)
    #[arg(long)]
    auto: Option<PathBuf>,
    /// Declarative layout (TOML)
    #[arg(long)]
    custom: Option<PathBuf>,
    /// Mount point assignments (TOML, `[[mount]]` tables)
    #[arg(long)]
    manual: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManualLayout {
    mount: Vec<MountPointRequest>,
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

impl MethodArgs {
    fn method(&self) -> Result<PartitioningMethod> {
        if let Some(path) = &self.auto {
            return Ok(PartitioningMethod::Automatic(read_toml::<PartitioningRequest>(path)?));
        }
        if let Some(path) = &self.custom {
            return Ok(PartitioningMethod::Custom(read_toml::<CustomLayout>(path)?));
        }
        if let Some(path) = &self.manual {
            return Ok(PartitioningMethod::Manual(read_toml::<ManualLayout>(path)?.mount));
        }
        anyhow::bail!("one of --auto, --custom or --manual is required")
    }
}

fn load_session(config: &Path, graph: &Path) -> Result<StorageSession> {
    let config = ServiceConfig::load(config)?;
    let text = std::fs::read_to_string(graph).with_context(|| format!("reading {}", graph.display()))?;
    let storage = GraphSnapshot::from_json(&text)?.into_storage(config.settings())?;
    let session = StorageSession::new(config);
    session.load(storage)?;
    Ok(session)
}

async fn plan(session: &StorageSession, method: PartitioningMethod) -> Result<()> {
    let mut events = session.subscribe();
    let module = session.create_partitioning(method)?;
    let report = session.run_partitioning(module)?.join().await?;

    while let Ok(event) = events.try_recv() {
        if let StorageEvent::TaskProgress { message, .. } = event {
            tracing::debug!("{message}");
        }
    }
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    if !report.success() {
        for error in &report.errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("the storage configuration is not valid");
    }

    session.apply_partitioning(module)?;
    println!("{}", serde_json::to_string_pretty(&session.actions()?)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_service=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = PlannerCli::parse();
    tracing::debug!("storage-planner v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        PlannerCommand::Plan { graph, method } => {
            let session = load_session(&cli.config, &graph)?;
            plan(&session, method.method()?).await
        }
        PlannerCommand::Write { graph, target } => {
            let session = load_session(&cli.config, &graph)?;
            for path in session.write_configuration(&target)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        PlannerCommand::Discover { graph, roots } => {
            let session = load_session(&cli.config, &graph)?;
            let roots = roots.unwrap_or_else(|| session.config().physical_root.clone());
            let mut storage = session.storage()?;
            let reader = DirectoryReader::new(roots);
            let found = tokio::task::spawn_blocking(move || {
                Discoverer::new(&reader)
                    .find_existing_installations(&mut storage, &storage_contracts::NullMonitor)
            })
            .await??;
            for root in &found {
                for warning in &root.warnings {
                    tracing::warn!(root = %root.root.name, "{warning}");
                }
            }
            let roots: Vec<_> = found.into_iter().map(|found| found.root).collect();
            println!("{}", serde_json::to_string_pretty(&roots)?);
            Ok(())
        }
    }
}
