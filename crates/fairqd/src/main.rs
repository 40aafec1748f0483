//! fairqd — the fairq priority controller daemon.
//!
//! Single binary that assembles the priority subsystems:
//! - State store (redb): jobs, associations, partitions, QOS
//! - Association share tree with decayed usage
//! - Priority backend facade (multifactor / decrement / basic)
//! - Decay loop (multifactor only)
//! - REST API for submission and the factors report
//!
//! # Usage
//!
//! ```text
//! fairqd run --config fairq.toml --port 7321 [--seed cluster.toml]
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{info, warn};

use fairq_assoc::AssocStore;
use fairq_core::{BackendKind, FairqConfig};
use fairq_decay::{DecayLoop, DecayState};
use fairq_facade::{PluginContext, PriorityPlugin};
use fairq_persist::DecayClock;
use fairq_state::StateStore;

mod seed;

#[derive(Parser)]
#[command(name = "fairqd", about = "fairq priority controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller.
    Run {
        /// Path to the controller config file.
        #[arg(long, default_value = "fairq.toml")]
        config: PathBuf,

        /// Port for the REST API.
        #[arg(long, default_value = "7321")]
        port: u16,

        /// Optional cluster seed file (associations, partitions, QOS)
        /// loaded into the state store before startup.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fairqd=debug,fairq=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, port, seed } => run(&config, port, seed.as_deref()).await,
    }
}

async fn run(
    config_path: &std::path::Path,
    port: u16,
    seed_path: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    info!("fairq controller starting");

    let config = FairqConfig::from_file(config_path)?;
    let backend = config.priority.backend;

    // Ensure the state directory exists.
    std::fs::create_dir_all(&config.state.save_location)?;
    let db_path = config.state.save_location.join("fairq.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Optional cluster seed.
    if let Some(path) = seed_path {
        let loaded = seed::load_seed(&store, path)?;
        info!(
            associations = loaded.associations,
            partitions = loaded.partitions,
            qos = loaded.qos,
            "cluster seed applied"
        );
    }

    // Partition and QOS priorities are normalized against the current
    // cluster maximum on every startup.
    normalize_tables(&store)?;

    // Association share tree, seeded from the persisted records so a
    // restart keeps accumulated usage.
    let assoc_records = store.list_assocs()?;
    let qos_records = store.list_qos()?;
    let tree = AssocStore::load(&assoc_records, qos_records, config.fairshare_enabled())?;
    info!(associations = tree.len(), "share tree loaded");

    // Decay clock: how long were we down?
    let clock = DecayClock::new(&config.state.save_location);
    let last_ran = clock.load();
    if last_ran > 0 {
        info!(last_ran, "decay clock restored, catch-up decay will run");
    }

    // ── Shared context ─────────────────────────────────────────

    let config = Arc::new(RwLock::new(config));
    let assoc = Arc::new(RwLock::new(tree));
    let decay_state = Arc::new(Mutex::new(DecayState {
        last_ran,
        ..Default::default()
    }));

    let plugin = Arc::new(PriorityPlugin::new(
        backend,
        PluginContext {
            config: config.clone(),
            assoc: assoc.clone(),
            store: store.clone(),
            decay_state: decay_state.clone(),
        },
    ));
    // A failed init here is fatal: without a usage ceiling the
    // multifactor backend cannot price anything meaningfully.
    plugin.init().await?;
    info!(?backend, "priority backend ready");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Decay loop (multifactor only) ──────────────────────────

    let decay_handle = if backend == BackendKind::Multifactor {
        let decay = DecayLoop::new(
            config.clone(),
            assoc.clone(),
            store.clone(),
            clock,
            decay_state.clone(),
        )
        .await;
        let decay_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            decay.run(decay_shutdown).await;
        }))
    } else {
        info!(?backend, "decay loop not required");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let router = fairq_api::build_router(plugin, store, assoc);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the decay loop to finish its tick.
    if let Some(handle) = decay_handle {
        let _ = handle.await;
    }

    info!("fairq controller stopped");
    Ok(())
}

/// Stamp `norm_priority` on the persisted partition and QOS tables.
fn normalize_tables(store: &StateStore) -> anyhow::Result<()> {
    let mut partitions = store.list_partitions()?;
    if !partitions.is_empty() {
        fairq_state::normalize_partitions(&mut partitions);
        for p in &partitions {
            store.put_partition(p)?;
        }
    }

    let mut qos = store.list_qos()?;
    if !qos.is_empty() {
        fairq_state::normalize_qos(&mut qos);
        for q in &qos {
            if let Err(e) = store.put_qos(q) {
                warn!(qos_id = q.id, error = %e, "failed to persist QOS normalization");
            }
        }
    }
    Ok(())
}
