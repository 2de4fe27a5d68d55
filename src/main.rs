//! ==============================================================================
//! main.rs - sensor gateway entry point
//! ==============================================================================
//!
//! purpose:
//!     accepts a bounded number of tcp connections from sensor nodes, decodes
//!     their fixed-shape readings and fans every reading out, in order, to two
//!     independent consumers: the averaging/alerting process and the csv store.
//!
//! responsibilities:
//!     - parse the command line and load gateway.toml
//!     - start the event-log relay (gateway.log)
//!     - build the shared queue with one registration per consumer
//!     - bind the listening port (fatal on failure)
//!     - run the acceptor and both consumers on their own threads
//!     - wait for everyone to see end-of-stream, then flush the event log
//!
//! architecture:
//!
//!     ┌──────────────┐      ┌───────────┐
//!     │ sensor node  │─tcp─►│  worker   │──┐
//!     └──────────────┘      └───────────┘  │ push
//!     ┌──────────────┐      ┌───────────┐  │       ┌──────────────┐  pop  ┌──────────┐
//!     │ sensor node  │─tcp─►│  worker   │──┼──────►│ shared queue │──────►│ datamgr  │
//!     └──────────────┘      └───────────┘  │       │  (ack'd fifo)│──────►│ storage  │
//!                   acceptor (≤ M conns) ──┘       └──────────────┘       └──────────┘
//!                     └─ joins workers, then pushes end-of-stream
//!
//!     every component reports user-visible events to the log relay.
//!
//! relationships:
//!     - uses: acceptor.rs, worker.rs, queue.rs (ingestion core)
//!     - uses: datamgr.rs, storage.rs, consumer.rs (downstream)
//!     - uses: logsink.rs, config.rs
//!
//! ==============================================================================

mod acceptor;
mod config;
mod consumer;
mod datamgr;
mod domain;
mod logsink;
mod queue;
mod storage;
mod wire;
mod worker;

use acceptor::Acceptor;
use config::GatewayConfig;
use consumer::drain;
use datamgr::DataManager;
use domain::ConsumerId;
use logsink::{LogRelay, LogSink};
use queue::SharedQueue;
use storage::StorageManager;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sensor-gateway", about = "Ingest sensor readings over TCP and fan them out")]
struct Cli {
    /// tcp port sensor nodes connect to (overrides server.port)
    port: Option<u16>,

    /// connections to accept before ingestion shuts down (overrides server.max_connections)
    max_conn: Option<usize>,

    /// explicit config file instead of config/gateway.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration, command line wins over the file
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::load_or_default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(max_conn) = cli.max_conn {
        config.server.max_connections = max_conn;
    }
    config.validate()?;

    init_tracing(&config.logging.level);
    config.print_summary();

    // step 2: event log relay
    let (log_handle, relay) = LogRelay::spawn(&config.logging.event_log)?;
    let events: Arc<dyn LogSink> = Arc::new(log_handle);

    // step 3: queue and consumers, registered before the first push
    let queue = Arc::new(SharedQueue::new([ConsumerId::DATAMGR, ConsumerId::STORAGE])?);
    let registered: Vec<String> = queue.consumers().iter().map(ToString::to_string).collect();
    tracing::info!("[STARTUP] queue registered {}", registered.join(", "));
    let mut datamgr = DataManager::from_config(&config.datamgr, Arc::clone(&events))?;
    let mut storage = StorageManager::from_config(&config.storage, Arc::clone(&events))?;

    // step 4: listening endpoint
    let acceptor = match Acceptor::bind(
        ("0.0.0.0", config.server.port),
        config.server.max_connections,
        config.server.idle_timeout(),
        Arc::clone(&queue),
        Arc::clone(&events),
    ) {
        Ok(acceptor) => acceptor,
        Err(e) => {
            tracing::error!("[STARTUP] Fatal: {:#}", e);
            std::process::exit(1);
        }
    };
    match acceptor.local_addr() {
        Ok(addr) => tracing::info!("[STARTUP] bound {}", addr),
        Err(e) => tracing::warn!("[STARTUP] bound address unavailable: {}", e),
    }
    drop(events);

    // step 5: run everything on dedicated threads
    let datamgr_task = {
        let queue = Arc::clone(&queue);
        tokio::task::spawn_blocking(move || drain(&queue, ConsumerId::DATAMGR, &mut datamgr))
    };
    let storage_task = {
        let queue = Arc::clone(&queue);
        tokio::task::spawn_blocking(move || drain(&queue, ConsumerId::STORAGE, &mut storage))
    };
    let acceptor_task = tokio::task::spawn_blocking(move || acceptor.run());

    match acceptor_task.await? {
        Ok(served) => tracing::info!("[ACCEPTOR] served {} connection(s)", served),
        Err(e) => {
            tracing::error!("[ACCEPTOR] Fatal: {:#}", e);
            std::process::exit(1);
        }
    }

    for (name, task) in [("DATAMGR", datamgr_task), ("STORAGE", storage_task)] {
        match task.await? {
            Ok(consumed) => tracing::info!("[{}] done, {} readings", name, consumed),
            Err(e) => tracing::error!("[{}] stopped: {:#}", name, e),
        }
    }

    // every LogHandle is gone now; wait for the relay to flush the file
    relay.await??;
    tracing::info!("[SHUTDOWN] gateway stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}
