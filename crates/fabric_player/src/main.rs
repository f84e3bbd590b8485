// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fabric Player - headless frame loop for Fabric graphs
//!
//! Loads a RON config, builds the demo graph or loads a graph document, and
//! runs the frame scheduler against the software device. Command buffers
//! complete on a worker thread after a simulated GPU latency, which drives
//! the resource pool's deferred recycling.
//!
//! Usage: `fabric_player [config.ron]`

mod config;
mod demo;

use config::{ConfigError, PlayerConfig};
use fabric_graph::nodes::builtin_registry;
use fabric_graph::software::{SoftwareCommandBuffer, SoftwareDevice};
use fabric_graph::{
    DocumentError, ExecutionContext, Graph, GraphDocument, GraphRenderer, ResourceCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors that stop the player
#[derive(Debug, Error)]
enum PlayerError {
    /// Settings could not be read
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Graph document could not be read or written
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Demo graph could not be wired
    #[error("Demo graph error: {0}")]
    Demo(#[from] fabric_graph::ConnectionError),
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fabric_player=info,fabric_graph=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fabric Player v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    if let Err(e) = run(config_path) {
        tracing::error!("Player failed: {e}");
        std::process::exit(1);
    }
}

fn run(config_path: Option<PathBuf>) -> Result<(), PlayerError> {
    let config = match &config_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            PlayerConfig::load(path)?
        }
        None => PlayerConfig::default(),
    };
    tracing::debug!("effective config:\n{}", config.to_ron()?);

    let (mut graph, probe) = match &config.graph {
        Some(path) => (load_graph(path)?, None),
        None => {
            let demo = demo::build()?;
            (demo.graph, Some(demo.probe))
        }
    };
    tracing::info!(
        graph = %graph.name,
        nodes = graph.node_count(),
        connections = graph.connection_count(),
        "graph ready"
    );

    let device = Arc::new(SoftwareDevice::new());
    let resources = Arc::new(ResourceCache::with_config(device.clone(), config.resource_cache));
    let mut renderer = GraphRenderer::new(resources.clone());

    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let latency = config.completion_latency();
    let worker = std::thread::spawn(move || completion_worker(completion_rx, latency));

    let lifecycle = ExecutionContext::default();
    renderer.start_execution(&mut graph, &lifecycle);
    renderer.enable_execution(&mut graph, &lifecycle);

    let mut executed = 0;
    for frame in 0..config.frames {
        let command_buffer = device.make_command_buffer();
        let report = renderer.execute_at(&mut graph, config.frame_time(frame), Some(&*command_buffer));
        executed += report.executed.len();
        tracing::debug!(
            frame = report.frame_number,
            roots = report.roots.len(),
            executed = report.executed.len(),
            "frame done"
        );

        if completion_tx.send(command_buffer).is_err() {
            tracing::warn!(frame, "completion worker gone; stopping");
            break;
        }
    }

    drop(completion_tx);
    if worker.join().is_err() {
        tracing::error!("completion worker panicked");
    }

    renderer.disable_execution(&mut graph, &lifecycle);
    renderer.stop_execution(&mut graph, &lifecycle);

    let stats = resources.stats();
    tracing::info!(
        frames = config.frames,
        executed,
        heaps = stats.heaps_created,
        allocated = stats.resources_allocated,
        reused = stats.resources_reused,
        recycled = stats.resources_recycled,
        pooled = resources.available_count(),
        "playback finished"
    );
    if let Some(probe) = probe {
        tracing::info!(value = ?probe.value(), executions = probe.executions(), "preview");
    }

    if let Some(path) = &config.save_document {
        graph.to_document().save(path)?;
        tracing::info!(path = %path.display(), "graph saved");
    }

    renderer.teardown(&mut graph);
    Ok(())
}

fn load_graph(path: &std::path::Path) -> Result<Graph, DocumentError> {
    tracing::info!(path = %path.display(), "loading graph");
    let document = GraphDocument::load(path)?;
    let (graph, errors) = Graph::from_document(&document, &builtin_registry());
    for error in &errors {
        tracing::warn!("{error}");
    }
    Ok(graph)
}

/// Worker thread that completes command buffers after the simulated latency
fn completion_worker(mut rx: mpsc::UnboundedReceiver<Arc<SoftwareCommandBuffer>>, latency: Duration) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {e}; completing without latency");
            while let Some(command_buffer) = rx.blocking_recv() {
                command_buffer.complete();
            }
            return;
        }
    };

    rt.block_on(async {
        while let Some(command_buffer) = rx.recv().await {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            command_buffer.complete();
        }
    });
}
