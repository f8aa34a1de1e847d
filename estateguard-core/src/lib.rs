//! # EstateGuard Core
//!
//! Central wiring and lifecycle for the node: configuration, logging, and
//! the `EstateGuard` struct that constructs every subsystem, starts them in
//! dependency order and unwinds them in reverse.
//!
//! Subsystem order matters. The queue must be connected before the
//! orchestrator subscribes; plugins must be loaded and enabled before the
//! source pump starts asking them for listings; the admin API goes up last
//! so operators never see a half-wired node.

mod config;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use estateguard_api::AdminApi;
use estateguard_manifest::Version;
use estateguard_pipeline::{ProcessingOrchestrator, SourcePump};
use estateguard_plugins::{EntrypointRegistry, PluginManager};
use estateguard_queue::{InMemoryQueue, MessageQueue, StreamQueue};
use estateguard_scoring::RiskScorer;

pub use config::{
    ApiSettings, GuardConfig, LogSettings, NodeSettings, PipelineSettings, QueueBackend,
    QueueSettings, ScoringSettings,
};
pub use logging::init_logging;

/// The assembled node.
pub struct EstateGuard {
    node_id: String,
    config: GuardConfig,
    manager: Arc<PluginManager>,
    queue: Arc<dyn MessageQueue>,
    orchestrator: Arc<ProcessingOrchestrator>,
    pump: SourcePump,
    api: Option<AdminApi>,
}

impl EstateGuard {
    /// Construct every subsystem from configuration. Nothing is started
    /// yet; `start` does that in dependency order.
    pub fn new(config: GuardConfig) -> Result<Self> {
        let node_id = config
            .node
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let core_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .unwrap_or_else(|_| Version::new(0, 1, 0));

        let manager = Arc::new(PluginManager::new(
            config.manager_config(core_version),
            EntrypointRegistry::with_builtins(),
        ));

        let queue: Arc<dyn MessageQueue> = match config.queue.backend {
            QueueBackend::Memory => Arc::new(InMemoryQueue::new(config.memory_queue_config())),
            QueueBackend::Stream => Arc::new(StreamQueue::new(config.stream_queue_config())),
        };

        let scorer = RiskScorer::new(manager.registry(), config.scoring_config());
        let orchestrator = Arc::new(ProcessingOrchestrator::new(
            config.pipeline_config(),
            Arc::clone(&queue),
            manager.registry(),
            scorer,
        ));
        let pump = SourcePump::new(
            config.source_pump_config(),
            Arc::clone(&queue),
            manager.registry(),
        );
        let api = config
            .api
            .enabled
            .then(|| AdminApi::new(config.api_config(), Arc::clone(&manager)));

        Ok(Self {
            node_id,
            config,
            manager,
            queue,
            orchestrator,
            pump,
            api,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn manager(&self) -> Arc<PluginManager> {
        Arc::clone(&self.manager)
    }

    pub fn orchestrator(&self) -> Arc<ProcessingOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Bring the node up: queue, plugins, orchestrator, source pump, API.
    pub async fn start(&self) -> Result<()> {
        info!(node_id = %self.node_id, "starting estateguard node");

        self.queue.connect().await.context("connecting queue")?;

        let report = self.manager.load_all().await;
        for (path, err) in &report.failed {
            warn!(path = %path.display(), error = %err, "plugin failed to load");
        }
        info!(loaded = report.loaded.len(), "plugins loaded");

        for (id, err) in self.manager.enable_all().await {
            warn!(plugin = %id, error = %err, "plugin failed to enable");
        }

        self.orchestrator
            .start()
            .await
            .context("starting processing orchestrator")?;
        self.pump.start();

        if let Some(api) = &self.api {
            api.start().await.context("starting admin API")?;
        }

        info!(node_id = %self.node_id, "estateguard node started");
        Ok(())
    }

    /// Graceful shutdown in reverse start order. The orchestrator drains
    /// in-flight listings within its deadline and disconnects the queue.
    pub async fn stop(&self) -> Result<()> {
        info!(node_id = %self.node_id, "stopping estateguard node");

        if let Some(api) = &self.api {
            api.stop().await;
        }
        self.pump.stop().await;
        self.orchestrator
            .shutdown()
            .await
            .context("shutting down orchestrator")?;
        self.manager.shutdown_all().await;

        info!(node_id = %self.node_id, "estateguard node stopped");
        Ok(())
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}
