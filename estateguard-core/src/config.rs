//! Runtime configuration.
//!
//! Sources, in increasing precedence: built-in defaults, an optional
//! `estateguard.{toml,yaml,json}` file in the working directory, then
//! `CORE_`-prefixed environment variables with `__` as the nesting
//! separator (`CORE_QUEUE__BACKEND=stream`). Configuration is captured by
//! value at startup; there is no live reload.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use estateguard_api::ApiConfig;
use estateguard_manifest::Version;
use estateguard_pipeline::{PipelineConfig, RetryPolicy, SourcePumpConfig};
use estateguard_plugins::PluginManagerConfig;
use estateguard_queue::{MemoryQueueConfig, StreamQueueConfig};
use estateguard_scoring::ScoringConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub node: NodeSettings,
    pub queue: QueueSettings,
    pub pipeline: PipelineSettings,
    pub scoring: ScoringSettings,
    pub api: ApiSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Stable node identity; generated when absent.
    pub node_id: Option<String>,
    /// Root directory scanned for plugin manifests.
    pub plugin_dir: PathBuf,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_id: None,
            plugin_dir: PathBuf::from("./plugins"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Ring buffers in process memory; dev and test only.
    Memory,
    /// Durable stream log with consumer groups.
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    pub data_dir: PathBuf,
    pub consumer_group: String,
    pub consumer_name: String,
    pub block_interval_ms: u64,
    pub max_pending: usize,
    pub requeue_limit: u32,
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Stream,
            data_dir: PathBuf::from("./data/queue"),
            consumer_group: "estateguard".to_string(),
            consumer_name: "worker-1".to_string(),
            block_interval_ms: 500,
            max_pending: 1000,
            requeue_limit: 1,
            capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_retries: u32,
    pub listing_deadline_secs: u64,
    pub shutdown_deadline_secs: u64,
    pub fraud_event_threshold: f64,
    pub idempotency_window: usize,
    pub source_poll_interval_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            listing_deadline_secs: 60,
            shutdown_deadline_secs: 10,
            fraud_event_threshold: 70.0,
            idempotency_window: 4096,
            source_poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub deadline_secs: u64,
    pub confidence_threshold: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            deadline_secs: 10,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// `json` (one object per line) or `pretty` for local work.
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl GuardConfig {
    /// Merge defaults, the optional config file, and `CORE_*` environment
    /// variables.
    pub fn load() -> Result<Self> {
        let defaults =
            config::Config::try_from(&GuardConfig::default()).context("serializing defaults")?;
        let merged = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("estateguard").required(false))
            .add_source(config::Environment::with_prefix("CORE").separator("__"))
            .build()
            .context("building configuration")?;
        merged
            .try_deserialize()
            .context("deserializing configuration")
    }

    pub fn manager_config(&self, core_version: Version) -> PluginManagerConfig {
        PluginManagerConfig {
            root_dir: self.node.plugin_dir.clone(),
            core_version,
            ..PluginManagerConfig::default()
        }
    }

    pub fn memory_queue_config(&self) -> MemoryQueueConfig {
        MemoryQueueConfig {
            capacity: self.queue.capacity,
            requeue_limit: self.queue.requeue_limit,
            ..MemoryQueueConfig::default()
        }
    }

    pub fn stream_queue_config(&self) -> StreamQueueConfig {
        StreamQueueConfig {
            data_dir: self.queue.data_dir.clone(),
            consumer_group: self.queue.consumer_group.clone(),
            consumer_name: self.queue.consumer_name.clone(),
            block_interval: Duration::from_millis(self.queue.block_interval_ms),
            max_pending: self.queue.max_pending,
            requeue_limit: self.queue.requeue_limit,
            max_stream_len: self.queue.capacity,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy {
                max_retries: self.pipeline.max_retries,
            },
            listing_deadline: Duration::from_secs(self.pipeline.listing_deadline_secs),
            shutdown_deadline: Duration::from_secs(self.pipeline.shutdown_deadline_secs),
            fraud_event_threshold: self.pipeline.fraud_event_threshold,
            idempotency_window: self.pipeline.idempotency_window,
        }
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            deadline: Duration::from_secs(self.scoring.deadline_secs),
            confidence_threshold: self.scoring.confidence_threshold,
        }
    }

    pub fn source_pump_config(&self) -> SourcePumpConfig {
        SourcePumpConfig {
            poll_interval: Duration::from_secs(self.pipeline.source_poll_interval_secs),
            max_retries: self.pipeline.max_retries,
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            bind_address: self.api.bind_address.clone(),
            port: self.api.port,
            cors_enabled: self.api.cors_enabled,
        }
    }
}
