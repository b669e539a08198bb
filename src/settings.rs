use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct SimConfig {
    /// Number of stores created with the cluster.
    #[serde(default = "default_stores")]
    pub stores: usize,
    /// Replica-set size for each region, clamped to the store count.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// When false, every flush-status query succeeds (flat-accept mode).
    #[serde(default = "default_flush_simulation")]
    pub flush_simulation: bool,
    /// Checkpoint advances are drawn uniformly from `1..=max_checkpoint_step`.
    #[serde(default = "default_max_checkpoint_step")]
    pub max_checkpoint_step: u64,
    /// Seed for placement and checkpoint randomness. Absent means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_stores() -> usize {
    3
}

fn default_replicas() -> usize {
    3
}

fn default_flush_simulation() -> bool {
    true
}

fn default_max_checkpoint_step() -> u64 {
    256
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            stores: default_stores(),
            replicas: default_replicas(),
            flush_simulation: default_flush_simulation(),
            max_checkpoint_step: default_max_checkpoint_step(),
            seed: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn with_stores(mut self, stores: usize) -> Self {
        self.stores = stores;
        self
    }

    pub fn with_flush_simulation(mut self, enabled: bool) -> Self {
        self.flush_simulation = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
