use serde::{Deserialize, Serialize};

use crate::classifier::{RemoteConfig, TrainOptions};
use crate::runtime::RuntimeConfig;

/// Minimum number of samples every class needs before training may start.
pub const DEFAULT_MIN_SAMPLES_PER_CLASS: usize = 3;

/// Settings for the whole training-and-inference pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub min_samples_per_class: usize,
    pub train: TrainOptions,
    pub remote: RemoteConfig,
    pub runtime: RuntimeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_samples_per_class: DEFAULT_MIN_SAMPLES_PER_CLASS,
            train: TrainOptions::default(),
            remote: RemoteConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, with the remote classifier configured from the environment.
    pub fn from_env() -> Self {
        Self {
            remote: RemoteConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn with_min_samples_per_class(mut self, min: usize) -> Self {
        self.min_samples_per_class = min;
        self
    }

    pub fn with_train_options(mut self, train: TrainOptions) -> Self {
        self.train = train;
        self
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }
}
