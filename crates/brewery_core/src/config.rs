use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("worker count for stage `{stage}` must be greater than zero")]
    ZeroWorkers { stage: String },
    #[error("queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("unknown stage `{stage}` in {field}")]
    UnknownStage { field: &'static str, stage: String },
    #[error("pipeline has no stages")]
    NoStages,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("retry.max_delay_ms ({max_ms}) is below retry.base_delay_ms ({base_ms})")]
    DelayCapBelowBase { base_ms: u64, max_ms: u64 },
    #[error("global_timeout_ms must be greater than zero")]
    ZeroTimeout,
    #[error("max_consecutive_errors must be greater than zero")]
    ZeroErrorThreshold,
}

/// Backoff tuning for every external call of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl RetrySettings {
    /// Settings with no waiting between attempts, handy for tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// Parameters handed to a transform stage: job-wide `params` overlaid with
/// the stage's own `stage_params` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageParams(BTreeMap<String, String>);

impl StageParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StageParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Immutable configuration of one run. Built by the caller, validated and
/// frozen by `JobController::start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    /// Items per persistence batch. Independent of stage concurrency.
    pub batch_size: usize,
    pub default_workers: usize,
    pub stage_workers: BTreeMap<String, usize>,
    /// Bound of the hand-off queue between two adjacent stages.
    pub queue_capacity: usize,
    pub global_timeout_ms: Option<u64>,
    pub dry_run: bool,
    pub max_consecutive_errors: Option<usize>,
    pub max_items: Option<usize>,
    pub retry: RetrySettings,
    pub params: BTreeMap<String, String>,
    pub stage_params: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: "job".to_string(),
            batch_size: 4,
            default_workers: 3,
            stage_workers: BTreeMap::new(),
            queue_capacity: 8,
            global_timeout_ms: None,
            dry_run: false,
            max_consecutive_errors: Some(5),
            max_items: None,
            retry: RetrySettings::default(),
            params: BTreeMap::new(),
            stage_params: BTreeMap::new(),
        }
    }
}

impl JobConfig {
    pub fn workers_for(&self, stage: &str) -> usize {
        self.stage_workers
            .get(stage)
            .copied()
            .unwrap_or(self.default_workers)
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_ms.map(Duration::from_millis)
    }

    pub fn params_for(&self, stage: &str) -> StageParams {
        let mut merged = self.params.clone();
        if let Some(overrides) = self.stage_params.get(stage) {
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        StageParams(merged)
    }

    /// Checks the config against the stage names of the pipeline it will drive.
    pub fn validate<S: AsRef<str>>(&self, stage_names: &[S]) -> Result<(), ConfigError> {
        if stage_names.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        let known = |stage: &str| stage_names.iter().any(|s| s.as_ref() == stage);
        for (stage, workers) in &self.stage_workers {
            if !known(stage) {
                return Err(ConfigError::UnknownStage {
                    field: "stage_workers",
                    stage: stage.clone(),
                });
            }
            if *workers == 0 {
                return Err(ConfigError::ZeroWorkers {
                    stage: stage.clone(),
                });
            }
        }
        if self.default_workers == 0 {
            if let Some(stage) = stage_names
                .iter()
                .map(AsRef::as_ref)
                .find(|s| !self.stage_workers.contains_key(*s))
            {
                return Err(ConfigError::ZeroWorkers {
                    stage: stage.to_string(),
                });
            }
        }
        if let Some(stage) = self.stage_params.keys().find(|s| !known(s)) {
            return Err(ConfigError::UnknownStage {
                field: "stage_params",
                stage: stage.clone(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::DelayCapBelowBase {
                base_ms: self.retry.base_delay_ms,
                max_ms: self.retry.max_delay_ms,
            });
        }
        if self.global_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_consecutive_errors == Some(0) {
            return Err(ConfigError::ZeroErrorThreshold);
        }
        Ok(())
    }
}
