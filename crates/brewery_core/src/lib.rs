//! Brewery core: job model, error taxonomy and the pure job state machine.
mod config;
mod effect;
mod error;
mod item;
mod msg;
mod progress;
mod state;
mod update;

pub use config::{ConfigError, JobConfig, RetrySettings, StageParams};
pub use effect::Effect;
pub use error::{ErrorKind, PipelineError};
pub use item::{
    dedupe_items, identity_key, normalize_url_for_dedupe, split_into_batches, Batch, ItemStatus,
    WorkItem,
};
pub use msg::Command;
pub use progress::{Progress, ProgressDelta, ProgressSnapshot};
pub use state::JobState;
pub use update::{update, TransitionError};
