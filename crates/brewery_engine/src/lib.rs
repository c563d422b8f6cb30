//! Brewery engine: stage scheduling, retries, persistence and job control.
mod article;
mod collect;
mod controller;
mod decode;
mod filename;
mod http;
mod persist;
mod pipeline;
mod progress;
mod registry;
mod retry;
mod runner;
mod scheduler;
mod signals;
mod sink;
mod stage;

pub use article::ArticleExtractor;
pub use collect::{CollectError, SourceCollector, StaticCollector};
pub use controller::{JobController, StartError};
pub use decode::{decode_body, DecodeError};
pub use filename::record_filename;
pub use http::{HttpError, HttpFetcher, HttpSettings};
pub use persist::{ensure_output_dir, AtomicFileWriter, FileSink, ItemRecord, PersistError};
pub use pipeline::{BuildError, Pipeline, PipelineBuilder};
pub use progress::ProgressReporter;
pub use registry::{JobRegistry, RegistryError};
pub use retry::RetryPolicy;
pub use scheduler::{
    Completion, ConcurrencyScheduler, Next, ResultStream, SchedulerError, StagePlan,
};
pub use signals::{Checkpoint, RunSignals};
pub use sink::{
    MemorySink, PersistOutcome, PersistReport, PersistenceSink, ResultSink, StoredRecord,
};
pub use stage::{
    FnFetcher, FnTransformer, Fetcher, PipelineStage, StageFailure, StageResult, Transformer,
};
