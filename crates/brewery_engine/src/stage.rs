use std::fmt;
use std::sync::Arc;

use brewery_core::{ItemStatus, PipelineError, StageParams, WorkItem};

/// Retrieves the raw content behind an item's payload (an article URL, a
/// mailbox message id, a video id). Called from stage worker threads, so
/// implementations may block.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, item: &WorkItem) -> Result<String, PipelineError>;
}

/// One external text transformation (rewrite, structure, score, serialize).
pub trait Transformer: Send + Sync {
    fn transform(&self, text: &str, params: &StageParams) -> Result<String, PipelineError>;
}

impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn fetch(&self, item: &WorkItem) -> Result<String, PipelineError> {
        self.as_ref().fetch(item)
    }
}

impl<T: Transformer + ?Sized> Transformer for Arc<T> {
    fn transform(&self, text: &str, params: &StageParams) -> Result<String, PipelineError> {
        self.as_ref().transform(text, params)
    }
}

/// Adapts a closure into a [`Fetcher`].
pub struct FnFetcher<F>(pub F);

impl<F> FnFetcher<F>
where
    F: Fn(&WorkItem) -> Result<String, PipelineError> + Send + Sync,
{
    pub fn new(fetch: F) -> Self {
        Self(fetch)
    }
}

impl<F> Fetcher for FnFetcher<F>
where
    F: Fn(&WorkItem) -> Result<String, PipelineError> + Send + Sync,
{
    fn fetch(&self, item: &WorkItem) -> Result<String, PipelineError> {
        (self.0)(item)
    }
}

/// Adapts a closure into a [`Transformer`].
pub struct FnTransformer<F>(pub F);

impl<F> FnTransformer<F>
where
    F: Fn(&str, &StageParams) -> Result<String, PipelineError> + Send + Sync,
{
    pub fn new(transform: F) -> Self {
        Self(transform)
    }
}

impl<F> Transformer for FnTransformer<F>
where
    F: Fn(&str, &StageParams) -> Result<String, PipelineError> + Send + Sync,
{
    fn transform(&self, text: &str, params: &StageParams) -> Result<String, PipelineError> {
        (self.0)(text, params)
    }
}

#[derive(Clone)]
enum StageOp {
    Fetch(Arc<dyn Fetcher>),
    Transform(Arc<dyn Transformer>),
}

/// A named, ordered step of the pipeline.
#[derive(Clone)]
pub struct PipelineStage {
    name: String,
    op: StageOp,
}

impl PipelineStage {
    pub fn fetch(name: impl Into<String>, fetcher: impl Fetcher + 'static) -> Self {
        Self::from_fetcher(name, Arc::new(fetcher))
    }

    pub fn from_fetcher(name: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            name: name.into(),
            op: StageOp::Fetch(fetcher),
        }
    }

    pub fn transform(name: impl Into<String>, transformer: impl Transformer + 'static) -> Self {
        Self::from_transformer(name, Arc::new(transformer))
    }

    pub fn from_transformer(name: impl Into<String>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            name: name.into(),
            op: StageOp::Transform(transformer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status an item reaches once this stage succeeded for it.
    pub fn status_on_success(&self) -> ItemStatus {
        match self.op {
            StageOp::Fetch(_) => ItemStatus::Fetched,
            StageOp::Transform(_) => ItemStatus::Transformed,
        }
    }

    /// A single invocation of the stage function, without retries.
    pub fn apply(&self, item: &WorkItem, params: &StageParams) -> Result<String, PipelineError> {
        match &self.op {
            StageOp::Fetch(fetcher) => fetcher.fetch(item),
            StageOp::Transform(transformer) => transformer.transform(item.input(), params),
        }
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.op {
            StageOp::Fetch(_) => "fetch",
            StageOp::Transform(_) => "transform",
        };
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Typed failure of one stage for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub error: PipelineError,
    pub attempts: u32,
}

impl StageFailure {
    pub fn cancelled(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            error: PipelineError::Cancelled,
            attempts: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attempts {
            0 | 1 => write!(f, "{}: {}", self.stage, self.error),
            n => write!(f, "{}: {} (after {n} attempts)", self.stage, self.error),
        }
    }
}

/// Output of one stage for one item: the stage's text, or why it failed.
pub type StageResult = Result<String, StageFailure>;
