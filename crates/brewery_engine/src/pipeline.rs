use std::collections::HashSet;
use std::sync::Arc;

use brewery_core::JobConfig;

use crate::collect::SourceCollector;
use crate::scheduler::StagePlan;
use crate::sink::PersistenceSink;
use crate::stage::{Fetcher, PipelineStage, Transformer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("pipeline has no source collector")]
    MissingCollector,
    #[error("pipeline has no persistence sink")]
    MissingSink,
    #[error("pipeline has no stages")]
    NoStages,
    #[error("stage `{0}` is declared twice")]
    DuplicateStage(String),
}

/// The adapters of one job: where items come from, the ordered stages they
/// pass through, and where finished items go.
#[derive(Clone)]
pub struct Pipeline {
    collector: Arc<dyn SourceCollector>,
    stages: Vec<Arc<PipelineStage>>,
    sink: Arc<dyn PersistenceSink>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn collector(&self) -> &Arc<dyn SourceCollector> {
        &self.collector
    }

    pub fn sink(&self) -> &Arc<dyn PersistenceSink> {
        &self.sink
    }

    pub fn stages(&self) -> &[Arc<PipelineStage>] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Resolves worker counts and parameters of every stage against `config`.
    pub fn plans(&self, config: &JobConfig) -> Vec<StagePlan> {
        self.stages
            .iter()
            .map(|stage| StagePlan {
                stage: stage.clone(),
                workers: config.workers_for(stage.name()),
                params: config.params_for(stage.name()),
            })
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    collector: Option<Arc<dyn SourceCollector>>,
    stages: Vec<PipelineStage>,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl PipelineBuilder {
    pub fn collector(mut self, collector: impl SourceCollector + 'static) -> Self {
        self.collector = Some(Arc::new(collector));
        self
    }

    pub fn fetch(self, name: impl Into<String>, fetcher: impl Fetcher + 'static) -> Self {
        self.stage(PipelineStage::fetch(name, fetcher))
    }

    pub fn transform(
        self,
        name: impl Into<String>,
        transformer: impl Transformer + 'static,
    ) -> Self {
        self.stage(PipelineStage::transform(name, transformer))
    }

    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn sink(mut self, sink: impl PersistenceSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let collector = self.collector.ok_or(BuildError::MissingCollector)?;
        let sink = self.sink.ok_or(BuildError::MissingSink)?;
        if self.stages.is_empty() {
            return Err(BuildError::NoStages);
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(BuildError::DuplicateStage(stage.name().to_string()));
            }
        }
        Ok(Pipeline {
            collector,
            stages: self.stages.into_iter().map(Arc::new).collect(),
            sink,
        })
    }
}
