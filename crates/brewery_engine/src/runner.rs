//! One execution of a job: collect, then stream each batch through the
//! stages and persist it, reporting every outcome to the progress board.

use std::sync::Arc;
use std::time::Instant;

use brewery_core::{dedupe_items, split_into_batches, Batch, JobConfig, ProgressDelta, WorkItem};
use brewery_logging::{brew_debug, brew_error, brew_info, brew_warn};

use crate::pipeline::Pipeline;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::scheduler::{ConcurrencyScheduler, Next, StagePlan};
use crate::signals::{Checkpoint, RunSignals};
use crate::sink::ResultSink;
use crate::stage::StageFailure;

const TIMED_OUT: &str = "global timeout elapsed";

/// How a run ended, from the runner's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunEnd {
    Exhausted,
    Cancelled,
    Failed(String),
}

pub(crate) struct JobRun {
    pub config: JobConfig,
    pub pipeline: Pipeline,
    pub signals: Arc<RunSignals>,
    pub reporter: Arc<ProgressReporter>,
}

impl JobRun {
    pub fn execute(self) -> RunEnd {
        let name = self.config.name.clone();
        brew_info!("job `{}`: collecting work items", name);
        let items = match self.pipeline.collector().collect(&self.config) {
            Ok(items) => items,
            Err(err) => {
                let reason = format!("collector failed: {err}");
                brew_error!("job `{}`: {}", name, reason);
                self.reporter.update(ProgressDelta::Log(reason.clone()));
                return RunEnd::Failed(reason);
            }
        };
        let items = self.prepare(items);
        let batches = split_into_batches(items, self.config.batch_size);
        let total: usize = batches.iter().map(Batch::len).sum();
        self.reporter.update_all([
            ProgressDelta::Planned {
                items: total,
                batches: batches.len(),
            },
            ProgressDelta::Log(format!("{total} item(s) in {} batch(es)", batches.len())),
        ]);
        brew_info!("job `{}`: {} item(s), {} batch(es)", name, total, batches.len());

        let end = BatchLoop::new(&self).run(batches);
        match &end {
            RunEnd::Exhausted => brew_info!("job `{}`: finished", name),
            RunEnd::Cancelled => brew_info!("job `{}`: stopped", name),
            RunEnd::Failed(reason) => {
                brew_error!("job `{}`: {}", name, reason);
                self.reporter
                    .update(ProgressDelta::Log(format!("job failed: {reason}")));
            }
        }
        end
    }

    fn prepare(&self, items: Vec<WorkItem>) -> Vec<WorkItem> {
        let (mut items, dropped) = dedupe_items(items);
        if dropped > 0 {
            brew_info!("dropped {} duplicate item(s)", dropped);
        }
        if let Some(max) = self.config.max_items {
            if items.len() > max {
                brew_info!("truncating {} item(s) to max_items = {}", items.len(), max);
                items.truncate(max);
            }
        }
        items
    }
}

struct BatchLoop<'a> {
    run: &'a JobRun,
    plans: Vec<StagePlan>,
    retry: Arc<RetryPolicy>,
    scheduler: ConcurrencyScheduler,
    sink: Option<ResultSink>,
    deadline: Option<Instant>,
    batches_total: usize,
    consecutive_errors: usize,
    failure: Option<String>,
}

impl<'a> BatchLoop<'a> {
    fn new(run: &'a JobRun) -> Self {
        let config = &run.config;
        let retry = Arc::new(RetryPolicy::new(config.retry.clone()));
        let scheduler =
            ConcurrencyScheduler::new(run.signals.clone(), retry.clone(), config.queue_capacity);
        let deadline = config.global_timeout().map(|timeout| Instant::now() + timeout);
        if let Some(deadline) = deadline {
            run.signals.set_deadline(deadline);
        }
        let sink = (!config.dry_run).then(|| {
            ResultSink::new(
                run.pipeline.sink().clone(),
                retry.clone(),
                run.signals.clone(),
            )
        });
        Self {
            run,
            plans: run.pipeline.plans(config),
            retry,
            scheduler,
            sink,
            deadline,
            batches_total: 0,
            consecutive_errors: 0,
            failure: None,
        }
    }

    fn run(mut self, batches: Vec<Batch>) -> RunEnd {
        self.batches_total = batches.len();
        let mut batches = batches.into_iter();
        for batch in batches.by_ref() {
            if self.deadline_passed() {
                self.fail(TIMED_OUT);
            }
            if self.run.signals.is_cancelled() || self.failure.is_some() {
                self.cancel_unstarted(batch.len());
                break;
            }
            self.run_batch(batch);
        }
        let unstarted: usize = batches.map(|batch| batch.len()).sum();
        self.cancel_unstarted(unstarted);
        self.check_expired();
        self.report_retries();

        match self.failure {
            Some(reason) => RunEnd::Failed(reason),
            None if self.run.signals.is_cancelled() => RunEnd::Cancelled,
            None => RunEnd::Exhausted,
        }
    }

    fn run_batch(&mut self, batch: Batch) {
        let index = batch.index();
        let total_batches = self.batches_total;
        brew_debug!("batch {}/{}: {} item(s)", index + 1, total_batches, batch.len());

        let mut stream = match self.scheduler.run_pipeline(batch.into_items(), &self.plans) {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(&err.to_string());
                return;
            }
        };
        let final_status = self.plans.last().map(|plan| plan.stage.status_on_success());
        let mut finished = Vec::new();
        let mut deadline = self.deadline;
        loop {
            match stream.recv_until(deadline) {
                Next::Item(mut item, Ok(text)) => {
                    if let Some(status) = final_status {
                        item.advance(text, status);
                    }
                    self.run.reporter.update(ProgressDelta::ItemFinished);
                    self.consecutive_errors = 0;
                    finished.push(item);
                }
                Next::Item(mut item, Err(failure)) => {
                    item.mark_failed();
                    self.item_failed(&item, &failure);
                }
                Next::TimedOut => {
                    self.fail(TIMED_OUT);
                    deadline = None;
                }
                Next::Exhausted => break,
            }
            self.report_retries();
        }
        drop(stream);
        self.check_expired();

        if self.run.signals.is_cancelled() || self.failure.is_some() {
            // No writes once a stop or failure is observed.
            self.cancel_unstarted(finished.len());
        } else {
            self.persist(Batch::new(index, finished));
            self.check_expired();
        }
        self.run.reporter.update_all([
            ProgressDelta::BatchFinished,
            ProgressDelta::Log(format!("batch {}/{} done", index + 1, total_batches)),
        ]);
    }

    fn persist(&mut self, batch: Batch) {
        let Some(sink) = self.sink.as_ref() else {
            if self.run.signals.checkpoint() == Checkpoint::Cancelled {
                self.cancel_unstarted(batch.len());
                return;
            }
            brew_debug!("dry run: skipping persistence of batch {}", batch.index());
            self.run
                .reporter
                .update(ProgressDelta::Processed { count: batch.len() });
            return;
        };
        let report = sink.persist(batch);
        self.run.reporter.update_all([
            ProgressDelta::Processed {
                count: report.persisted.len(),
            },
            ProgressDelta::Cancelled {
                count: report.cancelled.len(),
            },
        ]);
        if !report.persisted.is_empty() {
            self.consecutive_errors = 0;
        }
        for (key, error) in report.failed {
            brew_warn!("persisting `{}` failed: {}", key, error);
            self.record_failure(key, format!("persist: {error}"));
        }
        self.report_retries();
    }

    fn item_failed(&mut self, item: &WorkItem, failure: &StageFailure) {
        if failure.is_cancelled() {
            self.run
                .reporter
                .update(ProgressDelta::Cancelled { count: 1 });
            return;
        }
        brew_warn!("item `{}` skipped: {}", item.key(), failure);
        self.run.reporter.update(ProgressDelta::ItemFinished);
        self.record_failure(item.key().to_string(), failure.to_string());
    }

    fn record_failure(&mut self, key: String, message: String) {
        self.run
            .reporter
            .update(ProgressDelta::Skipped { key, message });
        self.consecutive_errors += 1;
        if let Some(limit) = self.run.config.max_consecutive_errors {
            if self.consecutive_errors > limit && self.failure.is_none() {
                self.fail(&format!("{} consecutive item failures", self.consecutive_errors));
            }
        }
    }

    fn fail(&mut self, reason: &str) {
        if self.failure.is_none() {
            self.failure = Some(reason.to_string());
            self.run.reporter.update(ProgressDelta::Log(reason.to_string()));
        }
        self.run.signals.cancel();
    }

    fn cancel_unstarted(&self, count: usize) {
        if count > 0 {
            self.run
                .reporter
                .update(ProgressDelta::Cancelled { count });
        }
    }

    /// Fails the run if a wait somewhere ran into the run deadline.
    fn check_expired(&mut self) {
        if self.run.signals.is_expired() {
            self.fail(TIMED_OUT);
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn report_retries(&self) {
        self.run
            .reporter
            .update(ProgressDelta::Retries(self.retry.retries()));
    }
}
