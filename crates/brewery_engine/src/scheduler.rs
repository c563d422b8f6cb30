//! Bounded worker pools per stage, chained so that each stage is fed as soon
//! as the previous one finishes an item.
//!
//! ```text
//!  items ──▶ [stage 0: n0 workers] ──queue──▶ [stage 1: n1 workers] ──queue──▶ ResultStream
//! ```
//!
//! Every submitted item produces exactly one `(WorkItem, StageResult)` at the
//! end of the chain. Items that failed upstream pass through later stages
//! untouched; items still queued when the run is cancelled come out as
//! `Cancelled` without their stage function being called.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use brewery_core::{ItemStatus, PipelineError, StageParams, WorkItem};
use brewery_logging::brew_warn;

use crate::retry::RetryPolicy;
use crate::signals::{Checkpoint, RunSignals};
use crate::stage::{PipelineStage, StageFailure, StageResult};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to spawn worker for stage `{stage}`: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

/// A stage resolved against one job config: how many workers and which
/// parameters it runs with.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: Arc<PipelineStage>,
    pub workers: usize,
    pub params: StageParams,
}

pub type Completion = (WorkItem, StageResult);

/// Outcome of waiting on a [`ResultStream`].
#[derive(Debug)]
pub enum Next {
    Item(WorkItem, StageResult),
    TimedOut,
    Exhausted,
}

/// Unordered results of a scheduled run. Dropping the stream closes the
/// output queue and joins the workers, letting in-flight calls finish.
pub struct ResultStream {
    rx: Option<Receiver<Completion>>,
    workers: Vec<JoinHandle<()>>,
}

impl ResultStream {
    /// Waits for the next result, giving up at `deadline` if one is set.
    pub fn recv_until(&mut self, deadline: Option<Instant>) -> Next {
        let Some(rx) = self.rx.as_ref() else {
            return Next::Exhausted;
        };
        let received = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match received {
            Ok((item, result)) => Next::Item(item, result),
            Err(RecvTimeoutError::Timeout) => Next::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Next::Exhausted,
        }
    }
}

impl Iterator for ResultStream {
    type Item = Completion;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.rx.take();
        join_workers(self.workers.drain(..));
    }
}

/// Joins every worker and returns how many of them panicked.
fn join_workers(workers: impl IntoIterator<Item = JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for worker in workers {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if let Err(payload) = worker.join() {
            brew_warn!(
                "{} panicked outside its stage call, a result may be lost: {}",
                name,
                panic_message(payload.as_ref())
            );
            panicked += 1;
        }
    }
    panicked
}

#[derive(Debug, Clone)]
pub struct ConcurrencyScheduler {
    signals: Arc<RunSignals>,
    retry: Arc<RetryPolicy>,
    queue_capacity: usize,
}

impl ConcurrencyScheduler {
    pub fn new(signals: Arc<RunSignals>, retry: Arc<RetryPolicy>, queue_capacity: usize) -> Self {
        Self {
            signals,
            retry,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Runs a single stage over `items` with `plan.workers` concurrent calls.
    pub fn run(
        &self,
        items: Vec<WorkItem>,
        plan: &StagePlan,
    ) -> Result<ResultStream, SchedulerError> {
        self.run_pipeline(items, std::slice::from_ref(plan))
    }

    /// Runs `plans` in order with pipeline overlap between adjacent stages.
    pub fn run_pipeline(
        &self,
        items: Vec<WorkItem>,
        plans: &[StagePlan],
    ) -> Result<ResultStream, SchedulerError> {
        let (seed_tx, seed_rx) = mpsc::channel();
        for item in items {
            let text = item.input().to_string();
            let _ = seed_tx.send((item, Ok(text)));
        }
        drop(seed_tx);

        let mut workers = Vec::new();
        let mut input: Receiver<Completion> = seed_rx;
        let mut commit = None;
        for plan in plans {
            let (tx, rx) = mpsc::sync_channel(self.queue_capacity);
            let executor = StageExecutor {
                plan: plan.clone(),
                commit,
                signals: self.signals.clone(),
                retry: self.retry.clone(),
            };
            spawn_pool(
                plan.stage.name(),
                plan.workers,
                input,
                tx,
                move |(item, previous)| executor.handle(item, previous),
                &mut workers,
            )?;
            input = rx;
            commit = Some(plan.stage.status_on_success());
        }

        Ok(ResultStream {
            rx: Some(input),
            workers,
        })
    }
}

struct StageExecutor {
    plan: StagePlan,
    /// Status earned by the previous stage's output; `None` for the first stage.
    commit: Option<ItemStatus>,
    signals: Arc<RunSignals>,
    retry: Arc<RetryPolicy>,
}

impl StageExecutor {
    fn handle(&self, mut item: WorkItem, previous: StageResult) -> Completion {
        match (previous, self.commit) {
            (Err(failure), _) => return (item, Err(failure)),
            (Ok(text), Some(status)) => {
                item.advance(text, status);
            }
            (Ok(_), None) => {}
        }
        let result = self.execute(&item);
        (item, result)
    }

    fn execute(&self, item: &WorkItem) -> StageResult {
        let stage = self.plan.stage.as_ref();
        if self.signals.checkpoint() == Checkpoint::Cancelled {
            return Err(StageFailure::cancelled(stage.name()));
        }
        let (result, attempts) = self.retry.run(&self.signals, |_| {
            guard_panic(|| stage.apply(item, &self.plan.params))
        });
        result.map_err(|error| StageFailure {
            stage: stage.name().to_string(),
            error,
            attempts,
        })
    }
}

pub(crate) fn guard_panic<T>(
    call: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(PipelineError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn spawn_pool<In, Out, H>(
    stage: &str,
    workers: usize,
    input: Receiver<In>,
    output: SyncSender<Out>,
    handler: H,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<(), SchedulerError>
where
    In: Send + 'static,
    Out: Send + 'static,
    H: Fn(In) -> Out + Send + Sync + 'static,
{
    let input = Arc::new(Mutex::new(input));
    let handler = Arc::new(handler);
    for index in 0..workers.max(1) {
        let input = input.clone();
        let output = output.clone();
        let handler = handler.clone();
        let handle = thread::Builder::new()
            .name(format!("brew-{stage}-{index}"))
            .spawn(move || worker_loop(&input, &output, handler.as_ref()))
            .map_err(|source| SchedulerError::Spawn {
                stage: stage.to_string(),
                source,
            })?;
        handles.push(handle);
    }
    Ok(())
}

fn worker_loop<In, Out, H>(input: &Mutex<Receiver<In>>, output: &SyncSender<Out>, handler: &H)
where
    H: Fn(In) -> Out,
{
    loop {
        let next = input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = next else {
            break;
        };
        if output.send(handler(job)).is_err() {
            break;
        }
    }
}
