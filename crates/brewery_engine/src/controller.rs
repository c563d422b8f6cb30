use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use brewery_core::{
    update, Command, ConfigError, Effect, JobConfig, JobState, ProgressSnapshot, TransitionError,
};
use brewery_logging::{brew_debug, brew_info, brew_warn};

use crate::pipeline::Pipeline;
use crate::progress::ProgressReporter;
use crate::runner::{JobRun, RunEnd};
use crate::scheduler::panic_message;
use crate::signals::RunSignals;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("job is {state}; reset it before starting again")]
    AlreadyRunning { state: JobState },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn job runner: {0}")]
    Spawn(#[source] std::io::Error),
}

struct ActiveRun {
    signals: Arc<RunSignals>,
    handle: JoinHandle<()>,
}

/// Owns one job: its pipeline, its live status and at most one running
/// execution.
///
/// Commands go through [`brewery_core::update`]; the controller only carries
/// out the effects it returns. Every method returns promptly except
/// [`reset`](Self::reset), which joins a runner still draining after a stop,
/// and [`wait_for_terminal`](Self::wait_for_terminal).
pub struct JobController {
    pipeline: Pipeline,
    reporter: Arc<ProgressReporter>,
    active: Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl JobController {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            reporter: Arc::new(ProgressReporter::new()),
            active: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates `config` and launches a run on its own thread.
    pub fn start(&self, config: JobConfig) -> Result<(), StartError> {
        let mut active = self.lock_active();
        let state = self.reporter.state();
        if state != JobState::Idle {
            return Err(StartError::AlreadyRunning { state });
        }
        config.validate(&self.pipeline.stage_names())?;

        let effects = self
            .transition(Command::Start)
            .map_err(|err| StartError::AlreadyRunning { state: err.state })?;
        for effect in effects {
            match effect {
                Effect::ClearProgress => self.reporter.clear(),
                Effect::Launch => match self.launch(config.clone()) {
                    Ok(run) => *active = Some(run),
                    Err(err) => {
                        self.reporter.set_state(JobState::Idle);
                        return Err(StartError::Spawn(err));
                    }
                },
                other => self.apply(other, active.as_ref()),
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), TransitionError> {
        self.command(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), TransitionError> {
        self.command(Command::Resume)
    }

    /// Raises cancellation and moves to `Stopped` at once; in-flight calls
    /// finish in the background and nothing more is persisted.
    pub fn stop(&self) -> Result<(), TransitionError> {
        self.command(Command::Stop)
    }

    /// Returns a finished job to `Idle`, clearing counters and errors.
    pub fn reset(&self) -> Result<(), TransitionError> {
        let mut active = self.lock_active();
        update(self.reporter.state(), Command::Reset)?;
        if let Some(run) = active.take() {
            brew_debug!("reset: waiting for previous run to drain");
            if run.handle.join().is_err() {
                brew_warn!("previous runner thread panicked");
            }
        }
        let effects = self.transition(Command::Reset)?;
        for effect in effects {
            self.apply(effect, None);
        }
        Ok(())
    }

    /// Status read that consumes the one-shot completion flag.
    pub fn status(&self) -> ProgressSnapshot {
        self.reporter.take_snapshot()
    }

    /// Status read that leaves the completion flag alone.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.reporter.snapshot()
    }

    pub fn state(&self) -> JobState {
        self.reporter.state()
    }

    pub fn take_just_completed(&self) -> bool {
        self.reporter.take_just_completed()
    }

    pub fn wait_for_terminal(&self, timeout: Duration) -> Option<ProgressSnapshot> {
        self.reporter.wait_for_terminal(timeout)
    }

    fn command(&self, command: Command) -> Result<(), TransitionError> {
        let active = self.lock_active();
        let effects = self.transition(command)?;
        for effect in effects {
            self.apply(effect, active.as_ref());
        }
        Ok(())
    }

    fn transition(&self, command: Command) -> Result<Vec<Effect>, TransitionError> {
        transition(&self.reporter, command)
    }

    fn apply(&self, effect: Effect, run: Option<&ActiveRun>) {
        match effect {
            Effect::ClearProgress => self.reporter.clear(),
            Effect::ClosePauseGate => {
                if let Some(run) = run {
                    run.signals.pause();
                }
            }
            Effect::OpenPauseGate => {
                if let Some(run) = run {
                    run.signals.resume();
                }
            }
            Effect::Cancel => {
                if let Some(run) = run {
                    run.signals.cancel();
                }
            }
            Effect::Launch | Effect::NotifyCompleted => {}
        }
    }

    fn launch(&self, config: JobConfig) -> std::io::Result<ActiveRun> {
        let signals = Arc::new(RunSignals::new());
        let reporter = self.reporter.clone();
        let run = JobRun {
            config,
            pipeline: self.pipeline.clone(),
            signals: signals.clone(),
            reporter: reporter.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("brew-job-{}", run.config.name))
            .spawn(move || {
                let end = panic::catch_unwind(AssertUnwindSafe(|| run.execute()))
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        RunEnd::Failed(format!("runner panicked: {message}"))
                    });
                finish(&reporter, end);
            })?;
        Ok(ActiveRun { signals, handle })
    }
}

/// Applies `command` to the reporter's state under its lock.
fn transition(
    reporter: &ProgressReporter,
    command: Command,
) -> Result<Vec<Effect>, TransitionError> {
    let mut effects = Vec::new();
    let (previous, next) = reporter.transition(|state| {
        update(state, command).map(|(next, out)| {
            effects = out;
            next
        })
    })?;
    if previous != next {
        brew_info!("job {} -> {}", previous, next);
    }
    Ok(effects)
}

fn finish(reporter: &ProgressReporter, end: RunEnd) {
    let command = match end {
        RunEnd::Exhausted => Command::Finish,
        RunEnd::Failed(reason) => Command::Fail { reason },
        RunEnd::Cancelled => Command::Fail {
            reason: "cancelled".to_string(),
        },
    };
    if let Err(err) = transition(reporter, command) {
        brew_warn!("runner finished in an unexpected state: {}", err);
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        let slot = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = slot.take() {
            run.signals.cancel();
            let _ = run.handle.join();
        }
    }
}
