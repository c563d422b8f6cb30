use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Gate {
    paused: bool,
    cancelled: bool,
    deadline: Option<Instant>,
    expired: bool,
}

impl Gate {
    /// Turns a passed deadline into cancellation. Returns true the first time.
    fn expire_if_due(&mut self) -> bool {
        let due = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if due && !self.expired {
            self.expired = true;
            self.cancelled = true;
            return true;
        }
        false
    }
}

/// Result of a cooperative check between items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Cancelled,
}

/// Pause gate and cancellation flag shared by every worker of one run.
///
/// Workers call [`RunSignals::checkpoint`] between items only; a paused
/// worker parks on the condition variable instead of polling. Once a run
/// deadline is set, every wait is cut short at it and reaching it raises
/// cancellation.
#[derive(Debug, Default)]
pub struct RunSignals {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl RunSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.lock().paused = true;
        self.changed.notify_all();
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.changed.notify_all();
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Sets the wall-clock budget of the run.
    pub fn set_deadline(&self, deadline: Instant) {
        self.lock().deadline = Some(deadline);
        self.changed.notify_all();
    }

    /// True once a checkpoint or a wait ran into the run deadline.
    pub fn is_expired(&self) -> bool {
        self.lock().expired
    }

    /// Blocks while paused; reports cancellation as soon as it is raised.
    pub fn checkpoint(&self) -> Checkpoint {
        self.wait_until(None, |gate| gate.paused)
    }

    /// Sleeps for `duration` unless cancellation is raised first.
    pub fn sleep(&self, duration: Duration) -> Checkpoint {
        self.wait_until(Some(Instant::now() + duration), |_| true)
    }

    /// Waits while `blocked` holds and `until` has not passed, giving up at
    /// the run deadline.
    fn wait_until(&self, until: Option<Instant>, blocked: impl Fn(&Gate) -> bool) -> Checkpoint {
        let mut guard = self.lock();
        loop {
            if guard.expire_if_due() {
                self.changed.notify_all();
            }
            if guard.cancelled {
                return Checkpoint::Cancelled;
            }
            let now = Instant::now();
            if !blocked(&*guard) || until.is_some_and(|until| now >= until) {
                return Checkpoint::Proceed;
            }
            let wake = match (until, guard.deadline) {
                (Some(until), Some(deadline)) => Some(until.min(deadline)),
                (until, deadline) => until.or(deadline),
            };
            guard = match wake {
                Some(wake) => {
                    self.changed
                        .wait_timeout(guard, wake.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .changed
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn cancel_releases_paused_workers() {
        let signals = Arc::new(RunSignals::new());
        signals.pause();

        let worker = {
            let signals = signals.clone();
            thread::spawn(move || signals.checkpoint())
        };
        thread::sleep(Duration::from_millis(20));
        signals.cancel();

        assert_eq!(worker.join().unwrap(), Checkpoint::Cancelled);
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let signals = Arc::new(RunSignals::new());
        let sleeper = {
            let signals = signals.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (signals.sleep(Duration::from_secs(10)), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signals.cancel();

        let (checkpoint, elapsed) = sleeper.join().unwrap();
        assert_eq!(checkpoint, Checkpoint::Cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn deadline_cuts_a_long_sleep_short() {
        let signals = RunSignals::new();
        signals.set_deadline(Instant::now() + Duration::from_millis(30));

        let started = Instant::now();
        assert_eq!(signals.sleep(Duration::from_secs(10)), Checkpoint::Cancelled);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(signals.is_expired());
        assert!(signals.is_cancelled());
    }

    #[test]
    fn deadline_releases_a_paused_checkpoint() {
        let signals = Arc::new(RunSignals::new());
        signals.pause();
        signals.set_deadline(Instant::now() + Duration::from_millis(30));

        let worker = {
            let signals = signals.clone();
            thread::spawn(move || signals.checkpoint())
        };

        assert_eq!(worker.join().unwrap(), Checkpoint::Cancelled);
        assert!(signals.is_expired());
    }

    #[test]
    fn cancel_without_deadline_is_not_expiry() {
        let signals = RunSignals::new();
        signals.set_deadline(Instant::now() + Duration::from_secs(60));
        signals.cancel();

        assert_eq!(signals.checkpoint(), Checkpoint::Cancelled);
        assert!(!signals.is_expired());
    }

    #[test]
    fn unpaused_checkpoint_proceeds() {
        let signals = RunSignals::new();
        assert_eq!(signals.checkpoint(), Checkpoint::Proceed);
        assert_eq!(signals.sleep(Duration::ZERO), Checkpoint::Proceed);
    }
}
