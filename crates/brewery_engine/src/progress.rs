use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use brewery_core::{JobState, Progress, ProgressDelta, ProgressSnapshot};

#[derive(Debug, Default)]
struct Board {
    state: JobState,
    progress: Progress,
    just_completed: bool,
}

/// Single writer of a job's live counters and lifecycle state.
///
/// Every read returns a consistent copy taken under one lock, so observers
/// never see a half-applied update.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    board: Mutex<Board>,
    changed: Condvar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, delta: ProgressDelta) {
        self.lock().progress.apply(delta);
        self.changed.notify_all();
    }

    pub fn update_all(&self, deltas: impl IntoIterator<Item = ProgressDelta>) {
        let mut board = self.lock();
        for delta in deltas {
            board.progress.apply(delta);
        }
        drop(board);
        self.changed.notify_all();
    }

    /// Copy of the current status. Does not consume the completion flag.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let board = self.lock();
        board.progress.snapshot(board.state, board.just_completed)
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Records a lifecycle transition; entering `Completed` or `Failed`
    /// raises the one-shot completion flag.
    pub fn set_state(&self, state: JobState) {
        let mut board = self.lock();
        board.state = state;
        if matches!(state, JobState::Completed | JobState::Failed) {
            board.just_completed = true;
        }
        drop(board);
        self.changed.notify_all();
    }

    /// Applies `f` to the current state and stores its result, all under the
    /// board lock. Returns the previous and the new state.
    pub fn transition<E>(
        &self,
        f: impl FnOnce(JobState) -> Result<JobState, E>,
    ) -> Result<(JobState, JobState), E> {
        let mut board = self.lock();
        let previous = board.state;
        let next = f(previous)?;
        board.state = next;
        if next != previous && matches!(next, JobState::Completed | JobState::Failed) {
            board.just_completed = true;
        }
        drop(board);
        self.changed.notify_all();
        Ok((previous, next))
    }

    /// Zeroes every counter and clears the error list and completion flag.
    /// The lifecycle state is left alone.
    pub fn clear(&self) {
        let mut board = self.lock();
        board.progress = Progress::new();
        board.just_completed = false;
        drop(board);
        self.changed.notify_all();
    }

    /// Returns the completion flag and lowers it.
    pub fn take_just_completed(&self) -> bool {
        std::mem::take(&mut self.lock().just_completed)
    }

    /// Status read that consumes the completion flag: the first read after a
    /// run ends reports `just_completed == true`, later reads `false`.
    pub fn take_snapshot(&self) -> ProgressSnapshot {
        let mut board = self.lock();
        let snapshot = board.progress.snapshot(board.state, board.just_completed);
        board.just_completed = false;
        snapshot
    }

    /// Blocks until the job reaches a terminal state or `timeout` elapses.
    pub fn wait_for_terminal(&self, timeout: Duration) -> Option<ProgressSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut board = self.lock();
        while !board.state.is_terminal() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            board = self
                .changed
                .wait_timeout(board, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(board.progress.snapshot(board.state, board.just_completed))
    }
}
