use crate::{Command, Effect, JobState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {command} while {state}")]
pub struct TransitionError {
    pub state: JobState,
    pub command: Command,
}

/// Pure transition function: applies a command to the job state and returns
/// the next state plus the effects the controller must carry out.
pub fn update(
    state: JobState,
    command: Command,
) -> Result<(JobState, Vec<Effect>), TransitionError> {
    use JobState::*;

    let next = match (&command, state) {
        (Command::Start, Idle) => (Running, vec![Effect::ClearProgress, Effect::Launch]),
        (Command::Pause, Running) => (Paused, vec![Effect::ClosePauseGate]),
        (Command::Resume, Paused) => (Running, vec![Effect::OpenPauseGate]),
        (Command::Stop, Running | Paused) => (Stopped, vec![Effect::Cancel]),
        (Command::Reset, Idle | Completed | Failed | Stopped) => {
            (Idle, vec![Effect::ClearProgress])
        }
        (Command::Finish, Running | Paused) => (Completed, vec![Effect::NotifyCompleted]),
        (Command::Fail { .. }, Running | Paused) => (Failed, vec![Effect::NotifyCompleted]),
        // The runner drains after a stop; its final report must not
        // overwrite the state the caller asked for.
        (Command::Finish | Command::Fail { .. }, Stopped) => (Stopped, Vec::new()),
        _ => {
            return Err(TransitionError {
                state,
                command: command.clone(),
            })
        }
    };

    Ok(next)
}
