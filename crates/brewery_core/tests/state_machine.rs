use std::sync::Once;

use brewery_core::{update, Command, Effect, JobState, TransitionError};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(brewery_logging::initialize_for_tests);
}

fn step(state: JobState, command: Command) -> (JobState, Vec<Effect>) {
    update(state, command).expect("valid transition")
}

#[test]
fn start_from_idle_clears_and_launches() {
    init_logging();
    let (state, effects) = step(JobState::Idle, Command::Start);
    assert_eq!(state, JobState::Running);
    assert_eq!(effects, vec![Effect::ClearProgress, Effect::Launch]);
}

#[test]
fn start_is_rejected_outside_idle() {
    init_logging();
    for state in [
        JobState::Running,
        JobState::Paused,
        JobState::Completed,
        JobState::Failed,
        JobState::Stopped,
    ] {
        let err = update(state, Command::Start).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                state,
                command: Command::Start
            }
        );
    }
}

#[test]
fn pause_resume_round_trip_toggles_gate() {
    init_logging();
    let (paused, effects) = step(JobState::Running, Command::Pause);
    assert_eq!(paused, JobState::Paused);
    assert_eq!(effects, vec![Effect::ClosePauseGate]);

    let (running, effects) = step(paused, Command::Resume);
    assert_eq!(running, JobState::Running);
    assert_eq!(effects, vec![Effect::OpenPauseGate]);

    assert!(update(JobState::Running, Command::Resume).is_err());
    assert!(update(JobState::Idle, Command::Pause).is_err());
}

#[test]
fn stop_cancels_from_running_and_paused() {
    init_logging();
    for state in [JobState::Running, JobState::Paused] {
        let (next, effects) = step(state, Command::Stop);
        assert_eq!(next, JobState::Stopped);
        assert_eq!(effects, vec![Effect::Cancel]);
    }
    assert!(update(JobState::Idle, Command::Stop).is_err());
    assert!(update(JobState::Completed, Command::Stop).is_err());
}

#[test]
fn runner_report_after_stop_keeps_stopped() {
    init_logging();
    let (state, effects) = step(JobState::Stopped, Command::Finish);
    assert_eq!(state, JobState::Stopped);
    assert!(effects.is_empty());

    let (state, _) = step(
        JobState::Stopped,
        Command::Fail {
            reason: "late".into(),
        },
    );
    assert_eq!(state, JobState::Stopped);
}

#[test]
fn finish_and_fail_notify_once() {
    init_logging();
    let (state, effects) = step(JobState::Running, Command::Finish);
    assert_eq!(state, JobState::Completed);
    assert_eq!(effects, vec![Effect::NotifyCompleted]);

    let (state, effects) = step(
        JobState::Running,
        Command::Fail {
            reason: "collector down".into(),
        },
    );
    assert_eq!(state, JobState::Failed);
    assert_eq!(effects, vec![Effect::NotifyCompleted]);
}

#[test]
fn reset_only_outside_active_states() {
    init_logging();
    for state in [
        JobState::Idle,
        JobState::Completed,
        JobState::Failed,
        JobState::Stopped,
    ] {
        let (next, effects) = step(state, Command::Reset);
        assert_eq!(next, JobState::Idle);
        assert_eq!(effects, vec![Effect::ClearProgress]);
    }
    assert!(update(JobState::Running, Command::Reset).is_err());
    assert!(update(JobState::Paused, Command::Reset).is_err());
}

#[test]
fn transition_error_reads_naturally() {
    let err = update(JobState::Completed, Command::Pause).unwrap_err();
    assert_eq!(err.to_string(), "cannot pause while completed");
}
