/// Side effects the controller performs after a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ClearProgress,
    Launch,
    ClosePauseGate,
    OpenPauseGate,
    Cancel,
    /// Raise the one-shot completion flag for the polling caller.
    NotifyCompleted,
}
