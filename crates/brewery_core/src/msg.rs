use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Caller asked to launch a run.
    Start,
    /// Caller asked workers to hold after their current item.
    Pause,
    Resume,
    /// Caller asked for cooperative cancellation.
    Stop,
    /// Caller asked to clear a finished run.
    Reset,
    /// The runner ran out of work.
    Finish,
    /// The runner hit an unrecoverable condition.
    Fail { reason: String },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
            Command::Stop => write!(f, "stop"),
            Command::Reset => write!(f, "reset"),
            Command::Finish => write!(f, "finish"),
            Command::Fail { reason } => write!(f, "fail ({reason})"),
        }
    }
}
