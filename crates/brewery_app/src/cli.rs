use std::path::PathBuf;

use brewery_logging::LogDestination;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    /// Log to the terminal only
    Terminal,
    /// Log to ./brewery.log only
    File,
    /// Log to both the terminal and ./brewery.log
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File => LogDestination::File,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "brewery")]
#[command(
    about = "Fetch, extract and store a list of articles as a background job",
    long_about = None
)]
pub struct Args {
    /// Job settings in RON; defaults apply to every missing field
    #[arg(long)]
    pub job: Option<PathBuf>,

    /// Plain-text list of URLs, one per line (`#` starts a comment)
    #[arg(long)]
    pub urls: PathBuf,

    /// Directory receiving one JSON record per article
    #[arg(long, default_value = "./brewery-out")]
    pub out: PathBuf,

    /// Run every stage but skip persistence
    #[arg(long)]
    pub dry_run: bool,

    /// Where log output goes
    #[arg(long, value_enum, default_value = "terminal")]
    pub log: LogTarget,

    /// Interval between status lines, in milliseconds
    #[arg(long, default_value = "500")]
    pub poll_ms: u64,

    /// Log debug output
    #[arg(long, short)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let args = Args::try_parse_from(["brewery", "--urls", "links.txt"]).unwrap();
        assert_eq!(args.urls, PathBuf::from("links.txt"));
        assert_eq!(args.out, PathBuf::from("./brewery-out"));
        assert_eq!(args.log, LogTarget::Terminal);
        assert_eq!(args.poll_ms, 500);
        assert!(!args.dry_run);
        assert!(args.job.is_none());
    }

    #[test]
    fn urls_are_required() {
        assert!(Args::try_parse_from(["brewery"]).is_err());
    }

    #[test]
    fn log_target_parses() {
        let args =
            Args::try_parse_from(["brewery", "--urls", "u.txt", "--log", "both", "--dry-run"])
                .unwrap();
        assert_eq!(LogDestination::from(args.log), LogDestination::Both);
        assert!(args.dry_run);
    }
}
