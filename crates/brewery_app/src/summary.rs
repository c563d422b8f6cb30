use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brewery_core::ProgressSnapshot;
use brewery_engine::AtomicFileWriter;
use serde::{Deserialize, Serialize};

const SUMMARY_FILENAME: &str = ".brewery_run.ron";

/// What the last run left behind, kept next to the records it wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job: String,
    pub state: String,
    pub started_at: String,
    pub finished_at: String,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub retries: u64,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn new(job: &str, started_at: String, status: &ProgressSnapshot) -> Self {
        Self {
            job: job.to_string(),
            state: status.state.to_string(),
            started_at,
            finished_at: chrono::Local::now().to_rfc3339(),
            total: status.total,
            processed: status.processed,
            skipped: status.skipped,
            cancelled: status.cancelled,
            retries: status.retries,
            errors: status.errors.clone(),
        }
    }
}

pub fn save(output_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let content = ron::ser::to_string_pretty(summary, ron::ser::PrettyConfig::new())
        .context("failed to serialize run summary")?;
    AtomicFileWriter::new(output_dir.to_path_buf())
        .write(SUMMARY_FILENAME, content.as_bytes())
        .with_context(|| format!("failed to write run summary to {}", output_dir.display()))
}

pub fn load(output_dir: &Path) -> Result<Option<RunSummary>> {
    let path = output_dir.join(SUMMARY_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    let summary =
        ron::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use brewery_core::JobState;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn summary_round_trips_through_output_dir() {
        let temp = TempDir::new().unwrap();
        let status = ProgressSnapshot {
            state: JobState::Completed,
            total: 3,
            processed: 2,
            skipped: 1,
            errors: vec!["https://a.example.com: fetch failed (fatal): http status 404".into()],
            ..ProgressSnapshot::default()
        };
        let summary = RunSummary::new("weekly", "2026-10-16T09:00:00+00:00".into(), &status);

        save(temp.path(), &summary).unwrap();

        assert_eq!(load(temp.path()).unwrap(), Some(summary));
    }

    #[test]
    fn missing_summary_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        assert_eq!(load(temp.path()).unwrap(), None);
    }
}
