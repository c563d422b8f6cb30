//! Command-line front end: runs one article-harvesting job and prints its
//! progress until it ends.

mod cli;
mod summary;

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use brewery_core::{JobConfig, JobState, ProgressSnapshot};
use brewery_engine::{
    ArticleExtractor, FileSink, HttpFetcher, HttpSettings, JobController, Pipeline,
    StaticCollector,
};
use brewery_logging::{brew_info, brew_warn};
use clap::Parser;
use log::LevelFilter;

use crate::cli::Args;
use crate::summary::RunSummary;

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    brewery_logging::initialize(args.log.into(), level);

    match run(&args) {
        Ok(JobState::Completed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<JobState> {
    let mut config = match &args.job {
        Some(path) => load_job(path)?,
        None => JobConfig::default(),
    };
    config.dry_run |= args.dry_run;

    let collector = StaticCollector::from_file(&args.urls)
        .with_context(|| format!("failed to read url list {}", args.urls.display()))?;
    if collector.is_empty() {
        brew_warn!("{} contains no urls", args.urls.display());
    }
    if let Some(previous) = summary::load(&args.out)? {
        brew_info!(
            "previous run `{}` ended {} at {}",
            previous.job,
            previous.state,
            previous.finished_at
        );
    }

    let fetcher = HttpFetcher::new(HttpSettings::default()).context("failed to set up http")?;
    let pipeline = Pipeline::builder()
        .collector(collector)
        .fetch("fetch", fetcher)
        .transform("article", ArticleExtractor)
        .sink(FileSink::new(&args.out))
        .build()?;
    let controller = JobController::new(pipeline);

    let started_at = chrono::Local::now().to_rfc3339();
    controller
        .start(config.clone())
        .with_context(|| format!("failed to start job `{}`", config.name))?;

    let poll = Duration::from_millis(args.poll_ms.max(10));
    while controller.wait_for_terminal(poll).is_none() {
        print_status(&controller.snapshot());
    }
    let status = controller.status();
    print_status(&status);
    for error in &status.errors {
        println!("  skipped {error}");
    }

    if !config.dry_run {
        let path = summary::save(&args.out, &RunSummary::new(&config.name, started_at, &status))?;
        brew_info!("run summary written to {}", path.display());
    }
    Ok(status.state)
}

fn load_job(path: &Path) -> Result<JobConfig> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    ron::from_str(&text).with_context(|| format!("failed to parse job file {}", path.display()))
}

fn print_status(status: &ProgressSnapshot) {
    println!(
        "[{}] {}/{} done: {} saved, {} skipped, {} cancelled, {} retries (batch {}/{})",
        status.state,
        status.current,
        status.total,
        status.processed,
        status.skipped,
        status.cancelled,
        status.retries,
        status.batches_done,
        status.batches_total,
    );
}
