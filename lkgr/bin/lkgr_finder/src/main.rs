// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod fetch;
mod status;

use std::{
    path::{Path, PathBuf},
    process::{ExitCode, Termination},
};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::Parser;
use cliutil::{cli_main, handle_top_level_result, ConfigBuilder, Verbosity};
use lkgr::{
    notify_all, Alert, BuildHistoryCollator, LkgrCandidateFinder, LkgrPublisher, LogNotifier,
    Notifier, OrderedBuildHistory, OutboxNotifier, ProjectConfig, RunLog, StalenessAlert,
    StalenessPolicy, StatusReport, DEFAULT_MAX_ROWS,
};
use revision::{CommitPositionOrdering, PositionMapOrdering, Revision, RevisionOrdering};

use crate::{
    fetch::{dump_builds, fetch_all, http_agent, load_builds, HttpBuildFetcher, HTTP_TIMEOUT},
    status::{fetch_lkgr, lkgr_age, parse_timestamp, post_lkgr, read_lkgr_file, write_lkgr_file},
};

/// Finds the last known good revision of a project and publishes it.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Project configuration, in JSON or in TOML if the file name ends in
    /// .toml.
    #[arg(long)]
    project_config_file: PathBuf,

    /// Computes everything but publishes nothing.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Only logs warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Logs the reasoning behind every decision.
    #[arg(short, long)]
    verbose: bool,

    /// Publishes this revision instead of searching for one.
    #[arg(long)]
    manual_revision: Option<String>,

    /// Reads build data from this file instead of fetching it.
    #[arg(long)]
    build_data: Option<PathBuf>,

    /// Writes the build data to this file.
    #[arg(long)]
    dump_file: Option<PathBuf>,

    /// Maximum number of revisions the LKGR may trail the newest revision.
    #[arg(long)]
    allowed_gap: Option<u64>,

    /// Base number of hours the LKGR may trail the current time.
    #[arg(long)]
    allowed_lag: Option<f64>,

    /// JSON object mapping revisions to commit positions. Without it,
    /// revisions must be commit positions.
    #[arg(long)]
    position_map: Option<PathBuf>,

    /// Reads the current LKGR from this file.
    #[arg(long, required_unless_present = "lkgr_url", conflicts_with = "lkgr_url")]
    read_from_file: Option<PathBuf>,

    /// Reads the current LKGR from this URL.
    #[arg(long)]
    lkgr_url: Option<String>,

    /// When the current LKGR was committed, in RFC 3339 format.
    #[arg(long, value_parser = parse_timestamp)]
    lkgr_committed_at: Option<DateTime<FixedOffset>>,

    /// Writes the new LKGR to this file, or empties it if nothing newer was
    /// found.
    #[arg(long)]
    write_to_file: Option<PathBuf>,

    /// Posts the new LKGR to this status URL.
    #[arg(long, requires = "password_file")]
    post_url: Option<String>,

    /// File holding the password for --post-url.
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Writes an HTML status page to this file.
    #[arg(long)]
    html: Option<PathBuf>,

    /// Appends notifications and alerts to this file as JSON lines. Without
    /// it, they are only logged.
    #[arg(long)]
    outbox: Option<PathBuf>,

    /// Maximum number of concurrent fetches.
    #[arg(long, default_value_t = 16)]
    jobs: usize,
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Published(Revision),
    Unchanged,
    Stale(Vec<StalenessAlert>),
}

impl Termination for Outcome {
    fn report(self) -> ExitCode {
        match self {
            Outcome::Published(_) | Outcome::Unchanged => ExitCode::SUCCESS,
            Outcome::Stale(_) => ExitCode::FAILURE,
        }
    }
}

fn send_alert(notifier: &dyn Notifier, alert: &Alert) {
    if let Err(e) = notifier.alert(alert) {
        tracing::error!("Failed to send alert {:?}: {e:#}", alert.subject);
    }
}

fn read_current_lkgr(args: &Args, agent: &ureq::Agent) -> Result<Revision> {
    match (&args.read_from_file, &args.lkgr_url) {
        (Some(path), _) => read_lkgr_file(path),
        (None, Some(url)) => fetch_lkgr(agent, url),
        (None, None) => anyhow::bail!("Either --read-from-file or --lkgr-url is required"),
    }
}

/// Writes the status file and posts the new LKGR, unless this is a dry run.
fn publish(args: &Args, agent: &ureq::Agent, new_lkgr: Option<&Revision>) -> Result<()> {
    if args.dry_run {
        if let Some(new_lkgr) = new_lkgr {
            tracing::info!("Dry run: not publishing {new_lkgr}");
        }
        return Ok(());
    }
    if let Some(path) = &args.write_to_file {
        write_lkgr_file(path, new_lkgr)?;
    }
    if let (Some(url), Some(new_lkgr)) = (&args.post_url, new_lkgr) {
        let password_file = args
            .password_file
            .as_deref()
            .context("--post-url requires --password-file")?;
        post_lkgr(agent, url, password_file, new_lkgr)?;
    }
    Ok(())
}

fn run(args: &Args, now: DateTime<Utc>) -> Result<Outcome> {
    let mut config = ProjectConfig::load(&args.project_config_file)?;
    if let Some(allowed_gap) = args.allowed_gap {
        config.allowed_gap = allowed_gap;
    }
    if let Some(allowed_lag) = args.allowed_lag {
        config.allowed_lag_hours = allowed_lag;
    }
    config.validate()?;

    let notifier: Box<dyn Notifier> = match &args.outbox {
        Some(path) if !args.dry_run => Box::new(OutboxNotifier::new(path)),
        _ => Box::new(LogNotifier),
    };

    let result = update_lkgr(args, now, &config, notifier.as_ref());
    if let Err(e) = &result {
        send_alert(notifier.as_ref(), &Alert::failure(&config.project, e));
    }
    result
}

fn load_ordering(args: &Args) -> Result<Box<dyn RevisionOrdering>> {
    let Some(path) = &args.position_map else {
        return Ok(Box::new(CommitPositionOrdering));
    };
    let ordering = PositionMapOrdering::load(path)?;
    if ordering.is_empty() {
        tracing::warn!("{} maps no revisions; nothing can be ordered", path.display());
    } else {
        tracing::info!("Loaded {} revision positions", ordering.len());
    }
    Ok(Box::new(ordering))
}

fn write_status_page(path: &Path, report: &StatusReport, now: DateTime<Utc>) -> Result<()> {
    let html = report.render(now)?;
    std::fs::write(path, html).with_context(|| format!("Failed to write {}", path.display()))
}

fn update_lkgr(
    args: &Args,
    now: DateTime<Utc>,
    config: &ProjectConfig,
    notifier: &dyn Notifier,
) -> Result<Outcome> {
    let ordering = load_ordering(args)?;
    let agent = http_agent(HTTP_TIMEOUT);

    let current = read_current_lkgr(args, &agent)?;
    tracing::info!("Current LKGR is {current}");

    let required = config.required_builders();
    let mut log = RunLog::new();
    let (history, candidate) = match &args.manual_revision {
        Some(manual) => {
            tracing::info!("Using manual revision {manual}");
            (OrderedBuildHistory::default(), Some(Revision::new(manual.as_str())))
        }
        None => {
            let builds = match &args.build_data {
                Some(path) => load_builds(path)?,
                None => fetch_all(config, &HttpBuildFetcher::new(agent.clone()), args.jobs)?,
            };
            if let Some(path) = &args.dump_file {
                dump_builds(path, &builds)?;
            }
            let history =
                BuildHistoryCollator::new(config, ordering.as_ref()).collate(&builds, &mut log);
            if history.is_empty() {
                tracing::warn!("No usable builds were found");
            } else {
                tracing::info!("Collated {} revisions", history.len());
            }
            let candidate = LkgrCandidateFinder::new(&required)
                .find(&history, &mut log)
                .map(|candidate| candidate.revision);
            (history, candidate)
        }
    };

    let age = args
        .lkgr_committed_at
        .map(|committed_at| lkgr_age(committed_at, now));
    if age.is_none() {
        tracing::warn!("--lkgr-committed-at not given; skipping the time lag check");
    }
    let policy = StalenessPolicy {
        allowed_gap: config.allowed_gap,
        allowed_lag_hours: config.allowed_lag_hours,
    };
    let decision = LkgrPublisher::new(ordering.as_ref(), policy).evaluate(
        candidate.as_ref(),
        &current,
        history.latest(),
        age,
    )?;

    publish(args, &agent, decision.publish.as_ref())?;

    let outcome = match decision.publish {
        Some(new_lkgr) => {
            if let Err(e) = notify_all(notifier, &config.notify, &new_lkgr) {
                tracing::warn!("{e:#}");
            }
            Outcome::Published(new_lkgr)
        }
        None if decision.alerts.is_empty() => Outcome::Unchanged,
        None => {
            for alert in &decision.alerts {
                tracing::error!("{alert}");
            }
            send_alert(
                notifier,
                &Alert::stale(&config.project, &current, &decision.alerts),
            );
            Outcome::Stale(decision.alerts)
        }
    };

    if let Some(path) = &args.html {
        let report = StatusReport {
            project: &config.project,
            history: &history,
            required: &required,
            current_lkgr: Some(&current),
            candidate: candidate.as_ref(),
            log: &log,
            max_rows: DEFAULT_MAX_ROWS,
        };
        if let Err(e) = write_status_page(path, &report, now) {
            tracing::warn!("Failed to write the status page: {e:#}");
        }
    }

    Ok(outcome)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match ConfigBuilder::new()
        .verbosity(Verbosity::from_flags(args.quiet, args.verbose))
        .build()
    {
        Ok(config) => config,
        Err(e) => return handle_top_level_result::<(), _>(Err(e)),
    };
    cli_main(|| run(&args, Utc::now()), config)
}
