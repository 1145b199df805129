// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry};

/// Name of the environment variable containing the Chrome trace file path.
/// If unset, no tracing is performed.
pub const TRACE_FILE_ENV: &str = "LKGR_TRACE_FILE";

/// Name of the environment variable containing the log directory and file respectively.
/// If both are provided, an error is thrown.
/// If neither is provided, no logging to files is performed.
pub const LOG_DIR_ENV: &str = "LKGR_LOG_DIR";
pub const LOG_FILE_ENV: &str = "LKGR_LOG_FILE";

/// An environment variable choosing whether to log to the console.
/// If "0", don't log to the console.
/// Otherwise, do log to the console.
pub const CONSOLE_LOG_ENV: &str = "LKGR_LOG_CONSOLE";

/// How chatty the console and log files are when `RUST_LOG` is unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    /// `quiet` wins over `verbose`.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, true) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        }
    }

    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
        }
    }

    fn env_filter(self) -> Result<EnvFilter> {
        Ok(EnvFilter::builder()
            .with_default_directive(self.level().into())
            .from_env()?)
    }
}

/// A guard object to perform cleanups with RAII.
pub struct LogGuard {
    _span_guard: tracing::span::EnteredSpan,
    _flush_guard: Option<tracing_chrome::FlushGuard>,
}

/// The configuration for the logger.
pub struct LoggingConfig {
    /// The path to dump the Chrome trace json file to.
    pub trace_file: Option<PathBuf>,
    /// The path to dump the logs to, and a filter for which logs should be dumped there.
    /// If None, logs will not be written to a file.
    pub log_file: Option<(PathBuf, EnvFilter)>,
    /// A filter for which logs should be written to the console.
    /// If None, logs will not be written to the console.
    pub console_logger: Option<EnvFilter>,
}

impl LoggingConfig {
    pub fn from_env(verbosity: Verbosity) -> Result<Self> {
        let trace_file = std::env::var_os(TRACE_FILE_ENV).map(PathBuf::from);

        let log_file = match (std::env::var_os(LOG_FILE_ENV), std::env::var_os(LOG_DIR_ENV)) {
            (Some(_), Some(_)) => bail!("You can't have both {LOG_FILE_ENV} and {LOG_DIR_ENV} set"),
            (Some(file), None) => Some(PathBuf::from(file)),
            (None, Some(dir)) => {
                let timestamp = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let name = format!("{}.{timestamp}.log", crate::get_current_process_name());
                Some(Path::new(&dir).join(name))
            }
            (None, None) => None,
        };
        let log_file = match log_file {
            Some(path) => Some((path, verbosity.env_filter()?)),
            None => None,
        };

        let console_logger = match std::env::var(CONSOLE_LOG_ENV).ok().as_deref() {
            Some("0") => None,
            _ => Some(verbosity.env_filter()?),
        };

        Ok(Self {
            trace_file,
            log_file,
            console_logger,
        })
    }

    /// Sets up the global tracing subscriber in accordance with the config,
    /// and enters a span named "main".
    pub fn setup(self) -> Result<LogGuard> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

        let flush_guard = if let Some(trace_file) = &self.trace_file {
            let f = File::create(trace_file)
                .with_context(|| format!("Failed to set up tracing to {trace_file:?}"))?;
            let (chrome_layer, flush_guard) = ChromeLayerBuilder::new()
                .writer(f)
                .include_args(true)
                .build();
            layers.push(chrome_layer.boxed());
            Some(flush_guard)
        } else {
            None
        };

        if let Some(filter) = self.console_logger {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        if let Some((log_file, filter)) = self.log_file {
            let f = File::create(&log_file)
                .with_context(|| format!("Failed to open log file {log_file:?}"))?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(f)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context("Failed to start tracing; a subscriber is already installed")?;

        let args = std::env::args()
            .map(|s| shell_escape::escape(s.into()))
            .join(" ");
        let span_guard = tracing::trace_span!("main", args = args).entered();

        Ok(LogGuard {
            _span_guard: span_guard,
            _flush_guard: flush_guard,
        })
    }
}
