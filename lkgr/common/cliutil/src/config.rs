// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{LoggingConfig, Verbosity};
use anyhow::Result;

/// The configuration for the current process.
pub struct ConfigBuilder {
    logging: Option<LoggingConfig>,
    verbosity: Verbosity,
    log_command_line: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            logging: None,
            verbosity: Verbosity::Normal,
            log_command_line: true,
        }
    }

    /// Overrides the logging config. If this isn't called, it defaults to
    /// `LoggingConfig::from_env(verbosity)`.
    pub fn logging(mut self, cfg: LoggingConfig) -> Self {
        self.logging = Some(cfg);
        self
    }

    /// Sets the default log level used when `RUST_LOG` is unset.
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// `enable` controls whether to log the command-line of the current process.
    pub fn log_command_line(mut self, enable: bool) -> Self {
        self.log_command_line = enable;
        self
    }

    /// Builds a Config suitable for use with cli_main.
    pub fn build(self) -> Result<Config> {
        let logging = match self.logging {
            Some(logging) => logging,
            None => LoggingConfig::from_env(self.verbosity)?,
        };
        Ok(Config {
            logging,
            log_command_line: self.log_command_line,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A POD struct containing the configs, after applying any defaults for unset values.
/// Build it with `cliutil::ConfigBuilder::new().<field>(...).build()`.
pub struct Config {
    pub(crate) logging: LoggingConfig,
    pub(crate) log_command_line: bool,
}
