// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALLOWED_GAP: u64 = 150;
pub const DEFAULT_ALLOWED_LAG_HOURS: f64 = 2.0;

/// Identifies one builder on one master.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BuilderKey {
    pub master: String,
    pub builder: String,
}

impl BuilderKey {
    pub fn new(master: impl Into<String>, builder: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            builder: builder.into(),
        }
    }
}

impl fmt::Display for BuilderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.master, self.builder)
    }
}

/// A step that must pass for a build to count as good.
///
/// Steps get renamed over time, so a step may be matched under any of its
/// accepted aliases. The canonical name is always the first alias.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepSpec", into = "StepSpec")]
pub struct RequiredStep {
    pub canonical_name: String,
    pub accepted_aliases: Vec<String>,
}

impl RequiredStep {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            canonical_name: name.clone(),
            accepted_aliases: vec![name],
        }
    }

    pub fn with_aliases<I, S>(aliases: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accepted_aliases: Vec<String> = aliases.into_iter().map(Into::into).collect();
        let canonical_name = accepted_aliases
            .first()
            .cloned()
            .ok_or(ConfigError::EmptyAliasList)?;
        Ok(Self {
            canonical_name,
            accepted_aliases,
        })
    }
}

/// On-disk representation of a [`RequiredStep`]: a bare name or a list of
/// aliases.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Name(String),
    Aliases(Vec<String>),
}

impl TryFrom<StepSpec> for RequiredStep {
    type Error = ConfigError;

    fn try_from(spec: StepSpec) -> Result<Self, Self::Error> {
        match spec {
            StepSpec::Name(name) => Ok(RequiredStep::new(name)),
            StepSpec::Aliases(aliases) => RequiredStep::with_aliases(aliases),
        }
    }
}

impl From<RequiredStep> for StepSpec {
    fn from(step: RequiredStep) -> Self {
        if step.accepted_aliases.len() == 1 {
            StepSpec::Name(step.canonical_name)
        } else {
            StepSpec::Aliases(step.accepted_aliases)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Base URL of the master's JSON interface. Only used for fetching.
    #[serde(default)]
    pub base_url: String,
    pub builders: BTreeMap<String, Vec<RequiredStep>>,
}

/// A downstream master to be told about a new LKGR.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyTarget {
    pub master: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_branch() -> String {
    "src".to_owned()
}

fn default_category() -> String {
    "lkgr".to_owned()
}

fn default_passing_results() -> Vec<i64> {
    vec![0]
}

fn default_allowed_gap() -> u64 {
    DEFAULT_ALLOWED_GAP
}

fn default_allowed_lag_hours() -> f64 {
    DEFAULT_ALLOWED_LAG_HOURS
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("no masters configured")]
    NoMasters,
    #[error("master {0:?} has no builders")]
    NoBuilders(String),
    #[error("builder {0} has no required steps")]
    NoSteps(BuilderKey),
    #[error("a required step has an empty alias list")]
    EmptyAliasList,
    #[error("allowed_lag_hours must be a non-negative number, got {0}")]
    InvalidLag(f64),
}

/// Project-wide configuration: which builders gate the LKGR and how.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    /// Step result codes that count as success.
    #[serde(default = "default_passing_results")]
    pub passing_results: Vec<i64>,
    #[serde(default = "default_allowed_gap")]
    pub allowed_gap: u64,
    #[serde(default = "default_allowed_lag_hours")]
    pub allowed_lag_hours: f64,
    #[serde(default)]
    pub notify: Vec<NotifyTarget>,
    pub masters: BTreeMap<String, MasterConfig>,
}

impl ProjectConfig {
    /// Loads a config file. Files ending in `.toml` are parsed as TOML,
    /// anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masters.is_empty() {
            return Err(ConfigError::NoMasters);
        }
        for (master_name, master) in &self.masters {
            if master.builders.is_empty() {
                return Err(ConfigError::NoBuilders(master_name.clone()));
            }
            for (builder, steps) in &master.builders {
                if steps.is_empty() {
                    return Err(ConfigError::NoSteps(BuilderKey::new(master_name, builder)));
                }
                if steps.iter().any(|step| step.accepted_aliases.is_empty()) {
                    return Err(ConfigError::EmptyAliasList);
                }
            }
        }
        if self.allowed_lag_hours.is_nan() || self.allowed_lag_hours < 0.0 {
            return Err(ConfigError::InvalidLag(self.allowed_lag_hours));
        }
        Ok(())
    }

    /// Returns the set of (master, builder) pairs that must be green.
    pub fn required_builders(&self) -> BTreeSet<BuilderKey> {
        self.masters
            .iter()
            .flat_map(|(master, config)| {
                config
                    .builders
                    .keys()
                    .map(move |builder| BuilderKey::new(master, builder))
            })
            .collect()
    }

    pub fn required_steps(&self, key: &BuilderKey) -> Option<&[RequiredStep]> {
        self.masters
            .get(&key.master)?
            .builders
            .get(&key.builder)
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG_JSON: &str = r#"{
        "project": "chromium",
        "masters": {
            "chromium.win": {
                "base_url": "https://build.example.com/p/chromium.win/json",
                "builders": {
                    "Win Builder": ["compile"],
                    "Win Tests": [["browser_tests", "browser_tests (with patch)"], "unit_tests"]
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_json_with_defaults() -> Result<()> {
        let config: ProjectConfig = serde_json::from_str(CONFIG_JSON)?;
        config.validate()?;
        assert_eq!(config.passing_results, vec![0]);
        assert_eq!(config.allowed_gap, DEFAULT_ALLOWED_GAP);
        assert_eq!(config.allowed_lag_hours, DEFAULT_ALLOWED_LAG_HOURS);

        let steps = config
            .required_steps(&BuilderKey::new("chromium.win", "Win Tests"))
            .context("missing builder")?;
        assert_eq!(
            steps,
            &[
                RequiredStep {
                    canonical_name: "browser_tests".to_owned(),
                    accepted_aliases: vec![
                        "browser_tests".to_owned(),
                        "browser_tests (with patch)".to_owned()
                    ],
                },
                RequiredStep::new("unit_tests"),
            ]
        );
        assert_eq!(
            config.required_builders().into_iter().collect::<Vec<_>>(),
            vec![
                BuilderKey::new("chromium.win", "Win Builder"),
                BuilderKey::new("chromium.win", "Win Tests"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_load_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("project.toml");
        std::fs::write(
            &path,
            r#"
project = "v8"
allowed_lag_hours = 4.0
passing_results = [0, 1]

[[notify]]
master = "client.v8"

[masters."client.v8".builders]
"V8 Linux" = ["compile", ["Check", "Check (flakes)"]]
"#,
        )?;
        let config = ProjectConfig::load(&path)?;
        assert_eq!(config.allowed_lag_hours, 4.0);
        assert_eq!(config.passing_results, vec![0, 1]);
        assert_eq!(
            config.notify,
            vec![NotifyTarget {
                master: "client.v8".to_owned(),
                branch: "src".to_owned(),
                category: "lkgr".to_owned(),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_empty_alias_list_rejected() {
        let result: Result<ProjectConfig, _> = serde_json::from_str(
            r#"{"project": "p", "masters": {"m": {"builders": {"b": [[]]}}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config: ProjectConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        config
            .masters
            .get_mut("chromium.win")
            .unwrap()
            .builders
            .insert("Empty".to_owned(), vec![]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoSteps(BuilderKey::new("chromium.win", "Empty")))
        );

        config.masters.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoMasters));
    }
}
