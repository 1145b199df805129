// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Build records as reported by a CI master's JSON interface.

use std::collections::BTreeMap;

use revision::Revision;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RequiredStep;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Pass,
    Fail,
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildStepResult {
    pub name: String,
    pub completed: bool,
    pub outcome: StepOutcome,
}

/// Why a raw build could not be turned into a [`BuildRecord`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MalformedBuild {
    #[error("build has no revision stamp")]
    NoRevision,
    #[error("invalid build JSON: {0}")]
    InvalidJson(String),
    #[error("step {step:?} has an unrecognized result {results}")]
    InvalidResult { step: String, results: String },
}

/// The set of step result codes that count as success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassingResults(Vec<i64>);

impl PassingResults {
    pub fn new(codes: impl Into<Vec<i64>>) -> Self {
        Self(codes.into())
    }

    pub fn is_passing(&self, code: i64) -> bool {
        self.0.contains(&code)
    }
}

impl Default for PassingResults {
    fn default() -> Self {
        Self(vec![0])
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuild {
    #[serde(default)]
    source_stamp: Option<RawSourceStamp>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawSourceStamp {
    #[serde(default)]
    revision: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    name: String,
    #[serde(default)]
    is_finished: Option<bool>,
    #[serde(default)]
    results: Option<Value>,
}

/// Extracts the result code from a step's `results` field.
///
/// Buildbot reports either a bare code, `[code, [text...]]`, or
/// `[[code, ...], ...]`. `None` means no code was reported.
fn result_code(results: &Value) -> Option<Option<i64>> {
    let first = match results {
        Value::Array(items) => match items.first() {
            None => return Some(None),
            Some(Value::Array(inner)) => match inner.first() {
                None => return Some(None),
                Some(v) => v,
            },
            Some(v) => v,
        },
        v => v,
    };
    match first {
        Value::Null => Some(None),
        Value::Number(n) => n.as_i64().map(Some),
        Value::String(s) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

fn revision_from_stamp(value: &Value) -> Option<Revision> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(Revision::new(s.trim())),
        Value::Number(n) => Some(Revision::new(n.to_string())),
        _ => None,
    }
}

/// One build of one builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRecord {
    pub builder: String,
    pub number: u64,
    pub revision: Revision,
    pub steps: BTreeMap<String, BuildStepResult>,
}

impl BuildRecord {
    pub fn from_raw(
        builder: &str,
        number: u64,
        raw: &Value,
        passing: &PassingResults,
    ) -> Result<Self, MalformedBuild> {
        let raw = RawBuild::deserialize(raw)
            .map_err(|e| MalformedBuild::InvalidJson(e.to_string()))?;
        let revision = raw
            .source_stamp
            .and_then(|stamp| stamp.revision)
            .as_ref()
            .and_then(revision_from_stamp)
            .ok_or(MalformedBuild::NoRevision)?;

        let mut steps = BTreeMap::new();
        for step in raw.steps {
            let completed = step.is_finished == Some(true);
            let outcome = if !completed {
                StepOutcome::Incomplete
            } else {
                let code = match &step.results {
                    None => None,
                    Some(results) => {
                        result_code(results).ok_or_else(|| MalformedBuild::InvalidResult {
                            step: step.name.clone(),
                            results: results.to_string(),
                        })?
                    }
                };
                match code {
                    // A finished step without a code has not reported a failure.
                    None => StepOutcome::Pass,
                    Some(code) if passing.is_passing(code) => StepOutcome::Pass,
                    Some(_) => StepOutcome::Fail,
                }
            };
            steps.insert(
                step.name.clone(),
                BuildStepResult {
                    name: step.name,
                    completed,
                    outcome,
                },
            );
        }

        Ok(Self {
            builder: builder.to_owned(),
            number,
            revision,
            steps,
        })
    }

    /// Checks every required step and returns the reasons this build is not
    /// good. An empty list means the build is good.
    pub fn failure_reasons(&self, required: &[RequiredStep]) -> Vec<String> {
        let mut reasons = Vec::new();
        for step in required {
            let matches: Vec<&BuildStepResult> = step
                .accepted_aliases
                .iter()
                .filter_map(|alias| self.steps.get(alias))
                .collect();
            match matches.as_slice() {
                [] => reasons.push(format!("Step {} was not found", step.canonical_name)),
                [result] => match result.outcome {
                    StepOutcome::Pass => {}
                    StepOutcome::Fail => reasons.push(format!("Step {} failed", result.name)),
                    StepOutcome::Incomplete => {
                        reasons.push(format!("Step {} has not completed", result.name))
                    }
                },
                many => reasons.push(format!(
                    "Step {} matched more than one alias: {}",
                    step.canonical_name,
                    many.iter()
                        .map(|result| result.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            }
        }
        reasons
    }
}
