// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use itertools::Itertools;
use revision::{Revision, RevisionOrdering};
use serde_json::Value;

use crate::{
    build::{BuildRecord, PassingResults},
    config::{BuilderKey, ProjectConfig},
    runlog::{RunEvent, RunLog},
};

/// Raw build data keyed by master name, builder name and build number.
pub type RawBuilds = BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>;

/// Builder name to pass/fail, grouped by master.
pub type StatusByMaster = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionHistoryEntry {
    pub revision: Revision,
    pub position: u64,
    pub status: StatusByMaster,
}

impl RevisionHistoryEntry {
    pub fn new(revision: Revision, position: u64) -> Self {
        Self {
            revision,
            position,
            status: StatusByMaster::new(),
        }
    }

    /// Iterates over every reported (builder, passed) pair.
    pub fn statuses(&self) -> impl Iterator<Item = (BuilderKey, bool)> + '_ {
        self.status.iter().flat_map(|(master, builders)| {
            builders
                .iter()
                .map(move |(builder, passed)| (BuilderKey::new(master, builder), *passed))
        })
    }

    pub fn get(&self, key: &BuilderKey) -> Option<bool> {
        self.status.get(&key.master)?.get(&key.builder).copied()
    }

    pub fn set(&mut self, key: &BuilderKey, passed: bool) {
        self.status
            .entry(key.master.clone())
            .or_default()
            .insert(key.builder.clone(), passed);
    }
}

/// Revision history, newest first, without duplicate revisions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderedBuildHistory {
    entries: Vec<RevisionHistoryEntry>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("history is not strictly newest-first at revision {revision}")]
pub struct OutOfOrder {
    pub revision: Revision,
}

impl OrderedBuildHistory {
    /// Wraps entries that are already sorted strictly newest-first.
    pub fn from_sorted(entries: Vec<RevisionHistoryEntry>) -> Result<Self, OutOfOrder> {
        if let Some((_, bad)) = entries
            .iter()
            .tuple_windows()
            .find(|(newer, older)| newer.position <= older.position)
        {
            return Err(OutOfOrder {
                revision: bad.revision.clone(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[RevisionHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest revision with any build data.
    pub fn latest(&self) -> Option<&Revision> {
        self.entries.first().map(|entry| &entry.revision)
    }
}

/// Merges per-builder build data from several masters into a single
/// [`OrderedBuildHistory`].
pub struct BuildHistoryCollator<'a> {
    config: &'a ProjectConfig,
    ordering: &'a dyn RevisionOrdering,
    passing: PassingResults,
}

impl<'a> BuildHistoryCollator<'a> {
    pub fn new(config: &'a ProjectConfig, ordering: &'a dyn RevisionOrdering) -> Self {
        Self {
            config,
            ordering,
            passing: PassingResults::new(config.passing_results.clone()),
        }
    }

    pub fn collate(&self, builds: &RawBuilds, log: &mut RunLog) -> OrderedBuildHistory {
        // Distinct identifiers that share a position are collapsed into the
        // first one seen.
        let mut by_position: BTreeMap<u64, RevisionHistoryEntry> = BTreeMap::new();

        for (master, builders) in builds {
            for (builder, history) in builders {
                let key = BuilderKey::new(master, builder);
                let Some(required) = self.config.required_steps(&key) else {
                    tracing::debug!("Ignoring unconfigured builder {key}");
                    continue;
                };
                tracing::debug!("{key}: {} builds", history.len());

                let mut numbered = Vec::with_capacity(history.len());
                for (number, raw) in history {
                    match number.parse::<u64>() {
                        Ok(n) => numbered.push((n, raw)),
                        Err(_) => log.record(RunEvent::BuildSkipped {
                            builder: key.clone(),
                            number: number.clone(),
                            reason: "build number is not numeric".to_owned(),
                        }),
                    }
                }
                // Later builds for the same revision win.
                numbered.sort_by_key(|(n, _)| *n);

                for (number, raw) in numbered {
                    let build = match BuildRecord::from_raw(builder, number, raw, &self.passing) {
                        Ok(build) => build,
                        Err(e) => {
                            log.record(RunEvent::BuildSkipped {
                                builder: key.clone(),
                                number: number.to_string(),
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };
                    let Some(position) = self.ordering.position(&build.revision) else {
                        log.record(RunEvent::BuildSkipped {
                            builder: key.clone(),
                            number: number.to_string(),
                            reason: format!("revision {} cannot be ordered", build.revision),
                        });
                        continue;
                    };

                    let reasons = build.failure_reasons(required);
                    let passed = reasons.is_empty();
                    if !passed {
                        log.record(RunEvent::BuildBad {
                            builder: key.clone(),
                            number,
                            revision: build.revision.clone(),
                            reasons,
                        });
                    }

                    by_position
                        .entry(position)
                        .or_insert_with(|| RevisionHistoryEntry::new(build.revision, position))
                        .set(&key, passed);
                }
            }
        }

        OrderedBuildHistory {
            entries: by_position.into_values().rev().collect(),
        }
    }
}
