// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Finds the newest revision that is provably good on every builder.
//!
//! Consider a history like this:
//!
//! ```text
//!   Revision        Builder1        Builder2        Builder3
//!  -----------------------------------------------------------
//!      12357         green
//!      12355                                         green
//!      12352                         green
//!      12349                                         green
//!      12345         green
//! ```
//!
//! 12352 is the LKGR: it is green for Builder2 itself, and Builder1 and
//! Builder3 each have two green builds around it with no failure in between,
//! so every revision between those builds is assumed green for them too.
//!
//! The search walks from the newest revision backwards until every builder
//! has been seen green once (the first confirmation), which makes that
//! revision the candidate. It then keeps walking until every builder has been
//! seen green a second time. A builder that is green at the candidate itself
//! needs no further build. Any failure on the way throws away everything
//! found so far and restarts the search below it.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use revision::Revision;

use crate::{
    collate::{OrderedBuildHistory, RevisionHistoryEntry},
    config::BuilderKey,
    runlog::{RunEvent, RunLog},
};

/// An LKGR candidate together with the builds that confirm it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub revision: Revision,
    /// Per builder, the oldest green build at or above the candidate.
    pub green1: BTreeMap<BuilderKey, Revision>,
    /// Per builder, the green build at or below the candidate that closed
    /// the bracket.
    pub green2: BTreeMap<BuilderKey, Revision>,
}

type Confirmations<'h> = BTreeMap<BuilderKey, &'h RevisionHistoryEntry>;

fn to_revisions(confirmations: Confirmations<'_>) -> BTreeMap<BuilderKey, Revision> {
    confirmations
        .into_iter()
        .map(|(key, entry)| (key, entry.revision.clone()))
        .collect()
}

pub struct LkgrCandidateFinder<'a> {
    required: &'a BTreeSet<BuilderKey>,
}

impl<'a> LkgrCandidateFinder<'a> {
    pub fn new(required: &'a BTreeSet<BuilderKey>) -> Self {
        Self { required }
    }

    pub fn find(&self, history: &OrderedBuildHistory, log: &mut RunLog) -> Option<Candidate> {
        let mut candidate: Option<&RevisionHistoryEntry> = None;
        let mut green1: Confirmations = BTreeMap::new();
        let mut green2: Confirmations = BTreeMap::new();

        for entry in history.entries() {
            // Builders that did not report at this revision are neutral.
            let (passing, failing): (Vec<BuilderKey>, Vec<BuilderKey>) = entry
                .statuses()
                .filter(|(key, _)| self.required.contains(key))
                .partition_map(|(key, passed)| {
                    if passed {
                        itertools::Either::Left(key)
                    } else {
                        itertools::Either::Right(key)
                    }
                });

            match candidate {
                None => {
                    if !failing.is_empty() {
                        if !green1.is_empty() {
                            log.record(RunEvent::BracketBroken {
                                revision: entry.revision.clone(),
                                failing,
                            });
                        }
                        green1.clear();
                        continue;
                    }
                    for key in &passing {
                        green1.insert(key.clone(), entry);
                    }
                    if green1.len() == self.required.len() {
                        log.record(RunEvent::Green1Complete {
                            revision: entry.revision.clone(),
                        });
                        candidate = Some(entry);
                        for key in passing {
                            green2.insert(key, entry);
                        }
                    }
                }
                Some(current) => {
                    if !failing.is_empty() {
                        log.record(RunEvent::CandidateAbandoned {
                            candidate: current.revision.clone(),
                            revision: entry.revision.clone(),
                            failing,
                        });
                        candidate = None;
                        green1.clear();
                        green2.clear();
                        continue;
                    }
                    for key in passing {
                        green2.insert(key, entry);
                    }
                }
            }

            if candidate.is_some() && green2.len() == self.required.len() {
                break;
            }
        }

        match candidate {
            Some(entry) if green2.len() == self.required.len() => {
                let confirmations = green2
                    .iter()
                    .sorted_by_key(|(_, confirmed)| confirmed.position)
                    .map(|(key, confirmed)| (key.clone(), confirmed.revision.clone()))
                    .collect();
                log.record(RunEvent::Green2Complete {
                    candidate: entry.revision.clone(),
                    confirmations,
                });
                Some(Candidate {
                    revision: entry.revision.clone(),
                    green1: to_revisions(green1),
                    green2: to_revisions(green2),
                })
            }
            _ => {
                log.record(RunEvent::NoCandidate);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn key(builder: &str) -> BuilderKey {
        BuilderKey::new("m", builder)
    }

    fn required(builders: &[&str]) -> BTreeSet<BuilderKey> {
        builders.iter().map(|b| key(b)).collect()
    }

    /// Builds a history from `(revision, [(builder, passed)])`, newest first.
    fn history_from(rows: &[(u64, &[(&str, bool)])]) -> OrderedBuildHistory {
        let entries = rows
            .iter()
            .map(|(revision, statuses)| {
                let mut entry = RevisionHistoryEntry::new(Revision::from(*revision), *revision);
                for (builder, passed) in statuses.iter() {
                    entry.set(&key(builder), *passed);
                }
                entry
            })
            .collect();
        OrderedBuildHistory::from_sorted(entries).unwrap()
    }

    fn find(history: &OrderedBuildHistory, required: &BTreeSet<BuilderKey>) -> Option<u64> {
        let mut log = RunLog::new();
        LkgrCandidateFinder::new(required)
            .find(history, &mut log)
            .map(|candidate| candidate.revision.as_str().parse().unwrap())
    }

    #[test]
    fn test_documented_example() {
        let history = history_from(&[
            (12357, &[("B1", true)]),
            (12355, &[("B3", true)]),
            (12352, &[("B2", true)]),
            (12349, &[("B3", true)]),
            (12345, &[("B1", true)]),
        ]);
        let required = required(&["B1", "B2", "B3"]);
        let mut log = RunLog::new();
        let candidate = LkgrCandidateFinder::new(&required)
            .find(&history, &mut log)
            .unwrap();

        assert_eq!(candidate.revision, Revision::from(12352u64));
        assert_eq!(
            candidate.green2,
            BTreeMap::from([
                (key("B1"), Revision::from(12345u64)),
                (key("B2"), Revision::from(12352u64)),
                (key("B3"), Revision::from(12349u64)),
            ])
        );
        assert_eq!(
            log.events().last(),
            Some(&RunEvent::Green2Complete {
                candidate: Revision::from(12352u64),
                confirmations: vec![
                    (key("B1"), Revision::from(12345u64)),
                    (key("B3"), Revision::from(12349u64)),
                    (key("B2"), Revision::from(12352u64)),
                ],
            })
        );
    }

    #[test]
    fn test_all_green_at_candidate_needs_no_second_build() {
        let history = history_from(&[
            (105, &[("B1", true)]),
            (104, &[]),
            (103, &[("B1", true), ("B2", true)]),
            (102, &[("B2", true)]),
            (101, &[("B1", true), ("B2", false)]),
        ]);
        assert_eq!(find(&history, &required(&["B1", "B2"])), Some(103));

        let shorter = history_from(&[
            (105, &[("B1", true)]),
            (104, &[]),
            (103, &[("B1", true), ("B2", true)]),
            (102, &[("B2", true)]),
        ]);
        assert_eq!(find(&shorter, &required(&["B1", "B2"])), Some(103));
    }

    #[test]
    fn test_coincident_confirmation() {
        // B2 is green only at 20; B1 brackets it from both sides.
        let history = history_from(&[
            (30, &[("B1", true)]),
            (20, &[("B2", true)]),
            (10, &[("B1", true)]),
        ]);
        assert_eq!(find(&history, &required(&["B1", "B2"])), Some(20));
    }

    #[test]
    fn test_failure_between_confirmations() {
        let rows: [(u64, &[(&str, bool)]); 6] = [
            (60, &[("B1", true)]),
            (50, &[("B2", true)]),
            (40, &[("B1", false)]),
            (30, &[("B1", true)]),
            (20, &[("B2", true)]),
            (10, &[("B1", true)]),
        ];
        let required = required(&["B1", "B2"]);
        let mut log = RunLog::new();
        let candidate = LkgrCandidateFinder::new(&required).find(&history_from(&rows), &mut log);
        assert_eq!(
            candidate.map(|c| c.revision),
            Some(Revision::from(20u64))
        );
        assert!(log.events().contains(&RunEvent::CandidateAbandoned {
            candidate: Revision::from(50u64),
            revision: Revision::from(40u64),
            failing: vec![key("B1")],
        }));

        // Without an older bracket nothing qualifies.
        assert_eq!(find(&history_from(&rows[..4]), &required), None);
    }

    #[test]
    fn test_failure_resets_first_confirmation() {
        let history = history_from(&[
            (40, &[("B1", true)]),
            (30, &[("B2", false)]),
            (20, &[("B2", true)]),
            (10, &[("B1", true), ("B2", true)]),
        ]);
        let required = required(&["B1", "B2"]);
        let mut log = RunLog::new();
        let candidate = LkgrCandidateFinder::new(&required).find(&history, &mut log);
        assert_eq!(candidate.map(|c| c.revision), Some(Revision::from(10u64)));
        assert_eq!(
            log.events().first(),
            Some(&RunEvent::BracketBroken {
                revision: Revision::from(30u64),
                failing: vec![key("B2")],
            })
        );
    }

    #[test]
    fn test_absent_builder_is_neutral() {
        let history = history_from(&[
            (50, &[("B1", true)]),
            (40, &[]),
            (30, &[("B1", true)]),
            (20, &[("B2", true)]),
            (10, &[("B1", true)]),
        ]);
        assert_eq!(find(&history, &required(&["B1", "B2"])), Some(20));

        // A builder that never reports stalls the search.
        assert_eq!(find(&history, &required(&["B1", "B2", "B3"])), None);
    }

    #[test]
    fn test_unconfigured_builders_are_ignored() {
        let history = history_from(&[
            (20, &[("B1", true), ("Other", false)]),
            (10, &[("B1", true)]),
        ]);
        assert_eq!(find(&history, &required(&["B1"])), Some(20));
    }

    #[test]
    fn test_empty_history() {
        let mut log = RunLog::new();
        let required = required(&["B1"]);
        assert_eq!(
            LkgrCandidateFinder::new(&required).find(&OrderedBuildHistory::default(), &mut log),
            None
        );
        assert_eq!(log.events(), &[RunEvent::NoCandidate]);
    }

    /// Returns the newest revision R such that, within a stretch of history
    /// with no failure, every builder is green somewhere at or above R and
    /// somewhere at or below R.
    fn brute_force(
        history: &OrderedBuildHistory,
        required: &BTreeSet<BuilderKey>,
    ) -> Option<Revision> {
        let entries = history.entries();
        let is_bad = |entry: &RevisionHistoryEntry| {
            entry
                .statuses()
                .any(|(key, passed)| required.contains(&key) && !passed)
        };
        let covers = |window: &[RevisionHistoryEntry]| {
            required
                .iter()
                .all(|key| window.iter().any(|entry| entry.get(key) == Some(true)))
        };
        for (i, entry) in entries.iter().enumerate() {
            if is_bad(entry) {
                continue;
            }
            let mut lo = i;
            while lo > 0 && !is_bad(&entries[lo - 1]) {
                lo -= 1;
            }
            let mut hi = i;
            while hi + 1 < entries.len() && !is_bad(&entries[hi + 1]) {
                hi += 1;
            }
            if covers(&entries[lo..=i]) && covers(&entries[i..=hi]) {
                return Some(entry.revision.clone());
            }
        }
        None
    }

    fn grid_strategy() -> impl Strategy<Value = (usize, Vec<Vec<Option<bool>>>)> {
        (1usize..=4).prop_flat_map(|builders| {
            let cell = prop_oneof![
                3 => Just(Some(true)),
                1 => Just(Some(false)),
                2 => Just(None),
            ];
            (
                Just(builders),
                prop::collection::vec(prop::collection::vec(cell, builders), 0..16),
            )
        })
    }

    fn grid_history(builders: usize, grid: &[Vec<Option<bool>>]) -> OrderedBuildHistory {
        let entries = grid
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let position = (grid.len() - i) as u64;
                let mut entry = RevisionHistoryEntry::new(Revision::from(position), position);
                for (b, cell) in row.iter().enumerate().take(builders) {
                    if let Some(passed) = cell {
                        entry.set(&key(&format!("b{b}")), *passed);
                    }
                }
                entry
            })
            .collect();
        OrderedBuildHistory::from_sorted(entries).unwrap()
    }

    proptest! {
        #[test]
        fn proptest_matches_brute_force((builders, grid) in grid_strategy()) {
            let history = grid_history(builders, &grid);
            let required: BTreeSet<BuilderKey> =
                (0..builders).map(|b| key(&format!("b{b}"))).collect();
            let mut log = RunLog::new();
            let found = LkgrCandidateFinder::new(&required)
                .find(&history, &mut log)
                .map(|c| c.revision);
            prop_assert_eq!(found, brute_force(&history, &required));
        }

        #[test]
        fn proptest_deterministic((builders, grid) in grid_strategy()) {
            let history = grid_history(builders, &grid);
            let required: BTreeSet<BuilderKey> =
                (0..builders).map(|b| key(&format!("b{b}"))).collect();
            let finder = LkgrCandidateFinder::new(&required);
            let mut first_log = RunLog::new();
            let mut second_log = RunLog::new();
            prop_assert_eq!(
                finder.find(&history, &mut first_log),
                finder.find(&history, &mut second_log)
            );
            prop_assert_eq!(first_log.events(), second_log.events());
        }
    }
}
