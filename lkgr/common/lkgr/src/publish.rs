// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

use chrono::Duration;
use revision::{Revision, RevisionOrdering};

use crate::config::{DEFAULT_ALLOWED_GAP, DEFAULT_ALLOWED_LAG_HOURS};

/// How stale the published LKGR may get before an alert is raised.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StalenessPolicy {
    /// Maximum number of commits the LKGR may trail the newest revision.
    pub allowed_gap: u64,
    /// Base number of hours the LKGR may trail wall-clock time.
    pub allowed_lag_hours: f64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            allowed_gap: DEFAULT_ALLOWED_GAP,
            allowed_lag_hours: DEFAULT_ALLOWED_LAG_HOURS,
        }
    }
}

impl StalenessPolicy {
    /// Returns the tolerated LKGR age for a given revision gap.
    ///
    /// A quiet tree (small gap) tolerates an older LKGR; the window shrinks
    /// to `allowed_lag_hours` as the gap reaches `allowed_gap`.
    pub fn max_lag_hours(&self, rev_gap: u64) -> f64 {
        let slack = self.allowed_gap.saturating_sub(rev_gap) as f64;
        (1.0 + slack / 30.0) * self.allowed_lag_hours
    }

    pub fn check(&self, rev_gap: u64, age: Option<Duration>) -> Vec<StalenessAlert> {
        let mut alerts = Vec::new();
        if rev_gap > self.allowed_gap {
            alerts.push(StalenessAlert::RevisionGap {
                gap: rev_gap,
                allowed_gap: self.allowed_gap,
            });
        }
        if let Some(age) = age {
            let age_hours = age.num_seconds() as f64 / 3600.0;
            let max_lag_hours = self.max_lag_hours(rev_gap);
            if age_hours > max_lag_hours {
                alerts.push(StalenessAlert::TimeLag {
                    age_hours,
                    max_lag_hours,
                });
            }
        }
        alerts
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StalenessAlert {
    RevisionGap { gap: u64, allowed_gap: u64 },
    TimeLag { age_hours: f64, max_lag_hours: f64 },
}

impl fmt::Display for StalenessAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessAlert::RevisionGap { gap, allowed_gap } => write!(
                f,
                "LKGR is {gap} revisions behind the newest revision (allowed: {allowed_gap})"
            ),
            StalenessAlert::TimeLag {
                age_hours,
                max_lag_hours,
            } => write!(
                f,
                "LKGR is {age_hours:.1} hours old (allowed: {max_lag_hours:.1})"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("current LKGR {0} cannot be ordered")]
    UnorderedCurrent(Revision),
    #[error("candidate {0} cannot be ordered")]
    UnorderedCandidate(Revision),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishDecision {
    /// The new LKGR, if it should be published.
    pub publish: Option<Revision>,
    /// Staleness alerts about the current LKGR. Always empty when a new LKGR
    /// is published.
    pub alerts: Vec<StalenessAlert>,
}

/// Decides whether a candidate replaces the current LKGR and whether the
/// current LKGR has gone stale.
pub struct LkgrPublisher<'a> {
    ordering: &'a dyn RevisionOrdering,
    policy: StalenessPolicy,
}

impl<'a> LkgrPublisher<'a> {
    pub fn new(ordering: &'a dyn RevisionOrdering, policy: StalenessPolicy) -> Self {
        Self { ordering, policy }
    }

    /// `current_age` is the wall-clock time since the current LKGR was
    /// committed; the time lag check is skipped without it.
    pub fn evaluate(
        &self,
        candidate: Option<&Revision>,
        current: &Revision,
        latest: Option<&Revision>,
        current_age: Option<Duration>,
    ) -> Result<PublishDecision, PublishError> {
        let current_position = self
            .ordering
            .position(current)
            .ok_or_else(|| PublishError::UnorderedCurrent(current.clone()))?;

        if let Some(candidate) = candidate {
            let candidate_position = self
                .ordering
                .position(candidate)
                .ok_or_else(|| PublishError::UnorderedCandidate(candidate.clone()))?;
            if candidate_position > current_position {
                tracing::info!("Revision {candidate} is new LKGR");
                return Ok(PublishDecision {
                    publish: Some(candidate.clone()),
                    alerts: Vec::new(),
                });
            }
        }
        tracing::info!("No newer LKGR found than current {current}");

        let rev_gap = latest
            .and_then(|latest| self.ordering.position(latest))
            .map_or(0, |latest| latest.saturating_sub(current_position));
        Ok(PublishDecision {
            publish: None,
            alerts: self.policy.check(rev_gap, current_age),
        })
    }
}
