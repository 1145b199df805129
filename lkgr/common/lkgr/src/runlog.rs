// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

use itertools::Itertools;
use revision::Revision;
use serde::Serialize;

use crate::config::BuilderKey;

/// One step of reasoning recorded while collating builds or walking the
/// history.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A build could not be placed in the history at all.
    BuildSkipped {
        builder: BuilderKey,
        number: String,
        reason: String,
    },
    /// A build was placed in the history as bad.
    BuildBad {
        builder: BuilderKey,
        number: u64,
        revision: Revision,
        reasons: Vec<String>,
    },
    /// Every required builder has a first green build; `revision` becomes
    /// the candidate.
    Green1Complete { revision: Revision },
    /// A failure was seen before the first confirmation was complete.
    BracketBroken {
        revision: Revision,
        failing: Vec<BuilderKey>,
    },
    /// A failure was seen below the candidate before the second confirmation
    /// was complete.
    CandidateAbandoned {
        candidate: Revision,
        revision: Revision,
        failing: Vec<BuilderKey>,
    },
    /// Every required builder has a second green build.
    Green2Complete {
        candidate: Revision,
        confirmations: Vec<(BuilderKey, Revision)>,
    },
    NoCandidate,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::BuildSkipped {
                builder,
                number,
                reason,
            } => write!(f, "{builder}: skipped build {number}: {reason}"),
            RunEvent::BuildBad {
                builder,
                number,
                revision,
                reasons,
            } => write!(
                f,
                "{builder}: build {number} (rev {revision}) is bad or incomplete: {}",
                reasons.join("; ")
            ),
            RunEvent::Green1Complete { revision } => {
                write!(f, "Revision {revision} has a green build for every builder")
            }
            RunEvent::BracketBroken { revision, failing } => write!(
                f,
                "Revision {revision} failed on {}; restarting search",
                failing.iter().join(", ")
            ),
            RunEvent::CandidateAbandoned {
                candidate,
                revision,
                failing,
            } => write!(
                f,
                "Candidate {candidate} abandoned: revision {revision} failed on {}",
                failing.iter().join(", ")
            ),
            RunEvent::Green2Complete {
                candidate,
                confirmations,
            } => {
                write!(f, "Revision {candidate} is good based on:")?;
                for (builder, revision) in confirmations {
                    write!(f, "\n  Revision {revision} is green for builder {builder}")?;
                }
                Ok(())
            }
            RunEvent::NoCandidate => write!(f, "No LKGR candidate found"),
        }
    }
}

/// An ordered record of [`RunEvent`]s.
///
/// Every event is also emitted through `tracing`, so the same stream shows up
/// in the console and log files while remaining inspectable by callers.
#[derive(Debug, Default)]
pub struct RunLog {
    events: Vec<RunEvent>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: RunEvent) {
        match &event {
            RunEvent::BuildSkipped { .. } | RunEvent::BuildBad { .. } => {
                tracing::debug!("{event}")
            }
            _ => tracing::info!("{event}"),
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Renders every event as human-readable lines.
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_order() {
        let mut log = RunLog::new();
        log.record(RunEvent::Green1Complete {
            revision: Revision::from(103u64),
        });
        log.record(RunEvent::Green2Complete {
            candidate: Revision::from(103u64),
            confirmations: vec![
                (BuilderKey::new("m", "b1"), Revision::from(101u64)),
                (BuilderKey::new("m", "b2"), Revision::from(103u64)),
            ],
        });
        log.record(RunEvent::NoCandidate);

        assert_eq!(log.events().len(), 3);
        assert_eq!(
            log.lines(),
            vec![
                "Revision 103 has a green build for every builder".to_owned(),
                "Revision 103 is good based on:\n  Revision 101 is green for builder m:b1\n  Revision 103 is green for builder m:b2".to_owned(),
                "No LKGR candidate found".to_owned(),
            ]
        );
    }
}
