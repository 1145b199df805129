// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Revision identifiers and the orderings used to compare them.
//!
//! A [`Revision`] is an opaque token. Whether two revisions can be compared
//! depends on the [`RevisionOrdering`] in use: numeric commit positions are
//! ordered intrinsically, while content-addressed identifiers such as git
//! hashes need an explicit position map.

use std::{cmp::Ordering, collections::HashMap, fmt, path::Path};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// An opaque identifier of a point in the project history.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Establishes a total order over revisions by mapping each of them to a
/// commit position.
///
/// Two revisions are comparable only if both have a position. Callers treat
/// revisions without a position as unplaceable.
pub trait RevisionOrdering: Send + Sync {
    /// Returns the commit position of `revision`, or `None` if unknown.
    fn position(&self, revision: &Revision) -> Option<u64>;

    fn compare(&self, a: &Revision, b: &Revision) -> Option<Ordering> {
        Some(self.position(a)?.cmp(&self.position(b)?))
    }

    /// Returns how many commits `newer` is ahead of `older`. Saturates at zero
    /// when `newer` is actually older.
    fn distance(&self, newer: &Revision, older: &Revision) -> Option<u64> {
        Some(self.position(newer)?.saturating_sub(self.position(older)?))
    }
}

lazy_static! {
    static ref COMMIT_POSITION_RE: Regex =
        Regex::new(r"^(?:[^@\s]+@\{#)?(\d+)\}?$").unwrap();
}

/// Orders revisions that are commit positions, written either as plain
/// numbers (`12345`) or as commit position footers
/// (`refs/heads/main@{#12345}`).
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitPositionOrdering;

impl RevisionOrdering for CommitPositionOrdering {
    fn position(&self, revision: &Revision) -> Option<u64> {
        let s = revision.as_str().trim();
        let caps = COMMIT_POSITION_RE.captures(s)?;
        // Reject mismatched braces such as "123}".
        if s.ends_with('}') != s.contains("@{#") {
            return None;
        }
        caps.get(1)?.as_str().parse().ok()
    }
}

/// Orders revisions through an explicit revision-to-position table, typically
/// obtained from a commit position service for git hashes.
#[derive(Clone, Debug, Default)]
pub struct PositionMapOrdering {
    positions: HashMap<Revision, u64>,
}

impl PositionMapOrdering {
    pub fn new(positions: HashMap<Revision, u64>) -> Self {
        Self { positions }
    }

    /// Loads a JSON object of the form `{"<revision>": <position>, ...}`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let positions: HashMap<Revision, u64> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::new(positions))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl FromIterator<(Revision, u64)> for PositionMapOrdering {
    fn from_iter<I: IntoIterator<Item = (Revision, u64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl RevisionOrdering for PositionMapOrdering {
    fn position(&self, revision: &Revision) -> Option<u64> {
        self.positions.get(revision).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_commit_position_parse() {
        let ordering = CommitPositionOrdering;
        let cases = [
            ("0", Some(0)),
            ("12352", Some(12352)),
            (" 42\n", Some(42)),
            ("refs/heads/main@{#12345}", Some(12345)),
            ("refs/heads/master@{#1}", Some(1)),
            ("deadbeef", None),
            ("", None),
            ("-3", None),
            ("12}", None),
            ("refs/heads/main@{#12", None),
        ];
        for (input, want) in cases {
            assert_eq!(ordering.position(&input.into()), want, "input {:?}", input);
        }
    }

    #[test]
    fn test_compare_and_distance() {
        let ordering = CommitPositionOrdering;
        let a = Revision::from(100);
        let b = Revision::from("refs/heads/main@{#250}");
        assert_eq!(ordering.compare(&a, &b), Some(Ordering::Less));
        assert_eq!(ordering.distance(&b, &a), Some(150));
        assert_eq!(ordering.distance(&a, &b), Some(0));
        assert_eq!(ordering.compare(&a, &"abc".into()), None);
    }

    #[test]
    fn test_position_map() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), r#"{"deadbeef": 10, "cafef00d": 12}"#)?;
        let ordering = PositionMapOrdering::load(file.path())?;
        assert_eq!(ordering.len(), 2);
        assert_eq!(
            ordering.compare(&"cafef00d".into(), &"deadbeef".into()),
            Some(Ordering::Greater)
        );
        assert_eq!(ordering.position(&"12".into()), None);
        Ok(())
    }

    proptest! {
        #[test]
        fn proptest_commit_position_matches_numeric(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let ordering = CommitPositionOrdering;
            let ra = Revision::from(a);
            let rb = Revision::new(format!("refs/heads/main@{{#{b}}}"));
            prop_assert_eq!(ordering.compare(&ra, &rb), Some(a.cmp(&b)));
            prop_assert_eq!(ordering.distance(&ra, &rb), Some(a.saturating_sub(b)));
        }

        #[test]
        fn proptest_parse_no_crash(s in "\\PC*") {
            CommitPositionOrdering.position(&Revision::new(s));
        }
    }
}
