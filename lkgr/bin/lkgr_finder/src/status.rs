// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reading and publishing the LKGR status.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use revision::Revision;

fn parse_lkgr(content: &str, source: &str) -> Result<Revision> {
    let content = content.trim();
    if content.is_empty() {
        bail!("{source} does not contain a revision");
    }
    Ok(Revision::new(content))
}

/// Reads the current LKGR from a file holding just the revision.
pub fn read_lkgr_file(path: &Path) -> Result<Revision> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read current LKGR from {}", path.display()))?;
    parse_lkgr(&content, &path.display().to_string())
}

/// Fetches the current LKGR from a status endpoint returning just the
/// revision.
pub fn fetch_lkgr(agent: &ureq::Agent, url: &str) -> Result<Revision> {
    let content = agent
        .get(url)
        .call()
        .with_context(|| format!("Failed to fetch current LKGR from {url}"))?
        .into_body()
        .read_to_string()
        .with_context(|| format!("Failed to read response of {url}"))?;
    parse_lkgr(&content, url)
}

/// Writes the new LKGR to `path`. The file is left empty when there is
/// nothing newer to publish.
pub fn write_lkgr_file(path: &Path, new_lkgr: Option<&Revision>) -> Result<()> {
    let content = new_lkgr.map(Revision::as_str).unwrap_or_default();
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Uploads the new LKGR to the status app.
pub fn post_lkgr(
    agent: &ureq::Agent,
    url: &str,
    password_file: &Path,
    new_lkgr: &Revision,
) -> Result<()> {
    let password = std::fs::read_to_string(password_file)
        .with_context(|| format!("Failed to read {}", password_file.display()))?;
    tracing::info!("Posting LKGR {new_lkgr} to {url}");
    agent
        .post(url)
        .send_form([
            ("revision", new_lkgr.as_str()),
            ("success", "1"),
            ("password", password.trim()),
        ])
        .with_context(|| format!("Failed to post LKGR {new_lkgr} to {url}"))?;
    Ok(())
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
}

/// Returns how long ago the current LKGR was committed.
pub fn lkgr_age(committed_at: DateTime<FixedOffset>, now: DateTime<Utc>) -> Duration {
    now - committed_at.with_timezone(&Utc)
}
