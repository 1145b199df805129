// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use revision::Revision;
use serde::Serialize;

use crate::{config::NotifyTarget, publish::StalenessAlert};

/// Tells a downstream master that a new LKGR exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub revision: Revision,
    pub branch: String,
    pub category: String,
}

impl Notification {
    pub fn new(revision: &Revision, target: &NotifyTarget) -> Self {
        Self {
            revision: revision.clone(),
            branch: target.branch.clone(),
            category: target.category.clone(),
        }
    }
}

/// A message for the operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    pub fn stale(project: &str, current: &Revision, alerts: &[StalenessAlert]) -> Self {
        Self {
            subject: format!("{project} LKGR ({current}) exceeds lag threshold"),
            body: alerts.iter().join("\n"),
        }
    }

    /// The LKGR computation itself could not run or finish.
    pub fn failure(project: &str, error: &anyhow::Error) -> Self {
        Self {
            subject: format!("{project} LKGR update failed"),
            body: format!("{error:?}"),
        }
    }
}

/// Delivers notifications and alerts.
pub trait Notifier {
    fn notify(&self, master: &str, notification: &Notification) -> Result<()>;
    fn alert(&self, alert: &Alert) -> Result<()>;
}

/// Only logs what would have been sent.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, master: &str, notification: &Notification) -> Result<()> {
        tracing::info!(
            "Would notify {master}: revision={} branch={} category={}",
            notification.revision,
            notification.branch,
            notification.category
        );
        Ok(())
    }

    fn alert(&self, alert: &Alert) -> Result<()> {
        tracing::warn!("ALERT: {}\n{}", alert.subject, alert.body);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutboxRecord<'a> {
    Notification {
        master: &'a str,
        #[serde(flatten)]
        notification: &'a Notification,
    },
    Alert {
        #[serde(flatten)]
        alert: &'a Alert,
    },
}

/// Appends every message as a JSON line to a file picked up by the delivery
/// service.
#[derive(Debug)]
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    fn append(&self, record: &OutboxRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(f, "{line}")
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, master: &str, notification: &Notification) -> Result<()> {
        tracing::info!("Notifying {master} of LKGR {}", notification.revision);
        self.append(&OutboxRecord::Notification {
            master,
            notification,
        })
    }

    fn alert(&self, alert: &Alert) -> Result<()> {
        tracing::warn!("Sending alert: {}", alert.subject);
        self.append(&OutboxRecord::Alert { alert })
    }
}

/// Notifies every configured downstream master. A failure to notify one
/// master does not prevent notifying the others.
pub fn notify_all(
    notifier: &dyn Notifier,
    targets: &[NotifyTarget],
    revision: &Revision,
) -> Result<()> {
    let mut failed = Vec::new();
    for target in targets {
        if let Err(e) = notifier.notify(&target.master, &Notification::new(revision, target)) {
            tracing::warn!("Failed to notify {}: {e:#}", target.master);
            failed.push(target.master.as_str());
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("Failed to notify {}", failed.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn targets() -> Vec<NotifyTarget> {
        vec![
            NotifyTarget {
                master: "chromium.lkgr".to_owned(),
                branch: "src".to_owned(),
                category: "lkgr".to_owned(),
            },
            NotifyTarget {
                master: "client.v8".to_owned(),
                branch: "master".to_owned(),
                category: "lkgr".to_owned(),
            },
        ]
    }

    #[test]
    fn test_outbox() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("outbox.jsonl");
        let notifier = OutboxNotifier::new(&path);

        notify_all(&notifier, &targets(), &Revision::from(12352u64))?;
        notifier.alert(&Alert::stale(
            "chromium",
            &Revision::from(100u64),
            &[StalenessAlert::RevisionGap {
                gap: 200,
                allowed_gap: 150,
            }],
        ))?;

        let content = std::fs::read_to_string(&path)?;
        assert_eq!(
            content.lines().collect::<Vec<_>>(),
            vec![
                r#"{"kind":"notification","master":"chromium.lkgr","revision":"12352","branch":"src","category":"lkgr"}"#,
                r#"{"kind":"notification","master":"client.v8","revision":"12352","branch":"master","category":"lkgr"}"#,
                r#"{"kind":"alert","subject":"chromium LKGR (100) exceeds lag threshold","body":"LKGR is 200 revisions behind the newest revision (allowed: 150)"}"#,
            ]
        );
        Ok(())
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, master: &str, _notification: &Notification) -> Result<()> {
            if master == "client.v8" {
                anyhow::bail!("unreachable");
            }
            Ok(())
        }

        fn alert(&self, _alert: &Alert) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_notify_all_reports_failures() {
        let result = notify_all(&FailingNotifier, &targets(), &Revision::from(1u64));
        assert_eq!(
            result.map_err(|e| e.to_string()),
            Err("Failed to notify client.v8".to_owned())
        );
    }
}
