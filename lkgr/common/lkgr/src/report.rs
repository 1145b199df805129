// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Renders the HTML status page published next to the LKGR.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use revision::Revision;
use serde::Serialize;
use tera::Tera;

use crate::{collate::OrderedBuildHistory, config::BuilderKey, runlog::RunLog};

/// Number of revisions shown unless the caller asks otherwise.
pub const DEFAULT_MAX_ROWS: usize = 100;

lazy_static! {
    static ref TEMPLATE: Tera = {
        let mut tera: Tera = Default::default();
        tera.add_raw_template("status.html", include_str!("templates/status.html"))
            .unwrap();
        tera
    };
}

#[derive(Serialize)]
struct Row {
    revision: String,
    class: &'static str,
    cells: Vec<&'static str>,
}

#[derive(Serialize)]
struct StatusContext<'a> {
    project: &'a str,
    generated_at: String,
    current_lkgr: String,
    candidate: String,
    builders: Vec<String>,
    rows: Vec<Row>,
    log_lines: Vec<String>,
}

pub struct StatusReport<'a> {
    pub project: &'a str,
    pub history: &'a OrderedBuildHistory,
    pub required: &'a BTreeSet<BuilderKey>,
    pub current_lkgr: Option<&'a Revision>,
    pub candidate: Option<&'a Revision>,
    pub log: &'a RunLog,
    pub max_rows: usize,
}

impl StatusReport<'_> {
    pub fn render(&self, generated_at: DateTime<Utc>) -> Result<String> {
        let rows = self
            .history
            .entries()
            .iter()
            .take(self.max_rows)
            .map(|entry| {
                let class = if Some(&entry.revision) == self.candidate {
                    "candidate"
                } else if Some(&entry.revision) == self.current_lkgr {
                    "lkgr"
                } else {
                    ""
                };
                let cells = self
                    .required
                    .iter()
                    .map(|key| match entry.get(key) {
                        Some(true) => "pass",
                        Some(false) => "fail",
                        None => "",
                    })
                    .collect();
                Row {
                    revision: entry.revision.to_string(),
                    class,
                    cells,
                }
            })
            .collect();

        let context = StatusContext {
            project: self.project,
            generated_at: generated_at.to_rfc3339(),
            current_lkgr: self.current_lkgr.map(ToString::to_string).unwrap_or_default(),
            candidate: self.candidate.map(ToString::to_string).unwrap_or_default(),
            builders: self.required.iter().map(ToString::to_string).collect(),
            rows,
            log_lines: self.log.lines(),
        };
        Ok(TEMPLATE.render("status.html", &tera::Context::from_serialize(context)?)?)
    }
}
