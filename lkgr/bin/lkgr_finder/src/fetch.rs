// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use lkgr::{BuilderKey, MasterConfig, ProjectConfig, RawBuilds};
use rayon::prelude::*;
use serde_json::Value;
use url::Url;

/// Timeout applied to every HTTP request. Requests are never retried; the
/// next scheduled run will try again.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Fetches the build history of one builder, keyed by build number.
pub trait BuildFetcher: Sync {
    fn fetch(&self, master: &MasterConfig, builder: &str) -> Result<BTreeMap<String, Value>>;
}

/// Returns the URL listing every build of `builder`.
pub fn builds_url(base_url: &str, builder: &str) -> Result<Url> {
    let mut url =
        Url::parse(base_url).with_context(|| format!("Invalid master URL {base_url:?}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Master URL {base_url:?} cannot have a path"))?
        .pop_if_empty()
        .extend(["builders", builder, "builds", "_all"]);
    Ok(url)
}

pub struct HttpBuildFetcher {
    agent: ureq::Agent,
}

impl HttpBuildFetcher {
    pub fn new(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl BuildFetcher for HttpBuildFetcher {
    fn fetch(&self, master: &MasterConfig, builder: &str) -> Result<BTreeMap<String, Value>> {
        let url = builds_url(&master.base_url, builder)?;
        tracing::debug!("Fetching {url}");
        self.agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("Failed to fetch {url}"))?
            .into_body()
            .read_json()
            .with_context(|| format!("Failed to parse {url}"))
    }
}

/// Fetches every configured builder concurrently, with at most `jobs`
/// requests in flight.
///
/// A builder that cannot be fetched is logged and left out of the result, so
/// it is treated as not having reported anything.
pub fn fetch_all(config: &ProjectConfig, fetcher: &dyn BuildFetcher, jobs: usize) -> Result<RawBuilds> {
    let keys: Vec<BuilderKey> = config.required_builders().into_iter().collect();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.clamp(1, keys.len().max(1)))
        .thread_name(|i| format!("fetch-{i}"))
        .build()
        .context("Failed to create the fetch thread pool")?;

    let results: Vec<(BuilderKey, Result<BTreeMap<String, Value>>)> = pool.install(|| {
        keys.into_par_iter()
            .map(|key| {
                let result = match config.masters.get(&key.master) {
                    Some(master) => fetcher.fetch(master, &key.builder),
                    None => Err(anyhow!("Unknown master {}", key.master)),
                };
                (key, result)
            })
            .collect()
    });

    let mut builds = RawBuilds::new();
    for (key, result) in results {
        match result {
            Ok(history) => {
                builds
                    .entry(key.master)
                    .or_default()
                    .insert(key.builder, history);
            }
            Err(e) => tracing::warn!("Skipping {key}: {e:#}"),
        }
    }
    Ok(builds)
}

/// Loads build data previously saved with [`dump_builds`].
pub fn load_builds(path: &Path) -> Result<RawBuilds> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn dump_builds(path: &Path, builds: &RawBuilds) -> Result<()> {
    let f = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(f), builds)
        .with_context(|| format!("Failed to write {}", path.display()))
}
