// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Computes the Last Known Good Revision (LKGR) of a project from the build
//! results of a fixed set of builders.
//!
//! The pipeline is:
//!
//! 1. [`BuildHistoryCollator`] turns raw per-builder build data into an
//!    [`OrderedBuildHistory`].
//! 2. [`LkgrCandidateFinder`] walks that history to find the newest revision
//!    bracketed by green builds on every builder.
//! 3. [`LkgrPublisher`] decides whether the candidate replaces the current
//!    LKGR, or whether the current LKGR has gone stale.

mod build;
mod collate;
mod config;
mod finder;
mod notify;
mod publish;
mod report;
mod runlog;

pub use crate::build::*;
pub use crate::collate::*;
pub use crate::config::*;
pub use crate::finder::*;
pub use crate::notify::*;
pub use crate::publish::*;
pub use crate::report::*;
pub use crate::runlog::*;
