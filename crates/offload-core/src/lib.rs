// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared data model for the flow-offload engine.
//!
//! This crate has no knowledge of hardware backends, classifiers, or the
//! request queue; it only defines the types every other crate in the
//! workspace builds on: [`ids`] (mega-UFID, datapath/port identifiers),
//! [`status`] (the per-flow offload state machine), [`flow`] (the
//! `SourceFlow` handle contract and the action/match model), [`error`],
//! and [`config`].

pub mod config;
pub mod error;
pub mod flow;
pub mod ids;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::OffloadConfig;
pub use error::OffloadError;
pub use flow::{Action, ActionFlags, ActionList, FlowMatch, FlowUsage, SourceFlow};
pub use ids::{DpifClass, MegaUfid, MergedUfid, OdpPort};
pub use status::OffloadStatus;
