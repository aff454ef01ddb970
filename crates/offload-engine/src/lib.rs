// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The offload dispatcher, the stats aggregator, and the top-level
//! `OffloadCtx` producer API: the glue that turns `offload-queue`,
//! `offload-classifier`, and `offload-merge` into one engine a datapath
//! can drive through a handful of calls.
//!
//! Everything here is built on top of the narrower crates' contracts
//! ([`offload_queue::Dispatch`], [`offload_netdev::NetdevBackend`]); this
//! crate owns no hardware-facing logic of its own beyond routing a work
//! item to the right one of those collaborators.

mod ctx;
mod dispatcher;
mod stats;

pub use ctx::{global, set_global, OffloadCtx};
