// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The tunnel auxiliary state and the cross-product flow merger that
//! installs/removes/queries it on hardware.
//!
//! This crate knows nothing about the request queue or the dispatcher: it
//! exposes `add_ingress`/`add_inner`/`delete_ingress`/`delete_inner`/the
//! stats aggregation helpers as free functions over a [`TnlAux`] and a
//! [`offload_netdev::NetdevBackend`], and `offload-engine` drives them.

pub mod merger;
pub mod registry;
pub mod tnlaux;

pub use merger::{
    add_ingress, add_inner, aggregate_ingress_stats, aggregate_inner_stats, delete_ingress,
    delete_inner,
};
pub use registry::TnlAuxRegistry;
pub use tnlaux::{
    IngressDumpEntry, IngressFlow, InnerDumpEntry, InnerFlow, MergeStatus, TnlAux, TnlAuxDump,
};
