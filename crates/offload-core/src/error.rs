// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors produced by the flow-offload engine.
//!
//! One variant per failure category named in `spec.md` §7, each carrying
//! just enough context to log usefully. None of these abort the process:
//! the engine reports outcomes through a flow's `status` and the boolean
//! return of queue producers, never by panicking on a hardware error.

use crate::ids::{DpifClass, MegaUfid, OdpPort};

/// All errors the flow-offload engine can report.
#[derive(thiserror::Error, Debug)]
pub enum OffloadError {
    /// The ingress or tunnel port named by a flow's `in_port` could not be
    /// resolved to a netdev by the backend.
    #[error("port {port} not found for dpif class {dpif_class:?}")]
    PortNotFound {
        /// The unresolved port number.
        port: OdpPort,
        /// The dpif class the lookup was scoped to.
        dpif_class: DpifClass,
    },

    /// A flow with this mega-UFID is already present in the target
    /// `TnlAux` map, attributed to another producer thread.
    #[error("duplicate flow {ufid} in tunnel auxiliary map (owned by another PMD)")]
    DuplicateFlow {
        /// The mega-UFID that collided.
        ufid: MegaUfid,
    },

    /// The action classifier rejected this flow's action list.
    #[error("flow {ufid} is not offloadable: {reason}")]
    NotOffloadable {
        /// The flow that was rejected.
        ufid: MegaUfid,
        /// Human-readable reason (e.g. "OUTPUT to tap port").
        reason: String,
    },

    /// The hardware backend rejected an install or delete call.
    #[error("hardware backend rejected {operation} for {ufid} on {port}: {details}")]
    HardwareRejected {
        /// `"put"`, `"del"`, or `"get"`.
        operation: &'static str,
        /// The key the operation was attempted under (either a flow's own
        /// mega-UFID, or a merged UFID).
        ufid: MegaUfid,
        /// The netdev the call targeted.
        port: OdpPort,
        /// Backend-provided detail string.
        details: String,
    },

    /// A cross-product rollback observed an `InnerFlow` left in `Failed`
    /// with `ref_count > 0`: the spec's open question in §9 — the source
    /// logs and continues rather than treating this as fatal, but callers
    /// are told via this variant so it can be surfaced as a health signal.
    #[error("inconsistent state: inner flow {ufid} failed merge but ref_count={ref_count} > 0")]
    InvariantViolation {
        /// The inner flow whose ref_count did not reach zero.
        ufid: MegaUfid,
        /// Its ref_count at the time of the violation.
        ref_count: u32,
    },

    /// The engine configuration failed to parse or validate.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}
