// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! A concrete [`SourceFlow`] implementation for use across the workspace's
//! test suites, mirroring the corpus convention of a `testing` module
//! providing mock implementations of the traits the engine's real
//! collaborators are expected to satisfy.

use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use crate::flow::{ActionList, FlowMatch, FlowUsage, SourceFlow};
use crate::ids::{MegaUfid, OdpPort};
use crate::status::{AtomicStatus, OffloadStatus};

/// A standalone, heap-allocated flow handle for tests and the CLI demo.
///
/// Real datapaths own their flow entries and hand the engine a reference
/// into their own table; `TestFlow` stands in for that by owning its data
/// directly. `actions`/`flow_match` are behind a `Mutex` solely so tests can
/// mutate them between a `Mod`'s old and new `WorkItem`; the engine itself
/// never calls back into these setters.
#[derive(Debug)]
pub struct TestFlow {
    ufid: MegaUfid,
    in_port: OdpPort,
    actions: Mutex<ActionList>,
    flow_match: Mutex<FlowMatch>,
    version: std::sync::atomic::AtomicU64,
    status: AtomicStatus,
    dead: std::sync::atomic::AtomicBool,
    used_ms: AtomicU64,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
}

impl TestFlow {
    /// Creates a new flow handle with the given identity, port, actions
    /// and match, in status `None`.
    #[must_use]
    pub fn new(ufid: MegaUfid, in_port: OdpPort, actions: ActionList, flow_match: FlowMatch) -> Self {
        Self {
            ufid,
            in_port,
            actions: Mutex::new(actions),
            flow_match: Mutex::new(flow_match),
            version: std::sync::atomic::AtomicU64::new(0),
            status: AtomicStatus::new(OffloadStatus::None),
            dead: std::sync::atomic::AtomicBool::new(false),
            used_ms: AtomicU64::new(0),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }

    /// Replaces the cached actions and bumps the version counter, as a
    /// datapath would when a flow is modified.
    pub fn set_actions(&self, actions: ActionList) {
        *self.actions.lock().expect("test flow mutex poisoned") = actions;
        let _ = self
            .version
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Replaces the cached match.
    pub fn set_match(&self, flow_match: FlowMatch) {
        *self.flow_match.lock().expect("test flow mutex poisoned") = flow_match;
    }

    /// Marks the flow dead, as a datapath would after the owning rule is
    /// removed out from under an in-flight offload request.
    pub fn mark_dead(&self) {
        self.dead.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl SourceFlow for TestFlow {
    fn mega_ufid(&self) -> MegaUfid {
        self.ufid
    }

    fn in_port(&self) -> OdpPort {
        self.in_port
    }

    fn actions(&self) -> ActionList {
        self.actions.lock().expect("test flow mutex poisoned").clone()
    }

    fn flow_match(&self) -> FlowMatch {
        self.flow_match.lock().expect("test flow mutex poisoned").clone()
    }

    fn version(&self) -> u64 {
        self.version.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn status(&self) -> OffloadStatus {
        self.status.load()
    }

    fn set_status(&self, status: OffloadStatus) {
        self.status.store(status);
    }

    fn is_dead(&self) -> bool {
        self.dead.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn record_usage(&self, used_ms: u64, packets: u64, bytes: u64) {
        self.used_ms.store(used_ms, std::sync::atomic::Ordering::SeqCst);
        let _ = self.packet_count.fetch_add(packets, std::sync::atomic::Ordering::SeqCst);
        let _ = self.byte_count.fetch_add(bytes, std::sync::atomic::Ordering::SeqCst);
    }

    fn usage(&self) -> FlowUsage {
        FlowUsage {
            used_ms: self.used_ms.load(std::sync::atomic::Ordering::SeqCst),
            packet_count: self.packet_count.load(std::sync::atomic::Ordering::SeqCst),
            byte_count: self.byte_count.load(std::sync::atomic::Ordering::SeqCst),
        }
    }
}
