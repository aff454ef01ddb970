// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The per-tunnel-port auxiliary state: a pair of mega-UFID-keyed maps
//! guarded by a single reader-writer lock.

use std::sync::Arc;

use indexmap::IndexMap;
use offload_classifier::ClassifierFlags;
use offload_core::{MegaUfid, MergedUfid, SourceFlow};
use offload_netdev::NetdevHandle;
use parking_lot::RwLock;

/// Transient outcome of one merge attempt against a counterpart, tracked
/// only for the duration of an add-ingress or add-inner call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// Not yet attempted in the current merge pass.
    None,
    /// `install_pair` succeeded for this counterpart during the current
    /// pass.
    Full,
    /// `install_pair` failed for this counterpart during the current pass.
    Failed,
}

/// A physical flow that terminates in `TUNNEL_POP`, stored in
/// `TnlAux.ingress`.
#[derive(Debug)]
pub struct IngressFlow {
    /// The flow this record mirrors.
    pub source: Arc<dyn SourceFlow>,
    /// The physical netdev the encapsulated packet arrives on; merged pairs
    /// are installed here.
    pub netdev: NetdevHandle,
    /// Classifier-extracted flags, captured at add time.
    pub flags: ClassifierFlags,
    /// Scratch field used only while `add_inner` is rolling a merge pass
    /// over every `IngressFlow` in the map; otherwise left at `None`.
    pub(crate) merge_status: MergeStatus,
}

/// A logical flow whose match is evaluated on the decapsulated packet,
/// stored in `TnlAux.inner`.
#[derive(Debug)]
pub struct InnerFlow {
    /// The flow this record mirrors.
    pub source: Arc<dyn SourceFlow>,
    /// Classifier-extracted flags, captured at add time.
    pub flags: ClassifierFlags,
    /// Number of `IngressFlow`s currently merged with this flow in the
    /// `Full` state.
    pub ref_count: u32,
    /// Scratch field used only while `add_ingress` is rolling a merge pass
    /// over every `InnerFlow` in the map; otherwise left at `None`.
    pub(crate) merge_status: MergeStatus,
}

#[derive(Default)]
pub(crate) struct TnlAuxState {
    pub(crate) ingress: IndexMap<MegaUfid, IngressFlow>,
    pub(crate) inner: IndexMap<MegaUfid, InnerFlow>,
}

/// Per-tunnel-virtual-port container pairing an ingress-flow map with an
/// inner-flow map under one lock.
///
/// Owned by the tunnel port's lifecycle: created when the port appears,
/// flushed (not drained through hardware deletes) when the port is torn
/// down, via [`crate::registry::TnlAuxRegistry::teardown`].
#[derive(Default)]
pub struct TnlAux {
    pub(crate) state: RwLock<TnlAuxState>,
}

impl TnlAux {
    /// Creates an empty tunnel auxiliary container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ingress flows currently tracked.
    #[must_use]
    pub fn ingress_len(&self) -> usize {
        self.state.read().ingress.len()
    }

    /// Number of inner flows currently tracked.
    #[must_use]
    pub fn inner_len(&self) -> usize {
        self.state.read().inner.len()
    }

    /// The ref_count of an inner flow, or `None` if it is not present.
    #[must_use]
    pub fn inner_ref_count(&self, ufid: MegaUfid) -> Option<u32> {
        self.state.read().inner.get(&ufid).map(|inner| inner.ref_count)
    }

    /// True if an ingress flow with this UFID is present.
    #[must_use]
    pub fn has_ingress(&self, ufid: MegaUfid) -> bool {
        self.state.read().ingress.contains_key(&ufid)
    }

    /// True if an inner flow with this UFID is present.
    #[must_use]
    pub fn has_inner(&self, ufid: MegaUfid) -> bool {
        self.state.read().inner.contains_key(&ufid)
    }

    /// Frees every entry without issuing hardware deletes. Used only when
    /// the parent tunnel port is being destroyed, at which point hardware
    /// state is assumed gone with it.
    pub fn flush(&self) {
        let mut state = self.state.write();
        state.ingress.clear();
        state.inner.clear();
    }

    /// A point-in-time snapshot of every ingress flow, every inner flow,
    /// and the full (ingress, inner) cross product of merged UFIDs, for
    /// the diagnostic dump endpoint.
    #[must_use]
    pub fn dump(&self) -> TnlAuxDump {
        let state = self.state.read();
        let ingress: Vec<IngressDumpEntry> = state
            .ingress
            .values()
            .map(|flow| IngressDumpEntry {
                ufid: flow.source.mega_ufid(),
                netdev: flow.netdev.to_string(),
            })
            .collect();
        let inner: Vec<InnerDumpEntry> = state
            .inner
            .values()
            .map(|flow| InnerDumpEntry {
                ufid: flow.source.mega_ufid(),
                ref_count: flow.ref_count,
            })
            .collect();
        let mut merged = Vec::with_capacity(ingress.len() * inner.len());
        for i in &ingress {
            for j in &inner {
                merged.push(i.ufid.merge(j.ufid));
            }
        }
        TnlAuxDump {
            ingress,
            inner,
            merged,
        }
    }
}

/// One ingress flow as reported by [`TnlAux::dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressDumpEntry {
    /// The flow's mega-UFID.
    pub ufid: MegaUfid,
    /// The netdev it ingresses on.
    pub netdev: String,
}

/// One inner flow as reported by [`TnlAux::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerDumpEntry {
    /// The flow's mega-UFID.
    pub ufid: MegaUfid,
    /// Number of ingress flows currently merged `Full` with it.
    pub ref_count: u32,
}

/// Snapshot returned by [`TnlAux::dump`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TnlAuxDump {
    /// Every registered ingress flow.
    pub ingress: Vec<IngressDumpEntry>,
    /// Every registered inner flow.
    pub inner: Vec<InnerDumpEntry>,
    /// The full (ingress, inner) cross product of merged UFIDs, whether or
    /// not every pair is currently installed in hardware.
    pub merged: Vec<MergedUfid>,
}
