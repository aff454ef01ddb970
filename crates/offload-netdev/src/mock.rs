// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! An in-memory [`NetdevBackend`] used by every crate's test suite, and by
//! the CLI demo binary. Lets tests register ports, inject hardware
//! rejections for specific keys, and assert on what ended up installed —
//! the properties in `spec.md` §8 are stated in terms of "a hardware entry
//! exists", which this mock makes directly observable.

use std::collections::HashSet;

use indexmap::IndexMap;
use offload_core::{Action, DpifClass, FlowMatch, MegaUfid, OdpPort};
use parking_lot::Mutex;

use crate::{
    FlowPutOutcome, FlowPutRequest, FlowStats, NetdevBackend, NetdevError, NetdevHandle, PortKind,
};

#[derive(Debug, Clone)]
struct InstalledFlow {
    #[allow(dead_code)]
    flow_match: FlowMatch,
    #[allow(dead_code)]
    actions: Vec<Action>,
    stats: FlowStats,
}

#[derive(Default)]
struct Inner {
    ports: IndexMap<(DpifClass, OdpPort), (NetdevHandle, PortKind)>,
    installed: IndexMap<(NetdevHandle, MegaUfid), InstalledFlow>,
    reject_keys: HashSet<(NetdevHandle, MegaUfid)>,
    put_calls: Vec<(NetdevHandle, MegaUfid)>,
    del_calls: Vec<(NetdevHandle, MegaUfid)>,
}

/// An in-memory netdev backend for tests: ports and installed flows are
/// plain maps guarded by a single lock, and specific (netdev, ufid) keys
/// can be configured to fail `flow_put` so rollback paths are exercisable.
#[derive(Default)]
pub struct MockNetdevBackend {
    inner: Mutex<Inner>,
}

impl MockNetdevBackend {
    /// Creates an empty backend with no registered ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a port under a dpif class, with the given netdev name and
    /// kind.
    pub fn register_port(
        &self,
        dpif_class: DpifClass,
        port: OdpPort,
        name: impl Into<std::sync::Arc<str>>,
        kind: PortKind,
    ) -> NetdevHandle {
        let handle = NetdevHandle::new(name);
        let mut inner = self.inner.lock();
        let _ = inner
            .ports
            .insert((dpif_class, port), (handle.clone(), kind));
        handle
    }

    /// Configures `flow_put` to reject installs keyed by `ufid` on
    /// `netdev`, until [`MockNetdevBackend::allow`] is called for the same
    /// key.
    pub fn reject(&self, netdev: &NetdevHandle, ufid: MegaUfid) {
        let _ = self
            .inner
            .lock()
            .reject_keys
            .insert((netdev.clone(), ufid));
    }

    /// Clears a previously configured rejection.
    pub fn allow(&self, netdev: &NetdevHandle, ufid: MegaUfid) {
        let _ = self.inner.lock().reject_keys.remove(&(netdev.clone(), ufid));
    }

    /// True if an entry keyed by `ufid` is currently installed on
    /// `netdev`.
    #[must_use]
    pub fn is_installed(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> bool {
        self.inner.lock().installed.contains_key(&(netdev.clone(), ufid))
    }

    /// Total number of entries currently installed across all netdevs.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.inner.lock().installed.len()
    }

    /// Overrides the counters a subsequent `flow_get` will return for a
    /// key, simulating hardware having matched traffic.
    pub fn set_stats(&self, netdev: &NetdevHandle, ufid: MegaUfid, stats: FlowStats) {
        if let Some(entry) = self.inner.lock().installed.get_mut(&(netdev.clone(), ufid)) {
            entry.stats = stats;
        }
    }

    /// Number of times `flow_put` was called for this key (install
    /// attempts, including ones that were later rolled back).
    #[must_use]
    pub fn put_call_count(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> usize {
        self.inner
            .lock()
            .put_calls
            .iter()
            .filter(|(n, u)| n == netdev && *u == ufid)
            .count()
    }

    /// Number of times `flow_del` was called for this key.
    #[must_use]
    pub fn del_call_count(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> usize {
        self.inner
            .lock()
            .del_calls
            .iter()
            .filter(|(n, u)| n == netdev && *u == ufid)
            .count()
    }
}

impl NetdevBackend for MockNetdevBackend {
    fn port_netdev(&self, dpif_class: DpifClass, port: OdpPort) -> Option<NetdevHandle> {
        self.inner
            .lock()
            .ports
            .get(&(dpif_class, port))
            .map(|(handle, _)| handle.clone())
    }

    fn port_kind(&self, netdev: &NetdevHandle) -> PortKind {
        self.inner
            .lock()
            .ports
            .values()
            .find(|(handle, _)| handle == netdev)
            .map(|(_, kind)| kind.clone())
            .unwrap_or(PortKind::Physical)
    }

    fn flow_put(
        &self,
        netdev: &NetdevHandle,
        req: FlowPutRequest<'_>,
    ) -> Result<FlowPutOutcome, NetdevError> {
        let mut inner = self.inner.lock();
        let key = (netdev.clone(), req.ufid);
        inner.put_calls.push(key.clone());
        if inner.reject_keys.contains(&key) {
            return Err(NetdevError::Rejected(format!(
                "mock configured to reject {} on {netdev}",
                req.ufid
            )));
        }
        let _ = inner.installed.insert(
            key,
            InstalledFlow {
                flow_match: req.flow_match.clone(),
                actions: req.actions.to_vec(),
                stats: FlowStats::default(),
            },
        );
        Ok(FlowPutOutcome {
            actions_offloaded: true,
        })
    }

    fn flow_del(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> Result<(), NetdevError> {
        let mut inner = self.inner.lock();
        inner.del_calls.push((netdev.clone(), ufid));
        match inner.installed.shift_remove(&(netdev.clone(), ufid)) {
            Some(_) => Ok(()),
            None => Err(NetdevError::NotFound),
        }
    }

    fn flow_get(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> Result<FlowStats, NetdevError> {
        self.inner
            .lock()
            .installed
            .get(&(netdev.clone(), ufid))
            .map(|entry| entry.stats)
            .ok_or(NetdevError::NotFound)
    }
}
