// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Maps a tunnel virtual port to its [`TnlAux`], owning the container's
//! creation and teardown.

use std::sync::Arc;

use indexmap::IndexMap;
use offload_core::OdpPort;
use parking_lot::RwLock;

use crate::tnlaux::TnlAux;

/// Per-engine registry of tunnel virtual ports to their auxiliary merge
/// state. A port's `TnlAux` is created lazily on first use and torn down
/// explicitly when the port itself disappears.
#[derive(Default)]
pub struct TnlAuxRegistry {
    ports: RwLock<IndexMap<OdpPort, Arc<TnlAux>>>,
}

impl TnlAuxRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `TnlAux` for `port`, creating one if this is the first
    /// reference to it.
    #[must_use]
    pub fn get_or_create(&self, port: OdpPort) -> Arc<TnlAux> {
        if let Some(existing) = self.ports.read().get(&port) {
            return existing.clone();
        }
        self.ports
            .write()
            .entry(port)
            .or_insert_with(|| Arc::new(TnlAux::new()))
            .clone()
    }

    /// Returns the `TnlAux` for `port` if one has already been created.
    #[must_use]
    pub fn get(&self, port: OdpPort) -> Option<Arc<TnlAux>> {
        self.ports.read().get(&port).cloned()
    }

    /// Tears down the tunnel port: flushes its `TnlAux` (no hardware
    /// deletes issued; the port disappearing is assumed to take the
    /// hardware state with it) and drops the registry's reference.
    pub fn teardown(&self, port: OdpPort) {
        if let Some(tnlaux) = self.ports.write().shift_remove(&port) {
            tnlaux.flush();
        }
    }

    /// The set of ports currently registered.
    #[must_use]
    pub fn ports(&self) -> Vec<OdpPort> {
        self.ports.read().keys().copied().collect()
    }
}
