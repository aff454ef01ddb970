// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The offload dispatcher: classifies each popped work item and routes it
//! to the cross-product merger or a direct hardware install, updating the
//! flow's status as it goes.

use std::sync::Arc;

use offload_classifier::{classify, ClassifierFlags, PortKindLookup};
use offload_core::{Action, DpifClass, OdpPort, OffloadStatus, SourceFlow};
use offload_merge::TnlAuxRegistry;
use offload_netdev::{FlowPutRequest, NetdevBackend, NetdevHandle, OffloadInfo, PortKind};
use offload_queue::{Dispatch, Op, WorkItem};

/// Resolves a port's kind through the same `NetdevBackend` the dispatcher
/// already has, scoped to one dpif class. The classifier only ever needs
/// this narrow capability, not the full backend surface.
struct BackendPortLookup<'a> {
    backend: &'a dyn NetdevBackend,
    dpif_class: DpifClass,
}

impl PortKindLookup for BackendPortLookup<'_> {
    fn port_kind(&self, port: OdpPort) -> Option<PortKind> {
        let netdev = self.backend.port_netdev(self.dpif_class, port)?;
        Some(self.backend.port_kind(&netdev))
    }
}

/// The `offload-queue::Dispatch` implementation the engine registers with
/// its `OffloadQueue`. Owns no flow state of its own: everything it needs
/// (the tunnel-port registry, the hardware backend) is shared with
/// `OffloadCtx` via `Arc`.
pub(crate) struct Dispatcher {
    pub(crate) tnlaux_registry: Arc<TnlAuxRegistry>,
    pub(crate) backend: Arc<dyn NetdevBackend>,
}

impl Dispatch for Dispatcher {
    fn dispatch(&self, item: WorkItem) {
        let WorkItem {
            dpif_class,
            flow,
            op,
            new_actions,
            old_actions,
            was_offloaded,
        } = item;

        if flow.is_dead() {
            tracing::debug!(ufid = %flow.mega_ufid(), "dispatch: flow already dead, abandoning");
            flow.set_status(OffloadStatus::None);
            return;
        }

        match op {
            Op::Del => {
                self.run_delete(&flow, dpif_class, &new_actions);
                flow.set_status(OffloadStatus::None);
            }
            Op::Add => self.dispatch_add_or_mod(&flow, dpif_class, &new_actions, None, was_offloaded),
            Op::Mod => self.dispatch_add_or_mod(
                &flow,
                dpif_class,
                &new_actions,
                old_actions.as_deref(),
                was_offloaded,
            ),
        }
    }
}

impl Dispatcher {
    /// Run for both `Add` and `Mod` (a `Mod` first tears down whatever
    /// binding `old_actions` implies, then falls through to the same
    /// "offload the new actions" logic as an `Add`).
    fn dispatch_add_or_mod(
        &self,
        flow: &Arc<dyn SourceFlow>,
        dpif_class: DpifClass,
        new_actions: &[Action],
        old_actions: Option<&[Action]>,
        was_offloaded: bool,
    ) {
        let ufid = flow.mega_ufid();

        let Some(netdev) = self.backend.port_netdev(dpif_class, flow.in_port()) else {
            tracing::warn!(%ufid, port = %flow.in_port(), "dispatch: ingress port not found");
            flow.set_status(OffloadStatus::Failed);
            return;
        };
        let ingress_kind = self.backend.port_kind(&netdev);

        let lookup = BackendPortLookup {
            backend: self.backend.as_ref(),
            dpif_class,
        };
        let classified = classify(new_actions, &ingress_kind, &lookup);

        if !classified.offloadable {
            tracing::warn!(
                %ufid,
                reason = classified.reason.as_deref().unwrap_or("unknown"),
                "dispatch: action list not offloadable"
            );
            if old_actions.is_some() && was_offloaded {
                // Previously offloaded, now rejected by a modification:
                // clean up the stale hardware entry before failing.
                self.run_delete(flow, dpif_class, old_actions.unwrap_or(&[]));
            }
            flow.set_status(OffloadStatus::Failed);
            return;
        }

        if let Some(old) = old_actions {
            // Mod: the old binding (whichever path it took) is stale the
            // moment new_actions differ; tear it down unconditionally
            // before retrying as if this were a fresh Add.
            self.run_delete(flow, dpif_class, old);
        }

        let flags: ClassifierFlags = classified.flags.clone();

        if let Some(target) = top_level_tunnel_pop(new_actions) {
            let tnlaux = self.tnlaux_registry.get_or_create(target);
            match offload_merge::add_ingress(
                &tnlaux,
                self.backend.as_ref(),
                Arc::clone(flow),
                netdev,
                flags,
                dpif_class,
            ) {
                Ok(status) => flow.set_status(status),
                Err(e) => {
                    tracing::warn!(%ufid, error = %e, "dispatch: add_ingress failed");
                    flow.set_status(OffloadStatus::Failed);
                }
            }
            return;
        }

        if ingress_kind.is_tunnel_vport() && flow.flow_match().has_tunnel_match() {
            let tnlaux = self.tnlaux_registry.get_or_create(flow.in_port());
            match offload_merge::add_inner(
                &tnlaux,
                self.backend.as_ref(),
                Arc::clone(flow),
                flags,
                dpif_class,
            ) {
                Ok(status) => flow.set_status(status),
                Err(e) => {
                    tracing::warn!(%ufid, error = %e, "dispatch: add_inner failed");
                    flow.set_status(OffloadStatus::Failed);
                }
            }
            return;
        }

        self.direct_install(flow, dpif_class, &netdev, new_actions, &classified.flags);
    }

    /// No merging applies: install the flow directly on its own ingress
    /// netdev keyed by its own mega-UFID.
    fn direct_install(
        &self,
        flow: &Arc<dyn SourceFlow>,
        dpif_class: DpifClass,
        netdev: &NetdevHandle,
        actions: &[Action],
        flags: &ClassifierFlags,
    ) {
        let ufid = flow.mega_ufid();
        let flow_match = flow.flow_match();
        let info = OffloadInfo {
            action_flags: flags.action_flags,
            vxlan_decap: flags.vxlan_decap,
            vlan_push: flags.vlan_push,
            drop: flags.drop,
            mark_set: false,
            tp_dst_port: flow_match.tp_dst_port,
            tun_dl_dst: flow_match.eth_dst,
            tun_dst: flow_match.ip_dst,
            dpif_class,
            version: flow.version(),
        };
        let result = self.backend.flow_put(
            netdev,
            FlowPutRequest {
                flow_match: &flow_match,
                actions,
                ufid,
                info: &info,
            },
        );
        match result {
            Ok(outcome) if outcome.actions_offloaded => flow.set_status(OffloadStatus::Full),
            Ok(_) => flow.set_status(OffloadStatus::Mask),
            Err(e) => {
                tracing::warn!(%ufid, error = %e, "dispatch: direct flow_put rejected");
                flow.set_status(OffloadStatus::Failed);
            }
        }
    }

    /// Runs whichever delete path `actions` implies: ingress-pop, inner
    /// match, or a direct delete. A resource already gone (unknown port,
    /// no `TnlAux`, flow not present) is treated as already clean rather
    /// than an error.
    fn run_delete(&self, flow: &Arc<dyn SourceFlow>, dpif_class: DpifClass, actions: &[Action]) {
        let ufid = flow.mega_ufid();

        if let Some(target) = top_level_tunnel_pop(actions) {
            if let Some(tnlaux) = self.tnlaux_registry.get(target) {
                offload_merge::delete_ingress(&tnlaux, self.backend.as_ref(), flow);
            }
            return;
        }

        let flow_match = flow.flow_match();
        if flow_match.has_tunnel_match() {
            if let Some(tnlaux) = self.tnlaux_registry.get(flow.in_port()) {
                offload_merge::delete_inner(&tnlaux, self.backend.as_ref(), flow);
            }
            return;
        }

        let Some(netdev) = self.backend.port_netdev(dpif_class, flow.in_port()) else {
            tracing::debug!(%ufid, "delete: ingress port already gone, nothing to clean up");
            return;
        };
        if let Err(e) = self.backend.flow_del(&netdev, ufid) {
            tracing::debug!(%ufid, error = %e, "delete: direct flow_del found nothing installed");
        }
    }
}

/// Scans the top level of an action list for `TUNNEL_POP`, returning its
/// target port. Only the top level matters: the cross-product merge is
/// only ever rooted at a flow whose own action list is exactly this
/// shape, not one reached by descending into a `CLONE`.
fn top_level_tunnel_pop(actions: &[Action]) -> Option<OdpPort> {
    actions.iter().find_map(|action| match action {
        Action::TunnelPop(port) => Some(*port),
        _ => None,
    })
}
