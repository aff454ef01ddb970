// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The stats aggregator: on each periodic probe, sums the hardware
//! counters for whichever merged pairs (or direct install) back a flow,
//! and records the total on the flow itself.

use std::sync::Arc;

use offload_core::{Action, DpifClass, SourceFlow};
use offload_merge::TnlAuxRegistry;
use offload_netdev::NetdevBackend;

/// Reads back hardware counters for `flow` and records them if any packets
/// were observed.
///
/// Tries, in order: the ingress-side cross product (if `flow`'s actions
/// pop a tunnel), the inner-side cross product (if `flow`'s match pins a
/// tunnel destination and it ingresses on a tunnel vport), and finally a
/// direct `flow_get` keyed by the flow's own mega-UFID. A flow that was
/// never offloaded (no tnlaux entry, no direct install) simply sees no
/// counters added this probe.
pub(crate) fn offload_used(
    tnlaux_registry: &TnlAuxRegistry,
    backend: &dyn NetdevBackend,
    dpif_class: DpifClass,
    flow: &Arc<dyn SourceFlow>,
    now_ms: u64,
) {
    let actions = flow.actions();
    let ufid = flow.mega_ufid();

    let aggregated = if let Some(target) = top_level_tunnel_pop(&actions) {
        tnlaux_registry
            .get(target)
            .and_then(|tnlaux| offload_merge::aggregate_ingress_stats(&tnlaux, backend, ufid))
    } else if flow.flow_match().has_tunnel_match() {
        tnlaux_registry
            .get(flow.in_port())
            .and_then(|tnlaux| offload_merge::aggregate_inner_stats(&tnlaux, backend, ufid))
    } else {
        None
    };

    let stats = match aggregated {
        Some(stats) => Some(stats),
        None => backend
            .port_netdev(dpif_class, flow.in_port())
            .and_then(|netdev| backend.flow_get(&netdev, ufid).ok()),
    };

    if let Some(stats) = stats {
        if stats.n_packets > 0 {
            flow.record_usage(now_ms, stats.n_packets, stats.n_bytes);
        }
    }
}

fn top_level_tunnel_pop(actions: &[Action]) -> Option<offload_core::OdpPort> {
    actions.iter().find_map(|action| match action {
        Action::TunnelPop(port) => Some(*port),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::testing::TestFlow;
    use offload_core::{FlowMatch, MegaUfid, OdpPort};
    use offload_netdev::mock::MockNetdevBackend;
    use offload_netdev::{FlowStats, PortKind};

    /// A directly installed flow (no tunnel involved) accumulates usage
    /// from a plain `flow_get`.
    #[test]
    fn direct_flow_accumulates_usage_from_flow_get() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let registry = TnlAuxRegistry::new();

        let flow: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(1),
            OdpPort(1),
            vec![Action::Output(OdpPort(2))],
            FlowMatch::default(),
        ));
        let info = offload_netdev::OffloadInfo::default();
        let flow_match = FlowMatch::default();
        backend
            .flow_put(
                &netdev,
                offload_netdev::FlowPutRequest {
                    flow_match: &flow_match,
                    actions: &[],
                    ufid: flow.mega_ufid(),
                    info: &info,
                },
            )
            .expect("install");
        backend.set_stats(
            &netdev,
            flow.mega_ufid(),
            FlowStats {
                n_packets: 10,
                n_bytes: 1000,
            },
        );

        offload_used(&registry, &backend, DpifClass(0), &flow, 42);

        let usage = flow.usage();
        assert_eq!(usage.packet_count, 10);
        assert_eq!(usage.byte_count, 1000);
        assert_eq!(usage.used_ms, 42);
    }

    /// Zero packets observed leaves the flow's usage untouched (no spurious
    /// `used_ms` bump for idle flows).
    #[test]
    fn zero_packets_does_not_record_usage() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let registry = TnlAuxRegistry::new();

        let flow: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(1),
            OdpPort(1),
            Vec::new(),
            FlowMatch::default(),
        ));
        let info = offload_netdev::OffloadInfo::default();
        let flow_match = FlowMatch::default();
        backend
            .flow_put(
                &netdev,
                offload_netdev::FlowPutRequest {
                    flow_match: &flow_match,
                    actions: &[],
                    ufid: flow.mega_ufid(),
                    info: &info,
                },
            )
            .expect("install");

        offload_used(&registry, &backend, DpifClass(0), &flow, 42);

        assert_eq!(flow.usage().used_ms, 0);
    }
}
