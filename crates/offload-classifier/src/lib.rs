// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The action classifier (`spec.md` §4.2): decides whether an action list
//! is offloadable and extracts the flags the hardware backend needs.
//!
//! This is a pure function over an action list plus a port-kind lookup; it
//! holds no state of its own and never touches the network or a lock.

use offload_core::{Action, ActionFlags};
use offload_netdev::PortKind;

/// Narrow capability the classifier needs from the netdev backend: given a
/// datapath port number, what kind of port is it. Implemented for the real
/// backend by an adapter in `offload-engine`; implemented directly by
/// `offload_netdev::mock::MockNetdevBackend` via [`NetdevLookup`] in tests.
pub trait PortKindLookup {
    /// Returns the port's kind, or `None` if the port could not be
    /// resolved (treated by the classifier as "unknown, assume not tap").
    fn port_kind(&self, port: offload_core::OdpPort) -> Option<PortKind>;
}

/// Classifier-extracted summary of an action list (`spec.md` §6's
/// `OffloadInfo`, minus the merge-derived fields `tp_dst_port` /
/// `tun_dl_dst` / `tun_dst` / `mark_set`, which only the merger knows how
/// to populate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierFlags {
    /// Summary of which action kinds were present.
    pub action_flags: ActionFlags,
    /// Ingress port (or a descended `TUNNEL_POP` target) is a tunnel
    /// vport.
    pub vxlan_decap: bool,
    /// A `PUSH_VLAN` action was present.
    pub vlan_push: bool,
    /// No output-like fate action was present; still offloadable, as an
    /// in-hardware drop.
    pub drop: bool,
}

/// Outcome of classifying an action list.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    /// Whether the action list can be offloaded at all.
    pub offloadable: bool,
    /// The extracted flags (always populated, even when `offloadable` is
    /// false, for logging).
    pub flags: ClassifierFlags,
    /// Present when `offloadable` is false: why.
    pub reason: Option<String>,
}

struct Accumulator {
    flags: ActionFlags,
    has_fate_action: bool,
    vlan_push: bool,
    vxlan_decap: bool,
}

/// Classifies an action list arriving on `ingress_port`.
///
/// `lookup` resolves the kind of any port named by `OUTPUT` or
/// `TUNNEL_POP` (including `ingress_port` itself, passed in as
/// `ingress_port_kind` so callers that already know it don't pay for a
/// redundant lookup).
#[must_use]
pub fn classify(
    actions: &[Action],
    ingress_port_kind: &PortKind,
    lookup: &dyn PortKindLookup,
) -> ClassifyResult {
    let mut acc = Accumulator {
        flags: ActionFlags::empty(),
        has_fate_action: false,
        vlan_push: false,
        vxlan_decap: ingress_port_kind.is_tunnel_vport(),
    };

    let outcome = classify_list(actions, 0, lookup, &mut acc);

    if !acc.has_fate_action {
        acc.flags |= ActionFlags::DROP;
    }

    let flags = ClassifierFlags {
        action_flags: acc.flags,
        vxlan_decap: acc.vxlan_decap,
        vlan_push: acc.vlan_push,
        drop: !acc.has_fate_action,
    };

    match outcome {
        Ok(()) => ClassifyResult {
            offloadable: true,
            flags,
            reason: None,
        },
        Err(reason) => {
            tracing::debug!(%reason, "classifier: action list not offloadable");
            ClassifyResult {
                offloadable: false,
                flags,
                reason: Some(reason),
            }
        }
    }
}

/// Walks one level of an action list, descending into at most one level of
/// `CLONE` nesting (`spec.md` §4.2, §9: "Clone-action descent is
/// single-level by design").
fn classify_list(
    actions: &[Action],
    depth: u8,
    lookup: &dyn PortKindLookup,
    acc: &mut Accumulator,
) -> Result<(), String> {
    let last_index = actions.len().wrapping_sub(1);
    for (index, action) in actions.iter().enumerate() {
        match action {
            Action::Output(port) => {
                acc.flags |= ActionFlags::OUTPUT;
                acc.has_fate_action = true;
                if matches!(lookup.port_kind(*port), Some(PortKind::Tap)) {
                    return Err(format!("OUTPUT to tap port {port}"));
                }
            }
            Action::TunnelPop(port) => {
                acc.flags |= ActionFlags::TUNNEL_POP | ActionFlags::OUTPUT;
                acc.has_fate_action = true;
                if lookup
                    .port_kind(*port)
                    .is_some_and(|kind| kind.is_tunnel_vport())
                {
                    acc.vxlan_decap = true;
                }
            }
            Action::PushVlan => {
                acc.flags |= ActionFlags::PUSH_VLAN;
                acc.vlan_push = true;
            }
            Action::Clone(nested) => {
                acc.flags |= ActionFlags::CLONE;
                if depth > 0 {
                    return Err("CLONE nested more than one level deep".to_string());
                }
                // A CLONE must be the last action in its containing list:
                // the original implementation only descends into it when
                // no attribute bytes remain after it (`left <=
                // NLA_ALIGN(a->nla_len)` in `offload_check_action`); a
                // CLONE followed by further actions makes the whole list
                // unoffloadable, not just the CLONE itself.
                if index != last_index {
                    return Err("CLONE is not the last action in its action list".to_string());
                }
                if !nested.is_empty() {
                    classify_list(nested, depth + 1, lookup, acc)?;
                }
            }
            Action::Other(name) => {
                tracing::warn!(action = %name, "classifier: unrecognized action treated as opaque");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::OdpPort;

    struct StaticLookup(std::collections::HashMap<OdpPort, PortKind>);

    impl PortKindLookup for StaticLookup {
        fn port_kind(&self, port: OdpPort) -> Option<PortKind> {
            self.0.get(&port).cloned()
        }
    }

    #[test]
    fn output_to_physical_port_is_offloadable() {
        let lookup = StaticLookup(
            [(OdpPort(2), PortKind::Physical)].into_iter().collect(),
        );
        let result = classify(&[Action::Output(OdpPort(2))], &PortKind::Physical, &lookup);
        assert!(result.offloadable);
        assert!(!result.flags.drop);
        assert!(result.flags.action_flags.contains(ActionFlags::OUTPUT));
    }

    #[test]
    fn output_to_tap_is_rejected() {
        let lookup = StaticLookup([(OdpPort(2), PortKind::Tap)].into_iter().collect());
        let result = classify(&[Action::Output(OdpPort(2))], &PortKind::Physical, &lookup);
        assert!(!result.offloadable);
        assert!(result.reason.unwrap().contains("tap"));
    }

    #[test]
    fn empty_action_list_is_offloadable_drop() {
        let lookup = StaticLookup(Default::default());
        let result = classify(&[], &PortKind::Physical, &lookup);
        assert!(result.offloadable);
        assert!(result.flags.drop);
    }

    #[test]
    fn tunnel_pop_to_vxlan_sets_vxlan_decap() {
        let lookup = StaticLookup([(OdpPort(5), PortKind::Vxlan)].into_iter().collect());
        let result = classify(&[Action::TunnelPop(OdpPort(5))], &PortKind::Physical, &lookup);
        assert!(result.offloadable);
        assert!(result.flags.vxlan_decap);
        assert!(!result.flags.drop);
    }

    #[test]
    fn single_level_clone_descent_is_offloadable() {
        let lookup = StaticLookup(
            [(OdpPort(2), PortKind::Physical)].into_iter().collect(),
        );
        let result = classify(
            &[Action::Clone(vec![Action::Output(OdpPort(2))])],
            &PortKind::Physical,
            &lookup,
        );
        assert!(result.offloadable);
        assert!(result.flags.action_flags.contains(ActionFlags::CLONE));
        assert!(result.flags.action_flags.contains(ActionFlags::OUTPUT));
    }

    #[test]
    fn doubly_nested_clone_is_rejected() {
        let lookup = StaticLookup(Default::default());
        let result = classify(
            &[Action::Clone(vec![Action::Clone(vec![Action::PushVlan])])],
            &PortKind::Physical,
            &lookup,
        );
        assert!(!result.offloadable);
    }

    #[test]
    fn clone_followed_by_trailing_action_is_rejected() {
        let lookup = StaticLookup(
            [(OdpPort(2), PortKind::Physical)].into_iter().collect(),
        );
        let result = classify(
            &[
                Action::Clone(vec![Action::Output(OdpPort(2))]),
                Action::Output(OdpPort(2)),
            ],
            &PortKind::Physical,
            &lookup,
        );
        assert!(!result.offloadable);
    }

    #[test]
    fn ingress_on_vxlan_port_sets_vxlan_decap_even_without_tunnel_pop() {
        let lookup = StaticLookup(Default::default());
        let result = classify(&[Action::PushVlan], &PortKind::Vxlan, &lookup);
        assert!(result.flags.vxlan_decap);
    }
}
