// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Add/delete operations on a `TnlAux`'s cross product, and their rollback
//! protocol.
//!
//! Every mutating operation here holds the `TnlAux`'s write lock for its
//! entire duration, including the blocking hardware calls — the engine's
//! single-worker-thread model means nothing else ever contends for it, so
//! there is no latency benefit to narrowing the critical section, and doing
//! so would let a partially-applied merge pass become observable to a
//! concurrent dump or stats read.

use std::sync::Arc;

use offload_classifier::ClassifierFlags;
use offload_core::{DpifClass, MegaUfid, OffloadError, OffloadStatus, SourceFlow};
use offload_netdev::{FlowPutRequest, NetdevBackend, NetdevHandle, OffloadInfo};

use crate::tnlaux::{IngressFlow, InnerFlow, MergeStatus, TnlAux};

/// Installs the hardware entry for one (ingress, inner) pair, keyed by
/// `mega(I) XOR mega(J)`, on the ingress flow's netdev.
fn install_pair(
    backend: &dyn NetdevBackend,
    ingress: &IngressFlow,
    inner: &InnerFlow,
    dpif_class: DpifClass,
) -> Result<(), OffloadError> {
    let merged: MegaUfid = ingress
        .source
        .mega_ufid()
        .merge(inner.source.mega_ufid())
        .into();
    let ingress_match = ingress.source.flow_match();
    let inner_match = inner.source.flow_match().without_tunnel_metadata();
    let inner_actions = inner.source.actions();

    let info = OffloadInfo {
        action_flags: ingress.flags.action_flags | inner.flags.action_flags,
        vxlan_decap: ingress.flags.vxlan_decap || inner.flags.vxlan_decap,
        vlan_push: ingress.flags.vlan_push || inner.flags.vlan_push,
        drop: inner.flags.drop,
        mark_set: false,
        tp_dst_port: ingress_match.tp_dst_port,
        tun_dl_dst: ingress_match.eth_dst,
        tun_dst: ingress_match.ip_dst,
        dpif_class,
        version: inner.source.version(),
    };

    backend
        .flow_put(
            &ingress.netdev,
            FlowPutRequest {
                flow_match: &inner_match,
                actions: &inner_actions,
                ufid: merged,
                info: &info,
            },
        )
        .map(|_| ())
        .map_err(|e| OffloadError::HardwareRejected {
            operation: "put",
            ufid: merged,
            port: ingress.source.in_port(),
            details: e.to_string(),
        })
}

/// Removes the hardware entry for one (ingress, inner) pair.
fn install_pair_del(backend: &dyn NetdevBackend, ingress: &IngressFlow, inner: &InnerFlow) {
    let merged: MegaUfid = ingress
        .source
        .mega_ufid()
        .merge(inner.source.mega_ufid())
        .into();
    install_pair_del_keyed(backend, &ingress.netdev, merged);
}

/// Removes a previously installed merged entry given its netdev and key
/// directly, for call sites where the `IngressFlow`/`InnerFlow` records
/// cannot both be borrowed at once (e.g. deleting across two maps in the
/// same `TnlAuxState`).
fn install_pair_del_keyed(backend: &dyn NetdevBackend, netdev: &NetdevHandle, merged: MegaUfid) {
    if let Err(e) = backend.flow_del(netdev, merged) {
        tracing::warn!(ufid = %merged, netdev = %netdev, error = %e, "install_pair_del: hardware delete failed");
    }
}

/// Installs a validation probe: the ingress match alone, no actions,
/// `mark_set = true`. Deletes it immediately on success. Returns whether
/// the probe succeeded.
fn validate_ingress_probe(
    backend: &dyn NetdevBackend,
    netdev: &NetdevHandle,
    ufid: MegaUfid,
    probe_match: &offload_core::FlowMatch,
) -> bool {
    let info = OffloadInfo {
        mark_set: true,
        ..OffloadInfo::default()
    };
    let put = backend.flow_put(
        netdev,
        FlowPutRequest {
            flow_match: probe_match,
            actions: &[],
            ufid,
            info: &info,
        },
    );
    match put {
        Ok(_) => {
            if let Err(e) = backend.flow_del(netdev, ufid) {
                tracing::warn!(%ufid, netdev = %netdev, error = %e, "validation probe: delete-after-put failed");
            }
            true
        }
        Err(e) => {
            tracing::debug!(%ufid, netdev = %netdev, error = %e, "validation probe: put failed");
            false
        }
    }
}

/// Add-ingress (`spec.md` §4.4.1): registers a physical `TUNNEL_POP` flow
/// and merges it against every inner flow already present.
///
/// Rolls back entirely on any partial failure: if any counterpart's merge
/// fails, every counterpart that *did* succeed this attempt is undone and
/// the new ingress flow is not inserted.
pub fn add_ingress(
    tnlaux: &TnlAux,
    backend: &dyn NetdevBackend,
    flow: Arc<dyn SourceFlow>,
    ingress_netdev: NetdevHandle,
    flags: ClassifierFlags,
    dpif_class: DpifClass,
) -> Result<OffloadStatus, OffloadError> {
    let ufid = flow.mega_ufid();

    if tnlaux.state.read().ingress.contains_key(&ufid) {
        tracing::warn!(%ufid, "add-ingress: duplicate flow, already owned by another producer");
        return Err(OffloadError::DuplicateFlow { ufid });
    }

    let probe_match = flow.flow_match().without_tunnel_metadata();
    if !validate_ingress_probe(backend, &ingress_netdev, ufid, &probe_match) {
        return Ok(OffloadStatus::Failed);
    }

    let mut state = tnlaux.state.write();
    if state.ingress.contains_key(&ufid) {
        tracing::warn!(%ufid, "add-ingress: duplicate flow observed after validation probe");
        return Err(OffloadError::DuplicateFlow { ufid });
    }

    for inner in state.inner.values_mut() {
        inner.merge_status = MergeStatus::None;
    }

    let new_ingress = IngressFlow {
        source: flow,
        netdev: ingress_netdev,
        flags,
        merge_status: MergeStatus::None,
    };

    let mut rollback = false;
    let inner_ufids: Vec<MegaUfid> = state.inner.keys().copied().collect();
    for j_ufid in &inner_ufids {
        let outcome = match state.inner.get(j_ufid) {
            Some(inner) => install_pair(backend, &new_ingress, inner, dpif_class),
            None => continue,
        };
        match outcome {
            Ok(()) => {
                if let Some(inner) = state.inner.get_mut(j_ufid) {
                    inner.merge_status = MergeStatus::Full;
                    inner.ref_count += 1;
                }
            }
            Err(e) => {
                tracing::warn!(ufid = %j_ufid, error = %e, "add-ingress: install_pair failed, rolling back");
                if let Some(inner) = state.inner.get_mut(j_ufid) {
                    inner.merge_status = MergeStatus::Failed;
                }
                rollback = true;
                break;
            }
        }
    }

    if rollback {
        for j_ufid in &inner_ufids {
            let Some((status, ref_count)) = state
                .inner
                .get(j_ufid)
                .map(|inner| (inner.merge_status, inner.ref_count))
            else {
                continue;
            };
            match status {
                MergeStatus::Failed if ref_count == 0 => {
                    if let Some(inner) = state.inner.get(j_ufid) {
                        inner.source.set_status(OffloadStatus::Failed);
                    }
                    let _ = state.inner.shift_remove(j_ufid);
                }
                MergeStatus::Failed => {
                    tracing::warn!(
                        ufid = %j_ufid,
                        ref_count,
                        "add-ingress rollback: inner flow failed merge but ref_count > 0, leaving in place"
                    );
                }
                MergeStatus::Full => {
                    if let Some(inner) = state.inner.get(j_ufid) {
                        install_pair_del(backend, &new_ingress, inner);
                    }
                    if let Some(inner) = state.inner.get_mut(j_ufid) {
                        inner.ref_count = inner.ref_count.saturating_sub(1);
                    }
                }
                MergeStatus::None => {}
            }
        }
        return Ok(OffloadStatus::Failed);
    }

    let _ = state.ingress.insert(ufid, new_ingress);
    Ok(OffloadStatus::Full)
}

/// Add-inner (`spec.md` §4.4.2), symmetric to [`add_ingress`] with roles
/// swapped.
pub fn add_inner(
    tnlaux: &TnlAux,
    backend: &dyn NetdevBackend,
    flow: Arc<dyn SourceFlow>,
    flags: ClassifierFlags,
    dpif_class: DpifClass,
) -> Result<OffloadStatus, OffloadError> {
    let ufid = flow.mega_ufid();
    let mut state = tnlaux.state.write();

    if let Some(existing) = state.inner.get(&ufid) {
        if !Arc::ptr_eq(&existing.source, &flow) {
            tracing::warn!(%ufid, "add-inner: duplicate flow, already owned by another producer");
            return Err(OffloadError::DuplicateFlow { ufid });
        }
        // Same underlying flow reappearing: start the merge pass from a
        // clean slate rather than diffing against its previous pairs.
        let _ = state.inner.shift_remove(&ufid);
    }

    for ingress in state.ingress.values_mut() {
        ingress.merge_status = MergeStatus::None;
    }

    let mut ref_count = 0u32;
    let mut rollback = false;
    let ingress_ufids: Vec<MegaUfid> = state.ingress.keys().copied().collect();

    let new_inner = InnerFlow {
        source: flow,
        flags,
        ref_count: 0,
        merge_status: MergeStatus::None,
    };

    for i_ufid in &ingress_ufids {
        let outcome = match state.ingress.get(i_ufid) {
            Some(ingress) => install_pair(backend, ingress, &new_inner, dpif_class),
            None => continue,
        };
        match outcome {
            Ok(()) => {
                if let Some(ingress) = state.ingress.get_mut(i_ufid) {
                    ingress.merge_status = MergeStatus::Full;
                }
                ref_count += 1;
            }
            Err(e) => {
                tracing::warn!(ufid = %i_ufid, error = %e, "add-inner: install_pair failed, rolling back");
                if let Some(ingress) = state.ingress.get_mut(i_ufid) {
                    ingress.merge_status = MergeStatus::Failed;
                }
                rollback = true;
                break;
            }
        }
    }

    if rollback {
        for i_ufid in &ingress_ufids {
            let Some(status) = state.ingress.get(i_ufid).map(|ingress| ingress.merge_status)
            else {
                continue;
            };
            if status == MergeStatus::Full {
                if let Some(ingress) = state.ingress.get(i_ufid) {
                    install_pair_del(backend, ingress, &new_inner);
                }
            }
        }
        new_inner.source.set_status(OffloadStatus::Failed);
        return Ok(OffloadStatus::Failed);
    }

    let mut new_inner = new_inner;
    new_inner.ref_count = ref_count;
    let _ = state.inner.insert(ufid, new_inner);
    Ok(OffloadStatus::Full)
}

/// Delete-ingress (`spec.md` §4.4.3): removes every merged pair rooted at
/// this ingress flow, then the flow record itself.
///
/// A no-op if `flow` is not the current owner of its UFID slot (it was
/// already superseded by a later producer).
pub fn delete_ingress(tnlaux: &TnlAux, backend: &dyn NetdevBackend, flow: &Arc<dyn SourceFlow>) {
    let ufid = flow.mega_ufid();
    let mut state = tnlaux.state.write();

    let owns_slot = state
        .ingress
        .get(&ufid)
        .is_some_and(|ingress| Arc::ptr_eq(&ingress.source, flow));
    if !owns_slot {
        return;
    }

    let inner_ufids: Vec<MegaUfid> = state.inner.keys().copied().collect();
    let netdev = state
        .ingress
        .get(&ufid)
        .map(|ingress| ingress.netdev.clone())
        .expect("checked owns_slot above");
    for j_ufid in &inner_ufids {
        let merged = match state.inner.get(j_ufid) {
            Some(inner) => ufid.merge(inner.source.mega_ufid()),
            None => continue,
        };
        install_pair_del_keyed(backend, &netdev, merged.into());
    }

    if let Some(ingress) = state.ingress.get(&ufid) {
        ingress.source.set_status(OffloadStatus::None);
    }
    let _ = state.ingress.shift_remove(&ufid);
}

/// Delete-inner (`spec.md` §4.4.4), symmetric to [`delete_ingress`].
pub fn delete_inner(tnlaux: &TnlAux, backend: &dyn NetdevBackend, flow: &Arc<dyn SourceFlow>) {
    let ufid = flow.mega_ufid();
    let mut state = tnlaux.state.write();

    let owns_slot = state
        .inner
        .get(&ufid)
        .is_some_and(|inner| Arc::ptr_eq(&inner.source, flow));
    if !owns_slot {
        return;
    }

    let ingress_ufids: Vec<MegaUfid> = state.ingress.keys().copied().collect();
    for i_ufid in &ingress_ufids {
        let target = match state.ingress.get(i_ufid) {
            Some(ingress) => Some((ingress.netdev.clone(), ingress.source.mega_ufid().merge(ufid))),
            None => None,
        };
        if let Some((netdev, merged)) = target {
            install_pair_del_keyed(backend, &netdev, merged.into());
        }
    }

    if let Some(inner) = state.inner.get(&ufid) {
        inner.source.set_status(OffloadStatus::None);
    }
    let _ = state.inner.shift_remove(&ufid);
}

/// Sums hardware counters for every merged pair rooted at ingress flow
/// `ingress_ufid`, for the ingress-side stats aggregation path (`spec.md`
/// §4.6 step 1). Returns `None` if no such ingress flow is present.
#[must_use]
pub fn aggregate_ingress_stats(
    tnlaux: &TnlAux,
    backend: &dyn NetdevBackend,
    ingress_ufid: MegaUfid,
) -> Option<offload_netdev::FlowStats> {
    let state = tnlaux.state.read();
    let ingress = state.ingress.get(&ingress_ufid)?;
    let mut total = offload_netdev::FlowStats::default();
    for inner in state.inner.values() {
        let merged: MegaUfid = ingress
            .source
            .mega_ufid()
            .merge(inner.source.mega_ufid())
            .into();
        if let Ok(stats) = backend.flow_get(&ingress.netdev, merged) {
            total.n_packets += stats.n_packets;
            total.n_bytes += stats.n_bytes;
        }
    }
    Some(total)
}

/// Sums hardware counters for every merged pair rooted at inner flow
/// `inner_ufid`, for the inner-side stats aggregation path (`spec.md` §4.6
/// step 2). Returns `None` if no such inner flow is present.
#[must_use]
pub fn aggregate_inner_stats(
    tnlaux: &TnlAux,
    backend: &dyn NetdevBackend,
    inner_ufid: MegaUfid,
) -> Option<offload_netdev::FlowStats> {
    let state = tnlaux.state.read();
    let inner = state.inner.get(&inner_ufid)?;
    let mut total = offload_netdev::FlowStats::default();
    for ingress in state.ingress.values() {
        let merged: MegaUfid = ingress
            .source
            .mega_ufid()
            .merge(inner.source.mega_ufid())
            .into();
        if let Ok(stats) = backend.flow_get(&ingress.netdev, merged) {
            total.n_packets += stats.n_packets;
            total.n_bytes += stats.n_bytes;
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_classifier::ClassifierFlags;
    use offload_core::testing::TestFlow;
    use offload_core::{FlowMatch, OdpPort};
    use offload_netdev::mock::MockNetdevBackend;
    use offload_netdev::PortKind;

    fn flow(ufid: u128, in_port: u32, tunnel_dst: Option<std::net::IpAddr>) -> Arc<dyn SourceFlow> {
        let flow_match = FlowMatch {
            tunnel_dst,
            ..FlowMatch::default()
        };
        Arc::new(TestFlow::new(
            MegaUfid(ufid),
            OdpPort(in_port),
            Vec::new(),
            flow_match,
        ))
    }

    /// Scenario 3: an ingress flow added alone against an empty inner map
    /// installs nothing (the cross product is empty) but is still recorded.
    #[test]
    fn add_ingress_without_inner_installs_nothing() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();
        let a = flow(1, 1, None);

        let status = add_ingress(
            &tnlaux,
            &backend,
            a,
            netdev,
            ClassifierFlags::default(),
            DpifClass(0),
        )
        .expect("add_ingress should not error");

        assert_eq!(status, OffloadStatus::Full);
        assert_eq!(tnlaux.ingress_len(), 1);
        assert_eq!(backend.installed_count(), 0);
    }

    /// Scenario 4: add ingress A on p1, then add inner B with a tunnel
    /// match; the cross product installs exactly one merged entry on A's
    /// netdev, and B's ref_count reflects the one successful merge.
    #[test]
    fn add_ingress_then_add_inner_installs_merged_pair() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let a = flow(1, 1, None);
        let a_ufid = a.mega_ufid();
        add_ingress(&tnlaux, &backend, a, netdev.clone(), ClassifierFlags::default(), DpifClass(0))
            .expect("add_ingress");

        let b = flow(2, 5, Some("10.0.0.1".parse().unwrap()));
        let b_ufid = b.mega_ufid();
        let status = add_inner(&tnlaux, &backend, b, ClassifierFlags::default(), DpifClass(0))
            .expect("add_inner");

        assert_eq!(status, OffloadStatus::Full);
        assert_eq!(tnlaux.inner_ref_count(b_ufid), Some(1));
        assert_eq!(backend.installed_count(), 1);
        assert!(backend.is_installed(&netdev, a_ufid.merge(b_ufid).into()));
    }

    /// Scenario 5 / P7: with two preloaded inner flows where the backend
    /// rejects the second merge, `add_ingress` rolls back the first merge,
    /// leaves hardware state exactly as it was before the call, and does
    /// not insert the new ingress flow.
    #[test]
    fn add_ingress_rolls_back_on_partial_failure() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let b1 = flow(10, 5, Some("10.0.0.1".parse().unwrap()));
        let b1_ufid = b1.mega_ufid();
        add_inner(&tnlaux, &backend, b1, ClassifierFlags::default(), DpifClass(0)).expect("preload b1");

        let b2 = flow(20, 5, Some("10.0.0.2".parse().unwrap()));
        let b2_ufid = b2.mega_ufid();
        // b2 has no ingress flows yet so this just registers it with
        // ref_count 0.
        add_inner(&tnlaux, &backend, b2, ClassifierFlags::default(), DpifClass(0)).expect("preload b2");

        let a = flow(99, 1, None);
        let a_ufid = a.mega_ufid();
        backend.reject(&netdev, a_ufid.merge(b2_ufid).into());

        let pre_call_count = backend.installed_count();
        let status = add_ingress(
            &tnlaux,
            &backend,
            a,
            netdev.clone(),
            ClassifierFlags::default(),
            DpifClass(0),
        )
        .expect("add_ingress should report Failed, not error");

        assert_eq!(status, OffloadStatus::Failed);
        assert!(!tnlaux.has_ingress(a_ufid), "failed ingress must not be inserted");
        assert_eq!(
            backend.installed_count(),
            pre_call_count,
            "no net hardware entries should remain from the failed attempt"
        );
        assert!(!backend.is_installed(&netdev, a_ufid.merge(b1_ufid).into()));
        assert_eq!(tnlaux.inner_ref_count(b1_ufid), Some(0));
        // b2 had ref_count 0 going in, so rollback removes it entirely.
        assert!(!tnlaux.has_inner(b2_ufid));
    }

    /// P7 continued: when the inner flow that failed merge already had a
    /// nonzero ref_count from other ingress flows, rollback leaves it in
    /// place (with a logged warning) rather than removing a flow other
    /// pairs still depend on.
    #[test]
    fn rollback_retains_failed_inner_flow_with_nonzero_ref_count() {
        let backend = MockNetdevBackend::new();
        let netdev_a = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let netdev_c = backend.register_port(DpifClass(0), OdpPort(2), "p2", PortKind::Physical);
        let tnlaux = TnlAux::new();

        // b2 is merged successfully against an unrelated ingress flow C
        // first, so its ref_count is 1 before A's attempt.
        let c = flow(30, 2, None);
        add_ingress(&tnlaux, &backend, c, netdev_c, ClassifierFlags::default(), DpifClass(0))
            .expect("c");
        let b2 = flow(20, 5, Some("10.0.0.2".parse().unwrap()));
        let b2_ufid = b2.mega_ufid();
        add_inner(&tnlaux, &backend, b2, ClassifierFlags::default(), DpifClass(0))
            .expect("b2 merges with c");
        assert_eq!(tnlaux.inner_ref_count(b2_ufid), Some(1));

        let a = flow(99, 1, None);
        let a_ufid = a.mega_ufid();
        backend.reject(&netdev_a, a_ufid.merge(b2_ufid).into());

        let status = add_ingress(&tnlaux, &backend, a, netdev_a, ClassifierFlags::default(), DpifClass(0))
            .expect("add_ingress");

        assert_eq!(status, OffloadStatus::Failed);
        assert!(
            tnlaux.has_inner(b2_ufid),
            "inner flow with ref_count > 0 must be retained, not removed"
        );
        assert_eq!(tnlaux.inner_ref_count(b2_ufid), Some(1));
    }

    /// Scenario 6: deleting an ingress flow removes every merged pair
    /// rooted at it and decrements the inner flow's ref_count to zero,
    /// while leaving the inner flow itself registered.
    #[test]
    fn delete_ingress_cascades_and_clears_hardware() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let a = flow(1, 1, None);
        let a_ufid = a.mega_ufid();
        add_ingress(
            &tnlaux,
            &backend,
            a.clone(),
            netdev.clone(),
            ClassifierFlags::default(),
            DpifClass(0),
        )
        .expect("add a");
        let b = flow(2, 5, Some("10.0.0.1".parse().unwrap()));
        let b_ufid = b.mega_ufid();
        add_inner(&tnlaux, &backend, b, ClassifierFlags::default(), DpifClass(0)).expect("add b");
        assert_eq!(backend.installed_count(), 1);

        delete_ingress(&tnlaux, &backend, &a);

        assert!(!tnlaux.has_ingress(a_ufid));
        assert!(!backend.is_installed(&netdev, a_ufid.merge(b_ufid).into()));
        assert_eq!(a.status(), OffloadStatus::None);
        assert!(tnlaux.has_inner(b_ufid), "inner flow survives, ref_count drops to 0");
        assert_eq!(tnlaux.inner_ref_count(b_ufid), Some(0));
    }

    /// P5: re-running `add_inner` for the same flow reference (the
    /// "modification" path where an inner flow is torn down and rebuilt
    /// against the current ingress set) produces no additional hardware
    /// entry for the same (ingress, inner) pair — the merged UFID is
    /// stable, so the second `flow_put` overwrites rather than duplicates.
    #[test]
    fn reinstalling_same_pair_is_idempotent_in_hardware_entry_count() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let a = flow(1, 1, None);
        add_ingress(&tnlaux, &backend, a, netdev, ClassifierFlags::default(), DpifClass(0))
            .expect("add a");

        let b = flow(2, 5, Some("10.0.0.1".parse().unwrap()));
        let b_clone = Arc::clone(&b);
        add_inner(&tnlaux, &backend, b, ClassifierFlags::default(), DpifClass(0)).expect("add b");
        assert_eq!(backend.installed_count(), 1);

        // Re-add the same logical flow, as the "modify" path does: same
        // Arc, same mega-UFID.
        add_inner(&tnlaux, &backend, b_clone, ClassifierFlags::default(), DpifClass(0))
            .expect("re-add b");
        assert_eq!(
            backend.installed_count(),
            1,
            "merged UFID is stable across re-merge, so the entry count must not grow"
        );
    }

    /// P3: an inner flow's ref_count equals the number of ingress flows
    /// currently merged `Full` with it.
    #[test]
    fn inner_ref_count_tracks_number_of_full_merges() {
        let backend = MockNetdevBackend::new();
        let netdev1 = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let netdev2 = backend.register_port(DpifClass(0), OdpPort(2), "p2", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let a1 = flow(1, 1, None);
        add_ingress(&tnlaux, &backend, a1, netdev1, ClassifierFlags::default(), DpifClass(0))
            .expect("a1");
        let a2 = flow(2, 2, None);
        add_ingress(&tnlaux, &backend, a2, netdev2, ClassifierFlags::default(), DpifClass(0))
            .expect("a2");

        let b = flow(3, 5, Some("10.0.0.1".parse().unwrap()));
        let b_ufid = b.mega_ufid();
        add_inner(&tnlaux, &backend, b, ClassifierFlags::default(), DpifClass(0))
            .expect("b merges both");

        assert_eq!(tnlaux.inner_ref_count(b_ufid), Some(2));
        assert_eq!(backend.installed_count(), 2);
    }

    /// Duplicate ingress flow from a second producer thread is rejected
    /// without touching hardware.
    #[test]
    fn add_ingress_duplicate_ufid_is_rejected() {
        let backend = MockNetdevBackend::new();
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let tnlaux = TnlAux::new();

        let a1 = flow(1, 1, None);
        add_ingress(&tnlaux, &backend, a1, netdev.clone(), ClassifierFlags::default(), DpifClass(0))
            .expect("first add succeeds");

        let a2 = flow(1, 1, None);
        let err = add_ingress(&tnlaux, &backend, a2, netdev, ClassifierFlags::default(), DpifClass(0))
            .expect_err("duplicate mega-UFID must be rejected");
        assert!(matches!(err, OffloadError::DuplicateFlow { .. }));
    }
}
