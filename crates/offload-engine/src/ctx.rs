// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! `OffloadCtx`: the producer-facing handle wiring the request queue, the
//! tunnel auxiliary registry, and a hardware backend into one object.

use std::sync::Arc;

use offload_core::{ActionList, DpifClass, OffloadConfig, OffloadStatus, SourceFlow};
use offload_merge::TnlAuxRegistry;
use offload_netdev::NetdevBackend;
use offload_queue::{Op, OffloadQueue};

use crate::dispatcher::Dispatcher;
use crate::stats;

/// Top-level handle a datapath holds onto for the lifetime of one dpif
/// instance. Cheap to clone (an `Arc` around it): the request queue, the
/// tunnel registry, and the backend handle are all already reference
/// counted internally.
pub struct OffloadCtx {
    queue: OffloadQueue,
    tnlaux_registry: Arc<TnlAuxRegistry>,
    backend: Arc<dyn NetdevBackend>,
}

impl OffloadCtx {
    /// Builds a new context: a fresh tunnel registry, a worker thread
    /// named per `config`, and the dispatcher wired to `backend`.
    #[must_use]
    pub fn new(config: &OffloadConfig, backend: Arc<dyn NetdevBackend>) -> Arc<Self> {
        let tnlaux_registry = Arc::new(TnlAuxRegistry::new());
        let dispatcher = Arc::new(Dispatcher {
            tnlaux_registry: Arc::clone(&tnlaux_registry),
            backend: Arc::clone(&backend),
        });
        let queue = OffloadQueue::new(config.worker_thread_name.clone(), dispatcher);
        Arc::new(Self {
            queue,
            tnlaux_registry,
            backend,
        })
    }

    /// Enqueues an add or modify. See [`offload_queue::OffloadQueue::queue_put`].
    pub fn queue_put(
        &self,
        dpif_class: DpifClass,
        flow: Arc<dyn SourceFlow>,
        op: Op,
        new_actions: ActionList,
        old_actions: Option<ActionList>,
    ) -> bool {
        self.queue.queue_put(dpif_class, flow, op, new_actions, old_actions)
    }

    /// Enqueues a delete, snapshotting the flow's current actions so the
    /// dispatcher knows which teardown path to run.
    pub fn queue_del(&self, dpif_class: DpifClass, flow: Arc<dyn SourceFlow>) -> bool {
        let actions = flow.actions();
        self.queue.queue_del(dpif_class, flow, actions)
    }

    /// Runs one stats probe for `flow`, recording any newly observed
    /// hardware counters onto it.
    pub fn offload_used(&self, dpif_class: DpifClass, flow: &Arc<dyn SourceFlow>, now_ms: u64) {
        stats::offload_used(&self.tnlaux_registry, self.backend.as_ref(), dpif_class, flow, now_ms);
    }

    /// Enables or disables the hardware flow API gate (see
    /// [`offload_queue::OffloadQueue::set_hw_api_enabled`]).
    pub fn set_hw_api_enabled(&self, enabled: bool) {
        self.queue.set_hw_api_enabled(enabled);
    }

    /// Pauses new add/modify requests and blocks until the queue drains.
    /// Returns the previous acceptance state for [`OffloadCtx::resume`].
    pub fn pause(&self) -> bool {
        self.queue.pause()
    }

    /// Restores the acceptance state returned by a prior [`OffloadCtx::pause`].
    pub fn resume(&self, prev: bool) {
        self.queue.resume(prev);
    }

    /// Shuts down the worker thread, draining any remaining items to
    /// [`OffloadStatus::None`].
    pub fn join(&self) {
        self.queue.join();
    }

    /// Restarts the worker thread after a prior [`OffloadCtx::join`].
    pub fn restart(&self) {
        self.queue.restart();
    }

    /// True if the worker is currently processing an item.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.queue.is_processing()
    }

    /// Number of items currently queued, not counting one in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// The tunnel auxiliary registry, for the diagnostic dump endpoint.
    #[must_use]
    pub fn tnlaux_registry(&self) -> &Arc<TnlAuxRegistry> {
        &self.tnlaux_registry
    }

    /// The hardware backend this context dispatches onto, for the
    /// diagnostic dump endpoint (port kind lookups).
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn NetdevBackend> {
        &self.backend
    }
}

impl std::fmt::Debug for OffloadCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadCtx")
            .field("pending_len", &self.pending_len())
            .field("is_processing", &self.is_processing())
            .finish()
    }
}

static GLOBAL_CTX: once_cell::sync::OnceCell<Arc<OffloadCtx>> = once_cell::sync::OnceCell::new();

/// Installs `ctx` as the process-wide context, for code paths (datapath
/// call sites) that cannot thread an `Arc<OffloadCtx>` through directly,
/// mirroring the original implementation's single global `dpif_offload`
/// handle.
///
/// # Errors
/// Returns the context back if one was already installed; the global
/// handle can only be set once per process.
pub fn set_global(ctx: Arc<OffloadCtx>) -> Result<(), Arc<OffloadCtx>> {
    GLOBAL_CTX.set(ctx)
}

/// Returns the process-wide context, if [`set_global`] has been called.
#[must_use]
pub fn global() -> Option<Arc<OffloadCtx>> {
    GLOBAL_CTX.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::testing::TestFlow;
    use offload_core::{Action, FlowMatch, MegaUfid, OdpPort};
    use offload_netdev::mock::MockNetdevBackend;
    use offload_netdev::PortKind;
    use std::thread;
    use std::time::Duration;

    fn wait_status(flow: &Arc<dyn SourceFlow>, want: OffloadStatus) -> OffloadStatus {
        for _ in 0..200 {
            let status = flow.status();
            if status == want {
                return status;
            }
            thread::sleep(Duration::from_millis(5));
        }
        flow.status()
    }

    /// A plain output-to-physical-port flow installs directly, with no
    /// tunnel merging involved.
    #[test]
    fn simple_flow_installs_directly() {
        let backend = Arc::new(MockNetdevBackend::new());
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let _ = backend.register_port(DpifClass(0), OdpPort(2), "p2", PortKind::Physical);

        let config = OffloadConfig::default();
        let ctx = OffloadCtx::new(&config, backend.clone());

        let flow: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(1),
            OdpPort(1),
            vec![Action::Output(OdpPort(2))],
            FlowMatch::default(),
        ));
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&flow),
            Op::Add,
            flow.actions(),
            None
        ));

        assert_eq!(wait_status(&flow, OffloadStatus::Full), OffloadStatus::Full);
        assert!(backend.is_installed(&netdev, flow.mega_ufid()));
    }

    /// A `TUNNEL_POP` ingress flow and a tunnel-destination inner flow
    /// merge into exactly one hardware entry keyed by their XOR'd UFIDs.
    #[test]
    fn tunnel_ingress_and_inner_flow_merge() {
        let backend = Arc::new(MockNetdevBackend::new());
        let physical = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let _ = backend.register_port(DpifClass(0), OdpPort(5), "vxlan0", PortKind::Vxlan);

        let config = OffloadConfig::default();
        let ctx = OffloadCtx::new(&config, backend.clone());

        let ingress: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(10),
            OdpPort(1),
            vec![Action::TunnelPop(OdpPort(5))],
            FlowMatch::default(),
        ));
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&ingress),
            Op::Add,
            ingress.actions(),
            None
        ));
        assert_eq!(wait_status(&ingress, OffloadStatus::Full), OffloadStatus::Full);

        let inner_match = FlowMatch {
            tunnel_dst: Some("10.0.0.1".parse().unwrap()),
            ..FlowMatch::default()
        };
        let inner: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(20),
            OdpPort(5),
            vec![Action::Output(OdpPort(1))],
            inner_match,
        ));
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&inner),
            Op::Add,
            inner.actions(),
            None
        ));
        assert_eq!(wait_status(&inner, OffloadStatus::Full), OffloadStatus::Full);

        let merged = ingress.mega_ufid().merge(inner.mega_ufid());
        assert!(backend.is_installed(&physical, merged.into()));

        ctx.queue_del(DpifClass(0), Arc::clone(&ingress));
        assert_eq!(wait_status(&ingress, OffloadStatus::None), OffloadStatus::None);
        assert!(!backend.is_installed(&physical, merged.into()));
    }

    /// Pausing rejects new adds but a concurrently enqueued delete still
    /// drains.
    #[test]
    fn pause_blocks_adds_but_deletes_still_drain() {
        let backend = Arc::new(MockNetdevBackend::new());
        let _ = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let _ = backend.register_port(DpifClass(0), OdpPort(2), "p2", PortKind::Physical);

        let config = OffloadConfig::default();
        let ctx = OffloadCtx::new(&config, backend.clone());

        let flow: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(1),
            OdpPort(1),
            vec![Action::Output(OdpPort(2))],
            FlowMatch::default(),
        ));
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&flow),
            Op::Add,
            flow.actions(),
            None
        ));
        assert_eq!(wait_status(&flow, OffloadStatus::Full), OffloadStatus::Full);

        let prev = ctx.pause();
        let other: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(2),
            OdpPort(1),
            vec![Action::Output(OdpPort(2))],
            FlowMatch::default(),
        ));
        assert!(!ctx.queue_put(
            DpifClass(0),
            Arc::clone(&other),
            Op::Add,
            other.actions(),
            None
        ));

        assert!(ctx.queue_del(DpifClass(0), Arc::clone(&flow)));
        assert_eq!(wait_status(&flow, OffloadStatus::None), OffloadStatus::None);

        ctx.resume(prev);
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&other),
            Op::Add,
            other.actions(),
            None
        ));
        assert_eq!(wait_status(&other, OffloadStatus::Full), OffloadStatus::Full);
    }

    /// A modify that turns an already-`Full` flow's actions into something
    /// unoffloadable (OUTPUT to a tap port) must issue a compensating
    /// delete of the old hardware entry before failing, rather than
    /// leaving the stale install behind (`spec.md` §4.5 step 3 / §7).
    #[test]
    fn mod_of_offloaded_flow_to_unoffloadable_actions_deletes_old_install() {
        let backend = Arc::new(MockNetdevBackend::new());
        let netdev = backend.register_port(DpifClass(0), OdpPort(1), "p1", PortKind::Physical);
        let _ = backend.register_port(DpifClass(0), OdpPort(2), "p2", PortKind::Physical);
        let _ = backend.register_port(DpifClass(0), OdpPort(3), "p3", PortKind::Tap);

        let config = OffloadConfig::default();
        let ctx = OffloadCtx::new(&config, backend.clone());

        let old_actions = vec![Action::Output(OdpPort(2))];
        let flow: Arc<dyn SourceFlow> = Arc::new(TestFlow::new(
            MegaUfid(1),
            OdpPort(1),
            old_actions.clone(),
            FlowMatch::default(),
        ));
        assert!(ctx.queue_put(DpifClass(0), Arc::clone(&flow), Op::Add, old_actions.clone(), None));
        assert_eq!(wait_status(&flow, OffloadStatus::Full), OffloadStatus::Full);
        assert!(backend.is_installed(&netdev, flow.mega_ufid()));

        let new_actions = vec![Action::Output(OdpPort(3))];
        assert!(ctx.queue_put(
            DpifClass(0),
            Arc::clone(&flow),
            Op::Mod,
            new_actions,
            Some(old_actions),
        ));

        assert_eq!(wait_status(&flow, OffloadStatus::Failed), OffloadStatus::Failed);
        assert!(
            !backend.is_installed(&netdev, flow.mega_ufid()),
            "the stale hardware entry from the old offload must be cleaned up, not left behind"
        );
    }
}
