// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The request queue (`spec.md` §4.1, C1): a FIFO of offload work items, a
//! single worker thread that drains it, and pause/drain/resume semantics.
//!
//! This crate knows nothing about classification or merging: the worker
//! hands each popped [`WorkItem`] to a caller-supplied [`Dispatch`], which
//! `offload-engine` implements with the actual classify/merge/direct-offload
//! logic (C5). Keeping that boundary here means this crate's tests can
//! exercise the queue's concurrency properties (P4, P6) with a trivial
//! dispatcher instead of a full hardware backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use offload_core::{ActionList, DpifClass, OffloadStatus, SourceFlow};

/// The operation a [`WorkItem`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// A newly offloadable flow.
    Add,
    /// An existing flow whose match or actions changed.
    Mod,
    /// A flow being removed.
    Del,
}

/// One unit of work popped by the worker thread.
///
/// Actions are captured as value copies at enqueue time (`spec.md` §3: "the
/// datapath may free its own copy during the grace window").
pub struct WorkItem {
    /// Provider identity scoping this request's port lookups.
    pub dpif_class: DpifClass,
    /// The flow this item concerns.
    pub flow: Arc<dyn SourceFlow>,
    /// Which operation to perform.
    pub op: Op,
    /// The flow's current action list, captured at enqueue time.
    pub new_actions: ActionList,
    /// For `Mod`, the action list the flow had before this change;
    /// determines which delete path the dispatcher runs before retrying the
    /// add (`spec.md` §4.4.5). `None` for `Add`/`Del`.
    pub old_actions: Option<ActionList>,
    /// The flow's offload status immediately before this enqueue set it to
    /// `InProgress`. `enqueue` overwrites `flow.status()` under the queue
    /// mutex before the item is ever visible to the dispatcher, so by the
    /// time the worker pops this item `flow.status()` can no longer answer
    /// "was this flow offloaded before this request": this field is the
    /// only place that answer survives (`spec.md` §4.5 step 3 / §7's
    /// compensating delete on a rejected modification).
    pub was_offloaded: bool,
}

/// Narrow capability the queue needs from the offload dispatcher: drive one
/// popped work item to completion, including updating the flow's status.
///
/// Implemented by `offload-engine`'s dispatcher in the real engine; tests in
/// this crate use small closures-as-structs to observe queue behavior in
/// isolation.
pub trait Dispatch: Send + Sync + 'static {
    /// Processes one work item. Must not panic across hardware calls the
    /// way the real dispatcher does not: a panic here takes down the
    /// worker thread, which [`OffloadQueue::join`] surfaces as a logged
    /// error rather than propagating.
    fn dispatch(&self, item: WorkItem);
}

struct Inner {
    items: Mutex<VecDeque<WorkItem>>,
    cv: Condvar,
    exit: AtomicBool,
    req: AtomicBool,
    hw_api_enabled: AtomicBool,
    process: AtomicBool,
    dispatch: Arc<dyn Dispatch>,
    thread_name: String,
}

/// The FIFO request queue plus its worker thread (`spec.md`'s
/// `OffloadCtx`/`RequestQueue`, C1 half; the top-level `OffloadCtx` the
/// producer API names lives in `offload-engine` and composes this type with
/// the merge/classify/stats logic).
pub struct OffloadQueue {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OffloadQueue {
    /// Creates a queue with its worker thread already running, accepting
    /// requests (`req = true`) with the hardware flow API enabled.
    #[must_use]
    pub fn new(thread_name: impl Into<String>, dispatch: Arc<dyn Dispatch>) -> Self {
        let inner = Arc::new(Inner {
            items: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            exit: AtomicBool::new(false),
            req: AtomicBool::new(true),
            hw_api_enabled: AtomicBool::new(true),
            process: AtomicBool::new(false),
            dispatch,
            thread_name: thread_name.into(),
        });
        let worker = spawn_worker(Arc::clone(&inner));
        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enables or disables the hardware flow API gate consulted by
    /// `queue_put` (`spec.md` §4.1: "if offload requests are enabled, ...
    /// netdev-flow-API is enabled"). Deletes are never gated by this.
    pub fn set_hw_api_enabled(&self, enabled: bool) {
        self.inner.hw_api_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Enqueues an `Add`/`Mod` work item. Fails (returns `false`, no-op)
    /// if requests are currently paused, the hardware flow API is
    /// disabled, or the flow is already `InProgress` (invariant 1: a
    /// `SourceFlow` is enqueued at most once at any moment).
    ///
    /// # Panics
    /// `op` must not be [`Op::Del`]; use [`OffloadQueue::queue_del`]
    /// instead, which always drains regardless of the pause state.
    pub fn queue_put(
        &self,
        dpif_class: DpifClass,
        flow: Arc<dyn SourceFlow>,
        op: Op,
        new_actions: ActionList,
        old_actions: Option<ActionList>,
    ) -> bool {
        assert!(op != Op::Del, "queue_put must not be called with Op::Del; use queue_del");
        self.enqueue(dpif_class, flow, op, new_actions, old_actions, false)
    }

    /// Enqueues a `Del` work item. Ignores the `req` (pause) flag and the
    /// hardware-API-enabled flag — deletes must always drain so a paused
    /// engine keeps freeing hardware resources (`spec.md` §5 "Pause/drain").
    ///
    /// `actions` is the flow's action list at enqueue time, captured by the
    /// caller the same way an `Add`/`Mod` captures it: it tells the
    /// dispatcher which delete path to run (ingress-pop, inner-match, or a
    /// direct delete) without re-reading a flow that may already be torn
    /// down by the time the worker gets to it.
    pub fn queue_del(&self, dpif_class: DpifClass, flow: Arc<dyn SourceFlow>, actions: ActionList) -> bool {
        self.enqueue(dpif_class, flow, Op::Del, actions, None, true)
    }

    fn enqueue(
        &self,
        dpif_class: DpifClass,
        flow: Arc<dyn SourceFlow>,
        op: Op,
        new_actions: ActionList,
        old_actions: Option<ActionList>,
        ignore_req: bool,
    ) -> bool {
        let mut items = self.inner.items.lock().expect("offload queue mutex poisoned");
        if !ignore_req
            && !(self.inner.req.load(Ordering::SeqCst)
                && self.inner.hw_api_enabled.load(Ordering::SeqCst))
        {
            tracing::debug!(ufid = %flow.mega_ufid(), "queue_put: rejected, requests paused or hw API disabled");
            return false;
        }
        let status_before = flow.status();
        if status_before == OffloadStatus::InProgress {
            tracing::debug!(ufid = %flow.mega_ufid(), "queue_put: flow already in progress, not re-enqueued");
            return false;
        }
        flow.set_status(OffloadStatus::InProgress);
        items.push_back(WorkItem {
            dpif_class,
            flow,
            op,
            new_actions,
            old_actions,
            was_offloaded: status_before.is_offloaded(),
        });
        if !self.inner.process.load(Ordering::SeqCst) {
            self.inner.cv.notify_one();
        }
        true
    }

    /// Denies new `Add`/`Mod` enqueues and blocks until the queue is fully
    /// drained and the worker is idle. Returns the previous acceptance
    /// state, to be passed to [`OffloadQueue::resume`].
    pub fn pause(&self) -> bool {
        let prev = self.inner.req.swap(false, Ordering::SeqCst);
        self.wait_drained();
        prev
    }

    /// Restores the acceptance state returned by a prior [`OffloadQueue::pause`].
    pub fn resume(&self, prev: bool) {
        self.inner.req.store(prev, Ordering::SeqCst);
    }

    /// Blocks until the queue is empty and the worker is not currently
    /// processing an item. A busy-poll retry loop (`spec.md` §9's "Design
    /// Note"): re-signals the worker if the list is non-empty but
    /// processing is false, to wake it up and drain.
    pub fn wait_drained(&self) {
        loop {
            let items = self.inner.items.lock().expect("offload queue mutex poisoned");
            let processing = self.inner.process.load(Ordering::SeqCst);
            if items.is_empty() && !processing {
                return;
            }
            if !items.is_empty() && !processing {
                self.inner.cv.notify_one();
            }
            drop(items);
            thread::sleep(Duration::from_micros(200));
        }
    }

    /// Requests worker shutdown and joins the thread. The worker finishes
    /// its current item (no forced termination of an in-flight hardware
    /// call), then drains any remaining items by marking each flow's
    /// status `None` and dropping it.
    pub fn join(&self) {
        self.inner.exit.store(true, Ordering::SeqCst);
        self.inner.cv.notify_all();
        if let Some(handle) = self.worker.lock().expect("worker handle mutex poisoned").take() {
            if let Err(panic) = handle.join() {
                tracing::error!(panic = ?panic, "offload worker thread panicked");
            }
        }
    }

    /// Clears `exit` and spawns a new worker bound to the same queue state.
    pub fn restart(&self) {
        self.inner.exit.store(false, Ordering::SeqCst);
        let handle = spawn_worker(Arc::clone(&self.inner));
        *self.worker.lock().expect("worker handle mutex poisoned") = Some(handle);
    }

    /// True if the worker is currently processing an item.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.inner.process.load(Ordering::SeqCst)
    }

    /// Number of items currently queued (not counting one in flight).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.items.lock().expect("offload queue mutex poisoned").len()
    }
}

impl Drop for OffloadQueue {
    fn drop(&mut self) {
        self.join();
    }
}

fn spawn_worker(inner: Arc<Inner>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(inner.thread_name.clone())
        .spawn(move || worker_loop(&inner))
        .expect("failed to spawn offload worker thread")
}

fn worker_loop(inner: &Inner) {
    let mut items = inner.items.lock().expect("offload queue mutex poisoned");
    loop {
        if inner.exit.load(Ordering::SeqCst) {
            drain_on_exit(&mut items);
            return;
        }
        if let Some(item) = items.pop_front() {
            inner.process.store(true, Ordering::SeqCst);
            drop(items);
            inner.dispatch.dispatch(item);
            items = inner.items.lock().expect("offload queue mutex poisoned");
            continue;
        }
        inner.process.store(false, Ordering::SeqCst);
        items = inner.cv.wait(items).expect("offload queue mutex poisoned");
    }
}

fn drain_on_exit(items: &mut VecDeque<WorkItem>) {
    for item in items.drain(..) {
        item.flow.set_status(OffloadStatus::None);
    }
}
