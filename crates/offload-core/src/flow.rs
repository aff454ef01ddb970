// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The `SourceFlow` handle contract, and the action/match model the
//! classifier and merger operate on.
//!
//! `SourceFlow` is intentionally a trait rather than a concrete struct: the
//! flow table entry is owned by the external packet-processing fast path
//! (out of scope for this crate), and the engine only ever holds a counted
//! reference to it. Tests and the CLI demo use [`crate::testing::TestFlow`]
//! as a concrete implementation.

use std::net::IpAddr;

use crate::ids::{MegaUfid, OdpPort};
use crate::status::OffloadStatus;

/// A single action in a cached action list.
///
/// This is a deliberately small subset of the real action language: only
/// the actions the classifier and merger need to reason about are
/// represented structurally. Anything else round-trips through
/// [`Action::Other`], which the classifier treats as opaque but not
/// inherently unoffloadable (see `offload-classifier`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the packet out `OdpPort`.
    Output(OdpPort),
    /// Strip the tunnel header and re-inject the inner packet on the given
    /// virtual tunnel port.
    TunnelPop(OdpPort),
    /// Push a VLAN tag.
    PushVlan,
    /// Duplicate the packet and run the nested action list against the
    /// copy. Only ever descended one level by the classifier.
    Clone(Vec<Action>),
    /// An action the classifier does not model structurally (e.g. a
    /// header rewrite); carries its wire-format name for logging only.
    Other(String),
}

/// A cached, value-copied action list.
///
/// Captured at enqueue time because the owning datapath may free or
/// mutate its own copy during the grace window before the worker thread
/// dispatches the work item.
pub type ActionList = Vec<Action>;

bitflags::bitflags! {
    /// Classifier-extracted summary of an action list, handed to the
    /// hardware backend alongside the match and raw actions so it can make
    /// offload decisions without re-walking the action list itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActionFlags: u32 {
        /// Action list (or a descended clone) contains `OUTPUT`.
        const OUTPUT = 1 << 0;
        /// Action list contains `TUNNEL_POP`.
        const TUNNEL_POP = 1 << 1;
        /// Action list contains `PUSH_VLAN`.
        const PUSH_VLAN = 1 << 2;
        /// Action list contains a `CLONE`.
        const CLONE = 1 << 3;
        /// Action list has no output-like fate action (offloadable as an
        /// in-hardware drop).
        const DROP = 1 << 4;
    }
}

/// The subset of a flow's match the merger and classifier need.
///
/// Mirrors the fields a merge decision actually needs (`tp_dst`, ethernet
/// destination, IP destination, tunnel destination); everything else about
/// the real match is opaque to this engine and stays with the datapath.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMatch {
    /// Transport destination port, if the match pins one.
    pub tp_dst_port: Option<u16>,
    /// Ethernet destination address, if the match pins one.
    pub eth_dst: Option<[u8; 6]>,
    /// IP destination address, if the match pins one.
    pub ip_dst: Option<IpAddr>,
    /// Tunnel destination address the match requires on the decapsulated
    /// packet's outer header. A `Some` here is what distinguishes an inner
    /// flow candidate (a flow with a real tunnel-destination match arriving
    /// on a tunnel vport) from an ordinary flow that merely ingresses on
    /// that port.
    pub tunnel_dst: Option<IpAddr>,
}

impl FlowMatch {
    /// Returns a copy of this match with tunnel metadata cleared, as
    /// installed for the inner side of a merged cross-product flow (the
    /// hardware entry matches on the decapsulated packet, which carries no
    /// tunnel metadata of its own).
    #[must_use]
    pub fn without_tunnel_metadata(&self) -> FlowMatch {
        FlowMatch {
            tunnel_dst: None,
            ..self.clone()
        }
    }

    /// True if this match pins a tunnel destination, i.e. this flow is a
    /// candidate inner flow when it arrives on a tunnel virtual port.
    #[must_use]
    pub fn has_tunnel_match(&self) -> bool {
        self.tunnel_dst.is_some()
    }
}

/// An opaque handle to a flow-table entry owned by the datapath.
///
/// The engine never mutates match or actions through this trait; it only
/// reads them, toggles [`OffloadStatus`], and relies on `Clone`/`Drop` of
/// the concrete handle type to manage the reference count the datapath
/// uses to keep the entry alive while the engine still cares about it.
pub trait SourceFlow: std::fmt::Debug + Send + Sync {
    /// The flow's stable 128-bit identifier.
    fn mega_ufid(&self) -> MegaUfid;

    /// The physical or virtual port this flow ingresses on.
    fn in_port(&self) -> OdpPort;

    /// A value copy of the flow's current action list.
    fn actions(&self) -> ActionList;

    /// A value copy of the flow's current match.
    fn flow_match(&self) -> FlowMatch;

    /// A version counter the datapath bumps whenever match/actions change
    /// underneath an in-flight offload request; passed through to the
    /// backend so a slow hardware call can detect it raced a newer add.
    fn version(&self) -> u64;

    /// Current offload status, loaded with acquire ordering.
    fn status(&self) -> OffloadStatus;

    /// Stores a new offload status with release ordering.
    fn set_status(&self, status: OffloadStatus);

    /// True once the datapath has marked this flow entry dead (e.g. the
    /// owning rule was removed before the engine got to it).
    fn is_dead(&self) -> bool;

    /// Adds `packets`/`bytes` to this flow's running hardware counters and
    /// records `used_ms` as the last-used timestamp, as the stats
    /// aggregator does once per probe when the aggregated packet count is
    /// nonzero. Implementations accumulate rather than overwrite: repeated
    /// probes add up, they don't replace the running total.
    fn record_usage(&self, used_ms: u64, packets: u64, bytes: u64);

    /// A snapshot of this flow's accumulated hardware counters.
    fn usage(&self) -> FlowUsage;
}

/// A snapshot of a flow's accumulated hardware counters, as last recorded
/// by [`SourceFlow::record_usage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowUsage {
    /// Milliseconds since epoch the flow was last observed to match
    /// traffic, or `0` if never.
    pub used_ms: u64,
    /// Total packets matched since the flow was offloaded.
    pub packet_count: u64,
    /// Total bytes matched since the flow was offloaded.
    pub byte_count: u64,
}
