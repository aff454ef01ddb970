// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The netdev abstraction the flow-offload engine consumes, as an external
//! collaborator (`spec.md` §1, §6: "port lookup", "`flow_put`", `flow_del`,
//! `flow_get`" are out of scope for the engine itself). This crate defines
//! the contract as a trait, [`NetdevBackend`], so the engine can be tested
//! without a real hardware-assisted classifier; [`mock::MockNetdevBackend`]
//! is the in-memory stand-in used across the workspace's test suites.

pub mod mock;

use offload_core::{DpifClass, MegaUfid, OdpPort};

/// Identity of a netdev as seen by the engine: a name, used both for
/// equality/hashing and for log lines, mirroring how the original
/// implementation logs netdevs by their interface name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetdevHandle(pub std::sync::Arc<str>);

impl std::fmt::Display for NetdevHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NetdevHandle {
    /// Builds a handle from any string-like name.
    pub fn new(name: impl Into<std::sync::Arc<str>>) -> Self {
        Self(name.into())
    }
}

/// Classification of a netdev, as reported by `netdev_get_type` /
/// `is_vport_class` in the external backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    /// An ordinary physical port.
    Physical,
    /// A VXLAN tunnel virtual port.
    Vxlan,
    /// A software-only tap port: `OUTPUT` to one is never offloadable.
    Tap,
    /// Any other vport type the classifier does not special-case.
    OtherVport(String),
}

impl PortKind {
    /// True for any virtual tunnel port kind (currently just VXLAN; the
    /// enum leaves room for GRE/Geneve without changing the classifier's
    /// call sites).
    #[must_use]
    pub fn is_tunnel_vport(&self) -> bool {
        matches!(self, PortKind::Vxlan)
    }
}

/// Hardware counters read back for one installed flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    /// Packets matched since install.
    pub n_packets: u64,
    /// Bytes matched since install.
    pub n_bytes: u64,
}

/// Side-channel of classifier-extracted flags and merge-derived fields
/// passed to `flow_put`, named to match `spec.md` §6's `OffloadInfo`.
#[derive(Debug, Clone, Default)]
pub struct OffloadInfo {
    /// Summary of the action kinds present (see
    /// [`offload_core::ActionFlags`]).
    pub action_flags: offload_core::ActionFlags,
    /// Ingress port (or a descended `TUNNEL_POP` target) is a VXLAN vport.
    pub vxlan_decap: bool,
    /// Action list contains `PUSH_VLAN`.
    pub vlan_push: bool,
    /// Action list has no output-like fate action.
    pub drop: bool,
    /// Validation-probe install: match only, no actions, hardware should
    /// just mark the packet rather than act on it.
    pub mark_set: bool,
    /// Transport destination port synthesized from the ingress flow's
    /// match, so hardware can reconstruct the outer decap key.
    pub tp_dst_port: Option<u16>,
    /// Ethernet destination synthesized from the ingress flow's match.
    pub tun_dl_dst: Option<[u8; 6]>,
    /// IP destination synthesized from the ingress flow's match.
    pub tun_dst: Option<std::net::IpAddr>,
    /// Provider identity scoping this request.
    pub dpif_class: DpifClass,
    /// Flow version at request time, so the backend can detect a race
    /// with a newer modification.
    pub version: u64,
}

/// A `flow_put` request.
#[derive(Debug, Clone)]
pub struct FlowPutRequest<'a> {
    /// The match to install (already cleared of tunnel metadata for the
    /// inner side of a merged pair, if applicable).
    pub flow_match: &'a offload_core::FlowMatch,
    /// The action list to install (empty for a validation probe).
    pub actions: &'a [offload_core::Action],
    /// The key hardware should install this entry under.
    pub ufid: MegaUfid,
    /// The classifier/merger side-channel.
    pub info: &'a OffloadInfo,
}

/// Result of a successful `flow_put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPutOutcome {
    /// True if the backend reports every action was offloaded (`Full`);
    /// false means only a subset matched (`Mask`).
    pub actions_offloaded: bool,
}

/// Errors a [`NetdevBackend`] call can fail with.
#[derive(thiserror::Error, Debug, Clone)]
pub enum NetdevError {
    /// The backend rejected the request (e.g. table full, unsupported
    /// match field).
    #[error("backend rejected request: {0}")]
    Rejected(String),
    /// The keyed entry did not exist (for `flow_del`/`flow_get`).
    #[error("no such flow entry")]
    NotFound,
}

/// The external netdev backend contract consumed by the flow-offload
/// engine (`spec.md` §6). Out of scope to *implement* for real hardware;
/// this crate only defines the contract and a mock.
pub trait NetdevBackend: Send + Sync {
    /// Resolves a datapath port number, scoped to a dpif class, to a
    /// netdev handle.
    fn port_netdev(&self, dpif_class: DpifClass, port: OdpPort) -> Option<NetdevHandle>;

    /// Classifies a netdev (physical, tap, a tunnel vport kind, ...).
    fn port_kind(&self, netdev: &NetdevHandle) -> PortKind;

    /// Installs a flow (or a validation probe) on `netdev`.
    fn flow_put(
        &self,
        netdev: &NetdevHandle,
        req: FlowPutRequest<'_>,
    ) -> Result<FlowPutOutcome, NetdevError>;

    /// Removes a previously installed flow from `netdev`.
    fn flow_del(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> Result<(), NetdevError>;

    /// Reads back hardware counters for a previously installed flow.
    fn flow_get(&self, netdev: &NetdevHandle, ufid: MegaUfid) -> Result<FlowStats, NetdevError>;
}
