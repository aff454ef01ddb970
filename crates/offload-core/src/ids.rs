// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identifiers shared across the engine: the datapath port number, the
//! provider identity used to scope port lookups, and the 128-bit mega-UFID.

use std::fmt;

/// A datapath port number (`odp_port_t` in the original implementation).
///
/// Both physical ports and tunnel virtual ports are numbered in the same
/// space; an [`OdpPort`] is only ever classified as one or the other by
/// asking the netdev backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OdpPort(pub u32);

impl fmt::Display for OdpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// Provider identity for the datapath backend, used to scope port lookups.
///
/// Two ports with the same number on different `dpif_class` values are
/// distinct netdevs; the engine never compares `OdpPort` across classes
/// without also comparing `DpifClass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DpifClass(pub u32);

/// A 128-bit unique flow identifier, stable over a flow's lifetime.
///
/// Computed by the external datapath from the flow's match; the engine
/// treats it as opaque except for one property it depends on: XOR of two
/// mega-UFIDs is commutative, invertible given one operand, and collision
/// resistant enough for the hash-map keyspace. That property is what makes
/// [`MegaUfid::merge`] usable as the key for an installed cross-product
/// flow (a [`MergedUfid`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MegaUfid(pub u128);

impl MegaUfid {
    /// Combines two participants' mega-UFIDs into the key used to install
    /// their merged (cross-product) hardware flow.
    ///
    /// Symmetric: `a.merge(b) == b.merge(a)`. Given the merged key and one
    /// operand, the other operand can be recovered by XOR-ing again, which
    /// is how delete and stats paths reconstruct the key from either side.
    #[must_use]
    pub fn merge(self, other: MegaUfid) -> MergedUfid {
        MergedUfid(self.0 ^ other.0)
    }
}

impl fmt::Display for MegaUfid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The identifier under which a cross-product (ingress, inner) pair is
/// installed in hardware: the bitwise XOR of the two participants'
/// mega-UFIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergedUfid(pub u128);

impl fmt::Display for MergedUfid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<MergedUfid> for MegaUfid {
    /// A merged key is installed on hardware through the same `flow_put`
    /// contract as an ordinary mega-UFID; this conversion lets the merger
    /// hand one to [`crate::flow::SourceFlow`]-shaped request types without
    /// a separate "key" type threaded through every backend call.
    fn from(merged: MergedUfid) -> Self {
        MegaUfid(merged.0)
    }
}
