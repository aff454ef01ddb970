// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The per-flow offload status and its atomic, acquire/release-ordered cell.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Offload status of a [`crate::SourceFlow`].
///
/// Published atomically with release ordering by whichever component makes
/// the transition (the request queue sets `InProgress` on enqueue, the
/// dispatcher sets the terminal states); consumers load with acquire
/// ordering, satisfying invariant 4 in the specification ("status is
/// published atomically with release ordering; consumers load with
/// acquire").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OffloadStatus {
    /// No offload attempted, or the flow's offload state was cleared
    /// (e.g. after delete).
    None = 0,
    /// An offload worker currently owns this flow; it may not be
    /// re-enqueued until this clears.
    InProgress = 1,
    /// Installed in hardware, but the backend only matched a subset of the
    /// actions (partial/"mask" offload).
    Mask = 2,
    /// Fully installed in hardware.
    Full = 3,
    /// Offload was attempted and rejected, or the flow is not offloadable.
    Failed = 4,
}

impl OffloadStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OffloadStatus::None,
            1 => OffloadStatus::InProgress,
            2 => OffloadStatus::Mask,
            3 => OffloadStatus::Full,
            4 => OffloadStatus::Failed,
            // AtomicStatus only ever stores discriminants produced by
            // `OffloadStatus as u8`, so any other value would indicate
            // memory corruption rather than a reachable program state.
            _ => unreachable!("invalid offload status discriminant {raw}"),
        }
    }

    /// True for any state that means a hardware entry may currently exist
    /// for this flow (`Mask` or `Full`).
    #[must_use]
    pub fn is_offloaded(self) -> bool {
        matches!(self, OffloadStatus::Mask | OffloadStatus::Full)
    }
}

impl fmt::Display for OffloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OffloadStatus::None => "none",
            OffloadStatus::InProgress => "in-progress",
            OffloadStatus::Mask => "mask",
            OffloadStatus::Full => "full",
            OffloadStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// An atomic cell holding an [`OffloadStatus`], used by `SourceFlow`
/// implementations to satisfy the engine's ordering requirements without
/// forcing every flow handle to take a lock just to read its status.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    /// Creates a new cell initialized to the given status.
    #[must_use]
    pub fn new(initial: OffloadStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    /// Loads the current status with acquire ordering.
    #[must_use]
    pub fn load(&self) -> OffloadStatus {
        OffloadStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores a new status with release ordering.
    pub fn store(&self, status: OffloadStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Atomically swaps in a new status, returning the previous one. Used
    /// by the request queue to gate enqueue on "not already in progress".
    pub fn swap(&self, status: OffloadStatus) -> OffloadStatus {
        OffloadStatus::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new(OffloadStatus::None)
    }
}
