//! Type-safe identifier wrappers around sequence numbers.
//!
//! Entities in the bench are identified by small monotonic sequence
//! numbers rather than UUIDs: a connection carries the attempt number
//! that created it, and a simulation carries its position in the
//! process-lifetime start order. Strongly-typed wrappers prevent
//! accidental mixing of the two at compile time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a `u64` sequence number with
/// standard derives.
macro_rules! define_seq_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Return the inner sequence number.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_seq_id! {
    /// Unique identifier for a connection handle. Carries the factory's
    /// attempt number, so IDs are unique per factory instance.
    ConnectionId
}

define_seq_id! {
    /// Unique identifier for one simulation. Monotonic over the process
    /// lifetime; a restarted world gets a fresh ID, never a reused one.
    SimulationId
}

/// Allocator for [`SimulationId`] values.
///
/// Owned by whoever starts worlds (the control handler in the engine
/// binary) so that simulation identity does not depend on process-wide
/// mutable state. The first allocated ID is 1.
#[derive(Debug)]
pub struct SimulationIdSequence {
    next: AtomicU64,
}

impl SimulationIdSequence {
    /// Create a sequence whose first allocated ID is 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next simulation ID.
    pub fn next_id(&self) -> SimulationId {
        SimulationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SimulationIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
