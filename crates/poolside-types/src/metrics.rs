//! The metrics snapshot sampled from a running world.
//!
//! A snapshot is one immutable reading of the pool and counter state at
//! a point in time. It is produced on a fixed cadence by the world's
//! sampler, handed to the publisher once, and never mutated afterwards.
//! The serialized form uses camelCase field names -- this is the wire
//! shape dashboard consumers see on the event stream.

use serde::{Deserialize, Serialize};

/// One sampled reading of pool and workload counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Sample time as epoch milliseconds.
    pub timestamp: i64,

    /// Total live connections (in use + idle).
    pub pool_size: usize,

    /// Connections currently checked out.
    pub pool_used: usize,

    /// Idle connections available for checkout.
    pub pool_available: usize,

    /// Acquire requests queued waiting for a connection.
    pub pool_queue: usize,

    /// Successfully completed queries since the world started.
    pub queries_count: u64,

    /// Failed query batches since the world started.
    pub errors_count: u64,

    /// Connection attempts made beyond the configured maximum pool
    /// size: `max(0, total attempts - max pool size)`.
    pub new_connections_count: u64,
}
