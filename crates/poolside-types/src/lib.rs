//! Shared type definitions for the Poolside workload bench.
//!
//! # Modules
//!
//! - [`ids`] -- Sequence-based identifier newtypes and the simulation ID
//!   allocator.
//! - [`connection`] -- The [`Connection`] handle lent out by the pool.
//! - [`metrics`] -- The immutable [`MetricsSnapshot`] sampled each interval.
//! - [`event`] -- The serializable [`WorldEvent`] stream shape consumed by
//!   dashboard transports.

pub mod connection;
pub mod event;
pub mod ids;
pub mod metrics;

pub use connection::Connection;
pub use event::WorldEvent;
pub use ids::{ConnectionId, SimulationId, SimulationIdSequence};
pub use metrics::MetricsSnapshot;
