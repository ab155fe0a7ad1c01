//! The serializable event stream shape.
//!
//! Every publisher notification maps to one [`WorldEvent`]. The tagged
//! serialization (`event` + `payload`) matches the named channels a
//! socket transport would emit on: `start`, `stop`, `error`, and
//! `pool-metrics`.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

/// A lifecycle or metrics event published by a running world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum WorldEvent {
    /// A world started.
    Start,

    /// A world stopped.
    Stop,

    /// A workload chain or batch failed out-of-band.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },

    /// A metrics snapshot was sampled.
    PoolMetrics(MetricsSnapshot),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_use_channel_names() {
        let json = serde_json::to_value(WorldEvent::Start).unwrap();
        assert_eq!(json.get("event").unwrap(), "start");
        let json = serde_json::to_value(WorldEvent::Stop).unwrap();
        assert_eq!(json.get("event").unwrap(), "stop");
    }

    #[test]
    fn error_event_carries_message() {
        let event = WorldEvent::Error {
            message: "batch failed".to_owned(),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json.get("event").unwrap(), "error");
        let payload = json.get("payload").unwrap();
        assert_eq!(payload.get("message").unwrap(), "batch failed");
    }

    #[test]
    fn metrics_event_nests_the_wire_shape() {
        let event = WorldEvent::PoolMetrics(MetricsSnapshot {
            timestamp: 1,
            pool_size: 2,
            pool_used: 1,
            pool_available: 1,
            pool_queue: 0,
            queries_count: 10,
            errors_count: 0,
            new_connections_count: 0,
        });
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json.get("event").unwrap(), "pool-metrics");
        let payload = json.get("payload").unwrap();
        assert_eq!(payload.get("poolSize").unwrap(), 2);
    }
}
