//! Driver status events.
//!
//! Broadcast over a `tokio::sync::broadcast` channel so hosts can follow
//! lifecycle transitions without polling. See
//! [`RingOutDriver::subscribe_status`](crate::RingOutDriver::subscribe_status).

use serde::{Deserialize, Serialize};

/// Emitted whenever the driver's lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusEvent {
    pub status: DriverStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    /// Drain thread active, sink being fed.
    Running,
    /// Drain thread stopped; the ring is intact and may be restarted.
    Stopped,
    /// Driver freed. No further events follow.
    Destroyed,
    /// The drain thread hit a fatal sink error and exited on its own.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = DriverStatusEvent {
            status: DriverStatus::Running,
            detail: Some("drain thread spawned".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "running");
        assert_eq!(json["detail"], "drain thread spawned");

        let round_trip: DriverStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, DriverStatus::Running);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<DriverStatus>(r#""Stopped""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
