//! Engine lifecycle events, broadcast to WebSocket subscribers.
//!
//! These are facts about state transitions, not commands; the wire shape
//! is the serialized form below.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::JobStatus;

/// Scheduler lifecycle state as exposed on the queue surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Running => f.write_str("running"),
            QueueState::Paused => f.write_str("paused"),
            QueueState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job changed status; `result` rides along on completion.
    JobUpdate {
        job_id: Uuid,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// The scheduler lifecycle changed.
    QueueStatus { status: QueueState, message: String },

    /// Progress of a profile update action.
    ProfileUpdateStatus {
        id: Uuid,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_update_wire_shape() {
        let event = EngineEvent::JobUpdate {
            job_id: Uuid::nil(),
            status: JobStatus::Completed,
            result: Some(serde_json::json!({"tweet_id": "123"})),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_update");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["result"]["tweet_id"], "123");
    }

    #[test]
    fn queue_status_wire_shape() {
        let event = EngineEvent::QueueStatus {
            status: QueueState::Paused,
            message: "paused by operator".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queue_status");
        assert_eq!(json["status"], "paused");
    }

    #[test]
    fn absent_result_is_omitted() {
        let event = EngineEvent::JobUpdate {
            job_id: Uuid::nil(),
            status: JobStatus::Running,
            result: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("result").is_none());
    }

    #[test]
    fn events_roundtrip() {
        let events = vec![
            EngineEvent::JobUpdate {
                job_id: Uuid::new_v4(),
                status: JobStatus::Failed,
                result: None,
            },
            EngineEvent::QueueStatus {
                status: QueueState::Running,
                message: "started".to_string(),
            },
            EngineEvent::ProfileUpdateStatus {
                id: Uuid::new_v4(),
                status: JobStatus::Failed,
                error: Some("invalid media".to_string()),
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let _: EngineEvent = serde_json::from_str(&json).unwrap();
        }
    }
}
