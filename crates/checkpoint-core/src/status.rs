//! State exposed to the presentation layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::EntryId;

/// Coarse state of the detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Scheduler inactive, or models/registry not loaded yet.
    Idle,
    /// Scheduler active, sampling frames.
    Probing,
    /// Match locked in, sampling suspended.
    ConfirmedHold,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::Probing => write!(f, "probing"),
            CycleState::ConfirmedHold => write!(f, "confirmed_hold"),
        }
    }
}

/// Status line for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Status {
    LoadingModels,
    LoadingRegistry,
    Ready { loaded: usize },
    LookingForFaces,
    Matched { name: String, confidence: u8 },
    NotMatched,
    DetectionError,
    DeviceError { message: String },
    LoadFailed { message: String },
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::LoadingModels => write!(f, "Loading face recognition models..."),
            Status::LoadingRegistry => write!(f, "Loading registry..."),
            Status::Ready { loaded } => write!(f, "Ready! {loaded} identities loaded."),
            Status::LookingForFaces => write!(f, "Looking for faces..."),
            Status::Matched { name, confidence } => write!(f, "Welcome, {name}! ({confidence}%)"),
            Status::NotMatched => write!(f, "Face not matched. Access denied."),
            Status::DetectionError => write!(f, "Detection error occurred"),
            Status::DeviceError { message } => write!(f, "Camera error: {message}"),
            Status::LoadFailed { message } => write!(f, "Model loading failed: {message}"),
            Status::Stopped => write!(f, "Detection stopped"),
        }
    }
}

/// Identity confirmed by the voter, shown while the hold window is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedIdentity {
    pub id: EntryId,
    pub display_name: String,
    pub distance: f32,
    pub confidence: u8,
    pub confirmed_at: DateTime<Utc>,
    /// Sequence number of the frame that produced the match.
    pub frame_sequence: Option<u32>,
}

/// Everything the presentation layer renders, captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: CycleState,
    pub status: Status,
    /// Seconds left in the hold window, absent outside a hold.
    pub countdown: Option<u64>,
    pub confidence: u8,
    pub matched: Option<MatchedIdentity>,
    pub registry_loaded: usize,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
            status: Status::LoadingModels,
            countdown: None,
            confidence: 0,
            matched: None,
            registry_loaded: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let matched = Status::Matched {
            name: "Alice".into(),
            confidence: 80,
        };
        assert_eq!(matched.to_string(), "Welcome, Alice! (80%)");
        assert_eq!(Status::Ready { loaded: 4 }.to_string(), "Ready! 4 identities loaded.");
        assert_eq!(Status::NotMatched.to_string(), "Face not matched. Access denied.");
    }

    #[test]
    fn test_state_display_matches_wire_name() {
        for state in [CycleState::Idle, CycleState::Probing, CycleState::ConfirmedHold] {
            let wire = serde_json::to_value(state).unwrap();
            assert_eq!(wire, state.to_string());
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_value(Snapshot::default()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["status"]["kind"], "loading_models");
        assert!(json["countdown"].is_null());
    }
}
