use serde::{Deserialize, Serialize};

use crate::identity::{Decision, GateAction};

/// One access decision, as stored in the local log and uploaded to the
/// backend. `status` is the decision outcome for the person, `decision`
/// the physical action taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// ISO-8601 UTC timestamp of the decision.
    pub timestamp: String,
    pub gate_id: String,
    pub track_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: Decision,
    pub decision: GateAction,
    pub confidence: f32,
    /// Base64-encoded JPEG crop of the decisive face, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_crop_b64: Option<String>,
    #[serde(default)]
    pub synced: bool,
}
