use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

/// Status of a person as stored in the face database.
///
/// `UNKNOWN` is deliberately not representable here: it is a decision
/// outcome, never a stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonStatus {
    Authorized,
    Wanted,
}

impl std::fmt::Display for PersonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersonStatus::Authorized => write!(f, "AUTHORIZED"),
            PersonStatus::Wanted => write!(f, "WANTED"),
        }
    }
}

impl std::str::FromStr for PersonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTHORIZED" => Ok(PersonStatus::Authorized),
            "WANTED" => Ok(PersonStatus::Wanted),
            _ => Err(format!("Invalid person status: {}", s)),
        }
    }
}

/// Outcome of the decision engine for one recognition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Authorized,
    Wanted,
    Unknown,
}

impl Decision {
    /// The physical action each decision maps to. WANTED opens the gate so
    /// the person can be captured on the inside.
    pub fn gate_action(&self) -> GateAction {
        match self {
            Decision::Authorized | Decision::Wanted => GateAction::Open,
            Decision::Unknown => GateAction::Close,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Authorized => write!(f, "AUTHORIZED"),
            Decision::Wanted => write!(f, "WANTED"),
            Decision::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTHORIZED" => Ok(Decision::Authorized),
            "WANTED" => Ok(Decision::Wanted),
            "UNKNOWN" => Ok(Decision::Unknown),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// Physical gate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    Open,
    Close,
}

impl std::fmt::Display for GateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateAction::Open => write!(f, "OPEN"),
            GateAction::Close => write!(f, "CLOSE"),
        }
    }
}

impl std::str::FromStr for GateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(GateAction::Open),
            "CLOSE" => Ok(GateAction::Close),
            _ => Err(format!("Invalid gate action: {}", s)),
        }
    }
}

/// An enrolled face as held by the local face index.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub face_id: String,
    pub person_id: Option<String>,
    pub full_name: String,
    pub status: PersonStatus,
    pub embedding: Embedding,
}

/// Identity attached to a track once recognition has completed.
///
/// `status` is the decision outcome: a track that exhausted its attempts
/// carries `Decision::Unknown` with no face/person fields.
#[derive(Debug, Clone)]
pub struct Identity {
    pub face_id: Option<String>,
    pub person_id: Option<String>,
    pub full_name: Option<String>,
    pub status: Decision,
    pub confidence: f32,
}

impl Identity {
    pub fn unknown() -> Self {
        Self {
            face_id: None,
            person_id: None,
            full_name: None,
            status: Decision::Unknown,
            confidence: 0.0,
        }
    }
}
