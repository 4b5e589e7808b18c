//! Wire types for the backend sync contract.

use common::{AccessEvent, Embedding, FaceRecord, PersonStatus};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Response of `GET /api/v1/faces/sync`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    /// Opaque monotone version token (an ISO-8601 timestamp in practice).
    pub version: String,
    #[serde(default)]
    pub upserts: Vec<FaceUpsert>,
    #[serde(default)]
    pub deletes: Vec<String>,
    #[serde(default)]
    pub count: usize,
}

/// One enrolled face as shipped by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct FaceUpsert {
    pub id: String,
    #[serde(default)]
    pub person_id: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub status: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FaceUpsert {
    /// Validate into a storable record. Rejects unknown statuses (UNKNOWN is
    /// a decision outcome and is never stored) and malformed embeddings.
    pub fn into_record(self) -> Result<FaceRecord, IndexError> {
        let status: PersonStatus = self.status.parse().map_err(|_| IndexError::InvalidStatus {
            face_id: self.id.clone(),
            status: self.status.clone(),
        })?;
        Ok(FaceRecord {
            embedding: Embedding::normalized(self.embedding)?,
            face_id: self.id,
            person_id: self.person_id,
            full_name: self.full_name,
            status,
        })
    }
}

/// Response of `GET /api/v1/faces/count`.
#[derive(Debug, Clone, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Body of `POST /api/v1/access-logs`.
#[derive(Debug, Serialize)]
pub struct LogUploadRequest<'a> {
    pub logs: &'a [AccessEvent],
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EMBEDDING_DIM;

    fn payload(status: &str) -> serde_json::Value {
        serde_json::json!({
            "version": "2026-08-01T09:00:00Z",
            "upserts": [{
                "id": "f-1",
                "person_id": "p-1",
                "full_name": "Amina Diallo",
                "status": status,
                "embedding": vec![0.1f32; EMBEDDING_DIM],
            }],
            "deletes": ["f-9"],
            "count": 1
        })
    }

    #[test]
    fn sync_response_parses() {
        let response: SyncResponse = serde_json::from_value(payload("AUTHORIZED")).unwrap();
        assert_eq!(response.version, "2026-08-01T09:00:00Z");
        assert_eq!(response.upserts.len(), 1);
        assert_eq!(response.deletes, vec!["f-9".to_string()]);

        let record = response.upserts.into_iter().next().unwrap().into_record().unwrap();
        assert_eq!(record.face_id, "f-1");
        assert_eq!(record.status, PersonStatus::Authorized);
        assert!((record.embedding.norm() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn missing_delta_fields_default_to_empty() {
        let response: SyncResponse =
            serde_json::from_value(serde_json::json!({ "version": "v1" })).unwrap();
        assert!(response.upserts.is_empty());
        assert!(response.deletes.is_empty());
    }

    #[test]
    fn unknown_status_is_not_storable() {
        let response: SyncResponse = serde_json::from_value(payload("UNKNOWN")).unwrap();
        let err = response.upserts.into_iter().next().unwrap().into_record();
        assert!(matches!(err, Err(IndexError::InvalidStatus { .. })));
    }

    #[test]
    fn wrong_dimension_embedding_rejected() {
        let mut value = payload("WANTED");
        value["upserts"][0]["embedding"] = serde_json::json!([0.5, 0.5]);
        let response: SyncResponse = serde_json::from_value(value).unwrap();
        assert!(response.upserts.into_iter().next().unwrap().into_record().is_err());
    }
}
