use std::collections::HashMap;
use std::path::PathBuf;

use common::{Embedding, FaceRecord, PersonStatus};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::store;

/// On-disk locations for the three persisted artefacts.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    /// Binary blob of little-endian f32 vectors, one slot per internal idx.
    pub vectors: PathBuf,
    /// Sidecar JSON: metadata, face_id -> idx map, next_idx.
    pub metadata: PathBuf,
    /// Small text file holding the last sync version.
    pub version: PathBuf,
}

/// Metadata stored per face, mirrored into the sidecar file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMeta {
    pub face_id: String,
    pub person_id: Option<String>,
    pub full_name: String,
    pub status: PersonStatus,
}

/// One nearest-neighbour result, ascending by distance.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub face_id: String,
    pub distance: f32,
    pub meta: FaceMeta,
}

/// The face index. Callers serialise access themselves (the node wraps it
/// in a reader/writer lock: recognition workers share-lock `search`, the
/// sync worker takes the exclusive lock for batches of mutations).
pub struct FaceIndex {
    /// Vector slots by internal idx; a logically deleted face keeps its slot
    /// until the next rebuild, matching the metadata-driven liveness model.
    vectors: Vec<Embedding>,
    metadata: HashMap<usize, FaceMeta>,
    face_id_to_idx: HashMap<String, usize>,
    next_idx: usize,
    version: Option<String>,
    paths: Option<IndexPaths>,
}

impl FaceIndex {
    /// An empty, purely in-memory index (used by tests and as the fallback
    /// when persistence is unreadable).
    pub fn empty() -> Self {
        Self {
            vectors: Vec::new(),
            metadata: HashMap::new(),
            face_id_to_idx: HashMap::new(),
            next_idx: 0,
            version: None,
            paths: None,
        }
    }

    /// Open the index at the given paths.
    ///
    /// Loading is tolerant: missing or corrupt files re-initialise an empty
    /// index and log the fault; they never prevent startup.
    pub fn open(paths: IndexPaths) -> Self {
        let mut index = match store::load(&paths) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %e, "face index unreadable, starting empty");
                Self::empty()
            }
        };
        index.paths = Some(paths);
        tracing::info!(faces = index.count(), version = ?index.version, "face index opened");
        index
    }

    /// Add or update a face.
    ///
    /// A duplicate `face_id` updates metadata and leaves the stored vector
    /// as-is (replacing a vector in place requires a rebuild).
    pub fn add(&mut self, record: FaceRecord) {
        let meta = FaceMeta {
            face_id: record.face_id.clone(),
            person_id: record.person_id,
            full_name: record.full_name,
            status: record.status,
        };

        if let Some(&idx) = self.face_id_to_idx.get(&record.face_id) {
            tracing::debug!(face_id = %record.face_id, idx, "face metadata updated");
            self.metadata.insert(idx, meta);
            return;
        }

        let idx = self.next_idx;
        self.next_idx += 1;
        self.vectors.push(record.embedding);
        self.face_id_to_idx.insert(record.face_id.clone(), idx);
        self.metadata.insert(idx, meta);
        tracing::debug!(face_id = %record.face_id, idx, "face added");
    }

    /// Logically delete a face; its vector slot survives until a rebuild.
    /// Returns false when the face was not present.
    pub fn remove(&mut self, face_id: &str) -> bool {
        match self.face_id_to_idx.remove(face_id) {
            Some(idx) => {
                self.metadata.remove(&idx);
                tracing::debug!(face_id = %face_id, idx, "face removed");
                true
            }
            None => false,
        }
    }

    /// Exact k-nearest-neighbour scan, ascending by cosine distance.
    pub fn search(&self, query: &Embedding, k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .metadata
            .iter()
            .filter_map(|(&idx, meta)| {
                let vector = self.vectors.get(idx)?;
                Some(SearchHit {
                    face_id: meta.face_id.clone(),
                    distance: query.cosine_distance(vector),
                    meta: meta.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Number of live (non-deleted) faces.
    pub fn count(&self) -> usize {
        self.metadata.len()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_version(&mut self, version: String) {
        self.version = Some(version);
    }

    /// Count of live faces per status, for the idle dashboard and the
    /// session summary.
    pub fn status_counts(&self) -> (usize, usize) {
        let mut authorized = 0;
        let mut wanted = 0;
        for meta in self.metadata.values() {
            match meta.status {
                PersonStatus::Authorized => authorized += 1,
                PersonStatus::Wanted => wanted += 1,
            }
        }
        (authorized, wanted)
    }

    /// Persist all three artefacts atomically (tmp + rename each; the
    /// sidecar is renamed last and acts as the commit point).
    pub fn save(&self) -> Result<(), IndexError> {
        match &self.paths {
            Some(paths) => store::save(self, paths),
            None => Ok(()),
        }
    }

    pub(crate) fn parts(
        &self,
    ) -> (
        &[Embedding],
        &HashMap<usize, FaceMeta>,
        &HashMap<String, usize>,
        usize,
        Option<&str>,
    ) {
        (
            &self.vectors,
            &self.metadata,
            &self.face_id_to_idx,
            self.next_idx,
            self.version.as_deref(),
        )
    }

    pub(crate) fn from_parts(
        vectors: Vec<Embedding>,
        metadata: HashMap<usize, FaceMeta>,
        face_id_to_idx: HashMap<String, usize>,
        next_idx: usize,
        version: Option<String>,
    ) -> Self {
        Self {
            vectors,
            metadata,
            face_id_to_idx,
            next_idx,
            version,
            paths: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use common::EMBEDDING_DIM;

    fn embedding(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        Embedding::normalized(v).unwrap()
    }

    fn record(face_id: &str, name: &str, status: PersonStatus, axis: usize) -> FaceRecord {
        FaceRecord {
            face_id: face_id.to_string(),
            person_id: Some(format!("p-{face_id}")),
            full_name: name.to_string(),
            status,
            embedding: embedding(axis),
        }
    }

    #[test]
    fn nearest_neighbour_is_first() {
        let mut index = FaceIndex::empty();
        index.add(record("f1", "Amina", PersonStatus::Authorized, 0));
        index.add(record("f2", "Brian", PersonStatus::Authorized, 1));
        index.add(record("f3", "Chao", PersonStatus::Wanted, 2));

        let hits = index.search(&embedding(1), 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].face_id, "f2");
        assert_relative_eq!(hits[0].distance, 0.0, epsilon = 1e-6);
        assert!(hits[1].distance <= hits[2].distance);
    }

    #[test]
    fn duplicate_add_updates_metadata_only() {
        let mut index = FaceIndex::empty();
        index.add(record("f1", "Amina", PersonStatus::Authorized, 0));
        index.add(record("f1", "Amina W.", PersonStatus::Wanted, 5));

        assert_eq!(index.count(), 1);
        // The vector is unchanged: still nearest to axis 0, not axis 5.
        let hits = index.search(&embedding(0), 1);
        assert_relative_eq!(hits[0].distance, 0.0, epsilon = 1e-6);
        assert_eq!(hits[0].meta.full_name, "Amina W.");
        assert_eq!(hits[0].meta.status, PersonStatus::Wanted);
    }

    #[test]
    fn removed_face_is_never_returned() {
        let mut index = FaceIndex::empty();
        index.add(record("f1", "Amina", PersonStatus::Authorized, 0));
        index.add(record("f2", "Brian", PersonStatus::Authorized, 1));

        assert!(index.remove("f1"));
        assert!(!index.remove("f1"));
        assert_eq!(index.count(), 1);

        let hits = index.search(&embedding(0), 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].face_id, "f2");
    }

    #[test]
    fn re_adding_after_remove_assigns_fresh_slot() {
        let mut index = FaceIndex::empty();
        index.add(record("f1", "Amina", PersonStatus::Authorized, 0));
        index.remove("f1");
        index.add(record("f1", "Amina", PersonStatus::Authorized, 3));

        let hits = index.search(&embedding(3), 1);
        assert_eq!(hits[0].face_id, "f1");
        assert_relative_eq!(hits[0].distance, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn search_on_empty_index_is_empty() {
        let index = FaceIndex::empty();
        assert!(index.search(&embedding(0), 1).is_empty());
        assert!(index.search(&embedding(0), 0).is_empty());
    }

    #[test]
    fn status_counts_track_live_records() {
        let mut index = FaceIndex::empty();
        index.add(record("f1", "Amina", PersonStatus::Authorized, 0));
        index.add(record("f2", "Brian", PersonStatus::Wanted, 1));
        index.add(record("f3", "Chao", PersonStatus::Wanted, 2));
        index.remove("f2");
        assert_eq!(index.status_counts(), (1, 1));
    }
}
