//! On-disk persistence for the face index.
//!
//! Layout: a binary blob of little-endian f32 vectors (one slot per
//! internal idx), a sidecar JSON with metadata / id map / next_idx, and a
//! small text file with the last sync version. Every file is written via a
//! temp file + rename in its own directory; the sidecar is renamed last so
//! a crash mid-save leaves either the previous consistent state or a
//! blob/sidecar mismatch that `load` rejects into an empty index.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use common::{Embedding, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::index::{FaceIndex, FaceMeta, IndexPaths};

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    metadata: HashMap<usize, FaceMeta>,
    face_id_to_idx: HashMap<String, usize>,
    next_idx: usize,
}

pub(crate) fn save(index: &FaceIndex, paths: &IndexPaths) -> Result<(), IndexError> {
    let (vectors, metadata, face_id_to_idx, next_idx, version) = index.parts();

    let mut blob = Vec::with_capacity(vectors.len() * EMBEDDING_DIM * 4);
    for vector in vectors {
        blob.extend_from_slice(&vector.to_le_bytes());
    }
    write_atomic(&paths.vectors, &blob)?;

    write_atomic(&paths.version, version.unwrap_or("").as_bytes())?;

    let sidecar = Sidecar {
        metadata: metadata.clone(),
        face_id_to_idx: face_id_to_idx.clone(),
        next_idx,
    };
    write_atomic(&paths.metadata, &serde_json::to_vec_pretty(&sidecar)?)?;

    tracing::debug!(faces = index.count(), "face index persisted");
    Ok(())
}

pub(crate) fn load(paths: &IndexPaths) -> Result<FaceIndex, IndexError> {
    if !paths.metadata.exists() {
        return Ok(FaceIndex::empty());
    }

    let sidecar: Sidecar = serde_json::from_slice(&fs::read(&paths.metadata)?)?;

    let blob = fs::read(&paths.vectors)?;
    let slot_bytes = EMBEDDING_DIM * 4;
    if blob.len() != sidecar.next_idx * slot_bytes {
        return Err(IndexError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "vector blob holds {} bytes but sidecar expects {} slots",
                blob.len(),
                sidecar.next_idx
            ),
        )));
    }

    let mut vectors = Vec::with_capacity(sidecar.next_idx);
    for chunk in blob.chunks_exact(slot_bytes) {
        vectors.push(Embedding::from_le_bytes(chunk)?);
    }

    let version = match fs::read_to_string(&paths.version) {
        Ok(s) => {
            let trimmed = s.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    };

    Ok(FaceIndex::from_parts(
        vectors,
        sidecar.metadata,
        sidecar.face_id_to_idx,
        sidecar.next_idx,
        version,
    ))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), IndexError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FaceRecord, PersonStatus};

    fn paths(dir: &Path) -> IndexPaths {
        IndexPaths {
            vectors: dir.join("faces.index"),
            metadata: dir.join("faces_metadata.json"),
            version: dir.join("sync_version.txt"),
        }
    }

    fn embedding(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        v[(axis + 7) % EMBEDDING_DIM] = 0.5;
        Embedding::normalized(v).unwrap()
    }

    fn record(face_id: &str, axis: usize) -> FaceRecord {
        FaceRecord {
            face_id: face_id.to_string(),
            person_id: None,
            full_name: format!("Person {face_id}"),
            status: PersonStatus::Authorized,
            embedding: embedding(axis),
        }
    }

    #[test]
    fn save_load_round_trip_preserves_count_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let mut index = FaceIndex::open(paths.clone());
        index.add(record("f1", 0));
        index.add(record("f2", 9));
        index.remove("f1");
        index.set_version("2026-08-01T10:00:00Z".to_string());
        index.save().unwrap();

        let reloaded = FaceIndex::open(paths);
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.version(), Some("2026-08-01T10:00:00Z"));

        let before = index.search(&embedding(9), 1);
        let after = reloaded.search(&embedding(9), 1);
        assert_eq!(before[0].face_id, after[0].face_id);
        assert!((before[0].distance - after[0].distance).abs() < 1e-6);
    }

    #[test]
    fn missing_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = FaceIndex::open(paths(dir.path()));
        assert_eq!(index.count(), 0);
        assert_eq!(index.version(), None);
    }

    #[test]
    fn corrupt_sidecar_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        fs::write(&p.metadata, b"{ not json").unwrap();
        let index = FaceIndex::open(p);
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn blob_sidecar_mismatch_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());

        let mut index = FaceIndex::open(p.clone());
        index.add(record("f1", 0));
        index.save().unwrap();

        // Truncate the vector blob behind the sidecar's back.
        fs::write(&p.vectors, b"short").unwrap();
        let reloaded = FaceIndex::open(p);
        assert_eq!(reloaded.count(), 0);
    }

    #[test]
    fn save_into_missing_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("index");
        let mut index = FaceIndex::open(paths(&nested));
        index.add(record("f1", 3));
        index.save().unwrap();
        assert!(nested.join("faces_metadata.json").exists());
    }
}
