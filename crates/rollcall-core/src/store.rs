//! Identity similarity store.
//!
//! Holds one embedding per known identity as three parallel sequences
//! (`names`, `embeddings`, `image_refs`) plus a derived [`FlatIndex`].
//! Both artifacts are persisted side by side and every mutation rebuilds
//! the index and saves before the in-memory state is replaced, so a failed
//! save leaves the store exactly as it was.
//!
//! Names are not required to be unique. Lookups by name (delete, targeted
//! search) resolve to the first record in insertion order.

use crate::index::{FlatIndex, Neighbor};
use crate::persist::{write_atomic, LoadOutcome};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Neighbors examined by [`SimilarityStore::search_specific`].
const SPECIFIC_SEARCH_TOP_K: usize = 5;

const RECORDS_FILE: &str = "identities.json";
const INDEX_FILE: &str = "identities.index.json";
const IMAGES_DIR: &str = "images";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Locations of the store's persisted artifacts.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub records: PathBuf,
    pub index: PathBuf,
    pub images_dir: PathBuf,
}

impl StorePaths {
    /// Standard layout under a data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            records: dir.join(RECORDS_FILE),
            index: dir.join(INDEX_FILE),
            images_dir: dir.join(IMAGES_DIR),
        }
    }
}

/// One stored identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
    pub image_ref: String,
}

/// The persisted record set: three sequences kept at equal length with
/// matching positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecords {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
    image_refs: Vec<String>,
}

impl IdentityRecords {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn image_refs(&self) -> &[String] {
        &self.image_refs
    }

    pub fn get(&self, idx: usize) -> Option<IdentityRecord> {
        Some(IdentityRecord {
            name: self.names.get(idx)?.clone(),
            embedding: self.embeddings.get(idx)?.clone(),
            image_ref: self.image_refs.get(idx)?.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = IdentityRecord> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// First position whose name matches exactly.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Common embedding dimension, if any records exist.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Embedding::dim)
    }

    fn push(&mut self, record: IdentityRecord) {
        self.names.push(record.name);
        self.embeddings.push(record.embedding);
        self.image_refs.push(record.image_ref);
    }

    fn remove(&mut self, idx: usize) -> IdentityRecord {
        IdentityRecord {
            name: self.names.remove(idx),
            embedding: self.embeddings.remove(idx),
            image_ref: self.image_refs.remove(idx),
        }
    }

    /// Parallel lengths agree and all embeddings share one finite dimension.
    fn check_invariants(&self) -> Result<(), String> {
        if self.names.len() != self.embeddings.len() || self.names.len() != self.image_refs.len() {
            return Err(format!(
                "parallel sequences disagree: {} names, {} embeddings, {} image refs",
                self.names.len(),
                self.embeddings.len(),
                self.image_refs.len()
            ));
        }
        if let Some(dim) = self.dimension() {
            if let Some(bad) = self.embeddings.iter().position(|e| e.dim() != dim || !e.is_finite()) {
                return Err(format!("embedding {bad} is malformed (expected {dim} finite values)"));
            }
        }
        Ok(())
    }
}

/// Result of [`load`].
#[derive(Debug)]
pub struct StoreSnapshot {
    pub records: IdentityRecords,
    pub index: Option<FlatIndex>,
    pub outcome: LoadOutcome,
    /// The index artifact was missing or stale and was rebuilt from records.
    pub index_rebuilt: bool,
}

impl StoreSnapshot {
    fn empty(outcome: LoadOutcome) -> Self {
        Self {
            records: IdentityRecords::default(),
            index: None,
            outcome,
            index_rebuilt: false,
        }
    }
}

/// Read persisted records and index. Never fails: unreadable records fall
/// back to an empty store, and an index that is missing or disagrees with
/// the records is rebuilt from them.
pub fn load(paths: &StorePaths) -> StoreSnapshot {
    let raw = match std::fs::read(&paths.records) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StoreSnapshot::empty(LoadOutcome::Defaulted);
        }
        Err(e) => {
            tracing::warn!(path = %paths.records.display(), error = %e, "failed to read identity records");
            return StoreSnapshot::empty(LoadOutcome::Recovered { reason: e.to_string() });
        }
    };

    let records: IdentityRecords = match serde_json::from_slice(&raw) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(path = %paths.records.display(), error = %e, "identity records unreadable");
            return StoreSnapshot::empty(LoadOutcome::Recovered { reason: e.to_string() });
        }
    };

    if let Err(reason) = records.check_invariants() {
        tracing::warn!(path = %paths.records.display(), %reason, "identity records inconsistent");
        return StoreSnapshot::empty(LoadOutcome::Recovered { reason });
    }

    let stored_index = std::fs::read(&paths.index)
        .ok()
        .and_then(|raw| serde_json::from_slice::<FlatIndex>(&raw).ok())
        .filter(|index| index.is_consistent_with(records.embeddings()));

    let (index, index_rebuilt) = match stored_index {
        Some(index) => (Some(index), false),
        None => {
            let rebuilt = FlatIndex::build(records.embeddings());
            if rebuilt.is_some() {
                tracing::warn!(path = %paths.index.display(), "similarity index missing or stale; rebuilt from records");
            }
            (rebuilt.clone(), rebuilt.is_some())
        }
    };

    StoreSnapshot {
        records,
        index,
        outcome: LoadOutcome::Loaded,
        index_rebuilt,
    }
}

/// Persist records and index together. An absent index removes the index
/// artifact so a stale one is never read back.
///
/// The index goes first. Records are authoritative: if the index write
/// fails the records on disk are untouched, and if the records write fails
/// the new index disagrees with the old records and [`load`] rebuilds it.
pub fn save(
    paths: &StorePaths,
    records: &IdentityRecords,
    index: Option<&FlatIndex>,
) -> Result<(), StoreError> {
    let records_json = serde_json::to_vec(records)?;
    match index {
        Some(index) => write_atomic(&paths.index, &serde_json::to_vec(index)?)?,
        None => remove_if_exists(&paths.index)?,
    }
    write_atomic(&paths.records, &records_json)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// A positive identification.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub name: String,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

/// Summary of a [`SimilarityStore::clear`].
#[derive(Debug, Default)]
pub struct ClearReport {
    pub files_removed: usize,
    pub errors: Vec<String>,
}

pub struct SimilarityStore {
    paths: StorePaths,
    records: IdentityRecords,
    index: Option<FlatIndex>,
}

impl SimilarityStore {
    /// Load the store from `paths`, falling back to an empty store.
    pub fn open(paths: StorePaths) -> (Self, LoadOutcome) {
        let snapshot = load(&paths);
        tracing::info!(
            identities = snapshot.records.len(),
            outcome = ?snapshot.outcome,
            index_rebuilt = snapshot.index_rebuilt,
            "similarity store opened"
        );
        let store = Self {
            paths,
            records: snapshot.records,
            index: snapshot.index,
        };
        (store, snapshot.outcome)
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> &[String] {
        self.records.names()
    }

    pub fn records(&self) -> &IdentityRecords {
        &self.records
    }

    /// Append an identity, rebuild the index and persist.
    pub fn add(
        &mut self,
        name: &str,
        embedding: Embedding,
        image_ref: &str,
    ) -> Result<(), StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("name must not be empty".into()));
        }
        self.validate_embedding(&embedding)?;

        let mut records = self.records.clone();
        records.push(IdentityRecord {
            name: name.to_string(),
            embedding,
            image_ref: image_ref.to_string(),
        });

        self.commit(records)?;
        tracing::info!(name, identities = self.len(), "identity added");
        Ok(())
    }

    /// Import `photo` and add the identity referencing it. The stored copy
    /// is removed again if the identity cannot be added.
    pub fn add_with_image(
        &mut self,
        name: &str,
        embedding: Embedding,
        photo: &Path,
    ) -> Result<String, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("name must not be empty".into()));
        }
        self.validate_embedding(&embedding)?;

        let image_ref = self.import_image(photo)?;
        if let Err(e) = self.add(name, embedding, &image_ref) {
            let orphan = self.image_path(&image_ref);
            if let Err(rm) = remove_if_exists(&orphan) {
                tracing::warn!(path = %orphan.display(), error = %rm, "could not remove unreferenced image");
            }
            return Err(e);
        }
        Ok(image_ref)
    }

    /// Remove the first identity named exactly `name`, together with its
    /// stored image.
    pub fn delete(&mut self, name: &str) -> Result<IdentityRecord, StoreError> {
        let idx = self
            .records
            .position(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let mut records = self.records.clone();
        let removed = records.remove(idx);
        self.commit(records)?;

        if !removed.image_ref.is_empty() {
            let image = self.image_path(&removed.image_ref);
            if let Err(e) = remove_if_exists(&image) {
                tracing::warn!(path = %image.display(), error = %e, "could not delete stored image");
            }
        }

        tracing::info!(name, identities = self.len(), "identity deleted");
        Ok(removed)
    }

    /// Delete every record, stored image, and persisted artifact.
    pub fn clear(&mut self) -> ClearReport {
        let mut report = ClearReport::default();

        if let Ok(entries) = std::fs::read_dir(&self.paths.images_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => report.files_removed += 1,
                    Err(e) => report.errors.push(format!("failed to remove {}: {e}", path.display())),
                }
            }
        }

        for path in [&self.paths.records, &self.paths.index] {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => report.files_removed += 1,
                Err(e) => report.errors.push(format!("failed to remove {}: {e}", path.display())),
            }
        }

        self.records = IdentityRecords::default();
        self.index = None;

        tracing::info!(
            files_removed = report.files_removed,
            errors = report.errors.len(),
            "similarity store cleared"
        );
        report
    }

    /// Best match for `query` across all identities, if it clears `threshold`.
    pub fn search(
        &self,
        query: &Embedding,
        threshold: f32,
    ) -> Result<Option<IdentityMatch>, StoreError> {
        let Some(index) = self.index.as_ref().filter(|_| !self.is_empty()) else {
            return Ok(None);
        };
        let query = self.prepare_query(index, query)?;

        let Some(best) = index.search(&query.values, 1).into_iter().next() else {
            return Ok(None);
        };

        Ok(self.accept(best, threshold))
    }

    /// Verify that `query` is `target_name`.
    ///
    /// Only the top-`k` neighbors (`k = min(5, len)`) are examined: the
    /// target must appear among them and clear `threshold`. A target that
    /// would clear the threshold but ranks below `k` is a non-match.
    pub fn search_specific(
        &self,
        query: &Embedding,
        target_name: &str,
        threshold: f32,
    ) -> Result<Option<IdentityMatch>, StoreError> {
        let Some(index) = self.index.as_ref().filter(|_| !self.is_empty()) else {
            return Ok(None);
        };
        let Some(target_idx) = self.records.position(target_name) else {
            return Ok(None);
        };
        let query = self.prepare_query(index, query)?;

        let k = SPECIFIC_SEARCH_TOP_K.min(self.len());
        let hit = index
            .search(&query.values, k)
            .into_iter()
            .find(|n| n.index == target_idx);

        Ok(hit.and_then(|n| self.accept(n, threshold)))
    }

    /// Decode `source` and store it as a JPEG in the images directory.
    /// Returns the reference to pass to [`add`](Self::add).
    pub fn import_image(&self, source: &Path) -> Result<String, StoreError> {
        let img = image::open(source)?;
        let image_ref = format!("{}.jpg", uuid::Uuid::new_v4().simple());

        std::fs::create_dir_all(&self.paths.images_dir)?;
        let dest = self.paths.images_dir.join(&image_ref);
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .save_with_format(&dest, image::ImageFormat::Jpeg)?;

        tracing::debug!(source = %source.display(), dest = %dest.display(), "image imported");
        Ok(image_ref)
    }

    /// Filesystem location of a stored image. Only the file-name component of
    /// `image_ref` is honoured.
    pub fn image_path(&self, image_ref: &str) -> PathBuf {
        let file = Path::new(image_ref).file_name().unwrap_or_default();
        self.paths.images_dir.join(file)
    }

    fn accept(&self, neighbor: Neighbor, threshold: f32) -> Option<IdentityMatch> {
        let similarity = neighbor.similarity();
        if similarity < threshold {
            return None;
        }
        let name = self.records.names().get(neighbor.index)?.clone();
        Some(IdentityMatch { name, similarity })
    }

    fn prepare_query(&self, index: &FlatIndex, query: &Embedding) -> Result<Embedding, StoreError> {
        if query.dim() != index.dimension() {
            return Err(StoreError::Validation(format!(
                "query has {} dimensions, store holds {}",
                query.dim(),
                index.dimension()
            )));
        }
        if !query.is_finite() {
            return Err(StoreError::Validation("query contains non-finite values".into()));
        }
        Ok(query.normalized())
    }

    fn validate_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dim() == 0 {
            return Err(StoreError::Validation("embedding must not be empty".into()));
        }
        if !embedding.is_finite() {
            return Err(StoreError::Validation("embedding contains non-finite values".into()));
        }
        if let Some(dim) = self.records.dimension() {
            if embedding.dim() != dim {
                return Err(StoreError::Validation(format!(
                    "embedding has {} dimensions, store holds {dim}",
                    embedding.dim()
                )));
            }
        }
        Ok(())
    }

    /// Rebuild the index for `records`, persist both, then swap them in.
    fn commit(&mut self, records: IdentityRecords) -> Result<(), StoreError> {
        let index = FlatIndex::build(records.embeddings());
        save(&self.paths, &records, index.as_ref())?;
        self.records = records;
        self.index = index;
        Ok(())
    }
}
