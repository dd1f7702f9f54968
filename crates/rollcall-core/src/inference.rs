//! Face detection and embedding capabilities.
//!
//! Model loading and inference live outside this crate; the decision loop
//! consumes these traits only.

use crate::types::{BoundingBox, Embedding, Frame};

/// Produces candidate face regions for a frame.
pub trait Detector: Send + Sync {
    /// Never fails; no detections is an empty list.
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox>;
}

/// Produces a fixed-length embedding for one face region.
pub trait Embedder: Send + Sync {
    /// `None` means the region is unusable (too small or unanalyzable).
    fn embed(&self, frame: &Frame, region: &BoundingBox) -> Option<Embedding>;
}
