//! Fakes for the external collaborators of the decision loop.

#![allow(dead_code)]

use rollcall_core::{
    AttendanceLog, BoundingBox, CaptureDevice, CaptureError, CaptureHandle, Detector, Embedder,
    Embedding, Frame, SimilarityStore, StorePaths,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub const DIM: usize = 8;

/// Unit vector along axis `i`.
pub fn axis(i: usize) -> Embedding {
    let mut values = vec![0.0; DIM];
    values[i % DIM] = 1.0;
    Embedding::new(values)
}

pub fn frame(sequence: u32) -> Frame {
    Frame {
        data: vec![128; 16],
        width: 4,
        height: 4,
        sequence,
    }
}

#[derive(Default)]
pub struct CameraCounters {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub releases: AtomicUsize,
}

/// Camera yielding frames with increasing sequence numbers, optionally
/// ending after `limit` frames.
pub struct FakeCamera {
    pub counters: Arc<CameraCounters>,
    limit: Option<u32>,
    fail_open: bool,
}

impl FakeCamera {
    pub fn endless() -> Self {
        Self {
            counters: Arc::default(),
            limit: None,
            fail_open: false,
        }
    }

    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::endless()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::endless()
        }
    }
}

impl CaptureDevice for FakeCamera {
    fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if self.fail_open {
            return Err(CaptureError::DeviceNotFound("/dev/video-fake".into()));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            counters: Arc::clone(&self.counters),
            limit: self.limit,
            next: 0,
        }))
    }
}

struct FakeHandle {
    counters: Arc<CameraCounters>,
    limit: Option<u32>,
    next: u32,
}

impl CaptureHandle for FakeHandle {
    fn read(&mut self) -> Option<Frame> {
        if self.limit.is_some_and(|limit| self.next >= limit) {
            return None;
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        let f = frame(self.next);
        self.next += 1;
        Some(f)
    }

    fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reports `faces` regions per frame; each region's confidence carries its
/// position so the embedder can tell them apart.
pub struct FakeDetector {
    pub faces: usize,
}

impl Detector for FakeDetector {
    fn detect(&self, _frame: &Frame) -> Vec<BoundingBox> {
        (0..self.faces)
            .map(|i| BoundingBox {
                x: i as f32 * 10.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: i as f32,
            })
            .collect()
    }
}

/// Embeddings keyed by `(frame sequence, region position)`. Unknown keys
/// yield `None`, as an embedder would for an unusable crop.
#[derive(Default)]
pub struct ScriptedEmbedder {
    script: Mutex<HashMap<(u32, usize), Embedding>>,
    pub calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn set(&self, sequence: u32, region: usize, embedding: Embedding) {
        self.script
            .lock()
            .unwrap()
            .insert((sequence, region), embedding);
    }
}

impl Embedder for ScriptedEmbedder {
    fn embed(&self, frame: &Frame, face: &BoundingBox) -> Option<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (frame.sequence, face.confidence as usize);
        self.script.lock().unwrap().get(&key).cloned()
    }
}

/// Embedder returning the same vector for every region.
pub struct ConstantEmbedder(pub Embedding);

impl Embedder for ConstantEmbedder {
    fn embed(&self, _frame: &Frame, _face: &BoundingBox) -> Option<Embedding> {
        Some(self.0.clone())
    }
}

/// Store in `dir` holding `roster`, where identity `i` has embedding `axis(i)`.
pub fn roster_store(dir: &Path, roster: &[&str]) -> Arc<RwLock<SimilarityStore>> {
    let (mut store, _) = SimilarityStore::open(StorePaths::in_dir(dir));
    for (i, name) in roster.iter().enumerate() {
        store.add(name, axis(i), "").unwrap();
    }
    Arc::new(RwLock::new(store))
}

pub fn log_in(dir: &Path) -> Arc<AttendanceLog> {
    Arc::new(AttendanceLog::new(dir.join("attendance_log.jsonl")))
}
