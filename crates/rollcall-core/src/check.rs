//! Time-boxed capture-and-match decision loop.
//!
//! One invocation opens the camera, examines frames and their face regions
//! in capture order until the first identity match or until the detection
//! budget runs out, and writes exactly one attendance entry: `Present`,
//! `Absent`, or `Error` when the camera cannot be opened.

use crate::attendance::{AttendanceLog, AttendanceLogEntry, CheckMode, Verdict};
use crate::capture::{CaptureDevice, CaptureSession};
use crate::inference::{Detector, Embedder};
use crate::schedule::ScheduleSlot;
use crate::settings::Settings;
use crate::store::{IdentityMatch, SimilarityStore};
use crate::types::Frame;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Pause between frames, bounding the capture rate.
const FRAME_PAUSE: Duration = Duration::from_millis(100);

/// Name recorded when nobody specific was expected.
const UNKNOWN_NAME: &str = "Unknown";

/// Parameters for one check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// Identity to verify. `None` identifies against the whole roster.
    pub target: Option<String>,
    pub detection_time: Duration,
    pub threshold: f32,
    /// Active schedule slot, used for the log's period label.
    pub slot: Option<ScheduleSlot>,
    pub mode: CheckMode,
}

impl CheckRequest {
    /// Check with the general detection budget from `settings`.
    pub fn from_settings(
        settings: &Settings,
        target: Option<String>,
        slot: Option<ScheduleSlot>,
        mode: CheckMode,
    ) -> Self {
        Self {
            target,
            detection_time: settings.detection_time(),
            threshold: settings.threshold,
            slot,
            mode,
        }
    }

    /// Operator-triggered check with the manual detection budget.
    pub fn manual(settings: &Settings, target: Option<String>, slot: Option<ScheduleSlot>) -> Self {
        Self {
            target,
            detection_time: settings.manual_detection_time(),
            threshold: settings.threshold,
            slot,
            mode: CheckMode::Manual,
        }
    }

    /// Scheduled check for the identity expected in `slot`.
    pub fn scheduled(slot: ScheduleSlot, detection_time: Duration, threshold: f32) -> Self {
        Self {
            target: Some(slot.faculty.clone()),
            detection_time,
            threshold,
            slot: Some(slot),
            mode: CheckMode::Auto,
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    /// Matched identity, when `verdict` is `Present`.
    pub name: Option<String>,
    /// Similarity of the match; 0 otherwise.
    pub confidence: f32,
}

impl CheckOutcome {
    pub fn matched(&self) -> bool {
        self.verdict == Verdict::Present
    }

    fn unmatched(verdict: Verdict) -> Self {
        Self {
            verdict,
            name: None,
            confidence: 0.0,
        }
    }
}

/// Anything that can run an attendance check.
pub trait AttendanceChecker: Send + Sync {
    fn run_check(&self, request: &CheckRequest) -> CheckOutcome;
}

pub struct DecisionLoop {
    camera: Arc<dyn CaptureDevice>,
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn Embedder>,
    store: Arc<RwLock<SimilarityStore>>,
    log: Arc<AttendanceLog>,
    frame_pause: Duration,
}

impl DecisionLoop {
    pub fn new(
        camera: Arc<dyn CaptureDevice>,
        detector: Arc<dyn Detector>,
        embedder: Arc<dyn Embedder>,
        store: Arc<RwLock<SimilarityStore>>,
        log: Arc<AttendanceLog>,
    ) -> Self {
        Self {
            camera,
            detector,
            embedder,
            store,
            log,
            frame_pause: FRAME_PAUSE,
        }
    }

    /// Override the inter-frame pause.
    pub fn with_frame_pause(mut self, pause: Duration) -> Self {
        self.frame_pause = pause;
        self
    }

    /// First region in `frame` that matches, in detector order.
    fn match_frame(&self, frame: &Frame, request: &CheckRequest) -> Option<IdentityMatch> {
        let regions = self.detector.detect(frame);
        tracing::trace!(seq = frame.sequence, regions = regions.len(), "frame analysed");

        for region in &regions {
            let Some(embedding) = self.embedder.embed(frame, region) else {
                tracing::trace!(?region, "region unusable; skipped");
                continue;
            };

            let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
            let result = match request.target.as_deref() {
                Some(target) => store.search_specific(&embedding, target, request.threshold),
                None => store.search(&embedding, request.threshold),
            };

            match result {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "embedding rejected by store; skipped");
                }
            }
        }

        None
    }

    fn record(&self, verdict: Verdict, name: &str, confidence: f32, request: &CheckRequest) {
        let entry = AttendanceLogEntry::now(verdict, name, confidence, request.slot.as_ref(), request.mode);
        if let Err(e) = self.log.append(&entry) {
            tracing::error!(error = %e, path = %self.log.path().display(), "failed to write attendance entry");
        }
    }
}

impl AttendanceChecker for DecisionLoop {
    fn run_check(&self, request: &CheckRequest) -> CheckOutcome {
        let expected = request.target.as_deref().unwrap_or(UNKNOWN_NAME);

        let mut session = match CaptureSession::acquire(self.camera.as_ref()) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, expected, mode = %request.mode, "camera unavailable");
                self.record(Verdict::Error, expected, 0.0, request);
                return CheckOutcome::unmatched(Verdict::Error);
            }
        };

        tracing::info!(
            expected,
            mode = %request.mode,
            budget_ms = request.detection_time.as_millis() as u64,
            threshold = request.threshold,
            "attendance check started"
        );

        let started = Instant::now();
        let mut frames = 0usize;

        while started.elapsed() < request.detection_time {
            let Some(frame) = session.read() else {
                tracing::debug!(frames, "capture ended before budget");
                break;
            };
            frames += 1;

            if let Some(found) = self.match_frame(&frame, request) {
                session.release();
                self.record(Verdict::Present, &found.name, found.similarity, request);
                tracing::info!(
                    name = %found.name,
                    similarity = found.similarity,
                    frames,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "present"
                );
                return CheckOutcome {
                    verdict: Verdict::Present,
                    name: Some(found.name),
                    confidence: found.similarity,
                };
            }

            std::thread::sleep(self.frame_pause);
        }

        session.release();
        self.record(Verdict::Absent, expected, 0.0, request);
        tracing::info!(expected, frames, "absent");
        CheckOutcome::unmatched(Verdict::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::parse_time;

    #[test]
    fn test_manual_request_uses_manual_budget() {
        let settings = Settings::default();
        let request = CheckRequest::manual(&settings, None, None);
        assert_eq!(request.detection_time, Duration::from_secs(5));
        assert_eq!(request.mode, CheckMode::Manual);
        assert!((request.threshold - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_settings_request_uses_general_budget() {
        let settings = Settings {
            detection_time_secs: 42,
            threshold: 0.7,
            ..Settings::default()
        };
        let request = CheckRequest::from_settings(&settings, Some("Dr. Smith".into()), None, CheckMode::Auto);
        assert_eq!(request.detection_time, Duration::from_secs(42));
        assert_eq!(request.target.as_deref(), Some("Dr. Smith"));
        assert_eq!(request.mode, CheckMode::Auto);
        assert!((request.threshold - 0.7).abs() < 1e-6);

        let default = CheckRequest::from_settings(&Settings::default(), None, None, CheckMode::Manual);
        assert_eq!(default.detection_time, Duration::from_secs(30));
    }

    #[test]
    fn test_scheduled_request_targets_slot_identity() {
        let slot = ScheduleSlot::new(2, parse_time("10:00").unwrap(), parse_time("11:00").unwrap(), "Prof. Johnson");
        let request = CheckRequest::scheduled(slot, Duration::from_secs(10), 0.6);
        assert_eq!(request.target.as_deref(), Some("Prof. Johnson"));
        assert_eq!(request.mode, CheckMode::Auto);
        assert_eq!(request.slot.unwrap().period, 2);
    }

    #[test]
    fn test_outcome_matched() {
        assert!(!CheckOutcome::unmatched(Verdict::Absent).matched());
        assert!(!CheckOutcome::unmatched(Verdict::Error).matched());
        let present = CheckOutcome { verdict: Verdict::Present, name: Some("a".into()), confidence: 0.9 };
        assert!(present.matched());
    }
}
