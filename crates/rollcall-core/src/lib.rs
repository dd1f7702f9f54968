//! rollcall-core: Identity matching and scheduling engine.
//!
//! Holds the similarity store of known identities, the period resolver,
//! the time-boxed decision loop and the background orchestrator that drives
//! scheduled checks. Face detection, embedding and frame capture are
//! external and plug in through the traits in [`inference`] and [`capture`].

pub mod attendance;
pub mod capture;
pub mod check;
pub mod index;
pub mod inference;
pub mod orchestrator;
pub mod persist;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod types;

pub use attendance::{AttendanceLog, AttendanceLogEntry, CheckMode, Verdict};
pub use capture::{CaptureDevice, CaptureError, CaptureHandle, CaptureSession};
pub use check::{AttendanceChecker, CheckOutcome, CheckRequest, DecisionLoop};
pub use inference::{Detector, Embedder};
pub use orchestrator::{AutoOrchestrator, AutoTiming, OrchestratorError, OrchestratorState};
pub use persist::LoadOutcome;
pub use schedule::{Schedule, ScheduleSlot, ScheduleStore, SlotResolver};
pub use settings::{Settings, SettingsPatch, SettingsStore};
pub use store::{IdentityMatch, SimilarityStore, StoreError, StorePaths};
pub use types::{BoundingBox, Embedding, Frame};
