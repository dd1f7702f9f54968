//! Time-of-day schedule and period resolution.
//!
//! Times are compared at minute granularity: wall-clock time is truncated to
//! `HH:MM` before matching. Slot intervals are half-open, `[start, end)`, and
//! the first matching slot in list order wins. Overlapping slots are allowed.

use crate::persist::{write_atomic, LoadOutcome};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TIME_FORMAT: &str = "%H:%M";

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid time {0:?}: expected HH:MM")]
    InvalidTime(String),
}

/// One scheduled period and the identity expected during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub period: u32,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub faculty: String,
}

impl ScheduleSlot {
    pub fn new(period: u32, start: NaiveTime, end: NaiveTime, faculty: impl Into<String>) -> Self {
        Self {
            period,
            start,
            end,
            faculty: faculty.into(),
        }
    }

    /// Label used in attendance log entries.
    pub fn label(&self) -> String {
        format!("Period {}", self.period)
    }

    /// Whether `time` falls inside `[start, end)` at minute granularity.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let now = minute_of_day(time);
        minute_of_day(self.start) <= now && now < minute_of_day(self.end)
    }
}

/// The next slot to start, and how far away it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpcomingSlot<'a> {
    pub slot: &'a ScheduleSlot,
    pub minutes_until: u32,
}

/// Ordered list of slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    slots: Vec<ScheduleSlot>,
}

impl Schedule {
    pub fn new(slots: Vec<ScheduleSlot>) -> Self {
        Self { slots }
    }

    /// Built-in schedule written when none exists yet.
    pub fn builtin() -> Self {
        let slot = |period, start: (u32, u32), end: (u32, u32), faculty: &str| {
            ScheduleSlot::new(period, hm(start.0, start.1), hm(end.0, end.1), faculty)
        };
        Self::new(vec![
            slot(1, (9, 0), (10, 0), "Dr. Smith"),
            slot(2, (10, 0), (11, 0), "Prof. Johnson"),
            slot(3, (11, 0), (12, 0), "Dr. Brown"),
            slot(4, (13, 0), (14, 0), "Ms. Davis"),
        ])
    }

    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// First slot in list order with `start <= now < end`.
    pub fn current_period(&self, now: NaiveTime) -> Option<&ScheduleSlot> {
        self.slots.iter().find(|slot| slot.contains(now))
    }

    /// Slot with the smallest strictly positive number of minutes until its
    /// start. No day wrap: if every start is at or before `now`, there is no
    /// next slot. Ties go to the earlier slot in list order.
    pub fn next_period(&self, now: NaiveTime) -> Option<UpcomingSlot<'_>> {
        let now = minute_of_day(now) as i64;
        let mut best: Option<UpcomingSlot<'_>> = None;

        for slot in &self.slots {
            let diff = minute_of_day(slot.start) as i64 - now;
            if diff <= 0 {
                continue;
            }
            let closer = best.map_or(true, |b| diff < b.minutes_until as i64);
            if closer {
                best = Some(UpcomingSlot {
                    slot,
                    minutes_until: diff as u32,
                });
            }
        }

        best
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Parse an `HH:MM` time of day.
pub fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| ScheduleError::InvalidTime(raw.to_string()))
}

mod hhmm {
    use super::TIME_FORMAT;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Position of the first entry that does not parse as a slot, when `raw`
/// is at least a JSON array.
fn first_invalid_slot(raw: &[u8]) -> Option<usize> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(raw).ok()?;
    entries
        .into_iter()
        .position(|entry| serde_json::from_value::<ScheduleSlot>(entry).is_err())
}

/// Source of the slot active right now.
pub trait SlotResolver: Send + Sync {
    fn active_slot(&self) -> Option<ScheduleSlot>;
}

/// File-backed schedule.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the schedule. A missing file is created with the built-in
    /// schedule; an unreadable one falls back to it without overwriting.
    pub fn load(&self) -> (Schedule, LoadOutcome) {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let schedule = Schedule::builtin();
                if let Err(e) = self.save(&schedule) {
                    tracing::warn!(path = %self.path.display(), error = %e, "could not write default schedule");
                }
                return (schedule, LoadOutcome::Defaulted);
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read schedule");
                return (Schedule::builtin(), LoadOutcome::Recovered { reason: e.to_string() });
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(schedule) => (schedule, LoadOutcome::Loaded),
            Err(e) => {
                let reason = match first_invalid_slot(&raw) {
                    Some(slot) => {
                        tracing::warn!(path = %self.path.display(), slot, error = %e, "schedule slot invalid; using built-in schedule");
                        format!("slot {slot}: {e}")
                    }
                    None => {
                        tracing::warn!(path = %self.path.display(), error = %e, "schedule unreadable; using built-in schedule");
                        e.to_string()
                    }
                };
                (Schedule::builtin(), LoadOutcome::Recovered { reason })
            }
        }
    }

    pub fn save(&self, schedule: &Schedule) -> Result<(), ScheduleError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(schedule)?)?;
        tracing::info!(path = %self.path.display(), slots = schedule.slots().len(), "schedule saved");
        Ok(())
    }

    /// Active slot at local wall-clock time.
    pub fn current_period_now(&self) -> Option<ScheduleSlot> {
        let now = chrono::Local::now().time();
        self.load().0.current_period(now).cloned()
    }

    /// Next slot at local wall-clock time, with the minute gap.
    pub fn next_period_now(&self) -> Option<(ScheduleSlot, u32)> {
        let now = chrono::Local::now().time();
        let (schedule, _) = self.load();
        schedule
            .next_period(now)
            .map(|next| (next.slot.clone(), next.minutes_until))
    }
}

impl SlotResolver for ScheduleStore {
    fn active_slot(&self) -> Option<ScheduleSlot> {
        self.current_period_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> NaiveTime {
        parse_time(raw).unwrap()
    }

    fn smith_only() -> Schedule {
        Schedule::new(vec![ScheduleSlot::new(1, t("09:00"), t("10:00"), "Dr. Smith")])
    }

    #[test]
    fn test_current_period_inclusive_start_exclusive_end() {
        let schedule = smith_only();
        assert_eq!(schedule.current_period(t("09:00")).map(|s| s.period), Some(1));
        assert!(schedule.current_period(t("10:00")).is_none());
    }

    #[test]
    fn test_current_period_truncates_seconds() {
        let schedule = smith_only();
        let almost_ten = NaiveTime::from_hms_opt(9, 59, 59).unwrap();
        let just_after_ten = NaiveTime::from_hms_opt(10, 0, 30).unwrap();
        assert!(schedule.current_period(almost_ten).is_some());
        assert!(schedule.current_period(just_after_ten).is_none());
    }

    #[test]
    fn test_scenario_single_slot() {
        let schedule = smith_only();
        assert_eq!(schedule.current_period(t("09:30")).unwrap().faculty, "Dr. Smith");

        assert!(schedule.current_period(t("08:59")).is_none());
        let next = schedule.next_period(t("08:59")).unwrap();
        assert_eq!(next.slot.period, 1);
        assert_eq!(next.minutes_until, 1);
    }

    #[test]
    fn test_current_period_overlap_first_wins() {
        let schedule = Schedule::new(vec![
            ScheduleSlot::new(1, t("09:00"), t("11:00"), "Wide"),
            ScheduleSlot::new(2, t("09:30"), t("10:00"), "Narrow"),
        ]);
        assert_eq!(schedule.current_period(t("09:45")).unwrap().faculty, "Wide");
    }

    #[test]
    fn test_next_period_tie_goes_to_list_order() {
        let schedule = Schedule::new(vec![
            ScheduleSlot::new(7, t("12:00"), t("13:00"), "First"),
            ScheduleSlot::new(3, t("12:00"), t("12:30"), "Second"),
        ]);
        let next = schedule.next_period(t("11:00")).unwrap();
        assert_eq!(next.slot.faculty, "First");
        assert_eq!(next.minutes_until, 60);
    }

    #[test]
    fn test_next_period_picks_smallest_positive_gap() {
        let schedule = Schedule::builtin();
        let next = schedule.next_period(t("10:15")).unwrap();
        assert_eq!(next.slot.period, 3);
        assert_eq!(next.minutes_until, 45);
    }

    #[test]
    fn test_next_period_none_when_all_started() {
        let schedule = Schedule::builtin();
        assert!(schedule.next_period(t("13:00")).is_none());
        assert!(schedule.next_period(t("23:59")).is_none());
    }

    #[test]
    fn test_next_period_excludes_slot_starting_now() {
        let schedule = smith_only();
        assert!(schedule.next_period(t("09:00")).is_none());
    }

    #[test]
    fn test_empty_schedule() {
        let schedule = Schedule::default();
        assert!(schedule.current_period(t("09:00")).is_none());
        assert!(schedule.next_period(t("09:00")).is_none());
    }

    #[test]
    fn test_slot_label() {
        assert_eq!(smith_only().slots()[0].label(), "Period 1");
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(matches!(parse_time("25:00"), Err(ScheduleError::InvalidTime(_))));
        assert!(matches!(parse_time("nine"), Err(ScheduleError::InvalidTime(_))));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(smith_only()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"period": 1, "start": "09:00", "end": "10:00", "faculty": "Dr. Smith"}
            ])
        );
    }

    #[test]
    fn test_store_missing_creates_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedule.json"));

        let (schedule, outcome) = store.load();
        assert_eq!(outcome, LoadOutcome::Defaulted);
        assert_eq!(schedule, Schedule::builtin());
        assert!(store.path().exists());

        let (again, outcome) = store.load();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(again, Schedule::builtin());
    }

    #[test]
    fn test_store_corrupt_falls_back_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        std::fs::write(&path, b"[{\"period\": 1, \"start\": \"nine\"}]").unwrap();

        let store = ScheduleStore::new(&path);
        let (schedule, outcome) = store.load();
        assert!(matches!(outcome, LoadOutcome::Recovered { .. }));
        assert_eq!(schedule, Schedule::builtin());
        assert!(std::fs::read_to_string(&path).unwrap().contains("nine"));
    }

    #[test]
    fn test_store_invalid_slot_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        std::fs::write(
            &path,
            r#"[{"period":1,"start":"09:00","end":"10:00","faculty":"Dr. Smith"},
               {"period":2,"start":"10:75","end":"11:00","faculty":"Prof. Johnson"}]"#,
        )
        .unwrap();

        let (schedule, outcome) = ScheduleStore::new(&path).load();
        assert_eq!(schedule, Schedule::builtin());
        match outcome {
            LoadOutcome::Recovered { reason } => assert!(reason.starts_with("slot 1:"), "{reason}"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(first_invalid_slot(b"not json"), None);
    }

    #[test]
    fn test_store_save_and_reload_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedule.json"));
        let schedule = Schedule::new(vec![
            ScheduleSlot::new(2, t("14:00"), t("15:00"), "B"),
            ScheduleSlot::new(1, t("08:00"), t("09:00"), "A"),
        ]);
        store.save(&schedule).unwrap();

        let (loaded, outcome) = store.load();
        assert!(outcome.is_loaded());
        assert_eq!(loaded, schedule);
    }
}
