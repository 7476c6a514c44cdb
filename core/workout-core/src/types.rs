//! Persisted data model for workout sessions and the personal-record ledger.
//!
//! Everything here is serialized as JSON into the durable store. Fields added
//! later carry `#[serde(default)]` so older payloads keep loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generates a new unique identifier for sessions, exercise instances and sets.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Completed and cancelled sessions never re-enter the current slot.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub exercises: Vec<WorkoutExercise>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub total_sets: Option<u32>,
    #[serde(default)]
    pub personal_records: Vec<PersonalRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Recovery metadata
    #[serde(default)]
    pub last_saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovery_attempts: u32,
}

impl WorkoutSession {
    pub fn new(now: DateTime<Utc>, name: Option<String>, template_id: Option<String>) -> Self {
        WorkoutSession {
            id: new_id(),
            status: SessionStatus::Active,
            started_at: now,
            completed_at: None,
            duration_seconds: None,
            name,
            template_id,
            exercises: Vec::new(),
            notes: None,
            total_volume: None,
            total_sets: None,
            personal_records: Vec::new(),
            created_at: now,
            updated_at: now,
            last_saved_at: None,
            recovered_at: None,
            recovery_attempts: 0,
        }
    }

    pub fn exercise(&self, exercise_id: &str) -> Option<&WorkoutExercise> {
        self.exercises.iter().find(|e| e.id == exercise_id)
    }

    pub fn exercise_mut(&mut self, exercise_id: &str) -> Option<&mut WorkoutExercise> {
        self.exercises.iter_mut().find(|e| e.id == exercise_id)
    }

    /// Re-indexes `order` to a dense 0-based sequence following list position.
    pub fn reindex_exercises(&mut self) {
        for (index, exercise) in self.exercises.iter_mut().enumerate() {
            exercise.order = index as u32;
        }
    }

    /// Seconds elapsed between `started_at` and `now`, never negative.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.started_at)
            .num_seconds()
            .max(0)
    }

    /// Count of completed sets across all exercises.
    pub fn completed_set_count(&self) -> u32 {
        self.exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .filter(|s| s.completed)
            .count() as u32
    }

    /// Σ(weight × reps) over completed, fully specified sets.
    pub fn completed_volume(&self) -> f64 {
        self.exercises.iter().map(WorkoutExercise::completed_volume).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Exercise & Set
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutExercise {
    pub id: String,
    /// Catalog reference (owned by the external exercise catalog).
    pub exercise_id: String,
    pub exercise_name: String,
    #[serde(default)]
    pub muscle_groups: Vec<String>,
    #[serde(default)]
    pub sets: Vec<WorkoutSet>,
    /// Rest between sets, in seconds.
    #[serde(default)]
    pub target_rest_time: Option<u32>,
    pub order: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WorkoutExercise {
    pub fn set(&self, set_id: &str) -> Option<&WorkoutSet> {
        self.sets.iter().find(|s| s.id == set_id)
    }

    pub fn set_mut(&mut self, set_id: &str) -> Option<&mut WorkoutSet> {
        self.sets.iter_mut().find(|s| s.id == set_id)
    }

    /// Keeps `set_number` dense (1..N) after deletions.
    pub fn renumber_sets(&mut self) {
        for (index, set) in self.sets.iter_mut().enumerate() {
            set.set_number = index as u32 + 1;
        }
    }

    pub fn completed_volume(&self) -> f64 {
        self.sets
            .iter()
            .filter(|s| s.completed)
            .filter_map(WorkoutSet::volume)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    #[default]
    Working,
    Warmup,
    Dropset,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    pub id: String,
    pub set_number: u32,
    #[serde(rename = "type", default)]
    pub set_type: SetType,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub reps: Option<u32>,
    /// Rate of perceived exertion, 1–10.
    #[serde(default)]
    pub rpe: Option<u8>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub is_personal_record: Option<bool>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkoutSet {
    /// A set can be completed only when weight and reps are both positive.
    pub fn is_completable(&self) -> bool {
        self.positive_load().is_some()
    }

    /// Returns `(weight, reps)` when both are present and positive.
    pub fn positive_load(&self) -> Option<(f64, u32)> {
        match (self.weight, self.reps) {
            (Some(weight), Some(reps)) if weight > 0.0 && reps > 0 => Some((weight, reps)),
            _ => None,
        }
    }

    pub fn volume(&self) -> Option<f64> {
        self.positive_load()
            .map(|(weight, reps)| weight * f64::from(reps))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Personal Records
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "1rm")]
    OneRepMax,
    #[serde(rename = "volume")]
    Volume,
    #[serde(rename = "reps")]
    Reps,
    #[serde(rename = "duration")]
    Duration,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::OneRepMax => "1rm",
            RecordType::Volume => "volume",
            RecordType::Reps => "reps",
            RecordType::Duration => "duration",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalRecord {
    pub exercise_id: String,
    pub exercise_name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub value: f64,
    #[serde(default)]
    pub previous_value: Option<f64>,
    pub achieved_at: DateTime<Utc>,
    pub workout_session_id: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rest Timer
// ═══════════════════════════════════════════════════════════════════════════════

/// Transient countdown state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RestTimerState {
    pub is_active: bool,
    pub remaining_time: u32,
    pub exercise_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(weight: Option<f64>, reps: Option<u32>) -> WorkoutSet {
        WorkoutSet {
            id: new_id(),
            set_number: 1,
            set_type: SetType::Working,
            weight,
            reps,
            rpe: None,
            completed: false,
            is_personal_record: None,
            completed_at: None,
        }
    }

    #[test]
    fn completable_requires_positive_weight_and_reps() {
        assert!(set(Some(100.0), Some(5)).is_completable());
        assert!(!set(Some(0.0), Some(5)).is_completable());
        assert!(!set(Some(100.0), Some(0)).is_completable());
        assert!(!set(None, Some(5)).is_completable());
        assert!(!set(Some(100.0), None).is_completable());
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }

    #[test]
    fn record_type_serializes_with_short_names() {
        let json = serde_json::to_string(&RecordType::OneRepMax).unwrap();
        assert_eq!(json, "\"1rm\"");
        let parsed: RecordType = serde_json::from_str("\"volume\"").unwrap();
        assert_eq!(parsed, RecordType::Volume);
    }

    #[test]
    fn renumber_sets_is_dense() {
        let mut exercise = WorkoutExercise {
            id: new_id(),
            exercise_id: "bench".into(),
            exercise_name: "Bench Press".into(),
            muscle_groups: vec![],
            sets: vec![set(None, None), set(None, None), set(None, None)],
            target_rest_time: None,
            order: 0,
            notes: None,
        };
        exercise.sets.remove(1);
        exercise.renumber_sets();
        let numbers: Vec<u32> = exercise.sets.iter().map(|s| s.set_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn session_loads_without_recovery_metadata() {
        let json = r#"{
            "id": "s1",
            "status": "paused",
            "started_at": "2026-01-01T10:00:00Z",
            "created_at": "2026-01-01T10:00:00Z",
            "updated_at": "2026-01-01T10:05:00Z"
        }"#;
        let session: WorkoutSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.recovery_attempts, 0);
        assert!(session.exercises.is_empty());
    }
}
