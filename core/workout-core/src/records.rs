//! Personal-record detection.
//!
//! Pure evaluation over a session and the stored ledger; callers persist results.
//!
//! # Rules
//!
//! | Type     | Candidate                                                   |
//! |----------|-------------------------------------------------------------|
//! | `1rm`    | max of `weight × (1 + reps/30)`, rounded to a whole unit    |
//! | `volume` | Σ(weight × reps) over the exercise's completed sets         |
//! | `reps`   | max reps over completed sets with `weight ≥ 50`             |
//!
//! Only completed sets with positive weight and reps are considered. A candidate
//! becomes a record only when it strictly exceeds the ledger value for the same
//! `(exercise_id, type)`; ties are not improvements.
//!
//! # Modes
//!
//! - [`check_set_one_rep_max`]: incremental, on a single set completion, 1RM only.
//!   Never touches the ledger.
//! - [`detect_session_records`] + [`merge_into_ledger`]: batch, at session
//!   completion, authoritative.

use chrono::{DateTime, Utc};

use crate::types::{PersonalRecord, RecordType, WorkoutSession, WorkoutSet};

/// Sets lighter than this never count toward a reps record (bodyweight guard).
pub const REP_RECORD_MIN_WEIGHT: f64 = 50.0;

/// Epley estimate: `weight × (1 + reps/30)`.
pub fn estimate_one_rep_max(weight: f64, reps: u32) -> f64 {
    weight * (1.0 + f64::from(reps) / 30.0)
}

/// Rounded 1RM for a completed-or-completable set, if it has a positive load.
fn set_one_rep_max(set: &WorkoutSet) -> Option<f64> {
    set.positive_load()
        .map(|(weight, reps)| estimate_one_rep_max(weight, reps).round())
}

/// Ledger value for `(exercise_id, record_type)`, if any.
pub fn current_best(
    ledger: &[PersonalRecord],
    exercise_id: &str,
    record_type: RecordType,
) -> Option<f64> {
    ledger
        .iter()
        .filter(|r| r.exercise_id == exercise_id && r.record_type == record_type)
        .map(|r| r.value)
        .fold(None, |best, value| match best {
            Some(b) if b >= value => Some(b),
            _ => Some(value),
        })
}

fn is_improvement(candidate: f64, existing: Option<f64>) -> bool {
    existing.map_or(true, |value| candidate > value)
}

/// Incremental check run when one set is completed.
///
/// Returns the rounded 1RM estimate when it beats the ledger.
pub fn check_set_one_rep_max(
    ledger: &[PersonalRecord],
    exercise_id: &str,
    set: &WorkoutSet,
) -> Option<f64> {
    let estimate = set_one_rep_max(set)?;
    is_improvement(estimate, current_best(ledger, exercise_id, RecordType::OneRepMax))
        .then_some(estimate)
}

/// Per-exercise candidates across a session, grouped by catalog `exercise_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseCandidates {
    pub exercise_id: String,
    pub exercise_name: String,
    pub one_rep_max: Option<f64>,
    pub volume: Option<f64>,
    pub reps: Option<f64>,
}

impl ExerciseCandidates {
    fn new(exercise_id: &str, exercise_name: &str) -> Self {
        Self {
            exercise_id: exercise_id.to_string(),
            exercise_name: exercise_name.to_string(),
            one_rep_max: None,
            volume: None,
            reps: None,
        }
    }

    fn absorb(&mut self, set: &WorkoutSet) {
        if !set.completed {
            return;
        }
        let Some((weight, reps)) = set.positive_load() else {
            return;
        };

        let estimate = estimate_one_rep_max(weight, reps).round();
        self.one_rep_max = Some(self.one_rep_max.map_or(estimate, |v| v.max(estimate)));

        let volume = weight * f64::from(reps);
        self.volume = Some(self.volume.unwrap_or(0.0) + volume);

        if weight >= REP_RECORD_MIN_WEIGHT {
            let reps = f64::from(reps);
            self.reps = Some(self.reps.map_or(reps, |v| v.max(reps)));
        }
    }

    fn candidates(&self) -> [(RecordType, Option<f64>); 3] {
        [
            (RecordType::OneRepMax, self.one_rep_max),
            (RecordType::Volume, self.volume),
            (RecordType::Reps, self.reps),
        ]
    }
}

pub fn exercise_candidates(session: &WorkoutSession) -> Vec<ExerciseCandidates> {
    let mut grouped: Vec<ExerciseCandidates> = Vec::new();
    for exercise in &session.exercises {
        let index = match grouped
            .iter()
            .position(|c| c.exercise_id == exercise.exercise_id)
        {
            Some(index) => index,
            None => {
                grouped.push(ExerciseCandidates::new(
                    &exercise.exercise_id,
                    &exercise.exercise_name,
                ));
                grouped.len() - 1
            }
        };
        for set in &exercise.sets {
            grouped[index].absorb(set);
        }
    }
    grouped
}

/// Batch evaluation at session completion.
pub fn detect_session_records(
    session: &WorkoutSession,
    ledger: &[PersonalRecord],
    now: DateTime<Utc>,
) -> Vec<PersonalRecord> {
    let mut records = Vec::new();
    for exercise in exercise_candidates(session) {
        for (record_type, candidate) in exercise.candidates() {
            let Some(value) = candidate else {
                continue;
            };
            let previous = current_best(ledger, &exercise.exercise_id, record_type);
            if !is_improvement(value, previous) {
                continue;
            }
            records.push(PersonalRecord {
                exercise_id: exercise.exercise_id.clone(),
                exercise_name: exercise.exercise_name.clone(),
                record_type,
                value,
                previous_value: previous,
                achieved_at: now,
                workout_session_id: session.id.clone(),
            });
        }
    }
    records
}

/// Merges new records, keeping one entry per `(exercise_id, type)`.
///
/// A record replaces the stored one only when strictly greater. Returns the
/// number of ledger entries written.
pub fn merge_into_ledger(ledger: &mut Vec<PersonalRecord>, records: &[PersonalRecord]) -> usize {
    let mut written = 0;
    for record in records {
        let existing = ledger
            .iter()
            .position(|r| r.exercise_id == record.exercise_id && r.record_type == record.record_type);
        match existing {
            Some(index) if record.value > ledger[index].value => {
                ledger[index] = record.clone();
                written += 1;
            }
            Some(_) => {}
            None => {
                ledger.push(record.clone());
                written += 1;
            }
        }
    }
    written
}
