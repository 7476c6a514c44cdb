//! The session state machine and its mutation API.

use std::sync::Arc;

use chrono::Utc;

use crate::config::RestTimerConfig;
use crate::error::{Result, WorkoutError};
use crate::notify::{NoopSink, NotificationSink};
use crate::records::{check_set_one_rep_max, current_best, detect_session_records, merge_into_ledger};
use crate::store::{
    clear_lifecycle_markers, keys, load_current_session, load_history, load_ledger, Durability,
    KeyValueStore, KeyValueStoreExt,
};
use crate::templates::TemplateProvider;
use crate::timer::RestTimerController;
use crate::types::{
    new_id, PersonalRecord, RecordType, SessionStatus, SetType, WorkoutExercise, WorkoutSession,
    WorkoutSet,
};

/// Exercise to append to the current session.
#[derive(Debug, Clone, Default)]
pub struct NewExercise {
    pub exercise_id: String,
    pub exercise_name: String,
    pub muscle_groups: Vec<String>,
    pub target_rest_time: Option<u32>,
    pub notes: Option<String>,
}

/// Initial values for a new set.
#[derive(Debug, Clone, Default)]
pub struct SetDraft {
    pub set_type: SetType,
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub rpe: Option<u8>,
}

/// Patch applied by `update_set`; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct SetUpdate {
    pub set_type: Option<SetType>,
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub rpe: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCompletion {
    Completed { personal_record: bool },
    AlreadyCompleted,
    /// Weight or reps missing or not positive; nothing changed.
    NotCompletable,
}

/// Owns the current-session slot.
///
/// Every mutation updates `updated_at` and writes the whole session through to
/// the store. Ordinary mutations use [`Durability::Eventual`]; `complete` and
/// `discard` wait for their writes before clearing the slot.
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    templates: Arc<dyn TemplateProvider>,
    sink: Arc<dyn NotificationSink>,
    rest_timer: RestTimerController,
    current: Option<WorkoutSession>,
}

fn checked_rpe(rpe: Option<u8>) -> Option<u8> {
    match rpe {
        Some(value) if !(1..=10).contains(&value) => {
            tracing::warn!(rpe = value, "Ignoring RPE outside 1-10");
            None
        }
        other => other,
    }
}

fn exercise_not_found(id: &str) -> WorkoutError {
    WorkoutError::ExerciseNotFound { id: id.to_string() }
}

fn set_not_found(exercise_id: &str, set_id: &str) -> WorkoutError {
    WorkoutError::SetNotFound {
        exercise_id: exercise_id.to_string(),
        set_id: set_id.to_string(),
    }
}

impl SessionManager {
    /// Manager with an empty slot, a no-op sink and a manually ticked rest timer.
    pub fn new(store: Arc<dyn KeyValueStore>, templates: Arc<dyn TemplateProvider>) -> Self {
        let sink: Arc<dyn NotificationSink> = Arc::new(NoopSink);
        Self {
            store,
            templates,
            rest_timer: RestTimerController::manual(RestTimerConfig::default(), Arc::clone(&sink)),
            sink,
            current: None,
        }
    }

    /// Restores the current slot from the store.
    ///
    /// A terminal session found in the slot is moved to history.
    pub fn load(store: Arc<dyn KeyValueStore>, templates: Arc<dyn TemplateProvider>) -> Self {
        let mut manager = Self::new(store, templates);
        match load_current_session(&*manager.store) {
            Some(session) if session.status.is_terminal() => {
                tracing::warn!(
                    session_id = %session.id,
                    status = ?session.status,
                    "Terminal session found in current slot; moving to history"
                );
                let mut history = load_history(&*manager.store);
                if !history.iter().any(|s| s.id == session.id) {
                    history.insert(0, session);
                }
                let _ = manager
                    .store
                    .persist_json(keys::SESSION_HISTORY, &history, Durability::Eventual);
                if let Err(err) = manager.store.remove(keys::CURRENT_SESSION) {
                    tracing::warn!(error = %err, "Failed to clear terminal session from slot");
                }
            }
            Some(session) => {
                tracing::info!(session_id = %session.id, status = ?session.status, "Restored current session");
                manager.current = Some(session);
            }
            None => {}
        }
        manager
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_rest_timer(mut self, rest_timer: RestTimerController) -> Self {
        self.rest_timer = rest_timer;
        self
    }

    pub fn current(&self) -> Option<&WorkoutSession> {
        self.current.as_ref()
    }

    pub fn rest_timer(&self) -> &RestTimerController {
        &self.rest_timer
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Finished sessions, newest first. `complete` and `discard` both prepend.
    pub fn history(&self) -> Vec<WorkoutSession> {
        load_history(&*self.store)
    }

    pub fn personal_records(&self) -> Vec<PersonalRecord> {
        load_ledger(&*self.store)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn start(
        &mut self,
        name: Option<String>,
        template_id: Option<String>,
    ) -> Result<&WorkoutSession> {
        if let Some(existing) = self.current.as_ref().filter(|s| !s.status.is_terminal()) {
            return Err(WorkoutError::SessionAlreadyActive {
                id: existing.id.clone(),
            });
        }

        let mut session = WorkoutSession::new(Utc::now(), name, template_id.clone());
        if let Some(template_id) = template_id.as_deref() {
            match self.templates.get_template(template_id) {
                Some(template) => {
                    session.exercises = template.instantiate();
                    if session.name.is_none() {
                        session.name = Some(template.name);
                    }
                }
                None => {
                    tracing::warn!(template_id, "Template not found; starting empty session");
                }
            }
        }

        self.store
            .persist_json(keys::CURRENT_SESSION, &session, Durability::Eventual)?;
        tracing::info!(
            session_id = %session.id,
            exercises = session.exercises.len(),
            "Workout session started"
        );
        Ok(&*self.current.insert(session))
    }

    pub fn pause(&mut self) -> Result<()> {
        self.mutate(|session| {
            if session.status == SessionStatus::Active {
                session.status = SessionStatus::Paused;
            }
            Ok(())
        })?;
        // Rest does not carry across a pause
        self.rest_timer.stop();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.mutate(|session| {
            if session.status == SessionStatus::Paused {
                session.status = SessionStatus::Active;
            }
            Ok(())
        })
    }

    /// Finalizes the current session into history and clears the slot.
    pub fn complete(&mut self, final_notes: Option<String>) -> Result<WorkoutSession> {
        let mut session = self
            .current
            .clone()
            .ok_or(WorkoutError::NoActiveSession)?;
        let now = Utc::now();

        let dropped = remove_dangling_sets(&mut session);

        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
        session.duration_seconds = Some(session.elapsed_seconds(now));
        session.total_sets = Some(session.completed_set_count());
        session.total_volume = Some(session.completed_volume());
        if let Some(notes) = final_notes.filter(|n| !n.trim().is_empty()) {
            session.notes = Some(notes);
        }
        session.updated_at = now;

        let mut ledger = load_ledger(&*self.store);
        let records = detect_session_records(&session, &ledger, now);
        let written = merge_into_ledger(&mut ledger, &records);
        session.personal_records = records.clone();

        // History lands before the ledger: a failed ledger write leaves the
        // slot in place and a retry re-detects the same records.
        let mut history = load_history(&*self.store);
        history.retain(|s| s.id != session.id);
        history.insert(0, session.clone());
        self.store
            .persist_json(keys::SESSION_HISTORY, &history, Durability::Awaited)?;

        if written > 0 {
            self.store
                .persist_json(keys::PERSONAL_RECORDS, &ledger, Durability::Awaited)?;
        }
        self.store.remove(keys::CURRENT_SESSION)?;

        self.current = None;
        self.rest_timer.stop();

        tracing::info!(
            session_id = %session.id,
            duration_seconds = session.duration_seconds,
            total_sets = session.total_sets,
            dangling_sets_removed = dropped,
            personal_records = records.len(),
            "Workout session completed"
        );
        if !records.is_empty() {
            self.sink.personal_records(&records);
        }
        Ok(session)
    }

    /// Ends `session` without the completion pipeline.
    ///
    /// With `keep_as_completed` the session is archived at the front of
    /// history (newest first, like `complete`) with its elapsed duration;
    /// otherwise it is dropped. Any copy of the session in history is replaced.
    /// Lifecycle markers are always cleared. The slot is cleared only when it
    /// is empty or holds this session, so discarding a history orphan never
    /// touches an unrelated live session.
    pub fn discard(
        &mut self,
        session: WorkoutSession,
        keep_as_completed: bool,
    ) -> Result<Option<WorkoutSession>> {
        let now = Utc::now();
        let session_id = session.id.clone();
        let owns_slot = self.current.as_ref().map_or(true, |c| c.id == session_id);
        let mut history = load_history(&*self.store);
        let before = history.len();
        history.retain(|s| s.id != session_id);

        let archived = if keep_as_completed {
            let mut session = session;
            session.status = SessionStatus::Completed;
            session.completed_at = Some(now);
            session.duration_seconds = Some(session.elapsed_seconds(now));
            session.total_sets = Some(session.completed_set_count());
            session.total_volume = Some(session.completed_volume());
            session.updated_at = now;
            history.insert(0, session.clone());
            Some(session)
        } else {
            None
        };

        if archived.is_some() || history.len() != before {
            self.store
                .persist_json(keys::SESSION_HISTORY, &history, Durability::Awaited)?;
        }
        if owns_slot {
            self.store.remove(keys::CURRENT_SESSION)?;
        }
        clear_lifecycle_markers(&*self.store);

        if owns_slot {
            self.current = None;
            self.rest_timer.stop();
        }

        tracing::info!(session_id = %session_id, kept = keep_as_completed, owns_slot, "Workout session discarded");
        Ok(archived)
    }

    /// Stamps `last_saved_at` and writes the current session. Returns false when the slot is empty.
    pub fn flush(&mut self, durability: Durability) -> Result<bool> {
        let Some(session) = self.current.as_mut() else {
            return Ok(false);
        };
        session.last_saved_at = Some(Utc::now());
        self.store
            .persist_json(keys::CURRENT_SESSION, &*session, durability)?;
        Ok(true)
    }

    /// Installs a recovered session into the slot with an awaited write.
    pub(crate) fn adopt_recovered(&mut self, session: WorkoutSession) -> Result<()> {
        if let Some(existing) = self
            .current
            .as_ref()
            .filter(|s| s.id != session.id && !s.status.is_terminal())
        {
            return Err(WorkoutError::SessionAlreadyActive {
                id: existing.id.clone(),
            });
        }

        self.store.set_json(keys::CURRENT_SESSION, &session)?;

        let mut history = load_history(&*self.store);
        let before = history.len();
        history.retain(|s| s.id != session.id);
        if history.len() != before {
            let _ = self
                .store
                .persist_json(keys::SESSION_HISTORY, &history, Durability::Eventual);
        }

        self.current = Some(session);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────────

    fn mutate<R>(&mut self, f: impl FnOnce(&mut WorkoutSession) -> Result<R>) -> Result<R> {
        let session = self.current.as_mut().ok_or(WorkoutError::NoActiveSession)?;
        let out = f(session)?;
        session.updated_at = Utc::now();
        self.store
            .persist_json(keys::CURRENT_SESSION, &*session, Durability::Eventual)?;
        Ok(out)
    }

    /// Appends an exercise and returns its instance id.
    pub fn add_exercise(&mut self, exercise: NewExercise) -> Result<String> {
        let id = new_id();
        let instance_id = id.clone();
        self.mutate(move |session| {
            let order = session.exercises.len() as u32;
            session.exercises.push(WorkoutExercise {
                id: instance_id,
                exercise_id: exercise.exercise_id,
                exercise_name: exercise.exercise_name,
                muscle_groups: exercise.muscle_groups,
                sets: Vec::new(),
                target_rest_time: exercise.target_rest_time,
                order,
                notes: exercise.notes,
            });
            Ok(())
        })?;
        Ok(id)
    }

    pub fn remove_exercise(&mut self, exercise_id: &str) -> Result<()> {
        self.mutate(|session| {
            let index = session
                .exercises
                .iter()
                .position(|e| e.id == exercise_id)
                .ok_or_else(|| exercise_not_found(exercise_id))?;
            session.exercises.remove(index);
            session.reindex_exercises();
            Ok(())
        })
    }

    /// Moves the listed exercises to the front in the given order.
    ///
    /// Unlisted exercises keep their relative order after them; unknown ids are ignored.
    pub fn reorder_exercises(&mut self, ordered_ids: &[String]) -> Result<()> {
        self.mutate(|session| {
            let mut reordered = Vec::with_capacity(session.exercises.len());
            for id in ordered_ids {
                if let Some(index) = session.exercises.iter().position(|e| &e.id == id) {
                    reordered.push(session.exercises.remove(index));
                }
            }
            reordered.append(&mut session.exercises);
            session.exercises = reordered;
            session.reindex_exercises();
            Ok(())
        })
    }

    /// Appends a set to an exercise and returns the set id.
    pub fn add_set(&mut self, exercise_id: &str, draft: SetDraft) -> Result<String> {
        let id = new_id();
        let set_id = id.clone();
        self.mutate(move |session| {
            let exercise = session
                .exercise_mut(exercise_id)
                .ok_or_else(|| exercise_not_found(exercise_id))?;
            let set_number = exercise.sets.len() as u32 + 1;
            exercise.sets.push(WorkoutSet {
                id: set_id,
                set_number,
                set_type: draft.set_type,
                weight: draft.weight,
                reps: draft.reps,
                rpe: checked_rpe(draft.rpe),
                completed: false,
                is_personal_record: None,
                completed_at: None,
            });
            Ok(())
        })?;
        Ok(id)
    }

    pub fn update_set(&mut self, exercise_id: &str, set_id: &str, update: SetUpdate) -> Result<()> {
        self.mutate(|session| {
            let set = session
                .exercise_mut(exercise_id)
                .ok_or_else(|| exercise_not_found(exercise_id))?
                .set_mut(set_id)
                .ok_or_else(|| set_not_found(exercise_id, set_id))?;
            if let Some(set_type) = update.set_type {
                set.set_type = set_type;
            }
            if let Some(weight) = update.weight {
                set.weight = Some(weight);
            }
            if let Some(reps) = update.reps {
                set.reps = Some(reps);
            }
            if let Some(rpe) = checked_rpe(update.rpe) {
                set.rpe = Some(rpe);
            }
            Ok(())
        })
    }

    pub fn delete_set(&mut self, exercise_id: &str, set_id: &str) -> Result<()> {
        self.mutate(|session| {
            let exercise = session
                .exercise_mut(exercise_id)
                .ok_or_else(|| exercise_not_found(exercise_id))?;
            let index = exercise
                .sets
                .iter()
                .position(|s| s.id == set_id)
                .ok_or_else(|| set_not_found(exercise_id, set_id))?;
            exercise.sets.remove(index);
            exercise.renumber_sets();
            Ok(())
        })
    }

    pub fn update_notes(&mut self, notes: Option<String>) -> Result<()> {
        self.mutate(|session| {
            session.notes = notes.filter(|n| !n.trim().is_empty());
            Ok(())
        })
    }

    pub fn update_name(&mut self, name: Option<String>) -> Result<()> {
        self.mutate(|session| {
            session.name = name.filter(|n| !n.trim().is_empty());
            Ok(())
        })
    }

    /// Marks a set completed, then runs the incremental 1RM check.
    ///
    /// Sets without positive weight and reps are left untouched.
    pub fn complete_set(&mut self, exercise_id: &str, set_id: &str) -> Result<SetCompletion> {
        let session = self.current.as_ref().ok_or(WorkoutError::NoActiveSession)?;
        let exercise = session
            .exercise(exercise_id)
            .ok_or_else(|| exercise_not_found(exercise_id))?;
        let set = exercise
            .set(set_id)
            .ok_or_else(|| set_not_found(exercise_id, set_id))?;
        if set.completed {
            return Ok(SetCompletion::AlreadyCompleted);
        }
        if !set.is_completable() {
            tracing::debug!(exercise_id, set_id, "Set not completable; ignoring");
            return Ok(SetCompletion::NotCompletable);
        }
        let catalog_id = exercise.exercise_id.clone();
        let exercise_name = exercise.exercise_name.clone();
        let session_id = session.id.clone();

        let now = Utc::now();
        let completed = self.mutate(|session| {
            let set = session
                .exercise_mut(exercise_id)
                .and_then(|e| e.set_mut(set_id))
                .ok_or_else(|| set_not_found(exercise_id, set_id))?;
            set.completed = true;
            set.completed_at = Some(now);
            Ok(set.clone())
        })?;

        let ledger = load_ledger(&*self.store);
        let Some(estimate) = check_set_one_rep_max(&ledger, &catalog_id, &completed) else {
            return Ok(SetCompletion::Completed {
                personal_record: false,
            });
        };

        self.mutate(|session| {
            if let Some(set) = session
                .exercise_mut(exercise_id)
                .and_then(|e| e.set_mut(set_id))
            {
                set.is_personal_record = Some(true);
            }
            Ok(())
        })?;

        self.sink.personal_records(&[PersonalRecord {
            previous_value: current_best(&ledger, &catalog_id, RecordType::OneRepMax),
            exercise_id: catalog_id,
            exercise_name,
            record_type: RecordType::OneRepMax,
            value: estimate,
            achieved_at: now,
            workout_session_id: session_id,
        }]);
        Ok(SetCompletion::Completed {
            personal_record: true,
        })
    }

    /// Starts the rest timer for an exercise; returns the duration used.
    pub fn start_rest(&mut self, exercise_id: Option<&str>) -> Result<u32> {
        self.start_rest_with(exercise_id, None)
    }

    /// Like [`start_rest`](Self::start_rest), with an explicit duration taking
    /// precedence over the exercise target.
    pub fn start_rest_with(
        &mut self,
        exercise_id: Option<&str>,
        duration_secs: Option<u32>,
    ) -> Result<u32> {
        let session = self.current.as_ref().ok_or(WorkoutError::NoActiveSession)?;
        if session.status == SessionStatus::Paused {
            return Err(WorkoutError::SessionPaused {
                id: session.id.clone(),
            });
        }
        let target = match exercise_id {
            Some(id) => session
                .exercise(id)
                .ok_or_else(|| exercise_not_found(id))?
                .target_rest_time,
            None => None,
        };
        let duration = duration_secs
            .or(target)
            .unwrap_or(self.rest_timer.config().default_rest_secs);
        self.rest_timer
            .start(duration, exercise_id.map(str::to_string));
        Ok(duration)
    }
}

/// Drops sets that are neither completed nor fully specified. Returns how many were removed.
pub fn remove_dangling_sets(session: &mut WorkoutSession) -> usize {
    let mut removed = 0;
    for exercise in &mut session.exercises {
        let before = exercise.sets.len();
        exercise.sets.retain(|s| s.completed || s.is_completable());
        removed += before - exercise.sets.len();
        exercise.renumber_sets();
    }
    removed
}
