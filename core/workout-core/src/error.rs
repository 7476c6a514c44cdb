//! Error types for workout-core operations.
//!
//! Business-state errors surface to the caller. Storage errors are absorbed or
//! propagated depending on the [`Durability`](crate::store::Durability) of the
//! call site that produced them.

use std::path::PathBuf;

/// All errors that can occur in workout-core operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkoutError {
    // ─────────────────────────────────────────────────────────────────────
    // Session State Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No active workout session")]
    NoActiveSession,

    #[error("A workout session is already in progress: {id}")]
    SessionAlreadyActive { id: String },

    #[error("Workout session is paused: {id}")]
    SessionPaused { id: String },

    #[error("Exercise not found in session: {id}")]
    ExerciseNotFound { id: String },

    #[error("Set not found: {exercise_id}: {set_id}")]
    SetNotFound { exercise_id: String, set_id: String },

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Persistence write failed: {key}: {details}")]
    PersistenceWrite { key: String, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },
}

impl WorkoutError {
    /// True for errors the caller is expected to show to the user.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            WorkoutError::NoActiveSession
                | WorkoutError::SessionAlreadyActive { .. }
                | WorkoutError::SessionPaused { .. }
                | WorkoutError::ExerciseNotFound { .. }
                | WorkoutError::SetNotFound { .. }
        )
    }
}

/// Convenience type alias for Results using WorkoutError.
pub type Result<T> = std::result::Result<T, WorkoutError>;

impl From<WorkoutError> for String {
    fn from(err: WorkoutError) -> String {
        err.to_string()
    }
}
