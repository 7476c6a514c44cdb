//! Workout session lifecycle.
//!
//! ```text
//!            start()            pause()
//!   (none) ─────────▶ active ◀────────▶ paused
//!      ▲                │    resume()     │
//!      │                └───────┬─────────┘
//!      │      complete() / discard()
//!      └────────────────────────┘   (session lands in history as completed, or is dropped)
//! ```
//!
//! At most one session occupies the current slot, and it is never terminal.
//! Completed and cancelled sessions live only in history.
//!
//! # Module Structure
//!
//! - [`manager`]: [`SessionManager`], the slot owner and mutation API
//! - [`recovery`]: [`RecoveryMonitor`], lifecycle signals and orphan recovery

mod manager;
mod recovery;

pub use manager::{
    remove_dangling_sets, NewExercise, SessionManager, SetCompletion, SetDraft, SetUpdate,
};
pub use recovery::{
    CleanupStats, ForegroundCheck, LifecycleEvent, OrphanReason, OrphanedSession, RecoveryMonitor,
};
