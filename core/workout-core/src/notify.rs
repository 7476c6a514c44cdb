//! Fire-and-forget notification sink.
//!
//! Haptics, sounds and banners live outside the engine. The engine reports
//! rest-timer thresholds and personal records here and never reads anything back.

use crate::types::PersonalRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Started {
        exercise_id: Option<String>,
        duration_secs: u32,
    },
    /// Remaining time crossed the warning threshold.
    Warning { remaining_secs: u32 },
    Completed { exercise_id: Option<String> },
    /// Cancelled before reaching zero.
    Stopped,
}

pub trait NotificationSink: Send + Sync {
    fn timer_event(&self, _event: &TimerEvent) {}

    fn personal_records(&self, _records: &[PersonalRecord]) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {}

/// Forwards notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn timer_event(&self, event: &TimerEvent) {
        tracing::info!(event = ?event, "Rest timer");
    }

    fn personal_records(&self, records: &[PersonalRecord]) {
        for record in records {
            tracing::info!(
                exercise = %record.exercise_name,
                record_type = %record.record_type,
                value = record.value,
                previous = ?record.previous_value,
                "Personal record"
            );
        }
    }
}
