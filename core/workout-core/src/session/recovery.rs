//! Crash and orphan recovery.
//!
//! The host forwards app lifecycle transitions to [`RecoveryMonitor::handle_event`]
//! while the monitor is started. Two markers in the store drive crash detection:
//!
//! - `backgrounded_at`: written on a clean transition to background.
//! - `last_active_at`: refreshed on foreground and every heartbeat while foregrounded.
//!
//! Foregrounding with no `backgrounded_at` but a `last_active_at` older than the
//! crash window means the previous process died without backgrounding. That
//! signal is logged only; orphan detection is what gates recovery.
//!
//! # Orphans
//!
//! | Where          | Condition                                             | Reason                  |
//! |----------------|-------------------------------------------------------|-------------------------|
//! | current slot   | live and started more than 24h ago                    | `ExceededMaxAge`        |
//! | current slot   | live and not updated for 2h                           | `StaleUpdate`           |
//! | current slot   | live while history also holds a live session          | `ConflictingSlot`       |
//! | history        | any non-terminal entry                                | `NonTerminalInHistory`  |

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::store::{
    clear_lifecycle_markers, keys, load_current_session, load_history, load_marker, set_marker,
    Durability, KeyValueStore, KeyValueStoreExt,
};
use crate::types::{SessionStatus, WorkoutSession};

use super::manager::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Foreground,
    Background,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForegroundCheck {
    pub probable_crash: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    ExceededMaxAge,
    StaleUpdate,
    ConflictingSlot,
    NonTerminalInHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanedSession {
    pub session: WorkoutSession,
    pub reason: OrphanReason,
}

/// Results from [`RecoveryMonitor::cleanup_old_sessions`].
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CleanupStats {
    /// History entries older than the history floor.
    pub sessions_removed: u32,
    /// Lifecycle markers older than the marker TTL.
    pub markers_removed: u32,
    pub errors: Vec<String>,
}

struct Heartbeat {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn spawn(store: Arc<dyn KeyValueStore>, config: &RecoveryConfig) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let interval = config.heartbeat_interval();
        let handle = thread::spawn(move || loop {
            match cancel_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now()) {
                        tracing::warn!(error = %err, "Failed to refresh last_active_at");
                    }
                }
                _ => return,
            }
        });
        Self {
            cancel: Some(cancel_tx),
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the loop
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watches host lifecycle and drives recovery through the [`SessionManager`].
pub struct RecoveryMonitor {
    store: Arc<dyn KeyValueStore>,
    config: RecoveryConfig,
    subscribed: bool,
    heartbeat: Option<Heartbeat>,
}

impl RecoveryMonitor {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RecoveryConfig) -> Self {
        Self {
            store,
            config,
            subscribed: false,
            heartbeat: None,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Subscription
    // ─────────────────────────────────────────────────────────────────────────────

    /// Begins accepting lifecycle events. Idempotent.
    pub fn start(&mut self) {
        if !self.subscribed {
            tracing::debug!("Recovery monitor subscribed to lifecycle events");
        }
        self.subscribed = true;
    }

    /// Stops accepting events and cancels the heartbeat. Idempotent.
    pub fn stop(&mut self) {
        if self.subscribed {
            tracing::debug!("Recovery monitor unsubscribed");
        }
        self.subscribed = false;
        self.stop_heartbeat();
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_some()
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat.is_none() {
            self.heartbeat = Some(Heartbeat::spawn(Arc::clone(&self.store), &self.config));
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }

    /// Reacts to a host lifecycle transition.
    ///
    /// Returns the crash assessment on foreground; `None` otherwise or when not started.
    pub fn handle_event(
        &mut self,
        manager: &mut SessionManager,
        event: LifecycleEvent,
    ) -> Option<ForegroundCheck> {
        if !self.subscribed {
            tracing::debug!(event = ?event, "Lifecycle event ignored; monitor not started");
            return None;
        }

        let now = Utc::now();
        match event {
            LifecycleEvent::Background => {
                self.stop_heartbeat();
                if let Err(err) = set_marker(&*self.store, keys::BACKGROUNDED_AT, now) {
                    tracing::warn!(error = %err, "Failed to write backgrounded_at marker");
                }
                if let Err(err) = manager.flush(Durability::Awaited) {
                    tracing::warn!(error = %err, "Failed to flush session on background");
                }
                None
            }
            LifecycleEvent::Foreground => {
                let check = self.assess_foreground(now);
                if let Err(err) = self.store.remove(keys::BACKGROUNDED_AT) {
                    tracing::warn!(error = %err, "Failed to clear backgrounded_at marker");
                }
                if let Err(err) = set_marker(&*self.store, keys::LAST_ACTIVE_AT, now) {
                    tracing::warn!(error = %err, "Failed to write last_active_at marker");
                }
                self.start_heartbeat();
                Some(check)
            }
            LifecycleEvent::Inactive => {
                tracing::debug!("Host inactive");
                None
            }
        }
    }

    fn assess_foreground(&self, now: DateTime<Utc>) -> ForegroundCheck {
        let backgrounded = load_marker(&*self.store, keys::BACKGROUNDED_AT);
        let last_active = load_marker(&*self.store, keys::LAST_ACTIVE_AT);
        let probable_crash = backgrounded.is_none()
            && last_active
                .map(|at| now.signed_duration_since(at) > self.config.crash_window())
                .unwrap_or(false);
        if probable_crash {
            tracing::warn!(
                last_active_at = ?last_active,
                "Previous process likely terminated without backgrounding"
            );
        }
        ForegroundCheck { probable_crash }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orphans
    // ─────────────────────────────────────────────────────────────────────────────

    /// Every session needing recovery attention, read from the store.
    pub fn check_for_orphaned_sessions(&self) -> Vec<OrphanedSession> {
        let now = Utc::now();
        let current = load_current_session(&*self.store).filter(|s| !s.status.is_terminal());
        let history_live: Vec<WorkoutSession> = load_history(&*self.store)
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .collect();

        let mut orphans = Vec::new();
        if let Some(session) = current {
            let age = now.signed_duration_since(session.started_at);
            let idle = now.signed_duration_since(session.updated_at);
            let reason = if age > self.config.orphan_age() {
                Some(OrphanReason::ExceededMaxAge)
            } else if idle > self.config.stale_update() {
                Some(OrphanReason::StaleUpdate)
            } else if !history_live.is_empty() {
                // Both places hold a live session; neither is trusted over the other
                Some(OrphanReason::ConflictingSlot)
            } else {
                None
            };
            if let Some(reason) = reason {
                orphans.push(OrphanedSession { session, reason });
            }
        }

        for session in history_live {
            if orphans.iter().any(|o| o.session.id == session.id) {
                continue;
            }
            orphans.push(OrphanedSession {
                session,
                reason: OrphanReason::NonTerminalInHistory,
            });
        }

        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "Orphaned sessions detected");
        }
        orphans
    }

    /// Reactivates `session` into the current slot.
    ///
    /// The write is retried up to `max_persist_attempts` times with a fixed delay.
    /// Never returns an error; false means the session was not restored.
    pub fn recover_session(&self, manager: &mut SessionManager, session: WorkoutSession) -> bool {
        let now = Utc::now();
        let mut session = session;
        session.status = SessionStatus::Active;
        session.recovered_at = Some(now);
        session.recovery_attempts += 1;
        session.updated_at = now;

        clear_lifecycle_markers(&*self.store);

        let max_attempts = self.config.max_persist_attempts.max(1);
        for attempt in 1..=max_attempts {
            match manager.adopt_recovered(session.clone()) {
                Ok(()) => {
                    tracing::info!(
                        session_id = %session.id,
                        recovery_attempts = session.recovery_attempts,
                        attempt,
                        "Session recovered"
                    );
                    return true;
                }
                Err(err) if err.is_business_error() => {
                    tracing::warn!(session_id = %session.id, error = %err, "Session not recoverable");
                    return false;
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Recovery persist failed"
                    );
                    if attempt < max_attempts {
                        thread::sleep(self.config.retry_delay());
                    }
                }
            }
        }

        tracing::error!(session_id = %session.id, "Session recovery gave up");
        false
    }

    /// Ends an orphan through the manager, optionally archiving it as completed.
    pub fn discard_session(
        &self,
        manager: &mut SessionManager,
        session: WorkoutSession,
        mark_as_completed: bool,
    ) -> Result<Option<WorkoutSession>> {
        let session_id = session.id.clone();
        let archived = manager.discard(session, mark_as_completed)?;
        clear_lifecycle_markers(&*self.store);
        tracing::info!(session_id = %session_id, mark_as_completed, "Orphaned session discarded");
        Ok(archived)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Start-up cleanup
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prunes history past the floor and lifecycle markers past their TTL.
    ///
    /// Runs once at process start, before tier-aware retention.
    pub fn cleanup_old_sessions(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let now = Utc::now();

        // A floor before the earliest representable date prunes nothing
        let mut history = load_history(&*self.store);
        let before = history.len();
        if let Some(floor) = now.checked_sub_signed(self.config.history_floor()) {
            history.retain(|s| s.started_at >= floor);
        }
        let removed = before - history.len();
        if removed > 0 {
            match self
                .store
                .persist_json(keys::SESSION_HISTORY, &history, Durability::Awaited)
            {
                Ok(()) => stats.sessions_removed = removed as u32,
                Err(err) => stats
                    .errors
                    .push(format!("Failed to prune session history: {}", err)),
            }
        }

        let marker_floor = now.checked_sub_signed(self.config.marker_ttl());
        for key in keys::LIFECYCLE_MARKERS {
            let Some(at) = load_marker(&*self.store, key) else {
                continue;
            };
            if marker_floor.map_or(true, |floor| at >= floor) {
                continue;
            }
            match self.store.remove(key) {
                Ok(()) => stats.markers_removed += 1,
                Err(err) => stats
                    .errors
                    .push(format!("Failed to remove marker {}: {}", key, err)),
            }
        }

        tracing::info!(
            sessions_removed = stats.sessions_removed,
            markers_removed = stats.markers_removed,
            errors = stats.errors.len(),
            "Startup cleanup finished"
        );
        stats
    }
}

impl Drop for RecoveryMonitor {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::templates::StaticTemplates;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            retry_delay_ms: 1,
            heartbeat_interval_secs: 3600,
            ..RecoveryConfig::default()
        }
    }

    fn setup() -> (Arc<MemoryStore>, SessionManager, RecoveryMonitor) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), Arc::new(StaticTemplates::empty()));
        let monitor = RecoveryMonitor::new(store.clone(), fast_config());
        (store, manager, monitor)
    }

    fn live_session(started_hours_ago: i64, updated_hours_ago: i64) -> WorkoutSession {
        let now = Utc::now();
        let mut session = WorkoutSession::new(now - Duration::hours(started_hours_ago), None, None);
        session.updated_at = now - Duration::hours(updated_hours_ago);
        session
    }

    #[test]
    fn events_ignored_until_started() {
        let (store, mut manager, mut monitor) = setup();
        assert!(monitor
            .handle_event(&mut manager, LifecycleEvent::Foreground)
            .is_none());
        assert!(!store.contains(keys::LAST_ACTIVE_AT));
    }

    #[test]
    fn background_marks_and_flushes() {
        let (store, mut manager, mut monitor) = setup();
        monitor.start();
        manager.start(None, None).unwrap();

        monitor.handle_event(&mut manager, LifecycleEvent::Background);
        assert!(store.contains(keys::BACKGROUNDED_AT));
        let stored = load_current_session(&*store).unwrap();
        assert!(stored.last_saved_at.is_some());
        assert!(!monitor.is_heartbeat_running());
    }

    #[test]
    fn foreground_after_clean_background_is_not_a_crash() {
        let (store, mut manager, mut monitor) = setup();
        monitor.start();
        set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now() - Duration::hours(5)).unwrap();
        set_marker(&*store, keys::BACKGROUNDED_AT, Utc::now() - Duration::hours(5)).unwrap();

        let check = monitor
            .handle_event(&mut manager, LifecycleEvent::Foreground)
            .unwrap();
        assert!(!check.probable_crash);
        assert!(!store.contains(keys::BACKGROUNDED_AT));
        assert!(monitor.is_heartbeat_running());
        monitor.stop();
        assert!(!monitor.is_heartbeat_running());
    }

    #[test]
    fn foreground_without_background_marker_flags_crash() {
        let (store, mut manager, mut monitor) = setup();
        monitor.start();
        set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now() - Duration::hours(2)).unwrap();

        let check = monitor
            .handle_event(&mut manager, LifecycleEvent::Foreground)
            .unwrap();
        assert!(check.probable_crash);
        let refreshed = load_marker(&*store, keys::LAST_ACTIVE_AT).unwrap();
        assert!(Utc::now() - refreshed < Duration::minutes(1));
    }

    #[test]
    fn recent_last_active_is_not_a_crash() {
        let (store, mut manager, mut monitor) = setup();
        monitor.start();
        set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now() - Duration::minutes(10)).unwrap();
        let check = monitor
            .handle_event(&mut manager, LifecycleEvent::Foreground)
            .unwrap();
        assert!(!check.probable_crash);
    }

    #[test]
    fn heartbeat_refreshes_last_active() {
        let store = Arc::new(MemoryStore::new());
        let mut manager = SessionManager::new(store.clone(), Arc::new(StaticTemplates::empty()));
        let mut monitor = RecoveryMonitor::new(
            store.clone(),
            RecoveryConfig {
                heartbeat_interval_secs: 1,
                ..fast_config()
            },
        );
        monitor.start();
        monitor.handle_event(&mut manager, LifecycleEvent::Foreground);
        monitor.handle_event(&mut manager, LifecycleEvent::Foreground);
        store.remove(keys::LAST_ACTIVE_AT).unwrap();
        thread::sleep(StdDuration::from_millis(1500));
        monitor.stop();
        assert!(store.contains(keys::LAST_ACTIVE_AT));
    }

    #[test]
    fn fresh_session_is_not_orphaned() {
        let (store, _manager, monitor) = setup();
        store
            .set_json(keys::CURRENT_SESSION, &live_session(1, 0))
            .unwrap();
        assert!(monitor.check_for_orphaned_sessions().is_empty());
    }

    #[test]
    fn old_and_stale_sessions_are_orphaned() {
        let (store, _manager, monitor) = setup();
        store
            .set_json(keys::CURRENT_SESSION, &live_session(25, 0))
            .unwrap();
        let orphans = monitor.check_for_orphaned_sessions();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].reason, OrphanReason::ExceededMaxAge);

        store
            .set_json(keys::CURRENT_SESSION, &live_session(3, 3))
            .unwrap();
        let orphans = monitor.check_for_orphaned_sessions();
        assert_eq!(orphans[0].reason, OrphanReason::StaleUpdate);
    }

    #[test]
    fn live_history_entries_poison_the_slot() {
        let (store, _manager, monitor) = setup();
        let current = live_session(1, 0);
        let corrupted = live_session(1, 0);
        let mut finished = live_session(30, 29);
        finished.status = SessionStatus::Completed;
        store.set_json(keys::CURRENT_SESSION, &current).unwrap();
        store
            .set_json(keys::SESSION_HISTORY, &vec![corrupted.clone(), finished])
            .unwrap();

        let orphans = monitor.check_for_orphaned_sessions();
        assert_eq!(orphans.len(), 2);
        assert_eq!(orphans[0].session.id, current.id);
        assert_eq!(orphans[0].reason, OrphanReason::ConflictingSlot);
        assert_eq!(orphans[1].session.id, corrupted.id);
        assert_eq!(orphans[1].reason, OrphanReason::NonTerminalInHistory);
    }

    #[test]
    fn recover_retries_transient_failures() {
        let (store, mut manager, monitor) = setup();
        let mut session = live_session(25, 0);
        session.status = SessionStatus::Paused;
        store.fail_next_writes(2 + keys::LIFECYCLE_MARKERS.len() as u32);

        assert!(monitor.recover_session(&mut manager, session.clone()));
        let stored = load_current_session(&*store).unwrap();
        assert_eq!(stored.id, session.id);
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.recovery_attempts, 1);
        assert!(stored.recovered_at.is_some());
    }

    #[test]
    fn recover_gives_up_after_max_attempts() {
        let (store, mut manager, monitor) = setup();
        store.fail_next_writes(keys::LIFECYCLE_MARKERS.len() as u32 + 3);
        assert!(!monitor.recover_session(&mut manager, live_session(25, 0)));
        assert!(manager.current().is_none());
    }

    #[test]
    fn recover_refuses_to_displace_live_session() {
        let (_store, mut manager, monitor) = setup();
        manager.start(None, None).unwrap();
        assert!(!monitor.recover_session(&mut manager, live_session(25, 0)));
    }

    #[test]
    fn recovering_history_orphan_moves_it_to_slot() {
        let (store, mut manager, monitor) = setup();
        let orphan = live_session(2, 1);
        store
            .set_json(keys::SESSION_HISTORY, &vec![orphan.clone()])
            .unwrap();
        assert!(monitor.recover_session(&mut manager, orphan.clone()));
        assert!(load_history(&*store).is_empty());
        assert_eq!(manager.current().unwrap().id, orphan.id);
    }

    #[test]
    fn discard_session_clears_markers() {
        let (store, mut manager, monitor) = setup();
        let session = manager.start(None, None).unwrap().clone();
        set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now()).unwrap();
        let archived = monitor
            .discard_session(&mut manager, session, true)
            .unwrap()
            .unwrap();
        assert_eq!(archived.status, SessionStatus::Completed);
        assert!(!store.contains(keys::LAST_ACTIVE_AT));
        assert!(!store.contains(keys::CURRENT_SESSION));
    }

    #[test]
    fn cleanup_prunes_floor_and_stale_markers() {
        let (store, _manager, monitor) = setup();
        let mut old = live_session(24 * 91, 24 * 91);
        old.status = SessionStatus::Completed;
        let mut recent = live_session(24 * 10, 24 * 10);
        recent.status = SessionStatus::Completed;
        store
            .set_json(keys::SESSION_HISTORY, &vec![recent.clone(), old])
            .unwrap();
        set_marker(&*store, keys::BACKGROUNDED_AT, Utc::now() - Duration::days(8)).unwrap();
        set_marker(&*store, keys::LAST_ACTIVE_AT, Utc::now() - Duration::days(1)).unwrap();

        let stats = monitor.cleanup_old_sessions();
        assert_eq!(stats.sessions_removed, 1);
        assert_eq!(stats.markers_removed, 1);
        assert!(stats.errors.is_empty());
        let history = load_history(&*store);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, recent.id);
        assert!(store.contains(keys::LAST_ACTIVE_AT));
    }

    #[test]
    fn cleanup_with_unbounded_spans_prunes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let monitor = RecoveryMonitor::new(
            store.clone(),
            RecoveryConfig {
                history_floor_days: 1_000_000_000,
                marker_ttl_days: i64::MAX,
                ..fast_config()
            },
        );
        let mut old = live_session(24 * 400, 24 * 400);
        old.status = SessionStatus::Completed;
        store.set_json(keys::SESSION_HISTORY, &vec![old]).unwrap();
        set_marker(&*store, keys::BACKGROUNDED_AT, Utc::now() - Duration::days(30)).unwrap();

        let stats = monitor.cleanup_old_sessions();
        assert_eq!(stats, CleanupStats::default());
        assert_eq!(load_history(&*store).len(), 1);
        assert!(store.contains(keys::BACKGROUNDED_AT));
    }

    #[test]
    fn discarding_history_orphan_leaves_live_slot_alone() {
        let (store, mut manager, monitor) = setup();
        let live = manager.start(None, None).unwrap().clone();
        let dropped = live_session(2, 1);
        let archived = live_session(3, 2);
        store
            .set_json(keys::SESSION_HISTORY, &vec![dropped.clone(), archived.clone()])
            .unwrap();

        assert!(monitor
            .discard_session(&mut manager, dropped, false)
            .unwrap()
            .is_none());
        let kept = monitor
            .discard_session(&mut manager, archived.clone(), true)
            .unwrap()
            .unwrap();
        assert_eq!(kept.status, SessionStatus::Completed);

        assert_eq!(manager.current().unwrap().id, live.id);
        assert_eq!(load_current_session(&*store).unwrap().id, live.id);
        let history = load_history(&*store);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, archived.id);
        assert_eq!(history[0].status, SessionStatus::Completed);
    }
}
