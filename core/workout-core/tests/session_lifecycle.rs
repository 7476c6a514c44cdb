//! End-to-end session scenarios over a file-backed store.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tempfile::TempDir;
use workout_core::store::{keys, load_current_session, load_history, load_ledger};
use workout_core::{
    FileStore, KeyValueStore, KeyValueStoreExt, NewExercise, NotificationSink, OrphanReason,
    PersonalRecord, RecordType, RecoveryConfig, RecoveryMonitor, RetentionEngine, SessionManager,
    SessionStatus, SetCompletion, SetDraft, StaticTemplates, SubscriptionTier, WorkoutSession,
};

#[derive(Default)]
struct CapturingSink {
    records: Mutex<Vec<PersonalRecord>>,
}

impl NotificationSink for CapturingSink {
    fn personal_records(&self, records: &[PersonalRecord]) {
        self.records.lock().unwrap().extend_from_slice(records);
    }
}

fn file_store() -> (TempDir, Arc<FileStore>) {
    let temp = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(FileStore::new(&temp.path().join("store")));
    (temp, store)
}

fn manager_for(store: &Arc<FileStore>) -> SessionManager {
    SessionManager::load(store.clone(), Arc::new(StaticTemplates::empty()))
}

fn bench_press() -> NewExercise {
    NewExercise {
        exercise_id: "bench".into(),
        exercise_name: "Bench Press".into(),
        muscle_groups: vec!["chest".into()],
        target_rest_time: Some(120),
        notes: None,
    }
}

fn draft(weight: f64, reps: u32) -> SetDraft {
    SetDraft {
        weight: Some(weight),
        reps: Some(reps),
        ..SetDraft::default()
    }
}

#[test]
fn one_rep_max_record_lands_in_ledger_on_completion() {
    let (_temp, store) = file_store();
    let sink = Arc::new(CapturingSink::default());
    let mut manager = manager_for(&store).with_sink(sink.clone());

    manager.start(Some("Push".into()), None).unwrap();
    let exercise = manager.add_exercise(bench_press()).unwrap();
    let set = manager.add_set(&exercise, draft(200.0, 5)).unwrap();
    assert_eq!(
        manager.complete_set(&exercise, &set).unwrap(),
        SetCompletion::Completed {
            personal_record: true
        }
    );
    assert!(load_ledger(&*store).is_empty());

    let session = manager.complete(None).unwrap();

    let ledger = load_ledger(&*store);
    let one_rm = ledger
        .iter()
        .find(|r| r.exercise_id == "bench" && r.record_type == RecordType::OneRepMax)
        .expect("1rm record");
    assert_eq!(one_rm.value, 233.0);
    assert_eq!(one_rm.previous_value, None);
    assert_eq!(one_rm.workout_session_id, session.id);
    assert!(session
        .personal_records
        .iter()
        .any(|r| r.record_type == RecordType::OneRepMax));
    assert!(!sink.records.lock().unwrap().is_empty());
}

#[test]
fn ledger_never_decreases_across_sessions() {
    let (_temp, store) = file_store();
    let mut manager = manager_for(&store);

    for (weight, reps) in [(200.0, 5), (180.0, 5), (200.0, 5), (210.0, 5)] {
        manager.start(None, None).unwrap();
        let exercise = manager.add_exercise(bench_press()).unwrap();
        let set = manager.add_set(&exercise, draft(weight, reps)).unwrap();
        manager.complete_set(&exercise, &set).unwrap();
        manager.complete(None).unwrap();
    }

    let ledger = load_ledger(&*store);
    let one_rm: Vec<&PersonalRecord> = ledger
        .iter()
        .filter(|r| r.record_type == RecordType::OneRepMax)
        .collect();
    assert_eq!(one_rm.len(), 1);
    assert_eq!(one_rm[0].value, 245.0);
    assert_eq!(one_rm[0].previous_value, Some(233.0));
    assert_eq!(manager.history().len(), 4);
}

#[test]
fn bodyweight_reps_do_not_update_reps_record() {
    let (_temp, store) = file_store();
    let mut manager = manager_for(&store);
    manager.start(None, None).unwrap();
    let exercise = manager
        .add_exercise(NewExercise {
            exercise_id: "pullup".into(),
            exercise_name: "Pull Up".into(),
            ..NewExercise::default()
        })
        .unwrap();
    let set = manager.add_set(&exercise, draft(0.0, 30)).unwrap();
    assert_eq!(
        manager.complete_set(&exercise, &set).unwrap(),
        SetCompletion::NotCompletable
    );
    let light = manager.add_set(&exercise, draft(20.0, 30)).unwrap();
    manager.complete_set(&exercise, &light).unwrap();
    manager.complete(None).unwrap();

    let ledger = load_ledger(&*store);
    assert!(ledger.iter().all(|r| r.record_type != RecordType::Reps));
}

#[test]
fn dangling_sets_are_removed_on_completion() {
    let (_temp, store) = file_store();
    let mut manager = manager_for(&store);
    manager.start(None, None).unwrap();
    let exercise = manager.add_exercise(bench_press()).unwrap();
    let kept = manager.add_set(&exercise, draft(100.0, 5)).unwrap();
    manager.add_set(&exercise, draft(0.0, 0)).unwrap();

    let session = manager.complete(None).unwrap();
    let sets = &session.exercises[0].sets;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].id, kept);
    assert_eq!(sets[0].set_number, 1);
}

#[test]
fn current_slot_never_holds_terminal_session() {
    let (_temp, store) = file_store();
    let mut manager = manager_for(&store);

    manager.start(None, None).unwrap();
    manager.pause().unwrap();
    let current = load_current_session(&*store).unwrap();
    assert!(!current.status.is_terminal());

    manager.complete(None).unwrap();
    assert!(load_current_session(&*store).is_none());
    assert!(load_history(&*store)
        .iter()
        .all(|s| s.status == SessionStatus::Completed));
}

#[test]
fn restart_resumes_session_from_disk() {
    let (_temp, store) = file_store();
    let session_id = {
        let mut manager = manager_for(&store);
        manager.start(Some("Evening".into()), None).unwrap();
        let exercise = manager.add_exercise(bench_press()).unwrap();
        manager.add_set(&exercise, draft(60.0, 10)).unwrap();
        manager.current().unwrap().id.clone()
    };

    let manager = manager_for(&store);
    let restored = manager.current().expect("restored session");
    assert_eq!(restored.id, session_id);
    assert_eq!(restored.exercises[0].sets.len(), 1);
}

#[test]
fn crashed_session_is_found_and_recovered() {
    let (_temp, store) = file_store();
    let mut session = WorkoutSession::new(Utc::now() - Duration::hours(25), None, None);
    session.updated_at = Utc::now() - Duration::hours(24);
    store.set_json(keys::CURRENT_SESSION, &session).unwrap();
    store
        .set_json(keys::LAST_ACTIVE_AT, &(Utc::now() - Duration::hours(24)))
        .unwrap();

    let mut manager = manager_for(&store);
    let monitor = RecoveryMonitor::new(
        store.clone(),
        RecoveryConfig {
            retry_delay_ms: 1,
            ..RecoveryConfig::default()
        },
    );

    let orphans = monitor.check_for_orphaned_sessions();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].session.id, session.id);
    assert_eq!(orphans[0].reason, OrphanReason::ExceededMaxAge);

    assert!(monitor.recover_session(&mut manager, orphans[0].session.clone()));

    let recovered = load_current_session(&*store).unwrap();
    assert_eq!(recovered.status, SessionStatus::Active);
    assert_eq!(recovered.recovery_attempts, 1);
    assert!(store.get_raw(keys::LAST_ACTIVE_AT).unwrap().is_none());
    assert!(store.get_raw(keys::BACKGROUNDED_AT).unwrap().is_none());
}

#[test]
fn retention_prunes_free_tier_history() {
    let (_temp, store) = file_store();
    let mut old = WorkoutSession::new(Utc::now() - Duration::days(91), None, None);
    old.status = SessionStatus::Completed;
    let mut recent = WorkoutSession::new(Utc::now() - Duration::days(89), None, None);
    recent.status = SessionStatus::Completed;
    store
        .set_json(keys::SESSION_HISTORY, &vec![recent.clone(), old])
        .unwrap();

    let engine = RetentionEngine::new(store.clone());
    assert_eq!(engine.current_tier(), SubscriptionTier::Free);

    let report = engine.apply_retention().unwrap();
    assert_eq!(report.workouts.deleted_count, 1);
    let history = load_history(&*store);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, recent.id);

    let again = engine.apply_retention().unwrap();
    assert_eq!(again.workouts.deleted_count, 0);
}
