//! Wires the engine components to the on-disk store and runs start-up maintenance.

use std::sync::Arc;

use serde::Serialize;
use workout_core::{
    load_engine_config, CleanupStats, EngineConfig, FileStore, FileTemplates, KeyValueStore,
    NotificationSink, PersonalRecord, RecoveryMonitor, RestTimerController, RetentionEngine,
    RetentionReport, SessionManager, StaticTemplates, StorageConfig, TemplateProvider, TimerEvent,
};

/// Prints notifications for the person at the terminal.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn timer_event(&self, event: &TimerEvent) {
        match event {
            TimerEvent::Started { duration_secs, .. } => eprintln!("Rest: {}s", duration_secs),
            TimerEvent::Warning { remaining_secs } => eprintln!("Rest: {}s left", remaining_secs),
            TimerEvent::Completed { .. } => eprintln!("Rest over"),
            TimerEvent::Stopped => eprintln!("Rest cancelled"),
        }
        tracing::debug!(event = ?event, "Rest timer event");
    }

    fn personal_records(&self, records: &[PersonalRecord]) {
        for record in records {
            eprintln!(
                "New {} record for {}: {}{}",
                record.record_type,
                record.exercise_name,
                record.value,
                record
                    .previous_value
                    .map(|p| format!(" (was {})", p))
                    .unwrap_or_default()
            );
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartupReport {
    pub cleanup: CleanupStats,
    pub retention: Option<RetentionReport>,
}

pub struct App {
    pub manager: SessionManager,
    pub monitor: RecoveryMonitor,
    pub retention: RetentionEngine,
    pub startup: StartupReport,
}

impl App {
    pub fn open(storage: &StorageConfig) -> workout_core::Result<App> {
        let config: EngineConfig = load_engine_config(&storage.config_file())?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&storage.store_dir()));

        let templates: Arc<dyn TemplateProvider> =
            match FileTemplates::load(&storage.templates_file()) {
                Ok(templates) => Arc::new(templates),
                Err(err) => {
                    tracing::warn!(error = %err, "Template catalog unreadable; continuing without templates");
                    Arc::new(StaticTemplates::empty())
                }
            };

        let sink: Arc<dyn NotificationSink> = Arc::new(TerminalSink);
        let rest_timer = RestTimerController::new(config.rest_timer.clone(), Arc::clone(&sink));
        let manager = SessionManager::load(Arc::clone(&store), templates)
            .with_sink(sink)
            .with_rest_timer(rest_timer);

        let mut monitor = RecoveryMonitor::new(Arc::clone(&store), config.recovery.clone());
        monitor.start();
        let retention = RetentionEngine::new(store);

        // History floor first, then the tier ceiling
        let cleanup = monitor.cleanup_old_sessions();
        let retention_report = match retention.apply_retention() {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(error = %err, "Start-up retention pass failed");
                None
            }
        };

        Ok(App {
            manager,
            monitor,
            retention,
            startup: StartupReport {
                cleanup,
                retention: retention_report,
            },
        })
    }
}
