//! # workout-core
//!
//! Durable workout-session engine: tracks one in-progress training session from
//! start to completion or abandonment, survives process termination, detects
//! personal records, and enforces tier-based data retention.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The only background work is the
//!   rest-timer ticker and the foreground heartbeat, both plain threads.
//! - **Single writer**: One local actor mutates one session at a time. There is no
//!   internal locking around the session; callers provide their own if shared.
//! - **Store is the source of truth**: Every mutation writes the whole session
//!   through to the [`KeyValueStore`]. A failed ordinary write heals on the next one.
//! - **Graceful degradation**: Missing or corrupt stored values load as empty/default,
//!   logged, never a crash.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workout_core::{FileStore, SessionManager, StaticTemplates, StorageConfig};
//!
//! let storage = StorageConfig::default();
//! let store = Arc::new(FileStore::new(&storage.store_dir()));
//! let mut manager = SessionManager::load(store, Arc::new(StaticTemplates::empty()));
//! manager.start(Some("Push day".into()), None)?;
//! ```

pub mod config;
pub mod error;
pub mod notify;
pub mod records;
pub mod retention;
pub mod session;
pub mod storage;
pub mod store;
pub mod templates;
pub mod timer;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{load_engine_config, EngineConfig, RecoveryConfig, RestTimerConfig};
pub use error::{Result, WorkoutError};
pub use notify::{NoopSink, NotificationSink, TimerEvent, TracingSink};
pub use retention::{
    policy_for, PruneCounts, RetentionDays, RetentionEngine, RetentionPolicy, RetentionReport,
    RetentionUsage, SubscriptionTier, UsageBucket,
};
pub use session::*;
pub use storage::StorageConfig;
pub use store::{Durability, FileStore, KeyValueStore, KeyValueStoreExt, MemoryStore};
pub use templates::{FileTemplates, StaticTemplates, TemplateProvider, WorkoutTemplate};
pub use timer::RestTimerController;
pub use types::*;
