//! workout: command-line host for the workout-session engine.
//!
//! Each invocation loads the current session from disk, applies one command and
//! exits. Inspection commands print JSON to stdout; notifications go to stderr.
//!
//! ## Subcommands
//!
//! - Session: `start`, `pause`, `resume`, `complete`, `discard`, `notes`, `rename`
//! - Exercises and sets: `add-exercise`, `remove-exercise`, `reorder`, `add-set`,
//!   `update-set`, `complete-set`, `delete-set`, `rest`
//! - Inspection: `status`, `history`, `records`
//! - Recovery: `lifecycle`, `orphans`, `recover`, `cleanup`
//! - Retention: `tier`, `retention`

mod app;
mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use workout_core::{LifecycleEvent, SetType, StorageConfig, SubscriptionTier};

#[derive(Parser, Debug)]
#[command(name = "workout")]
#[command(about = "Track a workout session that survives restarts")]
#[command(version)]
struct Cli {
    /// Storage root (defaults to $WORKOUT_HOME or ~/.workout)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new session, optionally from a template
    Start {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        template: Option<String>,
    },

    /// Pause the active session
    Pause,

    /// Resume a paused session
    Resume,

    /// Append an exercise to the session
    AddExercise {
        /// Catalog exercise id
        exercise_id: String,

        /// Display name
        name: String,

        #[arg(long = "muscle")]
        muscle_groups: Vec<String>,

        /// Target rest between sets, in seconds
        #[arg(long)]
        rest: Option<u32>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Remove an exercise by its session-scoped id
    RemoveExercise { exercise: String },

    /// Reorder exercises; ids not listed keep their relative order at the end
    Reorder {
        #[arg(required = true)]
        exercises: Vec<String>,
    },

    /// Append a set to an exercise
    AddSet {
        exercise: String,

        #[command(flatten)]
        values: SetValues,
    },

    /// Change fields of an existing set
    UpdateSet {
        exercise: String,
        set: String,

        #[command(flatten)]
        values: SetValues,
    },

    /// Mark a set completed and check it for a 1RM record
    CompleteSet { exercise: String, set: String },

    /// Delete a set; remaining sets are renumbered
    DeleteSet { exercise: String, set: String },

    /// Replace the session notes (omit to clear)
    Notes { text: Option<String> },

    /// Replace the session name (omit to clear)
    Rename { name: Option<String> },

    /// Finish the session, detect records and archive it
    Complete {
        #[arg(long)]
        notes: Option<String>,
    },

    /// Abandon the session
    Discard {
        /// Archive it as completed instead of dropping it
        #[arg(long)]
        keep: bool,
    },

    /// Print the current session
    Status,

    /// Print archived sessions, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the personal-record ledger
    Records,

    /// Deliver a host lifecycle event
    Lifecycle {
        #[arg(value_enum)]
        event: LifecycleArg,
    },

    /// List sessions that look abandoned
    Orphans,

    /// Recover (or discard) orphaned sessions
    Recover {
        /// Only act on this session id
        session: Option<String>,

        /// Discard instead of recovering
        #[arg(long)]
        discard: bool,

        /// With --discard, archive as completed
        #[arg(long, requires = "discard")]
        keep: bool,
    },

    /// Print what start-up cleanup and retention removed
    Cleanup,

    /// Run the rest timer until it reaches zero
    Rest {
        /// Duration in seconds (defaults to the exercise target or the configured default)
        secs: Option<u32>,

        /// Use this exercise's target rest time
        #[arg(long)]
        exercise: Option<String>,
    },

    /// Change the subscription tier; downgrades prune immediately
    Tier {
        #[arg(value_enum)]
        tier: TierArg,
    },

    /// Inspect or enforce tier retention
    Retention {
        #[arg(value_enum)]
        action: RetentionAction,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct SetValues {
    #[arg(long)]
    weight: Option<f64>,

    #[arg(long)]
    reps: Option<u32>,

    /// Rate of perceived exertion, 1-10
    #[arg(long)]
    rpe: Option<u8>,

    #[arg(long = "type", value_enum)]
    set_type: Option<SetTypeArg>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SetTypeArg {
    Working,
    Warmup,
    Dropset,
    Failure,
}

impl From<SetTypeArg> for SetType {
    fn from(arg: SetTypeArg) -> Self {
        match arg {
            SetTypeArg::Working => SetType::Working,
            SetTypeArg::Warmup => SetType::Warmup,
            SetTypeArg::Dropset => SetType::Dropset,
            SetTypeArg::Failure => SetType::Failure,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LifecycleArg {
    Foreground,
    Background,
    Inactive,
}

impl From<LifecycleArg> for LifecycleEvent {
    fn from(arg: LifecycleArg) -> Self {
        match arg {
            LifecycleArg::Foreground => LifecycleEvent::Foreground,
            LifecycleArg::Background => LifecycleEvent::Background,
            LifecycleArg::Inactive => LifecycleEvent::Inactive,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum TierArg {
    Free,
    Premium,
    Pro,
}

impl From<TierArg> for SubscriptionTier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Free => SubscriptionTier::Free,
            TierArg::Premium => SubscriptionTier::Premium,
            TierArg::Pro => SubscriptionTier::Pro,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum RetentionAction {
    Usage,
    Apply,
}

fn main() {
    let cli = Cli::parse();
    let storage = cli
        .home
        .map(StorageConfig::with_root)
        .unwrap_or_default();
    let logging_guard = logging::init(&storage.logs_dir());

    if let Err(e) = commands::run(cli.command, &storage) {
        if e.is_business_error() {
            tracing::info!(error = %e, "workout command rejected");
        } else {
            tracing::error!(error = %e, "workout command failed");
        }
        eprintln!("error: {}", e);
        // exit() skips destructors; flush buffered log lines first
        drop(logging_guard);
        std::process::exit(1);
    }
}
