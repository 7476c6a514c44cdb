//! Applies one parsed command to the engine.

use serde::Serialize;
use workout_core::{
    NewExercise, OrphanReason, Result, SetCompletion, SetDraft, SetUpdate, StorageConfig,
    WorkoutError,
};

use crate::app::App;
use crate::{Commands, RetentionAction, SetValues};

pub fn run(command: Commands, storage: &StorageConfig) -> Result<()> {
    let App {
        mut manager,
        mut monitor,
        retention,
        startup,
    } = App::open(storage)?;

    match command {
        Commands::Start { name, template } => {
            let session = manager.start(name, template)?;
            println!("{}", session.id);
        }
        Commands::Pause => manager.pause()?,
        Commands::Resume => manager.resume()?,
        Commands::AddExercise {
            exercise_id,
            name,
            muscle_groups,
            rest,
            notes,
        } => {
            let id = manager.add_exercise(NewExercise {
                exercise_id,
                exercise_name: name,
                muscle_groups,
                target_rest_time: rest,
                notes,
            })?;
            println!("{}", id);
        }
        Commands::RemoveExercise { exercise } => manager.remove_exercise(&exercise)?,
        Commands::Reorder { exercises } => manager.reorder_exercises(&exercises)?,
        Commands::AddSet { exercise, values } => {
            let id = manager.add_set(&exercise, draft_from(values))?;
            println!("{}", id);
        }
        Commands::UpdateSet {
            exercise,
            set,
            values,
        } => manager.update_set(&exercise, &set, update_from(values))?,
        Commands::CompleteSet { exercise, set } => {
            match manager.complete_set(&exercise, &set)? {
                SetCompletion::Completed { personal_record } => {
                    println!("completed{}", if personal_record { " (new 1RM)" } else { "" });
                }
                SetCompletion::AlreadyCompleted => println!("already completed"),
                SetCompletion::NotCompletable => {
                    println!("not completed: set needs positive weight and reps");
                }
            }
        }
        Commands::DeleteSet { exercise, set } => manager.delete_set(&exercise, &set)?,
        Commands::Notes { text } => manager.update_notes(text)?,
        Commands::Rename { name } => manager.update_name(name)?,
        Commands::Complete { notes } => {
            let session = manager.complete(notes)?;
            print_json(&session)?;
        }
        Commands::Discard { keep } => {
            let session = manager
                .current()
                .cloned()
                .ok_or(WorkoutError::NoActiveSession)?;
            let archived = manager.discard(session, keep)?;
            print_json(&archived)?;
        }
        Commands::Status => print_json(&manager.current())?,
        Commands::History { limit } => {
            let mut history = manager.history();
            if let Some(limit) = limit {
                history.truncate(limit);
            }
            print_json(&history)?;
        }
        Commands::Records => print_json(&manager.personal_records())?,
        Commands::Lifecycle { event } => {
            let check = monitor.handle_event(&mut manager, event.into());
            if let Some(check) = check {
                print_json(&serde_json::json!({ "probable_crash": check.probable_crash }))?;
            }
        }
        Commands::Orphans => print_json(&monitor.check_for_orphaned_sessions())?,
        Commands::Recover {
            session,
            discard,
            keep,
        } => {
            let orphans = monitor
                .check_for_orphaned_sessions()
                .into_iter()
                .filter(|o| session.as_deref().map_or(true, |id| o.session.id == id))
                .collect::<Vec<_>>();
            if orphans.is_empty() {
                tracing::info!(filter = ?session, "No orphaned sessions to act on");
            }

            let mut outcomes = Vec::with_capacity(orphans.len());
            for orphan in orphans {
                let id = orphan.session.id.clone();
                let ok = if discard {
                    monitor
                        .discard_session(&mut manager, orphan.session, keep)
                        .map(|_| true)
                        .unwrap_or_else(|err| {
                            tracing::warn!(session_id = %id, error = %err, "Discard failed");
                            false
                        })
                } else {
                    monitor.recover_session(&mut manager, orphan.session)
                };
                outcomes.push(RecoverOutcome {
                    session_id: id,
                    reason: orphan.reason,
                    action: if discard { "discarded" } else { "recovered" },
                    ok,
                });
            }
            print_json(&outcomes)?;
        }
        Commands::Cleanup => print_json(&startup)?,
        Commands::Rest { secs, exercise } => {
            let remaining = manager.rest_timer().subscribe();
            let duration = manager.start_rest_with(exercise.as_deref(), secs)?;
            tracing::debug!(duration, "Waiting on rest timer");
            for secs in remaining.iter() {
                if secs == 0 {
                    break;
                }
            }
        }
        Commands::Tier { tier } => {
            let report = retention.set_tier(tier.into())?;
            print_json(&report)?;
        }
        Commands::Retention { action } => match action {
            RetentionAction::Usage => print_json(&retention.compute_usage())?,
            RetentionAction::Apply => print_json(&retention.apply_retention()?)?,
        },
    }

    Ok(())
}

#[derive(Serialize)]
struct RecoverOutcome {
    session_id: String,
    reason: OrphanReason,
    action: &'static str,
    ok: bool,
}

fn draft_from(values: SetValues) -> SetDraft {
    SetDraft {
        set_type: values.set_type.map(Into::into).unwrap_or_default(),
        weight: values.weight,
        reps: values.reps,
        rpe: values.rpe,
    }
}

fn update_from(values: SetValues) -> SetUpdate {
    SetUpdate {
        set_type: values.set_type.map(Into::into),
        weight: values.weight,
        reps: values.reps,
        rpe: values.rpe,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|source| WorkoutError::Json {
        context: "Failed to render output".to_string(),
        source,
    })?;
    println!("{}", text);
    Ok(())
}
