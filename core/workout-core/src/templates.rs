//! Workout templates consumed when starting a session.
//!
//! The catalog itself is external; this module only defines the lookup seam
//! plus two providers (in-memory and a JSON catalog file).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkoutError};
use crate::types::{new_id, WorkoutExercise};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub exercises: Vec<TemplateExercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateExercise {
    pub exercise_id: String,
    pub exercise_name: String,
    #[serde(default)]
    pub muscle_groups: Vec<String>,
    #[serde(default)]
    pub target_rest_time: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WorkoutTemplate {
    /// Expands the template into session exercises with no sets.
    pub fn instantiate(&self) -> Vec<WorkoutExercise> {
        self.exercises
            .iter()
            .enumerate()
            .map(|(index, exercise)| WorkoutExercise {
                id: new_id(),
                exercise_id: exercise.exercise_id.clone(),
                exercise_name: exercise.exercise_name.clone(),
                muscle_groups: exercise.muscle_groups.clone(),
                sets: Vec::new(),
                target_rest_time: exercise.target_rest_time,
                order: index as u32,
                notes: exercise.notes.clone(),
            })
            .collect()
    }
}

pub trait TemplateProvider: Send + Sync {
    fn get_template(&self, id: &str) -> Option<WorkoutTemplate>;
}

/// Fixed in-memory catalog.
#[derive(Debug, Default, Clone)]
pub struct StaticTemplates {
    templates: HashMap<String, WorkoutTemplate>,
}

impl StaticTemplates {
    pub fn new(templates: impl IntoIterator<Item = WorkoutTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl TemplateProvider for StaticTemplates {
    fn get_template(&self, id: &str) -> Option<WorkoutTemplate> {
        self.templates.get(id).cloned()
    }
}

/// Catalog read from a JSON array of templates. A missing file is an empty catalog.
pub struct FileTemplates {
    inner: StaticTemplates,
}

impl FileTemplates {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                inner: StaticTemplates::empty(),
            });
        }
        let content = fs_err::read_to_string(path).map_err(|source| WorkoutError::Io {
            context: format!("reading templates {}", path.display()),
            source,
        })?;
        let templates: Vec<WorkoutTemplate> =
            serde_json::from_str(&content).map_err(|source| WorkoutError::Json {
                context: format!("parsing templates {}", path.display()),
                source,
            })?;
        Ok(Self {
            inner: StaticTemplates::new(templates),
        })
    }
}

impl TemplateProvider for FileTemplates {
    fn get_template(&self, id: &str) -> Option<WorkoutTemplate> {
        self.inner.get_template(id)
    }
}
