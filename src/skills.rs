//! Skill catalog and orchestration-mode selection.
//!
//! A request activates a subset of a fixed skill catalog for one execution;
//! composition has no runtime state beyond the enabled flags. Mode selection
//! is an explicit enum chosen by the caller or by a pluggable classifier -
//! the engine itself never pattern-matches task descriptions.

use serde::{Deserialize, Serialize};

/// Category of a skill in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    /// Performs work (a scheduler strategy).
    Execution,
    /// Augments how work is performed.
    Enhancement,
    /// Verifies that work is actually complete.
    Guarantee,
}

/// One named capability in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub kind: SkillKind,
    pub enabled: bool,
}

/// The fixed skill catalog.
///
/// Activation clones the catalog with per-execution enable flags; the
/// catalog itself never changes at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    /// The standard catalog shipped with the engine.
    pub fn standard() -> Self {
        let entry = |name: &str, kind: SkillKind| Skill {
            name: name.to_string(),
            kind,
            enabled: false,
        };
        Self {
            skills: vec![
                entry("pipeline", SkillKind::Execution),
                entry("swarm", SkillKind::Execution),
                entry("ultrawork", SkillKind::Execution),
                entry("deepthink", SkillKind::Enhancement),
                entry("context-carryover", SkillKind::Enhancement),
                entry("ralph", SkillKind::Guarantee),
            ],
        }
    }

    /// All catalog entries.
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Activate the named skills for one execution.
    ///
    /// Unknown names are ignored; the returned set carries every catalog
    /// entry with its enable flag set accordingly.
    pub fn activate(&self, names: &[&str]) -> SkillSet {
        let skills = self
            .skills
            .iter()
            .map(|s| Skill {
                enabled: names.contains(&s.name.as_str()),
                ..s.clone()
            })
            .collect();
        SkillSet { skills }
    }
}

impl Default for SkillCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// The skills enabled for a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSet {
    skills: Vec<Skill>,
}

impl SkillSet {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.skills.iter().any(|s| s.enabled && s.name == name)
    }

    /// Enabled skills of the given kind.
    pub fn enabled_of_kind(&self, kind: SkillKind) -> impl Iterator<Item = &Skill> {
        self.skills
            .iter()
            .filter(move |s| s.enabled && s.kind == kind)
    }
}

/// Orchestration strategy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Staged pipeline on one task.
    Pipeline,
    /// Worker pool over the task store.
    Pool,
    /// Bounded-parallel explicit task list.
    Fanout,
    /// Retry-until-verified loop.
    Guarantee,
}

/// Maps a task description to an orchestration mode.
///
/// # Contract
/// - Pure: the same input always yields the same mode
/// - Total: every input maps to some mode (no "unclassifiable" case)
///
/// The engine ships no keyword heuristics; callers either select a mode
/// explicitly (see [`FixedMode`]) or plug in their own classifier.
pub trait ModeClassifier: Send + Sync {
    fn classify(&self, description: &str) -> Mode;
}

/// Classifier that ignores the input and always picks one mode.
#[derive(Debug, Clone, Copy)]
pub struct FixedMode(pub Mode);

impl ModeClassifier for FixedMode {
    fn classify(&self, _description: &str) -> Mode {
        self.0
    }
}
