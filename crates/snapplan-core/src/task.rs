use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PRIORITY: i16 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    #[default]
    Todo,
    Doing,
    Done,
    /// Anything the store holds that is not one of the three workflow states.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Todo => "Todo",
            TaskState::Doing => "Doing",
            TaskState::Done => "Done",
            TaskState::Unknown => "?",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(TaskState::Todo),
            "doing" => Ok(TaskState::Doing),
            "done" => Ok(TaskState::Done),
            other => Err(anyhow!("expected todo|doing|done, got: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,

    #[serde(default)]
    pub state: TaskState,

    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub note: String,

    #[serde(default = "default_priority")]
    pub priority_score: i16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<u8>>,
}

fn default_priority() -> i16 {
    DEFAULT_PRIORITY
}

impl Task {
    /// A fresh task as created by the "add" action: due now, mid priority.
    pub fn new_todo(now: DateTime<Utc>, photo: Option<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Todo,
            due_date: Some(now),
            note: String::new(),
            priority_score: DEFAULT_PRIORITY,
            photo,
        }
    }

    pub fn has_photo(&self) -> bool {
        self.photo.as_ref().is_some_and(|bytes| !bytes.is_empty())
    }

    /// Applies [`migrate_priority_score`] in place. Returns whether the score changed.
    pub fn migrate_priority(&mut self) -> bool {
        let migrated = migrate_priority_score(self.priority_score);
        let changed = migrated != self.priority_score;
        self.priority_score = migrated;
        changed
    }
}

/// Collapses a legacy 1..=100 score into the 1..=3 buckets.
///
/// Scores of 3 or less are already migrated and pass through untouched, which
/// makes the rule idempotent.
pub fn migrate_priority_score(score: i16) -> i16 {
    match score {
        i16::MIN..=3 => score,
        4..=15 => 1,
        16..=30 => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DEFAULT_PRIORITY, Task, TaskState, migrate_priority_score};

    #[test]
    fn new_todo_uses_add_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let task = Task::new_todo(now, None);

        assert_eq!(task.state, TaskState::Todo);
        assert_eq!(task.due_date, Some(now));
        assert_eq!(task.priority_score, DEFAULT_PRIORITY);
        assert!(task.note.is_empty());
        assert!(!task.has_photo());
    }

    #[test]
    fn migration_buckets_legacy_scores() {
        assert_eq!(migrate_priority_score(4), 1);
        assert_eq!(migrate_priority_score(15), 1);
        assert_eq!(migrate_priority_score(16), 2);
        assert_eq!(migrate_priority_score(30), 2);
        assert_eq!(migrate_priority_score(31), 3);
        assert_eq!(migrate_priority_score(100), 3);
        assert_eq!(migrate_priority_score(2), 2);
    }

    #[test]
    fn migration_is_idempotent() {
        for score in -5..=120 {
            let once = migrate_priority_score(score);
            assert_eq!(migrate_priority_score(once), once, "score {score}");
        }
    }

    #[test]
    fn unknown_state_strings_deserialize_to_unknown() {
        let raw = r#"{"id":"6f1c1f8e-6f43-4a5e-9d8b-1de2b8d1d6a1","state":"Archived","note":"x"}"#;
        let task: Task = serde_json::from_str(raw).expect("parse task");

        assert_eq!(task.state, TaskState::Unknown);
        assert_eq!(task.priority_score, DEFAULT_PRIORITY);
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("DOING".parse::<TaskState>().unwrap(), TaskState::Doing);
        assert!("archived".parse::<TaskState>().is_err());
    }
}
