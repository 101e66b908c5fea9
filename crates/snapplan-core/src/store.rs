use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::task::Task;

/// Schema version written once legacy priority scores have been bucketed.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed parsing {} line {line}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode task {id}")]
    Encode {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid schema file {}: {message}", .path.display())]
    Schema { path: PathBuf, message: String },

    #[error("task not found: {0}")]
    NotFound(Uuid),
}

/// The persistence collaborator the engine reads from and writes through.
pub trait TaskStore {
    fn list_all_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Inserts the task, or replaces the stored task with the same id.
    fn save_task(&mut self, task: &Task) -> Result<(), StoreError>;

    fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tasks: Vec<Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }
}

impl TaskStore for MemoryStore {
    fn list_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.clone())
    }

    fn save_task(&mut self, task: &Task) -> Result<(), StoreError> {
        upsert(&mut self.tasks, task);
        Ok(())
    }

    fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError> {
        remove(&mut self.tasks, id)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    schema_version: u32,
}

#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub schema_path: PathBuf,
}

impl JsonlStore {
    /// Opens (creating if needed) the store. A brand-new directory is stamped
    /// with the current schema; older ones wait for [`JsonlStore::ensure_migrated`].
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Write {
            path: data_dir.clone(),
            source,
        })?;

        let tasks_path = data_dir.join("tasks.data");
        let schema_path = data_dir.join("schema.toml");
        let fresh = !tasks_path.exists();

        if fresh {
            fs::write(&tasks_path, "").map_err(|source| StoreError::Write {
                path: tasks_path.clone(),
                source,
            })?;
        }

        let store = Self {
            data_dir,
            tasks_path,
            schema_path,
        };

        if fresh && !store.schema_path.exists() {
            store.write_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        info!(
            data_dir = %store.data_dir.display(),
            tasks = %store.tasks_path.display(),
            "opened task store"
        );

        Ok(store)
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        if !self.schema_path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&self.schema_path).map_err(|source| StoreError::Read {
            path: self.schema_path.clone(),
            source,
        })?;
        let parsed: SchemaFile = toml::from_str(&raw).map_err(|err| StoreError::Schema {
            path: self.schema_path.clone(),
            message: err.to_string(),
        })?;
        Ok(parsed.schema_version)
    }

    fn write_schema_version(&self, version: u32) -> Result<(), StoreError> {
        let body = toml::to_string(&SchemaFile {
            schema_version: version,
        })
        .map_err(|err| StoreError::Schema {
            path: self.schema_path.clone(),
            message: err.to_string(),
        })?;
        fs::write(&self.schema_path, body).map_err(|source| StoreError::Write {
            path: self.schema_path.clone(),
            source,
        })
    }

    /// Runs the priority migration if this directory has not had it yet.
    /// Returns the number of changed tasks when it ran.
    pub fn ensure_migrated(&self) -> Result<Option<usize>, StoreError> {
        let version = self.schema_version()?;
        if version >= CURRENT_SCHEMA_VERSION {
            debug!(version, "schema up to date");
            return Ok(None);
        }
        self.migrate_priorities().map(Some)
    }

    /// Buckets every legacy priority score and records the new schema version.
    /// Returns how many tasks changed.
    #[tracing::instrument(skip(self))]
    fn migrate_priorities(&self) -> Result<usize, StoreError> {
        let mut tasks = load_jsonl(&self.tasks_path)?;
        let changed = tasks
            .iter_mut()
            .map(Task::migrate_priority)
            .filter(|changed| *changed)
            .count();

        if changed > 0 {
            save_jsonl_atomic(&self.tasks_path, &tasks)?;
        }
        self.write_schema_version(CURRENT_SCHEMA_VERSION)?;

        info!(total = tasks.len(), changed, "migrated priority scores");
        Ok(changed)
    }
}

impl TaskStore for JsonlStore {
    #[tracing::instrument(skip(self))]
    fn list_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        load_jsonl(&self.tasks_path)
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    fn save_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = load_jsonl(&self.tasks_path)?;
        upsert(&mut tasks, task);
        save_jsonl_atomic(&self.tasks_path, &tasks)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError> {
        let mut tasks = load_jsonl(&self.tasks_path)?;
        remove(&mut tasks, id)?;
        save_jsonl_atomic(&self.tasks_path, &tasks)
    }
}

fn upsert(tasks: &mut Vec<Task>, task: &Task) {
    match tasks.iter_mut().find(|existing| existing.id == task.id) {
        Some(existing) => *existing = task.clone(),
        None => tasks.push(task.clone()),
    }
}

fn remove(tasks: &mut Vec<Task>, id: Uuid) -> Result<(), StoreError> {
    let idx = tasks
        .iter()
        .position(|t| t.id == id)
        .ok_or(StoreError::NotFound(id))?;
    tasks.remove(idx);
    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<Task>, StoreError> {
    debug!(file = %path.display(), "loading jsonl");
    let read_err = |source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(read_err)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(read_err)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    for task in tasks {
        let serialized = serde_json::to_string(task).map_err(|source| StoreError::Encode {
            id: task.id,
            source,
        })?;
        writeln!(temp, "{serialized}").map_err(write_err)?;
    }
    temp.flush().map_err(write_err)?;

    temp.persist(path).map_err(|err| write_err(err.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::{CURRENT_SCHEMA_VERSION, JsonlStore, MemoryStore, StoreError, TaskStore};
    use crate::task::{Task, TaskState};

    fn task_with_priority(priority: i16) -> Task {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        let mut task = Task::new_todo(now, None);
        task.priority_score = priority;
        task
    }

    #[test]
    fn save_then_update_replaces_by_id() {
        let temp = tempdir().expect("tempdir");
        let mut store = JsonlStore::open(temp.path()).expect("open store");

        let mut task = task_with_priority(5);
        store.save_task(&task).expect("insert");
        task.note = "buy milk".to_string();
        task.state = TaskState::Doing;
        store.save_task(&task).expect("update");

        let loaded = store.list_all_tasks().expect("list");
        assert_eq!(loaded, vec![task]);
    }

    #[test]
    fn delete_missing_task_is_not_found() {
        let mut store = MemoryStore::new();
        let task = task_with_priority(5);

        let err = store.delete_task(task.id).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == task.id));
    }

    #[test]
    fn fresh_store_skips_migration() {
        let temp = tempdir().expect("tempdir");
        let mut store = JsonlStore::open(temp.path()).expect("open store");
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);

        store.save_task(&task_with_priority(7)).expect("save");
        let reopened = JsonlStore::open(temp.path()).expect("reopen");
        assert_eq!(reopened.ensure_migrated().unwrap(), None);
        assert_eq!(reopened.list_all_tasks().unwrap()[0].priority_score, 7);
    }

    #[test]
    fn legacy_directory_is_migrated_once() {
        let temp = tempdir().expect("tempdir");
        let legacy: Vec<String> = [50, 12, 3, 99]
            .into_iter()
            .map(|p| serde_json::to_string(&task_with_priority(p)).unwrap())
            .collect();
        fs::write(temp.path().join("tasks.data"), legacy.join("\n")).unwrap();

        let mut store = JsonlStore::open(temp.path()).expect("open legacy");
        assert_eq!(store.schema_version().unwrap(), 0);
        assert_eq!(store.ensure_migrated().unwrap(), Some(3));
        let scores: Vec<i16> = store
            .list_all_tasks()
            .unwrap()
            .iter()
            .map(|t| t.priority_score)
            .collect();
        assert_eq!(scores, vec![3, 1, 3, 3]);

        // Post-migration scores above 3 must survive a reopen.
        let mut bumped = store.list_all_tasks().unwrap()[1].clone();
        bumped.priority_score = 8;
        store.save_task(&bumped).unwrap();
        let reopened = JsonlStore::open(temp.path()).expect("reopen");
        assert_eq!(reopened.ensure_migrated().unwrap(), None);
        assert_eq!(reopened.list_all_tasks().unwrap()[1].priority_score, 8);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let temp = tempdir().expect("tempdir");
        let store = JsonlStore::open(temp.path()).expect("open store");
        fs::write(&store.tasks_path, "\n{not json}\n").unwrap();

        let err = store.list_all_tasks().unwrap_err();
        assert!(matches!(err, StoreError::Parse { line: 2, .. }));
    }
}
