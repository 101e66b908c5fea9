use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::celebration::{Celebration, CelebrationContent, CelebrationTrigger, DEFAULT_DISPLAY_SECONDS};
use crate::config::Config;
use crate::filter::{FilterParams, SortMode, focus_cap, sort_tasks};
use crate::store::{StoreError, TaskStore};
use crate::task::{Task, TaskState};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub sort: SortMode,
    pub filters: FilterParams,
    pub focus: bool,
    pub timezone: Tz,
    pub celebration: CelebrationContent,
    pub celebration_for: Duration,
    /// Fixes the celebration picker's randomness; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sort: SortMode::default(),
            filters: FilterParams::default(),
            focus: false,
            timezone: chrono_tz::UTC,
            celebration: CelebrationContent::default(),
            celebration_for: Duration::seconds(DEFAULT_DISPLAY_SECONDS),
            seed: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            sort: cfg.sort_mode()?,
            filters: cfg.filter_params()?,
            focus: cfg.focus()?,
            timezone: cfg.display_settings()?.timezone,
            celebration: cfg.celebration_content()?,
            celebration_for: cfg.celebration_duration()?,
            seed: None,
        })
    }
}

/// The view-model over a [`TaskStore`]: a sorted cache of every task, the
/// filtered "visible" list derived from it, and completion celebrations.
///
/// The cache is rebuilt from the store on [`TaskEngine::refresh`] and is
/// never written back on its own.
pub struct TaskEngine<S> {
    store: S,
    tasks: Vec<Task>,
    visible: Vec<Task>,
    sort: SortMode,
    filters: FilterParams,
    focus: bool,
    timezone: Tz,
    trigger: CelebrationTrigger,
    rng: StdRng,
    clock: fn() -> DateTime<Utc>,
}

impl<S: TaskStore> TaskEngine<S> {
    /// Builds the engine and performs the initial fetch.
    pub fn new(store: S, settings: EngineSettings) -> Self {
        Self::with_clock(store, settings, Utc::now)
    }

    pub fn with_clock(store: S, settings: EngineSettings, clock: fn() -> DateTime<Utc>) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut engine = Self {
            store,
            tasks: Vec::new(),
            visible: Vec::new(),
            sort: settings.sort,
            filters: settings.filters,
            focus: settings.focus,
            timezone: settings.timezone,
            trigger: CelebrationTrigger::new(settings.celebration, settings.celebration_for),
            rng,
            clock,
        };
        engine.refresh();
        engine
    }

    /// Refetches every task, re-sorts, diffs states for celebrations, and
    /// recomputes the visible list. A failed read keeps the cached tasks.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&mut self) -> &[Task] {
        match self.store.list_all_tasks() {
            Ok(mut fetched) => {
                let previous: Vec<Uuid> = self.tasks.iter().map(|t| t.id).collect();
                sort_tasks(&mut fetched, self.sort, &previous, &self.timezone);

                let now = (self.clock)();
                let completed = self.trigger.observe(&fetched, now, &mut self.rng);
                if !completed.is_empty() {
                    info!(count = completed.len(), "tasks completed");
                }

                debug!(count = fetched.len(), "refreshed task cache");
                self.tasks = fetched;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    cached = self.tasks.len(),
                    "failed to list tasks; keeping cached tasks"
                );
            }
        }

        self.recompute();
        &self.visible
    }

    pub fn set_sort(&mut self, by_due_date: bool) {
        self.set_sort_mode(SortMode::from_due_flag(by_due_date));
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort = mode;
        let previous: Vec<Uuid> = self.tasks.iter().map(|t| t.id).collect();
        sort_tasks(&mut self.tasks, mode, &previous, &self.timezone);
        self.recompute();
    }

    pub fn set_filters(
        &mut self,
        show_todo: bool,
        show_doing: bool,
        show_done: bool,
        priority_threshold: i16,
        search_text: &str,
    ) {
        self.set_filter_params(FilterParams {
            show_todo,
            show_doing,
            show_done,
            priority_threshold,
            search_text: search_text.to_string(),
        });
    }

    pub fn set_filter_params(&mut self, filters: FilterParams) {
        self.filters = filters;
        self.recompute();
    }

    pub fn set_focus(&mut self, focus: bool) {
        self.focus = focus;
        self.recompute();
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    pub fn filters(&self) -> &FilterParams {
        &self.filters
    }

    pub fn focus(&self) -> bool {
        self.focus
    }

    pub fn visible_tasks(&self) -> &[Task] {
        &self.visible
    }

    /// Every cached task in sort order, ignoring filters.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Creates and persists a task with the "add" defaults, returning its id.
    /// Nothing is cached when the save fails.
    #[tracing::instrument(skip(self, photo), fields(has_photo = photo.is_some()))]
    pub fn add_task(&mut self, photo: Option<Vec<u8>>) -> Result<Uuid, StoreError> {
        let task = self.draft_task(photo);
        self.insert_task(task)
    }

    /// A task with the "add" defaults, stamped by the engine clock and not
    /// yet persisted.
    pub fn draft_task(&self, photo: Option<Vec<u8>>) -> Task {
        Task::new_todo((self.clock)(), photo)
    }

    /// Persists a fully built new task with one save. Its first sighting sets
    /// the celebration baseline, so a task inserted as `Done` stays quiet.
    #[tracing::instrument(skip(self, task), fields(id = %task.id, state = %task.state))]
    pub fn insert_task(&mut self, task: Task) -> Result<Uuid, StoreError> {
        let id = task.id;

        if let Err(err) = self.store.save_task(&task) {
            warn!(error = %err, %id, "failed to save new task");
            return Err(err);
        }

        info!(%id, "added task");
        self.refresh();
        Ok(id)
    }

    /// Persists an edited task, then refreshes so state changes reach the
    /// celebration trigger.
    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn update_task(&mut self, task: &Task) -> Result<(), StoreError> {
        self.store.save_task(task)?;
        self.refresh();
        Ok(())
    }

    pub fn set_state(&mut self, id: Uuid, state: TaskState) -> Result<(), StoreError> {
        let mut task = self.task(id).cloned().ok_or(StoreError::NotFound(id))?;
        task.state = state;
        self.update_task(&task)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.store.delete_task(id)?;
        info!(%id, "deleted task");
        self.refresh();
        Ok(())
    }

    pub fn celebration(&self) -> &Celebration {
        self.trigger.current()
    }

    /// Clears the celebration once its display time is up. Hosts call this
    /// from their timer.
    pub fn expire_celebration(&mut self, now: DateTime<Utc>) -> bool {
        self.trigger.expire(now)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn recompute(&mut self) {
        let filtered: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| self.filters.matches(t, &self.timezone))
            .cloned()
            .collect();

        self.visible = if self.focus {
            focus_cap(&filtered)
        } else {
            filtered
        };
        debug!(
            visible = self.visible.len(),
            total = self.tasks.len(),
            focus = self.focus,
            "recomputed visible tasks"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{EngineSettings, TaskEngine};
    use crate::celebration::CelebrationContent;
    use crate::filter::FilterParams;
    use crate::store::{MemoryStore, StoreError, TaskStore};
    use crate::task::{Task, TaskState};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            filters: FilterParams {
                show_todo: true,
                show_doing: true,
                show_done: true,
                ..FilterParams::default()
            },
            celebration: CelebrationContent::new(
                vec!["Done!".to_string()],
                vec!["star.fill".to_string()],
            )
            .unwrap(),
            seed: Some(1),
            ..EngineSettings::default()
        }
    }

    /// Store whose reads and writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: Cell<bool>,
        fail_writes: bool,
    }

    impl FlakyStore {
        fn io_error() -> std::io::Error {
            std::io::Error::other("disk unplugged")
        }
    }

    impl TaskStore for FlakyStore {
        fn list_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
            if self.fail_reads.get() {
                return Err(StoreError::Read {
                    path: "tasks.data".into(),
                    source: Self::io_error(),
                });
            }
            self.inner.list_all_tasks()
        }

        fn save_task(&mut self, task: &Task) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Write {
                    path: "tasks.data".into(),
                    source: Self::io_error(),
                });
            }
            self.inner.save_task(task)
        }

        fn delete_task(&mut self, id: Uuid) -> Result<(), StoreError> {
            self.inner.delete_task(id)
        }
    }

    #[test]
    fn add_task_persists_defaults_and_is_visible() {
        let mut engine = TaskEngine::with_clock(MemoryStore::new(), settings(), fixed_now);
        let id = engine.add_task(Some(vec![1, 2, 3])).expect("add");

        let task = engine.task(id).expect("cached");
        assert_eq!(task.state, TaskState::Todo);
        assert_eq!(task.due_date, Some(fixed_now()));
        assert_eq!(task.priority_score, 5);
        assert!(task.has_photo());
        assert_eq!(engine.visible_tasks().len(), 1);
        assert_eq!(engine.store().list_all_tasks().unwrap().len(), 1);
    }

    #[test]
    fn failed_add_returns_error_and_leaves_nothing_behind() {
        let store = FlakyStore {
            fail_writes: true,
            ..FlakyStore::default()
        };
        let mut engine = TaskEngine::with_clock(store, settings(), fixed_now);

        assert!(engine.add_task(None).is_err());
        assert!(engine.tasks().is_empty());
        assert!(engine.store().inner.list_all_tasks().unwrap().is_empty());
    }

    #[test]
    fn failed_refresh_keeps_last_known_tasks() {
        let mut engine = TaskEngine::with_clock(FlakyStore::default(), settings(), fixed_now);
        engine.add_task(None).expect("add");
        engine.add_task(None).expect("add");

        engine.store().fail_reads.set(true);
        assert_eq!(engine.refresh().len(), 2);
        assert_eq!(engine.visible_tasks().len(), 2);
    }

    #[test]
    fn filters_and_sort_recompute_visible_list() {
        let mut milk = Task::new_todo(fixed_now(), None);
        milk.note = "buy milk".to_string();
        milk.priority_score = 7;
        let mut taxes = Task::new_todo(fixed_now() + Duration::days(3), None);
        taxes.note = "file taxes".to_string();
        taxes.priority_score = 9;
        taxes.state = TaskState::Doing;

        let store = MemoryStore::with_tasks(vec![taxes.clone(), milk.clone()]);
        let mut engine = TaskEngine::with_clock(store, settings(), fixed_now);
        let ids: Vec<Uuid> = engine.visible_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![milk.id, taxes.id]);

        engine.set_sort(false);
        let ids: Vec<Uuid> = engine.visible_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![taxes.id, milk.id]);

        engine.set_filters(true, false, false, 5, "MILK");
        let ids: Vec<Uuid> = engine.visible_tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![milk.id]);

        engine.set_filters(true, false, false, 8, "milk");
        assert!(engine.visible_tasks().is_empty());

        engine.set_filters(false, false, false, 0, "");
        assert!(engine.visible_tasks().is_empty());
        assert_eq!(engine.tasks().len(), 2);
    }

    #[test]
    fn state_edits_drive_celebrations() {
        let mut engine = TaskEngine::with_clock(MemoryStore::new(), settings(), fixed_now);
        let id = engine.add_task(None).expect("add");

        engine.set_state(id, TaskState::Doing).unwrap();
        assert!(!engine.celebration().active);

        engine.set_state(id, TaskState::Done).unwrap();
        assert!(engine.celebration().active);
        assert_eq!(engine.celebration().phrase, "Done!");
        assert_eq!(engine.celebration().symbol, "star.fill");

        engine.refresh();
        assert_eq!(engine.celebration().generation, 1);

        engine.set_state(id, TaskState::Todo).unwrap();
        engine.set_state(id, TaskState::Done).unwrap();
        assert_eq!(engine.celebration().generation, 2);

        assert!(engine.expire_celebration(fixed_now() + Duration::seconds(3)));
        assert!(!engine.celebration().active);
    }

    #[test]
    fn inserting_a_done_task_stays_quiet() {
        let mut engine = TaskEngine::with_clock(MemoryStore::new(), settings(), fixed_now);
        let mut task = engine.draft_task(None);
        task.state = TaskState::Done;
        task.note = "already handled".to_string();

        let id = engine.insert_task(task).expect("insert");
        assert_eq!(engine.task(id).map(|t| t.state), Some(TaskState::Done));
        assert_eq!(engine.celebration().generation, 0);
    }

    #[test]
    fn failed_insert_caches_nothing() {
        let store = FlakyStore {
            fail_writes: true,
            ..FlakyStore::default()
        };
        let mut engine = TaskEngine::with_clock(store, settings(), fixed_now);
        let task = engine.draft_task(None);

        assert!(engine.insert_task(task).is_err());
        assert!(engine.tasks().is_empty());
    }

    #[test]
    fn task_stored_as_done_does_not_celebrate() {
        let mut done = Task::new_todo(fixed_now(), None);
        done.state = TaskState::Done;
        let engine = TaskEngine::with_clock(MemoryStore::with_tasks(vec![done]), settings(), fixed_now);

        assert!(!engine.celebration().active);
        assert_eq!(engine.celebration().generation, 0);
    }

    #[test]
    fn focus_mode_caps_active_tasks() {
        let mut tasks = Vec::new();
        for (state, count) in [(TaskState::Todo, 5), (TaskState::Doing, 4), (TaskState::Done, 2)] {
            for _ in 0..count {
                let mut task = Task::new_todo(fixed_now(), None);
                task.state = state;
                tasks.push(task);
            }
        }
        let mut engine = TaskEngine::with_clock(MemoryStore::with_tasks(tasks), settings(), fixed_now);
        assert_eq!(engine.visible_tasks().len(), 11);

        engine.set_focus(true);
        let visible = engine.visible_tasks();
        assert_eq!(visible.len(), 6);
        assert!(visible.iter().all(|t| t.state != TaskState::Done));
        assert_eq!(visible.iter().filter(|t| t.state == TaskState::Todo).count(), 3);
    }

    #[test]
    fn delete_removes_task_and_surfaces_missing_ids() {
        let mut engine = TaskEngine::with_clock(MemoryStore::new(), settings(), fixed_now);
        let id = engine.add_task(None).expect("add");

        engine.delete_task(id).expect("delete");
        assert!(engine.tasks().is_empty());
        assert!(matches!(engine.delete_task(id), Err(StoreError::NotFound(_))));
    }
}
