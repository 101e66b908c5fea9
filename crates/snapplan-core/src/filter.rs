use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::anyhow;
use chrono_tz::Tz;
use uuid::Uuid;

use crate::datetime::{calendar_day, day_text};
use crate::task::{Task, TaskState};

/// Per-state cap applied by focus mode.
pub const FOCUS_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Due date ascending, then priority descending.
    #[default]
    DueDate,
    /// Priority descending, then due date ascending.
    Priority,
}

impl SortMode {
    pub fn from_due_flag(by_due_date: bool) -> Self {
        if by_due_date {
            SortMode::DueDate
        } else {
            SortMode::Priority
        }
    }
}

impl FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "due" | "duedate" | "date" => Ok(SortMode::DueDate),
            "priority" | "prio" => Ok(SortMode::Priority),
            other => Err(anyhow!("expected due|priority, got: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    pub show_todo: bool,
    pub show_doing: bool,
    pub show_done: bool,
    pub priority_threshold: i16,
    pub search_text: String,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            show_todo: true,
            show_doing: false,
            show_done: false,
            priority_threshold: 0,
            search_text: String::new(),
        }
    }
}

impl FilterParams {
    /// A task is visible only when the text, state and priority clauses all hold.
    pub fn matches(&self, task: &Task, tz: &Tz) -> bool {
        self.matches_text(task, tz) && self.matches_state(task.state) && self.matches_priority(task)
    }

    /// Note and due date share the one search box.
    pub fn matches_text(&self, task: &Task, tz: &Tz) -> bool {
        if self.search_text.is_empty() {
            return true;
        }
        let needle = self.search_text.to_lowercase();
        if task.note.to_lowercase().contains(&needle) {
            return true;
        }
        task.due_date
            .map(|due| day_text(due, tz).contains(&needle))
            .unwrap_or(false)
    }

    pub fn matches_state(&self, state: TaskState) -> bool {
        match state {
            TaskState::Todo => self.show_todo,
            TaskState::Doing => self.show_doing,
            TaskState::Done => self.show_done,
            TaskState::Unknown => false,
        }
    }

    pub fn matches_priority(&self, task: &Task) -> bool {
        task.priority_score >= self.priority_threshold
    }
}

/// Sorts in place. Due dates compare by calendar day in `tz`. Ties on both
/// keys keep their relative order from `previous`; tasks absent from it keep
/// their incoming order after those that were.
pub fn sort_tasks(tasks: &mut [Task], mode: SortMode, previous: &[Uuid], tz: &Tz) {
    let rank: HashMap<Uuid, usize> = previous
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx))
        .collect();
    tasks.sort_by_key(|t| rank.get(&t.id).copied().unwrap_or(usize::MAX));
    tasks.sort_by(|a, b| compare_tasks(a, b, mode, tz));
}

pub fn compare_tasks(a: &Task, b: &Task, mode: SortMode, tz: &Tz) -> Ordering {
    match mode {
        SortMode::DueDate => compare_due(a, b, tz).then_with(|| compare_priority(a, b)),
        SortMode::Priority => compare_priority(a, b).then_with(|| compare_due(a, b, tz)),
    }
}

fn compare_due(a: &Task, b: &Task, tz: &Tz) -> Ordering {
    match (a.due_date, b.due_date) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(ad), Some(bd)) => calendar_day(ad, tz).cmp(&calendar_day(bd, tz)),
    }
}

fn compare_priority(a: &Task, b: &Task) -> Ordering {
    b.priority_score.cmp(&a.priority_score)
}

/// Keeps at most [`FOCUS_LIMIT`] `Todo` tasks followed by at most
/// [`FOCUS_LIMIT`] `Doing` tasks, preserving their order.
pub fn focus_cap(tasks: &[Task]) -> Vec<Task> {
    let pick = |state: TaskState| {
        tasks
            .iter()
            .filter(move |t| t.state == state)
            .take(FOCUS_LIMIT)
            .cloned()
    };
    pick(TaskState::Todo).chain(pick(TaskState::Doing)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{FilterParams, SortMode, focus_cap, sort_tasks};
    use crate::task::{Task, TaskState};

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn task(note: &str, state: TaskState, priority: i16, due: Option<DateTime<Utc>>) -> Task {
        let mut task = Task::new_todo(day(2024, 1, 1), None);
        task.note = note.to_string();
        task.state = state;
        task.priority_score = priority;
        task.due_date = due;
        task
    }

    fn only_todo(search: &str, threshold: i16) -> FilterParams {
        FilterParams {
            show_todo: true,
            show_doing: false,
            show_done: false,
            priority_threshold: threshold,
            search_text: search.to_string(),
        }
    }

    #[test]
    fn conjunction_of_text_state_and_priority() {
        let tz = chrono_tz::UTC;
        let milk = task("buy milk", TaskState::Todo, 7, Some(day(2024, 6, 10)));

        assert!(only_todo("milk", 5).matches(&milk, &tz));
        assert!(!only_todo("milk", 8).matches(&milk, &tz));
        assert!(!only_todo("bread", 5).matches(&milk, &tz));

        let mut doing = milk.clone();
        doing.state = TaskState::Doing;
        assert!(!only_todo("milk", 5).matches(&doing, &tz));
    }

    #[test]
    fn text_matches_note_case_insensitively_or_due_date() {
        let tz = chrono_tz::UTC;
        let t = task("Call the DENTIST", TaskState::Todo, 5, Some(day(2024, 6, 10)));

        assert!(only_todo("dentist", 0).matches(&t, &tz));
        assert!(only_todo("2024-06", 0).matches(&t, &tz));
        assert!(!only_todo("2024-07", 0).matches(&t, &tz));

        let undated = task("", TaskState::Todo, 5, None);
        assert!(!only_todo("2024", 0).matches(&undated, &tz));
        assert!(only_todo("", 0).matches(&undated, &tz));
    }

    #[test]
    fn all_toggles_off_matches_nothing() {
        let tz = chrono_tz::UTC;
        let params = FilterParams {
            show_todo: false,
            show_doing: false,
            show_done: false,
            priority_threshold: i16::MIN,
            search_text: String::new(),
        };
        for state in [TaskState::Todo, TaskState::Doing, TaskState::Done, TaskState::Unknown] {
            assert!(!params.matches(&task("x", state, 5, None), &tz));
        }
    }

    #[test]
    fn unknown_state_matches_no_toggle() {
        let params = FilterParams {
            show_todo: true,
            show_doing: true,
            show_done: true,
            ..FilterParams::default()
        };
        assert!(!params.matches_state(TaskState::Unknown));
    }

    #[test]
    fn both_sort_orders_put_undated_last() {
        let mut tasks = vec![
            task("a", TaskState::Todo, 2, Some(day(2024, 3, 1))),
            task("b", TaskState::Todo, 5, Some(day(2024, 1, 1))),
            task("c", TaskState::Todo, 1, None),
        ];

        sort_tasks(&mut tasks, SortMode::DueDate, &[], &chrono_tz::UTC);
        let notes: Vec<&str> = tasks.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["b", "a", "c"]);

        sort_tasks(&mut tasks, SortMode::Priority, &[], &chrono_tz::UTC);
        let priorities: Vec<i16> = tasks.iter().map(|t| t.priority_score).collect();
        assert_eq!(priorities, vec![5, 2, 1]);
    }

    #[test]
    fn secondary_keys_break_primary_ties() {
        let same_day = Some(day(2024, 5, 5));
        let mut tasks = vec![
            task("low", TaskState::Todo, 1, same_day),
            task("high", TaskState::Todo, 9, same_day),
            task("late", TaskState::Todo, 9, Some(day(2024, 9, 9))),
        ];

        sort_tasks(&mut tasks, SortMode::DueDate, &[], &chrono_tz::UTC);
        let notes: Vec<&str> = tasks.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["high", "low", "late"]);

        sort_tasks(&mut tasks, SortMode::Priority, &[], &chrono_tz::UTC);
        let notes: Vec<&str> = tasks.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["high", "late", "low"]);
    }

    #[test]
    fn same_day_due_dates_tie_regardless_of_time() {
        let at = |h: u32| Some(Utc.with_ymd_and_hms(2024, 6, 10, h, 0, 0).unwrap());
        let mut tasks = vec![
            task("low", TaskState::Todo, 1, at(8)),
            task("high", TaskState::Todo, 9, at(17)),
        ];

        sort_tasks(&mut tasks, SortMode::DueDate, &[], &chrono_tz::UTC);
        let notes: Vec<&str> = tasks.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["high", "low"]);

        // 17:00 UTC is already 2024-06-11 in Tokyo.
        sort_tasks(&mut tasks, SortMode::DueDate, &[], &chrono_tz::Asia::Tokyo);
        let notes: Vec<&str> = tasks.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["low", "high"]);
    }

    #[test]
    fn full_ties_follow_previous_order() {
        let due = Some(day(2024, 5, 5));
        let first = task("first", TaskState::Todo, 4, due);
        let second = task("second", TaskState::Todo, 4, due);
        let newcomer = task("new", TaskState::Todo, 4, due);
        let previous = vec![second.id, first.id];

        let mut fetched = vec![newcomer, first, second];
        sort_tasks(&mut fetched, SortMode::Priority, &previous, &chrono_tz::UTC);
        let notes: Vec<&str> = fetched.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(notes, vec!["second", "first", "new"]);
    }

    #[test]
    fn focus_caps_each_active_state_at_three() {
        let mut tasks = Vec::new();
        for i in 0..5 {
            tasks.push(task(&format!("todo{i}"), TaskState::Todo, 5, None));
        }
        for i in 0..4 {
            tasks.push(task(&format!("doing{i}"), TaskState::Doing, 5, None));
        }
        tasks.push(task("done", TaskState::Done, 5, None));

        let focused = focus_cap(&tasks);
        let notes: Vec<&str> = focused.iter().map(|t| t.note.as_str()).collect();
        assert_eq!(
            notes,
            vec!["todo0", "todo1", "todo2", "doing0", "doing1", "doing2"]
        );
    }

    #[test]
    fn sort_mode_from_flag_and_text() {
        assert_eq!(SortMode::from_due_flag(true), SortMode::DueDate);
        assert_eq!(SortMode::from_due_flag(false), SortMode::Priority);
        assert_eq!("Priority".parse::<SortMode>().unwrap(), SortMode::Priority);
        assert!("size".parse::<SortMode>().is_err());
    }
}
