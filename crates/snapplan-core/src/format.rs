use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::datetime::{calendar_day, days_until};
use crate::task::{Task, TaskState};

pub const ABSENT_DATE_TEXT: &str = "--";
pub const ABSENT_DAYS_TEXT: &str = "N/A";
pub const TODAY_TEXT: &str = "Today";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DueDateDisplay {
    /// `MM/DD`, or `MM/DD/YY` outside the reference year.
    #[default]
    AbsoluteDate,
    /// Signed calendar days until due.
    RelativeDays,
}

impl FromStr for DueDateDisplay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "date" | "dates" | "absolute" => Ok(DueDateDisplay::AbsoluteDate),
            "days" | "relative" => Ok(DueDateDisplay::RelativeDays),
            other => Err(anyhow!("expected date|days, got: {other}")),
        }
    }
}

/// Everything the formatting rules need besides the task and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub due_display: DueDateDisplay,
    pub timezone: Tz,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            due_display: DueDateDisplay::AbsoluteDate,
            timezone: chrono_tz::UTC,
        }
    }
}

/// Display category tokens. The UI owns the mapping to concrete colours;
/// [`Category::hex`] gives the app's stock palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Todo,
    Doing,
    Done,
    DoneDue,
    PastDue,
    TodoDueToday,
    DoingDueToday,
    TodoFutureDue,
    DoingFutureDue,
    Neutral,
}

impl Category {
    pub fn hex(self) -> Option<&'static str> {
        match self {
            Category::Todo => Some("#FEC601"),
            Category::Doing => Some("#3DA5D9"),
            Category::Done => Some("#73BFB8"),
            Category::DoneDue => Some("#4F5933"),
            Category::PastDue => Some("#AF0808"),
            Category::TodoDueToday => Some("#EA7317"),
            Category::DoingDueToday => Some("#A85413"),
            Category::TodoFutureDue => Some("#F4F4EC"),
            Category::DoingFutureDue => Some("#E5E4E2"),
            Category::Neutral => None,
        }
    }
}

pub fn due_date_text(task: &Task, reference: DateTime<Utc>, settings: &DisplaySettings) -> String {
    let tz = &settings.timezone;
    match settings.due_display {
        DueDateDisplay::AbsoluteDate => match task.due_date {
            Some(due) => absolute_date_text(due, reference, tz),
            None => ABSENT_DATE_TEXT.to_string(),
        },
        DueDateDisplay::RelativeDays => match task.due_date {
            Some(due) => relative_days_text(days_until(due, reference, tz)),
            None => ABSENT_DAYS_TEXT.to_string(),
        },
    }
}

fn absolute_date_text(due: DateTime<Utc>, reference: DateTime<Utc>, tz: &Tz) -> String {
    let day = calendar_day(due, tz);
    if day.year() == calendar_day(reference, tz).year() {
        day.format("%m/%d").to_string()
    } else {
        day.format("%m/%d/%y").to_string()
    }
}

fn relative_days_text(days: i64) -> String {
    match days {
        0 => TODAY_TEXT.to_string(),
        d if d > 0 => format!("+{d}"),
        d => d.to_string(),
    }
}

pub fn state_category(task: &Task) -> Category {
    match task.state {
        TaskState::Todo => Category::Todo,
        TaskState::Doing => Category::Doing,
        TaskState::Done => Category::Done,
        TaskState::Unknown => Category::Neutral,
    }
}

/// Colour category for the due date. A task without a due date is classified
/// as due on the reference day.
pub fn due_date_category(task: &Task, reference: DateTime<Utc>, tz: &Tz) -> Category {
    let days = task
        .due_date
        .map(|due| days_until(due, reference, tz))
        .unwrap_or(0);

    match (task.state, days) {
        (TaskState::Done, _) => Category::DoneDue,
        (TaskState::Todo | TaskState::Doing, d) if d < 0 => Category::PastDue,
        (TaskState::Todo, 0) => Category::TodoDueToday,
        (TaskState::Doing, 0) => Category::DoingDueToday,
        (TaskState::Todo, _) => Category::TodoFutureDue,
        (TaskState::Doing, _) => Category::DoingFutureDue,
        (TaskState::Unknown, _) => Category::Neutral,
    }
}
