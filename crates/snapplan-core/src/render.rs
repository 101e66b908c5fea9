use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::celebration::Celebration;
use crate::format::{Category, DisplaySettings, due_date_category, due_date_text, state_category};
use crate::task::Task;

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    truecolor: bool,
    settings: DisplaySettings,
}

impl Renderer {
    /// Colour is dropped when stdout is not a terminal. `truecolor` paints
    /// categories with the palette's hex values instead of the basic ANSI set.
    pub fn new(color: bool, truecolor: bool, settings: DisplaySettings) -> Self {
        Self {
            color: color && io::stdout().is_terminal(),
            truecolor,
            settings,
        }
    }

    pub fn settings(&self) -> &DisplaySettings {
        &self.settings
    }

    #[tracing::instrument(skip(self, out, tasks, now))]
    pub fn print_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        let (headers, rows) = self.task_rows(tasks, now);
        write_table(out, headers, rows)?;
        Ok(())
    }

    fn task_rows(&self, tasks: &[Task], now: DateTime<Utc>) -> (Vec<String>, Vec<Vec<String>>) {
        let headers = vec![
            "ID".to_string(),
            "State".to_string(),
            "Due".to_string(),
            "Pri".to_string(),
            "Photo".to_string(),
            "Note".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let due = due_date_text(task, now, &self.settings);
                let due_category = due_date_category(task, now, &self.settings.timezone);
                vec![
                    self.paint(&short_id(task.id), Some("33")),
                    self.paint_category(task.state.as_str(), state_category(task)),
                    self.paint_category(&due, due_category),
                    task.priority_score.to_string(),
                    if task.has_photo() { "yes" } else { "-" }.to_string(),
                    first_line(&task.note),
                ]
            })
            .collect();

        (headers, rows)
    }

    #[tracing::instrument(skip(self, out, task, now))]
    pub fn print_task_info<W: Write>(
        &self,
        out: &mut W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "state     {}", task.state)?;
        writeln!(out, "due       {}", due_date_text(task, now, &self.settings))?;
        if let Some(due) = task.due_date {
            writeln!(out, "due (utc) {}", due.format("%Y-%m-%dT%H:%M:%SZ"))?;
        }
        writeln!(out, "priority  {}", task.priority_score)?;
        match &task.photo {
            Some(bytes) => writeln!(out, "photo     {} bytes", bytes.len())?,
            None => writeln!(out, "photo     none (sticky note)")?,
        }
        writeln!(out, "note      {}", task.note)?;

        Ok(())
    }

    pub fn print_celebration<W: Write>(
        &self,
        out: &mut W,
        celebration: &Celebration,
    ) -> anyhow::Result<()> {
        if !celebration.active {
            return Ok(());
        }
        writeln!(
            out,
            "{} [{}]",
            self.paint(&celebration.phrase, Some("1;36")),
            celebration.symbol
        )?;
        Ok(())
    }

    fn paint_category(&self, text: &str, category: Category) -> String {
        if self.truecolor
            && let Some(code) = category.hex().and_then(truecolor_code)
        {
            return self.paint(text, Some(code.as_str()));
        }
        self.paint(text, ansi_code(category))
    }

    fn paint(&self, text: &str, code: Option<&str>) -> String {
        match code {
            Some(code) if self.color => format!("\x1b[{code}m{text}\x1b[0m"),
            _ => text.to_string(),
        }
    }
}

pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

fn first_line(note: &str) -> String {
    note.lines().next().unwrap_or_default().to_string()
}

/// `#RRGGBB` to a 24-bit foreground SGR code.
fn truecolor_code(hex: &str) -> Option<String> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some(format!(
        "38;2;{};{};{}",
        channel(0..2)?,
        channel(2..4)?,
        channel(4..6)?
    ))
}

/// Terminal stand-ins for the category palette.
fn ansi_code(category: Category) -> Option<&'static str> {
    match category {
        Category::Todo => Some("33"),
        Category::Doing => Some("34"),
        Category::Done => Some("36"),
        Category::DoneDue => Some("2;32"),
        Category::PastDue => Some("31"),
        Category::TodoDueToday => Some("1;33"),
        Category::DoingDueToday => Some("1;35"),
        Category::TodoFutureDue | Category::DoingFutureDue => Some("37"),
        Category::Neutral => None,
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
