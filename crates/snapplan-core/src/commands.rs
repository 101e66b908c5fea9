use std::fs;
use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cli::{AddArgs, Command, EditArgs, ListArgs};
use crate::config::Config;
use crate::datetime::parse_due_expr;
use crate::engine::{EngineSettings, TaskEngine};
use crate::filter::{FilterParams, SortMode};
use crate::format::DueDateDisplay;
use crate::render::{Renderer, short_id};
use crate::store::{JsonlStore, TaskStore};
use crate::task::{Task, TaskState};

/// Runs one command against the store, writing user-facing output to `out`.
#[instrument(skip(store, cfg, command, out))]
pub fn dispatch<W: Write>(
    store: JsonlStore,
    cfg: &Config,
    command: Option<Command>,
    out: &mut W,
) -> anyhow::Result<()> {
    let command = command.unwrap_or(Command::List(ListArgs::default()));

    let migrated = store
        .ensure_migrated()
        .context("failed to migrate priority scores")?;
    if let Some(changed) = migrated {
        info!(changed, "migrated legacy priority scores");
    }

    let settings = EngineSettings::from_config(cfg)?;
    let mut display = cfg.display_settings()?;
    if let Command::List(args) = &command
        && args.days
    {
        display.due_display = DueDateDisplay::RelativeDays;
    }
    let renderer = Renderer::new(cfg.color()?, cfg.truecolor()?, display);
    let mut engine = TaskEngine::new(store, settings);

    match command {
        Command::Add(args) => run_add(&mut engine, &renderer, args, out),
        Command::List(args) => run_list(&mut engine, &renderer, args, out),
        Command::Edit(args) => run_edit(&mut engine, &renderer, args, out),
        Command::Info(target) => {
            let id = resolve_id(engine.tasks(), &target.id)?;
            let task = engine
                .task(id)
                .ok_or_else(|| anyhow!("task vanished: {id}"))?;
            renderer.print_task_info(out, task, Utc::now())
        }
        Command::Delete(target) => {
            let id = resolve_id(engine.tasks(), &target.id)?;
            engine
                .delete_task(id)
                .with_context(|| format!("failed to delete task {id}"))?;
            writeln!(out, "Deleted task {}.", short_id(id))?;
            Ok(())
        }
        Command::Migrate => {
            match migrated {
                Some(changed) => writeln!(out, "Migrated {changed} task priority score(s).")?,
                None => writeln!(out, "Priority scores already migrated.")?,
            }
            Ok(())
        }
    }
}

/// Builds the whole task before the single save, so a bad flag leaves the
/// store untouched.
#[instrument(skip(engine, renderer, args, out))]
fn run_add<S: TaskStore, W: Write>(
    engine: &mut TaskEngine<S>,
    renderer: &Renderer,
    args: AddArgs,
    out: &mut W,
) -> anyhow::Result<()> {
    let photo = args
        .photo
        .as_ref()
        .map(|path| {
            fs::read(path).with_context(|| format!("failed to read photo {}", path.display()))
        })
        .transpose()?;

    let mut task = engine.draft_task(photo);
    apply_fields(
        &mut task,
        args.state.as_deref(),
        args.note,
        args.due.as_deref(),
        false,
        args.priority,
        &renderer.settings().timezone,
    )?;

    let id = engine.insert_task(task).context("failed to create task")?;

    info!(%id, "created task");
    writeln!(out, "Created task {}.", short_id(id))?;
    Ok(())
}

#[instrument(skip(engine, renderer, args, out))]
fn run_list<S: TaskStore, W: Write>(
    engine: &mut TaskEngine<S>,
    renderer: &Renderer,
    args: ListArgs,
    out: &mut W,
) -> anyhow::Result<()> {
    if let Some(raw) = args.sort.as_deref() {
        engine.set_sort_mode(raw.parse::<SortMode>()?);
    }

    let defaults = engine.filters().clone();
    let explicit_states = args.todo || args.doing || args.done;
    engine.set_filter_params(FilterParams {
        show_todo: if explicit_states { args.todo } else { defaults.show_todo },
        show_doing: if explicit_states { args.doing } else { defaults.show_doing },
        show_done: if explicit_states { args.done } else { defaults.show_done },
        priority_threshold: args.min_priority.unwrap_or(defaults.priority_threshold),
        search_text: args.search.unwrap_or_default(),
    });
    if args.focus {
        engine.set_focus(true);
    }

    debug!(
        visible = engine.visible_tasks().len(),
        total = engine.tasks().len(),
        "listing tasks"
    );
    renderer.print_task_table(out, engine.visible_tasks(), Utc::now())
}

#[instrument(skip(engine, renderer, args, out))]
fn run_edit<S: TaskStore, W: Write>(
    engine: &mut TaskEngine<S>,
    renderer: &Renderer,
    args: EditArgs,
    out: &mut W,
) -> anyhow::Result<()> {
    let id = resolve_id(engine.tasks(), &args.id)?;
    let mut task = engine
        .task(id)
        .cloned()
        .ok_or_else(|| anyhow!("task vanished: {id}"))?;

    let edited = apply_fields(
        &mut task,
        args.state.as_deref(),
        args.note,
        args.due.as_deref(),
        args.no_due,
        args.priority,
        &renderer.settings().timezone,
    )?;
    if !edited {
        writeln!(out, "Nothing to change.")?;
        return Ok(());
    }

    let before = engine.celebration().generation;
    engine
        .update_task(&task)
        .with_context(|| format!("failed to save task {id}"))?;
    writeln!(out, "Updated task {}.", short_id(task.id))?;

    let celebration = engine.celebration();
    if celebration.generation > before && celebration.task_id == Some(id) {
        renderer.print_celebration(out, celebration)?;
    }
    Ok(())
}

/// Applies the optional field edits shared by `add` and `edit`. Returns
/// whether anything was set.
fn apply_fields(
    task: &mut Task,
    state: Option<&str>,
    note: Option<String>,
    due: Option<&str>,
    clear_due: bool,
    priority: Option<i16>,
    tz: &Tz,
) -> anyhow::Result<bool> {
    let mut edited = false;

    if let Some(raw) = state {
        task.state = raw.parse::<TaskState>()?;
        edited = true;
    }
    if let Some(note) = note {
        task.note = note;
        edited = true;
    }
    if let Some(raw) = due {
        task.due_date = Some(parse_due_expr(raw, Utc::now(), tz)?);
        edited = true;
    }
    if clear_due {
        task.due_date = None;
        edited = true;
    }
    if let Some(priority) = priority {
        task.priority_score = priority;
        edited = true;
    }

    Ok(edited)
}

/// Finds the one task whose id (hyphenated or simple form) starts with `prefix`.
pub fn resolve_id(tasks: &[Task], prefix: &str) -> anyhow::Result<Uuid> {
    let needle = prefix.trim().to_ascii_lowercase().replace('-', "");
    if needle.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }

    let mut matches = tasks
        .iter()
        .filter(|t| t.id.simple().to_string().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id),
        (None, _) => Err(anyhow!("no task matches id {prefix}")),
        (Some(_), Some(_)) => Err(anyhow!("id {prefix} is ambiguous; use more characters")),
    }
}
