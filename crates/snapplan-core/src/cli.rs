use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "snapplan",
    version,
    about = "SnapPlan: photo-backed tasks with filters, focus mode and celebrations",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task with the default state, due date and priority.
    Add(AddArgs),
    /// Show the filtered, sorted task list.
    List(ListArgs),
    /// Change fields of one task.
    Edit(EditArgs),
    /// Show every field of one task.
    Info(TaskRef),
    Delete(TaskRef),
    /// Bucket legacy 1-100 priority scores into 1-3.
    Migrate,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    #[arg(long)]
    pub note: Option<String>,
    /// today, tomorrow, YYYY-MM-DD, +3d, -1w ...
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub priority: Option<i16>,
    #[arg(long)]
    pub state: Option<String>,
    /// Image file stored as the task photo.
    #[arg(long)]
    pub photo: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// due or priority
    #[arg(long)]
    pub sort: Option<String>,
    #[arg(long)]
    pub todo: bool,
    #[arg(long)]
    pub doing: bool,
    #[arg(long)]
    pub done: bool,
    #[arg(long = "min-priority")]
    pub min_priority: Option<i16>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub focus: bool,
    /// Show days until due instead of dates.
    #[arg(long)]
    pub days: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Task id or unique id prefix.
    pub id: String,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub note: Option<String>,
    #[arg(long, conflicts_with = "no_due")]
    pub due: Option<String>,
    #[arg(long = "no-due")]
    pub no_due: bool,
    #[arg(long)]
    pub priority: Option<i16>,
}

#[derive(Args, Debug, Clone)]
pub struct TaskRef {
    /// Task id or unique id prefix.
    pub id: String,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
