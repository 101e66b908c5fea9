use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::Duration;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::celebration::{
  CelebrationContent,
  DEFAULT_DISPLAY_SECONDS
};
use crate::datetime::resolve_timezone;
use crate::filter::{
  FilterParams,
  SortMode
};
use crate::format::{
  DisplaySettings,
  DueDateDisplay
};

pub const RC_ENV_VAR: &str =
  "SNAPPLANRC";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (k, v) in [
      ("data.location", "~/.snapplan"),
      ("due.display", "date"),
      ("sort", "due"),
      ("focus", "off"),
      ("show.todo", "on"),
      ("show.doing", "off"),
      ("show.done", "off"),
      ("priority.min", "0"),
      ("timezone", "UTC"),
      ("color", "on"),
      ("color.truecolor", "off")
    ] {
      map.insert(
        k.to_string(),
        v.to_string()
      );
    }
    map.insert(
      "celebration.seconds".to_string(),
      DEFAULT_DISPLAY_SECONDS
        .to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading snapplanrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no snapplanrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|v| {
        parse_bool(v).ok_or_else(|| {
          anyhow!(
            "invalid boolean for \
             {key}: {v}"
          )
        })
      })
      .transpose()
  }

  fn flag(
    &self,
    key: &str
  ) -> anyhow::Result<bool> {
    Ok(
      self
        .get_bool(key)?
        .unwrap_or(false)
    )
  }

  pub fn display_settings(
    &self
  ) -> anyhow::Result<DisplaySettings> {
    let due_display = self
      .get("due.display")
      .map(|raw| {
        raw.parse::<DueDateDisplay>()
      })
      .transpose()
      .context("invalid due.display")?
      .unwrap_or_default();

    Ok(DisplaySettings {
      due_display,
      timezone: resolve_timezone(
        self.get("timezone").as_deref()
      )
    })
  }

  pub fn sort_mode(
    &self
  ) -> anyhow::Result<SortMode> {
    Ok(
      self
        .get("sort")
        .map(|raw| {
          raw.parse::<SortMode>()
        })
        .transpose()
        .context("invalid sort")?
        .unwrap_or_default()
    )
  }

  pub fn focus(
    &self
  ) -> anyhow::Result<bool> {
    self.flag("focus")
  }

  pub fn color(
    &self
  ) -> anyhow::Result<bool> {
    self.flag("color")
  }

  pub fn truecolor(
    &self
  ) -> anyhow::Result<bool> {
    self.flag("color.truecolor")
  }

  pub fn filter_params(
    &self
  ) -> anyhow::Result<FilterParams> {
    let priority_threshold = self
      .get("priority.min")
      .map(|raw| {
        raw.trim().parse::<i16>()
      })
      .transpose()
      .context(
        "invalid priority.min"
      )?
      .unwrap_or(0);

    Ok(FilterParams {
      show_todo: self
        .flag("show.todo")?,
      show_doing: self
        .flag("show.doing")?,
      show_done: self
        .flag("show.done")?,
      priority_threshold,
      search_text: String::new()
    })
  }

  pub fn celebration_content(
    &self
  ) -> anyhow::Result<CelebrationContent>
  {
    let defaults =
      CelebrationContent::default();
    let phrases = self
      .get("celebration.phrases")
      .map(|raw| split_list(&raw))
      .unwrap_or_else(|| {
        defaults.phrases().to_vec()
      });
    let symbols = self
      .get("celebration.symbols")
      .map(|raw| split_list(&raw))
      .unwrap_or_else(|| {
        defaults.symbols().to_vec()
      });

    CelebrationContent::new(
      phrases, symbols
    )
    .context(
      "invalid celebration content"
    )
  }

  pub fn celebration_duration(
    &self
  ) -> anyhow::Result<Duration> {
    let seconds = self
      .get("celebration.seconds")
      .map(|raw| {
        raw.trim().parse::<i64>()
      })
      .transpose()
      .context(
        "invalid celebration.seconds"
      )?
      .unwrap_or(
        DEFAULT_DISPLAY_SECONDS
      );
    if seconds < 0 {
      return Err(anyhow!(
        "celebration.seconds cannot \
         be negative: {seconds}"
      ));
    }
    Duration::try_seconds(seconds)
      .ok_or_else(|| {
        anyhow!(
          "celebration.seconds out of \
           range: {seconds}"
        )
      })
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".snapplanrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".snapplan"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn split_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}
