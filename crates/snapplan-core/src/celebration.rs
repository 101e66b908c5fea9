use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::task::{Task, TaskState};

pub const DEFAULT_DISPLAY_SECONDS: i64 = 3;

const DEFAULT_PHRASES: &[&str] = &[
    "Nice work!",
    "Nailed it!",
    "Crushed it!",
    "Way to go!",
    "One less thing!",
    "Done and dusted!",
];

const DEFAULT_SYMBOLS: &[&str] = &[
    "star.fill",
    "hand.thumbsup.fill",
    "checkmark.seal.fill",
    "flame.fill",
    "party.popper.fill",
    "trophy.fill",
];

/// Candidate phrases and symbols a celebration picks from. Both lists are
/// guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CelebrationContent {
    phrases: Vec<String>,
    symbols: Vec<String>,
}

impl Default for CelebrationContent {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_PHRASES.iter().map(|s| s.to_string()).collect(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CelebrationContent {
    pub fn new(phrases: Vec<String>, symbols: Vec<String>) -> anyhow::Result<Self> {
        if phrases.is_empty() {
            return Err(anyhow!("celebration phrases cannot be empty"));
        }
        if symbols.is_empty() {
            return Err(anyhow!("celebration symbols cannot be empty"));
        }
        Ok(Self { phrases, symbols })
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> (String, String) {
        let phrase = self.phrases.choose(rng).cloned().unwrap_or_default();
        let symbol = self.symbols.choose(rng).cloned().unwrap_or_default();
        (phrase, symbol)
    }
}

/// What the UI reads to show (or hide) the celebration overlay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Celebration {
    pub active: bool,
    pub phrase: String,
    pub symbol: String,
    pub task_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of celebrations raised so far; bumps once per transition into `Done`.
    pub generation: u64,
}

impl Celebration {
    /// Shows a fresh celebration, replacing any pending expiry.
    fn raise(
        &mut self,
        task_id: Uuid,
        content: &CelebrationContent,
        rng: &mut impl Rng,
        deadline: DateTime<Utc>,
    ) {
        let (phrase, symbol) = content.pick(rng);
        self.active = true;
        self.phrase = phrase;
        self.symbol = symbol;
        self.task_id = Some(task_id);
        self.expires_at = Some(deadline);
        self.generation += 1;
    }

    /// Clears the overlay once its deadline has passed. Returns whether it cleared.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(deadline) if self.active && now >= deadline => {
                self.active = false;
                self.expires_at = None;
                true
            }
            _ => false,
        }
    }
}

/// Remembers the last state seen per task and turns transitions into `Done`
/// into celebrations.
#[derive(Debug, Clone)]
pub struct CelebrationTrigger {
    baselines: HashMap<Uuid, TaskState>,
    content: CelebrationContent,
    display_for: Duration,
    current: Celebration,
}

impl CelebrationTrigger {
    pub fn new(content: CelebrationContent, display_for: Duration) -> Self {
        Self {
            baselines: HashMap::new(),
            content,
            display_for,
            current: Celebration::default(),
        }
    }

    pub fn current(&self) -> &Celebration {
        &self.current
    }

    #[cfg(test)]
    fn baseline(&self, id: Uuid) -> Option<TaskState> {
        self.baselines.get(&id).copied()
    }

    /// Diffs `tasks` against the recorded baselines. Unseen tasks are recorded
    /// silently; tasks that vanished are forgotten. Returns the ids that just
    /// moved into `Done`.
    pub fn observe(&mut self, tasks: &[Task], now: DateTime<Utc>, rng: &mut impl Rng) -> Vec<Uuid> {
        let mut completed = Vec::new();

        for task in tasks {
            match self.baselines.insert(task.id, task.state) {
                None => trace!(id = %task.id, state = %task.state, "recorded baseline"),
                Some(previous) if previous != TaskState::Done && task.state == TaskState::Done => {
                    debug!(id = %task.id, from = %previous, "task moved into done");
                    completed.push(task.id);
                }
                Some(_) => {}
            }
        }

        let present: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
        self.baselines.retain(|id, _| present.contains(id));

        for id in &completed {
            self.current
                .raise(*id, &self.content, &mut *rng, now + self.display_for);
        }

        completed
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        self.current.expire(now)
    }
}
