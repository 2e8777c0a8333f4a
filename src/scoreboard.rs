use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::env::Edition;
use crate::milestone::MilestoneEvent;
use crate::persist::atomic_write_json;
use crate::run_log::{CompletionReason, RunRecord, edition_dir};

const SCOREBOARD_FILE: &str = "scoreboard.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardEntry {
    pub run_id: u32,
    pub total_time_seconds: f64,
    pub badges: u32,
    pub splits: Vec<MilestoneEvent>,
    pub completion_reason: Option<CompletionReason>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl From<&RunRecord> for ScoreboardEntry {
    fn from(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id,
            total_time_seconds: run.total_time_seconds,
            badges: run.final_badges,
            splits: run.splits.clone(),
            completion_reason: run.completion_reason,
            finished_at: run.finished_at.clone(),
        }
    }
}

/// More badges first, then faster, then older runs.
fn rank(a: &ScoreboardEntry, b: &ScoreboardEntry) -> Ordering {
    b.badges
        .cmp(&a.badges)
        .then_with(|| a.total_time_seconds.total_cmp(&b.total_time_seconds))
        .then_with(|| a.run_id.cmp(&b.run_id))
}

pub struct Scoreboard {
    path: PathBuf,
    entries: Vec<ScoreboardEntry>,
}

impl Scoreboard {
    pub fn path_for(base: &Path, edition: Edition) -> PathBuf {
        edition_dir(base, edition).join(SCOREBOARD_FILE)
    }

    /// Load the edition's board. An unreadable file is moved aside to
    /// `scoreboard.json.corrupt` and the board starts empty.
    pub fn open(base: &Path, edition: Edition) -> Self {
        Self::open_at(Self::path_for(base, edition))
    }

    pub fn open_at(path: PathBuf) -> Self {
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<ScoreboardEntry>>(&bytes) {
                Ok(mut entries) => {
                    entries.sort_by(rank);
                    entries
                }
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "scoreboard unreadable, starting empty"
                    );
                    if let Err(e) = fs::rename(&path, &aside) {
                        warn!(error = %e, "could not move corrupt scoreboard aside");
                    }
                    Vec::new()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no scoreboard yet");
                Vec::new()
            }
        };
        Self { path, entries }
    }

    pub fn entries(&self) -> &[ScoreboardEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the run's entry, re-rank and persist the whole board.
    pub fn update(&mut self, entry: ScoreboardEntry) -> Result<()> {
        self.entries.retain(|e| e.run_id != entry.run_id);
        self.entries.push(entry);
        self.entries.sort_by(rank);
        atomic_write_json(&self.path, &self.entries)
            .with_context(|| format!("Failed to write scoreboard {}", self.path.display()))
    }

    pub fn update_from_run(&mut self, run: &RunRecord) -> Result<()> {
        self.update(ScoreboardEntry::from(run))
    }
}
