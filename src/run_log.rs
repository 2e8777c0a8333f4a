use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::env::{Action, Edition};
use crate::milestone::MilestoneEvent;
use crate::persist::atomic_write_json;
use crate::reward::RewardBreakdown;

const COUNTER_FILE: &str = "run_counter.json";
const METADATA_FILE: &str = "metadata.json";
const DECISIONS_FILE: &str = "decisions.jsonl";
const EVENTS_FILE: &str = "events.jsonl";
const EPISODES_FILE: &str = "episodes.jsonl";
const SPLITS_FILE: &str = "splits.json";
const SUMMARY_FILE: &str = "summary.json";

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn edition_dir(base: &Path, edition: Edition) -> PathBuf {
    base.join(edition.as_str())
}

pub fn run_dir_name(run_id: u32) -> String {
    format!("run_{run_id:04}")
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Every milestone was reached.
    Completed,
    StepBudget,
    Stopped,
    EmulatorError,
}

impl CompletionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionReason::Completed => "completed",
            CompletionReason::StepBudget => "step_budget",
            CompletionReason::Stopped => "stopped",
            CompletionReason::EmulatorError => "emulator_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub step: u64,
    pub action: Action,
    /// True when epsilon picked the action rather than the table.
    pub explored: bool,
    pub reward: RewardBreakdown,
    pub location: u8,
    pub x: u8,
    pub y: u8,
    pub badges: u8,
    pub timestamp: String,
}

/// Totals for one episode, appended when the episode ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode: u64,
    pub start_step: u64,
    pub steps: u64,
    pub reward: f64,
    /// Highest badge count seen during the episode.
    pub max_badges: u32,
    pub new_cells: usize,
    pub explored_tiles: usize,
    pub unique_coords: usize,
    pub deaths: u32,
    pub max_event_flags: u32,
    pub max_opponent_level: u8,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: u32,
    pub edition: Edition,
    pub started_at: String,
    pub milestones: Vec<String>,
    pub splits: Vec<MilestoneEvent>,
    #[serde(default)]
    pub total_time_seconds: f64,
    #[serde(default)]
    pub final_badges: u32,
    #[serde(default)]
    pub total_steps: u64,
    #[serde(default)]
    pub completion_reason: Option<CompletionReason>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct RunCounter {
    next_id: u32,
}

#[derive(Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    level: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

// =============================================================================
// Run Logger
// =============================================================================

/// Owns one run directory from start to finalization.
pub struct RunLogger {
    run_dir: PathBuf,
    record: RunRecord,
    decisions: BufWriter<File>,
    events: File,
    episodes: File,
    started: Instant,
}

impl RunLogger {
    /// Allocate the next run id for the edition and create its directory.
    pub fn start(base: &Path, edition: Edition, milestones: &[String]) -> Result<Self> {
        let edition_dir = edition_dir(base, edition);
        fs::create_dir_all(&edition_dir)
            .with_context(|| format!("Failed to create {}", edition_dir.display()))?;
        let run_id = next_run_id(&edition_dir)?;

        let run_dir = edition_dir.join(run_dir_name(run_id));
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run dir: {}", run_dir.display()))?;

        let record = RunRecord {
            run_id,
            edition,
            started_at: timestamp(),
            milestones: milestones.to_vec(),
            splits: Vec::new(),
            total_time_seconds: 0.0,
            final_badges: 0,
            total_steps: 0,
            completion_reason: None,
            finished_at: None,
        };
        atomic_write_json(&run_dir.join(METADATA_FILE), &record)?;
        atomic_write_json(&run_dir.join(SPLITS_FILE), &record.splits)?;

        let decisions = File::create(run_dir.join(DECISIONS_FILE))
            .context("Failed to create decision log")?;
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(EVENTS_FILE))
            .context("Failed to create event log")?;
        let episodes = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(EPISODES_FILE))
            .context("Failed to create episode log")?;

        info!(run_id, edition = %edition, dir = %run_dir.display(), "run started");
        Ok(Self {
            run_dir,
            record,
            decisions: BufWriter::new(decisions),
            events,
            episodes,
            started: Instant::now(),
        })
    }

    pub fn run_id(&self) -> u32 {
        self.record.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Buffered; reaches disk on `flush` or when the buffer fills.
    pub fn log_decision(&mut self, decision: &DecisionRecord) -> Result<()> {
        serde_json::to_writer(&mut self.decisions, decision)?;
        self.decisions.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.decisions
            .flush()
            .context("Failed to flush decision log")
    }

    /// Written straight through so events survive a crash.
    pub fn log_event(
        &mut self,
        level: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let event = EventRecord {
            timestamp: timestamp(),
            level,
            message,
            details,
        };
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.events
            .write_all(&line)
            .context("Failed to append event log")?;
        Ok(())
    }

    pub fn log_episode(&mut self, episode: &EpisodeRecord) -> Result<()> {
        let mut line = serde_json::to_vec(episode)?;
        line.push(b'\n');
        self.episodes
            .write_all(&line)
            .context("Failed to append episode log")
    }

    /// Persist the split immediately; nothing about it is buffered.
    pub fn record_split(&mut self, split: MilestoneEvent) -> Result<()> {
        let details = serde_json::to_value(&split)?;
        let message = format!("milestone reached: {}", split.name);
        self.record.splits.push(split);
        atomic_write_json(&self.run_dir.join(SPLITS_FILE), &self.record.splits)?;
        self.log_event("info", &message, Some(details))
    }

    /// Seal the run: flush the decision log, write the summary and mark it
    /// read-only. Consumes the logger so a run cannot be finished twice.
    pub fn finish(
        mut self,
        reason: CompletionReason,
        final_badges: u32,
        total_steps: u64,
    ) -> Result<RunRecord> {
        self.flush()?;
        self.record.total_time_seconds = self.elapsed_seconds();
        self.record.final_badges = final_badges;
        self.record.total_steps = total_steps;
        self.record.completion_reason = Some(reason);
        self.record.finished_at = Some(timestamp());

        let summary_path = self.run_dir.join(SUMMARY_FILE);
        atomic_write_json(&summary_path, &self.record)?;
        let mut perms = fs::metadata(&summary_path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&summary_path, perms)
            .with_context(|| format!("Failed to seal {}", summary_path.display()))?;

        self.log_event(
            "info",
            "run finished",
            Some(serde_json::json!({
                "reason": reason.as_str(),
                "badges": final_badges,
                "steps": total_steps,
            })),
        )?;
        info!(
            run_id = self.record.run_id,
            reason = reason.as_str(),
            badges = final_badges,
            steps = total_steps,
            seconds = self.record.total_time_seconds,
            "run finished"
        );
        Ok(self.record)
    }
}

/// Read the counter, hand out its id and store the successor. An unreadable
/// counter falls back to one past the highest run directory on disk.
fn next_run_id(edition_dir: &Path) -> Result<u32> {
    let counter_path = edition_dir.join(COUNTER_FILE);
    let stored = fs::read_to_string(&counter_path)
        .ok()
        .map(|text| serde_json::from_str::<RunCounter>(&text));
    let from_disk = highest_run_id(edition_dir)?.map_or(1, |id| id + 1);
    let run_id = match stored {
        Some(Ok(counter)) => counter.next_id.max(from_disk),
        Some(Err(e)) => {
            warn!(path = %counter_path.display(), error = %e, "run counter unreadable");
            from_disk
        }
        None => from_disk,
    };
    atomic_write_json(
        &counter_path,
        &RunCounter {
            next_id: run_id + 1,
        },
    )?;
    Ok(run_id)
}

fn highest_run_id(edition_dir: &Path) -> Result<Option<u32>> {
    let mut best = None;
    for entry in fs::read_dir(edition_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix("run_"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        best = best.max(Some(id));
    }
    Ok(best)
}

/// Every run directory for the edition, oldest first, with its summary when
/// the run was finalized.
pub fn list_runs(base: &Path, edition: Edition) -> Result<Vec<(u32, Option<RunRecord>)>> {
    let dir = edition_dir(base, edition);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix("run_"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        let summary = fs::read(entry.path().join(SUMMARY_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<RunRecord>(&bytes).ok());
        runs.push((id, summary));
    }
    runs.sort_by_key(|(id, _)| *id);
    Ok(runs)
}

pub fn read_decisions(run_dir: &Path) -> Result<Vec<DecisionRecord>> {
    read_jsonl(&run_dir.join(DECISIONS_FILE))
}

pub fn read_episodes(run_dir: &Path) -> Result<Vec<EpisodeRecord>> {
    read_jsonl(&run_dir.join(EPISODES_FILE))
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

pub fn read_splits(run_dir: &Path) -> Result<Vec<MilestoneEvent>> {
    let bytes = fs::read(run_dir.join(SPLITS_FILE))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(step: u64) -> DecisionRecord {
        DecisionRecord {
            step,
            action: Action::Primary,
            explored: false,
            reward: RewardBreakdown {
                exploration: 0.1,
                ..Default::default()
            },
            location: 0,
            x: 1,
            y: 2,
            badges: 0,
            timestamp: timestamp(),
        }
    }

    fn split(index: usize, step: u64) -> MilestoneEvent {
        MilestoneEvent {
            name: format!("m{index}"),
            index,
            step,
            elapsed_seconds: step as f64,
            play_time_seconds: 0.0,
            cumulative_reward: 1.5,
        }
    }

    #[test]
    fn run_ids_are_monotonic_per_edition() {
        let dir = tempfile::tempdir().unwrap();
        let a = RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        let b = RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        let c = RunLogger::start(dir.path(), Edition::Blue, &[]).unwrap();
        assert_eq!((a.run_id(), b.run_id(), c.run_id()), (1, 2, 1));
        assert!(dir.path().join("red").join("run_0002").is_dir());
    }

    #[test]
    fn corrupt_counter_falls_back_to_directories() {
        let dir = tempfile::tempdir().unwrap();
        RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        fs::write(dir.path().join("red").join(COUNTER_FILE), "{oops").unwrap();
        let next = RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        assert_eq!(next.run_id(), 2);
    }

    #[test]
    fn splits_are_written_before_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::start(dir.path(), Edition::Red, &["m0".into()]).unwrap();
        logger.record_split(split(0, 12)).unwrap();
        let on_disk = read_splits(logger.run_dir()).unwrap();
        assert_eq!(on_disk, vec![split(0, 12)]);
        let events = fs::read_to_string(logger.run_dir().join(EVENTS_FILE)).unwrap();
        assert!(events.contains("milestone reached: m0"));
    }

    #[test]
    fn finish_flushes_decisions_and_seals_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::start(dir.path(), Edition::Yellow, &[]).unwrap();
        for step in 1..=3 {
            logger.log_decision(&decision(step)).unwrap();
        }
        let run_dir = logger.run_dir().to_path_buf();
        let record = logger.finish(CompletionReason::StepBudget, 2, 3).unwrap();
        assert_eq!(record.completion_reason, Some(CompletionReason::StepBudget));

        let decisions = read_decisions(&run_dir).unwrap();
        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[2].step, 3);

        let summary = run_dir.join(SUMMARY_FILE);
        assert!(fs::metadata(&summary).unwrap().permissions().readonly());
        let runs = list_runs(dir.path(), Edition::Yellow).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.as_ref().map(|r| r.final_badges), Some(2));
    }

    #[test]
    fn decision_lines_carry_reward_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        logger.log_decision(&decision(1)).unwrap();
        logger.flush().unwrap();
        let text = fs::read_to_string(logger.run_dir().join(DECISIONS_FILE)).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["action"], "A");
        assert_eq!(line["reward"]["total"], 0.1);
    }

    #[test]
    fn episode_records_are_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::start(dir.path(), Edition::Red, &[]).unwrap();
        let record = EpisodeRecord {
            episode: 0,
            start_step: 0,
            steps: 40,
            reward: 12.5,
            max_badges: 1,
            new_cells: 17,
            explored_tiles: 17,
            unique_coords: 17,
            deaths: 0,
            max_event_flags: 3,
            max_opponent_level: 6,
            timestamp: timestamp(),
        };
        logger.log_episode(&record).unwrap();
        assert_eq!(read_episodes(logger.run_dir()).unwrap(), vec![record]);
    }
}
