use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::persist::atomic_write_json;
use crate::qlearn::QAgent;

const META_FILE: &str = "meta.json";
const TABLE_FILE: &str = "q_table.json";
const SCORE_FILE: &str = "score.json";
const BEST_PREFIX: &str = "best_step_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainMeta {
    pub step: u64,
    pub episode: u64,
    pub epsilon: f64,
    pub explored_tiles: usize,
    pub cumulative_reward: f64,
}

pub fn checkpoint_dir(root: &Path, step: u64) -> PathBuf {
    root.join(format!("step_{step}"))
}

/// Write `step_<N>/` with the table and meta, then drop all but the newest
/// `keep` checkpoints.
pub fn save_checkpoint(
    agent: &QAgent,
    meta: &TrainMeta,
    root: &Path,
    keep: usize,
) -> Result<PathBuf> {
    let dir = checkpoint_dir(root, meta.step);
    write_checkpoint(agent, meta, &dir)?;
    info!(step = meta.step, dir = %dir.display(), "checkpoint saved");
    prune_checkpoints(root, keep)?;
    Ok(dir)
}

fn write_checkpoint(agent: &QAgent, meta: &TrainMeta, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create checkpoint dir: {}", dir.display()))?;
    agent.save(&dir.join(TABLE_FILE))?;
    atomic_write_json(&dir.join(META_FILE), meta)
}

fn list_checkpoints(root: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let step = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix("step_"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(step) = step {
            found.push((step, entry.path()));
        }
    }
    found.sort_by_key(|(step, _)| *step);
    Ok(found)
}

pub fn prune_checkpoints(root: &Path, keep: usize) -> Result<()> {
    let found = list_checkpoints(root)?;
    let excess = found.len().saturating_sub(keep.max(1));
    for (step, path) in found.into_iter().take(excess) {
        fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to remove checkpoint {}", path.display()))?;
        debug!(step, "pruned checkpoint");
    }
    Ok(())
}

pub fn latest_checkpoint(root: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(root)?.pop().map(|(_, path)| path))
}

// =============================================================================
// Best Checkpoints
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointScore {
    pub score: f64,
    /// What the score measures, e.g. "eval_reward".
    pub reason: String,
}

/// Best-scoring checkpoints under `root`, highest first. Ties go to the
/// earlier step.
pub fn list_best_checkpoints(root: &Path) -> Result<Vec<(CheckpointScore, u64, PathBuf)>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let Some(step) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix(BEST_PREFIX))
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        let path = entry.path();
        let score = fs::read(path.join(SCORE_FILE))
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<CheckpointScore>(&bytes)?));
        match score {
            Ok(score) => found.push((score, step, path)),
            Err(e) => warn!(dir = %path.display(), error = %e, "ignoring unscored checkpoint"),
        }
    }
    found.sort_by(|a, b| b.0.score.total_cmp(&a.0.score).then(a.1.cmp(&b.1)));
    Ok(found)
}

/// Store the table as `best_step_<N>/` if `score` ranks among the `keep`
/// best, then drop whatever fell out of the top `keep`. Returns the
/// directory when the checkpoint was kept.
pub fn save_best_checkpoint(
    agent: &QAgent,
    meta: &TrainMeta,
    root: &Path,
    score: CheckpointScore,
    keep: usize,
) -> Result<Option<PathBuf>> {
    let keep = keep.max(1);
    let existing = list_best_checkpoints(root)?;
    if existing.len() >= keep && existing[keep - 1].0.score >= score.score {
        debug!(step = meta.step, score = score.score, "checkpoint not among the best");
        return Ok(None);
    }

    let dir = root.join(format!("{BEST_PREFIX}{}", meta.step));
    write_checkpoint(agent, meta, &dir)?;
    atomic_write_json(&dir.join(SCORE_FILE), &score)?;
    info!(
        step = meta.step,
        score = score.score,
        reason = %score.reason,
        "best checkpoint saved"
    );

    for (_, step, path) in list_best_checkpoints(root)?.into_iter().skip(keep) {
        fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to remove checkpoint {}", path.display()))?;
        debug!(step, "dropped best checkpoint");
    }
    Ok(Some(dir))
}

pub fn best_checkpoint(root: &Path) -> Result<Option<PathBuf>> {
    Ok(list_best_checkpoints(root)?
        .into_iter()
        .next()
        .map(|(_, _, path)| path))
}

/// Resolve a `--resume` argument: `latest`, `best`, or a directory.
pub fn resolve_resume(root: &Path, arg: &Path) -> Result<PathBuf> {
    let found = match arg.to_str() {
        Some("latest") => latest_checkpoint(root)?,
        Some("best") => best_checkpoint(root)?,
        _ => return Ok(arg.to_path_buf()),
    };
    found.with_context(|| format!("No checkpoint to resume under {}", root.display()))
}

/// Restore the table from a checkpoint directory and return its meta.
pub fn resume_from(agent: &mut QAgent, dir: &Path) -> Result<TrainMeta> {
    agent
        .try_load(&dir.join(TABLE_FILE))
        .with_context(|| format!("Failed to resume from {}", dir.display()))?;
    let file = File::open(dir.join(META_FILE))?;
    let reader = std::io::BufReader::new(file);
    let meta: TrainMeta = serde_json::from_reader(reader)?;
    agent.epsilon = meta.epsilon;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Action;
    use crate::qlearn::{AgentConfig, StateKey};

    fn meta(step: u64) -> TrainMeta {
        TrainMeta {
            step,
            episode: step / 10,
            epsilon: 0.05,
            explored_tiles: 12,
            cumulative_reward: 3.5,
        }
    }

    #[test]
    fn keeps_only_newest_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let agent = QAgent::new(&AgentConfig::default());
        for step in [100, 200, 300, 400] {
            save_checkpoint(&agent, &meta(step), dir.path(), 2).unwrap();
        }
        let left: Vec<u64> = list_checkpoints(dir.path())
            .unwrap()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(left, vec![300, 400]);
        assert_eq!(
            latest_checkpoint(dir.path()).unwrap(),
            Some(checkpoint_dir(dir.path(), 400))
        );
    }

    #[test]
    fn resume_restores_table_and_epsilon() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = QAgent::new(&AgentConfig::default());
        let key = StateKey {
            location: 1,
            qx: 0,
            qy: 0,
            badges: 0,
        };
        agent.update_terminal(key, Action::Down, 2.0);
        let saved = save_checkpoint(&agent, &meta(50), dir.path(), 3).unwrap();

        let mut fresh = QAgent::new(&AgentConfig::default());
        let restored = resume_from(&mut fresh, &saved).unwrap();
        assert_eq!(restored, meta(50));
        assert_eq!(fresh.epsilon, 0.05);
        assert_eq!(fresh.table(), agent.table());
    }

    fn score(v: f64) -> CheckpointScore {
        CheckpointScore {
            score: v,
            reason: "eval_reward".into(),
        }
    }

    #[test]
    fn best_set_keeps_top_scores() {
        let dir = tempfile::tempdir().unwrap();
        let agent = QAgent::new(&AgentConfig::default());
        let root = dir.path();
        let save = |step, v| save_best_checkpoint(&agent, &meta(step), root, score(v), 2).unwrap();
        assert!(save(10, 1.0).is_some());
        assert!(save(20, 5.0).is_some());
        // Not better than the current second best.
        assert!(save(30, 0.5).is_none());
        assert!(save(40, 3.0).is_some());

        let ranked: Vec<(f64, u64)> = list_best_checkpoints(root)
            .unwrap()
            .into_iter()
            .map(|(s, step, _)| (s.score, step))
            .collect();
        assert_eq!(ranked, vec![(5.0, 20), (3.0, 40)]);
        assert!(!root.join("best_step_10").exists());
        assert_eq!(
            best_checkpoint(root).unwrap(),
            Some(root.join("best_step_20"))
        );
    }

    #[test]
    fn best_and_recent_sets_are_pruned_separately() {
        let dir = tempfile::tempdir().unwrap();
        let agent = QAgent::new(&AgentConfig::default());
        save_best_checkpoint(&agent, &meta(5), dir.path(), score(9.0), 1).unwrap();
        for step in [100, 200, 300] {
            save_checkpoint(&agent, &meta(step), dir.path(), 1).unwrap();
        }
        assert!(dir.path().join("best_step_5").exists());
        assert_eq!(list_checkpoints(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn resume_argument_resolves_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let agent = QAgent::new(&AgentConfig::default());
        assert!(resolve_resume(root, Path::new("latest")).is_err());

        save_checkpoint(&agent, &meta(100), root, 3).unwrap();
        save_checkpoint(&agent, &meta(200), root, 3).unwrap();
        save_best_checkpoint(&agent, &meta(100), root, score(2.0), 3).unwrap();
        assert_eq!(
            resolve_resume(root, Path::new("latest")).unwrap(),
            checkpoint_dir(root, 200)
        );
        assert_eq!(
            resolve_resume(root, Path::new("best")).unwrap(),
            root.join("best_step_100")
        );
        let explicit = root.join("elsewhere");
        assert_eq!(resolve_resume(root, &explicit).unwrap(), explicit);

        let mut fresh = QAgent::new(&AgentConfig::default());
        let meta = resume_from(&mut fresh, &root.join("best_step_100")).unwrap();
        assert_eq!(meta.step, 100);
    }
}
