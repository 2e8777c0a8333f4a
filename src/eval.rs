use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::env::{Emulator, GbEnv};
use crate::error::CoreError;
use crate::qlearn::QAgent;
use crate::reward::{RewardCalculator, RewardConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalStats {
    pub avg_reward: f64,
    pub avg_explored_tiles: f64,
    pub avg_badges: f64,
    pub skipped_steps: u64,
    pub episodes: usize,
}

/// Roll the table greedily without learning. Each episode restarts from
/// `init_state` when given and scores novelty against a fresh map.
pub fn run_eval<E: Emulator>(
    agent: &QAgent,
    env: &mut GbEnv<E>,
    reward_config: &RewardConfig,
    init_state: Option<&Path>,
    episodes: usize,
    steps_per_episode: u64,
) -> Result<EvalStats> {
    let mut total_reward = 0.0f64;
    let mut total_tiles = 0usize;
    let mut total_badges = 0u64;
    let mut skipped_steps = 0u64;

    let eval_episodes = episodes.max(1);

    for _ in 0..eval_episodes {
        if let Some(path) = init_state {
            env.reset_from_snapshot(path)?;
        }
        let mut rewards = RewardCalculator::new(reward_config.clone());
        let mut prev = env.read_state()?;
        let mut ep_reward = 0.0f64;

        for _ in 0..steps_per_episode {
            let action = agent.greedy_action(&agent.state_key(&prev));
            env.step(action).map_err(CoreError::from)?;
            let curr = match env.read_state() {
                Ok(s) => s,
                Err(CoreError::MalformedSnapshot(msg)) => {
                    warn!(reason = %msg, "eval: skipping malformed snapshot");
                    skipped_steps += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            ep_reward += rewards.calculate_reward(&prev, &curr, 0.0).total();
            prev = curr;
        }

        total_reward += ep_reward;
        total_tiles += rewards.exploration_map().get_explored_count();
        total_badges += prev.badge_count() as u64;
    }

    let denom = eval_episodes as f64;
    let stats = EvalStats {
        avg_reward: total_reward / denom,
        avg_explored_tiles: total_tiles as f64 / denom,
        avg_badges: total_badges as f64 / denom,
        skipped_steps,
        episodes: eval_episodes,
    };
    info!(
        episodes = stats.episodes,
        avg_reward = stats.avg_reward,
        avg_tiles = stats.avg_explored_tiles,
        avg_badges = stats.avg_badges,
        "evaluation finished"
    );
    Ok(stats)
}
