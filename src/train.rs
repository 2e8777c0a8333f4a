use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::checkpoint::{
    CheckpointScore, TrainMeta, resolve_resume, resume_from, save_best_checkpoint,
    save_checkpoint,
};
use crate::dashboard::DashboardState;
use crate::env::{Action, Edition, Emulator, GameState, GbEnv};
use crate::error::CoreError;
use crate::eval::{EvalStats, run_eval};
use crate::exploration::ExplorationMap;
use crate::milestone::{Milestone, MilestoneTracker};
use crate::qlearn::{AgentConfig, QAgent, linear_epsilon};
use crate::reward::{RewardBreakdown, RewardCalculator, RewardConfig};
use crate::run_log::{
    CompletionReason, DecisionRecord, EpisodeRecord, RunLogger, RunRecord, timestamp,
};
use crate::scoreboard::Scoreboard;

#[derive(clap::Args, Debug, Clone)]
pub struct TrainConfig {
    #[arg(long, value_enum, default_value_t = Edition::Red)]
    pub edition: Edition,
    /// Total decision steps for the run.
    #[arg(long, default_value = "100000")]
    pub max_steps: u64,
    #[arg(long, default_value = "2048")]
    pub episode_steps: u64,
    /// Steps between decision-log flushes and table/map saves.
    #[arg(long, default_value = "500")]
    pub flush_interval: u64,
    #[arg(long, default_value = "10000")]
    pub checkpoint_interval: u64,
    #[arg(long, default_value = "5")]
    pub keep_checkpoints: usize,
    /// Steps between greedy evaluations; 0 disables them.
    #[arg(long, default_value = "50000")]
    pub eval_interval: u64,
    #[arg(long, default_value = "3")]
    pub eval_episodes: usize,
    #[arg(long, default_value = "512")]
    pub eval_steps: u64,
    /// Best-scoring evaluation checkpoints to keep.
    #[arg(long, default_value = "3")]
    pub keep_best: usize,
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
    /// Emulator snapshot each episode starts from.
    #[arg(long)]
    pub init_state: Option<PathBuf>,
    /// Checkpoint to restore the table and epsilon from: a directory,
    /// `latest` or `best`.
    #[arg(long)]
    pub resume: Option<PathBuf>,
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            edition: Edition::Red,
            max_steps: 100_000,
            episode_steps: 2048,
            flush_interval: 500,
            checkpoint_interval: 10_000,
            keep_checkpoints: 5,
            eval_interval: 50_000,
            eval_episodes: 3,
            eval_steps: 512,
            keep_best: 3,
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            init_state: None,
            resume: None,
            seed: None,
        }
    }
}

impl TrainConfig {
    pub fn q_table_path(&self) -> PathBuf {
        self.data_dir.join("q_table.json")
    }

    pub fn exploration_map_path(&self) -> PathBuf {
        self.data_dir.join("exploration_map.bin")
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn checkpoint_root(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

// =============================================================================
// Training Context
// =============================================================================

/// Everything one run mutates, owned by the caller and passed down.
pub struct TrainingContext {
    pub agent: QAgent,
    pub agent_config: AgentConfig,
    pub rewards: RewardCalculator,
    pub milestones: MilestoneTracker,
    pub logger: RunLogger,
    pub scoreboard: Scoreboard,
    /// Steps already taken before this process, when resuming.
    pub start_step: u64,
}

impl TrainingContext {
    /// Validates the milestone list before touching disk; persisted table and
    /// map are restored when present.
    pub fn new(
        config: &TrainConfig,
        mut agent_config: AgentConfig,
        reward_config: RewardConfig,
        milestones: Vec<Milestone>,
    ) -> Result<Self> {
        let milestones = MilestoneTracker::new(milestones)?;
        if config.seed.is_some() {
            agent_config.seed = config.seed;
        }

        let mut agent = QAgent::new(&agent_config);
        let mut start_step = 0;
        match &config.resume {
            Some(arg) => {
                let dir = resolve_resume(&config.checkpoint_root(), arg)?;
                let meta = resume_from(&mut agent, &dir)?;
                start_step = meta.step;
                info!(step = meta.step, episode = meta.episode, dir = %dir.display(), "resumed");
            }
            None => agent.load(&config.q_table_path()),
        }
        let map = ExplorationMap::load(&config.exploration_map_path());
        let rewards = RewardCalculator::with_map(reward_config, map);

        let names: Vec<String> = milestones
            .milestones()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        let logger = RunLogger::start(&config.log_dir, config.edition, &names)?;
        let scoreboard = Scoreboard::open(&config.log_dir, config.edition);

        Ok(Self {
            agent,
            agent_config,
            rewards,
            milestones,
            logger,
            scoreboard,
            start_step,
        })
    }

    pub fn save_tables(&self, config: &TrainConfig) -> Result<()> {
        self.agent.save(&config.q_table_path())?;
        self.rewards
            .exploration_map()
            .save(&config.exploration_map_path())
    }
}

// =============================================================================
// Trainer
// =============================================================================

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub run: RunRecord,
    pub steps: u64,
    pub episodes: u64,
    pub cumulative_reward: f64,
    pub explored_tiles: usize,
}

pub struct Trainer<E: Emulator> {
    env: GbEnv<E>,
    ctx: TrainingContext,
    config: TrainConfig,
    stop: Arc<AtomicBool>,
    step: u64,
    episode: u64,
    episode_step: u64,
    episode_start: u64,
    episode_reward: f64,
    episode_badges: u32,
    episode_open: bool,
    cumulative_reward: f64,
    /// Most badges held at any point in the run. Episode resets can take
    /// badges away from the live state; this never goes down.
    badges: u32,
}

enum StepOutcome {
    Continue,
    Finished(CompletionReason),
}

impl<E: Emulator> Trainer<E> {
    pub fn new(env: GbEnv<E>, ctx: TrainingContext, config: TrainConfig) -> Self {
        let step = ctx.start_step;
        Self {
            env,
            ctx,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            step,
            episode: 0,
            episode_step: 0,
            episode_start: step,
            episode_reward: 0.0,
            episode_badges: 0,
            episode_open: false,
            cumulative_reward: 0.0,
            badges: 0,
        }
    }

    /// Flag checked once per step boundary; set it to end the run cleanly.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn context(&self) -> &TrainingContext {
        &self.ctx
    }

    pub fn env(&self) -> &GbEnv<E> {
        &self.env
    }

    fn begin_episode(&mut self) -> Result<GameState> {
        if let Some(path) = self.config.init_state.clone() {
            self.env.reset_from_snapshot(&path)?;
        }
        self.ctx.rewards.reset();
        self.episode_step = 0;
        self.episode_start = self.step;
        self.episode_reward = 0.0;
        let state = self.env.read_state()?;
        self.episode_badges = state.badge_count();
        self.badges = self.badges.max(self.episode_badges);
        self.episode_open = true;
        self.ctx.logger.log_event(
            "info",
            "episode started",
            Some(serde_json::json!({ "episode": self.episode, "step": self.step })),
        )?;
        Ok(state)
    }

    /// Append the open episode's totals to the run's episode log.
    fn end_episode(&mut self) -> Result<()> {
        if !self.episode_open {
            return Ok(());
        }
        self.episode_open = false;
        let stats = self.ctx.rewards.get_stats();
        let record = EpisodeRecord {
            episode: self.episode,
            start_step: self.episode_start,
            steps: self.episode_step,
            reward: self.episode_reward,
            max_badges: self.episode_badges,
            new_cells: self.ctx.rewards.exploration_map().episode_new_cells(),
            explored_tiles: stats.explored_tiles,
            unique_coords: stats.unique_coords,
            deaths: stats.deaths,
            max_event_flags: stats.max_event_flags,
            max_opponent_level: stats.max_opponent_level,
            timestamp: timestamp(),
        };
        info!(
            episode = record.episode,
            steps = record.steps,
            reward = record.reward,
            badges = record.max_badges,
            new_cells = record.new_cells,
            deaths = record.deaths,
            "episode finished"
        );
        self.ctx.logger.log_episode(&record)
    }

    pub fn run(mut self) -> Result<TrainSummary> {
        let reason = match self.begin_episode() {
            Ok(first) => self.run_loop(first)?,
            Err(e) => {
                error!(error = %e, "could not start first episode");
                self.ctx
                    .logger
                    .log_event("error", "could not start first episode", None)?;
                CompletionReason::EmulatorError
            }
        };
        self.end_episode()?;
        self.finish(reason)
    }

    fn run_loop(&mut self, mut prev: GameState) -> Result<CompletionReason> {
        let started = Instant::now();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(CompletionReason::Stopped);
            }
            if self.step >= self.config.max_steps {
                return Ok(CompletionReason::StepBudget);
            }

            if let StepOutcome::Finished(reason) = self.step_once(&mut prev)? {
                return Ok(reason);
            }

            if self.step % self.config.flush_interval.max(1) == 0 {
                self.flush()?;
                let stats = self.ctx.rewards.get_stats();
                let next = self.ctx.milestones.next_milestone().map_or("-", |m| m.name.as_str());
                info!(
                    step = self.step,
                    episode = self.episode,
                    epsilon = self.ctx.agent.epsilon,
                    reward = self.cumulative_reward,
                    explored = stats.explored_tiles,
                    episode_new = self.ctx.rewards.exploration_map().episode_new_cells(),
                    states = self.ctx.agent.stats().states_seen,
                    next_milestone = next,
                    sps = self.step as f64 / started.elapsed().as_secs_f64().max(1e-9),
                    "progress"
                );
            }
            if self.step % self.config.checkpoint_interval.max(1) == 0 {
                self.checkpoint()?;
            }
            if self.config.eval_interval > 0 && self.step % self.config.eval_interval == 0 {
                match self.evaluate() {
                    Ok(_) => {}
                    Err(e) if CoreError::is_collaborator_failure(&e) => {
                        error!(error = %e, step = self.step, "evaluation failed, aborting run");
                        self.ctx.logger.log_event(
                            "error",
                            "evaluation failed",
                            Some(serde_json::json!({ "step": self.step, "error": e.to_string() })),
                        )?;
                        return Ok(CompletionReason::EmulatorError);
                    }
                    Err(e) => return Err(e),
                }
            }

            if self.episode_step >= self.config.episode_steps {
                self.end_episode()?;
                self.episode += 1;
                match self.begin_episode() {
                    Ok(state) => prev = state,
                    Err(e) => {
                        error!(error = %e, step = self.step, "episode reset failed, aborting run");
                        return Ok(CompletionReason::EmulatorError);
                    }
                }
            }
        }
    }

    fn step_once(&mut self, prev: &mut GameState) -> Result<StepOutcome> {
        self.ctx.agent.epsilon = linear_epsilon(&self.ctx.agent_config, self.step);
        let key = self.ctx.agent.state_key(prev);
        let (action, explored) = self.ctx.agent.select_action(&key);

        let t0 = Instant::now();
        if let Err(e) = self.env.step(action) {
            error!(error = %e, step = self.step, "emulator failed, aborting run");
            self.ctx.logger.log_event(
                "error",
                "emulator failed",
                Some(serde_json::json!({ "step": self.step, "error": e.to_string() })),
            )?;
            return Ok(StepOutcome::Finished(CompletionReason::EmulatorError));
        }
        self.step += 1;
        self.episode_step += 1;

        let curr = match self.env.read_state() {
            Ok(curr) => curr,
            Err(CoreError::MalformedSnapshot(msg)) => {
                warn!(step = self.step, reason = %msg, "skipping step with malformed snapshot");
                self.log_decision(action, explored, RewardBreakdown::default(), prev)?;
                return Ok(StepOutcome::Continue);
            }
            Err(e) => {
                error!(error = %e, step = self.step, "emulator failed, aborting run");
                self.ctx.logger.log_event(
                    "error",
                    "emulator failed",
                    Some(serde_json::json!({ "step": self.step, "error": e.to_string() })),
                )?;
                return Ok(StepOutcome::Finished(CompletionReason::EmulatorError));
            }
        };

        let elapsed = t0.elapsed().as_secs_f64();
        let reward = self.ctx.rewards.calculate_reward(prev, &curr, elapsed);
        self.cumulative_reward += reward.total();
        self.episode_reward += reward.total();

        let run_seconds = self.ctx.logger.elapsed_seconds();
        if let Some(event) =
            self.ctx
                .milestones
                .observe(&curr, self.step, run_seconds, self.cumulative_reward)
        {
            self.ctx.logger.record_split(event)?;
        }
        let done = self.ctx.milestones.is_terminal();

        // The final milestone has no successor state to bootstrap from.
        if done {
            self.ctx.agent.update_terminal(key, action, reward.total());
        } else {
            let next_key = self.ctx.agent.state_key(&curr);
            self.ctx.agent.update(key, action, reward.total(), &next_key);
        }

        self.log_decision(action, explored, reward, &curr)?;
        DashboardState::project(&curr, self.step, self.cumulative_reward)
            .write(&self.config.dashboard_path())?;
        self.episode_badges = self.episode_badges.max(curr.badge_count());
        self.badges = self.badges.max(curr.badge_count());
        *prev = curr;

        if done {
            return Ok(StepOutcome::Finished(CompletionReason::Completed));
        }
        Ok(StepOutcome::Continue)
    }

    fn log_decision(
        &mut self,
        action: Action,
        explored: bool,
        reward: RewardBreakdown,
        at: &GameState,
    ) -> Result<()> {
        self.ctx.logger.log_decision(&DecisionRecord {
            step: self.step,
            action,
            explored,
            reward,
            location: at.location,
            x: at.x,
            y: at.y,
            badges: at.badges,
            timestamp: timestamp(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.ctx.logger.flush()?;
        self.ctx.save_tables(&self.config)
    }

    fn train_meta(&self) -> TrainMeta {
        TrainMeta {
            step: self.step,
            episode: self.episode,
            epsilon: self.ctx.agent.epsilon,
            explored_tiles: self.ctx.rewards.exploration_map().get_explored_count(),
            cumulative_reward: self.cumulative_reward,
        }
    }

    fn checkpoint(&mut self) -> Result<()> {
        save_checkpoint(
            &self.ctx.agent,
            &self.train_meta(),
            &self.config.checkpoint_root(),
            self.config.keep_checkpoints,
        )?;
        Ok(())
    }

    /// Greedy rollout from a copy of the current emulator state. The live
    /// state is restored afterwards so training resumes where it stopped.
    fn evaluate(&mut self) -> Result<EvalStats> {
        let mut saved = Vec::new();
        self.env
            .emulator_mut()
            .save_snapshot(&mut saved)
            .map_err(CoreError::from)?;
        let stats = run_eval(
            &self.ctx.agent,
            &mut self.env,
            &self.ctx.rewards.config,
            self.config.init_state.as_deref(),
            self.config.eval_episodes,
            self.config.eval_steps,
        )?;
        self.env
            .emulator_mut()
            .load_snapshot(&mut saved.as_slice())
            .map_err(CoreError::from)?;

        let kept = save_best_checkpoint(
            &self.ctx.agent,
            &self.train_meta(),
            &self.config.checkpoint_root(),
            CheckpointScore {
                score: stats.avg_reward,
                reason: "eval_reward".to_string(),
            },
            self.config.keep_best,
        )?;
        self.ctx.logger.log_event(
            "info",
            "evaluation finished",
            Some(serde_json::json!({
                "step": self.step,
                "avg_reward": stats.avg_reward,
                "avg_explored_tiles": stats.avg_explored_tiles,
                "avg_badges": stats.avg_badges,
                "best": kept.is_some(),
            })),
        )?;
        Ok(stats)
    }

    fn finish(self, reason: CompletionReason) -> Result<TrainSummary> {
        let Trainer {
            ctx,
            config,
            step,
            episode,
            cumulative_reward,
            badges,
            ..
        } = self;
        ctx.save_tables(&config)?;

        let explored_tiles = ctx.rewards.exploration_map().get_explored_count();
        let TrainingContext {
            logger,
            mut scoreboard,
            ..
        } = ctx;
        let run = logger.finish(reason, badges, step)?;
        scoreboard
            .update_from_run(&run)
            .context("Failed to update scoreboard")?;

        Ok(TrainSummary {
            run,
            steps: step,
            episodes: episode + 1,
            cumulative_reward,
            explored_tiles,
        })
    }
}

/// Run a full training session against an already-constructed emulator.
pub fn train<E: Emulator>(
    emu: E,
    config: TrainConfig,
    agent_config: AgentConfig,
    reward_config: RewardConfig,
    milestones: Vec<Milestone>,
    stop: Option<Arc<AtomicBool>>,
) -> Result<TrainSummary> {
    let ctx = TrainingContext::new(&config, agent_config, reward_config, milestones)?;
    let env = GbEnv::new(emu, config.edition, Default::default());
    let mut trainer = Trainer::new(env, ctx, config);
    if let Some(stop) = stop {
        trainer.stop = stop;
    }
    trainer.run()
}
