pub mod checkpoint;
pub mod dashboard;
pub mod env;
pub mod error;
pub mod eval;
pub mod exploration;
pub mod milestone;
pub mod persist;
pub mod qlearn;
pub mod reward;
pub mod run_log;
pub mod scoreboard;
pub mod train;

pub use checkpoint::{CheckpointScore, TrainMeta, save_best_checkpoint, save_checkpoint};
pub use dashboard::DashboardState;
pub use env::{
    Action, BattleType, Button, Edition, Emulator, EnvConfig, GameState, GbEnv, MemoryMap,
    PartyMember, RamImage, count_event_flags, hp_fraction, ram, read_state,
};
pub use error::{CoreError, EmulatorError};
pub use eval::{EvalStats, run_eval};
pub use exploration::ExplorationMap;
pub use milestone::{
    Milestone, MilestoneEvent, MilestoneTracker, MilestoneTrigger, default_milestones,
};
pub use qlearn::{AgentConfig, QAgent, StateKey};
pub use reward::{RewardBreakdown, RewardCalculator, RewardConfig, RewardStats};
pub use run_log::{CompletionReason, DecisionRecord, EpisodeRecord, RunLogger, RunRecord};
pub use scoreboard::{Scoreboard, ScoreboardEntry};
pub use train::{TrainConfig, TrainSummary, Trainer, TrainingContext, train};
