use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::env::{Action, GameState, LocationId};
use crate::error::CoreError;
use crate::persist::atomic_write_json;

// =============================================================================
// Hyperparameters
// =============================================================================

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_end: f64,
    pub epsilon_decay_steps: u64,
    /// Tiles per quantized position cell along each axis.
    pub position_bucket: u8,
    /// Fixed seed for reproducible runs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.95,
            epsilon_start: 0.2,
            epsilon_end: 0.02,
            epsilon_decay_steps: 200_000,
            position_bucket: 4,
            seed: None,
        }
    }
}

/// Linear epsilon schedule, flat at `epsilon_end` after the decay window.
pub fn linear_epsilon(config: &AgentConfig, step: u64) -> f64 {
    if config.epsilon_decay_steps == 0 {
        return config.epsilon_end;
    }
    let progress = step as f64 / config.epsilon_decay_steps as f64;
    config.epsilon_start + (config.epsilon_end - config.epsilon_start) * progress.min(1.0)
}

// =============================================================================
// State Key
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub location: LocationId,
    pub qx: u8,
    pub qy: u8,
    pub badges: u8,
}

impl StateKey {
    pub fn from_state(state: &GameState, bucket: u8) -> Self {
        let bucket = bucket.max(1);
        Self {
            location: state.location,
            qx: state.x / bucket,
            qy: state.y / bucket,
            badges: state.badges,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.location, self.qx, self.qy, self.badges)
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [location, qx, qy, badges] = parts.as_slice() else {
            return Err(format!("state key {s:?} does not have four fields"));
        };
        let field = |v: &str| {
            v.parse::<u8>()
                .map_err(|e| format!("state key {s:?}: field {v:?}: {e}"))
        };
        Ok(Self {
            location: field(*location)?,
            qx: field(*qx)?,
            qy: field(*qy)?,
            badges: field(*badges)?,
        })
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[derive(Serialize, Deserialize)]
struct StoredTable {
    q_table: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    total_updates: u64,
    alpha: f64,
    gamma: f64,
    epsilon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgentStats {
    pub states_seen: usize,
    pub total_updates: u64,
    /// Action values with a nonzero estimate.
    pub table_size: usize,
    pub epsilon: f64,
}

// =============================================================================
// Tabular Agent
// =============================================================================

pub type ActionValues = [f64; Action::COUNT];

pub struct QAgent {
    table: HashMap<StateKey, ActionValues>,
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub total_updates: u64,
    position_bucket: u8,
    rng: SmallRng,
}

impl QAgent {
    pub fn new(config: &AgentConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            table: HashMap::new(),
            alpha: config.alpha,
            gamma: config.gamma,
            epsilon: config.epsilon_start,
            total_updates: 0,
            position_bucket: config.position_bucket,
            rng,
        }
    }

    pub fn state_key(&self, state: &GameState) -> StateKey {
        StateKey::from_state(state, self.position_bucket)
    }

    pub fn q_value(&self, key: &StateKey, action: Action) -> f64 {
        self.table
            .get(key)
            .map_or(0.0, |values| values[action.index()])
    }

    pub fn q_values(&self, key: &StateKey) -> ActionValues {
        self.table.get(key).copied().unwrap_or([0.0; Action::COUNT])
    }

    /// Highest-valued action; ties go to the earliest action in enum order.
    pub fn greedy_action(&self, key: &StateKey) -> Action {
        let values = self.q_values(key);
        let mut best = 0;
        for i in 1..Action::COUNT {
            if values[i] > values[best] {
                best = i;
            }
        }
        Action::from_index(best)
    }

    /// Epsilon-greedy choice. The flag is true when the action was random.
    pub fn select_action(&mut self, key: &StateKey) -> (Action, bool) {
        if self.rng.random::<f64>() < self.epsilon {
            let i = self.rng.random_range(0..Action::COUNT);
            (Action::from_index(i), true)
        } else {
            (self.greedy_action(key), false)
        }
    }

    fn max_q(&self, key: &StateKey) -> f64 {
        self.q_values(key)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn update(&mut self, key: StateKey, action: Action, reward: f64, next: &StateKey) {
        let target = reward + self.gamma * self.max_q(next);
        self.apply(key, action, target);
    }

    /// Update toward the reward alone, for the last step of an episode.
    pub fn update_terminal(&mut self, key: StateKey, action: Action, reward: f64) {
        self.apply(key, action, reward);
    }

    fn apply(&mut self, key: StateKey, action: Action, target: f64) {
        let alpha = self.alpha;
        let slot = &mut self.table.entry(key).or_insert([0.0; Action::COUNT])[action.index()];
        *slot += alpha * (target - *slot);
        self.total_updates += 1;
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            states_seen: self.table.len(),
            total_updates: self.total_updates,
            table_size: self
                .table
                .values()
                .flat_map(|v| v.iter())
                .filter(|q| **q != 0.0)
                .count(),
            epsilon: self.epsilon,
        }
    }

    pub fn table(&self) -> &HashMap<StateKey, ActionValues> {
        &self.table
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let q_table = self
            .table
            .iter()
            .map(|(key, values)| {
                let actions = Action::ALL
                    .iter()
                    .map(|a| (a.name().to_string(), values[a.index()]))
                    .collect();
                (key.to_string(), actions)
            })
            .collect();
        let stored = StoredTable {
            q_table,
            total_updates: self.total_updates,
            alpha: self.alpha,
            gamma: self.gamma,
            epsilon: self.epsilon,
        };
        atomic_write_json(path, &stored).context("Failed to save Q-table")?;
        debug!(path = %path.display(), states = self.table.len(), "saved Q-table");
        Ok(())
    }

    /// Replace this agent's table with the stored one. Hyperparameters stay
    /// as configured; only the learned values and update count are restored.
    pub fn try_load(&mut self, path: &Path) -> Result<(), CoreError> {
        let corrupt = |reason: String| CoreError::CorruptPersistedState {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        let stored: StoredTable = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;

        let mut table = HashMap::with_capacity(stored.q_table.len());
        for (raw_key, actions) in stored.q_table {
            let key: StateKey = raw_key.parse().map_err(corrupt)?;
            let mut values = [0.0; Action::COUNT];
            for (name, value) in actions {
                let action = Action::from_name(&name)
                    .ok_or_else(|| corrupt(format!("unknown action {name:?}")))?;
                values[action.index()] = value;
            }
            table.insert(key, values);
        }
        self.table = table;
        self.total_updates = stored.total_updates;
        Ok(())
    }

    /// Missing or corrupt stores leave the agent with an empty table.
    /// Replace the table with the stored one. A missing or corrupt file
    /// leaves an empty table.
    pub fn load(&mut self, path: &Path) {
        if !path.exists() {
            debug!(path = %path.display(), "no Q-table on disk, starting empty");
            self.table.clear();
            self.total_updates = 0;
            return;
        }
        match self.try_load(path) {
            Ok(()) => info!(
                path = %path.display(),
                states = self.table.len(),
                updates = self.total_updates,
                "loaded Q-table"
            ),
            Err(e) => {
                warn!(error = %e, "discarding Q-table");
                self.table.clear();
                self.total_updates = 0;
            }
        }
    }
}
