use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::env::{GameState, location_name};
use crate::persist::atomic_write_json;
use crate::run_log::timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartySummary {
    pub species: u8,
    pub level: u8,
    pub hp: u16,
    pub max_hp: u16,
}

/// Lossy view of the current snapshot for the external dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardState {
    pub edition: String,
    pub location: String,
    pub map_id: u8,
    pub x: u8,
    pub y: u8,
    pub badges: u32,
    pub badge_mask: u8,
    pub play_time_seconds: f64,
    pub party: Vec<PartySummary>,
    pub money: u32,
    pub step: u64,
    pub cumulative_reward: f64,
    pub updated_at: String,
}

impl DashboardState {
    pub fn project(state: &GameState, step: u64, cumulative_reward: f64) -> Self {
        Self {
            edition: state.edition.to_string(),
            location: location_name(state.location),
            map_id: state.location,
            x: state.x,
            y: state.y,
            badges: state.badge_count(),
            badge_mask: state.badges,
            play_time_seconds: state.play_time_seconds,
            party: state
                .party
                .iter()
                .map(|p| PartySummary {
                    species: p.species,
                    level: p.level,
                    hp: p.hp,
                    max_hp: p.max_hp,
                })
                .collect(),
            money: state.money,
            step,
            cumulative_reward,
            updated_at: timestamp(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}
