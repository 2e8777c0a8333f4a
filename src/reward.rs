use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::env::{GameState, LocationId, count_event_flags, ram};
use crate::exploration::ExplorationMap;

// =============================================================================
// Reward Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub badge_weight: f64,
    pub event_weight: f64,
    /// Level sums at or above this grow at a reduced rate.
    pub level_threshold: u32,
    pub level_scale: f64,
    pub new_tile_reward: f64,
    pub new_location_reward: f64,
    pub opponent_weight: f64,
    pub heal_weight: f64,
    pub death_penalty: f64,
    pub stuck_penalty: f64,
    pub stuck_threshold: u32,
    pub loop_penalty: f64,
    pub loop_window: usize,
    pub loop_max_distinct: usize,
    /// Steps at the start of an episode with stuck/loop penalties zeroed.
    pub grace_steps: u64,
    /// (byte offset into the event region, bit) pairs left out of the count.
    pub excluded_event_bits: Vec<(usize, u8)>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            badge_weight: 10.0,
            event_weight: 4.0,
            level_threshold: 22,
            level_scale: 4.0,
            new_tile_reward: 0.1,
            new_location_reward: 5.0,
            opponent_weight: 0.2,
            heal_weight: 4.0,
            death_penalty: -0.1,
            stuck_penalty: -0.05,
            stuck_threshold: 600,
            loop_penalty: -1.0,
            loop_window: 10,
            loop_max_distinct: 3,
            grace_steps: 50,
            excluded_event_bits: vec![(
                (ram::MUSEUM_TICKET - ram::EVENT_FLAGS_START) as usize,
                0,
            )],
        }
    }
}

// =============================================================================
// Reward Breakdown
// =============================================================================

/// One step's reward, already weighted. `total()` is the plain sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RewardBreakdown {
    pub badge: f64,
    pub event: f64,
    pub level: f64,
    pub exploration: f64,
    pub opponent: f64,
    pub healing: f64,
    pub death: f64,
    pub stuck: f64,
    #[serde(rename = "loop")]
    pub loop_penalty: f64,
}

impl RewardBreakdown {
    pub fn total(&self) -> f64 {
        self.badge
            + self.event
            + self.level
            + self.exploration
            + self.opponent
            + self.healing
            + self.death
            + self.stuck
            + self.loop_penalty
    }
}

impl Serialize for RewardBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RewardBreakdown", 10)?;
        s.serialize_field("badge", &self.badge)?;
        s.serialize_field("event", &self.event)?;
        s.serialize_field("level", &self.level)?;
        s.serialize_field("exploration", &self.exploration)?;
        s.serialize_field("opponent", &self.opponent)?;
        s.serialize_field("healing", &self.healing)?;
        s.serialize_field("death", &self.death)?;
        s.serialize_field("stuck", &self.stuck)?;
        s.serialize_field("loop", &self.loop_penalty)?;
        s.serialize_field("total", &self.total())?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardStats {
    pub max_event_flags: u32,
    pub max_opponent_level: u8,
    pub explored_tiles: usize,
    pub unique_coords: usize,
    pub deaths: u32,
    pub episode_steps: u64,
}

// =============================================================================
// Reward Calculator
// =============================================================================

type Coord = (u8, u8, LocationId);

pub struct RewardCalculator {
    pub config: RewardConfig,
    map: ExplorationMap,
    step_count: u64,
    coord_visits: HashMap<Coord, u32>,
    recent_positions: VecDeque<Coord>,
    visited_locations: HashSet<LocationId>,
    max_event_flags: Option<u32>,
    max_opponent_level: u8,
    last_hp_fraction: Option<f64>,
    deaths: u32,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self::with_map(config, ExplorationMap::new())
    }

    pub fn with_map(config: RewardConfig, map: ExplorationMap) -> Self {
        let window = config.loop_window;
        Self {
            config,
            map,
            step_count: 0,
            coord_visits: HashMap::new(),
            recent_positions: VecDeque::with_capacity(window),
            visited_locations: HashSet::new(),
            max_event_flags: None,
            max_opponent_level: 0,
            last_hp_fraction: None,
            deaths: 0,
        }
    }

    pub fn exploration_map(&self) -> &ExplorationMap {
        &self.map
    }

    pub fn exploration_map_mut(&mut self) -> &mut ExplorationMap {
        &mut self.map
    }

    /// Event flags set in `state`, minus the configured exclusions.
    pub fn event_count(&self, state: &GameState) -> u32 {
        let excluded = self
            .config
            .excluded_event_bits
            .iter()
            .filter(|(byte, bit)| state.event_flag(*byte, *bit))
            .count() as u32;
        count_event_flags(state).saturating_sub(excluded)
    }

    /// Concave level transform: linear below the threshold, slower above.
    pub fn scaled_level(&self, level_sum: u32) -> f64 {
        let t = self.config.level_threshold;
        if level_sum < t {
            level_sum as f64
        } else {
            (level_sum - t) as f64 / self.config.level_scale + t as f64
        }
    }

    pub fn in_grace_period(&self) -> bool {
        self.step_count < self.config.grace_steps
    }

    pub fn calculate_reward(
        &mut self,
        prev: &GameState,
        curr: &GameState,
        _elapsed: f64,
    ) -> RewardBreakdown {
        let in_grace = self.in_grace_period();
        self.step_count += 1;

        let mut r = RewardBreakdown {
            badge: self.badge_reward(prev, curr),
            event: self.event_reward(prev, curr),
            level: self.level_reward(prev, curr),
            exploration: self.exploration_reward(curr),
            opponent: self.opponent_reward(curr),
            ..Default::default()
        };
        (r.healing, r.death) = self.health_reward(prev, curr);

        let coord = (curr.x, curr.y, curr.location);
        let visits = self.coord_visits.entry(coord).or_insert(0);
        *visits += 1;
        let stuck = *visits > self.config.stuck_threshold;

        if self.recent_positions.len() == self.config.loop_window {
            self.recent_positions.pop_front();
        }
        self.recent_positions.push_back(coord);
        let looping = self.recent_positions.len() == self.config.loop_window
            && self.recent_positions.iter().collect::<HashSet<_>>().len()
                <= self.config.loop_max_distinct;

        if !in_grace {
            if stuck {
                r.stuck = self.config.stuck_penalty;
            }
            if looping {
                r.loop_penalty = self.config.loop_penalty;
            }
        }
        r
    }

    fn badge_reward(&self, prev: &GameState, curr: &GameState) -> f64 {
        let gained = curr.badge_count().saturating_sub(prev.badge_count());
        self.config.badge_weight * gained as f64
    }

    fn event_reward(&mut self, prev: &GameState, curr: &GameState) -> f64 {
        let best = match self.max_event_flags {
            Some(m) => m,
            None => self.event_count(prev),
        };
        let count = self.event_count(curr);
        self.max_event_flags = Some(best.max(count));
        self.config.event_weight * count.saturating_sub(best) as f64
    }

    fn level_reward(&self, prev: &GameState, curr: &GameState) -> f64 {
        let delta = self.scaled_level(curr.level_sum()) - self.scaled_level(prev.level_sum());
        delta.max(0.0)
    }

    fn exploration_reward(&mut self, curr: &GameState) -> f64 {
        let mut reward = 0.0;
        if self.map.update(curr.x, curr.y, curr.location) {
            reward += self.config.new_tile_reward;
        }
        if self.visited_locations.insert(curr.location) {
            reward += self.config.new_location_reward;
        }
        reward
    }

    fn opponent_reward(&mut self, curr: &GameState) -> f64 {
        if !curr.in_battle() {
            return 0.0;
        }
        let Some(&top) = curr.opponent_levels.iter().max() else {
            return 0.0;
        };
        let gained = top.saturating_sub(self.max_opponent_level);
        self.max_opponent_level = self.max_opponent_level.max(top);
        self.config.opponent_weight * gained as f64
    }

    /// Returns (healing, death).
    fn health_reward(&mut self, prev: &GameState, curr: &GameState) -> (f64, f64) {
        let before = self.last_hp_fraction.unwrap_or_else(|| prev.hp_fraction());
        let now = curr.hp_fraction();
        self.last_hp_fraction = Some(now);

        if now == 0.0 && before > 0.0 && !curr.party.is_empty() {
            self.deaths += 1;
            return (0.0, self.config.death_penalty);
        }
        if !curr.same_party_as(prev) {
            return (0.0, 0.0);
        }
        (self.config.heal_weight * (now - before).max(0.0), 0.0)
    }

    /// Clears episode-scoped counters. Visited map cells are kept.
    pub fn reset(&mut self) {
        self.step_count = 0;
        self.coord_visits.clear();
        self.recent_positions.clear();
        self.visited_locations.clear();
        self.max_event_flags = None;
        self.max_opponent_level = 0;
        self.last_hp_fraction = None;
        self.deaths = 0;
        self.map.reset_episode();
    }

    pub fn get_stats(&self) -> RewardStats {
        RewardStats {
            max_event_flags: self.max_event_flags.unwrap_or(0),
            max_opponent_level: self.max_opponent_level,
            explored_tiles: self.map.get_explored_count(),
            unique_coords: self.coord_visits.len(),
            deaths: self.deaths,
            episode_steps: self.step_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{BattleType, PartyMember};

    fn mon(species: u8, level: u8, hp: u16, max_hp: u16) -> PartyMember {
        PartyMember {
            species,
            level,
            hp,
            max_hp,
        }
    }

    fn state(x: u8, y: u8) -> GameState {
        GameState {
            x,
            y,
            party: vec![mon(0xB0, 5, 20, 20)],
            event_flags: vec![0; 0x137],
            ..Default::default()
        }
    }

    fn with_levels(levels: &[u8]) -> GameState {
        let mut s = state(0, 0);
        s.party = levels.iter().map(|&l| mon(1, l, 10, 10)).collect();
        s
    }

    fn assert_total_is_sum(r: &RewardBreakdown) {
        let sum = r.badge
            + r.event
            + r.level
            + r.exploration
            + r.opponent
            + r.healing
            + r.death
            + r.stuck
            + r.loop_penalty;
        assert_eq!(r.total(), sum);
    }

    #[test]
    fn level_reward_uses_transformed_delta() {
        let calc = RewardCalculator::new(RewardConfig::default());
        assert_eq!(
            calc.level_reward(&with_levels(&[10]), &with_levels(&[15])),
            5.0
        );
        assert_eq!(
            calc.level_reward(&with_levels(&[20]), &with_levels(&[26])),
            3.0
        );
        assert_eq!(
            calc.level_reward(&with_levels(&[15]), &with_levels(&[10])),
            0.0
        );
    }

    #[test]
    fn badge_reward_never_negative() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let mut prev = state(0, 0);
        prev.badges = 0b11;
        let mut curr = state(0, 0);
        curr.badges = 0b01;
        assert_eq!(calc.calculate_reward(&prev, &curr, 0.0).badge, 0.0);
        let r = calc.calculate_reward(&curr, &prev, 0.0);
        assert_eq!(r.badge, 10.0);
        assert_total_is_sum(&r);
    }

    #[test]
    fn event_reward_ignores_flicker_and_excluded_bits() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let base = state(0, 0);
        let mut one = state(0, 0);
        one.event_flags[0] = 0b0010_0000;
        assert_eq!(count_event_flags(&one), 1);

        assert_eq!(calc.calculate_reward(&base, &one, 0.0).event, 4.0);
        assert_eq!(calc.calculate_reward(&one, &base, 0.0).event, 0.0);
        assert_eq!(calc.calculate_reward(&base, &one, 0.0).event, 0.0);

        let mut ticket = one.clone();
        ticket.event_flags[0x0D] = 0b1;
        assert_eq!(calc.calculate_reward(&one, &ticket, 0.0).event, 0.0);
    }

    #[test]
    fn exploration_pays_new_tiles_and_new_locations() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let a = state(1, 1);
        let r = calc.calculate_reward(&a, &a, 0.0);
        assert!((r.exploration - 5.1).abs() < 1e-9);
        let b = state(2, 1);
        assert!((calc.calculate_reward(&a, &b, 0.0).exploration - 0.1).abs() < 1e-9);
        assert_eq!(calc.calculate_reward(&b, &a, 0.0).exploration, 0.0);

        calc.reset();
        // The map remembers the tile; only the location bonus comes back.
        assert_eq!(calc.calculate_reward(&a, &a, 0.0).exploration, 5.0);
        assert_eq!(calc.get_stats().explored_tiles, 2);
    }

    #[test]
    fn opponent_reward_only_in_battle() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let prev = state(0, 0);
        let mut curr = state(0, 0);
        curr.opponent_levels = vec![5, 8];
        assert_eq!(calc.calculate_reward(&prev, &curr, 0.0).opponent, 0.0);
        curr.battle_type = BattleType::Wild;
        let r = calc.calculate_reward(&prev, &curr, 0.0);
        assert!((r.opponent - 1.6).abs() < 1e-9);
        assert_eq!(calc.calculate_reward(&prev, &curr, 0.0).opponent, 0.0);
    }

    #[test]
    fn healing_needs_unchanged_party() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let mut hurt = state(0, 0);
        hurt.party = vec![mon(1, 5, 5, 10)];
        let mut healed = state(0, 0);
        healed.party = vec![mon(1, 5, 10, 10)];
        assert_eq!(calc.calculate_reward(&hurt, &healed, 0.0).healing, 2.0);

        let mut caught = healed.clone();
        caught.party.push(mon(2, 3, 10, 10));
        let mut calc = RewardCalculator::new(RewardConfig::default());
        assert_eq!(calc.calculate_reward(&hurt, &caught, 0.0).healing, 0.0);
    }

    #[test]
    fn blackout_counts_a_death() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let alive = state(0, 0);
        let mut fainted = state(0, 0);
        fainted.party[0].hp = 0;
        let r = calc.calculate_reward(&alive, &fainted, 0.0);
        assert_eq!(r.death, -0.1);
        assert_eq!(r.healing, 0.0);
        assert_eq!(calc.get_stats().deaths, 1);
        assert_total_is_sum(&r);
    }

    #[test]
    fn stuck_penalty_waits_for_threshold_and_grace() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let s = state(3, 3);
        for step in 0..700u32 {
            let r = calc.calculate_reward(&s, &s, 0.0);
            if step < 600 {
                assert_eq!(r.stuck, 0.0, "step {step}");
            } else {
                assert_eq!(r.stuck, -0.05, "step {step}");
            }
        }
    }

    #[test]
    fn grace_period_hides_penalties() {
        let config = RewardConfig {
            stuck_threshold: 0,
            ..Default::default()
        };
        let mut calc = RewardCalculator::new(config);
        let s = state(3, 3);
        for _ in 0..50 {
            let r = calc.calculate_reward(&s, &s, 0.0);
            assert_eq!(r.stuck, 0.0);
            assert_eq!(r.loop_penalty, 0.0);
        }
        let r = calc.calculate_reward(&s, &s, 0.0);
        assert_eq!(r.stuck, -0.05);
        assert_eq!(r.loop_penalty, -1.0);
        assert_total_is_sum(&r);
    }

    #[test]
    fn loop_penalty_needs_full_window() {
        let config = RewardConfig {
            grace_steps: 0,
            ..Default::default()
        };
        let mut calc = RewardCalculator::new(config);
        let spots = [state(0, 0), state(1, 0), state(2, 0)];
        for i in 0..9 {
            let s = &spots[i % 3];
            assert_eq!(calc.calculate_reward(s, s, 0.0).loop_penalty, 0.0);
        }
        assert_eq!(
            calc.calculate_reward(&spots[0], &spots[0], 0.0).loop_penalty,
            -1.0
        );

        let mut calc = RewardCalculator::new(RewardConfig {
            grace_steps: 0,
            ..Default::default()
        });
        for x in 0..10 {
            let s = state(x, 0);
            assert_eq!(calc.calculate_reward(&s, &s, 0.0).loop_penalty, 0.0);
        }
    }

    #[test]
    fn breakdown_serializes_total() {
        let r = RewardBreakdown {
            badge: 10.0,
            loop_penalty: -1.0,
            ..Default::default()
        };
        let v = serde_json::to_value(r).unwrap();
        assert_eq!(v["total"], 9.0);
        assert_eq!(v["loop"], -1.0);
        let back: RewardBreakdown = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
