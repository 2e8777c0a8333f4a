use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::env::{GameState, ram};
use crate::error::CoreError;

pub type MilestonePredicate = Arc<dyn Fn(&GameState) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum MilestoneTrigger {
    /// Bit index into the badge mask.
    Badge(u8),
    /// Bit within the event-flag region, as (byte offset, bit).
    EventFlag { byte: usize, bit: u8 },
    Custom(MilestonePredicate),
}

impl MilestoneTrigger {
    pub fn is_met(&self, state: &GameState) -> bool {
        match self {
            MilestoneTrigger::Badge(bit) => (state.badges >> bit) & 1 == 1,
            MilestoneTrigger::EventFlag { byte, bit } => state.event_flag(*byte, *bit),
            MilestoneTrigger::Custom(pred) => pred(state),
        }
    }
}

impl fmt::Debug for MilestoneTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilestoneTrigger::Badge(bit) => f.debug_tuple("Badge").field(bit).finish(),
            MilestoneTrigger::EventFlag { byte, bit } => f
                .debug_struct("EventFlag")
                .field("byte", byte)
                .field("bit", bit)
                .finish(),
            MilestoneTrigger::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Milestone {
    pub name: String,
    pub trigger: MilestoneTrigger,
}

impl Milestone {
    pub fn new(name: impl Into<String>, trigger: MilestoneTrigger) -> Self {
        Self {
            name: name.into(),
            trigger,
        }
    }
}

pub const BADGE_NAMES: [&str; 8] = [
    "Boulder Badge",
    "Cascade Badge",
    "Thunder Badge",
    "Rainbow Badge",
    "Soul Badge",
    "Marsh Badge",
    "Volcano Badge",
    "Earth Badge",
];

/// The eight badges in order, then the champion.
pub fn default_milestones() -> Vec<Milestone> {
    let mut list: Vec<Milestone> = BADGE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| Milestone::new(*name, MilestoneTrigger::Badge(i as u8)))
        .collect();
    list.push(Milestone::new(
        "Champion",
        MilestoneTrigger::EventFlag {
            byte: (ram::CHAMPION_DEFEATED - ram::EVENT_FLAGS_START) as usize,
            bit: ram::CHAMPION_DEFEATED_BIT,
        },
    ));
    list
}

/// A split: the instant a milestone was first observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneEvent {
    pub name: String,
    pub index: usize,
    pub step: u64,
    pub elapsed_seconds: f64,
    pub play_time_seconds: f64,
    pub cumulative_reward: f64,
}

/// Forward-only progress over an ordered milestone list.
pub struct MilestoneTracker {
    milestones: Vec<Milestone>,
    reached: usize,
    last_step: Option<u64>,
}

impl MilestoneTracker {
    pub fn new(milestones: Vec<Milestone>) -> Result<Self, CoreError> {
        if milestones.is_empty() {
            return Err(CoreError::InvalidMilestoneSequence(
                "milestone list is empty".into(),
            ));
        }
        let mut names = HashSet::new();
        for m in &milestones {
            if !names.insert(m.name.as_str()) {
                return Err(CoreError::InvalidMilestoneSequence(format!(
                    "duplicate milestone {:?}",
                    m.name
                )));
            }
        }
        let mut last_badge: Option<u8> = None;
        for m in &milestones {
            if let MilestoneTrigger::Badge(bit) = m.trigger {
                if bit >= 8 {
                    return Err(CoreError::InvalidMilestoneSequence(format!(
                        "{:?} uses badge bit {bit}",
                        m.name
                    )));
                }
                if last_badge.is_some_and(|prev| bit <= prev) {
                    return Err(CoreError::InvalidMilestoneSequence(format!(
                        "{:?} is out of badge order",
                        m.name
                    )));
                }
                last_badge = Some(bit);
            }
        }
        Ok(Self {
            milestones,
            reached: 0,
            last_step: None,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            milestones: default_milestones(),
            reached: 0,
            last_step: None,
        }
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn reached_count(&self) -> usize {
        self.reached
    }

    pub fn next_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.reached)
    }

    pub fn is_terminal(&self) -> bool {
        self.reached == self.milestones.len()
    }

    /// Check the next milestone only. At most one event per call, and never
    /// twice for the same step.
    pub fn observe(
        &mut self,
        state: &GameState,
        step: u64,
        elapsed_seconds: f64,
        cumulative_reward: f64,
    ) -> Option<MilestoneEvent> {
        if self.last_step.is_some_and(|last| step <= last) {
            return None;
        }
        let index = self.reached;
        let milestone = self.milestones.get(index)?;
        if !milestone.trigger.is_met(state) {
            return None;
        }
        self.reached += 1;
        self.last_step = Some(step);
        info!(
            milestone = %milestone.name,
            index,
            step,
            elapsed_seconds,
            "milestone reached"
        );
        Some(MilestoneEvent {
            name: milestone.name.clone(),
            index,
            step,
            elapsed_seconds,
            play_time_seconds: state.play_time_seconds,
            cumulative_reward,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn badges(mask: u8) -> GameState {
        GameState {
            badges: mask,
            event_flags: vec![0; 0x137],
            ..Default::default()
        }
    }

    #[test]
    fn second_badge_emits_one_event() {
        let mut t = MilestoneTracker::with_defaults();
        let first = t.observe(&badges(0b01), 10, 1.0, 5.0).unwrap();
        assert_eq!(first.index, 0);
        assert!(t.observe(&badges(0b01), 11, 1.1, 5.0).is_none());

        let second = t.observe(&badges(0b11), 40, 4.0, 20.0).unwrap();
        assert_eq!(second.name, "Cascade Badge");
        assert_eq!(second.step, 40);
        assert_eq!(second.cumulative_reward, 20.0);
        assert!(t.observe(&badges(0b11), 41, 4.1, 20.0).is_none());
        assert_eq!(t.reached_count(), 2);
    }

    #[test]
    fn out_of_order_bits_wait_for_sequence() {
        let mut t = MilestoneTracker::with_defaults();
        assert!(t.observe(&badges(0b10), 1, 0.0, 0.0).is_none());
        assert_eq!(t.reached_count(), 0);
        assert_eq!(t.observe(&badges(0b11), 2, 0.0, 0.0).unwrap().index, 0);
        assert_eq!(t.observe(&badges(0b11), 3, 0.0, 0.0).unwrap().index, 1);
    }

    #[test]
    fn same_step_never_emits_twice() {
        let mut t = MilestoneTracker::with_defaults();
        assert!(t.observe(&badges(0b11), 5, 0.0, 0.0).is_some());
        assert!(t.observe(&badges(0b11), 5, 0.0, 0.0).is_none());
        assert!(t.observe(&badges(0b11), 6, 0.0, 0.0).is_some());
    }

    #[test]
    fn reaches_terminal_after_champion() {
        let mut t = MilestoneTracker::with_defaults();
        let mut s = badges(0xFF);
        for step in 1..=8 {
            assert!(t.observe(&s, step, 0.0, 0.0).is_some());
        }
        assert!(!t.is_terminal());
        assert!(t.observe(&s, 9, 0.0, 0.0).is_none());
        s.event_flags[0x11C] = 0b10;
        assert_eq!(t.observe(&s, 10, 0.0, 0.0).unwrap().name, "Champion");
        assert!(t.is_terminal());
        assert!(t.observe(&s, 11, 0.0, 0.0).is_none());
    }

    #[test]
    fn custom_predicate_is_used() {
        let list = vec![Milestone::new(
            "Rich",
            MilestoneTrigger::Custom(Arc::new(|s: &GameState| s.money >= 1000)),
        )];
        let mut t = MilestoneTracker::new(list).unwrap();
        let mut s = badges(0);
        assert!(t.observe(&s, 1, 0.0, 0.0).is_none());
        s.money = 1500;
        assert!(t.observe(&s, 2, 0.0, 0.0).is_some());
    }

    #[test]
    fn rejects_bad_sequences() {
        assert!(matches!(
            MilestoneTracker::new(Vec::new()),
            Err(CoreError::InvalidMilestoneSequence(_))
        ));
        let unordered = vec![
            Milestone::new("b", MilestoneTrigger::Badge(1)),
            Milestone::new("a", MilestoneTrigger::Badge(0)),
        ];
        assert!(MilestoneTracker::new(unordered).is_err());
        let dup = vec![
            Milestone::new("a", MilestoneTrigger::Badge(0)),
            Milestone::new("a", MilestoneTrigger::Badge(1)),
        ];
        assert!(MilestoneTracker::new(dup).is_err());
        assert!(MilestoneTracker::new(default_milestones()).is_ok());
    }
}
