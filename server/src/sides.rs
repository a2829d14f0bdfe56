//! Sides of the game and the two teams of a match.
//!
//! The game knows CT and T; the match request knows team1 and team2. Which team
//! plays which side changes at halftime and when the knife winner switches, so
//! per-team bookkeeping is keyed by [`TeamSlot`] and translated through a
//! [`SideMap`] whenever a side shows up in a log line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Ct,
    T,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Ct, Side::T];

    pub fn other(self) -> Side {
        match self {
            Side::Ct => Side::T,
            Side::T => Side::Ct,
        }
    }

    /// Team names as the game writes them into log lines.
    pub fn from_log_team(team: &str) -> Option<Side> {
        match team {
            "CT" => Some(Side::Ct),
            "TERRORIST" => Some(Side::T),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ct => f.write_str("CT"),
            Side::T => f.write_str("T"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamSlot {
    One,
    Two,
}

impl TeamSlot {
    fn index(self) -> usize {
        match self {
            TeamSlot::One => 0,
            TeamSlot::Two => 1,
        }
    }
}

/// Which team currently plays on which side. Team one starts as CT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideMap {
    switched: bool,
}

impl SideMap {
    pub fn slot(&self, side: Side) -> TeamSlot {
        match (side, self.switched) {
            (Side::Ct, false) | (Side::T, true) => TeamSlot::One,
            _ => TeamSlot::Two,
        }
    }

    pub fn side(&self, slot: TeamSlot) -> Side {
        match (slot, self.switched) {
            (TeamSlot::One, false) | (TeamSlot::Two, true) => Side::Ct,
            _ => Side::T,
        }
    }

    pub fn switch(&mut self) {
        self.switched = !self.switched;
    }

    pub fn is_switched(&self) -> bool {
        self.switched
    }
}

/// One value per team slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerTeam<V>([V; 2]);

impl<V> PerTeam<V> {
    pub fn new(one: V, two: V) -> Self {
        Self([one, two])
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0.iter()
    }
}

impl<V> Index<TeamSlot> for PerTeam<V> {
    type Output = V;

    fn index(&self, slot: TeamSlot) -> &V {
        &self.0[slot.index()]
    }
}

impl<V> IndexMut<TeamSlot> for PerTeam<V> {
    fn index_mut(&mut self, slot: TeamSlot) -> &mut V {
        &mut self.0[slot.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_map_switch() {
        let mut sides = SideMap::default();
        assert_eq!(sides.slot(Side::Ct), TeamSlot::One);
        assert_eq!(sides.side(TeamSlot::Two), Side::T);

        sides.switch();
        assert!(sides.is_switched());
        assert_eq!(sides.slot(Side::Ct), TeamSlot::Two);
        assert_eq!(sides.side(TeamSlot::One), Side::T);

        sides.switch();
        assert_eq!(sides, SideMap::default());
    }

    #[test]
    fn test_slot_and_side_are_inverse() {
        let mut sides = SideMap::default();
        for _ in 0..2 {
            for side in Side::BOTH {
                assert_eq!(sides.side(sides.slot(side)), side);
            }
            sides.switch();
        }
    }

    #[test]
    fn test_log_team_names() {
        assert_eq!(Side::from_log_team("CT"), Some(Side::Ct));
        assert_eq!(Side::from_log_team("TERRORIST"), Some(Side::T));
        assert_eq!(Side::from_log_team("Unassigned"), None);
        assert_eq!(Side::T.other().to_string(), "CT");
    }

    #[test]
    fn test_per_team_indexing() {
        let mut score = PerTeam::new(0u32, 0u32);
        score[TeamSlot::Two] = 7;
        assert_eq!(score[TeamSlot::One], 0);
        assert_eq!(score[TeamSlot::Two], 7);
        assert_eq!(score.values().sum::<u32>(), 7);
    }
}
