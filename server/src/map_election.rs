//! Map election.
//!
//! Every pick mode runs on the same engine. `Agree` waits until both sides wish
//! for the same map. All other modes are a queue of [`Step`]s worked off in
//! alternating turns:
//!
//! - `bo1`: ban until one map is left, then that map is drawn
//! - `bo1random`: ban until two (even pool) or three (odd pool) maps are left, then draw one
//! - `bestof`: an explicit sequence such as `ban ban pick pick ban ban random`
//!
//! Whoever acts first may act; after that the turn alternates. `random` steps
//! are resolved by the tracker itself as soon as they reach the front of the
//! queue and do not hand over the turn. The election is resolved once as many
//! maps are selected as the sequence has pick and random steps.
//!
//! The election never talks to the game server. Every operation returns
//! [`ElectionEvent`]s for the owning session to carry out.

use crate::config::ConfigError;
use crate::sides::Side;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ban,
    Pick,
    Random,
}

impl Step {
    fn parse(token: &str) -> Option<Step> {
        match token.to_ascii_lowercase().as_str() {
            "ban" | "veto" => Some(Step::Ban),
            "pick" => Some(Step::Pick),
            "random" => Some(Step::Random),
            _ => None,
        }
    }

    /// Chat command that performs this step.
    pub fn verb(self) -> &'static str {
        match self {
            Step::Ban => "veto",
            Step::Pick => "pick",
            Step::Random => "random",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickMode {
    DefaultMap,
    Agree,
    Bo1,
    Bo1Random,
    BestOf(Vec<Step>),
}

impl PickMode {
    pub fn parse(pickmode: &str, sequence: Option<&str>) -> Result<PickMode, ConfigError> {
        let mode = pickmode.trim().to_ascii_lowercase();
        if let Some(inline) = mode.strip_prefix("bestof:") {
            return Ok(PickMode::BestOf(parse_sequence(inline)?));
        }

        match mode.as_str() {
            "default" | "default_map" | "none" => Ok(PickMode::DefaultMap),
            "agree" => Ok(PickMode::Agree),
            "bo1" => match sequence {
                Some(sequence) => Ok(PickMode::BestOf(parse_sequence(sequence)?)),
                None => Ok(PickMode::Bo1),
            },
            "bo1random" => Ok(PickMode::Bo1Random),
            "bestof" => {
                let sequence = sequence.ok_or_else(|| ConfigError::MissingSequence(mode.clone()))?;
                Ok(PickMode::BestOf(parse_sequence(sequence)?))
            }
            _ => Err(ConfigError::InvalidPickMode(pickmode.to_string())),
        }
    }
}

fn parse_sequence(sequence: &str) -> Result<Vec<Step>, ConfigError> {
    let steps = sequence
        .split(|c: char| c.is_whitespace() || c == ',' || c == '-')
        .filter(|token| !token.is_empty())
        .map(|token| {
            Step::parse(token)
                .ok_or_else(|| ConfigError::MalformedSequence(format!("unknown step {}", token)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !steps.iter().any(|step| *step != Step::Ban) {
        return Err(ConfigError::MalformedSequence(
            "sequence selects no map".to_string(),
        ));
    }
    Ok(steps)
}

/// Names the teams behind the sides, for chat and log output.
pub trait TeamLabels {
    fn team_name(&self, side: Side) -> String;

    fn team_print(&self, side: Side) -> String {
        format!("{} ({})", self.team_name(side), side)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    Say(String),
    Log(String),
    /// A map was chosen; emitted once per map in selection order
    Selected(String),
    /// All maps are chosen; always the last event of its batch
    Resolved,
}

#[derive(Debug)]
pub struct MapElection {
    mode: PickMode,
    pool: Vec<String>,
    wishes: [Option<String>; 2],
    steps: VecDeque<Step>,
    required: usize,
    has_pick: bool,
    next_side: Option<Side>,
    selected: Vec<String>,
    random_threshold: usize,
    rng: StdRng,
}

impl MapElection {
    pub fn new(mode: PickMode, pool: &[String], default_map: &str) -> Result<Self, ConfigError> {
        Self::with_rng(mode, pool, default_map, StdRng::from_entropy())
    }

    pub fn with_rng(
        mode: PickMode,
        pool: &[String],
        default_map: &str,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        let mut maps: Vec<String> = Vec::with_capacity(pool.len());
        for map in pool.iter().map(|map| map.trim()).filter(|map| !map.is_empty()) {
            if !maps.iter().any(|known| known == map) {
                maps.push(map.to_string());
            }
        }

        let mut election = Self {
            mode: mode.clone(),
            pool: maps,
            wishes: [None, None],
            steps: VecDeque::new(),
            required: 1,
            has_pick: false,
            next_side: None,
            selected: Vec::new(),
            random_threshold: 1,
            rng,
        };

        if mode == PickMode::DefaultMap {
            election.selected.push(default_map.to_string());
            return Ok(election);
        }
        if election.pool.is_empty() {
            return Err(ConfigError::EmptyMapPool);
        }

        let maps = election.pool.len();
        let steps = match mode {
            PickMode::DefaultMap | PickMode::Agree => Vec::new(),
            PickMode::Bo1 => ban_then_draw(maps, 1),
            PickMode::Bo1Random => {
                election.random_threshold = if maps % 2 == 0 { 2 } else { 3 };
                ban_then_draw(maps, election.random_threshold)
            }
            PickMode::BestOf(steps) => {
                if steps.len() > maps {
                    return Err(ConfigError::SequenceTooLong {
                        steps: steps.len(),
                        maps,
                    });
                }
                steps
            }
        };

        if !steps.is_empty() {
            election.required = steps.iter().filter(|step| **step != Step::Ban).count();
            election.has_pick = steps.contains(&Step::Pick);
        }
        election.steps = steps.into();
        Ok(election)
    }

    /// Draws leading random steps. Call once after construction.
    pub fn start(&mut self) -> Vec<ElectionEvent> {
        let mut events = Vec::new();
        if self.mode == PickMode::DefaultMap {
            return events;
        }
        self.draw_randoms(&mut events);
        if self.is_resolved() {
            events.push(ElectionEvent::Resolved);
        }
        events
    }

    /// `!map`, `!vote` and `!pick`. An empty map revokes a wish in agree mode.
    pub fn wish(&mut self, side: Side, map: &str, labels: &dyn TeamLabels) -> Vec<ElectionEvent> {
        match self.mode {
            PickMode::DefaultMap => Vec::new(),
            PickMode::Agree => self.agree(side, map, labels),
            _ => self.act(side, Step::Pick, map, labels),
        }
    }

    /// `!veto` and `!ban`.
    pub fn veto(&mut self, side: Side, map: &str, labels: &dyn TeamLabels) -> Vec<ElectionEvent> {
        match self.mode {
            PickMode::DefaultMap | PickMode::Agree => Vec::new(),
            _ => self.act(side, Step::Ban, map, labels),
        }
    }

    fn agree(&mut self, side: Side, map: &str, labels: &dyn TeamLabels) -> Vec<ElectionEvent> {
        let mut events = Vec::new();
        if self.is_resolved() {
            return events;
        }

        let slot = side_index(side);
        if map.is_empty() && self.wishes[slot].is_some() {
            self.wishes[slot] = None;
            events.push(ElectionEvent::Log(format!(
                "{} revokes map wish",
                labels.team_print(side)
            )));
            events.push(ElectionEvent::Say(format!(
                "{} REVOKES MAP WISH!",
                labels.team_print(side)
            )));
            return events;
        }

        if !self.in_pool(map) {
            self.wishes[slot] = None;
            events.push(ElectionEvent::Say(
                "ONLY THE FOLLOWING MAPS ARE IN THE MAP POOL:".to_string(),
            ));
            events.push(ElectionEvent::Say(self.pool.join(", ")));
            return events;
        }

        if self.wishes[slot].as_deref() != Some(map) {
            events.push(ElectionEvent::Log(format!(
                "{} wants map {}",
                labels.team_print(side),
                map
            )));
        }
        self.wishes[slot] = Some(map.to_string());

        if self.wishes[0] == self.wishes[1] {
            self.wishes = [None, None];
            self.selected.push(map.to_string());
            events.push(ElectionEvent::Selected(map.to_string()));
            events.push(ElectionEvent::Resolved);
        } else {
            events.extend(self.announce(labels));
        }
        events
    }

    fn act(
        &mut self,
        side: Side,
        requested: Step,
        map: &str,
        labels: &dyn TeamLabels,
    ) -> Vec<ElectionEvent> {
        let mut events = Vec::new();
        if self.is_resolved() {
            return events;
        }
        let Some(&step) = self.steps.front() else {
            return events;
        };

        if let Some(next) = self.next_side {
            if next != side {
                events.push(ElectionEvent::Say(format!(
                    "{} MUST !{} A MAP FIRST!",
                    labels.team_name(next),
                    step.verb()
                )));
                events.extend(self.remaining_maps(step));
                return events;
            }
        }

        if step != requested {
            events.push(ElectionEvent::Say(format!(
                "NEXT STEP IS !{}, NOT !{}",
                step.verb(),
                requested.verb()
            )));
            events.extend(self.remaining_maps(step));
            return events;
        }

        let Some(position) = self.pool.iter().position(|known| known == map) else {
            events.push(ElectionEvent::Say(format!(
                "ONLY THE FOLLOWING MAPS CAN BE !{}:",
                step.verb()
            )));
            events.push(ElectionEvent::Say(self.pool.join(", ")));
            return events;
        };

        let map = self.pool.remove(position);
        self.steps.pop_front();
        self.next_side = Some(side.other());

        match step {
            Step::Ban => {
                events.push(ElectionEvent::Log(format!(
                    "{} vetoes {}",
                    labels.team_print(side),
                    map
                )));
                events.push(ElectionEvent::Say(format!(
                    "{} VETOED {}",
                    labels.team_name(side),
                    map
                )));
            }
            Step::Pick | Step::Random => {
                events.push(ElectionEvent::Log(format!(
                    "{} picks {}",
                    labels.team_print(side),
                    map
                )));
                events.push(ElectionEvent::Say(format!(
                    "{} PICKED {}",
                    labels.team_name(side),
                    map
                )));
                self.selected.push(map.clone());
                events.push(ElectionEvent::Selected(map));
            }
        }

        self.draw_randoms(&mut events);
        if self.is_resolved() {
            events.push(ElectionEvent::Resolved);
        } else {
            events.extend(self.next_turn(labels));
        }
        events
    }

    fn draw_randoms(&mut self, events: &mut Vec<ElectionEvent>) {
        while !self.is_resolved() && self.steps.front() == Some(&Step::Random) {
            self.steps.pop_front();
            if self.pool.is_empty() {
                break;
            }
            if self.pool.len() == 1 {
                let map = self.pool.remove(0);
                events.push(ElectionEvent::Log(format!("last map {}", map)));
                events.push(ElectionEvent::Say(format!("{} IS THE LAST MAP LEFT", map)));
                self.selected.push(map.clone());
                events.push(ElectionEvent::Selected(map));
                continue;
            }
            let index = self.rng.gen_range(0..self.pool.len());
            let map = self.pool.remove(index);
            events.push(ElectionEvent::Log(format!("random map {}", map)));
            events.push(ElectionEvent::Say(format!("RANDOM MAP: {}", map)));
            self.selected.push(map.clone());
            events.push(ElectionEvent::Selected(map));
        }
    }

    /// Status lines repeated while the election is running.
    pub fn announce(&self, labels: &dyn TeamLabels) -> Vec<ElectionEvent> {
        let mut events = Vec::new();
        match &self.mode {
            PickMode::DefaultMap => return events,
            PickMode::Agree => {
                events.push(ElectionEvent::Say(
                    "WAITING FOR BOTH TEAMS TO AGREE ON A !map".to_string(),
                ));
                for side in Side::BOTH {
                    if let Some(wish) = &self.wishes[side_index(side)] {
                        events.push(ElectionEvent::Say(format!(
                            "{} WANTS MAP {}",
                            labels.team_print(side),
                            wish
                        )));
                        events.push(ElectionEvent::Say(format!("AGREE WITH !map {}", wish)));
                    }
                }
                if self.wishes.iter().all(Option::is_none) {
                    events.push(ElectionEvent::Say(self.pool.join(", ")));
                }
                return events;
            }
            PickMode::Bo1 => events.push(ElectionEvent::Say(
                "!veto MAPS. THE LAST REMAINING MAP WILL BE PLAYED.".to_string(),
            )),
            PickMode::Bo1Random => events.push(ElectionEvent::Say(format!(
                "!veto MAPS. FROM THE LAST {} MAPS A RANDOM ONE WILL BE PLAYED.",
                self.random_threshold
            ))),
            PickMode::BestOf(_) => {
                let remaining: Vec<&str> = self.steps.iter().map(|step| step.verb()).collect();
                events.push(ElectionEvent::Say(format!(
                    "MAP SEQUENCE: {}",
                    remaining.join(" ")
                )));
            }
        }
        events.extend(self.next_turn(labels));
        events
    }

    fn next_turn(&self, labels: &dyn TeamLabels) -> Vec<ElectionEvent> {
        let Some(&step) = self.steps.front() else {
            return Vec::new();
        };
        let mut events = self.remaining_maps(step);
        if let Some(side) = self.next_side {
            events.push(ElectionEvent::Say(format!(
                "{} MUST !{} NOW!",
                labels.team_print(side),
                step.verb()
            )));
        }
        events
    }

    fn remaining_maps(&self, step: Step) -> Vec<ElectionEvent> {
        vec![
            ElectionEvent::Say(format!("REMAINING MAPS FOR !{}:", step.verb())),
            ElectionEvent::Say(self.pool.join(", ")),
        ]
    }

    /// Chat commands the election accepts in its current mode.
    pub fn available_commands(&self) -> &'static [&'static str] {
        match self.mode {
            PickMode::DefaultMap => &[],
            PickMode::Agree => &["map", "vote", "pick"],
            PickMode::Bo1 | PickMode::Bo1Random => &["veto", "ban"],
            PickMode::BestOf(_) if self.has_pick => &["veto", "ban", "pick"],
            PickMode::BestOf(_) => &["veto", "ban"],
        }
    }

    fn in_pool(&self, map: &str) -> bool {
        self.pool.iter().any(|known| known == map)
    }

    pub fn is_resolved(&self) -> bool {
        self.selected.len() >= self.required
    }

    pub fn mode(&self) -> &PickMode {
        &self.mode
    }

    /// Maps still available to the election.
    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub fn selected_maps(&self) -> &[String] {
        &self.selected
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn next_step(&self) -> Option<Step> {
        self.steps.front().copied()
    }

    pub fn next_side(&self) -> Option<Side> {
        self.next_side
    }

    pub fn wish_of(&self, side: Side) -> Option<&str> {
        self.wishes[side_index(side)].as_deref()
    }
}

fn ban_then_draw(maps: usize, keep: usize) -> Vec<Step> {
    let mut steps = vec![Step::Ban; maps.saturating_sub(keep)];
    steps.push(Step::Random);
    steps
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Ct => 0,
        Side::T => 1,
    }
}
