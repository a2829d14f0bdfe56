//! Per-match state machine.
//!
//! A [`MatchSession`] owns the console connection to one game server and the map
//! election of one match. It reads that server's log lines, reacts to chat
//! commands and round ends, and walks the match through
//! `MAP_ELECTION → MAP_CHANGE → WARMUP → KNIFE → AFTER_KNIFE → MATCH ⇄ PAUSE → END`.
//!
//! Scores, readiness and the knife winner are kept per team slot. The game only
//! ever names sides, so every side is translated through the current
//! [`SideMap`], which flips at halftime and when the knife winner switches.

use crate::config::{ConfigError, TrackerConfig, Timings};
use crate::events::{self, ChatMessage, LogEvent};
use crate::map_election::{ElectionEvent, MapElection, PickMode, TeamLabels};
use crate::rcon::Rcon;
use crate::report::{Report, ReportKind, ReportSink, Scoreline};
use crate::scheduler::DeferredScheduler;
use crate::sides::{PerTeam, Side, SideMap, TeamSlot};
use crate::tracker::{Deferred, SessionKey};
use crate::utils::{parse_digits, sanitize_console_text};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::control::{MatchConfig, MatchStatus, MatchStatusEntry, TeamStatus};

pub const DEFAULT_MAX_ROUNDS: u32 = 30;
pub const DEFAULT_OT_MAX_ROUNDS: u32 = 6;

const ANYTIME_COMMANDS: &[&str] = &["help", "fullhelp"];
const ALL_COMMANDS: &[&str] = &[
    "help", "fullhelp", "ready", "rdy", "unready", "map", "vote", "pick", "veto", "ban", "stay",
    "switch", "swap", "pause",
];

fn state_commands(status: MatchStatus) -> &'static [&'static str] {
    match status {
        MatchStatus::Warmup | MatchStatus::Pause => &["ready", "rdy", "unready"],
        MatchStatus::AfterKnife => &["stay", "switch", "swap"],
        MatchStatus::Match => &["pause"],
        MatchStatus::MapElection
        | MatchStatus::MapChange
        | MatchStatus::Knife
        | MatchStatus::End => &[],
    }
}

/// Round limits for halftime and match end detection.
///
/// The thresholds are computed in floating point and truncated, the way the
/// game's own tournament configs have always been evaluated. With an odd
/// `ot_max_rounds` the overtime halftime lands on the truncated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRules {
    pub max_rounds: u32,
    pub ot_max_rounds: u32,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            ot_max_rounds: DEFAULT_OT_MAX_ROUNDS,
        }
    }
}

impl RoundRules {
    pub fn new(max_rounds: u32, ot_max_rounds: u32) -> Result<Self, ConfigError> {
        if max_rounds == 0 || ot_max_rounds == 0 {
            return Err(ConfigError::InvalidRounds {
                max_rounds,
                ot_max_rounds,
            });
        }
        Ok(Self {
            max_rounds,
            ot_max_rounds,
        })
    }

    /// 0 in regulation, then 1 for the first overtime and so on.
    pub fn overtime_number(&self, rounds_played: u32) -> u32 {
        let over = (rounds_played as f64 - self.max_rounds as f64) / self.ot_max_rounds as f64;
        over.ceil().max(0.0) as u32
    }

    pub fn is_halftime(&self, rounds_played: u32) -> bool {
        let played = rounds_played as f64;
        let overtime = self.overtime_number(rounds_played).max(1) as f64;
        let overtime_halftime =
            self.max_rounds as f64 + (overtime - 0.5) * self.ot_max_rounds as f64;
        played == self.max_rounds as f64 / 2.0 || rounds_played == overtime_halftime as u32
    }

    pub fn score_to_win(&self, rounds_played: u32) -> u32 {
        let overtime = self.overtime_number(rounds_played) as f64;
        (self.max_rounds as f64 / 2.0 + overtime * self.ot_max_rounds as f64 / 2.0 + 1.0) as u32
    }

    pub fn is_match_end(&self, ct_score: u32, t_score: u32) -> bool {
        let needed = self.score_to_win(ct_score.saturating_add(t_score));
        ct_score == needed || t_score == needed
    }
}

/// What happens to the game server once the match is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEndAction {
    Kick,
    Quit,
    Nothing,
    Unsupported(String),
}

impl MatchEndAction {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "kick" => MatchEndAction::Kick,
            "quit" => MatchEndAction::Quit,
            "none" | "" => MatchEndAction::Nothing,
            _ => MatchEndAction::Unsupported(value.to_string()),
        }
    }
}

/// Deferred work a session schedules for itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAction {
    Announce { lines: Vec<String> },
    ChangeLevel { map: String },
    RunEndCommands,
    EndAction(MatchEndAction),
}

/// What a session may touch besides itself while handling an event.
pub struct Context<'a> {
    pub now: u64,
    pub scheduler: &'a mut DeferredScheduler<Deferred>,
    pub reports: &'a dyn ReportSink,
}

/// A validated match request; nothing has been sent to the game server yet.
#[derive(Debug)]
pub struct MatchPlan {
    config: MatchConfig,
    election: MapElection,
    rules: RoundRules,
    end_action: MatchEndAction,
}

impl MatchPlan {
    pub fn new(config: MatchConfig) -> Result<Self, ConfigError> {
        let mode = PickMode::parse(&config.pickmode, config.sequence.as_deref())?;
        let election = MapElection::new(mode, &config.map_pool, &config.default_map)?;
        Self::with_election(config, election)
    }

    pub fn with_election(config: MatchConfig, election: MapElection) -> Result<Self, ConfigError> {
        let rules = RoundRules::new(
            config.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            config.ot_max_rounds.unwrap_or(DEFAULT_OT_MAX_ROUNDS),
        )?;
        let end_action = MatchEndAction::parse(&config.match_end);
        Ok(Self {
            config,
            election,
            rules,
            end_action,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }
}

#[derive(Debug)]
struct Teams {
    ids: PerTeam<u64>,
    names: PerTeam<String>,
    sides: SideMap,
}

impl TeamLabels for Teams {
    fn team_name(&self, side: Side) -> String {
        self.names[self.sides.slot(side)].clone()
    }
}

pub struct MatchSession {
    key: SessionKey,
    config: MatchConfig,
    rcon: Box<dyn Rcon>,
    election: MapElection,
    rules: RoundRules,
    end_action: MatchEndAction,
    status: MatchStatus,
    teams: Teams,
    score: PerTeam<u32>,
    ready: PerTeam<bool>,
    knife_winner: Option<TeamSlot>,
    map: String,
    timings: Timings,
    chat_prefix: String,
    log_target: String,
    last_announcement: u64,
    last_contact: u64,
}

impl MatchSession {
    /// Prepares the game server and opens the match.
    pub fn start(
        key: SessionKey,
        plan: MatchPlan,
        rcon: Box<dyn Rcon>,
        tracker: &TrackerConfig,
        ctx: &mut Context,
    ) -> Self {
        let MatchPlan {
            config,
            election,
            rules,
            end_action,
        } = plan;

        let teams = Teams {
            ids: PerTeam::new(config.team1.id, config.team2.id),
            names: PerTeam::new(
                sanitize_console_text(&config.team1.name),
                sanitize_console_text(&config.team2.name),
            ),
            sides: SideMap::default(),
        };
        let status = if election.is_resolved() {
            MatchStatus::Warmup
        } else {
            MatchStatus::MapElection
        };

        let mut session = Self {
            key,
            map: config.default_map.clone(),
            config,
            rcon,
            election,
            rules,
            end_action,
            status,
            teams,
            score: PerTeam::default(),
            ready: PerTeam::default(),
            knife_winner: None,
            timings: tracker.timings.clone(),
            chat_prefix: tracker.chat_prefix.clone(),
            log_target: tracker.log_target.clone(),
            last_announcement: 0,
            last_contact: ctx.now,
        };

        session.log(&format!(
            "created on {} with pick mode {}",
            session.config.address(),
            session.config.pickmode
        ));
        session.prepare_server();

        if session.status == MatchStatus::MapElection {
            let events = session.election.start();
            session.apply_election(events, ctx);
        }
        session
    }

    fn prepare_server(&mut self) {
        self.rcon("mp_logdetail 0");
        self.rcon("sv_logecho 0");
        self.rcon("sv_logfile 0");
        self.rcon(&format!("logaddress_add {}", self.log_target));
        self.rcon("log on");
        self.rcon(&format!(
            "mp_teamname_1 \"{}\"",
            self.teams.team_name(Side::Ct)
        ));
        self.rcon(&format!("mp_teamname_2 \"{}\"", self.teams.team_name(Side::T)));
        for command in self.config.rcon_init.clone() {
            self.rcon(&command);
        }
        self.rcon(&format!("changelevel {}", self.config.default_map));
    }

    /// Feeds the log datagrams received from this session's server since the last tick.
    pub fn consume(&mut self, datagrams: &[Vec<u8>], ctx: &mut Context) {
        if !datagrams.is_empty() {
            self.last_contact = ctx.now;
        }
        for datagram in datagrams {
            match events::decode(datagram) {
                Some(LogEvent::RoundEnd {
                    ct_score, t_score, ..
                }) => self.on_round_end(ct_score, t_score, ctx),
                Some(LogEvent::Chat(message)) => self.on_chat(&message, ctx),
                None => {}
            }
        }
    }

    /// Repeats the status announcement once the interval has passed.
    pub fn announce_if_due(&mut self, ctx: &mut Context) {
        if ctx.now >= self.last_announcement + self.timings.periodic_message_interval {
            self.announce(ctx);
        }
    }

    fn announce(&mut self, ctx: &mut Context) {
        self.last_announcement = ctx.now;
        self.rcon("mp_warmup_pausetimer 1");

        match self.status {
            MatchStatus::MapElection => {
                let events = self.election.announce(&self.teams);
                self.apply_election(events, ctx);
            }
            MatchStatus::Warmup | MatchStatus::Pause => {
                self.say("WAITING FOR BOTH TEAMS TO !ready");
                let ready_side = Side::BOTH
                    .into_iter()
                    .find(|side| self.ready[self.teams.sides.slot(*side)]);
                if let Some(side) = ready_side {
                    self.say(&format!("{} IS READY", self.teams.team_print(side)));
                    self.say("USE !unready TO UNREADY");
                }
            }
            MatchStatus::Knife => {
                for _ in 0..3 {
                    self.say("KNIFE FOR SIDE!");
                }
            }
            MatchStatus::AfterKnife => {
                if let Some(winner) = self.knife_winner {
                    let side = self.teams.sides.side(winner);
                    self.say(&format!("{} WON THE KNIFE ROUND!", self.teams.team_print(side)));
                    self.say("USE !stay OR !switch TO START THE MATCH!");
                }
            }
            MatchStatus::End => {
                self.say("MATCH FINISHED!");
                self.say(&format!(
                    "{} {} : {} {}",
                    self.teams.names[TeamSlot::One],
                    self.score[TeamSlot::One],
                    self.score[TeamSlot::Two],
                    self.teams.names[TeamSlot::Two]
                ));
            }
            MatchStatus::MapChange | MatchStatus::Match => {}
        }
    }

    fn on_chat(&mut self, message: &ChatMessage, ctx: &mut Context) {
        if !message.is_console() {
            self.log(&format!(
                "SAY | {}<{}><{}>: {}",
                message.name, message.team, message.steam_id, message.text
            ));
        }

        let Some(body) = message.text.strip_prefix(|c: char| c == '!' || c == '.') else {
            return;
        };
        let mut words = body.split(' ');
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let argument = words.next().unwrap_or_default();

        if !self.allowed_commands().contains(&command.as_str()) {
            self.command_help();
            return;
        }

        match command.as_str() {
            "help" => self.command_help(),
            "fullhelp" => self.command_fullhelp(),
            _ => {
                let Some(side) = message.side() else {
                    debug!("MATCH {} | ignoring !{} from outside the teams", self.config.match_id, command);
                    return;
                };
                match command.as_str() {
                    "ready" | "rdy" => self.command_ready(side, ctx),
                    "unready" => self.command_unready(side),
                    "pause" => self.command_pause(side),
                    "stay" => self.command_stay(side, ctx),
                    "switch" | "swap" => self.command_switch(side, ctx),
                    "map" | "vote" | "pick" => {
                        let events = self.election.wish(side, argument, &self.teams);
                        self.apply_election(events, ctx);
                    }
                    "veto" | "ban" => {
                        let events = self.election.veto(side, argument, &self.teams);
                        self.apply_election(events, ctx);
                    }
                    _ => self.say("THIS COMMAND IS NOT IMPLEMENTED YET!"),
                }
            }
        }
    }

    /// Commands accepted in the current status.
    pub fn allowed_commands(&self) -> Vec<&'static str> {
        let mut commands = ANYTIME_COMMANDS.to_vec();
        if self.status == MatchStatus::MapElection {
            commands.extend_from_slice(self.election.available_commands());
        } else {
            commands.extend_from_slice(state_commands(self.status));
        }
        commands
    }

    fn command_help(&mut self) {
        let commands: Vec<String> = self
            .allowed_commands()
            .iter()
            .map(|command| format!("!{}", command))
            .collect();
        self.say(&format!("COMMANDS: {}", commands.join(", ")));
        self.say("USE !fullhelp TO GET ALL COMMANDS!");
    }

    fn command_fullhelp(&mut self) {
        let commands: Vec<String> = ALL_COMMANDS
            .iter()
            .map(|command| format!("!{}", command))
            .collect();
        self.say(&format!("ALL COMMANDS: {}", commands.join(", ")));
    }

    fn command_ready(&mut self, side: Side, ctx: &mut Context) {
        let slot = self.teams.sides.slot(side);
        if self.ready[slot] {
            return;
        }
        self.ready[slot] = true;
        self.log(&format!("{} is ready", self.teams.team_print(side)));

        if self.ready.values().all(|ready| *ready) {
            self.ready = PerTeam::default();
            match self.status {
                MatchStatus::Warmup => self.start_knife_round(ctx),
                MatchStatus::Pause => self.unpause(),
                _ => {}
            }
        } else {
            self.announce(ctx);
        }
    }

    fn command_unready(&mut self, side: Side) {
        let slot = self.teams.sides.slot(side);
        if self.ready[slot] {
            self.ready[slot] = false;
            self.log(&format!("{} is not ready", self.teams.team_print(side)));
            self.say(&format!("{} IS NOT READY", self.teams.team_print(side)));
        }
    }

    fn command_pause(&mut self, side: Side) {
        self.status = MatchStatus::Pause;
        self.log(&format!("{} paused the match", self.teams.team_print(side)));
        self.say(&format!(
            "{} PAUSED THE MATCH, IT PAUSES AT THE NEXT FREEZE TIME",
            self.teams.team_print(side)
        ));
        self.say("TYPE !ready WHEN BOTH TEAMS ARE READY TO CONTINUE");
        self.rcon("mp_pause_match");
    }

    fn unpause(&mut self) {
        self.log("unpause match");
        self.status = MatchStatus::Match;
        for _ in 0..3 {
            self.say("MATCH IS LIVE AGAIN!");
        }
        self.rcon("mp_unpause_match");
    }

    fn start_knife_round(&mut self, ctx: &mut Context) {
        self.log("start knife round");
        self.status = MatchStatus::Knife;
        for command in self.config.rcon_config.clone() {
            self.rcon(&command);
        }
        self.rcon("mp_warmup_end");
        self.rcon("mp_restartgame 3");
        self.say("--------------------------------------");
        self.say("DO NOT FORGET TO RECORD!");
        self.announce(ctx);
    }

    fn command_stay(&mut self, side: Side, ctx: &mut Context) {
        if !self.is_knife_winner(side) {
            return;
        }
        self.log(&format!("{} wants to stay", self.teams.team_print(side)));
        self.say(&format!("{} WANTS TO STAY", self.teams.team_print(side)));
        self.start_match(ctx);
    }

    fn command_switch(&mut self, side: Side, ctx: &mut Context) {
        if !self.is_knife_winner(side) {
            return;
        }
        self.log(&format!("{} wants to switch sides", self.teams.team_print(side)));
        self.say(&format!("{} WANTS TO SWITCH SIDES", self.teams.team_print(side)));
        self.switch_sides();
        self.rcon("mp_swapteams");
        self.start_match(ctx);
    }

    fn is_knife_winner(&self, side: Side) -> bool {
        self.knife_winner == Some(self.teams.sides.slot(side))
    }

    fn start_match(&mut self, ctx: &mut Context) {
        self.log("start match");
        self.status = MatchStatus::Match;
        self.score = PerTeam::default();
        self.rcon("mp_unpause_match");
        for command in self.config.rcon_config.clone() {
            self.rcon(&command);
        }
        self.rcon("mp_restartgame 10");
        self.report(ReportKind::Start, ctx);

        self.say("THE MATCH IS LIVE AFTER THE NEXT RESTART!");
        self.say("GL & HF EVERYBODY");
        self.defer(
            ctx,
            self.timings.live_announcement_delay,
            SessionAction::Announce {
                lines: vec!["MATCH IS LIVE!".to_string(); 3],
            },
        );
    }

    fn on_round_end(&mut self, ct_score: u32, t_score: u32, ctx: &mut Context) {
        if self.status == MatchStatus::End {
            return;
        }
        self.log(&format!(
            "round ended with {} {} and {} {}",
            self.teams.team_print(Side::Ct),
            ct_score,
            self.teams.team_print(Side::T),
            t_score
        ));
        self.score[self.teams.sides.slot(Side::Ct)] = ct_score;
        self.score[self.teams.sides.slot(Side::T)] = t_score;

        match self.status {
            MatchStatus::Knife => self.end_knife_round(ct_score, ctx),
            MatchStatus::Match | MatchStatus::Pause => {
                self.report(ReportKind::Livescore(self.scoreline()), ctx);
                if self.rules.is_halftime(ct_score.saturating_add(t_score)) {
                    self.switch_sides();
                } else if self.rules.is_match_end(ct_score, t_score) {
                    self.end_match(ctx);
                }
            }
            _ => {}
        }
    }

    fn end_knife_round(&mut self, ct_score: u32, ctx: &mut Context) {
        let winner = if ct_score == 1 { Side::Ct } else { Side::T };
        self.knife_winner = Some(self.teams.sides.slot(winner));
        self.status = MatchStatus::AfterKnife;
        self.log(&format!("{} won the knife round", self.teams.team_print(winner)));
        self.rcon("mp_pause_match");
        self.announce(ctx);
    }

    fn switch_sides(&mut self) {
        self.log("switch sides");
        self.teams.sides.switch();
    }

    fn end_match(&mut self, ctx: &mut Context) {
        self.log("end match");
        self.status = MatchStatus::End;
        self.announce(ctx);
        self.report(ReportKind::End(self.scoreline()), ctx);

        let delay = self.timings.cleanup_delay;
        self.defer(ctx, delay, SessionAction::RunEndCommands);
        self.defer(ctx, delay, SessionAction::EndAction(self.end_action.clone()));
        ctx.scheduler
            .schedule(ctx.now, delay, Deferred::Release { key: self.key });
    }

    /// Team on CT first, as the tournament system expects.
    fn scoreline(&self) -> Scoreline {
        let ct = self.teams.sides.slot(Side::Ct);
        let t = self.teams.sides.slot(Side::T);
        Scoreline {
            team1id: self.teams.ids[ct],
            team1score: self.score[ct],
            team2id: self.teams.ids[t],
            team2score: self.score[t],
        }
    }

    fn apply_election(&mut self, events: Vec<ElectionEvent>, ctx: &mut Context) {
        for event in events {
            match event {
                ElectionEvent::Say(text) => self.say(&text),
                ElectionEvent::Log(text) => self.log(&text),
                ElectionEvent::Selected(map) => {
                    self.log(&format!("map {} selected", map));
                    self.report(ReportKind::Map { map }, ctx);
                }
                ElectionEvent::Resolved => self.begin_map_change(ctx),
            }
        }
    }

    fn begin_map_change(&mut self, ctx: &mut Context) {
        let Some(map) = self.election.selected_maps().first().cloned() else {
            return;
        };
        let delay = self.timings.map_change_delay;
        self.status = MatchStatus::MapChange;
        self.map = map.clone();
        self.log(&format!("change map to {} in {} seconds", map, delay));

        if self.election.selected_maps().len() > 1 {
            let maps = self.election.selected_maps().join(", ");
            self.say(&format!("MAPS TO BE PLAYED: {}", maps));
        }
        self.say(&format!("MAP {} WILL BE PLAYED", map));
        self.say(&format!("CHANGING MAP IN {} SECONDS", delay));

        for remaining in [5, 3, 2, 1] {
            if remaining < delay {
                self.defer(
                    ctx,
                    delay - remaining,
                    SessionAction::Announce {
                        lines: vec![format!("CHANGING MAP IN {}...", remaining)],
                    },
                );
            }
        }
        self.defer(ctx, delay, SessionAction::ChangeLevel { map });
    }

    /// Carries out an action this session scheduled earlier.
    pub fn run(&mut self, action: SessionAction, ctx: &mut Context) {
        match action {
            SessionAction::Announce { lines } => {
                for line in lines {
                    self.say(&line);
                }
            }
            SessionAction::ChangeLevel { map } => {
                if self.status != MatchStatus::MapChange {
                    return;
                }
                self.rcon(&format!("changelevel {}", map));
                self.status = MatchStatus::Warmup;
                self.announce(ctx);
            }
            SessionAction::RunEndCommands => {
                self.log("run end commands");
                for command in self.config.rcon_end.clone() {
                    self.rcon(&command);
                }
                self.stop_log_feed();
            }
            SessionAction::EndAction(action) => match action {
                MatchEndAction::Kick => self.kick_all(),
                MatchEndAction::Quit => {
                    self.log("quit game server");
                    self.rcon("quit");
                }
                MatchEndAction::Nothing => {}
                MatchEndAction::Unsupported(value) => {
                    warn!(
                        "MATCH {} | match end action {} is not supported",
                        self.config.match_id, value
                    );
                }
            },
        }
    }

    fn kick_all(&mut self) {
        let status = self.rcon("status");
        let kicks: String = parse_user_ids(&status)
            .into_iter()
            .map(|id| format!("kickid {};", id))
            .collect();
        if kicks.is_empty() {
            return;
        }
        self.log("kick all players");
        self.rcon(&kicks);
    }

    /// Stops the game server from sending logs here.
    pub fn abort(&mut self) {
        self.log("abort match");
        self.stop_log_feed();
    }

    fn stop_log_feed(&mut self) {
        self.rcon(&format!("logaddress_del {}", self.log_target));
    }

    pub fn close(&mut self) {
        self.rcon.disconnect();
    }

    fn defer(&self, ctx: &mut Context, delay: u64, action: SessionAction) {
        ctx.scheduler.schedule(
            ctx.now,
            delay,
            Deferred::Session {
                key: self.key,
                action,
            },
        );
    }

    fn report(&self, kind: ReportKind, ctx: &mut Context) {
        if self.config.url.is_empty() {
            return;
        }
        let report = Report::new(&self.config.url, self.config.match_id, kind);
        self.log(&format!("report {}", report.type_name()));
        ctx.reports.submit(report);
    }

    fn say(&mut self, message: &str) {
        let line = format!("say {} {}", self.chat_prefix, message.replace(';', ""));
        self.rcon(&line);
    }

    fn rcon(&mut self, command: &str) -> String {
        let verb = command.split_whitespace().next().unwrap_or_default();
        if verb != "say" && verb != "mp_warmup_pausetimer" {
            debug!("MATCH {} | rcon: {}", self.config.match_id, command);
        }
        self.rcon.execute(command)
    }

    fn log(&self, message: &str) {
        info!("MATCH {} | {}", self.config.match_id, message);
    }

    pub fn status_entry(&self, now: u64) -> MatchStatusEntry {
        let team = |slot: TeamSlot| TeamStatus {
            id: self.teams.ids[slot],
            name: self.teams.names[slot].clone(),
            score: self.score[slot],
        };
        MatchStatusEntry {
            id: self.config.match_id,
            status: self.status,
            map: self.map.clone(),
            lastcontact_timestamp: self.last_contact,
            lastcontact_seconds: now.saturating_sub(self.last_contact),
            team1: team(TeamSlot::One),
            team2: team(TeamSlot::Two),
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn match_id(&self) -> u64 {
        self.config.match_id
    }

    pub fn address(&self) -> String {
        self.config.address()
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn map(&self) -> &str {
        &self.map
    }

    pub fn score(&self, slot: TeamSlot) -> u32 {
        self.score[slot]
    }

    pub fn side_of(&self, slot: TeamSlot) -> Side {
        self.teams.sides.side(slot)
    }

    pub fn is_ready(&self, slot: TeamSlot) -> bool {
        self.ready[slot]
    }

    pub fn knife_winner(&self) -> Option<TeamSlot> {
        self.knife_winner
    }

    pub fn election(&self) -> &MapElection {
        &self.election
    }
}

// Lines of `status` output look like `#  2 1 "Name" STEAM_1:0:123 00:38 42 0 active ...`
fn parse_user_ids(status: &str) -> Vec<u32> {
    status
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('#')?;
            let mut words = rest.split_whitespace();
            let user_id = parse_digits(words.next()?)?;
            parse_digits(words.next()?)?;
            let (_, after_name) = rest.rsplit_once('"')?;
            let unique_id = after_name.split_whitespace().next()?;
            unique_id.starts_with("STEAM_").then_some(user_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_election::Step;
    use crate::test_harness::{CommandLog, RecordingRcon, RecordingReports};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::control::TeamInfo;

    struct Harness {
        session: MatchSession,
        scheduler: DeferredScheduler<Deferred>,
        reports: RecordingReports,
        commands: CommandLog,
        now: u64,
    }

    impl Harness {
        fn new(pickmode: &str, pool: &[&str]) -> Self {
            Self::with_config(config(pickmode, pool))
        }

        fn with_config(config: MatchConfig) -> Self {
            let mode = PickMode::parse(&config.pickmode, config.sequence.as_deref()).unwrap();
            let election = MapElection::with_rng(
                mode,
                &config.map_pool,
                &config.default_map,
                StdRng::seed_from_u64(1),
            )
            .unwrap();
            let plan = MatchPlan::with_election(config, election).unwrap();

            let rcon = RecordingRcon::new();
            let commands = rcon.log();
            let reports = RecordingReports::new();
            let mut scheduler = DeferredScheduler::new();
            let now = 1_000;
            let tracker = TrackerConfig {
                log_target: "10.0.0.1:9999".to_string(),
                ..TrackerConfig::default()
            };

            let session = {
                let mut ctx = Context {
                    now,
                    scheduler: &mut scheduler,
                    reports: &reports,
                };
                MatchSession::start(SessionKey(1), plan, Box::new(rcon), &tracker, &mut ctx)
            };

            Self {
                session,
                scheduler,
                reports,
                commands,
                now,
            }
        }

        fn feed(&mut self, payload: &str) {
            let mut datagram = b"\xFF\xFF\xFF\xFFRL 11/03/2015 - 11:51:27: ".to_vec();
            datagram.extend_from_slice(payload.as_bytes());
            datagram.extend_from_slice(b"\n\0");

            let mut ctx = Context {
                now: self.now,
                scheduler: &mut self.scheduler,
                reports: &self.reports,
            };
            self.session.consume(&[datagram], &mut ctx);
        }

        fn chat(&mut self, team: &str, text: &str) {
            self.feed(&format!(r#""Player<2><STEAM_1:0:1><{}>" say "{}""#, team, text));
        }

        fn round_end(&mut self, ct: u32, t: u32) {
            self.feed(&format!(
                r#"Team "CT" triggered "SFUI_Notice_CTs_Win" (CT "{}") (T "{}")"#,
                ct, t
            ));
        }

        fn advance(&mut self, seconds: u64) {
            self.now += seconds;
            for action in self.scheduler.tick(self.now) {
                if let Deferred::Session { action, .. } = action {
                    let mut ctx = Context {
                        now: self.now,
                        scheduler: &mut self.scheduler,
                        reports: &self.reports,
                    };
                    self.session.run(action, &mut ctx);
                }
            }
        }

        fn warmup_to_match(&mut self) {
            self.chat("CT", "!ready");
            self.chat("TERRORIST", "!ready");
            self.round_end(1, 0);
            self.chat("CT", "!stay");
        }
    }

    fn config(pickmode: &str, pool: &[&str]) -> MatchConfig {
        MatchConfig {
            token: "secret".to_string(),
            map_pool: pool.iter().map(|map| map.to_string()).collect(),
            default_map: "de_dust2".to_string(),
            match_id: 42,
            team1: TeamInfo {
                id: 1,
                name: "Alpha \"A\"".to_string(),
            },
            team2: TeamInfo {
                id: 2,
                name: "Bravo;".to_string(),
            },
            ip: "10.0.0.5".to_string(),
            port: 27015,
            rcon: "hunter2".to_string(),
            pickmode: pickmode.to_string(),
            url: "http://results.example/report".to_string(),
            match_end: "kick".to_string(),
            rcon_init: vec!["sv_cheats 0".to_string()],
            rcon_config: vec!["exec esl5on5".to_string()],
            rcon_end: vec!["exec end".to_string()],
            sequence: None,
            max_rounds: None,
            ot_max_rounds: None,
        }
    }

    #[test]
    fn test_server_setup_sequence() {
        let harness = Harness::new("default", &[]);

        assert_eq!(
            harness.commands.commands()[..9],
            [
                "mp_logdetail 0",
                "sv_logecho 0",
                "sv_logfile 0",
                "logaddress_add 10.0.0.1:9999",
                "log on",
                "mp_teamname_1 \"Alpha A\"",
                "mp_teamname_2 \"Bravo\"",
                "sv_cheats 0",
                "changelevel de_dust2",
            ]
        );
        assert_eq!(harness.session.status(), MatchStatus::Warmup);
    }

    #[test]
    fn test_bo1_election_changes_map_after_countdown() {
        let mut harness = Harness::new("bo1", &["de_dust2", "de_inferno", "de_mirage"]);
        assert_eq!(harness.session.status(), MatchStatus::MapElection);

        harness.chat("CT", "!veto de_dust2");
        harness.chat("TERRORIST", "!veto de_inferno");

        assert_eq!(harness.session.status(), MatchStatus::MapChange);
        assert_eq!(harness.session.map(), "de_mirage");
        assert_eq!(harness.reports.kinds(), vec!["map"]);
        assert!(!harness.commands.contains("changelevel de_mirage"));

        harness.advance(9);
        assert_eq!(harness.session.status(), MatchStatus::MapChange);
        assert!(harness.commands.said().contains(&"CHANGING MAP IN 1...".to_string()));

        harness.advance(1);
        assert!(harness.commands.contains("changelevel de_mirage"));
        assert_eq!(harness.session.status(), MatchStatus::Warmup);
    }

    #[test]
    fn test_disallowed_command_gets_help() {
        let mut harness = Harness::new("bo1", &["de_dust2", "de_inferno"]);
        harness.commands.clear();

        harness.chat("CT", "!ready");
        assert_eq!(
            harness.commands.said(),
            vec![
                "COMMANDS: !help, !fullhelp, !veto, !ban",
                "USE !fullhelp TO GET ALL COMMANDS!"
            ]
        );
        assert_eq!(harness.session.status(), MatchStatus::MapElection);
    }

    #[test]
    fn test_plain_chat_is_ignored() {
        let mut harness = Harness::new("default", &[]);
        harness.commands.clear();

        harness.chat("CT", "gl hf");
        assert!(harness.commands.commands().is_empty());
    }

    #[test]
    fn test_ready_is_idempotent_and_starts_knife_round() {
        let mut harness = Harness::new("default", &[]);

        harness.chat("CT", "!ready");
        let after_first = harness.commands.commands().len();
        harness.chat("CT", "!READY");
        assert_eq!(harness.commands.commands().len(), after_first);
        assert!(harness.session.is_ready(TeamSlot::One));

        harness.chat("TERRORIST", ".rdy");
        assert_eq!(harness.session.status(), MatchStatus::Knife);
        assert!(!harness.session.is_ready(TeamSlot::One));
        assert!(!harness.session.is_ready(TeamSlot::Two));
        assert!(harness.commands.contains("exec esl5on5"));
        assert!(harness.commands.contains("mp_warmup_end"));
        assert!(harness.commands.contains("mp_restartgame 3"));
    }

    #[test]
    fn test_unready() {
        let mut harness = Harness::new("default", &[]);
        harness.chat("CT", "!ready");
        harness.chat("CT", "!unready");
        harness.chat("TERRORIST", "!ready");

        assert_eq!(harness.session.status(), MatchStatus::Warmup);
        assert!(!harness.session.is_ready(TeamSlot::One));
        assert!(harness.session.is_ready(TeamSlot::Two));
    }

    #[test]
    fn test_knife_winner_switches_sides() {
        let mut harness = Harness::new("default", &[]);
        harness.chat("CT", "!ready");
        harness.chat("TERRORIST", "!ready");

        harness.round_end(0, 1);
        assert_eq!(harness.session.status(), MatchStatus::AfterKnife);
        assert_eq!(harness.session.knife_winner(), Some(TeamSlot::Two));
        assert!(harness.commands.contains("mp_pause_match"));

        harness.chat("CT", "!switch");
        assert_eq!(harness.session.status(), MatchStatus::AfterKnife);

        harness.chat("TERRORIST", "!swap");
        assert_eq!(harness.session.status(), MatchStatus::Match);
        assert_eq!(harness.session.side_of(TeamSlot::Two), Side::Ct);
        assert!(harness.commands.contains("mp_swapteams"));
        assert!(harness.commands.contains("mp_restartgame 10"));
        assert_eq!(harness.session.score(TeamSlot::Two), 0);
        assert_eq!(harness.reports.kinds(), vec!["start"]);

        harness.advance(11);
        assert_eq!(harness.commands.said().iter().filter(|l| *l == "MATCH IS LIVE!").count(), 3);
    }

    #[test]
    fn test_halftime_keeps_team_scores() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();

        harness.round_end(10, 5);
        assert_eq!(harness.session.side_of(TeamSlot::One), Side::T);
        assert_eq!(harness.session.score(TeamSlot::One), 10);

        // team one now plays T and wins a round
        harness.round_end(5, 11);
        assert_eq!(harness.session.score(TeamSlot::One), 11);
        assert_eq!(harness.session.score(TeamSlot::Two), 5);
        assert_eq!(harness.session.status(), MatchStatus::Match);
    }

    #[test]
    fn test_match_end_and_cleanup() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();
        harness.round_end(10, 5);
        harness.commands.clear();

        harness.round_end(6, 16);
        assert_eq!(harness.session.status(), MatchStatus::End);
        assert_eq!(
            harness.reports.kinds(),
            vec!["start", "livescore", "livescore", "end"]
        );
        let end = harness.reports.reports().pop().unwrap();
        assert_eq!(
            end.kind,
            ReportKind::End(Scoreline {
                team1id: 2,
                team1score: 6,
                team2id: 1,
                team2score: 16,
            })
        );
        assert!(harness.commands.said().contains(&"Alpha A 16 : 6 Bravo".to_string()));

        harness.advance(179);
        assert!(!harness.commands.contains("exec end"));
        harness.advance(1);
        assert!(harness.commands.contains("exec end"));
        assert!(harness.commands.contains("logaddress_del 10.0.0.1:9999"));
        assert!(harness.commands.contains("status"));

        harness.round_end(7, 16);
        assert_eq!(harness.session.score(TeamSlot::Two), 6);
        assert_eq!(harness.reports.kinds().last(), Some(&"end"));
        assert_eq!(harness.reports.kinds().len(), 4);
        assert!(harness.scheduler.is_empty());
    }

    #[test]
    fn test_overtime_end_triggers_once() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();
        harness.round_end(10, 5);
        assert_eq!(harness.session.side_of(TeamSlot::One), Side::T);

        // regulation ends 15:15, overtime halftime after round 33
        harness.round_end(10, 15);
        harness.round_end(15, 15);
        assert_eq!(harness.session.status(), MatchStatus::Match);
        harness.round_end(17, 16);
        assert_eq!(harness.session.side_of(TeamSlot::One), Side::Ct);
        assert_eq!(harness.session.status(), MatchStatus::Match);

        harness.round_end(18, 17);
        assert_eq!(harness.session.status(), MatchStatus::Match);
        harness.round_end(19, 17);
        assert_eq!(harness.session.status(), MatchStatus::End);
        assert_eq!(harness.session.score(TeamSlot::One), 19);
        assert_eq!(harness.session.score(TeamSlot::Two), 17);

        let ends = |harness: &Harness| harness.reports.kinds().iter().filter(|k| **k == "end").count();
        let scheduled = harness.scheduler.len();
        assert_eq!(ends(&harness), 1);

        harness.round_end(20, 17);
        assert_eq!(ends(&harness), 1);
        assert_eq!(harness.scheduler.len(), scheduled);
        assert_eq!(harness.session.score(TeamSlot::One), 19);

        harness.advance(180);
        assert_eq!(harness.commands.count("exec end"), 1);
        harness.advance(180);
        assert_eq!(harness.commands.count("exec end"), 1);
    }

    #[test]
    fn test_huge_round_scores_do_not_overflow() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();

        harness.round_end(u32::MAX, 1);
        assert_eq!(harness.session.status(), MatchStatus::Match);
        assert_eq!(harness.session.score(TeamSlot::One), u32::MAX);

        harness.round_end(u32::MAX, u32::MAX);
        assert_eq!(harness.session.status(), MatchStatus::Match);
        assert!(!RoundRules::default().is_match_end(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();

        harness.chat("TERRORIST", "!pause");
        assert_eq!(harness.session.status(), MatchStatus::Pause);
        assert_eq!(harness.commands.count("mp_pause_match"), 2);

        harness.chat("CT", "!ready");
        harness.chat("TERRORIST", "!ready");
        assert_eq!(harness.session.status(), MatchStatus::Match);
        assert!(harness.commands.said().contains(&"MATCH IS LIVE AGAIN!".to_string()));
        assert_eq!(harness.commands.count("mp_unpause_match"), 2);
    }

    #[test]
    fn test_periodic_announcement() {
        let mut harness = Harness::new("default", &[]);
        harness.commands.clear();

        let mut ctx = Context {
            now: harness.now,
            scheduler: &mut harness.scheduler,
            reports: &harness.reports,
        };
        harness.session.announce_if_due(&mut ctx);
        assert_eq!(harness.commands.commands()[0], "mp_warmup_pausetimer 1");
        assert_eq!(harness.commands.said(), vec!["WAITING FOR BOTH TEAMS TO !ready"]);

        harness.commands.clear();
        let mut ctx = Context {
            now: harness.now + 29,
            scheduler: &mut harness.scheduler,
            reports: &harness.reports,
        };
        harness.session.announce_if_due(&mut ctx);
        assert!(harness.commands.commands().is_empty());
    }

    #[test]
    fn test_kick_all_parses_status() {
        let mut harness = Harness::new("default", &[]);
        let status = "# userid name uniqueid connected ping loss state rate adr\n\
                      #  2 1 \"Player One\" STEAM_1:0:123 00:38 42 0 active 786432 1.2.3.4:27005\n\
                      #  3 2 \"BOT Joe\" BOT active 64\n\
                      # 14 3 \"x \"quoted\"\" STEAM_1:1:99 01:00 10 0 active 786432 5.6.7.8:27005\n";
        assert_eq!(parse_user_ids(status), vec![2, 14]);

        let mut ctx = Context {
            now: harness.now,
            scheduler: &mut harness.scheduler,
            reports: &harness.reports,
        };
        harness
            .session
            .run(SessionAction::EndAction(MatchEndAction::Quit), &mut ctx);
        assert!(harness.commands.contains("quit"));
    }

    #[test]
    fn test_status_entry() {
        let mut harness = Harness::new("default", &[]);
        harness.warmup_to_match();
        harness.round_end(3, 2);

        let entry = harness.session.status_entry(harness.now + 4);
        assert_eq!(entry.id, 42);
        assert_eq!(entry.status, MatchStatus::Match);
        assert_eq!(entry.map, "de_dust2");
        assert_eq!(entry.lastcontact_seconds, 4);
        assert_eq!(entry.team1.name, "Alpha A");
        assert_eq!(entry.team1.score, 3);
        assert_eq!(entry.team2.score, 2);
    }

    #[test]
    fn test_best_of_three_reports_each_map() {
        let mut config = config("bestof", &["a", "b", "c", "d", "e"]);
        config.sequence = Some("ban pick pick ban random".to_string());
        let mut harness = Harness::with_config(config);

        harness.chat("CT", "!ban a");
        harness.chat("TERRORIST", "!pick b");
        harness.chat("CT", "!pick c");
        harness.chat("TERRORIST", "!ban d");

        assert_eq!(harness.session.status(), MatchStatus::MapChange);
        assert_eq!(harness.session.map(), "b");
        assert_eq!(harness.reports.kinds(), vec!["map", "map", "map"]);
        assert_eq!(
            harness.session.election().selected_maps(),
            &["b".to_string(), "c".to_string(), "e".to_string()]
        );
        assert_eq!(harness.session.election().next_step(), None::<Step>);
    }

    #[test]
    fn test_empty_url_disables_reports() {
        let mut config = config("default", &[]);
        config.url = String::new();
        let mut harness = Harness::with_config(config);
        harness.warmup_to_match();

        assert!(harness.reports.reports().is_empty());
    }

    #[test]
    fn test_overtime_numbers() {
        let rules = RoundRules::new(30, 10).unwrap();
        for (rounds, expected) in [(30, 0), (31, 1), (40, 1), (41, 2), (50, 2), (51, 3)] {
            assert_eq!(rules.overtime_number(rounds), expected, "rounds {}", rounds);
        }

        let rules = RoundRules::default();
        for (rounds, expected) in [(0, 0), (30, 0), (31, 1), (36, 1), (37, 2), (43, 3)] {
            assert_eq!(rules.overtime_number(rounds), expected, "rounds {}", rounds);
        }
    }

    #[test]
    fn test_halftime_and_score_to_win() {
        let rules = RoundRules::default();
        assert!(rules.is_halftime(15));
        assert!(!rules.is_halftime(30));
        assert!(rules.is_halftime(33));
        assert!(rules.is_halftime(39));
        assert_eq!(rules.score_to_win(29), 16);
        assert_eq!(rules.score_to_win(31), 19);
        assert!(rules.is_match_end(16, 10));
        assert!(!rules.is_match_end(15, 15));
        assert!(rules.is_match_end(19, 17));
    }

    #[test]
    fn test_truncated_overtime_halftime() {
        let odd = RoundRules::new(30, 5).unwrap();
        assert!(odd.is_halftime(32));
        assert!(!odd.is_halftime(33));

        // A single overtime round truncates onto the last regulation round
        let single = RoundRules::new(30, 1).unwrap();
        assert!(single.is_halftime(30));
        assert!(!single.is_halftime(31));
    }

    #[test]
    fn test_invalid_round_rules() {
        assert!(RoundRules::new(30, 0).is_err());
        assert!(RoundRules::new(0, 6).is_err());
    }

    #[test]
    fn test_match_end_action_parse() {
        assert_eq!(MatchEndAction::parse("KICK"), MatchEndAction::Kick);
        assert_eq!(MatchEndAction::parse("none"), MatchEndAction::Nothing);
        assert_eq!(
            MatchEndAction::parse("reboot"),
            MatchEndAction::Unsupported("reboot".to_string())
        );
    }

    proptest! {
        #[test]
        fn prop_one_halftime_per_overtime(
            half in 1u32..30,
            ot_max_rounds in 2u32..13,
            overtime in 1u32..6,
        ) {
            let rules = RoundRules::new(half * 2, ot_max_rounds).unwrap();
            let first = rules.max_rounds + (overtime - 1) * ot_max_rounds + 1;
            let last = rules.max_rounds + overtime * ot_max_rounds;

            let halftimes: Vec<u32> = (first..=last).filter(|r| rules.is_halftime(*r)).collect();
            prop_assert_eq!(
                halftimes,
                vec![rules.max_rounds + (overtime - 1) * ot_max_rounds + ot_max_rounds / 2]
            );
        }

        #[test]
        fn prop_regulation_has_single_halftime(half in 1u32..30, ot_max_rounds in 2u32..13) {
            let rules = RoundRules::new(half * 2, ot_max_rounds).unwrap();
            let halftimes: Vec<u32> = (0..=rules.max_rounds).filter(|r| rules.is_halftime(*r)).collect();
            prop_assert_eq!(halftimes, vec![half]);
        }

        #[test]
        fn prop_score_to_win_is_reachable_only_once(half in 1u32..30, ot_max_rounds in 2u32..13, rounds in 0u32..120) {
            let rules = RoundRules::new(half * 2, ot_max_rounds).unwrap();
            prop_assert!(rules.score_to_win(rounds) * 2 > rules.max_rounds + rules.overtime_number(rounds) * ot_max_rounds);
        }
    }
}
