//! Decoding of the log lines game servers send over UDP.
//!
//! A datagram looks like
//! `\xFF\xFF\xFF\xFFRL 11/03/2015 - 11:51:27: <payload>\n\0`. Only two payloads
//! matter to the tracker: the end of a round and a chat message. Everything else
//! decodes to `None`.

use crate::sides::Side;
use crate::utils::parse_digits;

const MAGIC: &[u8] = b"\xFF\xFF\xFF\xFF";
/// Shape of the timestamp that precedes every payload; `0` stands for a digit.
const TIMESTAMP_SHAPE: &[u8] = b"00/00/0000 - 00:00:00: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    RoundEnd {
        winner: Side,
        trigger: String,
        ct_score: u32,
        t_score: u32,
    },
    Chat(ChatMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub name: String,
    pub user_id: u32,
    pub steam_id: String,
    /// Raw team column: empty, `Unassigned`, `CT`, `TERRORIST` or `Console`
    pub team: String,
    pub team_only: bool,
    pub text: String,
}

impl ChatMessage {
    pub fn side(&self) -> Option<Side> {
        Side::from_log_team(&self.team)
    }

    pub fn is_console(&self) -> bool {
        self.steam_id == "Console" || self.team == "Console"
    }
}

pub fn decode(datagram: &[u8]) -> Option<LogEvent> {
    let line = strip_framing(datagram)?;
    let payload = strip_timestamp(line)?;
    parse_round_end(payload).or_else(|| parse_chat(payload))
}

fn strip_framing(datagram: &[u8]) -> Option<&str> {
    let rest = datagram.strip_prefix(MAGIC)?;
    let rest = rest
        .strip_prefix(b"RL ")
        .or_else(|| rest.strip_prefix(b"L "))?;
    let rest = rest.strip_suffix(b"\0").unwrap_or(rest);
    let rest = rest.strip_suffix(b"\n").unwrap_or(rest);
    std::str::from_utf8(rest).ok()
}

fn strip_timestamp(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() < TIMESTAMP_SHAPE.len() {
        return None;
    }
    let matches_shape = TIMESTAMP_SHAPE
        .iter()
        .zip(bytes)
        .all(|(&shape, &byte)| match shape {
            b'0' => byte.is_ascii_digit(),
            other => other == byte,
        });
    if !matches_shape {
        return None;
    }
    Some(&line[TIMESTAMP_SHAPE.len()..])
}

// Team "CT" triggered "SFUI_Notice_CTs_Win" (CT "1") (T "0")
fn parse_round_end(payload: &str) -> Option<LogEvent> {
    let rest = payload.strip_prefix("Team \"")?;
    let (team, rest) = rest.split_once("\" triggered \"")?;
    let winner = Side::from_log_team(team)?;
    let (trigger, rest) = rest.split_once("\" (CT \"")?;
    if trigger.is_empty()
        || !trigger
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return None;
    }
    let (ct, rest) = rest.split_once("\") (T \"")?;
    let t = rest.strip_suffix("\")")?;

    Some(LogEvent::RoundEnd {
        winner,
        trigger: trigger.to_string(),
        ct_score: parse_digits(ct)?,
        t_score: parse_digits(t)?,
    })
}

// "Name<12><STEAM_1:0:123><CT>" say "!ready"
fn parse_chat(payload: &str) -> Option<LogEvent> {
    let rest = payload.strip_prefix('"')?;
    let (player, team_only, text) = split_say(rest)?;
    let (name, user_id, steam_id, team) = parse_player(player)?;

    Some(LogEvent::Chat(ChatMessage {
        name: name.to_string(),
        user_id,
        steam_id: steam_id.to_string(),
        team: team.to_string(),
        team_only,
        text: text.to_string(),
    }))
}

fn split_say(rest: &str) -> Option<(&str, bool, &str)> {
    const SAY: &str = ">\" say \"";
    const SAY_TEAM: &str = ">\" say_team \"";

    let say = rest.find(SAY).map(|at| (at, false, SAY.len()));
    let say_team = rest.find(SAY_TEAM).map(|at| (at, true, SAY_TEAM.len()));
    let (at, team_only, marker) = match (say, say_team) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };

    let player = &rest[..at + 1];
    let text = rest[at + marker..].strip_suffix('"')?;
    Some((player, team_only, text))
}

fn parse_player(player: &str) -> Option<(&str, u32, &str, &str)> {
    let inner = player.strip_suffix('>')?;
    let (rest, team) = inner.rsplit_once('<')?;
    if !matches!(team, "" | "Unassigned" | "CT" | "TERRORIST" | "Console") {
        return None;
    }
    let (rest, steam_id) = rest.strip_suffix('>')?.rsplit_once('<')?;
    let (name, user_id) = rest.strip_suffix('>')?.rsplit_once('<')?;
    Some((name, parse_digits(user_id)?, steam_id, team))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(payload: &str) -> Vec<u8> {
        let mut bytes = b"\xFF\xFF\xFF\xFFRL 11/03/2015 - 11:51:27: ".to_vec();
        bytes.extend_from_slice(payload.as_bytes());
        bytes.extend_from_slice(b"\n\0");
        bytes
    }

    #[test]
    fn test_round_end() {
        let event = decode(&datagram(
            r#"Team "CT" triggered "SFUI_Notice_CTs_Win" (CT "1") (T "0")"#,
        ));

        assert_eq!(
            event,
            Some(LogEvent::RoundEnd {
                winner: Side::Ct,
                trigger: "SFUI_Notice_CTs_Win".to_string(),
                ct_score: 1,
                t_score: 0,
            })
        );
    }

    #[test]
    fn test_round_end_terrorist_win() {
        let event = decode(&datagram(
            r#"Team "TERRORIST" triggered "SFUI_Notice_Target_Bombed" (CT "7") (T "12")"#,
        ));

        match event {
            Some(LogEvent::RoundEnd {
                winner,
                ct_score,
                t_score,
                ..
            }) => {
                assert_eq!(winner, Side::T);
                assert_eq!((ct_score, t_score), (7, 12));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_chat_message() {
        let event = decode(&datagram(
            r#""Player One<12><STEAM_1:0:123456><CT>" say "!ready""#,
        ));

        let Some(LogEvent::Chat(message)) = event else {
            panic!("expected chat");
        };
        assert_eq!(message.name, "Player One");
        assert_eq!(message.user_id, 12);
        assert_eq!(message.steam_id, "STEAM_1:0:123456");
        assert_eq!(message.side(), Some(Side::Ct));
        assert!(!message.team_only);
        assert_eq!(message.text, "!ready");
    }

    #[test]
    fn test_team_chat_and_quotes_in_text() {
        let event = decode(&datagram(
            r#""x<3><STEAM_1:1:9><TERRORIST>" say_team "say "gg" now""#,
        ));

        let Some(LogEvent::Chat(message)) = event else {
            panic!("expected chat");
        };
        assert!(message.team_only);
        assert_eq!(message.side(), Some(Side::T));
        assert_eq!(message.text, r#"say "gg" now"#);
    }

    #[test]
    fn test_console_chat() {
        let event = decode(&datagram(r#""Console<0><Console><Console>" say "hello""#));

        let Some(LogEvent::Chat(message)) = event else {
            panic!("expected chat");
        };
        assert!(message.is_console());
        assert_eq!(message.side(), None);
    }

    #[test]
    fn test_unrelated_lines_are_ignored() {
        assert_eq!(decode(&datagram(r#"World triggered "Round_Start""#)), None);
        assert_eq!(
            decode(&datagram(r#""x<3><STEAM_1:1:9><Spectator>" say "hi""#)),
            None
        );
        assert_eq!(
            decode(&datagram(r#"Team "CT" triggered "bad trigger" (CT "1") (T "0")"#)),
            None
        );
        assert_eq!(decode(b"RL 11/03/2015 - 11:51:27: Team"), None);
        assert_eq!(decode(b""), None);
    }

    #[test]
    fn test_malformed_timestamp() {
        let mut bytes = b"\xFF\xFF\xFF\xFFRL 11-03-2015 - 11:51:27: ".to_vec();
        bytes.extend_from_slice(br#"Team "CT" triggered "X" (CT "1") (T "0")"#);
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn test_missing_trailer_is_accepted() {
        let mut bytes = b"\xFF\xFF\xFF\xFFL 11/03/2015 - 11:51:27: ".to_vec();
        bytes.extend_from_slice(br#"Team "CT" triggered "X" (CT "1") (T "0")"#);
        assert!(matches!(decode(&bytes), Some(LogEvent::RoundEnd { .. })));
    }
}
