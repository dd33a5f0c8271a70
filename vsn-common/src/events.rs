//! Outbound message types sent to the controller
//!
//! Every message is keyed by guild id where it concerns a single player.
//! Serialized as JSON objects tagged with `op`; track lifecycle events carry a
//! second `type` tag.

use serde::{Deserialize, Serialize};

/// Lightweight player snapshot (`playerUpdate.state`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Server wall-clock time in milliseconds
    pub time: i64,

    /// Position of the active track in milliseconds (absent when idle)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

/// How bad an engine-reported failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Expected failure (e.g. unavailable source), nothing to investigate
    Common,
    /// Unusual failure that may indicate a source problem
    Suspicious,
    /// Internal fault
    Fault,
}

/// Failure description forwarded to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

/// Aggregated frame delivery statistics over the last completed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// Track lifecycle and connection events (`op: event`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename_all = "camelCase")]
    TrackStartEvent { guild_id: String, track: String },

    #[serde(rename_all = "camelCase")]
    TrackEndEvent {
        guild_id: String,
        track: String,
        reason: String,
    },

    #[serde(rename_all = "camelCase")]
    TrackExceptionEvent {
        guild_id: String,
        track: String,
        exception: ExceptionInfo,
    },

    #[serde(rename_all = "camelCase")]
    TrackStuckEvent {
        guild_id: String,
        track: String,
        threshold_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

/// Every message the node sends to its controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Periodic or out-of-band player state snapshot
    #[serde(rename_all = "camelCase")]
    PlayerUpdate { guild_id: String, state: PlayerState },

    /// Track lifecycle or voice connection event
    Event(NodeEvent),

    /// Node statistics
    #[serde(rename_all = "camelCase")]
    Stats {
        players: usize,
        playing_players: usize,
        uptime: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_stats: Option<FrameStats>,
    },
}

impl OutboundMessage {
    /// Guild the message concerns, if it concerns a single player
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::PlayerUpdate { guild_id, .. } => Some(guild_id),
            OutboundMessage::Event(event) => Some(event.guild_id()),
            OutboundMessage::Stats { .. } => None,
        }
    }
}

impl NodeEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            NodeEvent::TrackStartEvent { guild_id, .. }
            | NodeEvent::TrackEndEvent { guild_id, .. }
            | NodeEvent::TrackExceptionEvent { guild_id, .. }
            | NodeEvent::TrackStuckEvent { guild_id, .. }
            | NodeEvent::WebSocketClosedEvent { guild_id, .. } => guild_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_update_wire_shape() {
        let msg = OutboundMessage::PlayerUpdate {
            guild_id: "1234".to_string(),
            state: PlayerState {
                time: 1_700_000_000_000,
                position: Some(4200),
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "op": "playerUpdate",
                "guildId": "1234",
                "state": { "time": 1_700_000_000_000i64, "position": 4200 }
            })
        );
    }

    #[test]
    fn test_idle_state_has_no_position_field() {
        let state = PlayerState {
            time: 10,
            position: None,
        };
        let value = serde_json::to_value(state).unwrap();
        assert!(value.get("position").is_none());
        assert_eq!(value["time"], 10);
    }

    #[test]
    fn test_track_end_event_wire_shape() {
        let msg = OutboundMessage::Event(NodeEvent::TrackEndEvent {
            guild_id: "42".to_string(),
            track: "QAAA".to_string(),
            reason: "FINISHED".to_string(),
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "event");
        assert_eq!(value["type"], "TrackEndEvent");
        assert_eq!(value["guildId"], "42");
        assert_eq!(value["reason"], "FINISHED");
        assert_eq!(msg.guild_id(), Some("42"));
    }

    #[test]
    fn test_exception_severity_serialization() {
        let info = ExceptionInfo {
            message: Some("unavailable".to_string()),
            severity: Severity::Common,
            cause: "source".to_string(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["severity"], "COMMON");
    }

    #[test]
    fn test_stats_omits_missing_frame_stats() {
        let msg = OutboundMessage::Stats {
            players: 2,
            playing_players: 1,
            uptime: 1000,
            frame_stats: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "stats");
        assert_eq!(value["playingPlayers"], 1);
        assert!(value.get("frameStats").is_none());
        assert_eq!(msg.guild_id(), None);
    }

    #[test]
    fn test_message_round_trips_through_json() {
        let msg = OutboundMessage::Event(NodeEvent::TrackStuckEvent {
            guild_id: "7".to_string(),
            track: "abc".to_string(),
            threshold_ms: 10_000,
        });
        let text = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
