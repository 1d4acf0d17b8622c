use crate::protocol::HeosMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Player identifier (`pid`), assigned by the HEOS system; may be negative
pub type PlayerId = i64;

/// Signal carrying [`Event::PlayerUpdated`]
pub const SIGNAL_PLAYER_UPDATED: &str = "player_updated";

/// Signal carrying [`Event::Heos`]
pub const SIGNAL_HEOS_EVENT: &str = "heos_event";

/// Input names accepted by `browse/play_input`
pub const INPUTS: &[&str] = &[
    "inputs/aux_in_1",
    "inputs/aux_in_2",
    "inputs/aux_in_3",
    "inputs/aux_in_4",
    "inputs/aux_single",
    "inputs/aux1",
    "inputs/aux2",
    "inputs/aux3",
    "inputs/aux4",
    "inputs/aux5",
    "inputs/aux6",
    "inputs/aux7",
    "inputs/line_in_1",
    "inputs/line_in_2",
    "inputs/line_in_3",
    "inputs/line_in_4",
    "inputs/coax_in_1",
    "inputs/coax_in_2",
    "inputs/optical_in_1",
    "inputs/optical_in_2",
    "inputs/optical_in_3",
    "inputs/hdmi_in_1",
    "inputs/hdmi_in_2",
    "inputs/hdmi_in_3",
    "inputs/hdmi_in_4",
    "inputs/hdmi_arc_1",
    "inputs/cable_sat",
    "inputs/dvd",
    "inputs/bluray",
    "inputs/game",
    "inputs/mediaplayer",
    "inputs/cd",
    "inputs/tuner",
    "inputs/hdradio",
    "inputs/tvaudio",
    "inputs/phono",
    "inputs/usbdac",
    "inputs/analog",
];

/// Playback state of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlayState {
    /// Parse the protocol token (`play`, `pause`, `stop`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "play" => Some(PlayState::Playing),
            "pause" => Some(PlayState::Paused),
            "stop" => Some(PlayState::Stopped),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            PlayState::Playing => "play",
            PlayState::Paused => "pause",
            PlayState::Stopped => "stop",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Repeat mode of a player's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Parse the protocol token (`off`, `on_all`, `on_one`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "off" => Some(RepeatMode::Off),
            "on_all" => Some(RepeatMode::All),
            "on_one" => Some(RepeatMode::One),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "on_all",
            RepeatMode::One => "on_one",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Parse an `on`/`off` flag
pub(crate) fn parse_flag(token: &str) -> Option<bool> {
    match token {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn flag_token(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Static player attributes, as reported by `player/get_players`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    #[serde(rename = "pid")]
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub version: String,

    /// `wired`, `wifi` or `unknown`
    #[serde(rename = "network", default)]
    pub network_type: String,

    #[serde(rename = "ip", default)]
    pub ip_address: String,

    /// 1 = variable, 2 = fixed
    #[serde(rename = "lineout", default)]
    pub line_out: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Group the player belongs to, if any
    #[serde(rename = "gid", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<PlayerId>,
}

/// Descriptor of what a player is currently playing
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NowPlayingMedia {
    /// e.g. `song`, `station`
    pub media_type: Option<String>,
    pub song: String,
    pub album: String,
    pub artist: String,
    pub image_url: String,
    pub album_id: String,
    pub media_id: String,
    pub queue_id: Option<i64>,
    /// Song id, the `sid` field of the payload
    pub song_id: Option<i64>,
    pub station: Option<String>,
    /// Milliseconds
    pub duration: Option<i64>,
    /// Milliseconds
    pub current_position: Option<i64>,
}

impl NowPlayingMedia {
    /// Build from a `player/get_now_playing_media` payload
    ///
    /// Progress fields start out empty; progress events fill them in.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            media_type: opt_str_field(payload, "type"),
            song: str_field(payload, "song"),
            album: str_field(payload, "album"),
            artist: str_field(payload, "artist"),
            image_url: str_field(payload, "image_url"),
            album_id: str_field(payload, "album_id"),
            media_id: str_field(payload, "mid"),
            queue_id: int_field(payload, "qid"),
            song_id: int_field(payload, "sid"),
            station: opt_str_field(payload, "station"),
            duration: None,
            current_position: None,
        }
    }
}

// Payload values come back as strings or numbers depending on the source
fn opt_str_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(payload: &Value, key: &str) -> String {
    opt_str_field(payload, key).unwrap_or_default()
}

fn int_field(payload: &Value, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Player change events the registry understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEvent {
    StateChanged,
    NowPlayingChanged,
    VolumeChanged,
    NowPlayingProgress,
    RepeatModeChanged,
    ShuffleModeChanged,
}

impl PlayerEvent {
    pub const ALL: [PlayerEvent; 6] = [
        PlayerEvent::StateChanged,
        PlayerEvent::NowPlayingChanged,
        PlayerEvent::VolumeChanged,
        PlayerEvent::NowPlayingProgress,
        PlayerEvent::RepeatModeChanged,
        PlayerEvent::ShuffleModeChanged,
    ];

    /// Map an event command name to its tag; `None` for anything else
    pub fn from_command(command: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.command() == command)
    }

    /// Command name of the event frame
    pub fn command(self) -> &'static str {
        match self {
            PlayerEvent::StateChanged => "event/player_state_changed",
            PlayerEvent::NowPlayingChanged => "event/player_now_playing_changed",
            PlayerEvent::VolumeChanged => "event/player_volume_changed",
            PlayerEvent::NowPlayingProgress => "event/player_now_playing_progress",
            PlayerEvent::RepeatModeChanged => "event/repeat_mode_changed",
            PlayerEvent::ShuffleModeChanged => "event/shuffle_mode_changed",
        }
    }
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeosEvent {
    Connected,
    Disconnected,
    Reconnected,
}

/// Payload delivered by the [`Dispatcher`](crate::Dispatcher)
#[derive(Debug, Clone)]
pub enum Event {
    /// A raw change event from the device, published under its command name
    Message(Arc<HeosMessage>),

    /// Published under [`SIGNAL_PLAYER_UPDATED`] after a player was mutated
    PlayerUpdated {
        player_id: PlayerId,
        event: PlayerEvent,
    },

    /// Published under [`SIGNAL_HEOS_EVENT`]
    Heos(HeosEvent),
}
