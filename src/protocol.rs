use crate::error::{HeosError, Result};
use crate::types::PlayerId;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const BASE_URI: &str = "heos://";
const UNDER_PROCESS: &str = "command under process";
const MASKED_PARAMS: &[&str] = &["pw"];
const MASK: &str = "********";

/// Command and event names used by the core
pub mod commands {
    pub const REGISTER_FOR_CHANGE_EVENTS: &str = "system/register_for_change_events";
    pub const HEART_BEAT: &str = "system/heart_beat";
    pub const GET_PLAYERS: &str = "player/get_players";
    pub const GET_PLAY_STATE: &str = "player/get_play_state";
    pub const SET_PLAY_STATE: &str = "player/set_play_state";
    pub const GET_NOW_PLAYING_MEDIA: &str = "player/get_now_playing_media";
    pub const GET_VOLUME: &str = "player/get_volume";
    pub const SET_VOLUME: &str = "player/set_volume";
    pub const VOLUME_UP: &str = "player/volume_up";
    pub const VOLUME_DOWN: &str = "player/volume_down";
    pub const GET_MUTE: &str = "player/get_mute";
    pub const SET_MUTE: &str = "player/set_mute";
    pub const TOGGLE_MUTE: &str = "player/toggle_mute";
    pub const GET_PLAY_MODE: &str = "player/get_play_mode";
    pub const SET_PLAY_MODE: &str = "player/set_play_mode";
    pub const PLAY_NEXT: &str = "player/play_next";
    pub const PLAY_PREVIOUS: &str = "player/play_previous";
    pub const CLEAR_QUEUE: &str = "player/clear_queue";
    pub const PLAY_STREAM: &str = "browse/play_stream";
    pub const PLAY_PRESET: &str = "browse/play_preset";
    pub const PLAY_INPUT: &str = "browse/play_input";
}

/// An outgoing command: a name plus opaque key/value parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: BTreeMap<String, String>,
}

impl Command {
    /// Create a command, e.g. `Command::new("player/get_volume")`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add or replace a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The line written to the wire
    pub fn to_uri(&self) -> String {
        self.encode(false)
    }

    /// Same as [`Command::to_uri`] with credentials masked, for logs
    pub fn to_masked_uri(&self) -> String {
        self.encode(true)
    }

    fn encode(&self, mask: bool) -> String {
        if self.params.is_empty() {
            return format!("{}{}", BASE_URI, self.name);
        }

        // `url` must be the last parameter
        let mut pairs = Vec::with_capacity(self.params.len());
        let mut url = None;
        for (key, value) in &self.params {
            let value = if mask && MASKED_PARAMS.contains(&key.as_str()) {
                MASK.to_string()
            } else {
                quote(value)
            };
            let pair = format!("{}={}", key, value);
            if key == "url" {
                url = Some(pair);
            } else {
                pairs.push(pair);
            }
        }
        pairs.extend(url);

        format!("{}{}?{}", BASE_URI, self.name, pairs.join("&"))
    }

    /// Whether `message` answers this command
    ///
    /// The command names must be equal; every key in `correlation_keys` that
    /// is present on both sides must carry the same value.
    pub fn is_answered_by(&self, message: &HeosMessage, correlation_keys: &[String]) -> bool {
        if message.is_event() || message.command() != self.name {
            return false;
        }
        correlation_keys.iter().all(|key| {
            match (self.get(key), message.param(key)) {
                (Some(sent), Some(echoed)) => sent == echoed,
                _ => true,
            }
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_masked_uri())
    }
}

/// Escape a value per the CLI rules: only `&`, `=` and `%`
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => quoted.push_str("%26"),
            '=' => quoted.push_str("%3D"),
            '%' => quoted.push_str("%25"),
            c => quoted.push(c),
        }
    }
    quoted
}

#[derive(Debug, Deserialize)]
struct Frame {
    heos: Header,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Header {
    command: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: String,
}

/// A decoded frame: a command result or a change event
#[derive(Debug, Clone, PartialEq)]
pub struct HeosMessage {
    command: String,
    result: Option<String>,
    message: String,
    params: BTreeMap<String, String>,
    payload: Option<Value>,
    options: Option<Value>,
}

impl HeosMessage {
    /// Decode one frame
    pub fn parse(frame: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(frame)?;
        let params = parse_message(&frame.heos.message)?;

        Ok(Self {
            command: frame.heos.command,
            result: frame.heos.result,
            message: frame.heos.message,
            params,
            payload: frame.payload,
            options: frame.options,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Raw `message` string
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parse a parameter into `T`; `None` when absent or unparsable
    pub fn param_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.param(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    /// Unsolicited change event rather than a command result
    pub fn is_event(&self) -> bool {
        self.command.starts_with("event/")
    }

    /// Intermediate "command under process" frame
    pub fn is_under_process(&self) -> bool {
        self.message.contains(UNDER_PROCESS)
    }

    /// `Some(true)` for success, `Some(false)` for failure, `None` for events
    pub fn result(&self) -> Option<bool> {
        self.result.as_deref().map(|r| r == "success")
    }

    /// The `pid` parameter
    pub fn player_id(&self) -> Result<PlayerId> {
        self.param_as("pid").ok_or_else(|| {
            HeosError::InvalidResponse(format!("No player id in '{}'", self.command))
        })
    }

    /// Convert a failure result into [`HeosError::Command`]
    pub fn error_for_result(self) -> Result<Self> {
        if self.result() == Some(false) {
            let text = self
                .param("text")
                .map(str::to_string)
                .unwrap_or_else(|| self.message.clone());
            return Err(HeosError::Command {
                error_id: self.param_as("eid"),
                command: self.command,
                text,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for HeosMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Some(result) => write!(f, "{} {} '{}'", self.command, result, self.message),
            None => write!(f, "{} '{}'", self.command, self.message),
        }
    }
}

fn parse_message(message: &str) -> Result<BTreeMap<String, String>> {
    if message.is_empty() {
        return Ok(BTreeMap::new());
    }
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(message).map_err(|e| {
        HeosError::InvalidResponse(format!("Unparsable message '{}': {}", message, e))
    })?;
    Ok(pairs.into_iter().collect())
}
