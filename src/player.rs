use crate::connection::HeosConnection;
use crate::error::{HeosError, Result};
use crate::protocol::{commands, Command, HeosMessage};
use crate::types::{
    flag_token, parse_flag, NowPlayingMedia, PlayState, PlayerEvent, PlayerId, PlayerInfo,
    RepeatMode, INPUTS,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Interface for a single HEOS player
///
/// A `Player` is a cheap handle: clones share the same live state, which is
/// kept current by change events while the client is connected.
#[derive(Clone)]
pub struct Player {
    connection: Arc<HeosConnection>,
    info: Arc<PlayerInfo>,
    state: Arc<Mutex<PlayerState>>,
}

/// Player state snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub play_state: PlayState,
    /// 0-100
    pub volume: u8,
    pub is_muted: bool,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub now_playing_media: NowPlayingMedia,
}

impl Player {
    pub(crate) fn new(connection: Arc<HeosConnection>, info: PlayerInfo) -> Self {
        Self {
            connection,
            info: Arc::new(info),
            state: Arc::new(Mutex::new(PlayerState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> PlayerId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn model(&self) -> &str {
        &self.info.model
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn network_type(&self) -> &str {
        &self.info.network_type
    }

    pub fn ip_address(&self) -> &str {
        &self.info.ip_address
    }

    pub fn line_out(&self) -> i64 {
        self.info.line_out
    }

    /// Static attributes reported at discovery
    pub fn info(&self) -> &PlayerInfo {
        &self.info
    }

    pub fn play_state(&self) -> PlayState {
        self.state().play_state
    }

    pub fn volume(&self) -> u8 {
        self.state().volume
    }

    pub fn is_muted(&self) -> bool {
        self.state().is_muted
    }

    pub fn repeat(&self) -> RepeatMode {
        self.state().repeat
    }

    pub fn shuffle(&self) -> bool {
        self.state().shuffle
    }

    pub fn now_playing_media(&self) -> NowPlayingMedia {
        self.state().now_playing_media.clone()
    }

    /// Get a consistent snapshot of every mutable field
    pub fn state_snapshot(&self) -> PlayerState {
        self.state().clone()
    }

    pub(crate) fn set_now_playing_media(&self, media: NowPlayingMedia) {
        self.state().now_playing_media = media;
    }

    /// Apply a change event
    ///
    /// Returns whether the change should be announced. Now-playing changes
    /// need a follow-up fetch and are applied by the registry instead.
    pub(crate) fn apply_event(
        &self,
        event: PlayerEvent,
        message: &HeosMessage,
        all_progress_events: bool,
    ) -> Result<bool> {
        match event {
            PlayerEvent::StateChanged => {
                let play_state = required(message, "state", PlayState::from_token)?;
                self.state().play_state = play_state;
            }
            PlayerEvent::VolumeChanged => {
                let volume = message
                    .param_as::<u8>("level")
                    .ok_or_else(|| missing(message, "level"))?;
                let is_muted = required(message, "mute", parse_flag)?;
                let mut state = self.state();
                state.volume = volume;
                state.is_muted = is_muted;
            }
            PlayerEvent::NowPlayingProgress => {
                let current_position = message.param_as::<i64>("cur_pos");
                let duration = message.param_as::<i64>("duration");
                let mut state = self.state();
                state.now_playing_media.current_position = current_position;
                state.now_playing_media.duration = duration;
                return Ok(all_progress_events);
            }
            PlayerEvent::RepeatModeChanged => {
                let repeat = required(message, "repeat", RepeatMode::from_token)?;
                self.state().repeat = repeat;
            }
            PlayerEvent::ShuffleModeChanged => {
                let shuffle = required(message, "shuffle", parse_flag)?;
                self.state().shuffle = shuffle;
            }
            PlayerEvent::NowPlayingChanged => return Ok(false),
        }
        Ok(true)
    }

    // ========== State Refresh ==========

    /// Pull every mutable field from the device
    pub async fn refresh(&self) -> Result<()> {
        self.refresh_state().await?;
        self.refresh_now_playing_media().await?;
        self.refresh_volume().await?;
        self.refresh_mode().await?;
        Ok(())
    }

    pub async fn refresh_state(&self) -> Result<()> {
        let response = self.command(commands::GET_PLAY_STATE).await?;
        let play_state = required(&response, "state", PlayState::from_token)?;
        self.state().play_state = play_state;
        Ok(())
    }

    /// Replace the now-playing descriptor with the device's current one
    pub async fn refresh_now_playing_media(&self) -> Result<()> {
        let response = self.command(commands::GET_NOW_PLAYING_MEDIA).await?;
        let media = response
            .payload()
            .map(NowPlayingMedia::from_payload)
            .unwrap_or_default();
        self.set_now_playing_media(media);
        Ok(())
    }

    pub async fn refresh_volume(&self) -> Result<()> {
        let volume = self.command(commands::GET_VOLUME).await?;
        let level = volume
            .param_as::<u8>("level")
            .ok_or_else(|| missing(&volume, "level"))?;
        let mute = self.command(commands::GET_MUTE).await?;
        let is_muted = required(&mute, "state", parse_flag)?;

        let mut state = self.state();
        state.volume = level;
        state.is_muted = is_muted;
        Ok(())
    }

    pub async fn refresh_mode(&self) -> Result<()> {
        let response = self.command(commands::GET_PLAY_MODE).await?;
        let repeat = required(&response, "repeat", RepeatMode::from_token)?;
        let shuffle = required(&response, "shuffle", parse_flag)?;

        let mut state = self.state();
        state.repeat = repeat;
        state.shuffle = shuffle;
        Ok(())
    }

    async fn command(&self, name: &str) -> Result<HeosMessage> {
        self.connection
            .send_command(Command::new(name).param("pid", self.id()))
            .await
    }

    // ========== Playback Control ==========

    /// Set the play state
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use heos::{HeosClient, HeosOptions, PlayState};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = HeosClient::new(HeosOptions::new("192.168.1.100"));
    /// # client.connect().await?;
    /// if let Some(player) = client.get_player(1) {
    ///     player.set_state(PlayState::Playing).await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_state(&self, state: PlayState) -> Result<()> {
        let command = Command::new(commands::SET_PLAY_STATE)
            .param("pid", self.id())
            .param("state", state.as_token());
        self.connection.send_command(command).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.set_state(PlayState::Playing).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.set_state(PlayState::Paused).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.set_state(PlayState::Stopped).await
    }

    pub async fn play_next(&self) -> Result<()> {
        self.command(commands::PLAY_NEXT).await?;
        Ok(())
    }

    pub async fn play_previous(&self) -> Result<()> {
        self.command(commands::PLAY_PREVIOUS).await?;
        Ok(())
    }

    /// Set repeat and shuffle together
    pub async fn set_play_mode(&self, repeat: RepeatMode, shuffle: bool) -> Result<()> {
        let command = Command::new(commands::SET_PLAY_MODE)
            .param("pid", self.id())
            .param("repeat", repeat.as_token())
            .param("shuffle", flag_token(shuffle));
        self.connection.send_command(command).await?;
        Ok(())
    }

    // ========== Volume Control ==========

    /// Set the volume level (0-100)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use heos::{HeosClient, HeosOptions};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = HeosClient::new(HeosOptions::new("192.168.1.100"));
    /// # client.connect().await?;
    /// if let Some(player) = client.get_player(1) {
    ///     player.set_volume(25).await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_volume(&self, level: u8) -> Result<()> {
        if level > 100 {
            return Err(HeosError::InvalidArgument(format!(
                "Volume must be between 0 and 100, got {}",
                level
            )));
        }
        let command = Command::new(commands::SET_VOLUME)
            .param("pid", self.id())
            .param("level", level);
        self.connection.send_command(command).await?;
        Ok(())
    }

    /// Raise the volume by `step` (1-10)
    pub async fn volume_up(&self, step: u8) -> Result<()> {
        self.step_volume(commands::VOLUME_UP, step).await
    }

    /// Lower the volume by `step` (1-10)
    pub async fn volume_down(&self, step: u8) -> Result<()> {
        self.step_volume(commands::VOLUME_DOWN, step).await
    }

    async fn step_volume(&self, name: &str, step: u8) -> Result<()> {
        if !(1..=10).contains(&step) {
            return Err(HeosError::InvalidArgument(format!(
                "Volume step must be between 1 and 10, got {}",
                step
            )));
        }
        let command = Command::new(name).param("pid", self.id()).param("step", step);
        self.connection.send_command(command).await?;
        Ok(())
    }

    // ========== Mute Control ==========

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        let command = Command::new(commands::SET_MUTE)
            .param("pid", self.id())
            .param("state", flag_token(mute));
        self.connection.send_command(command).await?;
        Ok(())
    }

    pub async fn mute(&self) -> Result<()> {
        self.set_mute(true).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.set_mute(false).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.command(commands::TOGGLE_MUTE).await?;
        Ok(())
    }

    // ========== Queue & Sources ==========

    pub async fn clear_queue(&self) -> Result<()> {
        self.command(commands::CLEAR_QUEUE).await?;
        Ok(())
    }

    /// Play a stream from a URL
    pub async fn play_url(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(HeosError::InvalidArgument("URL must not be empty".to_string()));
        }
        let command = Command::new(commands::PLAY_STREAM)
            .param("pid", self.id())
            .param("url", url);
        self.connection.send_command(command).await?;
        Ok(())
    }

    /// Play a favorite by its 1-based preset number
    pub async fn play_favorite(&self, preset: u32) -> Result<()> {
        if preset < 1 {
            return Err(HeosError::InvalidArgument(
                "Favorite preset must be 1 or greater".to_string(),
            ));
        }
        let command = Command::new(commands::PLAY_PRESET)
            .param("pid", self.id())
            .param("preset", preset);
        self.connection.send_command(command).await?;
        Ok(())
    }

    /// Play one of this player's own inputs, e.g. `inputs/aux_in_1`
    pub async fn play_input(&self, input: &str) -> Result<()> {
        self.play_input_from(None, input).await
    }

    /// Play an input of another player of the system on this one
    pub async fn play_input_source(&self, source: PlayerId, input: &str) -> Result<()> {
        self.play_input_from(Some(source), input).await
    }

    async fn play_input_from(&self, source: Option<PlayerId>, input: &str) -> Result<()> {
        if !INPUTS.contains(&input) {
            return Err(HeosError::InvalidArgument(format!(
                "Unknown input '{}'",
                input
            )));
        }
        let mut command = Command::new(commands::PLAY_INPUT).param("pid", self.id());
        if let Some(source) = source {
            command = command.param("spid", source);
        }
        self.connection
            .send_command(command.param("input", input))
            .await?;
        Ok(())
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} ({})}}", self.info.name, self.info.model)
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} ({}) with id {} at {}}}",
            self.info.name, self.info.model, self.info.id, self.info.ip_address
        )
    }
}

fn missing(message: &HeosMessage, key: &str) -> HeosError {
    HeosError::InvalidResponse(format!(
        "Missing or invalid '{}' in '{}'",
        key,
        message.command()
    ))
}

fn required<T>(message: &HeosMessage, key: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    message
        .param(key)
        .and_then(parse)
        .ok_or_else(|| missing(message, key))
}
