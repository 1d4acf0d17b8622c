use std::env;
use std::time::Duration;

/// TCP port of the HEOS CLI
pub const CLI_PORT: u16 = 1255;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEART_BEAT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Tunables for a HEOS session
///
/// Every value has a default matching the behaviour of the HEOS CLI; use the
/// `with_*` methods to override them, or [`HeosOptions::from_env`] to read
/// them from `HEOS_*` environment variables.
#[derive(Debug, Clone)]
pub struct HeosOptions {
    pub host: String,
    pub port: u16,
    /// Connect timeout and the wait for a command's terminal frame
    pub timeout: Duration,
    /// Wait re-armed after each "command under process" frame
    pub under_process_timeout: Duration,
    /// Idle interval after which a heart beat is sent; `None` disables it
    pub heart_beat: Option<Duration>,
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    /// Publish a player update for every progress event
    pub all_progress_events: bool,
    /// Parameters that must agree between a command and its terminal frame
    pub correlation_keys: Vec<String>,
    pub max_frame_length: usize,
    /// Capacity of the channel behind `HeosClient::subscribe_updates`
    pub event_buffer: usize,
}

impl HeosOptions {
    /// Options for the player at `host` with every other value defaulted
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: CLI_PORT,
            timeout: DEFAULT_TIMEOUT,
            under_process_timeout: DEFAULT_TIMEOUT,
            heart_beat: Some(DEFAULT_HEART_BEAT),
            auto_reconnect: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            all_progress_events: true,
            correlation_keys: vec!["sequence".to_string(), "pid".to_string(), "gid".to_string()],
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Read options from the environment, loading `.env` first if present
    ///
    /// Recognised variables: `HEOS_HOST` (default `127.0.0.1`), `HEOS_PORT`,
    /// `HEOS_TIMEOUT_SECS`, `HEOS_UNDER_PROCESS_TIMEOUT_SECS`,
    /// `HEOS_HEART_BEAT_SECS` (`0` disables), `HEOS_AUTO_RECONNECT`,
    /// `HEOS_RECONNECT_DELAY_SECS`, `HEOS_ALL_PROGRESS_EVENTS`,
    /// `HEOS_MAX_FRAME_LENGTH`, `HEOS_EVENT_BUFFER`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok().and_then(|v| v.trim().parse().ok())
        }

        fn parse_secs(var: &str, default: Duration) -> Duration {
            parse::<u64>(var).map(Duration::from_secs).unwrap_or(default)
        }

        let mut options = Self::new(env::var("HEOS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()));
        options.port = parse("HEOS_PORT").unwrap_or(CLI_PORT);
        options.timeout = parse_secs("HEOS_TIMEOUT_SECS", DEFAULT_TIMEOUT);
        options.under_process_timeout =
            parse_secs("HEOS_UNDER_PROCESS_TIMEOUT_SECS", options.timeout);
        options.heart_beat = match parse::<u64>("HEOS_HEART_BEAT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_HEART_BEAT),
        };
        options.auto_reconnect = parse("HEOS_AUTO_RECONNECT").unwrap_or(false);
        options.reconnect_delay = parse_secs("HEOS_RECONNECT_DELAY_SECS", DEFAULT_RECONNECT_DELAY);
        options.all_progress_events = parse("HEOS_ALL_PROGRESS_EVENTS").unwrap_or(true);
        options.max_frame_length = parse("HEOS_MAX_FRAME_LENGTH").unwrap_or(DEFAULT_MAX_FRAME_LENGTH);
        options.event_buffer = parse("HEOS_EVENT_BUFFER").unwrap_or(DEFAULT_EVENT_BUFFER);
        options
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_under_process_timeout(mut self, timeout: Duration) -> Self {
        self.under_process_timeout = timeout;
        self
    }

    pub fn with_heart_beat(mut self, interval: Option<Duration>) -> Self {
        self.heart_beat = interval;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool, delay: Duration) -> Self {
        self.auto_reconnect = enabled;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_all_progress_events(mut self, enabled: bool) -> Self {
        self.all_progress_events = enabled;
        self
    }

    pub fn with_correlation_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.correlation_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_cli() {
        let options = HeosOptions::new("192.168.0.1");
        assert_eq!(options.port, 1255);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.heart_beat, Some(Duration::from_secs(10)));
        assert!(!options.auto_reconnect);
        assert!(options.all_progress_events);
        assert_eq!(options.correlation_keys, vec!["sequence", "pid", "gid"]);
    }

    #[test]
    fn builder_overrides() {
        let options = HeosOptions::new("host")
            .with_port(4000)
            .with_heart_beat(None)
            .with_auto_reconnect(true, Duration::from_millis(50))
            .with_correlation_keys(["sequence"]);
        assert_eq!(options.port, 4000);
        assert_eq!(options.heart_beat, None);
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_delay, Duration::from_millis(50));
        assert_eq!(options.correlation_keys, vec!["sequence"]);
    }
}
