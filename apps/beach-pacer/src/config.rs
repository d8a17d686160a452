use std::env;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

pub const DEFAULT_CHANNEL: &str = "beach.pacer.session";
pub const MIN_DEFAULT_COUNTDOWN_SECS: u64 = 60;
pub const MAX_DEFAULT_COUNTDOWN_SECS: u64 = 600;
const COUNTDOWN_STEP_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub channel: String,
    pub participant_id: String,
    pub default_countdown_secs: u64,
    pub reset_on_scene_change: bool,
    /// Participants that sync state but render no pacer UI (e.g. stream capture accounts).
    pub exempt_participants: Vec<String>,
    pub state_request_delay: Duration,
    pub tick_interval: Duration,
    pub state_file: Option<PathBuf>,
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_countdown_secs = env::var("PACER_DEFAULT_COUNTDOWN")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(clamp_default_countdown)
            .unwrap_or(defaults.default_countdown_secs);
        let reset_on_scene_change = env::var("PACER_RESET_ON_SCENE_CHANGE")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.reset_on_scene_change);
        let exempt_participants = env::var("PACER_EXEMPT")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let state_request_delay = env::var("PACER_STATE_REQUEST_DELAY_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.state_request_delay);
        let tick_interval = env::var("PACER_TICK_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);

        Self {
            channel: env::var("PACER_CHANNEL").unwrap_or(defaults.channel),
            participant_id: env::var("PACER_PARTICIPANT_ID").unwrap_or(defaults.participant_id),
            default_countdown_secs,
            reset_on_scene_change,
            exempt_participants,
            state_request_delay,
            tick_interval,
            state_file: env::var("PACER_STATE_FILE").ok().map(PathBuf::from),
            redis_url: env::var("PACER_REDIS_URL").ok(),
        }
    }

    /// Same settings, different participant.
    pub fn for_participant(&self, participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            ..self.clone()
        }
    }

    pub fn is_exempt(&self, participant_id: &str) -> bool {
        self.exempt_participants
            .iter()
            .any(|exempt| exempt == participant_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            participant_id: Uuid::new_v4().to_string(),
            default_countdown_secs: MIN_DEFAULT_COUNTDOWN_SECS,
            reset_on_scene_change: true,
            exempt_participants: Vec::new(),
            state_request_delay: Duration::from_millis(500),
            tick_interval: Duration::from_secs(1),
            state_file: None,
            redis_url: None,
        }
    }
}

/// Keeps the default countdown within 1..=10 minutes on 30 second steps.
pub fn clamp_default_countdown(secs: u64) -> u64 {
    let clamped = secs.clamp(MIN_DEFAULT_COUNTDOWN_SECS, MAX_DEFAULT_COUNTDOWN_SECS);
    let offset = clamped - MIN_DEFAULT_COUNTDOWN_SECS;
    let snapped = ((offset + COUNTDOWN_STEP_SECS / 2) / COUNTDOWN_STEP_SECS) * COUNTDOWN_STEP_SECS;
    (MIN_DEFAULT_COUNTDOWN_SECS + snapped).min(MAX_DEFAULT_COUNTDOWN_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn default_countdown_is_clamped_and_snapped() {
        assert_eq!(clamp_default_countdown(0), 60);
        assert_eq!(clamp_default_countdown(60), 60);
        assert_eq!(clamp_default_countdown(74), 60);
        assert_eq!(clamp_default_countdown(75), 90);
        assert_eq!(clamp_default_countdown(300), 300);
        assert_eq!(clamp_default_countdown(9_999), 600);
    }

    #[test_timeout::timeout]
    fn exempt_lookup_and_participant_override() {
        let config = Config {
            exempt_participants: vec!["stream-cam".into()],
            ..Config::default()
        };
        assert!(config.is_exempt("stream-cam"));
        assert!(!config.is_exempt("p1"));

        let other = config.for_participant("p1");
        assert_eq!(other.participant_id, "p1");
        assert_eq!(other.channel, config.channel);
        assert_eq!(other.exempt_participants, config.exempt_participants);
    }

    #[test_timeout::timeout]
    fn defaults_match_session_conventions() {
        let config = Config::default();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert_eq!(config.default_countdown_secs, 60);
        assert_eq!(config.state_request_delay, Duration::from_millis(500));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert!(config.reset_on_scene_change);
    }
}
