//! Configuration.
//!
//! Every setting can come from a flag or an environment variable.  The bot
//! token has no default: secrets are never embedded in the binary.

use std::time::Duration;

use clap::Parser;

use crate::source::SlotsEndpoint;

/// How often background tasks poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Notifications sent by the synchronous first poll of a new subscription.
pub const DEFAULT_CREATION_BURST: usize = 3;

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub poll_interval: Duration,
    pub creation_burst: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            creation_burst: DEFAULT_CREATION_BURST,
        }
    }
}

/// listwatch: notify subscribers about new listings and free slots.
#[derive(Parser, Debug, Clone)]
#[command(name = "listwatch")]
#[command(about = "Watches listing pages and slot-booking systems and notifies subscribers of new items")]
pub struct Settings {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix for every Redis key this process owns.
    #[arg(long, env = "LISTWATCH_KEY_PREFIX", default_value = "listwatch")]
    pub key_prefix: String,

    /// Telegram bot token used to deliver notifications.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: String,

    /// Telegram Bot API base URL.
    #[arg(long, env = "TELEGRAM_API_URL", default_value = "https://api.telegram.org")]
    pub telegram_api_url: String,

    /// Seconds between poll cycles of one subscription.
    #[arg(long, env = "LISTWATCH_POLL_INTERVAL_SECS", default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Notifications sent right away when a subscription is created.
    #[arg(long, env = "LISTWATCH_CREATION_BURST", default_value_t = DEFAULT_CREATION_BURST)]
    pub creation_burst: usize,

    /// Base URL of the slot-booking system.
    #[arg(long, env = "SLOTS_BASE_URL", default_value = "https://eq.hsc.gov.ua")]
    pub slots_base_url: String,

    /// Pause between per-day slot requests, in milliseconds.
    #[arg(long, env = "SLOTS_REQUEST_PAUSE_MS", default_value_t = 1000)]
    pub slots_request_pause_ms: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Settings {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            creation_burst: self.creation_burst,
        }
    }

    pub fn slots_endpoint(&self) -> SlotsEndpoint {
        SlotsEndpoint {
            base_url: self.slots_base_url.clone(),
            pause_between_requests: Duration::from_millis(self.slots_request_pause_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.creation_burst, 3);
    }

    #[test]
    fn settings_from_flags() {
        let settings = Settings::try_parse_from([
            "listwatch",
            "--telegram-token",
            "123:abc",
            "--poll-interval-secs",
            "5",
            "--slots-request-pause-ms",
            "250",
        ])
        .unwrap();

        assert_eq!(settings.service_config().poll_interval, Duration::from_secs(5));
        assert_eq!(settings.service_config().creation_burst, 3);
        assert_eq!(settings.slots_endpoint().pause_between_requests, Duration::from_millis(250));
        assert_eq!(settings.slots_endpoint().question_id, 55);
        assert_eq!(settings.key_prefix, "listwatch");
    }

    #[test]
    fn token_is_required() {
        // Only meaningful when the variable is not set in the test environment.
        if std::env::var_os("TELEGRAM_BOT_TOKEN").is_none() {
            assert!(Settings::try_parse_from(["listwatch"]).is_err());
        }
    }
}
