//! Client configuration and game constants.
//!
//! DESIGN
//! ======
//! Every knob has a compiled-in default and an environment override, so a bare
//! `ClientConfig::from_env()` works against a local backend while deployments
//! point it elsewhere. Parse failures fall back to the default instead of
//! aborting startup.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/dev";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3001/dev";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_WS_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_WS_RECONNECT_DELAY_MS: u64 = 2000;

// =============================================================================
// GAME CONSTANTS
// =============================================================================

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: u32 = 8;
pub const DEFAULT_MAX_PLAYERS: u32 = 4;

pub const QUESTION_OPTIONS: [u32; 3] = [10, 15, 20];
pub const DEFAULT_QUESTIONS: u32 = 10;

pub const MIN_TIME_SECS: u32 = 30;
pub const MAX_TIME_SECS: u32 = 300;
pub const DEFAULT_RESPONSE_TIME_SECS: u32 = 150;
pub const DEFAULT_GUESS_TIME_SECS: u32 = 150;

pub const DEFAULT_POINTS: u32 = 10;

pub const AVAILABLE_TOPICS: [&str; 8] = [
    "cultura-general",
    "ciencia",
    "historia",
    "entretenimiento",
    "deportes",
    "geografia",
    "arte",
    "tecnologia",
];
pub const DEFAULT_TOPIC: &str = "cultura-general";

// =============================================================================
// CONFIG
// =============================================================================

/// Request gateway settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    /// HTTP base address; request paths are appended verbatim.
    pub base_url: String,
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Maximum number of attempts for one logical call, including the first.
    pub retry_attempts: u32,
    /// Backoff unit: attempt `n` waits `retry_delay * (n - 1)`.
    pub retry_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_owned(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Event client settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventClientConfig {
    /// WebSocket base address; `roomId` and `userId` are appended as query params.
    pub ws_url: String,
    /// Reconnect attempts after an unexpected close before giving up.
    pub max_reconnect_attempts: u32,
    /// Backoff unit: reconnect attempt `n` waits `reconnect_delay * n`.
    pub reconnect_delay: Duration,
}

impl Default for EventClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_owned(),
            max_reconnect_attempts: DEFAULT_WS_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_WS_RECONNECT_DELAY_MS),
        }
    }
}

/// Full client configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub gateway: GatewayConfig,
    pub events: EventClientConfig,
}

impl ClientConfig {
    /// Load config from `BLUFF_*` environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway = GatewayConfig {
            base_url: lookup_string(&lookup, "BLUFF_API_URL", DEFAULT_API_URL),
            timeout: Duration::from_millis(lookup_parse(
                &lookup,
                "BLUFF_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )),
            retry_attempts: lookup_parse(&lookup, "BLUFF_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)
                .max(1),
            retry_delay: Duration::from_millis(lookup_parse(
                &lookup,
                "BLUFF_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )),
        };
        let events = EventClientConfig {
            ws_url: lookup_string(&lookup, "BLUFF_WS_URL", DEFAULT_WS_URL),
            max_reconnect_attempts: lookup_parse(
                &lookup,
                "BLUFF_WS_MAX_RECONNECT_ATTEMPTS",
                DEFAULT_WS_MAX_RECONNECT_ATTEMPTS,
            ),
            reconnect_delay: Duration::from_millis(lookup_parse(
                &lookup,
                "BLUFF_WS_RECONNECT_DELAY_MS",
                DEFAULT_WS_RECONNECT_DELAY_MS,
            )),
        };
        Self { gateway, events }
    }
}

fn lookup_string<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn lookup_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
