//! Application settings and Telegram configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Directory holding one session file per account.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl TelegramConfig {
    /// File extension used for account session files.
    pub const SESSION_EXTENSION: &'static str = "session";

    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            sessions_dir: default_sessions_dir(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or `TG_API_ID` is
    /// not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        if api_id <= 0 {
            return Err(ConfigError::InvalidApiId);
        }

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let sessions_dir =
            std::env::var("SESSIONS_DIR").map_or_else(|_| default_sessions_dir(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            sessions_dir,
        })
    }

    /// Path of the session file for the named account.
    #[must_use]
    pub fn session_path(&self, name: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{name}.{}", Self::SESSION_EXTENSION))
    }

    /// Lists account names that have a session file, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be read.
    pub fn session_names(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::SESSION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Inclusive range of whole seconds a random delay is drawn from.
///
/// Always holds `min_secs <= max_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min_secs: u64,
    max_secs: u64,
}

impl DelayRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRange`] if `min_secs > max_secs`.
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self, ConfigError> {
        if min_secs > max_secs {
            return Err(ConfigError::InvalidRange(format!("{min_secs} > {max_secs}")));
        }
        Ok(Self { min_secs, max_secs })
    }

    /// A range that always yields the same duration.
    #[must_use]
    pub const fn fixed(secs: u64) -> Self {
        Self {
            min_secs: secs,
            max_secs: secs,
        }
    }

    /// Draws a uniformly random duration from the range.
    #[must_use]
    pub fn sample(&self) -> Duration {
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub const fn min_secs(&self) -> u64 {
        self.min_secs
    }

    #[must_use]
    pub const fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Returns true if `d` lies inside the range.
    #[must_use]
    pub fn contains(&self, d: Duration) -> bool {
        (self.min_secs..=self.max_secs).contains(&d.as_secs())
    }
}

impl FromStr for DelayRange {
    type Err = ConfigError;

    /// Accepts `5,60` as well as the list form `[5, 60]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
        let mut parts = inner.split(',').map(str::trim);

        let (Some(min), Some(max), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ConfigError::InvalidRange(s.to_owned()));
        };

        let parse = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| ConfigError::InvalidRange(s.to_owned()))
        };

        Self::new(parse(min)?, parse(max)?)
    }
}

impl fmt::Display for DelayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]s", self.min_secs, self.max_secs)
    }
}

/// Optional in-game tasks that can be switched off through `TASK_BLACKLIST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Collect mined coin from the miner storage.
    Collect,
    /// Buy the next pickaxe upgrade when affordable.
    Upgrade,
}

impl FromStr for Task {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "collect" => Ok(Self::Collect),
            "upgrade" | "upgrades" => Ok(Self::Upgrade),
            other => Err(ConfigError::UnknownTask(other.to_owned())),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Collect => "collect",
            Self::Upgrade => "upgrade",
        })
    }
}

/// Settings controlling the per-account task loop.
#[derive(Debug, Clone)]
pub struct MinerSettings {
    /// Wait a random delay before an account starts working.
    pub use_random_delay_in_run: bool,

    /// Range for the start delay.
    pub random_delay_in_run: DelayRange,

    /// Attempts per HTTP call before giving up.
    pub max_retries: u32,

    /// Range for the pause after a failed attempt.
    pub retry_delay: DelayRange,

    /// Pause between consecutive actions.
    pub action_delay_secs: u64,

    /// Sleep between two full cycles.
    pub cycle_interval_secs: u64,

    /// Sleep after a cycle that stopped early.
    pub error_cooldown_secs: u64,

    /// Range the bearer token lifetime is drawn from at each login.
    pub token_lifetime: DelayRange,

    /// Tasks that are never performed.
    pub task_blacklist: HashSet<Task>,

    /// Check outbound connectivity before every cycle.
    pub check_connectivity: bool,

    /// Base URL of the game backend.
    pub api_base: String,

    /// Directory for per-account snapshot files.
    pub state_dir: PathBuf,
}

fn default_api_base() -> String {
    "https://back.lumcity.app".to_owned()
}

impl Default for MinerSettings {
    fn default() -> Self {
        Self {
            use_random_delay_in_run: true,
            random_delay_in_run: DelayRange {
                min_secs: 5,
                max_secs: 60,
            },
            max_retries: 2,
            retry_delay: DelayRange {
                min_secs: 5,
                max_secs: 10,
            },
            action_delay_secs: 2,
            cycle_interval_secs: 1800,
            error_cooldown_secs: 120,
            token_lifetime: DelayRange {
                min_secs: 1500,
                max_secs: 1900,
            },
            task_blacklist: HashSet::new(),
            check_connectivity: false,
            api_base: default_api_base(),
            state_dir: PathBuf::from("state"),
        }
    }
}

impl MinerSettings {
    /// Creates settings from environment variables, falling back to defaults
    /// for anything unset.
    ///
    /// # Errors
    ///
    /// See [`MinerSettings::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Creates settings from variables returned by `get`. Empty values count
    /// as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed, `MAX_RETRIES` is 0, or
    /// `TASK_BLACKLIST` names an unknown task.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(get);
        let defaults = Self::default();

        let max_retries = vars.parsed("MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MAX_RETRIES",
                value: "0".to_owned(),
            });
        }

        let task_blacklist = match vars.nonempty("TASK_BLACKLIST") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Task::from_str)
                .collect::<Result<_, _>>()?,
            None => defaults.task_blacklist,
        };

        Ok(Self {
            use_random_delay_in_run: vars
                .bool("USE_RANDOM_DELAY_IN_RUN", defaults.use_random_delay_in_run)?,
            random_delay_in_run: vars.range("RANDOM_DELAY_IN_RUN", defaults.random_delay_in_run)?,
            max_retries,
            retry_delay: vars.range("RETRY_DELAY", defaults.retry_delay)?,
            action_delay_secs: vars.parsed("ACTION_DELAY", defaults.action_delay_secs)?,
            cycle_interval_secs: vars.parsed("CYCLE_INTERVAL", defaults.cycle_interval_secs)?,
            error_cooldown_secs: vars.parsed("ERROR_COOLDOWN", defaults.error_cooldown_secs)?,
            token_lifetime: vars.range("TOKEN_LIFETIME", defaults.token_lifetime)?,
            task_blacklist,
            check_connectivity: vars.bool("CHECK_CONNECTIVITY", defaults.check_connectivity)?,
            api_base: vars
                .nonempty("GAME_API_BASE")
                .map_or(defaults.api_base, |s| s.trim().trim_end_matches('/').to_owned()),
            state_dir: vars.nonempty("STATE_DIR").map_or(defaults.state_dir, PathBuf::from),
        })
    }

    /// Returns true unless the task is blacklisted.
    #[must_use]
    pub fn is_enabled(&self, task: Task) -> bool {
        !self.task_blacklist.contains(&task)
    }

    #[must_use]
    pub const fn action_delay(&self) -> Duration {
        Duration::from_secs(self.action_delay_secs)
    }

    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    #[must_use]
    pub const fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }
}

/// Typed access to a variable source.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Reads a variable, treating empty values as unset.
    fn nonempty(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.nonempty(var) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value }),
            None => Ok(default),
        }
    }

    fn bool(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.nonempty(var) {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue { var, value }),
            None => Ok(default),
        }
    }

    fn range(&self, var: &str, default: DelayRange) -> Result<DelayRange, ConfigError> {
        self.nonempty(var).map_or(Ok(default), |value| value.parse())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid delay range {0:?} (expected \"min,max\" with min <= max)")]
    InvalidRange(String),

    #[error("Unknown task in TASK_BLACKLIST: {0:?} (expected collect or upgrade)")]
    UnknownTask(String),
}
