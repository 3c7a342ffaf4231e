//! Configuration module for the miner bot.
//!
//! Handles loading and validation of the task-loop settings and the
//! Telegram API credentials, all taken from the environment.

mod settings;

pub use settings::{ConfigError, DelayRange, MinerSettings, Task, TelegramConfig};

/// Username of the bot hosting the game mini-app.
pub const GAME_BOT_USERNAME: &str = "LumCity_bot";

/// URL the mini-app web view is opened with.
pub const GAME_WEB_APP_URL: &str = "https://lumcity.app/app";
