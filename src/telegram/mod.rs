//! Telegram client wrapper module.
//!
//! Provides the session bootstrap: authorizing an account, opening the game
//! mini-app and pulling the signed init data out of its launch URL.

mod client;
mod launcher;
pub mod webapp;

pub use client::{
    AccountInfo, PwdToken as PasswordToken, TelegramBot, TelegramError, Token as LoginToken,
};
pub use launcher::{BootstrapError, InitDataSource, WebAppLauncher, WebViewSource};
pub use webapp::{WebAppError, WebAppUser};
