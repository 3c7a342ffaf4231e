//! LumCity Bot Library
//!
//! Automates the LumCity Telegram mini-app for one or more accounts.
//!
//! This crate provides the core functionality for:
//! - Loading task-loop settings and Telegram credentials from the environment
//! - Opening the game mini-app via `MTProto` and extracting its init data
//! - Talking to the game's REST backend with bounded retries
//! - Running the per-account collect/upgrade loop

pub mod config;
pub mod game;
pub mod miner;
pub mod telegram;
