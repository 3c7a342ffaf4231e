//! Per-account automation module.
//!
//! Keeps an account logged in to the game and walks it through the
//! collect/upgrade cycle on a timer.

mod runner;
mod state;

pub use runner::{CycleReport, MinerRunner, RunExit};
pub use state::{AccountSnapshot, TokenState};
