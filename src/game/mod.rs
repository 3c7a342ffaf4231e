//! Game backend module.
//!
//! Typed access to the LumCity REST API plus the bounded retry policy
//! every call goes through.

mod client;
mod retry;
pub mod types;

pub use client::{GameApi, GameClient, GameError};
pub use retry::RetryPolicy;
pub use types::{Collected, IpInfo, MinerStorage, MinerUpgrades};
