//! Per-account runner state.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Age of the bearer token attached to a runner's client, with the lifetime
/// drawn at login.
#[derive(Debug, Clone, Copy)]
pub struct TokenState {
    issued_at: Instant,
    lifetime: Duration,
}

impl TokenState {
    /// Records a token issued now.
    #[must_use]
    pub fn issued_now(lifetime: Duration) -> Self {
        Self {
            issued_at: Instant::now(),
            lifetime,
        }
    }

    /// Checks if the token has outlived its lifetime.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= self.lifetime
    }

    /// Returns the time left before a re-login is due.
    #[must_use]
    pub fn time_remaining(&self) -> Duration {
        self.lifetime.saturating_sub(self.issued_at.elapsed())
    }
}

/// Summary of an account written to disk after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// When the last cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Uncollected miner storage seen at the start of the last cycle.
    pub miner_balance: Option<f64>,
    /// GOLT wallet balance after the last cycle.
    pub golt_balance: Option<f64>,
    /// Pickaxe level reported by the last successful upgrade.
    pub pickaxe_level: Option<u32>,
    /// Number of completed cycles.
    pub cycles: u64,
    /// Number of successful logins.
    pub logins: u64,
}

impl AccountSnapshot {
    /// Loads a snapshot from a JSON file, returns default if missing or corrupt.
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Saves the snapshot to a JSON file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_token_expires_after_lifetime() {
        let token = TokenState::issued_now(Duration::from_secs(1500));
        assert!(!token.is_expired());
        assert_eq!(token.time_remaining(), Duration::from_secs(1500));

        tokio::time::advance(Duration::from_secs(1499)).await;
        assert!(!token.is_expired());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(token.is_expired());
        assert_eq!(token.time_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alice.json");

        let snapshot = AccountSnapshot {
            last_cycle_at: Some(Utc::now()),
            golt_balance: Some(12.5),
            pickaxe_level: Some(3),
            cycles: 4,
            ..AccountSnapshot::default()
        };
        snapshot.save(&path).unwrap();

        assert_eq!(AccountSnapshot::load(&path), snapshot);
    }

    #[test]
    fn test_snapshot_load_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(AccountSnapshot::load(dir.path().join("missing.json")), AccountSnapshot::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(AccountSnapshot::load(&corrupt), AccountSnapshot::default());
    }
}
