//! Per-account task loop.
//!
//! Each pass of the loop:
//! 1. Optionally checks connectivity (waits and starts over on failure)
//! 2. Logs in again if there is no token or its lifetime has elapsed
//! 3. Runs one cycle: read storage → collect → read upgrades → buy pickaxe
//! 4. Saves the account snapshot and sleeps until the next cycle
//!
//! Failing to obtain init data or exhausting the login retries ends the
//! loop; any other failed call is logged and the cycle moves on.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::state::{AccountSnapshot, TokenState};
use crate::config::{MinerSettings, Task};
use crate::game::types::MIN_COLLECT_AMOUNT;
use crate::game::{GameApi, RetryPolicy};
use crate::telegram::{BootstrapError, InitDataSource};

/// Wait after a failed connectivity check.
const CONNECTIVITY_COOLDOWN: Duration = Duration::from_secs(150);

/// Pause after the session check, before the cycle starts.
const SESSION_SETTLE: Duration = Duration::from_secs(3);

/// Why an account loop stopped.
#[derive(Debug)]
pub enum RunExit {
    /// Init data could not be obtained from Telegram.
    Bootstrap(BootstrapError),
    /// The game login failed on every attempt.
    LoginFailed,
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap(e) => write!(f, "session bootstrap failed: {e}"),
            Self::LoginFailed => write!(f, "login failed after max retries"),
        }
    }
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Miner storage read at the start of the cycle.
    pub miner_balance: Option<f64>,
    /// Storage reported by a successful collect.
    pub collected: Option<f64>,
    /// Latest GOLT wallet balance seen.
    pub golt_balance: Option<f64>,
    /// Whether a pickaxe upgrade was bought.
    pub upgraded: bool,
    /// New pickaxe level, if the game reported one.
    pub pickaxe_level: Option<u32>,
    /// False when the cycle stopped early because storage was unreadable.
    pub completed: bool,
}

/// Runs the task loop for one account.
pub struct MinerRunner<A, S> {
    name: String,
    api: A,
    source: S,
    settings: MinerSettings,
    retry: RetryPolicy,
    token: Option<TokenState>,
    snapshot: AccountSnapshot,
    snapshot_path: Option<PathBuf>,
}

impl<A: GameApi, S: InitDataSource> MinerRunner<A, S> {
    /// Creates a runner for the named account.
    #[must_use]
    pub fn new(name: impl Into<String>, api: A, source: S, settings: MinerSettings) -> Self {
        let retry = RetryPolicy::new(settings.max_retries, settings.retry_delay);
        Self {
            name: name.into(),
            api,
            source,
            settings,
            retry,
            token: None,
            snapshot: AccountSnapshot::default(),
            snapshot_path: None,
        }
    }

    /// Persists the account snapshot at `path` after every cycle, starting
    /// from whatever is already stored there.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.snapshot = AccountSnapshot::load(&path);
        self.snapshot_path = Some(path);
        self
    }

    #[must_use]
    pub const fn snapshot(&self) -> &AccountSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub const fn token(&self) -> Option<&TokenState> {
        self.token.as_ref()
    }

    /// Runs the loop until login becomes impossible.
    pub async fn run(&mut self) -> RunExit {
        if self.settings.use_random_delay_in_run {
            let delay = self.settings.random_delay_in_run.sample();
            info!("Bot will start in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }

        loop {
            if self.settings.check_connectivity && !self.connectivity_ok().await {
                error!(
                    "Connectivity check failed, sleeping {}s",
                    CONNECTIVITY_COOLDOWN.as_secs()
                );
                tokio::time::sleep(CONNECTIVITY_COOLDOWN).await;
                continue;
            }

            if let Err(exit) = self.ensure_session().await {
                error!("Stopping: {}", exit);
                return exit;
            }
            tokio::time::sleep(SESSION_SETTLE).await;

            let report = self.run_cycle().await;
            self.record(&report);

            let sleep_for = if report.completed {
                self.settings.cycle_interval()
            } else {
                self.settings.error_cooldown()
            };
            info!("Sleeping {}", minutes_and_seconds(sleep_for));
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Makes sure a live bearer token is attached.
    ///
    /// Returns `Ok(true)` when a new login happened and `Ok(false)` when the
    /// current token is still within its lifetime.
    pub async fn ensure_session(&mut self) -> Result<bool, RunExit> {
        if let Some(token) = &self.token
            && !token.is_expired()
        {
            debug!("Token still valid for {}s", token.time_remaining().as_secs());
            return Ok(false);
        }

        self.api.clear_authorization();
        self.token = None;
        info!("Authorization");

        let init_data = self.source.init_data().await.map_err(RunExit::Bootstrap)?;

        let api = &self.api;
        let access_token = self
            .retry
            .run("Login", || api.login(&init_data))
            .await
            .ok_or(RunExit::LoginFailed)?;

        self.api.authorize(&access_token);
        let lifetime = self.settings.token_lifetime.sample();
        self.token = Some(TokenState::issued_now(lifetime));
        self.snapshot.logins += 1;

        info!("Login successful, token renewed in {}s", lifetime.as_secs());
        Ok(true)
    }

    /// Performs one pass over the enabled tasks.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let api = &self.api;

        self.pause().await;
        let Some(storage) = self.retry.run("Miner storage", || api.miner_storage()).await else {
            warn!("Miner storage unavailable, skipping this cycle");
            return report;
        };
        report.miner_balance = storage.balance;

        if let Some(balance) = storage.balance {
            info!("Coin balance: {}", balance);

            if self.settings.is_enabled(Task::Collect) && balance >= MIN_COLLECT_AMOUNT {
                self.collect(&mut report).await;
            }
        }

        if self.settings.is_enabled(Task::Upgrade) {
            self.upgrade(&mut report).await;
        }

        report.completed = true;
        report
    }

    async fn collect(&self, report: &mut CycleReport) {
        let api = &self.api;

        self.pause().await;
        let Some(collected) = self.retry.run("Collect", || api.collect()).await else {
            warn!("Can't collect GOLT this cycle");
            return;
        };
        report.collected = Some(collected.storage);

        self.pause().await;
        if let Some(golt) = self.retry.run("GOLT balance", || api.golt_balance()).await {
            report.golt_balance = Some(golt);
            info!("Collected GOLT! New balance: {}", golt);
        }
    }

    async fn upgrade(&self, report: &mut CycleReport) {
        let api = &self.api;

        self.pause().await;
        let Some(upgrades) = self.retry.run("Upgrade list", || api.upgrades()).await else {
            return;
        };

        self.pause().await;
        let Some(golt) = self.retry.run("GOLT balance", || api.golt_balance()).await else {
            return;
        };
        report.golt_balance = Some(golt);

        let price = upgrades.pickaxe.price_golt;
        if golt < price {
            info!("Waiting for more GOLT, remaining: {:.4}", price - golt);
            return;
        }

        self.pause().await;
        if let Some(level) = self.retry.run("Pickaxe upgrade", || api.buy_pickaxe()).await {
            report.upgraded = true;
            report.pickaxe_level = level;
            match level {
                Some(level) => info!("Upgraded miner! Pickaxe level {}", level),
                None => info!("Upgraded miner!"),
            }
        }
    }

    async fn connectivity_ok(&self) -> bool {
        match self.api.check_connectivity().await {
            Ok(ip) => {
                info!(
                    "Connectivity OK | Country: {} | City: {} | IP: {}",
                    ip.country, ip.city, ip.ip
                );
                true
            }
            Err(e) => {
                error!("Connectivity check failed: {}", e);
                false
            }
        }
    }

    /// Folds a cycle report into the snapshot and saves it.
    fn record(&mut self, report: &CycleReport) {
        let snapshot = &mut self.snapshot;
        snapshot.last_cycle_at = Some(Utc::now());
        if report.miner_balance.is_some() {
            snapshot.miner_balance = report.miner_balance;
        }
        if report.golt_balance.is_some() {
            snapshot.golt_balance = report.golt_balance;
        }
        if report.pickaxe_level.is_some() {
            snapshot.pickaxe_level = report.pickaxe_level;
        }
        if report.completed {
            snapshot.cycles += 1;
        }

        if let Some(path) = &self.snapshot_path
            && let Err(e) = snapshot.save(path)
        {
            warn!("Failed to save snapshot {}: {}", path.display(), e);
        }
    }

    async fn pause(&self) {
        tokio::time::sleep(self.settings.action_delay()).await;
    }
}

/// Formats a sleep as `30m0s`, or `45s` when under a minute.
fn minutes_and_seconds(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

impl<A, S> std::fmt::Debug for MinerRunner<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerRunner")
            .field("name", &self.name)
            .field("logged_in", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::DelayRange;
    use crate::game::types::PickaxeUpgrade;
    use crate::game::{Collected, GameError, IpInfo, MinerStorage, MinerUpgrades};
    use crate::telegram::WebAppError;

    /// Scripted game backend that records every call it receives.
    struct FakeGame {
        calls: Mutex<Vec<&'static str>>,
        login_ok: bool,
        storage: Option<f64>,
        golt: f64,
        pickaxe_price: f64,
        token: Option<String>,
    }

    impl FakeGame {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                login_ok: true,
                storage: Some(0.5),
                golt: 50.0,
                pickaxe_price: 40.0,
                token: None,
            }
        }

        fn log(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GameApi for FakeGame {
        async fn login(&self, init_data: &str) -> Result<String, GameError> {
            self.log("login");
            assert_eq!(init_data, "auth_date=1&hash=ff");
            if self.login_ok {
                Ok(format!("jwt-{}", self.count("login")))
            } else {
                Err(GameError::Unexpected("502 Bad Gateway".to_owned()))
            }
        }

        fn authorize(&mut self, token: &str) {
            self.token = Some(token.to_owned());
        }

        fn clear_authorization(&mut self) {
            self.token = None;
        }

        async fn miner_storage(&self) -> Result<MinerStorage, GameError> {
            self.log("miner_storage");
            match self.storage {
                Some(balance) => Ok(MinerStorage {
                    balance: Some(balance),
                }),
                None => Err(GameError::Unexpected("timeout".to_owned())),
            }
        }

        async fn collect(&self) -> Result<Collected, GameError> {
            self.log("collect");
            Ok(Collected { storage: 1.25 })
        }

        async fn golt_balance(&self) -> Result<f64, GameError> {
            self.log("golt_balance");
            Ok(self.golt)
        }

        async fn upgrades(&self) -> Result<MinerUpgrades, GameError> {
            self.log("upgrades");
            Ok(MinerUpgrades {
                pickaxe: PickaxeUpgrade {
                    price_golt: self.pickaxe_price,
                },
            })
        }

        async fn buy_pickaxe(&self) -> Result<Option<u32>, GameError> {
            self.log("buy_pickaxe");
            Ok(Some(5))
        }

        async fn check_connectivity(&self) -> Result<IpInfo, GameError> {
            self.log("check_connectivity");
            Ok(IpInfo::default())
        }
    }

    struct FakeSource {
        ok: bool,
        calls: AtomicU32,
    }

    impl FakeSource {
        fn ok() -> Self {
            Self {
                ok: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl InitDataSource for FakeSource {
        async fn init_data(&self) -> Result<String, BootstrapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok("auth_date=1&hash=ff".to_owned())
            } else {
                Err(WebAppError::MissingWebAppData.into())
            }
        }
    }

    fn settings() -> MinerSettings {
        MinerSettings {
            use_random_delay_in_run: false,
            max_retries: 2,
            retry_delay: DelayRange::fixed(5),
            token_lifetime: DelayRange::fixed(1500),
            ..MinerSettings::default()
        }
    }

    fn runner(game: FakeGame, source: FakeSource) -> MinerRunner<FakeGame, FakeSource> {
        MinerRunner::new("alice", game, source, settings())
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_exhaustion_ends_loop() {
        let game = FakeGame {
            login_ok: false,
            ..FakeGame::new()
        };
        let mut runner = runner(game, FakeSource::ok());

        let exit = runner.run().await;

        assert!(matches!(exit, RunExit::LoginFailed));
        assert_eq!(runner.api.count("login"), 2);
        assert!(runner.token().is_none());
        assert!(runner.api.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_failure_ends_loop() {
        let source = FakeSource {
            ok: false,
            calls: AtomicU32::new(0),
        };
        let mut runner = runner(FakeGame::new(), source);

        let exit = runner.run().await;

        assert!(matches!(exit, RunExit::Bootstrap(_)));
        assert_eq!(runner.api.count("login"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_until_lifetime_elapses() {
        let mut runner = runner(FakeGame::new(), FakeSource::ok());

        assert!(runner.ensure_session().await.unwrap());
        assert_eq!(runner.api.token.as_deref(), Some("jwt-1"));

        tokio::time::advance(Duration::from_secs(1499)).await;
        assert!(!runner.ensure_session().await.unwrap());
        assert_eq!(runner.api.count("login"), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(runner.ensure_session().await.unwrap());
        assert_eq!(runner.api.count("login"), 2);
        assert_eq!(runner.api.token.as_deref(), Some("jwt-2"));
        assert_eq!(runner.source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.snapshot().logins, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_collects_and_upgrades() {
        let runner = runner(FakeGame::new(), FakeSource::ok());

        let report = runner.run_cycle().await;

        assert_eq!(
            runner.api.calls(),
            vec![
                "miner_storage",
                "collect",
                "golt_balance",
                "upgrades",
                "golt_balance",
                "buy_pickaxe"
            ]
        );
        assert!(report.completed);
        assert_eq!(report.miner_balance, Some(0.5));
        assert_eq!(report.collected, Some(1.25));
        assert!(report.upgraded);
        assert_eq!(report.pickaxe_level, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_dust_and_unaffordable_upgrade() {
        let game = FakeGame {
            storage: Some(0.0005),
            golt: 10.0,
            ..FakeGame::new()
        };
        let runner = runner(game, FakeSource::ok());

        let report = runner.run_cycle().await;

        assert_eq!(runner.api.calls(), vec!["miner_storage", "upgrades", "golt_balance"]);
        assert!(report.completed);
        assert!(!report.upgraded);
        assert_eq!(report.golt_balance, Some(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_tasks_make_no_requests() {
        let settings = MinerSettings {
            task_blacklist: HashSet::from([Task::Collect, Task::Upgrade]),
            ..settings()
        };
        let runner = MinerRunner::new("alice", FakeGame::new(), FakeSource::ok(), settings);

        let report = runner.run_cycle().await;

        assert_eq!(runner.api.calls(), vec!["miner_storage"]);
        assert!(report.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_storage_stops_cycle() {
        let game = FakeGame {
            storage: None,
            ..FakeGame::new()
        };
        let runner = runner(game, FakeSource::ok());

        let report = runner.run_cycle().await;

        assert_eq!(runner.api.count("miner_storage"), 2);
        assert_eq!(runner.api.calls().len(), 2);
        assert!(!report.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.json");
        let mut runner = runner(FakeGame::new(), FakeSource::ok()).with_snapshot_path(&path);

        let report = runner.run_cycle().await;
        runner.record(&report);

        let saved = AccountSnapshot::load(&path);
        assert_eq!(saved.cycles, 1);
        assert_eq!(saved.golt_balance, Some(50.0));
        assert_eq!(saved.pickaxe_level, Some(5));
        assert!(saved.last_cycle_at.is_some());
    }

    #[test]
    fn test_sleep_durations_are_not_rounded_away() {
        assert_eq!(minutes_and_seconds(Duration::from_secs(1800)), "30m0s");
        assert_eq!(minutes_and_seconds(Duration::from_secs(150)), "2m30s");
        assert_eq!(minutes_and_seconds(Duration::from_secs(45)), "45s");
        assert_eq!(minutes_and_seconds(Duration::ZERO), "0s");
    }
}
