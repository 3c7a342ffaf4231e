//! LumCity Bot - Main Entry Point
//!
//! Runs the LumCity mini-app task loop for every authorized Telegram
//! session found in the sessions directory.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

use lumcity_bot::config::{MinerSettings, TelegramConfig};
use lumcity_bot::game::GameClient;
use lumcity_bot::miner::MinerRunner;
use lumcity_bot::telegram::{TelegramBot, TelegramError, WebAppLauncher};

/// Telegram mini-app automation for the LumCity miner game.
#[derive(Parser, Debug)]
#[command(name = "lumcity_bot")]
#[command(about = "Collect and upgrade in the LumCity mini-app on a timer")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Authorize a new session file with this name and exit.
    #[arg(long, value_name = "NAME")]
    login: Option<String>,

    /// Only run the session with this name.
    #[arg(short, long, value_name = "NAME", conflicts_with = "login")]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    if let Some(name) = args.login {
        return login_session(&tg_config, &name).await;
    }

    let settings =
        MinerSettings::from_env().context("Failed to load bot settings from environment")?;

    let names = match args.session {
        Some(name) => vec![name],
        None => tg_config.session_names().with_context(|| {
            format!("Failed to list sessions in {}", tg_config.sessions_dir.display())
        })?,
    };

    if names.is_empty() {
        bail!(
            "No sessions found in {}. Create one with --login <NAME>.",
            tg_config.sessions_dir.display()
        );
    }

    let mut accounts = JoinSet::new();
    let mut bots = Vec::new();

    for name in names {
        let bot = match connect_account(&tg_config, &name).await {
            Ok(bot) => Arc::new(bot),
            Err(e) => {
                error!("{} | Skipping account: {:#}", name, e);
                continue;
            }
        };
        bots.push(Arc::clone(&bot));

        let api = GameClient::new(settings.api_base.clone())
            .context("Failed to build HTTP client")?;
        let snapshot_path = settings.state_dir.join(format!("{name}.json"));
        let mut runner = MinerRunner::new(
            name.clone(),
            api,
            WebAppLauncher::new(bot),
            settings.clone(),
        )
        .with_snapshot_path(snapshot_path);

        let span = info_span!("account", session = %name);
        accounts.spawn(async move { runner.run().await }.instrument(span));
    }

    if accounts.is_empty() {
        bail!("No account could be started");
    }

    info!("Running {} account(s). Use Ctrl+C to stop.", accounts.len());

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        () = drain(&mut accounts) => false,
    };

    if interrupted {
        info!("Received Ctrl+C, shutting down...");
        accounts.abort_all();
    } else {
        warn!("All accounts stopped");
    }

    for bot in bots {
        bot.disconnect();
    }

    Ok(())
}

/// Waits for every account task to finish, logging how each one ended.
async fn drain(accounts: &mut JoinSet<lumcity_bot::miner::RunExit>) {
    while let Some(result) = accounts.join_next().await {
        match result {
            Ok(exit) => warn!("Account loop ended: {}", exit),
            Err(e) => error!("Account task panicked: {}", e),
        }
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Connects an existing session and makes sure it is authorized.
async fn connect_account(config: &TelegramConfig, name: &str) -> Result<TelegramBot> {
    let path = config.session_path(name);
    if !path.exists() {
        bail!("session file {} not found", path.display());
    }

    let bot = TelegramBot::connect(&path, config.api_id)
        .await
        .context("Failed to connect to Telegram")?;

    if !bot.is_authorized().await? {
        bot.disconnect();
        return Err(TelegramError::NotAuthorized.into());
    }

    match bot.me().await {
        Ok(me) => info!(
            "{} | Logged in as {} {} (@{}, id {})",
            name, me.first_name, me.last_name, me.username, me.id
        ),
        Err(e) => warn!("{} | Could not fetch account info: {}", name, e),
    }

    Ok(bot)
}

/// Creates or re-authorizes a session file interactively.
async fn login_session(config: &TelegramConfig, name: &str) -> Result<()> {
    let path = config.session_path(name);
    let bot = TelegramBot::connect(&path, config.api_id)
        .await
        .context("Failed to connect to Telegram")?;

    if bot.is_authorized().await.context("Failed to check authorization")? {
        info!("Session {} is already authorized", name);
        bot.disconnect();
        return Ok(());
    }

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => {}
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;
        }
        Err(e) => return Err(e).context("Authentication failed"),
    }

    info!("Session saved to {}", path.display());
    bot.disconnect();
    Ok(())
}
