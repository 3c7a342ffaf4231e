//! Standalone checker for the bot's environment configuration.
//!
//! Loads the same `.env` file the bot would, resolves every setting and
//! lists the session files that would be started.

use std::process::ExitCode;

use clap::Parser;

use lumcity_bot::config::{MinerSettings, Task, TelegramConfig};

/// Environment configuration checker.
#[derive(Parser, Debug)]
#[command(name = "check_settings")]
#[command(about = "Validates the environment configuration of the LumCity bot")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match dotenvy::from_filename(&args.env_file) {
        Ok(_) => println!("Loaded: {}", args.env_file),
        Err(e) => println!("Could not load {} ({e}), using process environment", args.env_file),
    }
    println!();

    let mut errors = 0;

    match TelegramConfig::from_env() {
        Ok(tg) => {
            println!("✓ Telegram API id: {}", tg.api_id);
            match tg.session_names() {
                Ok(names) if names.is_empty() => {
                    println!("  ⚠ No session files in {}", tg.sessions_dir.display());
                }
                Ok(names) => println!("  Sessions: {}", names.join(", ")),
                Err(e) => println!("  ⚠ Cannot read {}: {e}", tg.sessions_dir.display()),
            }
        }
        Err(e) => {
            errors += 1;
            println!("✗ Telegram: {e}");
        }
    }

    match MinerSettings::from_env() {
        Ok(s) => print_settings(&s),
        Err(e) => {
            errors += 1;
            println!("✗ Settings: {e}");
        }
    }

    println!();
    if errors == 0 {
        println!("✓ Configuration is valid");
        ExitCode::SUCCESS
    } else {
        println!("✗ Configuration has {errors} error(s)");
        ExitCode::FAILURE
    }
}

fn print_settings(s: &MinerSettings) {
    println!("✓ Settings:");
    println!(
        "  Start delay:     {}",
        if s.use_random_delay_in_run {
            s.random_delay_in_run.to_string()
        } else {
            "off".to_owned()
        }
    );
    println!("  Max retries:     {} (delay {})", s.max_retries, s.retry_delay);
    println!("  Action delay:    {}s", s.action_delay_secs);
    println!("  Cycle interval:  {}s", s.cycle_interval_secs);
    println!("  Error cooldown:  {}s", s.error_cooldown_secs);
    println!("  Token lifetime:  {}", s.token_lifetime);
    println!("  Connectivity:    {}", if s.check_connectivity { "checked" } else { "not checked" });
    println!("  API base:        {}", s.api_base);
    println!("  State dir:       {}", s.state_dir.display());

    for task in [Task::Collect, Task::Upgrade] {
        let mark = if s.is_enabled(task) { "on" } else { "blacklisted" };
        println!("  Task {task:<10} {mark}");
    }
}
