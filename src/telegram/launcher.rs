//! Source of fresh mini-app init data for the game login.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::webapp::{self, WebAppError};
use super::{TelegramBot, TelegramError};
use crate::config::{GAME_BOT_USERNAME, GAME_WEB_APP_URL};

/// Errors while bootstrapping a mini-app session.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    WebApp(#[from] WebAppError),
}

/// Anything that can hand out signed init data for the game backend.
pub trait InitDataSource {
    fn init_data(&self) -> impl Future<Output = Result<String, BootstrapError>> + Send;
}

/// Opens a bot's mini-app and returns the launch URL.
pub trait WebViewSource {
    fn request_web_view(
        &self,
        bot_username: &str,
        url: &str,
    ) -> impl Future<Output = Result<String, TelegramError>> + Send;
}

impl WebViewSource for TelegramBot {
    async fn request_web_view(&self, bot_username: &str, url: &str) -> Result<String, TelegramError> {
        Self::request_web_view(self, bot_username, url).await
    }
}

/// Opens the game mini-app through a logged-in Telegram account.
#[derive(Debug)]
pub struct WebAppLauncher<V = TelegramBot> {
    bot: Arc<V>,
    bot_username: String,
    url: String,
}

impl<V: WebViewSource + Sync + Send> WebAppLauncher<V> {
    /// Creates a launcher for the game bot.
    #[must_use]
    pub fn new(bot: Arc<V>) -> Self {
        Self {
            bot,
            bot_username: GAME_BOT_USERNAME.to_owned(),
            url: GAME_WEB_APP_URL.to_owned(),
        }
    }

    /// Requests the launch URL, sleeping through at most one flood wait.
    async fn launch_url(&self) -> Result<String, TelegramError> {
        match self.bot.request_web_view(&self.bot_username, &self.url).await {
            Err(TelegramError::FloodWait(seconds)) => {
                warn!("Flood wait from Telegram: sleeping {} seconds", seconds);
                tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
                self.bot.request_web_view(&self.bot_username, &self.url).await
            }
            other => other,
        }
    }
}

impl<V: WebViewSource + Sync + Send> InitDataSource for WebAppLauncher<V> {
    async fn init_data(&self) -> Result<String, BootstrapError> {
        let launch_url = self.launch_url().await?;
        let init_data = webapp::extract_init_data(&launch_url)?;

        match webapp::init_data_user(&init_data) {
            Ok(user) => debug!(
                "Init data issued for user {} (@{})",
                user.id,
                user.username.as_deref().unwrap_or("-")
            ),
            Err(e) => debug!("Init data carries no readable user: {}", e),
        }

        Ok(init_data)
    }
}
