//! Telegram client wrapper for mini-app authorization.

use std::path::Path;
use std::sync::Arc;

use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{sender, Client, InvocationError, SenderPool, SignInError};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Re-export types for external use.
pub use grammers_client::client::{LoginToken as Token, PasswordToken as PwdToken};

/// Platform reported when opening the mini-app.
const WEB_VIEW_PLATFORM: &str = "android";

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Run with --login first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Could not resolve @{0}")]
    PeerNotFound(String),

    #[error("Unexpected web view result")]
    UnexpectedWebView,

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if let Some(seconds) = extract_flood_wait_seconds(&err_str) {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lower = err_msg.to_lowercase();

    for pattern in ["flood_wait_", "flood wait "] {
        if let Some(idx) = lower.find(pattern) {
            let num_str: String = lower[idx + pattern.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Identity of the logged-in account.
#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Opens the session file and connects to Telegram.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Session`] if the session file cannot be opened.
    pub async fn connect(session_path: &Path, api_id: i32) -> Result<Self, TelegramError> {
        debug!("Connecting to Telegram with session {}", session_path.display());

        if let Some(parent) = session_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TelegramError::Session(e.to_string()))?;
        }

        let session = Arc::new(
            SqliteSession::open(session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle: handle.thin,
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::SignInFailed`] if Telegram refuses the number.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::PasswordRequired`] when the account has 2FA
    /// enabled, or [`TelegramError::SignInFailed`] for a wrong code.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        match self.client.sign_in(token, code).await {
            Ok(_user) => Ok(()),
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::InvalidPassword`] with a fresh token to retry.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        match self.client.check_password(password_token, password).await {
            Ok(_user) => Ok(()),
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Fetches the logged-in user's identity.
    pub async fn me(&self) -> Result<AccountInfo, TelegramError> {
        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        let users = self.client.invoke(&request).await?;
        match users.into_iter().next() {
            Some(tl::enums::User::User(user)) => Ok(AccountInfo {
                id: user.id,
                first_name: user.first_name.unwrap_or_default(),
                last_name: user.last_name.unwrap_or_default(),
                username: user.username.unwrap_or_default(),
            }),
            _ => Err(TelegramError::NotAuthorized),
        }
    }

    /// Opens the mini-app of `bot_username` at `url` and returns the launch
    /// URL Telegram generated for it.
    ///
    /// # Errors
    ///
    /// Fails if the session is not authorized, the bot cannot be resolved,
    /// or Telegram answers with a flood wait.
    pub async fn request_web_view(
        &self,
        bot_username: &str,
        url: &str,
    ) -> Result<String, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }

        let (peer, bot) = self.resolve_bot(bot_username).await?;

        let request = tl::functions::messages::RequestWebView {
            from_bot_menu: false,
            silent: false,
            compact: false,
            fullscreen: false,
            peer,
            bot,
            url: Some(url.to_owned()),
            start_param: None,
            theme_params: None,
            platform: WEB_VIEW_PLATFORM.to_owned(),
            reply_to: None,
            send_as: None,
        };

        match self.client.invoke(&request).await? {
            tl::enums::WebViewResult::Url(result) => {
                debug!("Web view opened for @{}", bot_username);
                Ok(result.url)
            }
            #[allow(unreachable_patterns)]
            _ => Err(TelegramError::UnexpectedWebView),
        }
    }

    /// Resolves a bot username into the input peer and input user a web view
    /// request needs.
    async fn resolve_bot(
        &self,
        username: &str,
    ) -> Result<(tl::enums::InputPeer, tl::enums::InputUser), TelegramError> {
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_owned(),
            referer: None,
        };

        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = self.client.invoke(&request).await?;

        resolved
            .users
            .into_iter()
            .find_map(|user| match user {
                tl::enums::User::User(user) if user.bot => {
                    let access_hash = user.access_hash.unwrap_or_default();
                    Some((
                        tl::types::InputPeerUser {
                            user_id: user.id,
                            access_hash,
                        }
                        .into(),
                        tl::types::InputUser {
                            user_id: user.id,
                            access_hash,
                        }
                        .into(),
                    ))
                }
                _ => None,
            })
            .ok_or_else(|| TelegramError::PeerNotFound(username.to_owned()))
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        debug!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}
