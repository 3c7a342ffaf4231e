//! Mini-app launch URL handling.
//!
//! Telegram hands the signed auth payload to a mini-app inside the URL
//! fragment: `https://app/#tgWebAppData=<encoded>&tgWebAppVersion=7.x&...`.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Fragment key carrying the signed init data.
const WEB_APP_DATA_KEY: &str = "tgWebAppData";

/// Errors while extracting the auth payload from a launch URL.
#[derive(Debug, Error)]
pub enum WebAppError {
    #[error("Invalid launch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Launch URL has no tgWebAppData parameter")]
    MissingWebAppData,

    #[error("Init data has no user field")]
    MissingUser,

    #[error("Invalid user JSON in init data: {0}")]
    InvalidUser(#[from] serde_json::Error),
}

/// The `user` object embedded in the init data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebAppUser {
    pub id: i64,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub username: Option<String>,
}

/// Extracts the init data query string from a mini-app launch URL.
///
/// The value comes back decoded once, so it is itself a valid query string
/// (`query_id=...&user=%7B...%7D&auth_date=...&hash=...`).
///
/// # Errors
///
/// Returns an error if the URL does not parse or carries no non-empty
/// `tgWebAppData` value.
pub fn extract_init_data(launch_url: &str) -> Result<String, WebAppError> {
    let url = Url::parse(launch_url)?;

    // Older clients put the parameters in the query instead of the fragment.
    [url.fragment(), url.query()]
        .into_iter()
        .flatten()
        .flat_map(|part| url::form_urlencoded::parse(part.as_bytes()))
        .find(|(key, _)| key == WEB_APP_DATA_KEY)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(WebAppError::MissingWebAppData)
}

/// Parses the `user` field out of init data.
///
/// # Errors
///
/// Returns an error if the field is absent or is not valid user JSON.
pub fn init_data_user(init_data: &str) -> Result<WebAppUser, WebAppError> {
    let raw = url::form_urlencoded::parse(init_data.as_bytes())
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.into_owned())
        .ok_or(WebAppError::MissingUser)?;

    Ok(serde_json::from_str(&raw)?)
}
