//! HTTP client for the game backend.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace};

use super::types::{
    Balances, BuyUpgradeRequest, BuyUpgradeResponse, Collected, IpInfo, LoginResponse,
    MinerStorage, MinerUpgrades,
};

/// Endpoint used for the optional connectivity check.
const IP_INFO_URL: &str = "https://ipinfo.io/json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by the game backend client.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Login rejected, no access token in response: {0}")]
    MissingToken(String),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl GameError {
    /// Whether repeating the same request may succeed.
    ///
    /// Transport failures, error statuses and malformed bodies are retried;
    /// an explicit refusal from the game is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingToken(_) | Self::Rejected { .. })
    }
}

/// The calls the task loop makes against the game.
pub trait GameApi {
    /// Exchanges Telegram init data for a bearer token.
    fn login(&self, init_data: &str) -> impl Future<Output = Result<String, GameError>> + Send;

    /// Attaches the bearer token to subsequent requests.
    fn authorize(&mut self, token: &str);

    /// Drops the bearer token.
    fn clear_authorization(&mut self);

    /// Reads the uncollected miner storage.
    fn miner_storage(&self) -> impl Future<Output = Result<MinerStorage, GameError>> + Send;

    /// Moves the miner storage into the wallet.
    fn collect(&self) -> impl Future<Output = Result<Collected, GameError>> + Send;

    /// Reads the GOLT wallet balance.
    fn golt_balance(&self) -> impl Future<Output = Result<f64, GameError>> + Send;

    /// Lists the available miner upgrades.
    fn upgrades(&self) -> impl Future<Output = Result<MinerUpgrades, GameError>> + Send;

    /// Buys the next pickaxe level, returning the new level if reported.
    fn buy_pickaxe(&self) -> impl Future<Output = Result<Option<u32>, GameError>> + Send;

    /// Checks outbound connectivity.
    fn check_connectivity(&self) -> impl Future<Output = Result<IpInfo, GameError>> + Send;
}

/// reqwest-backed [`GameApi`] implementation.
#[derive(Debug, Clone)]
pub struct GameClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GameClient {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, GameError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://lumcity.app"));
        headers.insert(header::REFERER, HeaderValue::from_static("https://lumcity.app/"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: None,
        })
    }

    /// Whether a bearer token is currently attached.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.get(self.endpoint(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.post(self.endpoint(path)))
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Fails on error statuses, then decodes the body as JSON.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<(StatusCode, T), GameError> {
    let response = response.error_for_status()?;
    let status = response.status();
    let body = response.text().await?;
    trace!("{} body: {}", status, body);
    Ok((status, serde_json::from_str(&body)?))
}

/// Reads the bearer token out of a `/jwt/token` body.
fn token_from(body: String) -> Result<String, GameError> {
    let parsed: LoginResponse = serde_json::from_str(&body)?;
    parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(GameError::MissingToken(body))
}

/// Only `201 Created` means the storage was moved.
fn collected_from(status: StatusCode, body: String) -> Result<Collected, GameError> {
    if status != StatusCode::CREATED {
        return Err(GameError::Rejected { status, body });
    }
    Ok(serde_json::from_str(&body)?)
}

/// A purchase counts only with `201 Created` and `"success": true`.
fn pickaxe_from(status: StatusCode, body: String) -> Result<Option<u32>, GameError> {
    if status == StatusCode::CREATED
        && let Ok(parsed) = serde_json::from_str::<BuyUpgradeResponse>(&body)
        && parsed.success
    {
        return Ok(parsed.pickaxe_level);
    }
    Err(GameError::Rejected { status, body })
}

impl GameApi for GameClient {
    async fn login(&self, init_data: &str) -> Result<String, GameError> {
        let url = format!("{}?{}", self.endpoint("/jwt/token"), init_data);
        let response = self.http.get(url).send().await?.error_for_status()?;
        token_from(response.text().await?)
    }

    fn authorize(&mut self, token: &str) {
        self.token = Some(token.to_owned());
    }

    fn clear_authorization(&mut self) {
        self.token = None;
    }

    async fn miner_storage(&self) -> Result<MinerStorage, GameError> {
        let response = self.get("/miner/storage/balance/").send().await?;
        Ok(read_json(response).await?.1)
    }

    async fn collect(&self) -> Result<Collected, GameError> {
        let response = self
            .post("/miner/")
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        let status = response.status();
        collected_from(status, response.text().await?)
    }

    async fn golt_balance(&self) -> Result<f64, GameError> {
        let response = self.get("/balance/all").send().await?;
        let (_, balances): (_, Balances) = read_json(response).await?;
        balances
            .golt()
            .ok_or_else(|| GameError::Unexpected("no GOLT entry in /balance/all".to_owned()))
    }

    async fn upgrades(&self) -> Result<MinerUpgrades, GameError> {
        let response = self.get("/miner-upgrades/all-upgrades").send().await?;
        Ok(read_json(response).await?.1)
    }

    async fn buy_pickaxe(&self) -> Result<Option<u32>, GameError> {
        let response = self
            .post("/miner-upgrades/buy")
            .json(&BuyUpgradeRequest::PICKAXE)
            .send()
            .await?
            .error_for_status()?;

        let status = response.status();
        let level = pickaxe_from(status, response.text().await?)?;
        debug!("Pickaxe bought, level {:?}", level);
        Ok(level)
    }

    async fn check_connectivity(&self) -> Result<IpInfo, GameError> {
        let response = self
            .http
            .get(IP_INFO_URL)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await?;
        Ok(read_json(response).await?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = GameClient::new("https://back.example/").unwrap();
        assert_eq!(client.endpoint("/balance/all"), "https://back.example/balance/all");
    }

    #[test]
    fn test_authorize_and_clear() {
        let mut client = GameClient::new("https://back.example").unwrap();
        assert!(!client.is_authorized());
        client.authorize("jwt");
        assert!(client.is_authorized());
        client.clear_authorization();
        assert!(!client.is_authorized());
    }

    #[test]
    fn test_rejections_are_not_retryable() {
        assert!(!GameError::MissingToken("{}".to_owned()).is_retryable());
        assert!(
            !GameError::Rejected {
                status: StatusCode::OK,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(GameError::Unexpected("x".to_owned()).is_retryable());
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(GameError::Decode(decode).is_retryable());
    }

    #[test]
    fn test_login_body_classification() {
        assert_eq!(token_from(r#"{"accessToken":"jwt"}"#.to_owned()).unwrap(), "jwt");
        assert!(matches!(
            token_from(r#"{"message":"bad hash"}"#.to_owned()),
            Err(GameError::MissingToken(body)) if body.contains("bad hash")
        ));
        assert!(matches!(
            token_from(r#"{"accessToken":""}"#.to_owned()),
            Err(GameError::MissingToken(_))
        ));
        assert!(matches!(token_from("<html>".to_owned()), Err(GameError::Decode(_))));
    }

    #[test]
    fn test_collect_requires_created() {
        let collected = collected_from(StatusCode::CREATED, r#"{"storage":"0.75"}"#.to_owned()).unwrap();
        assert!((collected.storage - 0.75).abs() < f64::EPSILON);

        let err = collected_from(StatusCode::OK, r#"{"storage":"0.75"}"#.to_owned()).unwrap_err();
        assert!(matches!(err, GameError::Rejected { status, .. } if status == StatusCode::OK));
        assert!(!err.is_retryable());

        assert!(matches!(
            collected_from(StatusCode::CREATED, "{}".to_owned()),
            Err(GameError::Decode(_))
        ));
    }

    #[test]
    fn test_pickaxe_purchase_classification() {
        assert_eq!(
            pickaxe_from(StatusCode::CREATED, r#"{"success":true,"pickaxeLevel":4}"#.to_owned()).unwrap(),
            Some(4)
        );
        assert_eq!(
            pickaxe_from(StatusCode::CREATED, r#"{"success":true}"#.to_owned()).unwrap(),
            None
        );
        assert!(matches!(
            pickaxe_from(StatusCode::CREATED, r#"{"success":false}"#.to_owned()),
            Err(GameError::Rejected { status, .. }) if status == StatusCode::CREATED
        ));
        assert!(matches!(
            pickaxe_from(StatusCode::OK, r#"{"success":true,"pickaxeLevel":4}"#.to_owned()),
            Err(GameError::Rejected { status, .. }) if status == StatusCode::OK
        ));
        assert!(matches!(
            pickaxe_from(StatusCode::CREATED, "not json".to_owned()),
            Err(GameError::Rejected { .. })
        ));
    }
}
