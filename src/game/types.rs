//! Response bodies of the game backend.
//!
//! The backend is loose about numbers: amounts arrive as JSON numbers or as
//! decimal strings depending on the endpoint, so amounts go through
//! [`lenient_f64`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Index of the GOLT entry in `/balance/all`.
pub const GOLT_BALANCE_INDEX: usize = 1;

/// Smallest miner storage balance worth collecting.
pub const MIN_COLLECT_AMOUNT: f64 = 0.001;

/// `GET /jwt/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
}

/// `GET /miner/storage/balance/`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MinerStorage {
    #[serde(default, deserialize_with = "lenient_f64_opt")]
    pub balance: Option<f64>,
}

/// `POST /miner/` when the collect was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Collected {
    #[serde(deserialize_with = "lenient_f64")]
    pub storage: f64,
}

/// `GET /balance/all`.
#[derive(Debug, Clone, Deserialize)]
pub struct Balances {
    pub balances: Vec<TokenBalance>,
}

impl Balances {
    /// Amount of GOLT held, if the entry is present.
    #[must_use]
    pub fn golt(&self) -> Option<f64> {
        self.balances.get(GOLT_BALANCE_INDEX).and_then(|b| b.amount)
    }
}

/// One wallet entry; an unreadable amount is kept as `None` so it cannot
/// spoil the other entries.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBalance {
    #[serde(default, deserialize_with = "loose_f64")]
    pub amount: Option<f64>,
}

/// `GET /miner-upgrades/all-upgrades`.
#[derive(Debug, Clone, Deserialize)]
pub struct MinerUpgrades {
    #[serde(rename = "pickaxeUpgrade")]
    pub pickaxe: PickaxeUpgrade,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickaxeUpgrade {
    #[serde(rename = "priceGolt", deserialize_with = "lenient_f64")]
    pub price_golt: f64,
}

/// Body sent to `POST /miner-upgrades/buy`.
#[derive(Debug, Clone, Serialize)]
pub struct BuyUpgradeRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "tokenId")]
    pub token_id: u32,
}

impl BuyUpgradeRequest {
    pub const PICKAXE: Self = Self {
        kind: "pickaxe",
        token_id: 1,
    };
}

/// Response of `POST /miner-upgrades/buy`.
#[derive(Debug, Clone, Deserialize)]
pub struct BuyUpgradeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "pickaxeLevel", default, deserialize_with = "loose_level")]
    pub pickaxe_level: Option<u32>,
}

/// `GET https://ipinfo.io/json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid amount: {s:?}"))),
        }
    }
}

/// Deserializes an amount given either as a number or a numeric string.
pub fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    NumberOrString::deserialize(deserializer)?.into_f64()
}

fn lenient_f64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Option::<NumberOrString>::deserialize(deserializer)?
        .map(NumberOrString::into_f64)
        .transpose()
}

/// Like [`lenient_f64`], but anything unreadable becomes `None`.
fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts `4`, `4.0` or `"4"`; anything else is ignored.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::float_cmp)]
fn loose_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let level = loose_f64(deserializer)?;
    Ok(level
        .filter(|l| l.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(l))
        .map(|l| l as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amounts_accept_numbers_and_strings() {
        let storage: MinerStorage = serde_json::from_str(r#"{"balance":"0.0123"}"#).unwrap();
        assert_eq!(storage.balance, Some(0.0123));

        let storage: MinerStorage = serde_json::from_str(r#"{"balance":2}"#).unwrap();
        assert_eq!(storage.balance, Some(2.0));

        let storage: MinerStorage = serde_json::from_str(r#"{"other":1}"#).unwrap();
        assert_eq!(storage.balance, None);

        assert!(serde_json::from_str::<Collected>(r#"{"storage":"abc"}"#).is_err());
    }

    #[test]
    fn test_golt_is_second_balance() {
        let balances: Balances = serde_json::from_str(
            r#"{"balances":[{"symbol":"LUM","amount":"3"},{"symbol":"GOLT","amount":"12.5"}]}"#,
        )
        .unwrap();
        assert_eq!(balances.golt(), Some(12.5));

        let balances: Balances = serde_json::from_str(r#"{"balances":[{"amount":1}]}"#).unwrap();
        assert_eq!(balances.golt(), None);
    }

    #[test]
    fn test_malformed_first_balance_does_not_hide_golt() {
        let balances: Balances = serde_json::from_str(
            r#"{"balances":[{"amount":"n/a"},{"amount":"7.5"}]}"#,
        )
        .unwrap();
        assert_eq!(balances.golt(), Some(7.5));

        let balances: Balances =
            serde_json::from_str(r#"{"balances":[{},{"amount":null}]}"#).unwrap();
        assert_eq!(balances.golt(), None);
    }

    #[test]
    fn test_pickaxe_level_is_lenient() {
        let level = |body: &str| {
            serde_json::from_str::<BuyUpgradeResponse>(body)
                .unwrap()
                .pickaxe_level
        };
        assert_eq!(level(r#"{"success":true,"pickaxeLevel":"6"}"#), Some(6));
        assert_eq!(level(r#"{"success":true,"pickaxeLevel":6.0}"#), Some(6));
        assert_eq!(level(r#"{"success":true,"pickaxeLevel":"max"}"#), None);
        assert_eq!(level(r#"{"success":true,"pickaxeLevel":{"n":1}}"#), None);
        assert!(serde_json::from_str::<BuyUpgradeResponse>(r#"{"success":true,"pickaxeLevel":6.5}"#).unwrap().success);
    }

    #[test]
    fn test_upgrades_and_buy_bodies() {
        let upgrades: MinerUpgrades = serde_json::from_str(
            r#"{"pickaxeUpgrade":{"priceGolt":"40","level":3},"cartUpgrade":{}}"#,
        )
        .unwrap();
        assert!((upgrades.pickaxe.price_golt - 40.0).abs() < f64::EPSILON);

        let body = serde_json::to_value(BuyUpgradeRequest::PICKAXE).unwrap();
        assert_eq!(body, serde_json::json!({"type": "pickaxe", "tokenId": 1}));

        let resp: BuyUpgradeResponse =
            serde_json::from_str(r#"{"success":true,"pickaxeLevel":4}"#).unwrap();
        assert!(resp.success);
        assert_eq!(resp.pickaxe_level, Some(4));
    }

    #[test]
    fn test_login_response_without_token() {
        let resp: LoginResponse = serde_json::from_str(r#"{"message":"bad hash"}"#).unwrap();
        assert!(resp.access_token.is_none());
    }
}
