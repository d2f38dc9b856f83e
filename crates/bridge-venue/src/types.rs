//! Request and response bodies for the venue API.
//!
//! All bodies are camelCase JSON. Responses share the
//! `{success, errorCode, errorMessage}` envelope; list fields default
//! to empty so a terse error response still deserializes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bridge_common::{OrderType, Side};

/// `POST /api/Auth/loginKey` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_name: String,
    pub api_key: String,
}

/// `POST /api/Auth/loginKey` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `POST /api/Account/search` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearchRequest {
    pub only_active_accounts: bool,
}

/// `POST /api/Account/search` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearchResponse {
    pub success: bool,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub accounts: Vec<VenueAccount>,
}

/// One account descriptor from the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueAccount {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub is_visible: bool,
    #[serde(default)]
    pub simulated: bool,
}

/// `POST /api/Position/searchOpen` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSearchRequest {
    pub account_id: i64,
}

/// `POST /api/Position/searchOpen` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSearchResponse {
    pub success: bool,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub positions: Vec<VenuePosition>,
}

/// One open position as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenuePosition {
    pub id: i64,
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    /// Position direction: 0 = long, 1 = short.
    #[serde(rename = "type", default)]
    pub position_type: i32,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub average_price: Option<Decimal>,
}

/// A bracket leg attached to an order (take-profit limit or
/// stop-loss stop).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketLeg {
    /// "Buy" or "Sell".
    pub action: &'static str,
    /// "Limit" or "Stop".
    pub order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
}

impl BracketLeg {
    /// Take-profit leg: a limit order on the opposing side.
    pub fn take_profit(entry_side: Side, price: Decimal) -> Self {
        Self {
            action: side_action(entry_side.opposite()),
            order_type: "Limit",
            price: Some(price),
            stop_price: None,
        }
    }

    /// Stop-loss leg: a stop order on the opposing side.
    pub fn stop_loss(entry_side: Side, stop_price: Decimal) -> Self {
        Self {
            action: side_action(entry_side.opposite()),
            order_type: "Stop",
            price: None,
            stop_price: Some(stop_price),
        }
    }
}

fn side_action(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

/// `POST /api/Order/place` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaceRequest {
    pub account_id: i64,
    pub contract_id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: Side,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket1: Option<BracketLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket2: Option<BracketLeg>,
}

impl OrderPlaceRequest {
    /// Market order with no brackets.
    pub fn market(account_id: i64, contract_id: impl Into<String>, side: Side, size: i64) -> Self {
        Self {
            account_id,
            contract_id: contract_id.into(),
            order_type: OrderType::Market,
            side,
            size,
            limit_price: None,
            stop_price: None,
            bracket1: None,
            bracket2: None,
        }
    }

    /// Attach take-profit and stop-loss brackets relative to the
    /// entry side.
    pub fn with_brackets(mut self, tp: Option<Decimal>, sl: Option<Decimal>) -> Self {
        self.bracket1 = tp.map(|p| BracketLeg::take_profit(self.side, p));
        self.bracket2 = sl.map(|p| BracketLeg::stop_loss(self.side, p));
        self
    }
}

/// `POST /api/Order/place` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaceResponse {
    pub success: bool,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `POST /api/Position/closeContract` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseContractRequest {
    pub account_id: i64,
    pub contract_id: String,
}

/// `POST /api/Position/partialCloseContract` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialCloseContractRequest {
    pub account_id: i64,
    pub contract_id: String,
    pub size: i64,
}

/// Bare success envelope for calls with no payload of their own.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueResponse {
    pub success: bool,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}
