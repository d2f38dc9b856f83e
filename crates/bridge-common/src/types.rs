//! Common wire enums.
//!
//! Both wire formats in this system tag things with small integers:
//! terminal clients receive an action code 0..3, and the venue API
//! encodes order sides and types as integers. These enums keep the
//! integer representation on the wire while the rest of the code works
//! with named variants.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a wire integer does not map to a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} code: {value}")]
pub struct InvalidWireCode {
    pub kind: &'static str,
    pub value: i64,
}

/// Trade action requested of a terminal client.
///
/// Wire values: 0 = no-op, 1 = open long, 2 = open short, 3 = close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ActionCode {
    #[default]
    NoOp,
    OpenLong,
    OpenShort,
    Close,
}

impl ActionCode {
    /// Wire representation of this action.
    pub fn code(self) -> u8 {
        match self {
            ActionCode::NoOp => 0,
            ActionCode::OpenLong => 1,
            ActionCode::OpenShort => 2,
            ActionCode::Close => 3,
        }
    }
}

impl From<ActionCode> for u8 {
    fn from(a: ActionCode) -> u8 {
        a.code()
    }
}

impl TryFrom<u8> for ActionCode {
    type Error = InvalidWireCode;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ActionCode::NoOp),
            1 => Ok(ActionCode::OpenLong),
            2 => Ok(ActionCode::OpenShort),
            3 => Ok(ActionCode::Close),
            _ => Err(InvalidWireCode {
                kind: "action",
                value: v as i64,
            }),
        }
    }
}

impl std::fmt::Display for ActionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionCode::NoOp => write!(f, "noop"),
            ActionCode::OpenLong => write!(f, "open_long"),
            ActionCode::OpenShort => write!(f, "open_short"),
            ActionCode::Close => write!(f, "close"),
        }
    }
}

/// Position/order side. Wire values: 0 = buy, 1 = sell.
///
/// The same numbering is used by the terminal's close-side filter and
/// by the venue's order API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposing side, used for closing orders and bracket legs.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl From<Side> for u8 {
    fn from(s: Side) -> u8 {
        match s {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = InvalidWireCode;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Side::Buy),
            1 => Ok(Side::Sell),
            _ => Err(InvalidWireCode {
                kind: "side",
                value: v as i64,
            }),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Venue order type. Wire values per the venue's order API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
}

impl From<OrderType> for u8 {
    fn from(t: OrderType) -> u8 {
        match t {
            OrderType::Limit => 1,
            OrderType::Market => 2,
            OrderType::Stop => 4,
        }
    }
}

impl TryFrom<u8> for OrderType {
    type Error = InvalidWireCode;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(OrderType::Limit),
            2 => Ok(OrderType::Market),
            4 => Ok(OrderType::Stop),
            _ => Err(InvalidWireCode {
                kind: "order type",
                value: v as i64,
            }),
        }
    }
}

/// Current time as an ISO-8601 UTC string with second precision,
/// e.g. `2026-08-30T12:34:56+00:00`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_code_round_trip() {
        for code in 0u8..=3 {
            let action = ActionCode::try_from(code).unwrap();
            assert_eq!(action.code(), code);
        }
        assert!(ActionCode::try_from(4).is_err());
    }

    #[test]
    fn action_code_serde_as_integer() {
        let json = serde_json::to_string(&ActionCode::OpenShort).unwrap();
        assert_eq!(json, "2");
        let back: ActionCode = serde_json::from_str("3").unwrap();
        assert_eq!(back, ActionCode::Close);
        assert!(serde_json::from_str::<ActionCode>("7").is_err());
    }

    #[test]
    fn side_codes_match_wire_contract() {
        assert_eq!(u8::from(Side::Buy), 0);
        assert_eq!(u8::from(Side::Sell), 1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn order_type_codes() {
        assert_eq!(u8::from(OrderType::Market), 2);
        assert_eq!(OrderType::try_from(4).unwrap(), OrderType::Stop);
        assert!(OrderType::try_from(3).is_err());
    }

    #[test]
    fn now_iso_has_offset_suffix() {
        let ts = now_iso();
        assert!(ts.ends_with("+00:00"), "unexpected timestamp: {ts}");
    }
}
