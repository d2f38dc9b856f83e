//! Per-client command queue.
//!
//! A command is enqueued by the controller, delivered to the terminal
//! on its next poll, and acknowledged once executed. Delivery is
//! at-least-once: `next_command` keeps returning the same command
//! until it is acknowledged, and a client never sees command N+1
//! while command N is unacknowledged. Acknowledged commands stay in
//! the list as history.
//!
//! Status is monotonic: queued → sent → ack.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use bridge_common::{ActionCode, Side};

use crate::state::BridgeState;

/// Lifecycle of a command. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Queued,
    Sent,
    Ack,
}

/// A stored command, alive for the process lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub cmd_id: String,
    /// Client key this command targets.
    pub id: String,
    pub state: ActionCode,
    pub payload: Map<String, Value>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Outcome of an acknowledge call. `ok=false` with
/// `error="cmd_not_found"` is a reported condition, not a fault.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cmd_id: String,
}

impl AckOutcome {
    fn acknowledged(cmd_id: &str) -> Self {
        Self {
            ok: true,
            error: None,
            cmd_id: cmd_id.to_string(),
        }
    }

    fn not_found(cmd_id: &str) -> Self {
        Self {
            ok: false,
            error: Some("cmd_not_found".to_string()),
            cmd_id: cmd_id.to_string(),
        }
    }
}

/// What a stored command means, with its recognized parameters
/// extracted. Unrecognized payload keys are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    NoOp,
    Open {
        side: Side,
        symbol: Option<String>,
        volume: Option<Decimal>,
        comment: Option<String>,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        sl_pips: Option<i64>,
        tp_pips: Option<i64>,
    },
    Close {
        ticket: Option<i64>,
        symbol: Option<String>,
        volume: Option<Decimal>,
        side: Option<Side>,
    },
}

impl Directive {
    /// Build the directive for an action code from stored parameters.
    pub fn from_parts(action: ActionCode, payload: &Map<String, Value>) -> Self {
        match action {
            ActionCode::NoOp => Directive::NoOp,
            ActionCode::OpenLong | ActionCode::OpenShort => Directive::Open {
                side: if action == ActionCode::OpenLong {
                    Side::Buy
                } else {
                    Side::Sell
                },
                symbol: param_str(payload, "symbol"),
                volume: param_decimal(payload, "volume"),
                comment: param_str(payload, "comment"),
                sl: param_decimal(payload, "sl"),
                tp: param_decimal(payload, "tp"),
                sl_pips: param_i64(payload, "slPips"),
                tp_pips: param_i64(payload, "tpPips"),
            },
            ActionCode::Close => Directive::Close {
                ticket: param_i64(payload, "ticket"),
                symbol: param_str(payload, "symbol"),
                volume: param_decimal(payload, "volume"),
                side: param_i64(payload, "type")
                    .and_then(|v| u8::try_from(v).ok())
                    .and_then(|v| Side::try_from(v).ok()),
            },
        }
    }

    pub fn action_code(&self) -> ActionCode {
        match self {
            Directive::NoOp => ActionCode::NoOp,
            Directive::Open {
                side: Side::Buy, ..
            } => ActionCode::OpenLong,
            Directive::Open {
                side: Side::Sell, ..
            } => ActionCode::OpenShort,
            Directive::Close { .. } => ActionCode::Close,
        }
    }
}

/// Flat wire message delivered to a polling terminal. Optional fields
/// are present only when the action code uses them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub id: String,
    pub state: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_pips: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_pips: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub side: Option<u8>,
}

impl CommandMessage {
    /// The "nothing to do" message returned when the queue is empty.
    pub fn noop(client: &str) -> Self {
        Self {
            id: client.to_string(),
            state: ActionCode::NoOp.code(),
            cmd_id: None,
            symbol: None,
            volume: None,
            comment: None,
            sl: None,
            tp: None,
            sl_pips: None,
            tp_pips: None,
            ticket: None,
            side: None,
        }
    }

    fn from_directive(client: &str, cmd_id: &str, directive: Directive) -> Self {
        let mut msg = Self::noop(client);
        msg.state = directive.action_code().code();
        msg.cmd_id = Some(cmd_id.to_string());
        match directive {
            Directive::NoOp => {}
            Directive::Open {
                symbol,
                volume,
                comment,
                sl,
                tp,
                sl_pips,
                tp_pips,
                ..
            } => {
                msg.symbol = symbol;
                msg.volume = volume;
                msg.comment = comment;
                msg.sl = sl;
                msg.tp = tp;
                msg.sl_pips = sl_pips;
                msg.tp_pips = tp_pips;
            }
            Directive::Close {
                ticket,
                symbol,
                volume,
                side,
            } => {
                msg.ticket = ticket;
                msg.symbol = symbol;
                msg.volume = volume;
                msg.side = side.map(u8::from);
            }
        }
        msg
    }
}

impl BridgeState {
    /// Append a new command for `client`. Returns the stored record.
    pub fn enqueue_command(
        &self,
        client: &str,
        action: ActionCode,
        payload: Map<String, Value>,
    ) -> Command {
        let now = Utc::now();
        let cmd = Command {
            cmd_id: Uuid::new_v4().to_string(),
            id: client.to_string(),
            state: action,
            payload,
            status: CommandStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
        };
        self.with_commands(client, |queue| {
            queue.push(cmd.clone());
        });
        cmd
    }

    /// The next undelivered-or-unacknowledged command as a wire
    /// message, or a no-op when none is pending.
    ///
    /// Scans in insertion order and returns the first command whose
    /// status is not `ack`. A queued command transitions to sent on
    /// its first retrieval only; retries before the ack return the
    /// same command unchanged.
    pub fn next_command(&self, client: &str) -> CommandMessage {
        self.with_commands(client, |queue| {
            for cmd in queue.iter_mut() {
                if cmd.status == CommandStatus::Ack {
                    continue;
                }
                if cmd.status == CommandStatus::Queued {
                    cmd.status = CommandStatus::Sent;
                    cmd.updated_at = Utc::now();
                }
                let directive = Directive::from_parts(cmd.state, &cmd.payload);
                return CommandMessage::from_directive(client, &cmd.cmd_id, directive);
            }
            CommandMessage::noop(client)
        })
    }

    /// Mark a command acknowledged and attach the result. Idempotent:
    /// a repeated ack overwrites the result with the latest call's
    /// data. An unknown id yields a `cmd_not_found` outcome.
    pub fn acknowledge(
        &self,
        client: &str,
        cmd_id: &str,
        success: bool,
        details: Map<String, Value>,
    ) -> AckOutcome {
        self.with_commands(client, |queue| {
            for cmd in queue.iter_mut() {
                if cmd.cmd_id == cmd_id {
                    cmd.status = CommandStatus::Ack;
                    cmd.updated_at = Utc::now();
                    let mut result = Map::new();
                    result.insert("success".to_string(), Value::Bool(success));
                    for (k, v) in details {
                        result.insert(k, v);
                    }
                    cmd.result = Some(Value::Object(result));
                    return AckOutcome::acknowledged(cmd_id);
                }
            }
            AckOutcome::not_found(cmd_id)
        })
    }

    /// Copy of the full command list for a client, all statuses.
    pub fn command_history(&self, client: &str) -> Vec<Command> {
        self.with_commands(client, |queue| queue.clone())
    }
}

fn param_str(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    })
}

fn param_decimal(payload: &Map<String, Value>, key: &str) -> Option<Decimal> {
    payload.get(key).and_then(|v| match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(|f| Decimal::try_from(f).ok())
            }
        }
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn param_i64(payload: &Map<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}
