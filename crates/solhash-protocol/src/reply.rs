// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolHash.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Typed device replies.
//!
//! Firmware versions disagree on the reply envelope. Older ones wrap the status in
//! a list (`{"STATUS":[{"STATUS":"S","Msg":..}],"SUMMARY":[..]}`), newer ones use a
//! flat object (`{"STATUS":"S","Code":131,"Msg":..}`). Both are accepted here and
//! nothing past this module looks at raw JSON.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Reply code the firmware uses for "accepted, no immediate reply"
pub const NO_REPLY_CODE: i64 = 131;

/// Result of a read that may legitimately get no reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Data(T),
    /// Device accepted the connection but never answered (mid-restart)
    NoData,
}

impl<T> Reply<T> {
    pub fn data(self) -> Option<T> {
        match self {
            Self::Data(value) => Some(value),
            Self::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// Classified reply status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Success,
    Error,
    /// Anything else, treated as failure
    Unknown(String),
}

impl ReplyStatus {
    pub fn classify(code: &str) -> Self {
        match code {
            "S" => Self::Success,
            "E" => Self::Error,
            other => Self::Unknown(other.to_owned()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Unknown(code) if code.is_empty() => write!(f, "unknown"),
            Self::Unknown(code) => write!(f, "unknown '{code}'"),
        }
    }
}

/// Status envelope fields, whichever shape they came in
#[derive(Debug, Clone, PartialEq)]
struct Envelope {
    status: ReplyStatus,
    code: Option<i64>,
    message: Option<String>,
}

fn envelope(value: &Value) -> Envelope {
    let (holder, status) = match value.get("STATUS") {
        Some(Value::Array(items)) => match items.first() {
            Some(first) => (
                first,
                first
                    .get("STATUS")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            ),
            None => (value, ""),
        },
        Some(Value::String(status)) => (value, status.as_str()),
        _ => (value, ""),
    };

    Envelope {
        status: ReplyStatus::classify(status),
        code: holder.get("Code").and_then(as_i64),
        message: holder.get("Msg").and_then(Value::as_str).map(str::to_owned),
    }
}

/// Reply to a privileged command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub status: ReplyStatus,
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl CommandReply {
    pub fn from_value(value: &Value) -> Self {
        let Envelope {
            status,
            code,
            message,
        } = envelope(value);
        Self {
            status,
            code,
            message,
        }
    }

    /// Stand-in for a command the device accepted without answering
    pub fn no_reply() -> Self {
        Self {
            status: ReplyStatus::Success,
            code: Some(NO_REPLY_CODE),
            message: Some("No immediate reply (device may be restarting)".to_owned()),
        }
    }

    pub fn is_no_reply(&self) -> bool {
        self.code == Some(NO_REPLY_CODE)
    }
}

/// `get_token` challenge
#[derive(Clone, PartialEq, Eq)]
pub struct TokenReply {
    pub salt: String,
    pub time: String,
    pub new_salt: Option<String>,
}

impl fmt::Debug for TokenReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenReply")
            .field("time", &self.time)
            .field("salt", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TokenReply {
    pub fn parse(value: &Value) -> ProtocolResult<Self> {
        let env = envelope(value);
        if env.status == ReplyStatus::Error {
            return Err(ProtocolError::Token(
                env.message
                    .unwrap_or_else(|| "device refused token request".to_owned()),
            ));
        }

        let msg = value
            .get("Msg")
            .and_then(Value::as_object)
            .ok_or_else(|| ProtocolError::Token("reply has no Msg object".to_owned()))?;

        let salt = msg
            .get("salt")
            .and_then(as_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::Token("reply has no salt".to_owned()))?;
        let time = msg
            .get("time")
            .and_then(as_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::Token("reply has no time".to_owned()))?;

        Ok(Self {
            salt,
            time,
            new_salt: msg.get("newsalt").and_then(as_string),
        })
    }
}

/// Reply to `summary`
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReply {
    pub status: ReplyStatus,
    pub item: SummaryItem,
}

impl SummaryReply {
    pub fn parse(value: &Value) -> ProtocolResult<Self> {
        let env = envelope(value);
        if env.status == ReplyStatus::Error {
            return Err(ProtocolError::CommandRejected {
                command: "summary".to_owned(),
                status: env.status.to_string(),
                message: env.message.unwrap_or_default(),
            });
        }

        let fields = match value.get("SUMMARY") {
            Some(Value::Array(items)) => items.first().and_then(Value::as_object),
            _ => value.get("Msg").and_then(Value::as_object),
        }
        .ok_or_else(|| ProtocolError::MalformedReply("summary reply has no SUMMARY item".to_owned()))?;

        Ok(Self {
            status: env.status,
            item: SummaryItem::from_fields(fields),
        })
    }
}

const THS_KEYS: [&str; 4] = ["THS 5s", "THS av", "TH/s", "THS"];
const GHS_KEYS: [&str; 4] = ["GHS 5s", "GHS av", "GH/s", "GHS"];
const MHS_KEYS: [&str; 7] = ["MHS 5s", "MHS av", "MH/s", "MHS", "MHS 1m", "MHS 5m", "MHS 15m"];

/// Fields of one `SUMMARY` entry. Every field is optional; unparsable values are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryItem {
    pub power_w: Option<f64>,
    pub power_limit_w: Option<u32>,
    pub is_mining: Option<bool>,
    pub hashrate_ths: Option<f64>,
    pub temperature_c: Option<f64>,
    pub elapsed_secs: Option<u64>,
}

impl SummaryItem {
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            power_w: fields.get("Power").and_then(as_f64),
            power_limit_w: fields
                .get("Power Limit")
                .and_then(as_i64)
                .and_then(|v| u32::try_from(v).ok()),
            is_mining: fields.get("is_mining").and_then(as_bool),
            hashrate_ths: hashrate_ths(fields),
            temperature_c: fields.get("Temperature").and_then(as_f64),
            elapsed_secs: fields
                .get("Elapsed")
                .and_then(as_i64)
                .and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// W/TH, when both power and a positive hashrate are known
    pub fn efficiency_w_per_th(&self) -> Option<f64> {
        match (self.power_w, self.hashrate_ths) {
            (Some(power), Some(hashrate)) if hashrate > 0.0 => Some(power / hashrate),
            _ => None,
        }
    }

    /// Explicit flag when reported, otherwise a positive hashrate
    pub fn mining(&self) -> bool {
        self.is_mining
            .unwrap_or_else(|| self.hashrate_ths.is_some_and(|h| h > 0.0))
    }
}

/// Hashrate in TH/s from the first parsable field of the highest magnitude family.
/// A negative reading yields `None`.
fn hashrate_ths(fields: &Map<String, Value>) -> Option<f64> {
    let families: [(&[&str], f64); 3] = [
        (&THS_KEYS, 1.0),
        (&GHS_KEYS, 1_000.0),
        (&MHS_KEYS, 1_000_000.0),
    ];

    for (keys, divisor) in families {
        for key in keys {
            if let Some(value) = fields.get(*key).and_then(as_f64) {
                return (value >= 0.0).then(|| value / divisor);
            }
        }
    }
    None
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_list_shape() {
        let reply = CommandReply::from_value(&json!({
            "STATUS": [{"STATUS": "E", "Msg": "invalid cmd", "Code": 14}]
        }));
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.code, Some(14));
        assert_eq!(reply.message.as_deref(), Some("invalid cmd"));
    }

    #[test]
    fn test_status_flat_shape() {
        let reply = CommandReply::from_value(&json!({"STATUS": "S", "Code": 131, "Msg": "ok"}));
        assert!(reply.status.is_success());
        assert!(reply.is_no_reply());
    }

    #[test]
    fn test_unknown_status_is_not_success() {
        let reply = CommandReply::from_value(&json!({"STATUS": "W", "Msg": "hmm"}));
        assert_eq!(reply.status, ReplyStatus::Unknown("W".to_owned()));
        assert!(!reply.status.is_success());

        let missing = CommandReply::from_value(&json!({"Msg": "no status"}));
        assert!(!missing.status.is_success());
    }

    #[test]
    fn test_token_parse() {
        let token = TokenReply::parse(&json!({
            "STATUS": "S",
            "When": 1_700_000_000,
            "Code": 134,
            "Msg": {"time": "4178", "salt": "BQ5hoXV9", "newsalt": "dlmS9Oss"}
        }))
        .unwrap();
        assert_eq!(token.salt, "BQ5hoXV9");
        assert_eq!(token.time, "4178");
        assert_eq!(token.new_salt.as_deref(), Some("dlmS9Oss"));
        assert!(!format!("{token:?}").contains("BQ5hoXV9"));
    }

    #[test]
    fn test_token_missing_fields() {
        assert!(matches!(
            TokenReply::parse(&json!({"STATUS": "S"})),
            Err(ProtocolError::Token(_))
        ));
        assert!(matches!(
            TokenReply::parse(&json!({"STATUS": "S", "Msg": {"time": "1"}})),
            Err(ProtocolError::Token(_))
        ));
        assert!(matches!(
            TokenReply::parse(&json!({"STATUS": "E", "Msg": "over max connect"})),
            Err(ProtocolError::Token(_))
        ));
    }

    #[test]
    fn test_summary_list_shape() {
        let summary = SummaryReply::parse(&json!({
            "STATUS": [{"STATUS": "S", "Msg": "Summary"}],
            "SUMMARY": [{
                "Elapsed": 3600,
                "MHS av": 98_000_000.0,
                "Power": 3250,
                "Power Limit": 3600,
                "Temperature": 71.5,
                "is_mining": true
            }]
        }))
        .unwrap();

        let item = summary.item;
        assert_eq!(item.power_w, Some(3250.0));
        assert_eq!(item.power_limit_w, Some(3600));
        assert_eq!(item.hashrate_ths, Some(98.0));
        assert_eq!(item.elapsed_secs, Some(3600));
        assert!(item.mining());
        let efficiency = item.efficiency_w_per_th().unwrap();
        assert!((efficiency - 3250.0 / 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_flat_shape_with_string_numbers() {
        let summary = SummaryReply::parse(&json!({
            "STATUS": "S",
            "Msg": {"Power": "1200", "Power Limit": "2400", "GHS av": "55000"}
        }))
        .unwrap();
        assert_eq!(summary.item.power_limit_w, Some(2400));
        assert_eq!(summary.item.hashrate_ths, Some(55.0));
        assert!(summary.item.mining());
    }

    #[test]
    fn test_summary_without_item_is_malformed() {
        assert!(matches!(
            SummaryReply::parse(&json!({"STATUS": [{"STATUS": "S"}], "SUMMARY": []})),
            Err(ProtocolError::MalformedReply(_))
        ));
    }

    #[test]
    fn test_hashrate_derivation_failures_are_none() {
        let mut fields = Map::new();
        fields.insert("THS av".to_owned(), json!(-1.0));
        fields.insert("Power".to_owned(), json!("n/a"));
        let item = SummaryItem::from_fields(&fields);
        assert_eq!(item.hashrate_ths, None);
        assert_eq!(item.power_w, None);
        assert_eq!(item.efficiency_w_per_th(), None);
        assert!(!item.mining());
    }

    #[test]
    fn test_unparsable_hashrate_falls_through_to_next_key() {
        let mut fields = Map::new();
        fields.insert("THS 5s".to_owned(), json!("bad"));
        fields.insert("THS av".to_owned(), json!(101.5));
        assert_eq!(SummaryItem::from_fields(&fields).hashrate_ths, Some(101.5));
    }

    #[test]
    fn test_explicit_mining_flag_wins() {
        let mut fields = Map::new();
        fields.insert("THS av".to_owned(), json!(90.0));
        fields.insert("is_mining".to_owned(), json!(false));
        assert!(!SummaryItem::from_fields(&fields).mining());
    }
}
