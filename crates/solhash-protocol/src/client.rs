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

use crate::crypt::md5_crypt;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{decode_reply, encode_request};
use crate::reply::{CommandReply, Reply, SummaryReply, TokenReply};
use crate::transport::{Exchange, TcpTransport, Transport};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default device API port
pub const DEFAULT_PORT: u16 = 4028;

/// Highest power limit the firmware accepts
const MAX_POWER_LIMIT_W: u32 = 99_999;

/// Commands after which the firmware may restart and drop the reply
const RESTARTING_COMMANDS: [&str; 3] = ["adjust_power_limit", "power_off", "power_on"];

/// Device protocol client.
///
/// Holds the device password only in memory; it is never logged and never sent
/// in plaintext. Every call opens a fresh connection through the transport.
pub struct DeviceClient<T: Transport = TcpTransport> {
    transport: T,
    password: Option<String>,
}

impl<T: Transport> fmt::Debug for DeviceClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("peer", &self.transport.peer())
            .field(
                "password",
                &if self.password.is_some() {
                    "<set>"
                } else {
                    "<missing>"
                },
            )
            .finish()
    }
}

impl DeviceClient<TcpTransport> {
    /// Client talking TCP to `host:port` with a per-step timeout
    pub fn tcp(
        host: impl AsRef<str>,
        port: u16,
        timeout: Duration,
        password: Option<String>,
    ) -> Self {
        Self::new(TcpTransport::new(host, port, timeout), password)
    }
}

impl<T: Transport> DeviceClient<T> {
    pub fn new(transport: T, password: Option<String>) -> Self {
        Self {
            transport,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    pub fn has_credential(&self) -> bool {
        self.password.is_some()
    }

    /// Plain read. Silence from the device is `Reply::NoData`, not an error.
    pub async fn read(&self, command: &str) -> ProtocolResult<Reply<Value>> {
        let request = encode_request(&json!({ "command": command }))?;
        match self.transport.exchange(&request).await? {
            Exchange::Reply(bytes) => match decode_reply(&bytes)? {
                Some(value) => Ok(Reply::Data(value)),
                None => Ok(Reply::NoData),
            },
            Exchange::NoReply => {
                debug!("No reply to '{}' from {}", command, self.peer());
                Ok(Reply::NoData)
            }
        }
    }

    pub async fn summary(&self) -> ProtocolResult<Reply<SummaryReply>> {
        match self.read("summary").await? {
            Reply::Data(value) => SummaryReply::parse(&value).map(Reply::Data),
            Reply::NoData => Ok(Reply::NoData),
        }
    }

    pub async fn version(&self) -> ProtocolResult<Reply<Value>> {
        self.read("get_version").await
    }

    /// Fetch the `{salt, time}` challenge. No reply is a hard error here.
    pub async fn token(&self) -> ProtocolResult<TokenReply> {
        match self.read("get_token").await? {
            Reply::Data(value) => TokenReply::parse(&value),
            Reply::NoData => Err(ProtocolError::Token("no reply to get_token".to_owned())),
        }
    }

    /// Send a privileged command.
    ///
    /// Any token failure aborts before the command is sent. A reply whose status is
    /// not success is returned as `ProtocolError::CommandRejected`.
    pub async fn authenticated_command(
        &self,
        command: &str,
        params: &[(&str, String)],
    ) -> ProtocolResult<CommandReply> {
        let password = self
            .password
            .as_deref()
            .ok_or(ProtocolError::MissingCredential)?;

        let token = self.token().await?;
        let credential = md5_crypt(password, &token.salt);

        let mut payload = Map::new();
        payload.insert("command".to_owned(), Value::from(command));
        payload.insert("enc".to_owned(), Value::from("1"));
        payload.insert("time".to_owned(), Value::from(token.time.clone()));
        for (key, value) in params {
            payload.insert((*key).to_owned(), Value::from(value.as_str()));
        }
        debug!(
            "🔐 Privileged payload: {}",
            serde_json::Value::Object(payload.clone())
        );
        payload.insert("enc_pwd".to_owned(), Value::from(credential));

        let request = encode_request(&Value::Object(payload))?;
        let reply = match self.transport.exchange(&request).await? {
            Exchange::Reply(bytes) => decode_reply(&bytes)?,
            Exchange::NoReply => None,
        };

        let Some(value) = reply else {
            if RESTARTING_COMMANDS.iter().any(|c| *c == command) {
                info!(
                    "⏳ No reply to '{}' from {} (device may be restarting)",
                    command,
                    self.peer()
                );
                return Ok(CommandReply::no_reply());
            }
            warn!("❌ No reply to privileged '{}' from {}", command, self.peer());
            return Err(ProtocolError::Timeout("reply"));
        };

        let reply = CommandReply::from_value(&value);
        if reply.status.is_success() {
            debug!("✅ '{}' accepted: {:?}", command, reply.message);
            Ok(reply)
        } else {
            warn!(
                "❌ '{}' rejected ({}): {}",
                command,
                reply.status,
                reply.message.as_deref().unwrap_or("")
            );
            Err(ProtocolError::CommandRejected {
                command: command.to_owned(),
                status: reply.status.to_string(),
                message: reply.message.unwrap_or_default(),
            })
        }
    }

    pub async fn power_off(&self) -> ProtocolResult<CommandReply> {
        self.authenticated_command("power_off", &[("respbefore", "true".to_owned())])
            .await
    }

    pub async fn power_on(&self) -> ProtocolResult<CommandReply> {
        self.authenticated_command("power_on", &[]).await
    }

    /// Persistent power limit in watts
    pub async fn adjust_power_limit(&self, watts: u32) -> ProtocolResult<CommandReply> {
        if watts > MAX_POWER_LIMIT_W {
            return Err(ProtocolError::InvalidParameter(format!(
                "power limit {watts}W exceeds {MAX_POWER_LIMIT_W}W"
            )));
        }
        self.authenticated_command("adjust_power_limit", &[("power_limit", watts.to_string())])
            .await
    }

    /// Temporary power percentage (1-100).
    ///
    /// Operator tooling only. The firmware forgets it on restart, so the
    /// dispatcher drives the device through `adjust_power_limit` instead.
    pub async fn set_power_pct(&self, percent: u8) -> ProtocolResult<CommandReply> {
        if !(1..=100).contains(&percent) {
            return Err(ProtocolError::InvalidParameter(format!(
                "power percent {percent} outside 1-100"
            )));
        }
        self.authenticated_command("set_power_pct", &[("parameter", percent.to_string())])
            .await
    }
}
