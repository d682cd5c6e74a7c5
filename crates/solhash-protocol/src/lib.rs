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

//! Line-framed JSON protocol spoken by the controlled ASIC device.
//!
//! Plain reads (`summary`, `get_version`, `get_token`) are one request and one
//! reply per connection. Privileged commands first fetch a `{salt, time}` token and
//! send an MD5-crypt credential derived from the device password alongside the
//! command.

pub mod client;
pub mod crypt;
pub mod error;
pub mod frame;
pub mod reply;
pub mod transport;

pub use client::{DEFAULT_PORT, DeviceClient};
pub use crypt::md5_crypt;
pub use error::{ProtocolError, ProtocolResult};
pub use reply::{CommandReply, Reply, ReplyStatus, SummaryItem, SummaryReply, TokenReply};
pub use transport::{Exchange, TcpTransport, Transport};
