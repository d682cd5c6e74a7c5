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

use crate::error::{ProtocolError, ProtocolResult};
use serde_json::Value;

/// Serialize one request as a compact JSON line
pub fn encode_request(request: &Value) -> ProtocolResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(request)
        .map_err(|e| ProtocolError::MalformedReply(format!("Failed to encode request: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one reply frame.
///
/// Firmware pads some replies with NUL bytes; those and surrounding whitespace are
/// stripped. An empty frame yields `None`.
pub fn decode_reply(bytes: &[u8]) -> ProtocolResult<Option<Value>> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        ProtocolError::MalformedReply(format!("Reply is not valid JSON ({e}): {trimmed}"))
    })?;

    if !value.is_object() {
        return Err(ProtocolError::MalformedReply(format!(
            "Expected JSON object, got: {trimmed}"
        )));
    }

    Ok(Some(value))
}
