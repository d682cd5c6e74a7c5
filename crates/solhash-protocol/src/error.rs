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

use thiserror::Error;

/// Device protocol error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Token request failed: {0}")]
    Token(String),

    #[error("Device password not configured")]
    MissingCredential,

    #[error("Command '{command}' rejected ({status}): {message}")]
    CommandRejected {
        command: String,
        status: String,
        message: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
