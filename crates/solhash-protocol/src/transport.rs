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
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound on a single reply frame
const MAX_REPLY_BYTES: u64 = 256 * 1024;

/// Outcome of one request/reply exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Reply(Vec<u8>),
    /// Request was written but nothing came back before the deadline or close
    NoReply,
}

/// One-shot request/reply channel to the device.
///
/// Connect and write failures are errors. A missing reply is reported as
/// `Exchange::NoReply` so the caller can decide whether silence is acceptable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: &[u8]) -> ProtocolResult<Exchange>;

    /// Human-readable peer description
    fn peer(&self) -> String;
}

/// TCP transport, one connection per exchange
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl AsRef<str>, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host.as_ref(), port),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(&self, request: &[u8]) -> ProtocolResult<Exchange> {
        trace!("Connecting to {}", self.addr);
        let mut stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ProtocolError::Timeout("connect"))?
            .map_err(|source| ProtocolError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        timeout(self.timeout, async {
            stream.write_all(request).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| ProtocolError::Timeout("write"))??;

        let mut reader = BufReader::new(stream.take(MAX_REPLY_BYTES));
        let mut buf = Vec::new();
        let read = timeout(self.timeout, reader.read_until(b'\n', &mut buf)).await;
        match read {
            Ok(Ok(0)) => {
                debug!("{} closed the connection without a reply", self.addr);
                Ok(Exchange::NoReply)
            }
            Ok(Ok(_)) => Ok(Exchange::Reply(buf)),
            Ok(Err(e)) if buf.is_empty() => {
                debug!("{} dropped the connection before replying: {}", self.addr, e);
                Ok(Exchange::NoReply)
            }
            Ok(Err(e)) => Err(ProtocolError::Io(e)),
            Err(_) if buf.is_empty() => {
                debug!("No reply from {} within {:?}", self.addr, self.timeout);
                Ok(Exchange::NoReply)
            }
            // Partial frame at the deadline; let the decoder judge it
            Err(_) => Ok(Exchange::Reply(buf)),
        }
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(
        reply: &'static [u8],
        hold_open: bool,
    ) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut request = Vec::new();
            reader.read_until(b'\n', &mut request).await.unwrap();
            let mut socket = reader.into_inner();
            socket.write_all(reply).await.unwrap();
            if hold_open {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            request
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_exchange_reads_one_line() {
        let (port, server) = serve_once(b"{\"STATUS\":\"S\"}\n", false).await;
        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(2));

        let result = transport.exchange(b"{\"command\":\"summary\"}\n").await.unwrap();
        assert_eq!(result, Exchange::Reply(b"{\"STATUS\":\"S\"}\n".to_vec()));
        assert_eq!(server.await.unwrap(), b"{\"command\":\"summary\"}\n");
    }

    #[tokio::test]
    async fn test_silent_peer_is_no_reply() {
        let (port, _server) = serve_once(b"", true).await;
        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_millis(100));

        let result = transport.exchange(b"{\"command\":\"summary\"}\n").await.unwrap();
        assert_eq!(result, Exchange::NoReply);
    }

    #[tokio::test]
    async fn test_closed_without_reply_is_no_reply() {
        let (port, _server) = serve_once(b"", false).await;
        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(2));

        let result = transport.exchange(b"{\"command\":\"power_off\"}\n").await.unwrap();
        assert_eq!(result, Exchange::NoReply);
    }

    #[tokio::test]
    async fn test_refused_connection_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        let result = transport.exchange(b"{}\n").await;
        assert!(matches!(
            result,
            Err(ProtocolError::Connect { .. } | ProtocolError::Timeout("connect"))
        ));
    }
}
