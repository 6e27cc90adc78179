//! TCP link implementation simulating a serial peer
//!
//! Stands in for an RFCOMM peer during development and in tests, where a
//! loopback listener plays the remote device. The dialed hardware address
//! is carried through so logging and introspection behave as with a real
//! radio link.

use crate::error::BridgeError;
use crate::transport::traits::{LinkConnector, LinkStream};
use async_trait::async_trait;
use bluer::Address;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

/// TCP stream wrapper implementing LinkStream
pub struct TcpLink {
    inner: TcpStream,
    peer_addr: Address,
}

impl TcpLink {
    pub fn new(stream: TcpStream, peer_addr: Address) -> Self {
        Self { inner: stream, peer_addr }
    }
}

impl AsyncRead for TcpLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl LinkStream for TcpLink {
    fn peer(&self) -> Address {
        self.peer_addr
    }
}

/// Connector dialing a fixed TCP address regardless of the peer address
pub struct TcpConnector {
    target: String,
}

impl TcpConnector {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

#[async_trait]
impl LinkConnector for TcpConnector {
    async fn connect(&self, peer: Address) -> Result<Box<dyn LinkStream>, BridgeError> {
        debug!("dialing simulated peer {} at {}", peer, self.target);
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|e| BridgeError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(TcpLink::new(stream, peer)))
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_maps_to_connect_failed() {
        // Port 1 on loopback is never listening.
        let connector = TcpConnector::new("127.0.0.1:1");
        let err = connector
            .connect(Address::any())
            .await
            .err()
            .map(|e| e.code());
        assert_eq!(err, Some("CONNECTION_FAILED"));
    }

    #[tokio::test]
    async fn test_connect_carries_peer_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connector = TcpConnector::new(listener.local_addr().unwrap().to_string());

        let peer: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let stream = connector.connect(peer).await.unwrap();
        assert_eq!(stream.peer(), peer);
    }
}
