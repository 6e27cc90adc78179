//! RFCOMM link implementation for Bluetooth serial connections

use crate::error::BridgeError;
use crate::transport::traits::{LinkConnector, LinkStream};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Address, Uuid};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

/// Standard Serial Port Profile service class identifier
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM channel SPP peers usually listen on under BlueZ
pub const DEFAULT_SPP_CHANNEL: u8 = 1;

/// RFCOMM stream wrapper implementing LinkStream
pub struct RfcommLink {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommLink {
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self { inner: stream, peer_addr }
    }
}

impl AsyncRead for RfcommLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommLink {
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

impl LinkStream for RfcommLink {
    fn peer(&self) -> Address {
        self.peer_addr
    }
}

/// RFCOMM connector dialing a fixed channel on the target device
pub struct RfcommConnector {
    channel: u8,
}

impl RfcommConnector {
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }

    /// Check the powered state of the default adapter.
    async fn adapter() -> Result<bluer::Adapter, BridgeError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;
        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;
        if !powered {
            return Err(BridgeError::RadioUnavailable("adapter is powered off".into()));
        }
        Ok(adapter)
    }

    /// Warn when the peer's service records do not advertise SPP.
    ///
    /// The records are only known for bonded or previously seen devices,
    /// so absence of data is not an error.
    async fn check_spp_service(adapter: &bluer::Adapter, peer: Address) {
        if let Ok(device) = adapter.device(peer) {
            if let Ok(Some(uuids)) = device.uuids().await {
                if !uuids.contains(&SPP_UUID) {
                    warn!("{} does not advertise the serial port service", peer);
                }
            }
        }
    }
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(DEFAULT_SPP_CHANNEL)
    }
}

#[async_trait]
impl LinkConnector for RfcommConnector {
    async fn connect(&self, peer: Address) -> Result<Box<dyn LinkStream>, BridgeError> {
        let adapter = Self::adapter().await?;
        Self::check_spp_service(&adapter, peer).await;

        let socket_addr = RfcommAddr::new(peer, self.channel);
        debug!("dialing {} on RFCOMM channel {}", peer, self.channel);

        let stream = RfcommStream::connect(socket_addr)
            .await
            .map_err(|e| BridgeError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(RfcommLink::new(stream, peer)))
    }

    fn name(&self) -> &'static str {
        "RFCOMM"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel() {
        let connector = RfcommConnector::default();
        assert_eq!(connector.channel, DEFAULT_SPP_CHANNEL);
        assert_eq!(connector.name(), "RFCOMM");
    }

    #[test]
    fn test_spp_uuid_is_the_standard_identifier() {
        assert_eq!(SPP_UUID.to_string(), "00001101-0000-1000-8000-00805f9b34fb");
    }
}
