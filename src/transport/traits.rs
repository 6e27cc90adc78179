//! Link trait abstraction for pluggable serial backends

use crate::error::BridgeError;
use async_trait::async_trait;
use bluer::Address;
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected byte stream to a serial peer
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Hardware address of the remote peer this stream is bound to
    fn peer(&self) -> Address;
}

/// Factory for opening a serial link to a peer
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Dial the peer, returning a stream on success.
    ///
    /// Fails with `RadioUnavailable` when the local adapter cannot be
    /// used, or `ConnectFailed` when the peer is unreachable.
    async fn connect(&self, peer: Address) -> Result<Box<dyn LinkStream>, BridgeError>;

    /// Human-readable name for this link backend
    fn name(&self) -> &'static str;
}
