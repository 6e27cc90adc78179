//! Bridge error taxonomy
//!
//! Every failure a caller can observe maps to a stable string code, so a
//! front end speaking the message-channel convention can switch on the
//! code without parsing messages.

use thiserror::Error;

/// Code carried by the terminal event the stream pump publishes when the
/// read side of the link fails or the peer closes the socket.
pub const READ_ERROR: &str = "READ_ERROR";

/// Errors surfaced synchronously by the bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The local Bluetooth adapter is absent or powered off
    #[error("bluetooth adapter not available: {0}")]
    RadioUnavailable(String),

    /// A required argument was missing at the command boundary
    #[error("missing required argument: {0}")]
    InvalidArgument(&'static str),

    /// The given string is not a well-formed hardware address
    #[error("not a valid bluetooth address: {0:?}")]
    InvalidAddress(String),

    /// Dialing the peer failed (handshake or service lookup)
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// A live connection already exists; disconnect first
    #[error("already connected to {0}")]
    AlreadyConnected(bluer::Address),

    /// No live connection to send on
    #[error("not connected")]
    NotConnected,

    /// Writing to the link failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Closing the link failed
    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
}

impl BridgeError {
    /// Stable string code for this error.
    ///
    /// `AlreadyConnected` surfaces as `CONNECTION_FAILED` and
    /// `NotConnected` as `SEND_FAILED`; the code set is closed and both
    /// conditions are refinements callers see in the message text.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::RadioUnavailable(_) => "BLUETOOTH_DISABLED",
            BridgeError::InvalidArgument(_) => "INVALID_ARGUMENT",
            BridgeError::InvalidAddress(_) => "INVALID_MAC",
            BridgeError::ConnectFailed(_) | BridgeError::AlreadyConnected(_) => {
                "CONNECTION_FAILED"
            }
            BridgeError::NotConnected | BridgeError::SendFailed(_) => "SEND_FAILED",
            BridgeError::DisconnectFailed(_) => "DISCONNECT_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            BridgeError::RadioUnavailable("off".into()).code(),
            "BLUETOOTH_DISABLED"
        );
        assert_eq!(BridgeError::InvalidArgument("address").code(), "INVALID_ARGUMENT");
        assert_eq!(
            BridgeError::InvalidAddress("garbage".into()).code(),
            "INVALID_MAC"
        );
        assert_eq!(
            BridgeError::ConnectFailed("refused".into()).code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(
            BridgeError::AlreadyConnected(bluer::Address::any()).code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(BridgeError::NotConnected.code(), "SEND_FAILED");
        assert_eq!(BridgeError::SendFailed("pipe".into()).code(), "SEND_FAILED");
        assert_eq!(
            BridgeError::DisconnectFailed("busy".into()).code(),
            "DISCONNECT_FAILED"
        );
    }
}
