//! Serial bridge over a single Bluetooth RFCOMM link
//!
//! This module handles:
//! - The paired-device registry and classic discovery scans
//! - The single-connection manager (connect / send / disconnect)
//! - The inbound stream pump publishing decoded events
//!
//! The [`Bridge`] facade is the external surface: the four boundary
//! operations plus the event stream, with text crossing the boundary as
//! explicit UTF-8.

mod manager;
mod pump;

pub use manager::{BridgeConfig, BridgeEvent, ConnectionManager, LinkState};

use crate::error::BridgeError;
use crate::registry::{DeviceInfo, DeviceRegistry};
use crate::transport::LinkConnector;
use bluer::Address;
use bytes::Bytes;
use tokio::sync::mpsc;

/// The bridge service: registry, connection manager and event stream
pub struct Bridge {
    registry: DeviceRegistry,
    manager: ConnectionManager,
}

impl Bridge {
    /// Create a bridge over the given link backend.
    ///
    /// Returns the receiving end of the event stream alongside; events
    /// flow to this single subscriber from connect until disconnect or a
    /// terminal read failure.
    pub fn new(
        config: BridgeConfig,
        connector: Box<dyn LinkConnector>,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (manager, events) = ConnectionManager::new(config, connector);
        let bridge = Self {
            registry: DeviceRegistry::new(),
            manager,
        };
        (bridge, events)
    }

    /// Snapshot of devices bonded to the local radio
    pub async fn list_paired_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        self.registry.list_paired().await
    }

    /// Start a background classic discovery scan
    pub async fn start_scan(&self) -> Result<(), BridgeError> {
        self.registry.start_scan().await
    }

    /// Stop the discovery scan; idempotent
    pub async fn stop_scan(&self) {
        self.registry.stop_scan().await
    }

    /// Devices collected by the current or last scan
    pub async fn scanned_devices(&self) -> Vec<DeviceInfo> {
        self.registry.scanned_devices().await
    }

    /// Open the serial link to a peer.
    ///
    /// Discovery and RFCOMM connection setup contend for the radio, so
    /// any in-progress scan is stopped first.
    pub async fn connect(&self, address: &str) -> Result<(), BridgeError> {
        self.registry.stop_scan().await;
        self.manager.connect(address).await
    }

    /// Send text to the peer, encoded as UTF-8
    pub async fn send(&self, text: &str) -> Result<(), BridgeError> {
        self.manager
            .send(Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    /// Close the link; a no-op when already disconnected
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.manager.disconnect().await
    }

    /// Current link state
    pub async fn state(&self) -> LinkState {
        self.manager.state().await
    }

    /// Address of the connected peer, if any
    pub async fn peer(&self) -> Option<Address> {
        self.manager.peer().await
    }
}
