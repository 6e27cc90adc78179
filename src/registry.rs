//! Paired-device registry and classic discovery
//!
//! Read-only queries against the local radio: a snapshot of bonded
//! devices, and an optional background BR/EDR scan collecting devices as
//! the adapter reports them. Discovery and RFCOMM connection setup
//! contend for the radio, so the bridge stops any running scan before
//! dialing.

use crate::error::BridgeError;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Immutable snapshot of a remote device known to the local radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable name, when the device has reported one
    pub name: Option<String>,
    /// Hardware address, the stable unique key
    pub address: String,
}

struct ScanTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry of devices visible to the local radio
pub struct DeviceRegistry {
    found: Arc<Mutex<Vec<DeviceInfo>>>,
    scan: Mutex<Option<ScanTask>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            found: Arc::new(Mutex::new(Vec::new())),
            scan: Mutex::new(None),
        }
    }

    /// Get the default adapter, requiring it to be powered
    async fn adapter() -> Result<Adapter, BridgeError> {
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

    /// Snapshot of bonded devices.
    ///
    /// No ordering guarantee beyond being stable for one adapter state.
    pub async fn list_paired(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        let adapter = Self::adapter().await?;
        let addresses = adapter
            .device_addresses()
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;

        let mut devices = Vec::new();
        for addr in addresses {
            let device = match adapter.device(addr) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            devices.push(DeviceInfo {
                name: device.name().await.ok().flatten(),
                address: addr.to_string(),
            });
        }
        Ok(devices)
    }

    /// Start a background BR/EDR discovery scan.
    ///
    /// A scan already in progress is restarted. Results accumulate in the
    /// snapshot returned by [`scanned_devices`](Self::scanned_devices).
    pub async fn start_scan(&self) -> Result<(), BridgeError> {
        self.stop_scan().await;

        let adapter = Self::adapter().await?;
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;
        let discover = adapter
            .discover_devices()
            .await
            .map_err(|e| BridgeError::RadioUnavailable(e.to_string()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let found = self.found.clone();
        found.lock().await.clear();

        let handle = tokio::spawn(scan_loop(adapter, Box::pin(discover), found, stop_rx));
        *self.scan.lock().await = Some(ScanTask { stop: stop_tx, handle });
        info!("classic discovery scan started");
        Ok(())
    }

    /// Stop the discovery scan and wait for the task to finish.
    ///
    /// Idempotent; dropping the discovery stream is what releases the
    /// radio for connection setup.
    pub async fn stop_scan(&self) {
        if let Some(task) = self.scan.lock().await.take() {
            let _ = task.stop.send(());
            let _ = task.handle.await;
            info!("classic discovery scan stopped");
        }
    }

    /// Devices collected by the current or last scan
    pub async fn scanned_devices(&self) -> Vec<DeviceInfo> {
        self.found.lock().await.clone()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn scan_loop<S>(
    adapter: Adapter,
    mut discover: S,
    found: Arc<Mutex<Vec<DeviceInfo>>>,
    mut stop_rx: oneshot::Receiver<()>,
) where
    S: futures::Stream<Item = AdapterEvent> + Unpin + Send + 'static,
{
    use futures::StreamExt;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            event = discover.next() => match event {
                Some(AdapterEvent::DeviceAdded(addr)) => {
                    record_device(&adapter, addr, &found).await;
                }
                Some(AdapterEvent::DeviceRemoved(addr)) => {
                    let removed = addr.to_string();
                    found.lock().await.retain(|d| d.address != removed);
                }
                Some(_) => {}
                None => break,
            }
        }
    }
    debug!("scan task exiting");
}

async fn record_device(adapter: &Adapter, addr: Address, found: &Arc<Mutex<Vec<DeviceInfo>>>) {
    let device = match adapter.device(addr) {
        Ok(d) => d,
        Err(_) => return,
    };
    let name = device.name().await.ok().flatten();
    let address = addr.to_string();

    let mut found = found.lock().await;
    if !found.iter().any(|d| d.address == address) {
        info!(
            "discovered {} ({})",
            address,
            name.as_deref().unwrap_or("unknown")
        );
        found.push(DeviceInfo { name, address });
    }
}
