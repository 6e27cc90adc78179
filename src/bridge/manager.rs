//! Connection manager owning the single active serial link

use crate::bridge::pump::{PumpHandle, StreamPump};
use crate::error::BridgeError;
use crate::transport::{LinkConnector, LinkStream};
use bluer::Address;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Events published on the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Inbound bytes from the peer, decoded as UTF-8 (lossy)
    Data { text: String },
    /// Terminal read-side failure; no further events follow
    Error { code: &'static str, message: String },
}

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Size of the pump's read buffer
    pub read_buffer: usize,
    /// Capacity of the event channel to the subscriber
    pub event_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_buffer: 1024,
            event_queue: 100,
        }
    }
}

/// The single active link: write half, pump, and liveness.
///
/// The pump owns the read half and clears `alive` when the read side
/// fails terminally; a connection with `alive` cleared is dead and gets
/// reaped by the next connect.
struct Connection {
    peer: Address,
    writer: WriteHalf<Box<dyn LinkStream>>,
    pump: PumpHandle,
    alive: Arc<AtomicBool>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stop the pump, then close the write half.
    ///
    /// The pump is joined before the link is shut down so teardown can
    /// never race it into publishing a spurious error event.
    async fn teardown(mut self) -> Result<(), BridgeError> {
        self.pump.stop().await;
        self.writer
            .shutdown()
            .await
            .map_err(|e| BridgeError::DisconnectFailed(e.to_string()))?;
        Ok(())
    }
}

/// Owns at most one serial link at a time and all operations on it
pub struct ConnectionManager {
    config: BridgeConfig,
    connector: Box<dyn LinkConnector>,
    active: Mutex<Option<Connection>>,
    connecting: AtomicBool,
    event_tx: mpsc::Sender<BridgeEvent>,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its event stream
    pub fn new(
        config: BridgeConfig,
        connector: Box<dyn LinkConnector>,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_queue);
        let manager = Self {
            config,
            connector,
            active: Mutex::new(None),
            connecting: AtomicBool::new(false),
            event_tx,
        };
        (manager, event_rx)
    }

    /// Open a link to the peer and start the inbound pump.
    ///
    /// The address is validated before any I/O. A live connection is
    /// rejected explicitly; a dead one (pump already stopped on a read
    /// failure) is torn down and replaced. On failure no partial socket
    /// or pump resources remain.
    pub async fn connect(&self, address: &str) -> Result<(), BridgeError> {
        let peer: Address = address
            .trim()
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(address.into()))?;

        let mut active = self.active.lock().await;
        if let Some(conn) = active.as_ref() {
            if conn.is_alive() {
                return Err(BridgeError::AlreadyConnected(conn.peer));
            }
        }
        if let Some(stale) = active.take() {
            debug!("reaping dead connection to {}", stale.peer);
            let _ = stale.teardown().await;
        }

        info!("connecting to {} via {}", peer, self.connector.name());
        self.connecting.store(true, Ordering::SeqCst);
        let result = self.connector.connect(peer).await;
        self.connecting.store(false, Ordering::SeqCst);
        let stream = result?;

        let (reader, writer) = tokio::io::split(stream);
        let alive = Arc::new(AtomicBool::new(true));
        let pump = StreamPump::spawn(
            reader,
            self.config.read_buffer,
            self.event_tx.clone(),
            alive.clone(),
        );
        *active = Some(Connection { peer, writer, pump, alive });
        info!("connected to {}", peer);
        Ok(())
    }

    /// Write one payload to the link.
    ///
    /// A single write call; no buffering, chunking or retry. Fails
    /// immediately when no live connection exists.
    pub async fn send(&self, payload: Bytes) -> Result<(), BridgeError> {
        let mut active = self.active.lock().await;
        let conn = active.as_mut().ok_or(BridgeError::NotConnected)?;
        if !conn.is_alive() {
            return Err(BridgeError::NotConnected);
        }

        conn.writer
            .write_all(&payload)
            .await
            .map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        conn.writer
            .flush()
            .await
            .map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        debug!("sent {} bytes to {}", payload.len(), conn.peer);
        Ok(())
    }

    /// Close the link. Idempotent; a no-op when already disconnected.
    ///
    /// The pump is signalled and joined before this returns, so no
    /// reader outlives the link.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        let mut active = self.active.lock().await;
        match active.take() {
            None => Ok(()),
            Some(conn) => {
                let peer = conn.peer;
                conn.teardown().await?;
                info!("disconnected from {}", peer);
                Ok(())
            }
        }
    }

    /// Current link state.
    ///
    /// Reports `Connecting` while a dial is in flight; a connection whose
    /// pump has died reads as `Disconnected`.
    pub async fn state(&self) -> LinkState {
        if self.connecting.load(Ordering::SeqCst) {
            return LinkState::Connecting;
        }
        match self.active.lock().await.as_ref() {
            Some(conn) if conn.is_alive() => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }

    /// Address of the connected peer, if any
    pub async fn peer(&self) -> Option<Address> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|c| c.is_alive())
            .map(|c| c.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::READ_ERROR;
    use crate::transport::TcpConnector;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    async fn sim_manager() -> (ConnectionManager, mpsc::Receiver<BridgeEvent>, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connector = TcpConnector::new(listener.local_addr().unwrap().to_string());
        let (manager, events) = ConnectionManager::new(BridgeConfig::default(), Box::new(connector));
        (manager, events, listener)
    }

    /// Connector that counts dial attempts and always refuses.
    struct CountingConnector {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LinkConnector for CountingConnector {
        async fn connect(&self, _peer: Address) -> Result<Box<dyn LinkStream>, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BridgeError::ConnectFailed("refused".into()))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// Connector that hangs long enough for state() to observe the dial.
    struct SlowConnector;

    #[async_trait]
    impl LinkConnector for SlowConnector {
        async fn connect(&self, _peer: Address) -> Result<Box<dyn LinkStream>, BridgeError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err(BridgeError::ConnectFailed("refused".into()))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.read_buffer, 1024);
        assert_eq!(config.event_queue, 100);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_without_io() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector { calls: calls.clone() };
        let (manager, _events) = ConnectionManager::new(BridgeConfig::default(), Box::new(connector));

        for bad in ["", "garbage", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:GG", "192.168.0.1"] {
            let err = manager.connect(bad).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidAddress(_)), "{:?}", bad);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails_not_connected() {
        let (manager, _events, _listener) = sim_manager().await;
        let err = manager.send(Bytes::from_static(b"PING")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_and_send_reaches_peer() {
        let (manager, _events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let mut peer_side = accept.await.unwrap();

        manager.send(Bytes::from_static(b"PING")).await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PING");
        assert_eq!(manager.state().await, LinkState::Connected);
        assert_eq!(manager.peer().await, Some(PEER.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let (manager, _events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let _peer_side = accept.await.unwrap();

        let err = manager.connect("11:22:33:44:55:66").await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyConnected(_)));
        assert_eq!(err.code(), "CONNECTION_FAILED");
        // The original link survives the rejected attempt.
        assert_eq!(manager.peer().await, Some(PEER.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_inbound_data_flows_in_read_order() {
        let (manager, mut events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let mut peer_side = accept.await.unwrap();

        peer_side.write_all(b"alpha").await.unwrap();
        let first = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(first, Some(BridgeEvent::Data { text: "alpha".into() }));

        peer_side.write_all(b"beta").await.unwrap();
        let second = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(second, Some(BridgeEvent::Data { text: "beta".into() }));
    }

    #[tokio::test]
    async fn test_peer_close_emits_exactly_one_terminal_event() {
        let (manager, mut events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let peer_side = accept.await.unwrap();
        drop(peer_side);

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        match event {
            Some(BridgeEvent::Error { code, .. }) => assert_eq!(code, READ_ERROR),
            other => panic!("expected terminal error event, got {:?}", other),
        }
        // Nothing follows the terminal event.
        assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());

        // The dead connection is no longer sendable...
        let err = manager.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        assert_eq!(manager.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_peer_drop() {
        let (manager, mut events, listener) = sim_manager().await;
        let listener = Arc::new(listener);

        let first = listener.clone();
        let accept = tokio::spawn(async move { first.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        drop(accept.await.unwrap());

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert!(matches!(event, Some(BridgeEvent::Error { .. })));

        // ...and a fresh connect replaces it.
        let second = listener.clone();
        let accept = tokio::spawn(async move { second.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let _peer_side = accept.await.unwrap();
        assert_eq!(manager.state().await, LinkState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_silent() {
        let (manager, mut events, listener) = sim_manager().await;

        // Disconnecting before ever connecting is a no-op.
        manager.disconnect().await.unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let mut peer_side = accept.await.unwrap();

        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state().await, LinkState::Disconnected);

        // The peer sees EOF, the subscriber sees nothing.
        let mut buf = [0u8; 8];
        assert_eq!(peer_side.read(&mut buf).await.unwrap(), 0);
        assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_state_reports_connecting_during_dial() {
        let (manager, _events) =
            ConnectionManager::new(BridgeConfig::default(), Box::new(SlowConnector));
        let manager = Arc::new(manager);

        let dialing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(PEER).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state().await, LinkState::Connecting);

        let result = dialing.await.unwrap();
        assert!(matches!(result, Err(BridgeError::ConnectFailed(_))));
        assert_eq!(manager.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_detached_subscriber_does_not_break_the_link() {
        let (manager, events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let mut peer_side = accept.await.unwrap();

        drop(events);
        peer_side.write_all(b"ignored").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Pump dropped the event silently; the link still works both ways.
        manager.send(Bytes::from_static(b"still here")).await.unwrap();
        let mut buf = [0u8; 16];
        let n = peer_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"still here");
        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_holds_no_resources() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (manager, _events) =
            ConnectionManager::new(BridgeConfig::default(), Box::new(TcpConnector::new(addr)));
        let err = manager.connect(PEER).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectFailed(_)));
        assert_eq!(manager.state().await, LinkState::Disconnected);
        assert_eq!(manager.peer().await, None);
    }

    #[tokio::test]
    async fn test_lossy_decode_of_non_utf8_bytes() {
        let (manager, mut events, listener) = sim_manager().await;

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        manager.connect(PEER).await.unwrap();
        let mut peer_side = accept.await.unwrap();

        peer_side.write_all(&[0x68, 0x69, 0xFF]).await.unwrap();
        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(
            event,
            Some(BridgeEvent::Data { text: "hi\u{FFFD}".into() })
        );
    }
}
