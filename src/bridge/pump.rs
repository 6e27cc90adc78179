//! Inbound stream pump
//!
//! A dedicated task that drains the read half of the active link and
//! republishes each non-empty read as one decoded event, in read order.
//! The pump never closes the link itself; the connection manager owns
//! teardown and joins the pump before closing, so a stopped pump can
//! never fire events after the link is gone.

use crate::bridge::manager::BridgeEvent;
use crate::error::READ_ERROR;
use crate::transport::LinkStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle the connection manager keeps to stop and join the pump
pub(crate) struct PumpHandle {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PumpHandle {
    /// Signal the pump and wait for its task to finish.
    ///
    /// The pump may already have exited on a read failure; both sends and
    /// joins tolerate that.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

pub(crate) struct StreamPump;

impl StreamPump {
    /// Spawn the read loop for a freshly opened link.
    ///
    /// `alive` is shared with the connection manager and cleared on the
    /// first terminal read failure.
    pub(crate) fn spawn(
        reader: ReadHalf<Box<dyn LinkStream>>,
        read_buffer: usize,
        events: mpsc::Sender<BridgeEvent>,
        alive: Arc<AtomicBool>,
    ) -> PumpHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(pump_loop(reader, read_buffer, events, alive, shutdown_rx));
        PumpHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

async fn pump_loop(
    mut reader: ReadHalf<Box<dyn LinkStream>>,
    read_buffer: usize,
    events: mpsc::Sender<BridgeEvent>,
    alive: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; read_buffer];

    loop {
        tokio::select! {
            biased;

            // Manager-initiated teardown: stop without an event. The arm
            // also fires when the handle is dropped wholesale.
            _ = &mut shutdown => break,

            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    alive.store(false, Ordering::SeqCst);
                    let _ = events
                        .send(BridgeEvent::Error {
                            code: READ_ERROR,
                            message: "connection closed by peer".into(),
                        })
                        .await;
                    break;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    // A detached subscriber just discards the event.
                    let _ = events.send(BridgeEvent::Data { text }).await;
                }
                Err(e) => {
                    alive.store(false, Ordering::SeqCst);
                    let _ = events
                        .send(BridgeEvent::Error {
                            code: READ_ERROR,
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    }

    debug!("stream pump stopped");
}
