//! Per-source registration queues.
//!
//! Datagrams from a source that has no session yet are buffered in a
//! bounded single-consumer queue (capacity 16) and replayed, in
//! arrival order, to the registration task running the handshake for
//! that source. Overflow drops the datagram; dropping the sender
//! force-closes the queue and unblocks the consumer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::{FramedConduit, REGISTRATION_QUEUE_CAPACITY, TransportError};

/// Producer handle held by the dispatch loop.
pub struct RegistrationQueue {
    tx: mpsc::Sender<Vec<u8>>,
}

impl RegistrationQueue {
    /// Create a queue; the receiver half feeds the registration
    /// conduit.
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(REGISTRATION_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Enqueue a datagram. Returns `false` when the queue is full or
    /// closed; the datagram is dropped either way.
    pub fn push(&self, datagram: Vec<u8>) -> bool {
        match self.tx.try_send(datagram) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("registration queue full, dropping datagram");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// The registration task's view of an unregistered peer: reads come
/// from the queue, writes go out the shared server socket toward the
/// source.
pub struct RegistrationConduit {
    rx: mpsc::Receiver<Vec<u8>>,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl RegistrationConduit {
    /// Build the conduit for one registration.
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { rx, socket, peer }
    }
}

impl FramedConduit for RegistrationConduit {
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().await.ok_or(TransportError::QueueClosed)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(frame, self.peer).await?;
        Ok(())
    }
}
