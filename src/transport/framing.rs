//! Framed conduits for handshake and TCP traffic.
//!
//! [`LengthPrefixed`] wraps any byte stream in the 2-byte big-endian
//! length framing used by the TCP datapath; reads are full reads.
//! [`DatagramConduit`] frames a connected UDP socket (one datagram per
//! frame) for the client side of the handshake. The server-side
//! registration conduit lives next to the registration queue.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

use crate::core::{FramedConduit, TCP_LENGTH_PREFIX_SIZE, TransportError};

/// Maximum frame body under a 2-byte length prefix.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// 2-byte big-endian length framing over a reliable byte stream.
pub struct LengthPrefixed<S> {
    stream: S,
}

impl<S> LengthPrefixed<S> {
    /// Wrap a stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Unwrap the inner stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> FramedConduit for LengthPrefixed<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut prefix = [0u8; TCP_LENGTH_PREFIX_SIZE];
        self.stream
            .read_exact(&mut prefix)
            .await
            .map_err(map_closed)?;

        let len = u16::from_be_bytes(prefix) as usize;
        let mut frame = vec![0u8; len];
        self.stream
            .read_exact(&mut frame)
            .await
            .map_err(map_closed)?;
        Ok(frame)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let prefix = (frame.len() as u16).to_be_bytes();
        self.stream.write_all(&prefix).await.map_err(map_closed)?;
        self.stream.write_all(frame).await.map_err(map_closed)?;
        self.stream.flush().await.map_err(map_closed)?;
        Ok(())
    }
}

fn map_closed(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

/// Frame adapter over a connected UDP socket: every datagram is one
/// frame.
pub struct DatagramConduit {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl DatagramConduit {
    /// Wrap a connected socket.
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            recv_buffer: vec![0u8; MAX_FRAME_SIZE],
        }
    }
}

impl FramedConduit for DatagramConduit {
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        Ok(self.recv_buffer[..len].to_vec())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.socket.send(frame).await?;
        Ok(())
    }
}
