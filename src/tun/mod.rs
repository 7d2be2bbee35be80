//! Reverse path: TUN -> session -> UDP.
//!
//! Reads one IP datagram at a time into a buffer with a reserved
//! epoch/nonce header region, resolves the owning session by
//! destination address, encrypts in place and ships the ciphertext to
//! the session's transport. Transient read errors are logged and
//! retried; EOF and permission errors terminate the handler.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::core::{
    AEAD_TAG_SIZE, CryptoError, DestinationParser, PACKET_HEADER_SIZE, TunDevice, TungoError,
};
use crate::session::{Session, SessionRepository};
use crate::transport::ServicePacket;

/// The TUN read loop feeding the UDP datapath.
pub struct TunHandler<T: TunDevice, P: DestinationParser> {
    tun: Arc<T>,
    parser: P,
    repository: Arc<SessionRepository>,
    mtu: usize,
    shutdown: watch::Receiver<bool>,
}

impl<T: TunDevice, P: DestinationParser> TunHandler<T, P> {
    /// Assemble the handler. `mtu` bounds how much of a datagram is
    /// read per iteration.
    pub fn new(
        tun: Arc<T>,
        parser: P,
        repository: Arc<SessionRepository>,
        mtu: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tun,
            parser,
            repository,
            mtu,
            shutdown,
        }
    }

    /// Run until shutdown, EOF or a permission error.
    pub async fn run(self) -> Result<(), TungoError> {
        let Self {
            tun,
            parser,
            repository,
            mtu,
            mut shutdown,
        } = self;

        let capacity = PACKET_HEADER_SIZE + mtu + AEAD_TAG_SIZE;
        let mut packet: Vec<u8> = Vec::with_capacity(capacity);

        loop {
            packet.resize(PACKET_HEADER_SIZE + mtu, 0);

            let read = tokio::select! {
                _ = shutdown.changed() => break,
                result = tun.read_packet(&mut packet[PACKET_HEADER_SIZE..]) => result,
            };

            let len = match read {
                Ok(0) => {
                    info!("tun reader at end of stream, stopping");
                    break;
                }
                Ok(len) => len,
                Err(err) if is_fatal_read_error(&err) => {
                    warn!(%err, "fatal tun read error, stopping");
                    return Err(TungoError::Io(err));
                }
                Err(err) => {
                    warn!(%err, "transient tun read error, retrying");
                    continue;
                }
            };
            packet.truncate(PACKET_HEADER_SIZE + len);

            let Some(destination) = parser.destination(&packet[PACKET_HEADER_SIZE..]) else {
                trace!("unroutable packet from tun dropped");
                continue;
            };

            let Some(session) = repository.get_by_internal(destination).await else {
                trace!(%destination, "no session for destination, packet dropped");
                continue;
            };

            if len > session.mtu() {
                trace!(%destination, len, mtu = session.mtu(), "oversized packet dropped");
                continue;
            }

            match session.crypto().encrypt_in_place(&mut packet) {
                Ok(()) => {
                    if let Err(err) = session.transport().send(&packet).await {
                        warn!(%err, %destination, "udp send failed");
                    }
                }
                Err(CryptoError::NonceExhausted) | Err(CryptoError::EpochExhausted) => {
                    terminate_session(&repository, &session).await;
                }
                Err(err) => {
                    warn!(%err, %destination, "encrypt failed, packet dropped");
                }
            }
        }

        Ok(())
    }
}

/// Fatal for the read loop: the device is gone or we lost access.
fn is_fatal_read_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::PermissionDenied | io::ErrorKind::BrokenPipe
    )
}

/// Tear a session down after a fatal send-path error, signaling the
/// peer best-effort.
async fn terminate_session(repository: &SessionRepository, session: &Arc<Session>) {
    debug!(peer = %session.external_addr(), "send path exhausted, terminating session");
    if let Ok(reset) = session.crypto().encrypt(&ServicePacket::SessionReset.encode()) {
        let _ = session.transport().send(&reset).await;
    }
    repository.delete(session).await;
    session.zeroize();
}
