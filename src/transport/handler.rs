//! UDP session dispatch.
//!
//! One task reads the server socket. Datagrams from registered peers
//! take the fast path: decrypt, then either dispatch a service packet
//! or hand the plaintext to the TUN writer. Datagrams from unknown
//! sources land in a per-source registration queue consumed by a
//! registration task that runs the server handshake under a deadline.
//! Per-packet errors never stop the loop; only socket-level failures
//! and shutdown do.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::core::{
    CryptoError, HANDSHAKE_TIMEOUT, HandshakeError, TransportError, TunDevice, TungoError,
};
use crate::crypto::nonce::Direction;
use crate::crypto::{Crypto, Decrypted, EpochUdpCrypto, Identity, RekeyController};
use crate::handshake::server::{ServerHandshakeOutcome, accept};
use crate::handshake::ip_policy::IpPolicy;
use crate::session::{Session, SessionRepository};

use super::queue::{RegistrationConduit, RegistrationQueue};
use super::service::ServicePacket;
use super::socket::UdpPeer;

/// Largest datagram the dispatch loop reads.
const RECV_BUFFER_SIZE: usize = u16::MAX as usize;

/// State shared between the dispatch loop and registration tasks.
struct Shared {
    socket: Arc<UdpSocket>,
    repository: Arc<SessionRepository>,
    registrations: Mutex<HashMap<SocketAddr, RegistrationQueue>>,
    identity: Identity,
    policy: IpPolicy,
    mtu: usize,
    handshake_timeout: Duration,
}

/// The server-side UDP dispatch layer.
pub struct UdpTransportHandler<T: TunDevice> {
    shared: Arc<Shared>,
    tun: Arc<T>,
    shutdown: watch::Receiver<bool>,
}

impl<T: TunDevice> UdpTransportHandler<T> {
    /// Assemble a handler around a bound server socket.
    pub fn new(
        socket: Arc<UdpSocket>,
        repository: Arc<SessionRepository>,
        tun: Arc<T>,
        identity: Identity,
        policy: IpPolicy,
        mtu: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                socket,
                repository,
                registrations: Mutex::new(HashMap::new()),
                identity,
                policy,
                mtu,
                handshake_timeout: HANDSHAKE_TIMEOUT,
            }),
            tun,
            shutdown,
        }
    }

    /// Run the dispatch loop until shutdown or a socket-level error.
    pub async fn run(self) -> Result<(), TungoError> {
        let socket = Arc::clone(&self.shared.socket);
        let mut shutdown = self.shutdown.clone();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                result = socket.recv_from(&mut buf) => result,
            };

            let (len, peer) = match received {
                Ok(received) => received,
                Err(err) => {
                    warn!(%err, "socket read failed, stopping dispatch");
                    self.shared.close_registrations();
                    return Err(TungoError::Io(err));
                }
            };
            self.dispatch(peer, &buf[..len]).await;
        }

        info!("udp dispatch shutting down");
        self.shared.close_registrations();
        Ok(())
    }

    async fn dispatch(&self, peer: SocketAddr, datagram: &[u8]) {
        if datagram.is_empty() {
            trace!(%peer, "dropping empty datagram");
            return;
        }

        match self.shared.repository.get_by_external(&peer).await {
            Some(session) => self.handle_session_datagram(&session, datagram).await,
            None => Shared::enqueue_registration(&self.shared, peer, datagram.to_vec()),
        }
    }

    async fn handle_session_datagram(&self, session: &Arc<Session>, datagram: &[u8]) {
        match session.crypto().decrypt(datagram) {
            Ok(Decrypted { epoch, payload }) => {
                session.rekey().observe_recv_epoch(epoch);
                if ServicePacket::is_service_frame(&payload) {
                    self.handle_service_packet(session, &payload).await;
                } else if let Err(err) = self.tun.write_packet(&payload).await {
                    warn!(%err, "tun write failed");
                }
            }
            Err(CryptoError::ReplayDetected) => {
                trace!(peer = %session.external_addr(), "replayed packet dropped");
            }
            Err(CryptoError::UnknownEpoch(epoch)) => {
                debug!(peer = %session.external_addr(), epoch, "unknown epoch, packet dropped");
            }
            Err(err) => {
                trace!(peer = %session.external_addr(), %err, "undecryptable datagram dropped");
            }
        }
    }

    async fn handle_service_packet(&self, session: &Arc<Session>, payload: &[u8]) {
        match ServicePacket::decode(payload) {
            Ok(ServicePacket::SessionReset) => {
                info!(peer = %session.external_addr(), "peer reset session");
                self.shared.repository.delete(session).await;
                session.zeroize();
            }
            Ok(ServicePacket::RekeyInit(peer_public)) => {
                self.handle_rekey_init(session, peer_public).await;
            }
            Ok(ServicePacket::RekeyAck(peer_public)) => {
                match session.rekey().handle_ack(peer_public) {
                    Ok(epoch) => debug!(epoch, "rekey acknowledged"),
                    Err(CryptoError::EpochExhausted) => self.terminate_session(session).await,
                    Err(err) => debug!(%err, "rekey ack ignored"),
                }
            }
            Err(err) => debug!(%err, "malformed service packet dropped"),
        }
    }

    async fn handle_rekey_init(&self, session: &Arc<Session>, peer_public: [u8; 32]) {
        match session.rekey().handle_init(peer_public) {
            Ok(our_public) => {
                let ack = ServicePacket::RekeyAck(our_public).encode();
                match session.crypto().encrypt(&ack) {
                    Ok(packet) => {
                        if session.transport().send(&packet).await.is_ok() {
                            // The Ack is on the wire; elect the epoch it
                            // announced.
                            session.rekey().activate_pending();
                        }
                    }
                    Err(err) => debug!(%err, "failed to encrypt rekey ack"),
                }
            }
            Err(CryptoError::EpochExhausted) => self.terminate_session(session).await,
            Err(err) => debug!(%err, "rekey init refused"),
        }
    }

    async fn terminate_session(&self, session: &Arc<Session>) {
        warn!(peer = %session.external_addr(), "terminating session");
        if let Ok(packet) = session.crypto().encrypt(&ServicePacket::SessionReset.encode()) {
            let _ = session.transport().send(&packet).await;
        }
        self.shared.repository.delete(session).await;
        session.zeroize();
    }
}

impl Shared {
    /// Route a datagram from an unregistered source into its queue,
    /// spawning the registration task on first contact.
    fn enqueue_registration(shared: &Arc<Shared>, peer: SocketAddr, datagram: Vec<u8>) {
        let mut registrations = shared.lock_registrations();
        if let Some(queue) = registrations.get(&peer) {
            queue.push(datagram);
            return;
        }

        let (queue, rx) = RegistrationQueue::channel();
        queue.push(datagram);
        registrations.insert(peer, queue);
        drop(registrations);

        debug!(%peer, "starting registration");
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            shared.register(peer, rx).await;
        });
    }

    async fn register(self: Arc<Self>, peer: SocketAddr, rx: mpsc::Receiver<Vec<u8>>) {
        let mut conduit = RegistrationConduit::new(rx, Arc::clone(&self.socket), peer);
        let result = tokio::time::timeout(
            self.handshake_timeout,
            accept(&mut conduit, &self.identity, &self.policy),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => self.install_session(peer, outcome).await,
            Ok(Err(HandshakeError::Transport(TransportError::QueueClosed))) => {
                debug!(%peer, "registration aborted by shutdown");
            }
            Ok(Err(err)) => {
                warn!(%peer, %err, "handshake failed");
                self.send_legacy_reset(peer).await;
            }
            Err(_elapsed) => {
                warn!(%peer, "handshake timed out");
                self.send_legacy_reset(peer).await;
            }
        }

        self.lock_registrations().remove(&peer);
    }

    async fn install_session(&self, peer: SocketAddr, outcome: ServerHandshakeOutcome) {
        let IpAddr::V4(internal_ip) = outcome.client_ip else {
            warn!(%peer, ip = %outcome.client_ip, "tunnel address not routable on this datapath");
            self.send_legacy_reset(peer).await;
            return;
        };

        let mtu = match outcome.peer_mtu {
            Some(peer_mtu) => self.mtu.min(peer_mtu as usize),
            None => self.mtu,
        };

        let crypto: Arc<dyn Crypto> = Arc::new(EpochUdpCrypto::new(
            outcome.secrets,
            Direction::ServerToClient,
        ));
        let session = Arc::new(Session::new(
            internal_ip,
            peer,
            UdpPeer::new(Arc::clone(&self.socket), peer),
            Arc::clone(&crypto),
            RekeyController::new(crypto),
            mtu,
        ));

        if let Some(old) = self.repository.get_by_internal(internal_ip).await {
            info!(%peer, previous = %old.external_addr(), "replacing session after rebind");
            self.repository.delete(&old).await;
            old.zeroize();
        }

        self.repository.add(session).await;
        info!(%peer, internal = %internal_ip, mtu, "session registered");
    }

    async fn send_legacy_reset(&self, peer: SocketAddr) {
        let _ = self
            .socket
            .send_to(&ServicePacket::encode_legacy_reset(), peer)
            .await;
    }

    /// Force-close every registration queue, unblocking pending reads.
    fn close_registrations(&self) {
        self.lock_registrations().clear();
    }

    fn lock_registrations(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, RegistrationQueue>> {
        self.registrations.lock().unwrap_or_else(|e| e.into_inner())
    }
}
