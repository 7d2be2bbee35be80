//! High-level tunnel client.
//!
//! `TungoClient::connect` binds a UDP socket, runs the handshake
//! against the configured server and starts the two datapath tasks:
//! TUN reads are encrypted and sent uplink, received datagrams are
//! decrypted and written to the TUN (or dispatched as service
//! packets). An optional timer drives periodic rekeys.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::core::{
    AEAD_TAG_SIZE, CryptoError, DEFAULT_ETHERNET_MTU, ED25519_PUBLIC_KEY_SIZE, HANDSHAKE_TIMEOUT,
    HandshakeError, PACKET_HEADER_SIZE, TunDevice, TungoError,
};
use crate::crypto::nonce::Direction;
use crate::crypto::{Crypto, Decrypted, EpochUdpCrypto, RekeyController};
use crate::handshake;
use crate::transport::{DatagramConduit, ServicePacket, TunnelSocket};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server_addr: SocketAddr,

    /// The server's long-term Ed25519 public key.
    pub server_public_key: [u8; ED25519_PUBLIC_KEY_SIZE],

    /// Tunnel-internal address this client claims.
    pub tunnel_ip: IpAddr,

    /// MTU this client can carry; announced in the hello.
    pub mtu: usize,

    /// Handshake deadline.
    pub handshake_timeout: Duration,

    /// Drive a rekey this often; `None` disables the timer.
    pub rekey_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9821"
                .parse()
                .expect("default server address is valid"),
            server_public_key: [0u8; ED25519_PUBLIC_KEY_SIZE],
            tunnel_ip: IpAddr::V4("10.0.0.2".parse().expect("default tunnel ip is valid")),
            mtu: DEFAULT_ETHERNET_MTU,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            rekey_interval: None,
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct TungoClientBuilder {
    config: ClientConfig,
}

impl TungoClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the server address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the server's Ed25519 public key.
    pub fn server_public_key(mut self, key: [u8; ED25519_PUBLIC_KEY_SIZE]) -> Self {
        self.config.server_public_key = key;
        self
    }

    /// Set the claimed tunnel address.
    pub fn tunnel_ip(mut self, ip: IpAddr) -> Self {
        self.config.tunnel_ip = ip;
        self
    }

    /// Set the announced MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the handshake deadline.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Enable the periodic rekey timer.
    pub fn rekey_interval(mut self, interval: Duration) -> Self {
        self.config.rekey_interval = Some(interval);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// A connected tunnel client.
pub struct TungoClient {
    socket: Arc<UdpSocket>,
    crypto: Arc<dyn Crypto>,
    rekey: Arc<RekeyController>,
    shutdown: Option<Arc<watch::Sender<bool>>>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl TungoClient {
    /// Handshake with the server and start the datapath tasks.
    pub async fn connect<T: TunDevice>(
        config: ClientConfig,
        tun: Arc<T>,
    ) -> Result<Self, TungoError> {
        let bind_addr: SocketAddr = if config.server_addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("wildcard v4 address is valid")
        } else {
            "[::]:0".parse().expect("wildcard v6 address is valid")
        };
        let socket = TunnelSocket::bind(bind_addr).await?;
        socket.connect(config.server_addr).await?;
        let local_addr = socket.local_addr()?;
        let socket = socket.socket_arc();

        let mut conduit = DatagramConduit::new(Arc::clone(&socket));
        let secrets = tokio::time::timeout(
            config.handshake_timeout,
            handshake::client::connect(
                &mut conduit,
                &config.server_public_key,
                config.tunnel_ip,
                Some(config.mtu.min(u16::MAX as usize) as u16),
            ),
        )
        .await
        .map_err(|_| TungoError::Handshake(HandshakeError::Timeout))??;

        info!(server = %config.server_addr, tunnel_ip = %config.tunnel_ip, "tunnel established");

        let crypto: Arc<dyn Crypto> = Arc::new(EpochUdpCrypto::new(
            secrets,
            Direction::ClientToServer,
        ));
        let rekey = Arc::new(RekeyController::new(Arc::clone(&crypto)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(downlink_loop(
            Arc::clone(&socket),
            Arc::clone(&crypto),
            Arc::clone(&rekey),
            Arc::clone(&tun),
            Arc::clone(&shutdown),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(uplink_loop(
            Arc::clone(&socket),
            Arc::clone(&crypto),
            Arc::clone(&tun),
            config.mtu,
            Arc::clone(&shutdown),
            shutdown_rx.clone(),
        )));
        if let Some(interval) = config.rekey_interval {
            tasks.push(tokio::spawn(rekey_timer(
                Arc::clone(&socket),
                Arc::clone(&crypto),
                Arc::clone(&rekey),
                interval,
                shutdown_rx,
            )));
        }

        Ok(Self {
            socket,
            crypto,
            rekey,
            shutdown: Some(shutdown),
            tasks,
            local_addr,
        })
    }

    /// The socket address this client sends from.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The epoch currently elected for sending.
    pub fn send_epoch(&self) -> u16 {
        self.crypto.send_epoch()
    }

    /// Whether a rekey awaits confirmation.
    pub fn is_rekey_pending(&self) -> bool {
        self.rekey.is_pending()
    }

    /// Initiate an in-band rekey now.
    pub async fn rekey_now(&self) -> Result<(), TungoError> {
        let public = self.rekey.initiate()?;
        let packet = self
            .crypto
            .encrypt(&ServicePacket::RekeyInit(public).encode())?;
        self.socket.send(&packet).await?;
        Ok(())
    }

    /// Stop the datapath tasks and zero key material.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.crypto.zeroize();
    }
}

impl Drop for TungoClient {
    fn drop(&mut self) {
        // Send the shutdown signal if not already sent, and zero key
        // material; the tasks observe the signal and exit.
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
            self.crypto.zeroize();
        }
    }
}

/// Receive loop: decrypt, dispatch service packets, forward tunnel
/// traffic to the TUN.
async fn downlink_loop<T: TunDevice>(
    socket: Arc<UdpSocket>,
    crypto: Arc<dyn Crypto>,
    rekey: Arc<RekeyController>,
    tun: Arc<T>,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; u16::MAX as usize];
    loop {
        let received = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = socket.recv(&mut buf) => result,
        };

        let len = match received {
            Ok(len) => len,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
                ) =>
            {
                trace!(%err, "transient socket error");
                continue;
            }
            Err(err) => {
                warn!(%err, "socket receive failed, stopping client");
                let _ = shutdown.send(true);
                break;
            }
        };

        match crypto.decrypt(&buf[..len]) {
            Ok(Decrypted { epoch, payload }) => {
                rekey.observe_recv_epoch(epoch);
                if ServicePacket::is_service_frame(&payload) {
                    if handle_service_packet(&socket, &crypto, &rekey, &payload).await {
                        let _ = shutdown.send(true);
                        break;
                    }
                } else if let Err(err) = tun.write_packet(&payload).await {
                    warn!(%err, "tun write failed");
                }
            }
            Err(CryptoError::ReplayDetected) => trace!("replayed packet dropped"),
            Err(CryptoError::UnknownEpoch(epoch)) => debug!(epoch, "unknown epoch dropped"),
            Err(err) => trace!(%err, "undecryptable datagram dropped"),
        }
    }
}

/// Handle one service packet; returns `true` when the session must
/// terminate.
async fn handle_service_packet(
    socket: &UdpSocket,
    crypto: &Arc<dyn Crypto>,
    rekey: &Arc<RekeyController>,
    payload: &[u8],
) -> bool {
    match ServicePacket::decode(payload) {
        Ok(ServicePacket::SessionReset) => {
            info!("server reset the session");
            crypto.zeroize();
            true
        }
        Ok(ServicePacket::RekeyInit(peer_public)) => {
            match rekey.handle_init(peer_public) {
                Ok(our_public) => {
                    let ack = ServicePacket::RekeyAck(our_public).encode();
                    match crypto.encrypt(&ack) {
                        Ok(packet) => {
                            if socket.send(&packet).await.is_ok() {
                                rekey.activate_pending();
                            }
                        }
                        Err(err) => debug!(%err, "failed to encrypt rekey ack"),
                    }
                    false
                }
                Err(CryptoError::EpochExhausted) => true,
                Err(err) => {
                    debug!(%err, "rekey init refused");
                    false
                }
            }
        }
        Ok(ServicePacket::RekeyAck(peer_public)) => match rekey.handle_ack(peer_public) {
            Ok(epoch) => {
                debug!(epoch, "rekey acknowledged");
                false
            }
            Err(CryptoError::EpochExhausted) => true,
            Err(err) => {
                debug!(%err, "rekey ack ignored");
                false
            }
        },
        Err(err) => {
            debug!(%err, "malformed service packet dropped");
            false
        }
    }
}

/// TUN read loop: encrypt in place and send uplink.
async fn uplink_loop<T: TunDevice>(
    socket: Arc<UdpSocket>,
    crypto: Arc<dyn Crypto>,
    tun: Arc<T>,
    mtu: usize,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let capacity = PACKET_HEADER_SIZE + mtu + AEAD_TAG_SIZE;
    let mut packet: Vec<u8> = Vec::with_capacity(capacity);

    loop {
        packet.resize(PACKET_HEADER_SIZE + mtu, 0);

        let read = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = tun.read_packet(&mut packet[PACKET_HEADER_SIZE..]) => result,
        };

        let len = match read {
            Ok(0) => {
                info!("tun reader at end of stream, stopping client");
                let _ = shutdown.send(true);
                break;
            }
            Ok(len) => len,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::PermissionDenied
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                warn!(%err, "fatal tun read error, stopping client");
                let _ = shutdown.send(true);
                break;
            }
            Err(err) => {
                warn!(%err, "transient tun read error, retrying");
                continue;
            }
        };
        packet.truncate(PACKET_HEADER_SIZE + len);

        match crypto.encrypt_in_place(&mut packet) {
            Ok(()) => {
                if let Err(err) = socket.send(&packet).await {
                    warn!(%err, "uplink send failed");
                }
            }
            Err(CryptoError::NonceExhausted) | Err(CryptoError::EpochExhausted) => {
                warn!("send path exhausted, stopping client");
                if let Ok(reset) = crypto.encrypt(&ServicePacket::SessionReset.encode()) {
                    let _ = socket.send(&reset).await;
                }
                crypto.zeroize();
                let _ = shutdown.send(true);
                break;
            }
            Err(err) => warn!(%err, "encrypt failed, packet dropped"),
        }
    }
}

/// Periodic rekey driver.
async fn rekey_timer(
    socket: Arc<UdpSocket>,
    crypto: Arc<dyn Crypto>,
    rekey: Arc<RekeyController>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would rekey right after the handshake.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        rekey.abort_pending_if_expired(Instant::now());
        match rekey.initiate() {
            Ok(public) => {
                let init = ServicePacket::RekeyInit(public).encode();
                match crypto.encrypt(&init) {
                    Ok(packet) => {
                        if let Err(err) = socket.send(&packet).await {
                            warn!(%err, "rekey init send failed");
                        }
                    }
                    Err(err) => debug!(%err, "failed to encrypt rekey init"),
                }
            }
            Err(err) => trace!(%err, "rekey not started"),
        }
    }
}
