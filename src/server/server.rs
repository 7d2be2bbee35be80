//! High-level tunnel server.
//!
//! `TungoServer::start` binds the UDP socket and runs the two halves
//! of the datapath: the dispatch loop (socket -> sessions -> TUN) and
//! the reverse path (TUN -> sessions -> socket). Shutdown cancels
//! both, force-closes pending registrations and zeroizes every
//! session.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::{
    DEFAULT_ETHERNET_MTU, DestinationParser, ED25519_PUBLIC_KEY_SIZE, TunDevice, TungoError,
};
use crate::crypto::Identity;
use crate::handshake::IpPolicy;
use crate::session::SessionRepository;
use crate::transport::UdpTransportHandler;
use crate::tun::TunHandler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to.
    pub bind_addr: SocketAddr,

    /// Long-term Ed25519 identity.
    pub identity: Identity,

    /// MTU configured for the tunnel; sessions use
    /// `min(this, peer announced)`.
    pub mtu: usize,

    /// Screening policy for claimed tunnel addresses.
    pub policy: IpPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9821"
                .parse()
                .expect("default bind address is valid"),
            identity: Identity::generate(),
            mtu: DEFAULT_ETHERNET_MTU,
            policy: IpPolicy::default(),
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct TungoServerBuilder {
    config: ServerConfig,
}

impl TungoServerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the long-term identity.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.config.identity = identity;
        self
    }

    /// Set the configured MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the tunnel-address policy.
    pub fn policy(mut self, policy: IpPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// A running tunnel server.
pub struct TungoServer {
    local_addr: SocketAddr,
    public_key: [u8; ED25519_PUBLIC_KEY_SIZE],
    repository: Arc<SessionRepository>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TungoServer {
    /// Bind and start both datapath halves.
    pub async fn start<T: TunDevice, P: DestinationParser>(
        config: ServerConfig,
        tun: Arc<T>,
        parser: P,
    ) -> Result<Self, TungoError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        let public_key = config.identity.public_bytes();
        let repository = Arc::new(SessionRepository::new());

        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatch = UdpTransportHandler::new(
            Arc::clone(&socket),
            Arc::clone(&repository),
            Arc::clone(&tun),
            config.identity,
            config.policy,
            config.mtu,
            shutdown_rx.clone(),
        );
        let reverse = TunHandler::new(
            tun,
            parser,
            Arc::clone(&repository),
            config.mtu,
            shutdown_rx,
        );

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(async move {
            let _ = dispatch.run().await;
        }));
        tasks.push(tokio::spawn(async move {
            let _ = reverse.run().await;
        }));

        info!(%local_addr, "tungo server started");

        Ok(Self {
            local_addr,
            public_key,
            repository,
            shutdown: Some(shutdown),
            tasks,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The public half of the server identity, as provisioned to
    /// clients.
    pub fn public_key(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.public_key
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.repository.len().await
    }

    /// The session index, shared with the datapath tasks.
    pub fn repository(&self) -> &Arc<SessionRepository> {
        &self.repository
    }

    /// Stop both datapath halves and zeroize every session.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.repository.clear().await;
        info!("tungo server stopped");
    }
}

impl Drop for TungoServer {
    fn drop(&mut self) {
        // Send the shutdown signal if not already sent. The datapath
        // tasks exit, and dropped sessions zero their keys on drop.
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TungoClient, TungoClientBuilder};
    use crate::core::TunDevice;
    use std::collections::VecDeque;
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    /// TUN stand-in fed through a channel; written packets are
    /// collected for assertions.
    struct ChannelTun {
        reads: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
        written: AsyncMutex<VecDeque<Vec<u8>>>,
    }

    impl ChannelTun {
        fn new() -> (Arc<Self>, mpsc::Sender<Vec<u8>>) {
            let (tx, rx) = mpsc::channel(64);
            (
                Arc::new(Self {
                    reads: AsyncMutex::new(rx),
                    written: AsyncMutex::new(VecDeque::new()),
                }),
                tx,
            )
        }

        async fn next_written(&self) -> Option<Vec<u8>> {
            self.written.lock().await.pop_front()
        }
    }

    impl TunDevice for ChannelTun {
        async fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.lock().await.recv().await {
                Some(packet) => {
                    let len = packet.len().min(buf.len());
                    buf[..len].copy_from_slice(&packet[..len]);
                    Ok(len)
                }
                None => Ok(0),
            }
        }

        async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
            self.written.lock().await.push_back(packet.to_vec());
            Ok(())
        }
    }

    /// Reads the destination field of an IPv4 header.
    struct HeaderParser;

    impl DestinationParser for HeaderParser {
        fn destination(&self, packet: &[u8]) -> Option<Ipv4Addr> {
            if packet.len() >= 20 && packet[0] >> 4 == 4 {
                Some(Ipv4Addr::new(
                    packet[16], packet[17], packet[18], packet[19],
                ))
            } else {
                None
            }
        }
    }

    fn ipv4_packet(destination: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[16..20].copy_from_slice(&destination);
        packet.extend_from_slice(payload);
        packet
    }

    async fn wait_sessions(server: &TungoServer, count: usize) {
        for _ in 0..200 {
            if server.session_count().await == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {count}");
    }

    async fn wait_written(tun: &ChannelTun, expected: &[u8]) {
        for _ in 0..200 {
            if let Some(packet) = tun.next_written().await {
                assert_eq!(packet, expected);
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected packet never written to tun");
    }

    #[tokio::test]
    async fn test_end_to_end_tunnel() {
        let (server_tun, server_feed) = ChannelTun::new();
        let server = TungoServer::start(
            TungoServerBuilder::new()
                .bind_addr("127.0.0.1:0".parse().unwrap())
                .build(),
            Arc::clone(&server_tun),
            HeaderParser,
        )
        .await
        .unwrap();

        let (client_tun, client_feed) = ChannelTun::new();
        let client = TungoClient::connect(
            TungoClientBuilder::new()
                .server_addr(server.local_addr())
                .server_public_key(server.public_key())
                .tunnel_ip("10.0.0.5".parse().unwrap())
                .build(),
            Arc::clone(&client_tun),
        )
        .await
        .unwrap();

        wait_sessions(&server, 1).await;

        // Uplink: a packet entering the client TUN pops out of the
        // server TUN.
        let uplink = ipv4_packet([10, 8, 0, 1], b"uplink data");
        client_feed.send(uplink.clone()).await.unwrap();
        wait_written(&server_tun, &uplink).await;

        // Downlink: a packet addressed to the client's tunnel IP
        // entering the server TUN pops out of the client TUN.
        let downlink = ipv4_packet([10, 0, 0, 5], b"downlink data");
        server_feed.send(downlink.clone()).await.unwrap();
        wait_written(&client_tun, &downlink).await;

        client.shutdown().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_client_driven_rekey() {
        let (server_tun, server_feed) = ChannelTun::new();
        let server = TungoServer::start(
            TungoServerBuilder::new()
                .bind_addr("127.0.0.1:0".parse().unwrap())
                .build(),
            Arc::clone(&server_tun),
            HeaderParser,
        )
        .await
        .unwrap();

        let (client_tun, client_feed) = ChannelTun::new();
        let client = TungoClient::connect(
            TungoClientBuilder::new()
                .server_addr(server.local_addr())
                .server_public_key(server.public_key())
                .tunnel_ip("10.0.0.6".parse().unwrap())
                .build(),
            Arc::clone(&client_tun),
        )
        .await
        .unwrap();
        wait_sessions(&server, 1).await;

        assert_eq!(client.send_epoch(), 0);
        client.rekey_now().await.unwrap();

        // The server installs and elects epoch 1; its first downlink
        // packet under the new epoch confirms the client.
        let session = {
            let mut found = None;
            for _ in 0..200 {
                if let Some(session) = server
                    .repository()
                    .get_by_internal("10.0.0.6".parse().unwrap())
                    .await
                {
                    if session.crypto().send_epoch() == 1 {
                        found = Some(session);
                        break;
                    }
                }
                sleep(Duration::from_millis(10)).await;
            }
            found.expect("server never elected epoch 1")
        };
        drop(session);

        let downlink = ipv4_packet([10, 0, 0, 6], b"confirming packet");
        server_feed.send(downlink.clone()).await.unwrap();
        wait_written(&client_tun, &downlink).await;

        for _ in 0..200 {
            if client.send_epoch() == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.send_epoch(), 1);
        assert!(!client.is_rekey_pending());

        // Uplink now flows under the new epoch.
        let uplink = ipv4_packet([10, 8, 0, 2], b"post-rekey uplink");
        client_feed.send(uplink.clone()).await.unwrap();
        wait_written(&server_tun, &uplink).await;

        client.shutdown().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_handshake_rejected_with_wrong_server_key() {
        let (server_tun, _feed) = ChannelTun::new();
        let server = TungoServer::start(
            TungoServerBuilder::new()
                .bind_addr("127.0.0.1:0".parse().unwrap())
                .build(),
            server_tun,
            HeaderParser,
        )
        .await
        .unwrap();

        let (client_tun, _client_feed) = ChannelTun::new();
        let result = TungoClient::connect(
            TungoClientBuilder::new()
                .server_addr(server.local_addr())
                .server_public_key([0xAB; 32])
                .tunnel_ip("10.0.0.7".parse().unwrap())
                .handshake_timeout(Duration::from_secs(5))
                .build(),
            client_tun,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(server.session_count().await, 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_shutdown_clears_sessions() {
        let (server_tun, _feed) = ChannelTun::new();
        let server = TungoServer::start(
            TungoServerBuilder::new()
                .bind_addr("127.0.0.1:0".parse().unwrap())
                .build(),
            server_tun,
            HeaderParser,
        )
        .await
        .unwrap();

        let (client_tun, _client_feed) = ChannelTun::new();
        let client = TungoClient::connect(
            TungoClientBuilder::new()
                .server_addr(server.local_addr())
                .server_public_key(server.public_key())
                .tunnel_ip("10.0.0.8".parse().unwrap())
                .build(),
            client_tun,
        )
        .await
        .unwrap();
        wait_sessions(&server, 1).await;

        server.shutdown().await;
        client.shutdown().await;
    }
}
