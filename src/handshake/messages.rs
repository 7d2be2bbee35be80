//! Handshake wire messages.
//!
//! Three messages, bit-exact, all multi-byte integers big-endian:
//!
//! ```text
//! ClientHello      version(1) | ipLen(1) | ip(4|16) | edPub(32)
//!                  | x25519Pub(32) | nonce(32) | [mtu(2)]
//! ServerHello      signature(64) | nonce(32) | x25519Pub(32)
//! ClientSignature  signature(64)
//! ```
//!
//! The trailing MTU field of ClientHello is an optional extension;
//! legacy payloads omit it and the server accepts both lengths.

use std::net::IpAddr;

use crate::core::{
    CLIENT_SIGNATURE_SIZE, ED25519_PUBLIC_KEY_SIZE, HANDSHAKE_NONCE_SIZE, HandshakeError,
    MAX_CLIENT_HELLO_SIZE, MIN_CLIENT_HELLO_SIZE, MTU_EXTENSION_SIZE, SERVER_HELLO_SIZE,
    SIGNATURE_SIZE, X25519_PUBLIC_KEY_SIZE,
};

use super::ip_policy::{IpPolicy, normalize_ip};

/// First handshake message, client -> server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// The tunnel-internal address the client claims.
    pub ip: IpAddr,
    /// One-shot Ed25519 public key authenticating the third message.
    pub ed25519_public: [u8; ED25519_PUBLIC_KEY_SIZE],
    /// Ephemeral X25519 public key.
    pub x25519_public: [u8; X25519_PUBLIC_KEY_SIZE],
    /// Random client nonce.
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
    /// Optional MTU the client can carry; `None` on legacy payloads.
    pub mtu: Option<u16>,
}

impl ClientHello {
    /// Serialize to wire bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_CLIENT_HELLO_SIZE);
        match self.ip {
            IpAddr::V4(v4) => {
                out.push(4);
                out.push(4);
                out.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                out.push(6);
                out.push(16);
                out.extend_from_slice(&v6.octets());
            }
        }
        out.extend_from_slice(&self.ed25519_public);
        out.extend_from_slice(&self.x25519_public);
        out.extend_from_slice(&self.nonce);
        if let Some(mtu) = self.mtu {
            out.extend_from_slice(&mtu.to_be_bytes());
        }
        out
    }

    /// Parse wire bytes, screening the claimed address against
    /// `policy`. A policy violation is fatal at parse time.
    pub fn unmarshal(bytes: &[u8], policy: &IpPolicy) -> Result<Self, HandshakeError> {
        if bytes.len() < MIN_CLIENT_HELLO_SIZE || bytes.len() > MAX_CLIENT_HELLO_SIZE {
            return Err(HandshakeError::MessageLength {
                message: "ClientHello",
                actual: bytes.len(),
            });
        }

        let version = bytes[0];
        let ip_len = bytes[1] as usize;
        match (version, ip_len) {
            (4, 4) | (6, 16) => {}
            _ => return Err(HandshakeError::InvalidIpVersion(version)),
        }

        let fixed_tail = ED25519_PUBLIC_KEY_SIZE + X25519_PUBLIC_KEY_SIZE + HANDSHAKE_NONCE_SIZE;
        let remaining = bytes
            .len()
            .checked_sub(2 + ip_len)
            .ok_or(HandshakeError::MessageLength {
                message: "ClientHello",
                actual: bytes.len(),
            })?;
        if remaining != fixed_tail && remaining != fixed_tail + MTU_EXTENSION_SIZE {
            return Err(HandshakeError::MessageLength {
                message: "ClientHello",
                actual: bytes.len(),
            });
        }

        let ip = normalize_ip(&bytes[2..2 + ip_len])?;
        policy.validate(&ip)?;

        let mut at = 2 + ip_len;
        let mut ed25519_public = [0u8; ED25519_PUBLIC_KEY_SIZE];
        ed25519_public.copy_from_slice(&bytes[at..at + ED25519_PUBLIC_KEY_SIZE]);
        at += ED25519_PUBLIC_KEY_SIZE;

        let mut x25519_public = [0u8; X25519_PUBLIC_KEY_SIZE];
        x25519_public.copy_from_slice(&bytes[at..at + X25519_PUBLIC_KEY_SIZE]);
        at += X25519_PUBLIC_KEY_SIZE;

        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[at..at + HANDSHAKE_NONCE_SIZE]);
        at += HANDSHAKE_NONCE_SIZE;

        let mtu = if remaining == fixed_tail + MTU_EXTENSION_SIZE {
            Some(u16::from_be_bytes([bytes[at], bytes[at + 1]]))
        } else {
            None
        };

        Ok(Self {
            ip,
            ed25519_public,
            x25519_public,
            nonce,
            mtu,
        })
    }
}

/// Second handshake message, server -> client. Always 128 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// `Ed25519_Sign(server_sk, x25519Pub || serverNonce || clientNonce)`.
    pub signature: [u8; SIGNATURE_SIZE],
    /// Random server nonce.
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
    /// Ephemeral X25519 public key.
    pub x25519_public: [u8; X25519_PUBLIC_KEY_SIZE],
}

impl ServerHello {
    /// Serialize to wire bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERVER_HELLO_SIZE);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.x25519_public);
        out
    }

    /// Parse wire bytes.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != SERVER_HELLO_SIZE {
            return Err(HandshakeError::MessageLength {
                message: "ServerHello",
                actual: bytes.len(),
            });
        }

        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[..SIGNATURE_SIZE]);

        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[SIGNATURE_SIZE..SIGNATURE_SIZE + HANDSHAKE_NONCE_SIZE]);

        let mut x25519_public = [0u8; X25519_PUBLIC_KEY_SIZE];
        x25519_public.copy_from_slice(&bytes[SIGNATURE_SIZE + HANDSHAKE_NONCE_SIZE..]);

        Ok(Self {
            signature,
            nonce,
            x25519_public,
        })
    }
}

/// Third handshake message, client -> server. Always 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSignature {
    /// `Ed25519_Sign(client_sk, x25519Pub || clientNonce || serverNonce)`.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl ClientSignature {
    /// Serialize to wire bytes.
    pub fn marshal(&self) -> Vec<u8> {
        self.signature.to_vec()
    }

    /// Parse wire bytes.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != CLIENT_SIGNATURE_SIZE {
            return Err(HandshakeError::MessageLength {
                message: "ClientSignature",
                actual: bytes.len(),
            });
        }
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(bytes);
        Ok(Self { signature })
    }
}

/// The byte string a ServerHello signature covers.
pub fn server_transcript(
    x25519_public: &[u8; X25519_PUBLIC_KEY_SIZE],
    server_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
    client_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
) -> Vec<u8> {
    let mut transcript =
        Vec::with_capacity(X25519_PUBLIC_KEY_SIZE + 2 * HANDSHAKE_NONCE_SIZE);
    transcript.extend_from_slice(x25519_public);
    transcript.extend_from_slice(server_nonce);
    transcript.extend_from_slice(client_nonce);
    transcript
}

/// The byte string a ClientSignature covers.
pub fn client_transcript(
    x25519_public: &[u8; X25519_PUBLIC_KEY_SIZE],
    client_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
    server_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
) -> Vec<u8> {
    let mut transcript =
        Vec::with_capacity(X25519_PUBLIC_KEY_SIZE + 2 * HANDSHAKE_NONCE_SIZE);
    transcript.extend_from_slice(x25519_public);
    transcript.extend_from_slice(client_nonce);
    transcript.extend_from_slice(server_nonce);
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IpPolicyError;

    fn hello(ip: &str, mtu: Option<u16>) -> ClientHello {
        ClientHello {
            ip: ip.parse().unwrap(),
            ed25519_public: [0x01; 32],
            x25519_public: [0x02; 32],
            nonce: [0x03; 32],
            mtu,
        }
    }

    #[test]
    fn test_client_hello_roundtrip_v4() {
        let policy = IpPolicy::default();

        for mtu in [None, Some(1380)] {
            let original = hello("10.0.0.5", mtu);
            let bytes = original.marshal();
            let expected_len = if mtu.is_some() { 104 } else { 102 };
            assert_eq!(bytes.len(), expected_len);

            let parsed = ClientHello::unmarshal(&bytes, &policy).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_client_hello_roundtrip_v6() {
        let policy = IpPolicy::default();

        for mtu in [None, Some(9000)] {
            let original = hello("fd00::5", mtu);
            let bytes = original.marshal();
            let expected_len = if mtu.is_some() { 116 } else { 114 };
            assert_eq!(bytes.len(), expected_len);

            let parsed = ClientHello::unmarshal(&bytes, &policy).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_client_hello_length_bounds() {
        let policy = IpPolicy::default();

        assert!(matches!(
            ClientHello::unmarshal(&[0u8; MIN_CLIENT_HELLO_SIZE - 1], &policy),
            Err(HandshakeError::MessageLength { .. })
        ));
        assert!(matches!(
            ClientHello::unmarshal(&[0u8; MAX_CLIENT_HELLO_SIZE + 1], &policy),
            Err(HandshakeError::MessageLength { .. })
        ));

        // A v6 length with a v4 ipLen leaves an impossible tail.
        let mut bytes = hello("10.0.0.5", None).marshal();
        bytes.push(0);
        assert!(matches!(
            ClientHello::unmarshal(&bytes, &policy),
            Err(HandshakeError::MessageLength { .. })
        ));
    }

    #[test]
    fn test_client_hello_bad_version() {
        let policy = IpPolicy::default();

        let mut bytes = hello("10.0.0.5", None).marshal();
        bytes[0] = 5;
        assert!(matches!(
            ClientHello::unmarshal(&bytes, &policy),
            Err(HandshakeError::InvalidIpVersion(5))
        ));

        let mut bytes = hello("10.0.0.5", None).marshal();
        bytes[1] = 16;
        assert!(matches!(
            ClientHello::unmarshal(&bytes, &policy),
            Err(HandshakeError::InvalidIpVersion(4))
        ));
    }

    #[test]
    fn test_client_hello_policy_rejection_at_parse() {
        let bytes = hello("127.0.0.1", None).marshal();
        let err = ClientHello::unmarshal(&bytes, &IpPolicy::default()).unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::IpPolicy(IpPolicyError::Loopback)
        ));

        // The permissive policy admits the same bytes.
        assert!(ClientHello::unmarshal(&bytes, &IpPolicy::permissive()).is_ok());
    }

    #[test]
    fn test_server_hello_roundtrip() {
        let original = ServerHello {
            signature: [0x0A; 64],
            nonce: [0x0B; 32],
            x25519_public: [0x0C; 32],
        };
        let bytes = original.marshal();
        assert_eq!(bytes.len(), SERVER_HELLO_SIZE);

        let parsed = ServerHello::unmarshal(&bytes).unwrap();
        assert_eq!(parsed, original);

        assert!(ServerHello::unmarshal(&bytes[..SERVER_HELLO_SIZE - 1]).is_err());
    }

    #[test]
    fn test_client_signature_roundtrip() {
        let original = ClientSignature {
            signature: [0x7E; 64],
        };
        let bytes = original.marshal();
        assert_eq!(bytes.len(), CLIENT_SIGNATURE_SIZE);
        assert_eq!(ClientSignature::unmarshal(&bytes).unwrap(), original);
        assert!(ClientSignature::unmarshal(&bytes[..63]).is_err());
    }

    #[test]
    fn test_transcript_ordering() {
        let x = [0x01; 32];
        let a = [0x02; 32];
        let b = [0x03; 32];

        // Server signs pub || serverNonce || clientNonce, the client
        // signs pub || clientNonce || serverNonce.
        assert_ne!(server_transcript(&x, &a, &b), client_transcript(&x, &a, &b));
        assert_eq!(server_transcript(&x, &a, &b), client_transcript(&x, &b, &a));
    }
}
