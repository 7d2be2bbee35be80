//! Control-message framing.
//!
//! Two framings coexist. The legacy form is a single clear byte,
//! emitted only by the server when a handshake fails before any keys
//! exist. V1 packets travel inside AEAD-protected payloads on the data
//! path:
//!
//! ```text
//! [ 0xFF | 0x01 | type | payload? ]
//! ```
//!
//! IP datagrams never start with 0xFF (the version nibble is 4 or 6),
//! so a decrypted payload is unambiguously either a service packet or
//! tunnel traffic.

use crate::core::{
    LEGACY_SESSION_RESET, SERVICE_HEADER_SIZE, SERVICE_PREFIX, SERVICE_VERSION,
    ServicePacketError, X25519_PUBLIC_KEY_SIZE,
};

/// Wire type values.
const TYPE_SESSION_RESET: u8 = 1;
const TYPE_REKEY_INIT: u8 = 2;
const TYPE_REKEY_ACK: u8 = 3;

/// A decoded control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePacket {
    /// Tear the session down.
    SessionReset,
    /// Rekey initiation carrying the initiator's ephemeral X25519
    /// public key.
    RekeyInit([u8; X25519_PUBLIC_KEY_SIZE]),
    /// Rekey acknowledgement carrying the responder's ephemeral X25519
    /// public key.
    RekeyAck([u8; X25519_PUBLIC_KEY_SIZE]),
}

impl ServicePacket {
    /// The wire type byte.
    pub fn packet_type(&self) -> u8 {
        match self {
            ServicePacket::SessionReset => TYPE_SESSION_RESET,
            ServicePacket::RekeyInit(_) => TYPE_REKEY_INIT,
            ServicePacket::RekeyAck(_) => TYPE_REKEY_ACK,
        }
    }

    /// Encode in the V1 framing.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERVICE_HEADER_SIZE + X25519_PUBLIC_KEY_SIZE);
        out.push(SERVICE_PREFIX);
        out.push(SERVICE_VERSION);
        out.push(self.packet_type());
        match self {
            ServicePacket::SessionReset => {}
            ServicePacket::RekeyInit(public) | ServicePacket::RekeyAck(public) => {
                out.extend_from_slice(public);
            }
        }
        out
    }

    /// Decode a V1 service packet. Strict: wrong prefix, wrong
    /// version, unknown type and missing payload all fail.
    pub fn decode(bytes: &[u8]) -> Result<Self, ServicePacketError> {
        if bytes.len() < SERVICE_HEADER_SIZE {
            return Err(ServicePacketError::TooShort(bytes.len()));
        }
        if bytes[0] != SERVICE_PREFIX {
            return Err(ServicePacketError::BadPrefix(bytes[0]));
        }
        if bytes[1] != SERVICE_VERSION {
            return Err(ServicePacketError::BadVersion(bytes[1]));
        }

        let packet_type = bytes[2];
        let payload = &bytes[SERVICE_HEADER_SIZE..];
        match packet_type {
            TYPE_SESSION_RESET => Ok(ServicePacket::SessionReset),
            TYPE_REKEY_INIT | TYPE_REKEY_ACK => {
                let public: [u8; X25519_PUBLIC_KEY_SIZE] = payload
                    .try_into()
                    .map_err(|_| ServicePacketError::MissingPayload(packet_type))?;
                if packet_type == TYPE_REKEY_INIT {
                    Ok(ServicePacket::RekeyInit(public))
                } else {
                    Ok(ServicePacket::RekeyAck(public))
                }
            }
            other => Err(ServicePacketError::UnknownType(other)),
        }
    }

    /// Whether a decrypted payload is a V1 service packet rather than
    /// an IP datagram.
    pub fn is_service_frame(payload: &[u8]) -> bool {
        payload.first() == Some(&SERVICE_PREFIX)
    }

    /// The one-byte legacy reset, sent in clear before a session
    /// exists.
    pub fn encode_legacy_reset() -> [u8; 1] {
        [LEGACY_SESSION_RESET]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_reset_roundtrip() {
        let bytes = ServicePacket::SessionReset.encode();
        assert_eq!(bytes, vec![0xFF, 0x01, 0x01]);
        assert_eq!(
            ServicePacket::decode(&bytes).unwrap(),
            ServicePacket::SessionReset
        );
    }

    #[test]
    fn test_rekey_packets_roundtrip() {
        let public = [0x42u8; 32];

        let init = ServicePacket::RekeyInit(public).encode();
        assert_eq!(init.len(), 35);
        assert_eq!(&init[..3], &[0xFF, 0x01, 0x02]);
        assert_eq!(
            ServicePacket::decode(&init).unwrap(),
            ServicePacket::RekeyInit(public)
        );

        let ack = ServicePacket::RekeyAck(public).encode();
        assert_eq!(&ack[..3], &[0xFF, 0x01, 0x03]);
        assert_eq!(
            ServicePacket::decode(&ack).unwrap(),
            ServicePacket::RekeyAck(public)
        );
    }

    #[test]
    fn test_decode_rejections() {
        assert!(matches!(
            ServicePacket::decode(&[]),
            Err(ServicePacketError::TooShort(0))
        ));
        assert!(matches!(
            ServicePacket::decode(&[0xFE, 0x01, 0x01]),
            Err(ServicePacketError::BadPrefix(0xFE))
        ));
        assert!(matches!(
            ServicePacket::decode(&[0xFF, 0x02, 0x01]),
            Err(ServicePacketError::BadVersion(0x02))
        ));
        assert!(matches!(
            ServicePacket::decode(&[0xFF, 0x01, 0x09]),
            Err(ServicePacketError::UnknownType(0x09))
        ));
        // Rekey types demand exactly 32 payload bytes.
        assert!(matches!(
            ServicePacket::decode(&[0xFF, 0x01, 0x02]),
            Err(ServicePacketError::MissingPayload(0x02))
        ));
        let mut short = vec![0xFF, 0x01, 0x03];
        short.extend_from_slice(&[0u8; 31]);
        assert!(matches!(
            ServicePacket::decode(&short),
            Err(ServicePacketError::MissingPayload(0x03))
        ));
    }

    #[test]
    fn test_service_frame_discrimination() {
        assert!(ServicePacket::is_service_frame(&[0xFF, 0x01, 0x01]));
        // IPv4 and IPv6 datagrams start with their version nibble.
        assert!(!ServicePacket::is_service_frame(&[0x45, 0x00]));
        assert!(!ServicePacket::is_service_frame(&[0x60, 0x00]));
        assert!(!ServicePacket::is_service_frame(&[]));
    }

    #[test]
    fn test_legacy_reset() {
        assert_eq!(ServicePacket::encode_legacy_reset(), [1]);
    }
}
