//! Server side of the handshake.
//!
//! The server reads a framed ClientHello (the conduit owns framing:
//! whole datagrams on UDP, full length-prefixed reads on TCP), screens
//! the claimed tunnel address, proves possession of its long-term
//! Ed25519 key in the ServerHello, and verifies the client's one-shot
//! signature before deriving the session secrets.

use std::net::IpAddr;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::core::{FramedConduit, HANDSHAKE_NONCE_SIZE, HandshakeError};
use crate::crypto::keys::{Identity, SessionSecrets, derive_session_secrets, verify_signature};

use super::ip_policy::IpPolicy;
use super::messages::{ClientHello, ClientSignature, ServerHello, client_transcript, server_transcript};

/// What a completed server handshake hands to the registration task.
pub struct ServerHandshakeOutcome {
    /// Derived keys and session identifier.
    pub secrets: SessionSecrets,
    /// The client's validated tunnel-internal address.
    pub client_ip: IpAddr,
    /// MTU the client negotiated, when its hello carried the
    /// extension.
    pub peer_mtu: Option<u16>,
}

/// Run the server handshake over `conduit`.
pub async fn accept<C: FramedConduit>(
    conduit: &mut C,
    identity: &Identity,
    policy: &IpPolicy,
) -> Result<ServerHandshakeOutcome, HandshakeError> {
    let frame = conduit.read_frame().await?;
    let hello = ClientHello::unmarshal(&frame, policy)?;

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let x25519_public = PublicKey::from(&ephemeral).to_bytes();

    let mut server_nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    OsRng.fill_bytes(&mut server_nonce);

    let signature = identity.sign(&server_transcript(
        &x25519_public,
        &server_nonce,
        &hello.nonce,
    ));
    let server_hello = ServerHello {
        signature,
        nonce: server_nonce,
        x25519_public,
    };
    conduit.write_frame(&server_hello.marshal()).await?;

    let frame = conduit.read_frame().await?;
    let client_signature = ClientSignature::unmarshal(&frame)?;

    let transcript = client_transcript(&hello.x25519_public, &hello.nonce, &server_nonce);
    if !verify_signature(
        &hello.ed25519_public,
        &transcript,
        &client_signature.signature,
    ) {
        return Err(HandshakeError::SignatureVerification);
    }

    let shared = ephemeral.diffie_hellman(&PublicKey::from(hello.x25519_public));
    let secrets = derive_session_secrets(shared.as_bytes(), &server_nonce, &hello.nonce)
        .map_err(|_| HandshakeError::KeyDerivation)?;

    debug!(
        session = %secrets.session_id,
        client_ip = %hello.ip,
        "server handshake established"
    );

    Ok(ServerHandshakeOutcome {
        secrets,
        client_ip: hello.ip,
        peer_mtu: hello.mtu,
    })
}
