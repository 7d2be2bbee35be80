//! Client side of the handshake.
//!
//! The client authenticates the server against its pre-provisioned
//! Ed25519 public key; its own third message is signed with a one-shot
//! Ed25519 key generated for this exchange and carried in the hello.
//! Establishment completes on local derivation - the first
//! successfully decrypted data packet is the implicit confirmation.

use std::net::IpAddr;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::core::{
    ED25519_PUBLIC_KEY_SIZE, FramedConduit, HANDSHAKE_NONCE_SIZE, HandshakeError,
    LEGACY_SESSION_RESET,
};
use crate::crypto::keys::{Identity, SessionSecrets, derive_session_secrets, verify_signature};

use super::messages::{ClientHello, ClientSignature, ServerHello, client_transcript, server_transcript};

/// Run the client handshake over `conduit`.
///
/// `tunnel_ip` is the internal address this client claims; `mtu` is
/// the optional MTU extension. Returns the derived session secrets.
pub async fn connect<C: FramedConduit>(
    conduit: &mut C,
    server_public: &[u8; ED25519_PUBLIC_KEY_SIZE],
    tunnel_ip: IpAddr,
    mtu: Option<u16>,
) -> Result<SessionSecrets, HandshakeError> {
    let one_shot = Identity::generate();
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let x25519_public = PublicKey::from(&ephemeral).to_bytes();

    let mut client_nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    OsRng.fill_bytes(&mut client_nonce);

    let hello = ClientHello {
        ip: tunnel_ip,
        ed25519_public: one_shot.public_bytes(),
        x25519_public,
        nonce: client_nonce,
        mtu,
    };
    conduit.write_frame(&hello.marshal()).await?;

    let frame = conduit.read_frame().await?;
    if frame.len() == 1 && frame[0] == LEGACY_SESSION_RESET {
        return Err(HandshakeError::PeerReset);
    }
    let server_hello = ServerHello::unmarshal(&frame)?;

    let transcript = server_transcript(
        &server_hello.x25519_public,
        &server_hello.nonce,
        &client_nonce,
    );
    if !verify_signature(server_public, &transcript, &server_hello.signature) {
        return Err(HandshakeError::SignatureVerification);
    }

    let shared = ephemeral.diffie_hellman(&PublicKey::from(server_hello.x25519_public));

    let signature = one_shot.sign(&client_transcript(
        &x25519_public,
        &client_nonce,
        &server_hello.nonce,
    ));
    conduit
        .write_frame(&ClientSignature { signature }.marshal())
        .await?;

    let secrets = derive_session_secrets(shared.as_bytes(), &server_hello.nonce, &client_nonce)
        .map_err(|_| HandshakeError::KeyDerivation)?;

    debug!(session = %secrets.session_id, "client handshake established");
    Ok(secrets)
}
