use p256::{ProjectivePoint, Scalar};
use zeroize::Zeroize;

use crate::setup_code::SetupCode;

use super::{
    confirmation_mac, decode_public_value, derive_transcript_keys, derive_w0_w1, encode_uncompressed, random_scalar,
    scrub_scalar, verify_confirmation_mac, SharedSecret, Spake2pError, TranscriptKeys, CLIENT_CONFIRM_LABEL,
    GENERATOR_M, GENERATOR_N, SERVER_CONFIRM_LABEL,
};

/// The client (controller) half of one SPAKE2+ handshake.
///
/// Holds the setup code's derived scalars directly; the server side works
/// from a [`super::SetupVerifier`] instead.
pub struct Spake2pClient {
    client_identity: Vec<u8>,
    server_identity: Vec<u8>,
    w0: Scalar,
    w1: Scalar,
    x: Scalar,
    public_value: Vec<u8>,
    peer_value: Option<Vec<u8>>,
    keys: Option<TranscriptKeys>,
}

impl Spake2pClient {
    /// Creates a single-use client engine. The ephemeral scalar is drawn
    /// here, so `pA` is fixed for the lifetime of the engine.
    pub fn new(
        setup_code: &SetupCode,
        client_identity: impl Into<Vec<u8>>,
        server_identity: impl Into<Vec<u8>>,
    ) -> Result<Self, Spake2pError> {
        let client_identity = client_identity.into();
        let server_identity = server_identity.into();

        let (w0, w1) = derive_w0_w1(&setup_code.as_password_bytes(), &client_identity, &server_identity)?;
        let x = random_scalar();
        let pa = ProjectivePoint::GENERATOR * x + *GENERATOR_M * w0;

        Ok(Spake2pClient {
            client_identity,
            server_identity,
            w0,
            w1,
            x,
            public_value: encode_uncompressed(&pa),
            peer_value: None,
            keys: None,
        })
    }

    /// The uncompressed `pA = x·G + w0·M`. Idempotent: repeated calls return
    /// byte-identical output.
    pub fn public_value(&self) -> Vec<u8> {
        self.public_value.clone()
    }

    /// Consumes the server's `pB` and derives the session keys.
    pub fn process_server_value(&mut self, pb: &[u8]) -> Result<(), Spake2pError> {
        let peer = decode_public_value(pb)?;

        // Unblind: Y = pB - w0·N, then Z = x·Y and V = w1·Y.
        let y = peer - *GENERATOR_N * self.w0;
        let z = y * self.x;
        let v = y * self.w1;

        let keys = derive_transcript_keys(
            &self.client_identity,
            &self.server_identity,
            &self.public_value,
            pb,
            &z,
            &v,
            &self.w0,
        )?;

        self.peer_value = Some(pb.to_vec());
        self.keys = Some(keys);

        Ok(())
    }

    /// The client confirmation MAC over `"client" || pA || pB`.
    pub fn confirmation(&self) -> Result<[u8; 32], Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;
        let peer_value = self.peer_value.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        confirmation_mac(&keys.confirm_key, CLIENT_CONFIRM_LABEL, &self.public_value, peer_value)
    }

    /// Verifies the server confirmation MAC (`"server" || pB || pA`) in
    /// constant time.
    pub fn verify_peer_confirmation(&self, tag: &[u8]) -> Result<(), Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;
        let peer_value = self.peer_value.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        verify_confirmation_mac(&keys.confirm_key, SERVER_CONFIRM_LABEL, peer_value, &self.public_value, tag)
    }

    pub fn shared_secret(&self) -> Result<SharedSecret, Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        Ok(SharedSecret::new(keys.shared_secret))
    }
}

impl Drop for Spake2pClient {
    fn drop(&mut self) {
        scrub_scalar(&mut self.w0);
        scrub_scalar(&mut self.w1);
        scrub_scalar(&mut self.x);
        if let Some(keys) = self.keys.as_mut() {
            keys.zeroize();
        }
    }
}
