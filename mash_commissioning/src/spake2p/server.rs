use p256::{ProjectivePoint, Scalar};
use zeroize::Zeroize;

use super::{
    confirmation_mac, decode_public_value, derive_transcript_keys, encode_uncompressed, random_scalar, scrub_scalar,
    verify_confirmation_mac, SetupVerifier, SharedSecret, Spake2pError, TranscriptKeys, CLIENT_CONFIRM_LABEL,
    GENERATOR_M, GENERATOR_N, SERVER_CONFIRM_LABEL,
};

/// The server (device) half of one SPAKE2+ handshake.
///
/// Works purely from the persisted [`SetupVerifier`]: it never sees the setup
/// code, only `w0` and `L = w1·G`.
pub struct Spake2pServer {
    client_identity: Vec<u8>,
    server_identity: Vec<u8>,
    w0: Scalar,
    l: ProjectivePoint,
    y: Scalar,
    public_value: Vec<u8>,
    peer_value: Option<Vec<u8>>,
    keys: Option<TranscriptKeys>,
}

impl Spake2pServer {
    /// Creates a single-use server engine from a stored verifier.
    pub fn new(verifier: &SetupVerifier, server_identity: impl Into<Vec<u8>>) -> Result<Self, Spake2pError> {
        let w0 = verifier.w0_scalar()?;
        let l = verifier.l_point()?;

        let y = random_scalar();
        let pb = ProjectivePoint::GENERATOR * y + *GENERATOR_N * w0;

        Ok(Spake2pServer {
            client_identity: verifier.identity().to_vec(),
            server_identity: server_identity.into(),
            w0,
            l,
            y,
            public_value: encode_uncompressed(&pb),
            peer_value: None,
            keys: None,
        })
    }

    /// The uncompressed `pB = y·G + w0·N`. Idempotent.
    pub fn public_value(&self) -> Vec<u8> {
        self.public_value.clone()
    }

    /// Consumes the client's `pA` and derives the session keys.
    pub fn process_client_value(&mut self, pa: &[u8]) -> Result<(), Spake2pError> {
        let peer = decode_public_value(pa)?;

        // Unblind: X = pA - w0·M, then Z = y·X and V = y·L.
        let x = peer - *GENERATOR_M * self.w0;
        let z = x * self.y;
        let v = self.l * self.y;

        let keys = derive_transcript_keys(
            &self.client_identity,
            &self.server_identity,
            pa,
            &self.public_value,
            &z,
            &v,
            &self.w0,
        )?;

        self.peer_value = Some(pa.to_vec());
        self.keys = Some(keys);

        Ok(())
    }

    /// The server confirmation MAC over `"server" || pB || pA`.
    pub fn confirmation(&self) -> Result<[u8; 32], Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;
        let peer_value = self.peer_value.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        confirmation_mac(&keys.confirm_key, SERVER_CONFIRM_LABEL, &self.public_value, peer_value)
    }

    /// Verifies the client confirmation MAC (`"client" || pA || pB`) in
    /// constant time.
    pub fn verify_peer_confirmation(&self, tag: &[u8]) -> Result<(), Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;
        let peer_value = self.peer_value.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        verify_confirmation_mac(&keys.confirm_key, CLIENT_CONFIRM_LABEL, peer_value, &self.public_value, tag)
    }

    pub fn shared_secret(&self) -> Result<SharedSecret, Spake2pError> {
        let keys = self.keys.as_ref().ok_or(Spake2pError::HandshakeNotComplete)?;

        Ok(SharedSecret::new(keys.shared_secret))
    }
}

impl Drop for Spake2pServer {
    fn drop(&mut self) {
        scrub_scalar(&mut self.w0);
        scrub_scalar(&mut self.y);
        if let Some(keys) = self.keys.as_mut() {
            keys.zeroize();
        }
    }
}
