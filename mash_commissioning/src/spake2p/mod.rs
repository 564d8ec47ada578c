//! SPAKE2+ over NIST P-256 with SHA-256.
//!
//! An augmented PAKE: the server stores a one-way verifier derived from the
//! setup code rather than the code itself, so a stolen verifier does not
//! directly reveal the password. Client and server each combine a fresh
//! ephemeral scalar with the password-derived `w0` and the fixed generator
//! points `M`/`N`, exchange the blinded public values, and derive identical
//! session keys from a shared transcript.
//!
//! Engines are single-use: one handshake per [`Spake2pClient`] /
//! [`Spake2pServer`]. Ephemeral scalars and derived keys are scrubbed when
//! the engine is dropped.

use hex_literal::hex;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use p256::elliptic_curve::bigint::U256;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::Field;
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use mash_common::utils::hkdf_sha256;

mod client;
mod server;
mod verifier;

pub use client::Spake2pClient;
pub use server::Spake2pServer;
pub use verifier::SetupVerifier;

/// HKDF info label for deriving `w0`/`w1` from the setup code.
const W_DERIVATION_INFO: &[u8] = b"SPAKE2+-P256-SHA256 w";

/// HKDF info label for deriving the session keys from the transcript.
const KEY_DERIVATION_INFO: &[u8] = b"SPAKE2+-P256-SHA256";

const CLIENT_CONFIRM_LABEL: &[u8] = b"client";
const SERVER_CONFIRM_LABEL: &[u8] = b"server";

#[derive(Debug, thiserror::Error)]
pub enum Spake2pError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("confirmation verification failed")]
    ConfirmationFailed,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("handshake keys have not been derived yet")]
    HandshakeNotComplete,
    #[error("invalid verifier record: {0}")]
    InvalidVerifier(&'static str),
    #[error("verifier encoding failed: {0}")]
    Encode(#[source] ciborium::ser::Error<std::io::Error>),
    #[error("verifier decoding failed: {0}")]
    Decode(#[source] ciborium::de::Error<std::io::Error>),
}

/// The fixed SPAKE2+ generator point `M`, blinding the client value `pA`.
static GENERATOR_M: Lazy<ProjectivePoint> = Lazy::new(|| {
    fixed_point(
        &hex!("886e2f97ace46e55ba9dd7242579f2993b64e16ef3dcab95afd497333d8fa12f"),
        &hex!("5ff355163e43ce224e0b0e65ff02ac8e5c7be09419c785e0ca547d55a12e2d20"),
    )
});

/// The fixed SPAKE2+ generator point `N`, blinding the server value `pB`.
static GENERATOR_N: Lazy<ProjectivePoint> = Lazy::new(|| {
    fixed_point(
        &hex!("d8bbd6c639c62937b04d997f38c3770719c629d7014d49a24b4f98baa1292b49"),
        &hex!("07d60aa6bfade45008a636337f5168c64d9bd36034808cd564490b1e656edbe7"),
    )
});

fn fixed_point(x: &[u8; 32], y: &[u8; 32]) -> ProjectivePoint {
    let encoded =
        EncodedPoint::from_affine_coordinates(FieldBytes::from_slice(x), FieldBytes::from_slice(y), false);
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .expect("fixed SPAKE2+ generator point is on the curve");

    ProjectivePoint::from(affine)
}

/// The 32-byte session secret produced by a successful handshake.
///
/// Scrubbed on drop; equality is constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    fn new(bytes: [u8; 32]) -> Self {
        SharedSecret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

impl Eq for SharedSecret {}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// The two 32-byte keys read from the transcript KDF output.
#[derive(Zeroize)]
struct TranscriptKeys {
    shared_secret: [u8; 32],
    confirm_key: [u8; 32],
}

/// Interprets 32 bytes as a big-endian integer and reduces it modulo the
/// P-256 group order.
fn scalar_reduced(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(bytes))
}

/// Derives `(w0, w1)` from the setup code and the two identities.
fn derive_w0_w1(
    password: &[u8],
    client_identity: &[u8],
    server_identity: &[u8],
) -> Result<(Scalar, Scalar), Spake2pError> {
    let mut salt = Vec::with_capacity(client_identity.len() + server_identity.len());
    salt.extend_from_slice(client_identity);
    salt.extend_from_slice(server_identity);

    let mut okm =
        hkdf_sha256(password, Some(&salt), W_DERIVATION_INFO, 64).map_err(|_| Spake2pError::KeyDerivation)?;

    let mut half = [0u8; 32];
    half.copy_from_slice(&okm[..32]);
    let w0 = scalar_reduced(&half);
    half.copy_from_slice(&okm[32..]);
    let w1 = scalar_reduced(&half);

    okm.zeroize();
    half.zeroize();

    Ok((w0, w1))
}

/// Decodes a peer public value: must be an uncompressed SEC1 point on the
/// curve, and not the point at infinity.
fn decode_public_value(bytes: &[u8]) -> Result<ProjectivePoint, Spake2pError> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Spake2pError::InvalidPublicKey)?;
    if encoded.is_identity() || encoded.is_compressed() {
        return Err(Spake2pError::InvalidPublicKey);
    }

    let affine =
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded)).ok_or(Spake2pError::InvalidPublicKey)?;

    Ok(ProjectivePoint::from(affine))
}

fn encode_uncompressed(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(false).as_bytes().to_vec()
}

/// Hashes the handshake transcript and expands it into the session keys.
/// Both peers absorb the exact same byte sequence: identities, public values
/// in client-then-server order, the two shared points, and `w0` as fixed
/// 32-byte big-endian.
fn derive_transcript_keys(
    client_identity: &[u8],
    server_identity: &[u8],
    pa: &[u8],
    pb: &[u8],
    z: &ProjectivePoint,
    v: &ProjectivePoint,
    w0: &Scalar,
) -> Result<TranscriptKeys, Spake2pError> {
    let mut hasher = Sha256::new();
    hasher.update(client_identity);
    hasher.update(server_identity);
    hasher.update(pa);
    hasher.update(pb);
    hasher.update(encode_uncompressed(z));
    hasher.update(encode_uncompressed(v));
    hasher.update(w0.to_bytes());
    let transcript = hasher.finalize();

    let mut okm = hkdf_sha256(transcript.as_slice(), None, KEY_DERIVATION_INFO, 64)
        .map_err(|_| Spake2pError::KeyDerivation)?;

    let mut keys = TranscriptKeys {
        shared_secret: [0u8; 32],
        confirm_key: [0u8; 32],
    };
    keys.shared_secret.copy_from_slice(&okm[..32]);
    keys.confirm_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    Ok(keys)
}

fn confirmation_mac(
    confirm_key: &[u8; 32],
    label: &[u8],
    first: &[u8],
    second: &[u8],
) -> Result<[u8; 32], Spake2pError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(confirm_key).map_err(|_| Spake2pError::KeyDerivation)?;
    mac.update(label);
    mac.update(first);
    mac.update(second);

    let tag = mac.finalize().into_bytes();

    let mut output = [0u8; 32];
    output.copy_from_slice(tag.as_slice());
    Ok(output)
}

/// Constant-time MAC verification through `Hmac::verify_slice`.
fn verify_confirmation_mac(
    confirm_key: &[u8; 32],
    label: &[u8],
    first: &[u8],
    second: &[u8],
    tag: &[u8],
) -> Result<(), Spake2pError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(confirm_key).map_err(|_| Spake2pError::KeyDerivation)?;
    mac.update(label);
    mac.update(first);
    mac.update(second);

    mac.verify_slice(tag).map_err(|_| Spake2pError::ConfirmationFailed)
}

/// Draws an ephemeral scalar uniformly from `[0, n)`.
fn random_scalar() -> Scalar {
    Scalar::random(&mut rand_core::OsRng)
}

/// Overwrites a scalar with zero before its owner is dropped.
fn scrub_scalar(scalar: &mut Scalar) {
    *scalar = Scalar::ZERO;
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn generator_points_are_on_the_curve() {
        // Forcing the lazy statics is enough; construction panics otherwise.
        assert_ne!(*GENERATOR_M, ProjectivePoint::IDENTITY);
        assert_ne!(*GENERATOR_N, ProjectivePoint::IDENTITY);
        assert_ne!(*GENERATOR_M, *GENERATOR_N);
    }

    #[test]
    fn w0_w1_derivation_is_deterministic() {
        let a = derive_w0_w1(b"00000001", b"controller", b"device").unwrap();
        let b = derive_w0_w1(b"00000001", b"controller", b"device").unwrap();

        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn w0_w1_depend_on_password_and_identities() {
        let base = derive_w0_w1(b"00000001", b"controller", b"device").unwrap();
        let other_password = derive_w0_w1(b"00000002", b"controller", b"device").unwrap();
        let other_identity = derive_w0_w1(b"00000001", b"controller", b"other").unwrap();

        assert_ne!(base.0, other_password.0);
        assert_ne!(base.0, other_identity.0);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_matches!(decode_public_value(&[0x01, 0x02, 0x03]), Err(Spake2pError::InvalidPublicKey));
    }

    #[test]
    fn decode_rejects_identity_point() {
        assert_matches!(decode_public_value(&[0x00]), Err(Spake2pError::InvalidPublicKey));
    }

    #[test]
    fn decode_rejects_compressed_points() {
        let point = encode_uncompressed(&(ProjectivePoint::GENERATOR * Scalar::from(7u64)));
        let compressed = (ProjectivePoint::GENERATOR * Scalar::from(7u64))
            .to_affine()
            .to_encoded_point(true);

        assert_matches!(decode_public_value(compressed.as_bytes()), Err(Spake2pError::InvalidPublicKey));
        decode_public_value(&point).unwrap();
    }

    #[test]
    fn decode_rejects_off_curve_point() {
        let mut point = encode_uncompressed(&(ProjectivePoint::GENERATOR * Scalar::from(7u64)));
        // Corrupt the y coordinate.
        point[64] ^= 0x01;

        assert_matches!(decode_public_value(&point), Err(Spake2pError::InvalidPublicKey));
    }

    #[test]
    fn confirmation_mac_round_trips() {
        let key = [0x42u8; 32];
        let mac = confirmation_mac(&key, CLIENT_CONFIRM_LABEL, b"first", b"second").unwrap();

        verify_confirmation_mac(&key, CLIENT_CONFIRM_LABEL, b"first", b"second", &mac).unwrap();
        assert_matches!(
            verify_confirmation_mac(&key, SERVER_CONFIRM_LABEL, b"first", b"second", &mac),
            Err(Spake2pError::ConfirmationFailed)
        );
    }
}
