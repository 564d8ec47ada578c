use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::PrimeField;
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

use crate::setup_code::SetupCode;

use super::{derive_w0_w1, Spake2pError};

/// The server-side persisted derivative of a setup code.
///
/// A pure function of `(setup code, client identity, server identity)`:
/// `W0` is the reduced password scalar, `L = w1·G` compressed. Derived once
/// at device registration, then read-only during handshakes. The record does
/// not reveal the setup code, so it is what a device stores instead of the
/// code itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupVerifier {
    #[serde(rename = "W0", with = "serde_bytes")]
    w0: Vec<u8>,
    #[serde(rename = "L", with = "serde_bytes")]
    l: Vec<u8>,
    #[serde(rename = "Identity", with = "serde_bytes")]
    identity: Vec<u8>,
}

impl SetupVerifier {
    pub fn generate(
        setup_code: &SetupCode,
        client_identity: &[u8],
        server_identity: &[u8],
    ) -> Result<Self, Spake2pError> {
        let (w0, w1) = derive_w0_w1(&setup_code.as_password_bytes(), client_identity, server_identity)?;
        let l = ProjectivePoint::GENERATOR * w1;

        Ok(SetupVerifier {
            w0: w0.to_bytes().as_slice().to_vec(),
            l: l.to_affine().to_encoded_point(true).as_bytes().to_vec(),
            identity: client_identity.to_vec(),
        })
    }

    /// The 32-byte reduced `w0` scalar.
    pub fn w0(&self) -> &[u8] {
        &self.w0
    }

    /// The 33-byte compressed point `L`.
    pub fn l(&self) -> &[u8] {
        &self.l
    }

    /// The client identity this verifier was registered for.
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Encodes the record for storage.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Spake2pError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes).map_err(Spake2pError::Encode)?;
        Ok(bytes)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, Spake2pError> {
        ciborium::de::from_reader(bytes).map_err(Spake2pError::Decode)
    }

    pub(super) fn w0_scalar(&self) -> Result<Scalar, Spake2pError> {
        if self.w0.len() != 32 {
            return Err(Spake2pError::InvalidVerifier("W0 must be 32 bytes"));
        }

        Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(&self.w0)))
            .ok_or(Spake2pError::InvalidVerifier("W0 is not a canonical scalar"))
    }

    pub(super) fn l_point(&self) -> Result<ProjectivePoint, Spake2pError> {
        if self.l.len() != 33 {
            return Err(Spake2pError::InvalidVerifier("L must be a 33-byte compressed point"));
        }

        let encoded =
            EncodedPoint::from_bytes(&self.l).map_err(|_| Spake2pError::InvalidVerifier("L is not a SEC1 point"))?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or(Spake2pError::InvalidVerifier("L is not on the curve"))?;

        Ok(ProjectivePoint::from(affine))
    }
}
