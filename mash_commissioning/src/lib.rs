//! Commissioning core for the MASH mesh protocol.
//!
//! A controller and a factory-fresh device turn a short human-transcribable
//! setup code into a mutually authenticated shared secret using SPAKE2+ over
//! P-256, and bootstrap long-term X.509 operational credentials on top of it.
//!
//! The crate is layered leaves-first:
//! - [`setup_code`]: the 8-digit setup code, discriminator and QR payload;
//! - [`spake2p`]: the SPAKE2+ engine and the persisted setup verifier;
//! - [`messages`]: the CBOR wire messages;
//! - [`framing`]: length-prefixed single-message frames;
//! - [`session`]: the PASE client and server state machines;
//! - [`enrollment`]: the CSR-based credential bootstrap;
//! - [`renewal`]: the nonce-bound credential renewal.
//!
//! Transport, CA signing and device key storage are collaborator interfaces
//! consumed by this crate, not implemented here.

pub mod enrollment;
pub mod framing;
pub mod messages;
pub mod renewal;
pub mod session;
pub mod setup_code;
pub mod spake2p;

pub use enrollment::{CaSigner, CsrBundle, DeviceKeyStore, EnrollmentError, KeyStoreError, SignedCertificates};
pub use framing::FramingError;
pub use messages::{ErrorCode, Message, MessageError, MessageType, RenewalStatus};
pub use renewal::RenewalError;
pub use session::{PaseClient, PaseServer, SessionError};
pub use setup_code::{Discriminator, QrCodeData, QrCodeError, SetupCode, SetupCodeError};
pub use spake2p::{SetupVerifier, SharedSecret, Spake2pClient, Spake2pError, Spake2pServer};

pub use mash_common::cancel::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("setup code error: {0}")]
    SetupCode(#[from] SetupCodeError),
    #[error("QR code error: {0}")]
    QrCode(#[from] QrCodeError),
    #[error("SPAKE2+ error: {0}")]
    Spake2p(#[from] Spake2pError),
    #[error("message error: {0}")]
    Message(#[from] MessageError),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("enrollment error: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("renewal error: {0}")]
    Renewal(#[from] RenewalError),
}

pub type Result<T> = std::result::Result<T, Error>;
