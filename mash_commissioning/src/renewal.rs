//! Nonce-bound certificate renewal over any post-PASE secure channel.
//!
//! Four messages: the controller sends a fresh 32-byte nonce, the device
//! answers with a CSR carrying a truncated hash of that nonce, the
//! controller installs the newly signed certificate, the device acknowledges
//! with the sequence number now in force. The nonce hash ties the CSR to
//! this specific request, so a CSR captured from an earlier session cannot
//! be replayed into a new one.

use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use mash_common::cancel::CancellationToken;
use mash_common::utils::{random_array, sha256};

use crate::enrollment::{CaSigner, DeviceKeyStore, KeyStoreError};
use crate::messages::{
    CertRenewalAck, CertRenewalCsr, CertRenewalInstall, CertRenewalRequest, Message, RenewalStatus,
};
use crate::session::{recv, send, SessionError};

/// Length of the truncated nonce hash embedded in the CSR reply.
pub const NONCE_HASH_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("CSR reply is not bound to this request's nonce")]
    NonceMismatch,
    #[error("CA signing failed: {0}")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("device reported renewal failure: {0:?}")]
    Device(RenewalStatus),
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// The first 16 bytes of `SHA256(nonce)`.
pub fn compute_nonce_hash(nonce: &[u8]) -> [u8; NONCE_HASH_LENGTH] {
    let digest = sha256(nonce);

    let mut hash = [0u8; NONCE_HASH_LENGTH];
    hash.copy_from_slice(&digest[..NONCE_HASH_LENGTH]);
    hash
}

/// Constant-time check that `hash` is the truncated hash of `nonce`.
/// A hash of the wrong length is rejected outright.
pub fn validate_nonce_hash(nonce: &[u8], hash: &[u8]) -> bool {
    if hash.len() != NONCE_HASH_LENGTH {
        return false;
    }

    let expected = compute_nonce_hash(nonce);
    bool::from(expected.as_slice().ct_eq(hash))
}

/// Controller role: drives one renewal and returns the sequence number the
/// device reports as active afterwards.
///
/// The zone parameters are forwarded to the CA signer unchanged; `zone_ca`
/// is offered to the device so it can rotate its trust anchor alongside the
/// operational certificate.
pub async fn renew<S, C>(
    stream: &mut S,
    cancel: &CancellationToken,
    signer: &C,
    zone_ca: Option<Vec<u8>>,
    zone_type: u8,
    zone_priority: u8,
    sequence: u32,
) -> Result<u32, RenewalError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: CaSigner,
{
    let nonce: [u8; 32] = random_array();

    debug!("requesting renewal CSR");
    send(
        stream,
        cancel,
        &Message::CertRenewalRequest(CertRenewalRequest { nonce, zone_ca }),
    )
    .await?;

    let csr_reply = match recv(stream, cancel).await? {
        Message::CertRenewalCsr(reply) => reply,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };

    // An absent hash is tolerated for older firmware; a present one must
    // match this request's nonce exactly.
    if let Some(nonce_hash) = &csr_reply.nonce_hash {
        if !validate_nonce_hash(&nonce, nonce_hash) {
            warn!("renewal CSR carries a stale or forged nonce hash");
            let rejection = Message::CertRenewalAck(CertRenewalAck {
                status: RenewalStatus::InvalidNonce,
                active_sequence: sequence,
            });
            let _ = send(stream, cancel, &rejection).await;
            return Err(RenewalError::NonceMismatch);
        }
    }

    let certificates = signer
        .sign(&csr_reply.csr, None, zone_type, zone_priority)
        .await
        .map_err(|error| RenewalError::Signer(Box::new(error)))?;

    debug!(sequence, "installing renewed certificate");
    send(
        stream,
        cancel,
        &Message::CertRenewalInstall(CertRenewalInstall {
            new_cert: certificates.operational_cert,
            sequence,
        }),
    )
    .await?;

    let ack = match recv(stream, cancel).await? {
        Message::CertRenewalAck(ack) => ack,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };
    if ack.status != RenewalStatus::Success {
        return Err(RenewalError::Device(ack.status));
    }

    debug!(active_sequence = ack.active_sequence, "renewal complete");
    Ok(ack.active_sequence)
}

/// Device role: answers one renewal exchange and returns the sequence number
/// in force afterwards. On any failure the previous sequence stays active
/// and is reported in the acknowledgement.
pub async fn serve_renewal<S, K>(
    stream: &mut S,
    cancel: &CancellationToken,
    keystore: &K,
    current_sequence: u32,
) -> Result<u32, RenewalError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    K: DeviceKeyStore,
{
    let request = match recv(stream, cancel).await? {
        Message::CertRenewalRequest(request) => request,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };

    let bundle = match keystore.create_csr(&request.nonce).await {
        Ok(bundle) => bundle,
        Err(error) => {
            warn!("renewal CSR generation failed: {error}");
            let ack = Message::CertRenewalAck(CertRenewalAck {
                status: RenewalStatus::CsrFailed,
                active_sequence: current_sequence,
            });
            let _ = send(stream, cancel, &ack).await;
            return Err(error.into());
        }
    };

    send(
        stream,
        cancel,
        &Message::CertRenewalCsr(CertRenewalCsr {
            csr: bundle.csr,
            nonce_hash: Some(compute_nonce_hash(&request.nonce)),
        }),
    )
    .await?;

    let install = match recv(stream, cancel).await? {
        Message::CertRenewalInstall(install) => install,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };

    match keystore.renew_certificate(&install.new_cert, install.sequence).await {
        Ok(()) => {
            send(
                stream,
                cancel,
                &Message::CertRenewalAck(CertRenewalAck {
                    status: RenewalStatus::Success,
                    active_sequence: install.sequence,
                }),
            )
            .await?;
            debug!(sequence = install.sequence, "renewed certificate installed");
            Ok(install.sequence)
        }
        Err(error) => {
            warn!("renewed certificate install failed: {error}");
            let status = match &error {
                KeyStoreError::InvalidCertificate(_) => RenewalStatus::InvalidCert,
                _ => RenewalStatus::InstallFailed,
            };
            let _ = send(
                stream,
                cancel,
                &Message::CertRenewalAck(CertRenewalAck {
                    status,
                    active_sequence: current_sequence,
                }),
            )
            .await;
            Err(error.into())
        }
    }
}
