//! Credential bootstrap: CSR request, certificate install, completion.
//!
//! Runs after PASE has succeeded, under the transport protected by the
//! derived session secret. The controller drives; the device answers. The
//! CSR and certificates are opaque DER byte strings here: signing lives
//! behind [`CaSigner`], key generation and storage behind [`DeviceKeyStore`].

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use mash_common::cancel::CancellationToken;
use mash_common::utils::random_bytes;

use crate::messages::{
    CertInstall, CertInstallResponse, CsrRequest, CsrResponse, ErrorCode, Message,
};
use crate::session::{recv, send, SessionError};

/// Number of random bytes in a CSR challenge nonce.
pub const CSR_NONCE_LENGTH: usize = 32;

/// Signs a device CSR into an operational certificate. Typically backed by
/// the zone's certificate authority.
pub trait CaSigner {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn sign(
        &self,
        csr: &[u8],
        attestation_cert: Option<&[u8]>,
        zone_type: u8,
        zone_priority: u8,
    ) -> Result<SignedCertificates, Self::Error>;
}

/// The output of a CA signing operation: both certificates are opaque DER.
#[derive(Debug, Clone)]
pub struct SignedCertificates {
    pub operational_cert: Vec<u8>,
    pub ca_cert: Vec<u8>,
}

/// The CSR produced by a device key store, with an optional attestation
/// blob passed through to the CA unexamined.
#[derive(Debug, Clone)]
pub struct CsrBundle {
    pub csr: Vec<u8>,
    pub attestation_cert: Option<Vec<u8>>,
}

/// Failures a device key store can report. The variant picks the error code
/// sent back to the controller.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("a certificate for this zone type is already installed")]
    ZoneTypeExists,
    #[error("certificate rejected: {0}")]
    InvalidCertificate(String),
    #[error("CSR generation failed: {0}")]
    Csr(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("certificate install failed: {0}")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Generates the device keypair, binds nonces into CSRs and stores the
/// issued certificates. Backed by the device's secure key storage.
pub trait DeviceKeyStore {
    /// Produces a PKCS#10 CSR with `nonce` bound into a CSR attribute.
    async fn create_csr(&self, nonce: &[u8]) -> Result<CsrBundle, KeyStoreError>;

    /// Installs the issued operational certificate and the zone CA.
    async fn install_certificate(
        &self,
        operational_cert: &[u8],
        ca_cert: &[u8],
        zone_type: u8,
        zone_priority: u8,
    ) -> Result<(), KeyStoreError>;

    /// Replaces the operational certificate during renewal.
    async fn renew_certificate(&self, new_cert: &[u8], sequence: u32) -> Result<(), KeyStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("device rejected CSR request: {0}")]
    Csr(ErrorCode),
    #[error("device rejected certificate install: {0}")]
    CertInstall(ErrorCode),
    #[error("CA signing failed: {0}")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// Controller role: obtains a CSR from the device, has it signed and
/// installs the result. Resolves once the device reports completion.
pub async fn commission<S, C>(
    stream: &mut S,
    cancel: &CancellationToken,
    signer: &C,
    zone_type: u8,
    zone_priority: u8,
) -> Result<(), EnrollmentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: CaSigner,
{
    debug!("requesting CSR");
    let nonce = random_bytes(CSR_NONCE_LENGTH);
    send(stream, cancel, &Message::CsrRequest(CsrRequest { nonce })).await?;

    let response = match recv(stream, cancel).await? {
        Message::CsrResponse(response) => response,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };
    if response.error_code != ErrorCode::Success {
        return Err(EnrollmentError::Csr(response.error_code));
    }

    let certificates = signer
        .sign(&response.csr, response.attestation_cert.as_deref(), zone_type, zone_priority)
        .await
        .map_err(|error| EnrollmentError::Signer(Box::new(error)))?;

    debug!("installing operational certificate");
    let install = Message::CertInstall(CertInstall {
        operational_cert: certificates.operational_cert,
        ca_cert: certificates.ca_cert,
        zone_type,
        zone_priority,
    });
    send(stream, cancel, &install).await?;

    let install_response = match recv(stream, cancel).await? {
        Message::CertInstallResponse(response) => response,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };
    if install_response.error_code != ErrorCode::Success {
        return Err(EnrollmentError::CertInstall(install_response.error_code));
    }

    match recv(stream, cancel).await? {
        Message::CommissioningComplete => {
            debug!("commissioning complete");
            Ok(())
        }
        other => Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    }
}

/// Device role: answers one bootstrap exchange, emitting completion after a
/// successful install. Protocol-level rejections are reported to the
/// controller and returned as errors here.
pub async fn serve_commissioning<S, K>(
    stream: &mut S,
    cancel: &CancellationToken,
    keystore: &K,
) -> Result<(), EnrollmentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    K: DeviceKeyStore,
{
    let request = match recv(stream, cancel).await? {
        Message::CsrRequest(request) => request,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };

    let bundle = match keystore.create_csr(&request.nonce).await {
        Ok(bundle) => bundle,
        Err(error) => {
            warn!("CSR generation failed: {error}");
            let response = Message::CsrResponse(CsrResponse {
                csr: Vec::new(),
                attestation_cert: None,
                error_code: ErrorCode::CsrFailed,
            });
            let _ = send(stream, cancel, &response).await;
            return Err(error.into());
        }
    };

    let response = Message::CsrResponse(CsrResponse {
        csr: bundle.csr,
        attestation_cert: bundle.attestation_cert,
        error_code: ErrorCode::Success,
    });
    send(stream, cancel, &response).await?;

    let install = match recv(stream, cancel).await? {
        Message::CertInstall(install) => install,
        other => return Err(SessionError::UnexpectedMessage(other.message_type()).into()),
    };

    let install_result = keystore
        .install_certificate(
            &install.operational_cert,
            &install.ca_cert,
            install.zone_type,
            install.zone_priority,
        )
        .await;

    match install_result {
        Ok(()) => {
            send(
                stream,
                cancel,
                &Message::CertInstallResponse(CertInstallResponse {
                    error_code: ErrorCode::Success,
                }),
            )
            .await?;
            send(stream, cancel, &Message::CommissioningComplete).await?;
            debug!("commissioning complete");
            Ok(())
        }
        Err(error) => {
            warn!("certificate install failed: {error}");
            let error_code = match &error {
                KeyStoreError::ZoneTypeExists => ErrorCode::ZoneTypeExists,
                _ => ErrorCode::CertInstallFailed,
            };
            let _ = send(
                stream,
                cancel,
                &Message::CertInstallResponse(CertInstallResponse { error_code }),
            )
            .await;
            Err(error.into())
        }
    }
}
