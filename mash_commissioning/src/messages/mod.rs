//! The commissioning wire messages.
//!
//! Every message is a CBOR map keyed by small integers, with the message
//! type at key 1. Field numbers are stable across versions; decoding is
//! lenient on field order and unknown keys but strict on field types, and
//! optional fields are omitted on the wire when their default applies so old
//! peers keep decoding new messages.

use std::fmt;

use ciborium::value::Value;

mod codec;

use codec::{bytes, text, uint, MapDecoder, MapEncoder};

/// Map key carrying the message type in every message.
const MESSAGE_TYPE_KEY: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("CBOR encoding failed: {0}")]
    Encode(#[source] ciborium::ser::Error<std::io::Error>),
    #[error("message is not valid CBOR")]
    InvalidCbor,
    #[error("message is not a CBOR map")]
    NotAMap,
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("missing required field {key}")]
    MissingField { key: u8 },
    #[error("field {key} has the wrong type or length")]
    InvalidField { key: u8 },
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
    #[error("unknown renewal status {0}")]
    UnknownRenewalStatus(u8),
}

/// The `msgType` discriminator at key 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    PaseRequest = 1,
    PaseResponse = 2,
    PaseConfirm = 3,
    PaseComplete = 4,
    CsrRequest = 10,
    CsrResponse = 11,
    CertInstall = 12,
    CertInstallResponse = 13,
    CommissioningComplete = 20,
    CertRenewalRequest = 30,
    CertRenewalCsr = 31,
    CertRenewalInstall = 32,
    CertRenewalAck = 33,
    CommissioningError = 255,
}

impl TryFrom<u64> for MessageType {
    type Error = MessageError;

    fn try_from(value: u64) -> Result<Self, MessageError> {
        let message_type = match value {
            1 => MessageType::PaseRequest,
            2 => MessageType::PaseResponse,
            3 => MessageType::PaseConfirm,
            4 => MessageType::PaseComplete,
            10 => MessageType::CsrRequest,
            11 => MessageType::CsrResponse,
            12 => MessageType::CertInstall,
            13 => MessageType::CertInstallResponse,
            20 => MessageType::CommissioningComplete,
            30 => MessageType::CertRenewalRequest,
            31 => MessageType::CertRenewalCsr,
            32 => MessageType::CertRenewalInstall,
            33 => MessageType::CertRenewalAck,
            255 => MessageType::CommissioningError,
            other => return Err(MessageError::UnknownMessageType(other)),
        };

        Ok(message_type)
    }
}

/// Protocol error codes carried in `errorCode` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    InvalidPublicKey = 1,
    ConfirmFailed = 2,
    CsrFailed = 3,
    CertInstallFailed = 4,
    Busy = 5,
    ZoneTypeExists = 10,
    InternalError = 255,
}

impl ErrorCode {
    /// Stable lowercase description. The two PAKE failure codes share one
    /// string so a peer cannot distinguish which check failed.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::InvalidPublicKey | ErrorCode::ConfirmFailed => "authentication failed",
            ErrorCode::CsrFailed => "csr failed",
            ErrorCode::CertInstallFailed => "certificate install failed",
            ErrorCode::Busy => "busy",
            ErrorCode::ZoneTypeExists => "zone type exists",
            ErrorCode::InternalError => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, MessageError> {
        let code = match value {
            0 => ErrorCode::Success,
            1 => ErrorCode::InvalidPublicKey,
            2 => ErrorCode::ConfirmFailed,
            3 => ErrorCode::CsrFailed,
            4 => ErrorCode::CertInstallFailed,
            5 => ErrorCode::Busy,
            10 => ErrorCode::ZoneTypeExists,
            255 => ErrorCode::InternalError,
            other => return Err(MessageError::UnknownErrorCode(other)),
        };

        Ok(code)
    }
}

/// Status codes carried in `CertRenewalAck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RenewalStatus {
    Success = 0,
    CsrFailed = 1,
    InstallFailed = 2,
    InvalidCert = 3,
    InvalidNonce = 4,
}

impl From<RenewalStatus> for u8 {
    fn from(status: RenewalStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for RenewalStatus {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, MessageError> {
        let status = match value {
            0 => RenewalStatus::Success,
            1 => RenewalStatus::CsrFailed,
            2 => RenewalStatus::InstallFailed,
            3 => RenewalStatus::InvalidCert,
            4 => RenewalStatus::InvalidNonce,
            other => return Err(MessageError::UnknownRenewalStatus(other)),
        };

        Ok(status)
    }
}

/// Opens a PASE handshake with the client's blinded public value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseRequest {
    pub public_value: Vec<u8>,
    pub client_identity: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseResponse {
    pub public_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseConfirm {
    pub confirmation: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseComplete {
    pub confirmation: [u8; 32],
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrRequest {
    pub nonce: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrResponse {
    /// DER-encoded PKCS#10 request, opaque to this layer.
    pub csr: Vec<u8>,
    pub attestation_cert: Option<Vec<u8>>,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInstall {
    pub operational_cert: Vec<u8>,
    pub ca_cert: Vec<u8>,
    pub zone_type: u8,
    pub zone_priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInstallResponse {
    pub error_code: ErrorCode,
}

/// Fatal protocol error, sent best-effort before closing. `retry_after`
/// (milliseconds) is only present for transient conditions such as
/// [`ErrorCode::Busy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningError {
    pub error_code: ErrorCode,
    pub message: Option<String>,
    // Private so a zero hint cannot exist: every constructor normalizes it
    // to `None`, which the encoder omits.
    retry_after: Option<u32>,
}

impl CommissioningError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        CommissioningError {
            error_code,
            message: Some(message.into()),
            retry_after: None,
        }
    }

    /// A zero hint means "no hint" and is normalized to omission.
    pub fn with_retry_after(mut self, retry_after_ms: u32) -> Self {
        self.retry_after = (retry_after_ms != 0).then_some(retry_after_ms);
        self
    }

    /// The retry hint in milliseconds, if the peer provided one.
    pub fn retry_after(&self) -> Option<u32> {
        self.retry_after
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRenewalRequest {
    pub nonce: [u8; 32],
    pub zone_ca: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRenewalCsr {
    pub csr: Vec<u8>,
    /// Truncated SHA256 of the request nonce, binding this CSR to one
    /// specific renewal request. Optional on the wire for older firmware.
    pub nonce_hash: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRenewalInstall {
    pub new_cert: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRenewalAck {
    pub status: RenewalStatus,
    /// The sequence number in force after the install: the installed
    /// sequence on success, the previous one on any failure.
    pub active_sequence: u32,
}

/// The tagged union over all commissioning messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PaseRequest(PaseRequest),
    PaseResponse(PaseResponse),
    PaseConfirm(PaseConfirm),
    PaseComplete(PaseComplete),
    CsrRequest(CsrRequest),
    CsrResponse(CsrResponse),
    CertInstall(CertInstall),
    CertInstallResponse(CertInstallResponse),
    CommissioningComplete,
    CommissioningError(CommissioningError),
    CertRenewalRequest(CertRenewalRequest),
    CertRenewalCsr(CertRenewalCsr),
    CertRenewalInstall(CertRenewalInstall),
    CertRenewalAck(CertRenewalAck),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::PaseRequest(_) => MessageType::PaseRequest,
            Message::PaseResponse(_) => MessageType::PaseResponse,
            Message::PaseConfirm(_) => MessageType::PaseConfirm,
            Message::PaseComplete(_) => MessageType::PaseComplete,
            Message::CsrRequest(_) => MessageType::CsrRequest,
            Message::CsrResponse(_) => MessageType::CsrResponse,
            Message::CertInstall(_) => MessageType::CertInstall,
            Message::CertInstallResponse(_) => MessageType::CertInstallResponse,
            Message::CommissioningComplete => MessageType::CommissioningComplete,
            Message::CommissioningError(_) => MessageType::CommissioningError,
            Message::CertRenewalRequest(_) => MessageType::CertRenewalRequest,
            Message::CertRenewalCsr(_) => MessageType::CertRenewalCsr,
            Message::CertRenewalInstall(_) => MessageType::CertRenewalInstall,
            Message::CertRenewalAck(_) => MessageType::CertRenewalAck,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let message_type = self.message_type() as u8;

        match self {
            Message::PaseRequest(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.public_value))
                .field(3, bytes(&message.client_identity))
                .encode(),
            Message::PaseResponse(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.public_value))
                .encode(),
            Message::PaseConfirm(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.confirmation))
                .encode(),
            Message::PaseComplete(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.confirmation))
                .field(3, uint(u8::from(message.error_code).into()))
                .encode(),
            Message::CsrRequest(message) => MapEncoder::new(message_type).field(2, bytes(&message.nonce)).encode(),
            Message::CsrResponse(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.csr))
                .optional(3, message.attestation_cert.as_deref().map(bytes))
                .field(4, uint(u8::from(message.error_code).into()))
                .encode(),
            Message::CertInstall(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.operational_cert))
                .field(3, bytes(&message.ca_cert))
                .field(4, uint(message.zone_type.into()))
                .field(5, uint(message.zone_priority.into()))
                .encode(),
            Message::CertInstallResponse(message) => MapEncoder::new(message_type)
                .field(2, uint(u8::from(message.error_code).into()))
                .encode(),
            Message::CommissioningComplete => MapEncoder::new(message_type).encode(),
            Message::CommissioningError(message) => MapEncoder::new(message_type)
                .field(2, uint(u8::from(message.error_code).into()))
                .optional(3, message.message.as_deref().map(text))
                .optional(4, message.retry_after.map(|ms| uint(ms.into())))
                .encode(),
            Message::CertRenewalRequest(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.nonce))
                .optional(3, message.zone_ca.as_deref().map(bytes))
                .encode(),
            Message::CertRenewalCsr(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.csr))
                .optional(3, message.nonce_hash.as_ref().map(|hash| bytes(hash)))
                .encode(),
            Message::CertRenewalInstall(message) => MapEncoder::new(message_type)
                .field(2, bytes(&message.new_cert))
                .field(3, uint(message.sequence.into()))
                .encode(),
            Message::CertRenewalAck(message) => MapEncoder::new(message_type)
                .field(2, uint(u8::from(message.status).into()))
                .field(3, uint(message.active_sequence.into()))
                .encode(),
        }
    }

    /// Reads only the message type at key 1.
    pub fn peek_message_type(encoded: &[u8]) -> Result<MessageType, MessageError> {
        let value: Value = ciborium::de::from_reader(encoded).map_err(|_| MessageError::InvalidCbor)?;
        let map = MapDecoder::new(&value)?;

        MessageType::try_from(map.required_u64(MESSAGE_TYPE_KEY)?)
    }

    /// Peek-decodes the type at key 1, then decodes the full message under
    /// the corresponding schema.
    pub fn decode(encoded: &[u8]) -> Result<Self, MessageError> {
        let value: Value = ciborium::de::from_reader(encoded).map_err(|_| MessageError::InvalidCbor)?;
        let map = MapDecoder::new(&value)?;
        let message_type = MessageType::try_from(map.required_u64(MESSAGE_TYPE_KEY)?)?;

        let message = match message_type {
            MessageType::PaseRequest => Message::PaseRequest(PaseRequest {
                public_value: map.required_bytes(2)?,
                client_identity: map.required_bytes(3)?,
            }),
            MessageType::PaseResponse => Message::PaseResponse(PaseResponse {
                public_value: map.required_bytes(2)?,
            }),
            MessageType::PaseConfirm => Message::PaseConfirm(PaseConfirm {
                confirmation: map.required_byte_array(2)?,
            }),
            MessageType::PaseComplete => Message::PaseComplete(PaseComplete {
                confirmation: map.required_byte_array(2)?,
                error_code: map.required_u8(3)?.try_into()?,
            }),
            MessageType::CsrRequest => Message::CsrRequest(CsrRequest {
                nonce: map.required_bytes(2)?,
            }),
            MessageType::CsrResponse => Message::CsrResponse(CsrResponse {
                csr: map.required_bytes(2)?,
                attestation_cert: map.optional_bytes(3)?,
                error_code: map.required_u8(4)?.try_into()?,
            }),
            MessageType::CertInstall => Message::CertInstall(CertInstall {
                operational_cert: map.required_bytes(2)?,
                ca_cert: map.required_bytes(3)?,
                zone_type: map.required_u8(4)?,
                zone_priority: map.required_u8(5)?,
            }),
            MessageType::CertInstallResponse => Message::CertInstallResponse(CertInstallResponse {
                error_code: map.required_u8(2)?.try_into()?,
            }),
            MessageType::CommissioningComplete => Message::CommissioningComplete,
            MessageType::CommissioningError => Message::CommissioningError(CommissioningError {
                error_code: map.required_u8(2)?.try_into()?,
                message: map.optional_text(3)?,
                // A zero hint means "no hint".
                retry_after: map.optional_u32(4)?.filter(|ms| *ms != 0),
            }),
            MessageType::CertRenewalRequest => Message::CertRenewalRequest(CertRenewalRequest {
                nonce: map.required_byte_array(2)?,
                zone_ca: map.optional_bytes(3)?,
            }),
            MessageType::CertRenewalCsr => Message::CertRenewalCsr(CertRenewalCsr {
                csr: map.required_bytes(2)?,
                nonce_hash: map.optional_byte_array(3)?,
            }),
            MessageType::CertRenewalInstall => Message::CertRenewalInstall(CertRenewalInstall {
                new_cert: map.required_bytes(2)?,
                sequence: map.required_u32(3)?,
            }),
            MessageType::CertRenewalAck => Message::CertRenewalAck(CertRenewalAck {
                status: map.required_u8(2)?.try_into()?,
                active_sequence: map.required_u32(3)?,
            }),
        };

        Ok(message)
    }
}
