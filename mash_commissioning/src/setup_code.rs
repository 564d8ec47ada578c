//! The setup code, the mDNS discriminator and the QR payload.
//!
//! The setup code is the 8-digit decimal secret transcribed from the device
//! (QR, label or display). Its textual form is the PAKE password input; it is
//! never transmitted. The discriminator is a 12-bit value advertised over
//! mDNS so a controller can pick out the device whose QR it just scanned.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

/// Largest valid setup code: eight decimal digits.
pub const MAX_SETUP_CODE: u32 = 99_999_999;

/// Largest valid discriminator: twelve bits.
pub const MAX_DISCRIMINATOR: u16 = 0x0FFF;

const QR_PREFIX: &str = "MASH";
const QR_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SetupCodeError {
    #[error("setup code must be exactly 8 decimal digits")]
    InvalidSetupCode,
    #[error("setup code {0} exceeds the maximum of {MAX_SETUP_CODE}")]
    OutOfRange(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum QrCodeError {
    #[error("malformed QR payload: {0}")]
    InvalidQrCode(&'static str),
    #[error("unsupported QR payload version {0}")]
    UnsupportedVersion(u64),
    #[error("setup code error: {0}")]
    SetupCode(#[from] SetupCodeError),
}

/// The 8-digit decimal commissioning secret.
///
/// The canonical textual form always has leading zeros, and its UTF-8 bytes
/// are the SPAKE2+ password input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCode(u32);

impl SetupCode {
    pub fn new(code: u32) -> Result<Self, SetupCodeError> {
        if code > MAX_SETUP_CODE {
            return Err(SetupCodeError::OutOfRange(code));
        }

        Ok(SetupCode(code))
    }

    /// Draws a fresh setup code uniformly from the OS CSPRNG.
    pub fn generate() -> Self {
        SetupCode(OsRng.gen_range(0..=MAX_SETUP_CODE))
    }

    /// Parses the textual form: surrounding whitespace is tolerated, the rest
    /// must be exactly 8 decimal digits.
    pub fn parse(input: &str) -> Result<Self, SetupCodeError> {
        let trimmed = input.trim();
        if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SetupCodeError::InvalidSetupCode);
        }

        let code: u32 = trimmed.parse().map_err(|_| SetupCodeError::InvalidSetupCode)?;
        SetupCode::new(code)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// The UTF-8 bytes of the 8-digit textual form; the PAKE password input.
    pub fn as_password_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for SetupCode {
    type Err = SetupCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SetupCode::parse(s)
    }
}

/// The 12-bit value devices embed in their mDNS advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discriminator(u16);

impl Discriminator {
    pub fn new(value: u16) -> Result<Self, QrCodeError> {
        if value > MAX_DISCRIMINATOR {
            return Err(QrCodeError::InvalidQrCode("discriminator exceeds 12 bits"));
        }

        Ok(Discriminator(value))
    }

    /// Draws a fresh discriminator uniformly from the OS CSPRNG.
    pub fn generate() -> Self {
        Discriminator(OsRng.gen_range(0..=MAX_DISCRIMINATOR))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parsed contents of a `MASH:` QR payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrCodeData {
    pub version: u8,
    pub discriminator: Discriminator,
    pub setup_code: SetupCode,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl QrCodeData {
    pub fn new(discriminator: Discriminator, setup_code: SetupCode, vendor_id: u16, product_id: u16) -> Self {
        QrCodeData {
            version: QR_VERSION,
            discriminator,
            setup_code,
            vendor_id,
            product_id,
        }
    }

    /// Parses the textual payload `MASH:<v>:<disc>:<sc>:<vid>:<pid>`.
    /// Vendor and product IDs accept both decimal and `0xHHHH` forms.
    pub fn parse(payload: &str) -> Result<Self, QrCodeError> {
        let trimmed = payload.trim();
        let parts: Vec<&str> = trimmed.split(':').collect();

        let [prefix, version, discriminator, setup_code, vendor_id, product_id] = parts.as_slice() else {
            return Err(QrCodeError::InvalidQrCode("expected 6 colon-separated fields"));
        };

        if *prefix != QR_PREFIX {
            return Err(QrCodeError::InvalidQrCode("missing MASH prefix"));
        }

        let version: u64 = version
            .parse()
            .map_err(|_| QrCodeError::InvalidQrCode("version is not a number"))?;
        if version != u64::from(QR_VERSION) {
            return Err(QrCodeError::UnsupportedVersion(version));
        }

        let discriminator: u16 = discriminator
            .parse()
            .map_err(|_| QrCodeError::InvalidQrCode("discriminator is not a number"))?;
        let discriminator = Discriminator::new(discriminator)?;

        let setup_code = SetupCode::parse(setup_code)?;

        let vendor_id = parse_id(vendor_id).ok_or(QrCodeError::InvalidQrCode("invalid vendor ID"))?;
        let product_id = parse_id(product_id).ok_or(QrCodeError::InvalidQrCode("invalid product ID"))?;

        Ok(QrCodeData {
            version: QR_VERSION,
            discriminator,
            setup_code,
            vendor_id,
            product_id,
        })
    }
}

impl fmt::Display for QrCodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:0x{:04X}:0x{:04X}",
            QR_PREFIX, self.version, self.discriminator, self.setup_code, self.vendor_id, self.product_id
        )
    }
}

/// A 16-bit vendor or product ID, decimal or `0x`-prefixed hex of either case.
fn parse_id(input: &str) -> Option<u16> {
    if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        input.parse().ok()
    }
}
