use thiserror::Error;

/// Status word returned by a CTAP1 authenticator in the trailing two
/// bytes of an APDU response.
pub const SW_NO_ERROR: u16 = 0x9000;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
pub const SW_WRONG_DATA: u16 = 0x6A80;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

/// CTAP1 failure carrying the raw status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("APDU error: SW=0x{sw:04X}")]
pub struct ApduError {
    pub sw: u16,
}

impl ApduError {
    pub fn new(sw: u16) -> Self {
        ApduError { sw }
    }

    /// The device wants a user-presence check before it will answer.
    /// Consumed by the polling driver, never surfaced to callers.
    pub fn is_use_not_satisfied(&self) -> bool {
        self.sw == SW_CONDITIONS_NOT_SATISFIED
    }
}

/// CTAP2 status codes reported by the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtapError {
    InvalidCommand,
    InvalidParameter,
    InvalidLength,
    CborUnexpectedType,
    InvalidCbor,
    MissingParameter,
    CredentialExcluded,
    UnsupportedAlgorithm,
    OperationDenied,
    KeyStoreFull,
    UnsupportedOption,
    InvalidOption,
    KeepaliveCancel,
    NoCredentials,
    UserActionTimeout,
    NotAllowed,
    PinInvalid,
    PinBlocked,
    PinAuthInvalid,
    PinAuthBlocked,
    PinNotSet,
    PinRequired,
    PinPolicyViolation,
    PinTokenExpired,
    RequestTooLarge,
    ActionTimeout,
    UpRequired,
    Other(u8),
}

impl CtapError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => CtapError::InvalidCommand,
            0x02 => CtapError::InvalidParameter,
            0x03 => CtapError::InvalidLength,
            0x11 => CtapError::CborUnexpectedType,
            0x12 => CtapError::InvalidCbor,
            0x14 => CtapError::MissingParameter,
            0x19 => CtapError::CredentialExcluded,
            0x26 => CtapError::UnsupportedAlgorithm,
            0x27 => CtapError::OperationDenied,
            0x28 => CtapError::KeyStoreFull,
            0x2B => CtapError::UnsupportedOption,
            0x2C => CtapError::InvalidOption,
            0x2D => CtapError::KeepaliveCancel,
            0x2E => CtapError::NoCredentials,
            0x2F => CtapError::UserActionTimeout,
            0x30 => CtapError::NotAllowed,
            0x31 => CtapError::PinInvalid,
            0x32 => CtapError::PinBlocked,
            0x33 => CtapError::PinAuthInvalid,
            0x34 => CtapError::PinAuthBlocked,
            0x35 => CtapError::PinNotSet,
            0x36 => CtapError::PinRequired,
            0x37 => CtapError::PinPolicyViolation,
            0x38 => CtapError::PinTokenExpired,
            0x39 => CtapError::RequestTooLarge,
            0x3A => CtapError::ActionTimeout,
            0x3B => CtapError::UpRequired,
            other => CtapError::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            CtapError::InvalidCommand => 0x01,
            CtapError::InvalidParameter => 0x02,
            CtapError::InvalidLength => 0x03,
            CtapError::CborUnexpectedType => 0x11,
            CtapError::InvalidCbor => 0x12,
            CtapError::MissingParameter => 0x14,
            CtapError::CredentialExcluded => 0x19,
            CtapError::UnsupportedAlgorithm => 0x26,
            CtapError::OperationDenied => 0x27,
            CtapError::KeyStoreFull => 0x28,
            CtapError::UnsupportedOption => 0x2B,
            CtapError::InvalidOption => 0x2C,
            CtapError::KeepaliveCancel => 0x2D,
            CtapError::NoCredentials => 0x2E,
            CtapError::UserActionTimeout => 0x2F,
            CtapError::NotAllowed => 0x30,
            CtapError::PinInvalid => 0x31,
            CtapError::PinBlocked => 0x32,
            CtapError::PinAuthInvalid => 0x33,
            CtapError::PinAuthBlocked => 0x34,
            CtapError::PinNotSet => 0x35,
            CtapError::PinRequired => 0x36,
            CtapError::PinPolicyViolation => 0x37,
            CtapError::PinTokenExpired => 0x38,
            CtapError::RequestTooLarge => 0x39,
            CtapError::ActionTimeout => 0x3A,
            CtapError::UpRequired => 0x3B,
            CtapError::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for CtapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CTAP error: 0x{:02X} ({:?})", self.code(), self)
    }
}

impl std::error::Error for CtapError {}

/// Client-facing failures with stable codes.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unexpected client failure: {0}")]
    Other(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration unsupported: {0}")]
    ConfigurationUnsupported(String),
    #[error("no attached device can serve this request")]
    DeviceIneligible,
    #[error("timed out waiting for user presence")]
    Timeout,
}

impl ClientError {
    /// Stable numeric code, matching the legacy U2F JS API values.
    pub fn code(&self) -> u8 {
        match self {
            ClientError::Other(_) => 1,
            ClientError::BadRequest(_) => 2,
            ClientError::ConfigurationUnsupported(_) => 3,
            ClientError::DeviceIneligible => 4,
            ClientError::Timeout => 5,
        }
    }
}

/// Unified error for all client operations. Transport-level statuses
/// keep their identity so the polling driver and the per-key retry
/// loops can match on them.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Apdu(#[from] ApduError),
    #[error(transparent)]
    Ctap(#[from] CtapError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
