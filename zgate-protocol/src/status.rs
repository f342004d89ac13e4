//! Status codes reported by the negotiation engine

use std::fmt;

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Severe,
    /// Protocol error reported by or to the peer
    ProtocolError,
}

/// Informational progress codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoCode {
    HelloReceived,
    CommitGenerated,
    Dh1Received,
    Dh2Received,
    Confirm1Received,
    Confirm2Received,
    RetainedSecretMatch,
    SecureStateOn,
    SecureStateOff,
}

/// Warnings; the session continues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    /// Public key and cipher strength do not match
    DhAesMismatch,
    /// Diffie-Hellman value shorter than expected
    DhShort,
    /// No retained shared secret matched
    NoRetainedSecretMatch,
    /// Control packet failed its CRC check
    CrcMismatch,
    /// Media packet failed authentication
    SrtpAuthError,
    /// Media packet was replayed
    SrtpReplayError,
    /// A retained shared secret was expected but did not match
    NoExpectedRetainedSecretMatch,
}

/// Severe failures; negotiation cannot complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SevereCode {
    HelloHmacFailed,
    CommitHmacFailed,
    Dh1HmacFailed,
    Dh2HmacFailed,
    CannotSend,
    ProtocolError,
    NoTimer,
    TooManyRetries,
}

/// Protocol error codes exchanged on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    MalformedPacket = 0x10,
    CriticalSoftwareError = 0x20,
    UnsupportedVersion = 0x30,
    HelloComponentsMismatch = 0x40,
    UnsupportedHashType = 0x51,
    UnsupportedCipherType = 0x52,
    UnsupportedKeyExchange = 0x53,
    UnsupportedAuthTag = 0x54,
    UnsupportedSasScheme = 0x55,
    NoSharedSecret = 0x56,
    DhBadPublicValue = 0x61,
    DhBadHashCommitment = 0x62,
    UntrustedSasMitm = 0x63,
    ConfirmHmacWrong = 0x70,
    NonceReused = 0x80,
    EqualIdentifiers = 0x90,
    ServiceUnavailable = 0xA0,
    ProtocolTimeout = 0xB0,
    GoClearNotAllowed = 0x100,
}

impl ErrorCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        use ErrorCode::*;
        let code = match value {
            0x10 => MalformedPacket,
            0x20 => CriticalSoftwareError,
            0x30 => UnsupportedVersion,
            0x40 => HelloComponentsMismatch,
            0x51 => UnsupportedHashType,
            0x52 => UnsupportedCipherType,
            0x53 => UnsupportedKeyExchange,
            0x54 => UnsupportedAuthTag,
            0x55 => UnsupportedSasScheme,
            0x56 => NoSharedSecret,
            0x61 => DhBadPublicValue,
            0x62 => DhBadHashCommitment,
            0x63 => UntrustedSasMitm,
            0x70 => ConfirmHmacWrong,
            0x80 => NonceReused,
            0x90 => EqualIdentifiers,
            0xA0 => ServiceUnavailable,
            0xB0 => ProtocolTimeout,
            0x100 => GoClearNotAllowed,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A status code together with its severity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Info(InfoCode),
    Warning(WarningCode),
    Severe(SevereCode),
    Error(ErrorCode),
}

impl StatusCode {
    pub fn severity(&self) -> Severity {
        match self {
            StatusCode::Info(_) => Severity::Info,
            StatusCode::Warning(_) => Severity::Warning,
            StatusCode::Severe(_) => Severity::Severe,
            StatusCode::Error(_) => Severity::ProtocolError,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Info(code) => write!(f, "info: {:?}", code),
            StatusCode::Warning(code) => write!(f, "warning: {:?}", code),
            StatusCode::Severe(code) => write!(f, "severe: {:?}", code),
            StatusCode::Error(code) => write!(f, "error {:#x}: {:?}", code.as_u32(), code),
        }
    }
}
