//! Session Errors
//!
//! Every failure the session manager can surface. All of them are non-fatal:
//! they land in the single "last error" slot and recovery is user-initiated
//! (retry scan or connect).

use crate::domain::models::{CharacteristicRef, PeripheralId, RadioState};
use std::fmt;
use thiserror::Error;

/// Which discovery round-trip failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryScope {
    Services,
    Characteristics,
}

impl fmt::Display for DiscoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Services => f.write_str("Service"),
            Self::Characteristics => f.write_str("Characteristic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Scan requested while the radio is not powered on
    #[error("Bluetooth radio is not available ({0})")]
    RadioUnavailable(RadioState),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection attempt timed out")]
    ConnectTimeout,

    /// A connect was issued while another peripheral is connecting or connected
    #[error("Already connecting or connected; disconnect first")]
    AlreadyConnected,

    #[error("Not connected to a peripheral")]
    NotConnected,

    #[error("Device not found in scan results: {0}")]
    UnknownDevice(PeripheralId),

    #[error("{scope} discovery failed: {reason}")]
    DiscoveryFailed {
        reason: String,
        scope: DiscoveryScope,
    },

    #[error("Characteristic {0} is not part of the discovered services")]
    UnknownCharacteristic(CharacteristicRef),

    #[error("Characteristic {0} does not support writes")]
    CharacteristicNotWritable(CharacteristicRef),

    #[error("Characteristic {0} does not support notify or indicate")]
    CharacteristicNotNotifiable(CharacteristicRef),

    #[error("Failed to enable notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Could not encode outgoing data: {0}")]
    EncodingError(String),

    #[error("No write characteristic is bound")]
    NoChannelBound,
}

impl SessionError {
    /// Machine-readable code for logs and the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::ConnectFailed(_) => "CONNECT_FAILED",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::UnknownDevice(_) => "UNKNOWN_DEVICE",
            Self::DiscoveryFailed { .. } => "DISCOVERY_FAILED",
            Self::UnknownCharacteristic(_) => "UNKNOWN_CHARACTERISTIC",
            Self::CharacteristicNotWritable(_) => "CHARACTERISTIC_NOT_WRITABLE",
            Self::CharacteristicNotNotifiable(_) => "CHARACTERISTIC_NOT_NOTIFIABLE",
            Self::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            Self::WriteFailed(_) => "WRITE_FAILED",
            Self::EncodingError(_) => "ENCODING_ERROR",
            Self::NoChannelBound => "NO_CHANNEL_BOUND",
        }
    }

    /// Errors the user can clear by retrying scan/connect without changing
    /// anything outside the app
    pub fn is_user_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::RadioUnavailable(RadioState::Unsupported | RadioState::Unauthorized)
        )
    }
}
