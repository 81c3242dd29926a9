use std::fmt;
use uuid::Uuid;

use crate::domain::error::SessionError;

/// Stable identity the transport reports for a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token used to address a peripheral in transport requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeripheralHandle(pub u64);

/// A peripheral seen while scanning. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: PeripheralId,
    /// Advertised local name, empty when the peripheral does not advertise one
    pub name: String,
    /// Signal strength in dBm at first sighting
    pub rssi: i16,
    pub handle: PeripheralHandle,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Unknown"
        } else {
            &self.name
        }
    }
}

/// Power/authorization state of the local radio as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_ready(self) -> bool {
        self == Self::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(label)
    }
}

/// Connection lifecycle of the single tracked peripheral
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    /// `connect` is only accepted from these states
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Human-readable label for the presentation layer
    pub fn label(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Failed(reason) => format!("Failed: {}", reason),
        }
    }
}

/// GATT characteristic capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }

    /// Preferred write mode for this characteristic, if it is writable at all
    pub fn write_mode(&self) -> Option<WriteMode> {
        if self.write {
            Some(WriteMode::WithResponse)
        } else if self.write_without_response {
            Some(WriteMode::WithoutResponse)
        } else {
            None
        }
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, "read"),
            (self.write, "write"),
            (self.write_without_response, "write-no-rsp"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
        ];
        let names: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Addresses a characteristic within the connected peripheral's GATT tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Owning service
    pub service: Uuid,
}

impl CharacteristicRecord {
    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef {
            service: self.service,
            characteristic: self.uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicRecord>,
}

/// Currently bound write and notify channels. At most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveChannels {
    pub write: Option<CharacteristicRef>,
    pub notify: Option<CharacteristicRef>,
}

impl ActiveChannels {
    pub fn clear(&mut self) {
        self.write = None;
        self.notify = None;
    }
}

/// Cumulative decoded text plus the most recent non-empty fragment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionLog {
    pub received_text: String,
    pub last_value: Option<String>,
}

impl SessionLog {
    pub fn clear(&mut self) {
        self.received_text.clear();
        self.last_value = None;
    }

    pub fn is_empty(&self) -> bool {
        self.received_text.is_empty() && self.last_value.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Read-only view of the session published to the presentation layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub radio: RadioState,
    pub scanning: bool,
    pub devices: Vec<DiscoveredDevice>,
    pub connection: ConnectionState,
    pub connected_device: Option<DiscoveredDevice>,
    pub services: Vec<ServiceRecord>,
    pub channels: ActiveChannels,
    pub received_text: String,
    pub last_value: Option<String>,
    pub last_error: Option<SessionError>,
}

impl SessionSnapshot {
    pub fn connection_label(&self) -> String {
        self.connection.label()
    }
}
