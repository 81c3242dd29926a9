//! Transport Adapter Contract
//!
//! The radio adapter (CoreBluetooth, WinRT, BlueZ, or the in-process loopback)
//! sits behind this boundary. The session core submits non-blocking
//! [`TransportRequest`]s and later receives [`TransportEvent`]s on the same
//! serialized context it runs on.

use crate::domain::models::{
    CharacteristicRecord, CharacteristicRef, PeripheralHandle, PeripheralId, RadioState,
    WriteMode,
};
use uuid::Uuid;

/// Inbound callbacks from the adapter. `error` fields carry the adapter's
/// failure reason when the operation did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    RadioStateChanged(RadioState),
    DeviceDiscovered {
        id: PeripheralId,
        name: Option<String>,
        rssi: i16,
        handle: PeripheralHandle,
    },
    Connected {
        handle: PeripheralHandle,
    },
    ConnectFailed {
        handle: PeripheralHandle,
        reason: String,
    },
    Disconnected {
        handle: PeripheralHandle,
        reason: Option<String>,
    },
    ServicesDiscovered {
        handle: PeripheralHandle,
        services: Vec<Uuid>,
        error: Option<String>,
    },
    CharacteristicsDiscovered {
        handle: PeripheralHandle,
        service: Uuid,
        characteristics: Vec<CharacteristicRecord>,
        error: Option<String>,
    },
    ValueUpdated {
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        error: Option<String>,
    },
    NotifyStateChanged {
        characteristic: CharacteristicRef,
        enabled: bool,
        error: Option<String>,
    },
    WriteCompleted {
        characteristic: CharacteristicRef,
        error: Option<String>,
    },
}

/// Outbound requests. Completion, if any, arrives later as a [`TransportEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    /// `None` accepts every advertisement
    StartScan { services: Option<Vec<Uuid>> },
    StopScan,
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    DiscoverServices(PeripheralHandle),
    DiscoverCharacteristics {
        peripheral: PeripheralHandle,
        service: Uuid,
    },
    SetNotify {
        peripheral: PeripheralHandle,
        characteristic: CharacteristicRef,
        enabled: bool,
    },
    Write {
        peripheral: PeripheralHandle,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        mode: WriteMode,
    },
}

/// A radio adapter. `submit` must not block; results are reported through
/// the adapter's event channel.
pub trait Transport: Send {
    fn submit(&mut self, request: TransportRequest);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, request: TransportRequest) {
        (**self).submit(request);
    }
}
