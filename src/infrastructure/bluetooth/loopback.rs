//! Loopback Transport
//!
//! In-process adapter that plays a single peripheral: it advertises once per
//! scan, exposes a counter characteristic that notifies on a fixed interval,
//! and an echo characteristic whose writes are sent back on the counter
//! channel. Lets the session pipeline run end to end without a radio.

use crate::domain::models::{
    CharacteristicProperties, CharacteristicRecord, CharacteristicRef, PeripheralHandle,
    PeripheralId, RadioState, WriteMode,
};
use crate::domain::transport::{Transport, TransportEvent, TransportRequest};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Service exposed by the simulated peripheral
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Write sink; accepted writes are echoed back as notifications
pub const ECHO_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Notifies an incrementing counter
pub const COUNTER_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

const PERIPHERAL_HANDLE: PeripheralHandle = PeripheralHandle(1);

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    pub name: String,
    pub rssi: i16,
    /// Period of the counter notification
    pub counter_interval: Duration,
    /// When false, connect requests are never answered
    pub answer_connect: bool,
    pub radio: RadioState,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            name: "Loopback Peripheral".to_string(),
            rssi: -42,
            counter_interval: Duration::from_secs(1),
            answer_connect: true,
            radio: RadioState::PoweredOn,
        }
    }
}

pub struct LoopbackTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    options: LoopbackOptions,
    connected: bool,
    notifying: bool,
    counter_task: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    /// Reports the configured radio state right away, like a real adapter
    /// does once it finishes powering up
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>, options: LoopbackOptions) -> Self {
        let _ = events.send(TransportEvent::RadioStateChanged(options.radio));
        Self {
            events,
            options,
            connected: false,
            notifying: false,
            counter_task: None,
        }
    }

    pub fn counter_ref() -> CharacteristicRef {
        CharacteristicRef {
            service: SERVICE_UUID,
            characteristic: COUNTER_CHAR_UUID,
        }
    }

    pub fn echo_ref() -> CharacteristicRef {
        CharacteristicRef {
            service: SERVICE_UUID,
            characteristic: ECHO_CHAR_UUID,
        }
    }

    fn characteristics() -> Vec<CharacteristicRecord> {
        vec![
            CharacteristicRecord {
                uuid: ECHO_CHAR_UUID,
                properties: CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..Default::default()
                },
                service: SERVICE_UUID,
            },
            CharacteristicRecord {
                uuid: COUNTER_CHAR_UUID,
                properties: CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..Default::default()
                },
                service: SERVICE_UUID,
            },
        ]
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn start_counter(&mut self) {
        self.stop_counter();
        let events = self.events.clone();
        let interval = self.options.counter_interval;
        self.counter_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut count: u64 = 0;
            loop {
                ticker.tick().await;
                count += 1;
                let event = TransportEvent::ValueUpdated {
                    characteristic: LoopbackTransport::counter_ref(),
                    value: count.to_string().into_bytes(),
                    error: None,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_counter(&mut self) {
        if let Some(task) = self.counter_task.take() {
            task.abort();
        }
    }

    fn drop_link(&mut self) {
        self.stop_counter();
        self.connected = false;
        self.notifying = false;
    }
}

impl Transport for LoopbackTransport {
    fn submit(&mut self, request: TransportRequest) {
        debug!(?request, "Loopback request");
        match request {
            TransportRequest::StartScan { services } => {
                if !self.options.radio.is_ready() {
                    return;
                }
                let advertised = services
                    .as_ref()
                    .map_or(true, |filter| filter.contains(&SERVICE_UUID));
                if advertised {
                    self.emit(TransportEvent::DeviceDiscovered {
                        id: PeripheralId(format!("loopback-{}", PERIPHERAL_HANDLE.0)),
                        name: Some(self.options.name.clone()),
                        rssi: self.options.rssi,
                        handle: PERIPHERAL_HANDLE,
                    });
                }
            }
            TransportRequest::StopScan => {}
            TransportRequest::Connect(handle) => {
                if !self.options.answer_connect {
                    return;
                }
                if handle == PERIPHERAL_HANDLE {
                    self.connected = true;
                    info!("Loopback peripheral connected");
                    self.emit(TransportEvent::Connected { handle });
                } else {
                    self.emit(TransportEvent::ConnectFailed {
                        handle,
                        reason: "unknown peripheral".to_string(),
                    });
                }
            }
            TransportRequest::Disconnect(handle) => {
                if self.connected && handle == PERIPHERAL_HANDLE {
                    self.drop_link();
                    self.emit(TransportEvent::Disconnected {
                        handle,
                        reason: None,
                    });
                }
            }
            TransportRequest::DiscoverServices(handle) => {
                self.emit(TransportEvent::ServicesDiscovered {
                    handle,
                    services: vec![SERVICE_UUID],
                    error: None,
                });
            }
            TransportRequest::DiscoverCharacteristics {
                peripheral,
                service,
            } => {
                let characteristics = if service == SERVICE_UUID {
                    Self::characteristics()
                } else {
                    Vec::new()
                };
                self.emit(TransportEvent::CharacteristicsDiscovered {
                    handle: peripheral,
                    service,
                    characteristics,
                    error: None,
                });
            }
            TransportRequest::SetNotify {
                characteristic,
                enabled,
                ..
            } => {
                if characteristic != Self::counter_ref() {
                    self.emit(TransportEvent::NotifyStateChanged {
                        characteristic,
                        enabled: false,
                        error: Some("characteristic does not support notify".to_string()),
                    });
                    return;
                }
                self.notifying = enabled;
                if enabled {
                    self.start_counter();
                } else {
                    self.stop_counter();
                }
                self.emit(TransportEvent::NotifyStateChanged {
                    characteristic,
                    enabled,
                    error: None,
                });
            }
            TransportRequest::Write {
                characteristic,
                value,
                mode,
                ..
            } => {
                if characteristic != Self::echo_ref() {
                    if mode == WriteMode::WithResponse {
                        self.emit(TransportEvent::WriteCompleted {
                            characteristic,
                            error: Some("write not permitted".to_string()),
                        });
                    }
                    return;
                }
                info!(
                    "Loopback peripheral received: {:?}",
                    String::from_utf8_lossy(&value)
                );
                if mode == WriteMode::WithResponse {
                    self.emit(TransportEvent::WriteCompleted {
                        characteristic,
                        error: None,
                    });
                }
                if self.notifying {
                    self.emit(TransportEvent::ValueUpdated {
                        characteristic: Self::counter_ref(),
                        value,
                        error: None,
                    });
                }
            }
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.stop_counter();
    }
}
