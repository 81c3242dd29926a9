//! Session Manager
//!
//! Central-role session state for a single peripheral.
//!
//! ```text
//!              connect()                onConnected
//! Disconnected ─────────► Connecting ─────────────► Connected
//!      ▲                      │                         │
//!      │       onConnectFailed│                         │ disconnect() /
//!      │                      ▼                         │ onDisconnected
//!      │   connect()  ┌──────────────┐                  │
//!      │  ◄───────────┤ Failed(why)  │                  │
//!      │  (→Connecting)└──────────────┘                  │
//!      └────────────────────── cleanup ◄────────────────┘
//! ```
//!
//! Every method runs on one serialized context; the manager never blocks and
//! never arms timers. Requests go out through [`Transport::submit`] and the
//! matching completions come back through [`SessionManager::handle_event`].

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::binding;
use crate::domain::decoder::{self, DEFAULT_PLACEHOLDER};
use crate::domain::error::{DiscoveryScope, SessionError};
use crate::domain::models::{
    ActiveChannels, CharacteristicProperties, CharacteristicRecord, CharacteristicRef,
    ConnectionState, DiscoveredDevice, PeripheralHandle, PeripheralId, RadioState, ServiceRecord,
    SessionLog, SessionSnapshot,
};
use crate::domain::transport::{Transport, TransportEvent, TransportRequest};

/// Runtime knobs for the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Service allow-list passed to the scan; `None` accepts all advertisements
    pub scan_filter: Option<Vec<Uuid>>,
    /// Run the binding policy after discovery completes
    pub auto_bind: bool,
    /// Appended to the log for payloads with nothing displayable
    pub placeholder: String,
    /// Enforced by the service layer, not by the manager
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_filter: None,
            auto_bind: true,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Slots the user picked by hand; automatic binding leaves them alone
#[derive(Debug, Clone, Copy, Default)]
struct ManualOverrides {
    write: bool,
    notify: bool,
}

pub struct SessionManager<T: Transport> {
    transport: T,
    config: SessionConfig,
    radio: RadioState,
    scanning: bool,
    devices: Vec<DiscoveredDevice>,
    state: ConnectionState,
    target: Option<DiscoveredDevice>,
    connect_attempt: u64,
    services: Vec<ServiceRecord>,
    pending_services: BTreeSet<Uuid>,
    channels: ActiveChannels,
    overrides: ManualOverrides,
    log: SessionLog,
    last_error: Option<SessionError>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            radio: RadioState::Unknown,
            scanning: false,
            devices: Vec::new(),
            state: ConnectionState::Disconnected,
            target: None,
            connect_attempt: 0,
            services: Vec::new(),
            pending_services: BTreeSet::new(),
            channels: ActiveChannels::default(),
            overrides: ManualOverrides::default(),
            log: SessionLog::default(),
            last_error: None,
        }
    }

    // ----------------------------------------------------------------------
    // Read surface
    // ----------------------------------------------------------------------

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn radio(&self) -> RadioState {
        self.radio
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// The peripheral we are connected to; `None` unless `Connected`
    pub fn connected_device(&self) -> Option<&DiscoveredDevice> {
        if self.state.is_connected() {
            self.target.as_ref()
        } else {
            None
        }
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicRecord> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    pub fn channels(&self) -> ActiveChannels {
        self.channels
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Incremented on every accepted `connect`; lets timers tell attempts apart
    pub fn connect_attempt(&self) -> u64 {
        self.connect_attempt
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            radio: self.radio,
            scanning: self.scanning,
            devices: self.devices.clone(),
            connection: self.state.clone(),
            connected_device: self.connected_device().cloned(),
            services: self.services.clone(),
            channels: self.channels,
            received_text: self.log.received_text.clone(),
            last_value: self.log.last_value.clone(),
            last_error: self.last_error.clone(),
        }
    }

    // ----------------------------------------------------------------------
    // Commands
    // ----------------------------------------------------------------------

    pub fn start_scanning(&mut self) -> Result<(), SessionError> {
        if !self.radio.is_ready() {
            return Err(self.fail(SessionError::RadioUnavailable(self.radio)));
        }

        self.devices.clear();
        self.scanning = true;
        self.last_error = None;
        info!(filter = ?self.config.scan_filter, "Starting BLE scan");
        self.transport.submit(TransportRequest::StartScan {
            services: self.config.scan_filter.clone(),
        });
        Ok(())
    }

    pub fn stop_scanning(&mut self) {
        if self.scanning {
            info!("Stopping BLE scan");
        }
        self.transport.submit(TransportRequest::StopScan);
        self.scanning = false;
    }

    pub fn connect(&mut self, id: &PeripheralId) -> Result<(), SessionError> {
        if !self.state.can_connect() {
            return Err(self.fail(SessionError::AlreadyConnected));
        }
        let device = match self.devices.iter().find(|d| &d.id == id) {
            Some(device) => device.clone(),
            None => return Err(self.fail(SessionError::UnknownDevice(id.clone()))),
        };

        self.stop_scanning();
        info!(
            "Connecting to {} ({}, {} dBm)",
            device.display_name(),
            device.id,
            device.rssi
        );
        self.state = ConnectionState::Connecting;
        self.connect_attempt += 1;
        self.transport.submit(TransportRequest::Connect(device.handle));
        self.target = Some(device);
        Ok(())
    }

    /// Local state is cleared eagerly, without waiting for the transport
    /// to confirm the disconnect.
    pub fn disconnect(&mut self) {
        let Some(target) = self.target.as_ref() else {
            debug!("Disconnect requested with no target");
            return;
        };
        info!("Disconnecting from {}", target.display_name());
        self.transport
            .submit(TransportRequest::Disconnect(target.handle));
        self.cleanup();
    }

    /// Abort a connect attempt that never completed. Ignored when the attempt
    /// has already resolved or a newer one is in flight.
    pub fn connect_timed_out(&mut self, attempt: u64) {
        if attempt != self.connect_attempt || self.state != ConnectionState::Connecting {
            return;
        }
        if let Some(target) = self.target.as_ref() {
            warn!("Connection to {} timed out", target.display_name());
            self.transport
                .submit(TransportRequest::Disconnect(target.handle));
        }
        self.cleanup();
        self.state = ConnectionState::Failed("connection timed out".to_string());
        self.fail(SessionError::ConnectTimeout);
    }

    pub fn clear_received(&mut self) {
        self.log.clear();
    }

    /// Bind a specific characteristic as the write channel
    pub fn set_write_characteristic(
        &mut self,
        reference: CharacteristicRef,
    ) -> Result<(), SessionError> {
        let properties = self.connected_properties(&reference)?;
        if !properties.can_write() {
            return Err(self.fail(SessionError::CharacteristicNotWritable(reference)));
        }
        info!("Write channel set to {}", reference);
        self.channels.write = Some(reference);
        self.overrides.write = true;
        Ok(())
    }

    /// Subscribe to a specific notify/indicate characteristic, replacing the
    /// current notify channel
    pub fn subscribe(&mut self, reference: CharacteristicRef) -> Result<(), SessionError> {
        let properties = self.connected_properties(&reference)?;
        if !properties.can_notify() {
            return Err(self.fail(SessionError::CharacteristicNotNotifiable(reference)));
        }
        self.bind_notify(reference);
        self.overrides.notify = true;
        Ok(())
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.send_bytes(text.as_bytes())
    }

    pub fn send_bytes(&mut self, value: &[u8]) -> Result<(), SessionError> {
        let (peripheral, characteristic) = self.write_target()?;
        let mode = binding::find(&self.services, &characteristic)
            .and_then(|c| c.properties.write_mode())
            .ok_or(SessionError::CharacteristicNotWritable(characteristic));
        let mode = match mode {
            Ok(mode) => mode,
            Err(e) => return Err(self.fail(e)),
        };

        debug!(bytes = value.len(), ?mode, "Writing to {}", characteristic);
        self.transport.submit(TransportRequest::Write {
            peripheral,
            characteristic,
            value: value.to_vec(),
            mode,
        });
        Ok(())
    }

    /// Send user-entered hex such as `"DE AD BE EF"`
    pub fn send_hex(&mut self, input: &str) -> Result<(), SessionError> {
        self.write_target()?;
        match decoder::parse_hex(input) {
            Ok(bytes) => self.send_bytes(&bytes),
            Err(reason) => Err(self.fail(SessionError::EncodingError(reason))),
        }
    }

    /// Return to `Disconnected` with every registry, binding and log emptied.
    /// Idempotent.
    pub fn cleanup(&mut self) {
        self.channels.clear();
        self.overrides = ManualOverrides::default();
        self.services.clear();
        self.pending_services.clear();
        self.target = None;
        self.state = ConnectionState::Disconnected;
        self.log.clear();
    }

    // ----------------------------------------------------------------------
    // Transport callbacks
    // ----------------------------------------------------------------------

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RadioStateChanged(state) => self.on_radio_state(state),
            TransportEvent::DeviceDiscovered {
                id,
                name,
                rssi,
                handle,
            } => self.on_device_discovered(DiscoveredDevice {
                id,
                name: name.unwrap_or_default(),
                rssi,
                handle,
            }),
            TransportEvent::Connected { handle } => self.on_connected(handle),
            TransportEvent::ConnectFailed { handle, reason } => {
                self.on_connect_failed(handle, reason)
            }
            TransportEvent::Disconnected { handle, reason } => {
                self.on_disconnected(handle, reason)
            }
            TransportEvent::ServicesDiscovered {
                handle,
                services,
                error,
            } => self.on_services_discovered(handle, services, error),
            TransportEvent::CharacteristicsDiscovered {
                handle,
                service,
                characteristics,
                error,
            } => self.on_characteristics_discovered(handle, service, characteristics, error),
            TransportEvent::ValueUpdated {
                characteristic,
                value,
                error,
            } => self.on_value_updated(characteristic, &value, error),
            TransportEvent::NotifyStateChanged {
                characteristic,
                enabled,
                error,
            } => self.on_notify_state_changed(characteristic, enabled, error),
            TransportEvent::WriteCompleted {
                characteristic,
                error,
            } => self.on_write_completed(characteristic, error),
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        info!("Bluetooth radio state: {}", state);
        self.radio = state;
        if state.is_ready() {
            return;
        }
        self.scanning = false;
        if self.target.is_some() {
            warn!("Radio no longer powered on, dropping connection");
            self.cleanup();
        }
    }

    fn on_device_discovered(&mut self, device: DiscoveredDevice) {
        if self.devices.iter().any(|d| d.id == device.id) {
            return;
        }
        info!(
            "Found device {} ({}, {} dBm)",
            device.display_name(),
            device.id,
            device.rssi
        );
        self.devices.push(device);
    }

    fn on_connected(&mut self, handle: PeripheralHandle) {
        if self.state != ConnectionState::Connecting || !self.is_target(handle) {
            warn!(?handle, state = ?self.state, "Ignoring unexpected connect callback");
            return;
        }

        self.state = ConnectionState::Connected;
        self.services.clear();
        self.pending_services.clear();
        self.channels.clear();
        self.last_error = None;
        if let Some(target) = &self.target {
            info!("Connected to {}", target.display_name());
        }
        self.transport.submit(TransportRequest::DiscoverServices(handle));
    }

    fn on_connect_failed(&mut self, handle: PeripheralHandle, reason: String) {
        if self.state != ConnectionState::Connecting || !self.is_target(handle) {
            warn!(?handle, "Ignoring connect failure for stale attempt");
            return;
        }
        self.cleanup();
        self.state = ConnectionState::Failed(reason.clone());
        self.fail(SessionError::ConnectFailed(reason));
    }

    fn on_disconnected(&mut self, handle: PeripheralHandle, reason: Option<String>) {
        let active = matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        );
        if !active || !self.is_target(handle) {
            debug!(?handle, "Disconnect callback for inactive peripheral");
            return;
        }
        match reason {
            Some(reason) => warn!("Peripheral disconnected: {}", reason),
            None => info!("Peripheral disconnected"),
        }
        self.cleanup();
    }

    fn on_services_discovered(
        &mut self,
        handle: PeripheralHandle,
        services: Vec<Uuid>,
        error: Option<String>,
    ) {
        if !self.state.is_connected() || !self.is_target(handle) {
            return;
        }
        if let Some(reason) = error {
            self.fail(SessionError::DiscoveryFailed {
                reason,
                scope: DiscoveryScope::Services,
            });
            return;
        }

        // Repeated service UUIDs are one service; track and record it once
        let mut unique = BTreeSet::new();
        let reported = services.len();
        let services: Vec<Uuid> = services
            .into_iter()
            .filter(|uuid| unique.insert(*uuid))
            .collect();
        if services.len() != reported {
            debug!(reported, unique = services.len(), "Ignoring repeated service UUIDs");
        }

        info!("Discovered {} services", services.len());
        // Retained services keep their characteristics until they report again
        let mut previous = std::mem::take(&mut self.services);
        self.services = services
            .iter()
            .map(|uuid| ServiceRecord {
                uuid: *uuid,
                characteristics: previous
                    .iter_mut()
                    .find(|s| s.uuid == *uuid)
                    .map(|s| std::mem::take(&mut s.characteristics))
                    .unwrap_or_default(),
            })
            .collect();
        self.pending_services = unique;
        self.release_missing_channels();

        if self.pending_services.is_empty() {
            self.finish_discovery();
            return;
        }
        for service in services {
            self.transport.submit(TransportRequest::DiscoverCharacteristics {
                peripheral: handle,
                service,
            });
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        handle: PeripheralHandle,
        service: Uuid,
        characteristics: Vec<CharacteristicRecord>,
        error: Option<String>,
    ) {
        if !self.state.is_connected() || !self.is_target(handle) {
            return;
        }
        let Some(record) = self.services.iter_mut().find(|s| s.uuid == service) else {
            warn!(%service, "Characteristics reported for unknown service");
            return;
        };

        match error {
            Some(reason) => {
                record.characteristics.clear();
                self.fail(SessionError::DiscoveryFailed {
                    reason,
                    scope: DiscoveryScope::Characteristics,
                });
            }
            None => {
                debug!(%service, count = characteristics.len(), "Characteristics discovered");
                record.characteristics = characteristics
                    .into_iter()
                    .map(|c| CharacteristicRecord { service, ..c })
                    .collect();
            }
        }

        self.pending_services.remove(&service);
        if self.pending_services.is_empty() {
            self.finish_discovery();
        } else {
            debug!(
                remaining = self.pending_services.len(),
                "Waiting for characteristic discovery"
            );
        }
    }

    fn on_value_updated(
        &mut self,
        characteristic: CharacteristicRef,
        value: &[u8],
        error: Option<String>,
    ) {
        if !self.state.is_connected() {
            debug!("Dropping value update while not connected");
            return;
        }
        if let Some(reason) = error {
            warn!("Value update from {} failed: {}", characteristic, reason);
            return;
        }
        if value.is_empty() {
            debug!("Ignoring empty value update from {}", characteristic);
            return;
        }

        let decoded = decoder::decode(value);
        debug!(
            kind = ?decoded.kind,
            escaped = decoded.escaped.as_deref().unwrap_or(""),
            "Received {} bytes from {}",
            value.len(),
            characteristic
        );
        self.log
            .append_fragment(&decoded.text, &self.config.placeholder);
    }

    fn on_notify_state_changed(
        &mut self,
        characteristic: CharacteristicRef,
        enabled: bool,
        error: Option<String>,
    ) {
        if !self.state.is_connected() {
            debug!("Dropping notify state change for {} while not connected", characteristic);
            return;
        }
        let bound = self.channels.notify == Some(characteristic);
        if let Some(reason) = error {
            if bound {
                self.channels.notify = None;
            }
            self.fail(SessionError::SubscriptionFailed(reason));
            return;
        }
        if enabled {
            info!("Notifications enabled on {}", characteristic);
        } else {
            info!("Notifications disabled on {}", characteristic);
            if bound {
                self.channels.notify = None;
            }
        }
    }

    fn on_write_completed(&mut self, characteristic: CharacteristicRef, error: Option<String>) {
        if !self.state.is_connected() {
            debug!("Dropping write completion for {} while not connected", characteristic);
            return;
        }
        match error {
            Some(reason) => {
                self.fail(SessionError::WriteFailed(reason));
            }
            None => {
                debug!("Write to {} completed", characteristic);
                if matches!(self.last_error, Some(SessionError::WriteFailed(_))) {
                    self.last_error = None;
                }
            }
        }
    }

    // ----------------------------------------------------------------------
    // Binding
    // ----------------------------------------------------------------------

    fn finish_discovery(&mut self) {
        self.release_missing_channels();
        if self.config.auto_bind {
            self.apply_binding_policy();
        }
    }

    /// Unbind channels that are no longer in the registry. A dropped notify
    /// channel is unsubscribed and the slot returns to automatic binding.
    fn release_missing_channels(&mut self) {
        if let Some(write) = self.channels.write {
            if binding::find(&self.services, &write).is_none() {
                info!("Write channel {} left the registry", write);
                self.channels.write = None;
                self.overrides.write = false;
            }
        }
        if let Some(notify) = self.channels.notify {
            if binding::find(&self.services, &notify).is_none() {
                info!("Notify channel {} left the registry", notify);
                self.channels.notify = None;
                self.overrides.notify = false;
                if let Some(peripheral) = self.target.as_ref().map(|t| t.handle) {
                    self.transport.submit(TransportRequest::SetNotify {
                        peripheral,
                        characteristic: notify,
                        enabled: false,
                    });
                }
            }
        }
    }

    fn apply_binding_policy(&mut self) {
        let decision = binding::select_channels(&self.services);

        if !self.overrides.write {
            match decision.write {
                Some(write) => info!("Auto-bound write channel {}", write),
                None => warn!("No writable characteristic found"),
            }
            self.channels.write = decision.write;
        }

        if !self.overrides.notify {
            match decision.notify {
                Some(notify) => self.bind_notify(notify),
                None => {
                    warn!("No notify/indicate characteristic found");
                    self.channels.notify = None;
                }
            }
        }
    }

    fn bind_notify(&mut self, reference: CharacteristicRef) {
        if self.channels.notify == Some(reference) {
            return;
        }
        let Some(peripheral) = self.target.as_ref().map(|t| t.handle) else {
            return;
        };
        if let Some(previous) = self.channels.notify.take() {
            self.transport.submit(TransportRequest::SetNotify {
                peripheral,
                characteristic: previous,
                enabled: false,
            });
        }
        info!("Subscribing to notifications on {}", reference);
        self.transport.submit(TransportRequest::SetNotify {
            peripheral,
            characteristic: reference,
            enabled: true,
        });
        self.channels.notify = Some(reference);
    }

    // ----------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------

    fn is_target(&self, handle: PeripheralHandle) -> bool {
        self.target.as_ref().is_some_and(|t| t.handle == handle)
    }

    fn connected_properties(
        &mut self,
        reference: &CharacteristicRef,
    ) -> Result<CharacteristicProperties, SessionError> {
        if !self.state.is_connected() {
            return Err(self.fail(SessionError::NotConnected));
        }
        match binding::find(&self.services, reference).map(|c| c.properties) {
            Some(properties) => Ok(properties),
            None => Err(self.fail(SessionError::UnknownCharacteristic(*reference))),
        }
    }

    fn write_target(&mut self) -> Result<(PeripheralHandle, CharacteristicRef), SessionError> {
        let Some(characteristic) = self.channels.write else {
            return Err(self.fail(SessionError::NoChannelBound));
        };
        match self.connected_device().map(|d| d.handle) {
            Some(handle) => Ok((handle, characteristic)),
            None => Err(self.fail(SessionError::NotConnected)),
        }
    }

    /// Record `err` in the last-error slot and hand it back
    fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(code = err.code(), "{}", err);
        self.last_error = Some(err.clone());
        err
    }
}
