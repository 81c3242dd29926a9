//! Bluetooth Session Service
//!
//! Owns the [`SessionManager`] on a single tokio task. Transport events and
//! presentation commands are applied strictly in arrival order, and a fresh
//! [`SessionSnapshot`] is published after each one.

use crate::domain::error::SessionError;
use crate::domain::models::{CharacteristicRef, ConnectionState, PeripheralId, SessionSnapshot};
use crate::domain::session::{SessionConfig, SessionManager};
use crate::domain::transport::{Transport, TransportEvent};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Commands issued by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Disconnect,
    SendText(String),
    SendBytes(Vec<u8>),
    SendHex(String),
    ClearReceived,
    Subscribe(CharacteristicRef),
    SetWriteCharacteristic(CharacteristicRef),
    Shutdown,
}

/// Cloneable front-end to a running [`SessionService`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Session service has stopped"))
    }

    pub fn start_scanning(&self) -> Result<()> {
        self.send(SessionCommand::StartScan)
    }

    pub fn stop_scanning(&self) -> Result<()> {
        self.send(SessionCommand::StopScan)
    }

    pub fn connect(&self, id: PeripheralId) -> Result<()> {
        self.send(SessionCommand::Connect(id))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(SessionCommand::Disconnect)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SendText(text.into()))
    }

    pub fn clear_received(&self) -> Result<()> {
        self.send(SessionCommand::ClearReceived)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

pub struct SessionService<T: Transport> {
    manager: SessionManager<T>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    connect_timeout: Option<Duration>,
    /// (attempt, deadline) for the connect currently in flight
    connect_deadline: Option<(u64, Instant)>,
}

impl<T: Transport> SessionService<T> {
    /// `events` is the receiving end of the channel the transport adapter
    /// delivers its callbacks on
    pub fn new(
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        let connect_timeout = config.connect_timeout;
        let manager = SessionManager::new(transport, config);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());

        let service = Self {
            manager,
            commands: command_rx,
            events,
            snapshots: snapshot_tx,
            connect_timeout,
            connect_deadline: None,
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (service, handle)
    }

    /// Process events and commands until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Session service started");

        loop {
            let deadline = self.connect_deadline;
            let timeout = async move {
                match deadline {
                    Some((attempt, at)) => {
                        tokio::time::sleep_until(at).await;
                        attempt
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.manager.handle_event(event);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.apply(command),
                    }
                }
                attempt = timeout => {
                    self.manager.connect_timed_out(attempt);
                }
            }

            self.track_connect_deadline();
            self.publish();
        }

        self.manager.stop_scanning();
        self.manager.disconnect();
        self.publish();
        info!("Session service stopped");
    }

    fn apply(&mut self, command: SessionCommand) {
        debug!(?command, "Applying session command");
        let result: Result<(), SessionError> = match command {
            SessionCommand::StartScan => self.manager.start_scanning(),
            SessionCommand::StopScan => {
                self.manager.stop_scanning();
                Ok(())
            }
            SessionCommand::Connect(id) => self.manager.connect(&id),
            SessionCommand::Disconnect => {
                self.manager.disconnect();
                Ok(())
            }
            SessionCommand::SendText(text) => self.manager.send_text(&text),
            SessionCommand::SendBytes(bytes) => self.manager.send_bytes(&bytes),
            SessionCommand::SendHex(hex) => self.manager.send_hex(&hex),
            SessionCommand::ClearReceived => {
                self.manager.clear_received();
                Ok(())
            }
            SessionCommand::Subscribe(reference) => self.manager.subscribe(reference),
            SessionCommand::SetWriteCharacteristic(reference) => {
                self.manager.set_write_characteristic(reference)
            }
            SessionCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            // already recorded in the snapshot's last error
            error!("Command failed: {}", e);
        }
    }

    /// Arm a timer for a new connect attempt, drop it once the attempt resolves
    fn track_connect_deadline(&mut self) {
        if *self.manager.state() != ConnectionState::Connecting {
            self.connect_deadline = None;
            return;
        }
        let attempt = self.manager.connect_attempt();
        let current = self.connect_deadline.map(|(a, _)| a);
        if current != Some(attempt) {
            self.connect_deadline = self
                .connect_timeout
                .map(|timeout| (attempt, Instant::now() + timeout));
        }
    }

    fn publish(&self) {
        let snapshot = self.manager.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PeripheralHandle, RadioState};
    use crate::domain::transport::TransportRequest;
    use std::sync::{Arc, Mutex};

    /// Shares its request log with the test body
    #[derive(Clone, Default)]
    struct SharedTransport {
        requests: Arc<Mutex<Vec<TransportRequest>>>,
    }

    impl Transport for SharedTransport {
        fn submit(&mut self, request: TransportRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<SessionSnapshot>,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("service stopped");
        snapshot.clone()
    }

    fn start(
        config: SessionConfig,
    ) -> (
        SessionHandle,
        mpsc::UnboundedSender<TransportEvent>,
        SharedTransport,
        tokio::task::JoinHandle<()>,
    ) {
        let transport = SharedTransport::default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (service, handle) = SessionService::new(transport.clone(), event_rx, config);
        let task = tokio::spawn(service.run());
        (handle, event_tx, transport, task)
    }

    #[tokio::test]
    async fn test_publishes_scan_rejection() {
        let (handle, _events, _transport, _task) = start(SessionConfig::default());
        let mut rx = handle.subscribe();

        handle.start_scanning().unwrap();
        let snapshot = wait_for(&mut rx, |s| s.last_error.is_some()).await;
        assert!(!snapshot.scanning);
        assert_eq!(
            snapshot.last_error,
            Some(SessionError::RadioUnavailable(RadioState::Unknown))
        );
    }

    #[tokio::test]
    async fn test_events_and_commands_drive_state() {
        let (handle, events, transport, _task) = start(SessionConfig::default());
        let mut rx = handle.subscribe();

        events
            .send(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .unwrap();
        handle.start_scanning().unwrap();
        events
            .send(TransportEvent::DeviceDiscovered {
                id: PeripheralId("p1".into()),
                name: Some("Sensor".into()),
                rssi: -60,
                handle: PeripheralHandle(1),
            })
            .unwrap();
        let snapshot = wait_for(&mut rx, |s| !s.devices.is_empty()).await;
        assert!(snapshot.scanning);

        handle.connect(PeripheralId("p1".into())).unwrap();
        events
            .send(TransportEvent::Connected {
                handle: PeripheralHandle(1),
            })
            .unwrap();
        let snapshot = wait_for(&mut rx, |s| s.connection.is_connected()).await;
        assert_eq!(snapshot.connection_label(), "Connected");
        assert!(transport
            .requests
            .lock()
            .unwrap()
            .contains(&TransportRequest::DiscoverServices(PeripheralHandle(1))));

        handle.disconnect().unwrap();
        let snapshot = wait_for(&mut rx, |s| s.connection == ConnectionState::Disconnected).await;
        assert!(snapshot.connected_device.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fails_attempt() {
        let config = SessionConfig {
            connect_timeout: Some(Duration::from_millis(500)),
            ..SessionConfig::default()
        };
        let (handle, events, transport, _task) = start(config);
        let mut rx = handle.subscribe();

        events
            .send(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered {
                id: PeripheralId("slow".into()),
                name: None,
                rssi: -90,
                handle: PeripheralHandle(4),
            })
            .unwrap();
        wait_for(&mut rx, |s| !s.devices.is_empty()).await;
        handle.connect(PeripheralId("slow".into())).unwrap();

        let snapshot = wait_for(&mut rx, |s| matches!(s.connection, ConnectionState::Failed(_))).await;
        assert_eq!(snapshot.last_error, Some(SessionError::ConnectTimeout));
        assert!(transport
            .requests
            .lock()
            .unwrap()
            .contains(&TransportRequest::Disconnect(PeripheralHandle(4))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let (handle, _events, _transport, task) = start(SessionConfig::default());
        handle.shutdown().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("service did not stop")
            .unwrap();
        assert!(handle.start_scanning().is_err());
    }
}
