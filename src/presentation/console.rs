//! Line-oriented console
//!
//! Reads commands from stdin, forwards them to the session service and
//! prints what changed in each published snapshot.

use crate::domain::error::SessionError;
use crate::domain::models::{CharacteristicRef, PeripheralId, SessionSnapshot};
use crate::infrastructure::bluetooth::{SessionCommand, SessionHandle};
use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

const HELP: &str = "\
commands:
  scan                      start scanning
  stop                      stop scanning
  devices                   list discovered peripherals
  connect <index|id>        connect to a listed peripheral
  disconnect                drop the connection
  send <text>               write UTF-8 text
  hex <bytes>               write hex bytes, e.g. 'hex 01 0a ff'
  clear                     clear the received log
  write <service> <char>    pick the write characteristic
  subscribe <service> <char> pick the notify characteristic
  status                    show the session state
  help                      show this text
  quit                      exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    Id(PeripheralId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    Stop,
    Devices,
    Connect(DeviceSelector),
    Disconnect,
    Send(String),
    Hex(String),
    Clear,
    Write(CharacteristicRef),
    Subscribe(CharacteristicRef),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim_start();
    if line.trim().is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (line.trim_end(), ""),
    };

    let command = match word.to_lowercase().as_str() {
        "scan" => ConsoleCommand::Scan,
        "stop" => ConsoleCommand::Stop,
        "devices" | "ls" => ConsoleCommand::Devices,
        "connect" => {
            let target = rest.trim();
            if target.is_empty() {
                bail!("usage: connect <index|id>");
            }
            let selector = match target.parse::<usize>() {
                Ok(index) => DeviceSelector::Index(index),
                Err(_) => DeviceSelector::Id(PeripheralId(target.to_string())),
            };
            ConsoleCommand::Connect(selector)
        }
        "disconnect" => ConsoleCommand::Disconnect,
        // keep the payload as typed, including inner and trailing spaces
        "send" => ConsoleCommand::Send(rest.to_string()),
        "hex" => ConsoleCommand::Hex(rest.to_string()),
        "clear" => ConsoleCommand::Clear,
        "write" => ConsoleCommand::Write(parse_reference(rest)?),
        "subscribe" | "sub" => ConsoleCommand::Subscribe(parse_reference(rest)?),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(Some(command))
}

fn parse_reference(args: &str) -> Result<CharacteristicRef> {
    let mut parts = args.split_whitespace();
    let (Some(service), Some(characteristic), None) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("expected <service-uuid> <characteristic-uuid>");
    };
    Ok(CharacteristicRef {
        service: Uuid::parse_str(service)
            .with_context(|| format!("invalid service UUID '{}'", service))?,
        characteristic: Uuid::parse_str(characteristic)
            .with_context(|| format!("invalid characteristic UUID '{}'", characteristic))?,
    })
}

pub fn render_devices(snapshot: &SessionSnapshot) -> String {
    if snapshot.devices.is_empty() {
        return "no devices discovered".to_string();
    }
    let mut out = String::new();
    for (index, device) in snapshot.devices.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {} ({}) {} dBm",
            index,
            device.display_name(),
            device.id,
            device.rssi
        );
    }
    out.trim_end().to_string()
}

pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "radio: {}", snapshot.radio);
    let _ = writeln!(out, "scanning: {}", snapshot.scanning);
    let _ = writeln!(out, "connection: {}", snapshot.connection_label());
    if let Some(device) = &snapshot.connected_device {
        let _ = writeln!(out, "device: {} ({})", device.display_name(), device.id);
    }
    for service in &snapshot.services {
        let _ = writeln!(out, "service {}", service.uuid);
        for characteristic in &service.characteristics {
            let reference = characteristic.reference();
            let mut marks = String::new();
            if snapshot.channels.write == Some(reference) {
                marks.push_str(" [write]");
            }
            if snapshot.channels.notify == Some(reference) {
                marks.push_str(" [notify]");
            }
            let _ = writeln!(
                out,
                "  {} {}{}",
                characteristic.uuid, characteristic.properties, marks
            );
        }
    }
    if !snapshot.received_text.is_empty() {
        let _ = writeln!(out, "received: {}", snapshot.received_text);
    }
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "last {}", render_error(error));
    }
    out.trim_end().to_string()
}

/// Errors a retry cannot fix get a hint pointing outside the app
fn render_error(error: &SessionError) -> String {
    if error.is_user_recoverable() {
        format!("error: {}", error)
    } else {
        format!(
            "error: {} (check the Bluetooth adapter and its permissions)",
            error
        )
    }
}

/// Human-readable lines describing what changed between two snapshots
pub fn describe_changes(previous: &SessionSnapshot, next: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.radio != next.radio {
        lines.push(format!("radio: {}", next.radio));
    }
    if previous.scanning != next.scanning {
        lines.push(if next.scanning {
            "scanning...".to_string()
        } else {
            "scan stopped".to_string()
        });
    }
    for (index, device) in next.devices.iter().enumerate() {
        if !previous.devices.iter().any(|d| d.id == device.id) {
            lines.push(format!(
                "found [{}] {} ({}) {} dBm",
                index,
                device.display_name(),
                device.id,
                device.rssi
            ));
        }
    }
    if previous.connection != next.connection {
        lines.push(format!("connection: {}", next.connection_label()));
    }
    if previous.channels.write != next.channels.write {
        if let Some(write) = next.channels.write {
            lines.push(format!("write channel: {}", write));
        }
    }
    if previous.channels.notify != next.channels.notify {
        if let Some(notify) = next.channels.notify {
            lines.push(format!("notify channel: {}", notify));
        }
    }
    if let Some(appended) = next.received_text.strip_prefix(previous.received_text.as_str()) {
        let appended = appended.trim();
        if !appended.is_empty() {
            lines.push(format!("<< {}", appended));
        }
    }
    if previous.last_error != next.last_error {
        if let Some(error) = &next.last_error {
            lines.push(render_error(error));
        }
    }

    lines
}

fn resolve_device(snapshot: &SessionSnapshot, selector: DeviceSelector) -> Result<PeripheralId> {
    match selector {
        DeviceSelector::Index(index) => snapshot
            .devices
            .get(index)
            .map(|device| device.id.clone())
            .with_context(|| format!("no device at index {}", index)),
        DeviceSelector::Id(id) => Ok(id),
    }
}

/// Forward a command to the session or answer it locally. Returns false on quit.
fn dispatch(handle: &SessionHandle, command: ConsoleCommand) -> Result<bool> {
    let session_command = match command {
        ConsoleCommand::Scan => SessionCommand::StartScan,
        ConsoleCommand::Stop => SessionCommand::StopScan,
        ConsoleCommand::Devices => {
            println!("{}", render_devices(&handle.snapshot()));
            return Ok(true);
        }
        ConsoleCommand::Connect(selector) => {
            SessionCommand::Connect(resolve_device(&handle.snapshot(), selector)?)
        }
        ConsoleCommand::Disconnect => SessionCommand::Disconnect,
        ConsoleCommand::Send(text) => SessionCommand::SendText(text),
        ConsoleCommand::Hex(hex) => SessionCommand::SendHex(hex),
        ConsoleCommand::Clear => SessionCommand::ClearReceived,
        ConsoleCommand::Write(reference) => SessionCommand::SetWriteCharacteristic(reference),
        ConsoleCommand::Subscribe(reference) => SessionCommand::Subscribe(reference),
        ConsoleCommand::Status => {
            println!("{}", render_status(&handle.snapshot()));
            return Ok(true);
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            return Ok(true);
        }
        ConsoleCommand::Quit => return Ok(false),
    };
    handle.send(session_command)?;
    Ok(true)
}

async fn print_changes(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut previous = snapshots.borrow_and_update().clone();
    while snapshots.changed().await.is_ok() {
        let next = snapshots.borrow_and_update().clone();
        for line in describe_changes(&previous, &next) {
            println!("{}", line);
        }
        previous = next;
    }
}

/// Drive the session from stdin until `quit` or end of input
pub async fn run(handle: SessionHandle) -> Result<()> {
    let printer = tokio::spawn(print_changes(handle.subscribe()));
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        debug!(%line, "Console input");
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match dispatch(&handle, command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!("Console command failed: {:#}", e);
                println!("{:#}", e);
            }
        }
    }

    // The service may already be gone if it stopped on its own
    let _ = handle.shutdown();
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        CharacteristicProperties, CharacteristicRecord, ConnectionState, DiscoveredDevice,
        PeripheralHandle, RadioState, ServiceRecord,
    };

    const SVC: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
    const CHR: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

    fn device(id: &str, name: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: PeripheralId(id.into()),
            name: name.into(),
            rssi: -50,
            handle: PeripheralHandle(1),
        }
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("scan").unwrap(), Some(ConsoleCommand::Scan));
        assert_eq!(parse_command("  STOP  ").unwrap(), Some(ConsoleCommand::Stop));
        assert_eq!(parse_command("quit").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn test_parse_connect_selectors() {
        assert_eq!(
            parse_command("connect 2").unwrap(),
            Some(ConsoleCommand::Connect(DeviceSelector::Index(2)))
        );
        assert_eq!(
            parse_command("connect loopback-1").unwrap(),
            Some(ConsoleCommand::Connect(DeviceSelector::Id(PeripheralId(
                "loopback-1".into()
            ))))
        );
        assert!(parse_command("connect").is_err());
    }

    #[test]
    fn test_send_keeps_payload_verbatim() {
        assert_eq!(
            parse_command("send hello  world ").unwrap(),
            Some(ConsoleCommand::Send("hello  world ".into()))
        );
        assert_eq!(
            parse_command("send").unwrap(),
            Some(ConsoleCommand::Send(String::new()))
        );
    }

    #[test]
    fn test_parse_characteristic_reference() {
        let command = parse_command(&format!("subscribe {} {}", SVC, CHR))
            .unwrap()
            .unwrap();
        let reference = match command {
            ConsoleCommand::Subscribe(reference) => reference,
            other => panic!("expected subscribe, got {:?}", other),
        };
        assert_eq!(reference.service, Uuid::parse_str(SVC).unwrap());
        assert_eq!(reference.characteristic, Uuid::parse_str(CHR).unwrap());

        assert!(parse_command(&format!("write {}", SVC)).is_err());
        assert!(parse_command("write nope nope").is_err());
    }

    #[test]
    fn test_describe_changes() {
        let previous = SessionSnapshot {
            received_text: "1".into(),
            ..SessionSnapshot::default()
        };
        let next = SessionSnapshot {
            devices: vec![device("p1", "Sensor")],
            connection: ConnectionState::Connecting,
            received_text: "1 2".into(),
            last_error: Some(SessionError::WriteFailed("busy".into())),
            ..SessionSnapshot::default()
        };

        let lines = describe_changes(&previous, &next);
        assert_eq!(
            lines,
            vec![
                "found [0] Sensor (p1) -50 dBm".to_string(),
                "connection: Connecting...".to_string(),
                "<< 2".to_string(),
                format!("error: {}", SessionError::WriteFailed("busy".into())),
            ]
        );
        assert!(describe_changes(&next, &next).is_empty());
    }

    #[test]
    fn test_unrecoverable_errors_carry_a_hint() {
        let previous = SessionSnapshot::default();
        let next = SessionSnapshot {
            last_error: Some(SessionError::RadioUnavailable(RadioState::Unauthorized)),
            ..SessionSnapshot::default()
        };
        let lines = describe_changes(&previous, &next);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("(check the Bluetooth adapter and its permissions)"));

        let next = SessionSnapshot {
            last_error: Some(SessionError::ConnectTimeout),
            ..SessionSnapshot::default()
        };
        assert_eq!(
            describe_changes(&previous, &next),
            vec![format!("error: {}", SessionError::ConnectTimeout)]
        );
    }

    #[test]
    fn test_render_status_marks_channels() {
        let service = Uuid::parse_str(SVC).unwrap();
        let characteristic = Uuid::parse_str(CHR).unwrap();
        let record = CharacteristicRecord {
            uuid: characteristic,
            properties: CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
            service,
        };
        let mut snapshot = SessionSnapshot {
            connection: ConnectionState::Connected,
            services: vec![ServiceRecord {
                uuid: service,
                characteristics: vec![record.clone()],
            }],
            ..SessionSnapshot::default()
        };
        snapshot.channels.notify = Some(record.reference());

        let status = render_status(&snapshot);
        assert!(status.contains("connection: Connected"));
        assert!(status.contains(&format!("{} notify [notify]", characteristic)));
    }

    #[test]
    fn test_resolve_device_by_index() {
        let snapshot = SessionSnapshot {
            devices: vec![device("a", "A"), device("b", "B")],
            ..SessionSnapshot::default()
        };
        assert_eq!(
            resolve_device(&snapshot, DeviceSelector::Index(1)).unwrap(),
            PeripheralId("b".into())
        );
        assert!(resolve_device(&snapshot, DeviceSelector::Index(5)).is_err());
    }
}
