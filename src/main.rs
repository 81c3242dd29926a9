use ble_session::domain::settings::SettingsService;
use ble_session::infrastructure::bluetooth::{
    LoopbackOptions, LoopbackTransport, SessionService,
};
use ble_session::infrastructure::logging::init_logger;
use ble_session::presentation::console;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!(
        settings = %settings_service.path().display(),
        "Starting BLE session"
    );

    let config = settings_service.get().session_config()?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = LoopbackTransport::new(event_tx, LoopbackOptions::default());
    let (service, handle) = SessionService::new(transport, event_rx, config);
    let service_task = tokio::spawn(service.run());

    console::run(handle).await?;

    service_task.await?;
    tracing::info!("Exiting");
    Ok(())
}
