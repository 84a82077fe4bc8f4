use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::command_channel::CommandChannel;
use super::hub::TelemetryHub;
use super::watchdog::SafetyWatchdog;
use crate::events::BenchEvent;
use crate::protocol::{self, DeviceInfo, TelemetryMessage};
use crate::transport::{
    LinkEvent, Peripheral, Transport, DEVICE_INFO_CHAR_UUID, SERVICE_UUID, TELEMETRY_CHAR_UUID,
};

/// Owns the peripheral connection lifecycle.
///
/// Connect performs request, open, service discovery, notification
/// subscription, and a best-effort device-info read, then binds the command
/// channel and starts the notification pump. Both requested and unsolicited
/// disconnects run the same teardown to a clean no-device state; reconnection
/// is always a fresh `connect`. Clonable handle over shared state.
#[derive(Clone)]
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    commands: CommandChannel,
    hub: TelemetryHub,
    watchdog: SafetyWatchdog,
    events: broadcast::Sender<BenchEvent>,
    peripheral: Arc<Mutex<Option<Arc<dyn Peripheral>>>>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DeviceSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        commands: CommandChannel,
        hub: TelemetryHub,
        watchdog: SafetyWatchdog,
        events: broadcast::Sender<BenchEvent>,
    ) -> Self {
        Self {
            transport,
            commands,
            hub,
            watchdog,
            events,
            peripheral: Arc::new(Mutex::new(None)),
            pump: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral.lock().unwrap().is_some()
    }

    /// Connect to a bench peripheral and return its advertised name
    pub async fn connect(&self) -> Result<String> {
        if self.is_connected() {
            return Err(anyhow!("Already connected"));
        }

        let mut peripheral = self
            .transport
            .request_peripheral(Some(SERVICE_UUID))
            .await
            .context("No matching peripheral found")?;

        peripheral
            .connect()
            .await
            .context("Failed to open peripheral connection")?;
        peripheral
            .discover_service(SERVICE_UUID)
            .await
            .context("Bench service not found on peripheral")?;
        let notifications = peripheral
            .enable_notifications(TELEMETRY_CHAR_UUID)
            .await
            .context("Failed to enable telemetry notifications")?;

        // Discovery metadata is best-effort; older firmware lacks the characteristic
        match peripheral.read_characteristic(DEVICE_INFO_CHAR_UUID).await {
            Ok(raw) => match serde_json::from_slice::<DeviceInfo>(&raw) {
                Ok(info) => {
                    if let Some(firmware) = &info.firmware {
                        self.hub.set_firmware(firmware);
                    }
                    let _ = self.events.send(BenchEvent::DeviceInfo(info));
                }
                Err(e) => log::warn!("Unreadable device info payload: {:#}", e),
            },
            Err(e) => log::warn!("Device info read failed: {:#}", e),
        }

        let name = peripheral.name().to_string();
        let shared: Arc<dyn Peripheral> = Arc::from(peripheral);
        self.commands.bind(shared.clone());
        *self.peripheral.lock().unwrap() = Some(shared);

        let session = self.clone();
        *self.pump.lock().unwrap() = Some(tokio::spawn(async move {
            session.pump_notifications(notifications).await;
        }));

        log::info!("Connected to {}", name);
        let _ = self.events.send(BenchEvent::Connected { name: name.clone() });
        Ok(name)
    }

    /// Requested disconnect
    pub async fn disconnect(&self) {
        let Some(peripheral) = self.teardown(true) else {
            return;
        };
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        peripheral.disconnect().await;
        log::info!("Disconnected from {}", peripheral.name());
    }

    async fn pump_notifications(self, mut rx: mpsc::Receiver<LinkEvent>) {
        loop {
            match rx.recv().await {
                Some(LinkEvent::Notification(raw)) => self.handle_payload(&raw),
                Some(LinkEvent::Disconnected) | None => {
                    if self.teardown(false).is_some() {
                        log::warn!("Peripheral link dropped unexpectedly");
                    }
                    self.pump.lock().unwrap().take();
                    return;
                }
            }
        }
    }

    /// Shared teardown path. Returns the peripheral if one was connected.
    fn teardown(&self, requested: bool) -> Option<Arc<dyn Peripheral>> {
        let peripheral = self.peripheral.lock().unwrap().take()?;
        self.commands.unbind();
        self.commands.clear();
        self.watchdog.reset();
        self.hub.clear();
        let _ = self.events.send(BenchEvent::Disconnected { requested });
        Some(peripheral)
    }

    fn handle_payload(&self, raw: &[u8]) {
        let message = match protocol::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                // Malformed payloads never stall the pipeline
                log::warn!("Dropping undecodable notification: {:#}", e);
                return;
            }
        };

        match message {
            TelemetryMessage::Data(sample) => {
                self.hub.record_sample(sample.clone());
                let _ = self.events.send(BenchEvent::Telemetry(sample));
            }
            TelemetryMessage::Status(report) => {
                let mask = report.mask();
                self.hub.record_status(mask);
                self.watchdog.observe(mask);
                let _ = self.events.send(BenchEvent::Status(mask));
            }
            TelemetryMessage::Profiles { profiles } => {
                let count = profiles.len();
                self.hub.replace_profiles(profiles);
                let _ = self.events.send(BenchEvent::ProfilesSynced { count });
            }
            TelemetryMessage::Profile { profile } => {
                self.hub.upsert_profile(profile);
                let count = self.hub.profiles().len();
                let _ = self.events.send(BenchEvent::ProfilesSynced { count });
            }
            TelemetryMessage::CurrentProfile { name } => {
                self.hub.set_active_profile(&name);
                let _ = self.events.send(BenchEvent::ActiveProfile { name });
            }
            TelemetryMessage::Version { firmware } => {
                self.hub.set_firmware(&firmware);
                let _ = self.events.send(BenchEvent::FirmwareVersion { firmware });
            }
            TelemetryMessage::Ack { command } => {
                let _ = self.events.send(BenchEvent::Ack { command });
            }
            TelemetryMessage::DeviceInfo(info) => {
                if let Some(firmware) = &info.firmware {
                    self.hub.set_firmware(firmware);
                }
                let _ = self.events.send(BenchEvent::DeviceInfo(info));
            }
            TelemetryMessage::Unknown => {
                log::debug!("Ignoring notification with unknown type tag");
            }
        }
    }
}
