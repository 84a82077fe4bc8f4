use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::traits::{LinkEvent, Peripheral, Transport};

/// Shared handle into a mock peripheral's internals.
///
/// Tests hold the link to inspect recorded writes, inject notifications, and
/// script failures while the core owns the `Peripheral` itself.
#[derive(Clone, Default)]
pub struct MockLink {
    writes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    notify_tx: Arc<Mutex<Option<mpsc::Sender<LinkEvent>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_info_read: Arc<AtomicBool>,
    info_payload: Arc<Mutex<Option<Vec<u8>>>>,
    write_delay: Arc<Mutex<Duration>>,
    writes_in_flight: Arc<AtomicUsize>,
    max_writes_in_flight: Arc<AtomicUsize>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes issued so far, in issue order
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// The `cmd` field of every decoded command written so far
    pub fn command_names(&self) -> Vec<String> {
        self.writes()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice::<serde_json::Value>(payload).ok())
            .filter_map(|v| v["cmd"].as_str().map(str::to_string))
            .collect()
    }

    /// Inject one notification as if the device sent it
    pub async fn notify(&self, payload: &[u8]) {
        let tx = self.notify_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(LinkEvent::Notification(payload.to_vec())).await;
        }
    }

    /// Simulate an unsolicited link drop
    pub async fn drop_link(&self) {
        let tx = self.notify_tx.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(LinkEvent::Disconnected).await;
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_info_read(&self, fail: bool) {
        self.fail_info_read.store(fail, Ordering::SeqCst);
    }

    pub fn set_info_payload(&self, payload: &[u8]) {
        *self.info_payload.lock().unwrap() = Some(payload.to_vec());
    }

    /// Make each write take this long, to expose overlapping writes
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Highest number of writes ever observed in flight simultaneously
    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }
}

/// In-memory peripheral for integration tests and demos
pub struct MockPeripheral {
    name: String,
    link: MockLink,
    connected: AtomicBool,
}

impl MockPeripheral {
    pub fn new(name: &str, link: MockLink) -> Self {
        Self {
            name: name.to_string(),
            link,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_service(&mut self, _service_uuid: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow!("Not connected"));
        }
        Ok(())
    }

    async fn enable_notifications(
        &mut self,
        _characteristic_uuid: &str,
    ) -> Result<mpsc::Receiver<LinkEvent>> {
        let (tx, rx) = mpsc::channel(64);
        *self.link.notify_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write_characteristic(&self, characteristic_uuid: &str, payload: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow!("Not connected"));
        }
        if self.link.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated write failure"));
        }

        let in_flight = self.link.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.link
            .max_writes_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.link.write_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.link
            .writes
            .lock()
            .unwrap()
            .push((characteristic_uuid.to_string(), payload.to_vec()));
        self.link.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_characteristic(&self, _characteristic_uuid: &str) -> Result<Vec<u8>> {
        if self.link.fail_info_read.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated read failure"));
        }
        self.link
            .info_payload
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("No info payload configured"))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.link.notify_tx.lock().unwrap().take();
    }
}

/// Transport producing mock peripherals bound to one shared link
pub struct MockTransport {
    link: MockLink,
    device_name: String,
}

impl MockTransport {
    pub fn new(link: MockLink) -> Self {
        Self {
            link,
            device_name: "bench-rig".to_string(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request_peripheral(
        &self,
        _service_filter: Option<&str>,
    ) -> Result<Box<dyn Peripheral>> {
        Ok(Box::new(MockPeripheral::new(
            &self.device_name,
            self.link.clone(),
        )))
    }
}
