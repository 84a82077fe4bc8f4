use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events surfaced by a subscribed peripheral link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// One notification payload from the notify characteristic
    Notification(Vec<u8>),
    /// The link dropped without a requested disconnect
    Disconnected,
}

/// Host environment capable of producing GATT-style peripheral handles.
///
/// Implemented by platform glue (or the in-memory mock); the core never
/// touches a BLE stack directly.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request a peripheral exposing the given primary service UUID.
    ///
    /// `service_filter = None` requests an unfiltered scan, letting the
    /// operator pick any nearby device.
    async fn request_peripheral(&self, service_filter: Option<&str>)
        -> Result<Box<dyn Peripheral>>;
}

/// One remote peripheral connection.
///
/// Setup (`connect`, `discover_service`, `enable_notifications`) takes
/// `&mut self`; steady-state operations take `&self` so the handle can be
/// shared behind an `Arc` between the command channel and the session.
#[async_trait]
pub trait Peripheral: Send + Sync {
    /// Advertised device name
    fn name(&self) -> &str;

    /// Open the GATT-equivalent connection
    async fn connect(&mut self) -> Result<()>;

    /// Discover the primary service and bind its characteristics
    async fn discover_service(&mut self, service_uuid: &str) -> Result<()>;

    /// Enable notifications on a characteristic and return the event stream
    async fn enable_notifications(
        &mut self,
        characteristic_uuid: &str,
    ) -> Result<mpsc::Receiver<LinkEvent>>;

    /// Write one payload to a characteristic
    async fn write_characteristic(&self, characteristic_uuid: &str, payload: &[u8]) -> Result<()>;

    /// One-shot read from a characteristic
    async fn read_characteristic(&self, characteristic_uuid: &str) -> Result<Vec<u8>>;

    /// Close the connection (requested teardown)
    async fn disconnect(&self);
}
