//! Test doubles shared by the supervisor and pipeline tests.
//!
//! Every clone of a [`FakeLink`] stands for the same physical peripheral:
//! releasing one clone drops the connection for all of them, the way a
//! btleplug `Peripheral` does.

use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::ble::characteristics::NotificationEvent;
use crate::ble::transport::{MockTransport, NotificationStream, SensorLink, Transport};
use crate::data::SensorId;
use crate::error::{Error, Result};

type NotificationSlot = Arc<Mutex<Option<mpsc::UnboundedSender<NotificationEvent>>>>;

/// In-memory link driven by the test through shared handles.
#[derive(Clone)]
pub(crate) struct FakeLink {
    connect_delay: Arc<Mutex<Duration>>,
    pub fail_connect: bool,
    pub connected: Arc<AtomicBool>,
    pub released: Arc<AtomicBool>,
    pub unsubscribed: Arc<AtomicBool>,
    /// Number of times any clone was released.
    pub releases: Arc<AtomicUsize>,
    notifications: NotificationSlot,
}

/// Sending half of a [`FakeLink`]'s current notification stream.
pub(crate) struct FakeRadio {
    slot: NotificationSlot,
}

impl FakeRadio {
    pub fn send_raw(&self, sensor: SensorId, payload: &[u8]) {
        if let Some(tx) = self.slot.lock().as_ref() {
            let _ = tx.send(NotificationEvent {
                characteristic_uuid: sensor.characteristic_uuid(),
                data: payload.to_vec(),
            });
        }
    }

    pub fn send(&self, sensor: SensorId, value: u16) {
        self.send_raw(sensor, &value.to_le_bytes());
    }

    /// End the current notification stream.
    pub fn close(&self) {
        self.slot.lock().take();
    }
}

impl FakeLink {
    pub fn new() -> (Self, FakeRadio) {
        let slot: NotificationSlot = Arc::new(Mutex::new(None));
        let link = Self {
            connect_delay: Arc::new(Mutex::new(Duration::from_millis(100))),
            fail_connect: false,
            connected: Arc::new(AtomicBool::new(false)),
            released: Arc::new(AtomicBool::new(false)),
            unsubscribed: Arc::new(AtomicBool::new(false)),
            releases: Arc::new(AtomicUsize::new(0)),
            notifications: slot.clone(),
        };
        (link, FakeRadio { slot })
    }

    /// Delay applied by connect calls that start after this.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// A mocked transport whose `open` hands out clones of this link and
    /// counts the calls in `opens`.
    pub fn transport(&self, opens: Arc<AtomicUsize>) -> Arc<dyn Transport> {
        let link = self.clone();
        let mut transport = MockTransport::new();
        transport.expect_open().returning(move |_| {
            opens.fetch_add(1, Ordering::SeqCst);
            let link: Box<dyn SensorLink> = Box::new(link.clone());
            Ok(link)
        });
        Arc::new(transport)
    }
}

#[async_trait]
impl SensorLink for FakeLink {
    async fn connect(&self) -> Result<()> {
        let delay = *self.connect_delay.lock();
        tokio::time::sleep(delay).await;
        if self.fail_connect {
            return Err(Error::ConnectionFailed {
                reason: "GATT error 133".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_sensors(&self) -> Result<usize> {
        Ok(SensorId::COUNT)
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notifications.lock() = Some(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn unsubscribe_sensors(&self) {
        self.unsubscribed.store(true, Ordering::SeqCst);
    }

    async fn disconnect(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Let spawned tasks run while virtual time advances by `ms`.
pub(crate) async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
