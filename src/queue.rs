//! Hand-off of readings from the BLE worker to the consumer.
//!
//! The queue is the only path by which data leaves the worker task. It is a
//! FIFO bounded only by memory: the producer never waits, and the consumer
//! drains whatever is pending without blocking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::data::SensorReading;

/// Create a connected sender/queue pair.
pub fn reading_queue() -> (ReadingSender, ReadingQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    (
        ReadingSender {
            tx,
            pending: pending.clone(),
        },
        ReadingQueue { rx, pending },
    )
}

/// Producer end, held by the worker.
#[derive(Debug, Clone)]
pub struct ReadingSender {
    tx: mpsc::UnboundedSender<SensorReading>,
    pending: Arc<AtomicUsize>,
}

impl ReadingSender {
    /// Enqueue a reading. The timestamp must already be set to receipt time.
    ///
    /// Returns `false` if the consumer has gone away.
    pub fn push(&self, reading: SensorReading) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(reading) {
            Ok(()) => true,
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                debug!("Reading queue closed, dropping {}", reading.sensor);
                false
            }
        }
    }

    /// Check if the consumer end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end, owned by the processing side.
#[derive(Debug)]
pub struct ReadingQueue {
    rx: mpsc::UnboundedReceiver<SensorReading>,
    pending: Arc<AtomicUsize>,
}

impl ReadingQueue {
    /// Take every pending reading in arrival order. Never blocks.
    pub fn drain_all(&mut self) -> Vec<SensorReading> {
        let mut drained = Vec::with_capacity(self.len());
        while let Ok(reading) = self.rx.try_recv() {
            drained.push(reading);
        }
        self.pending.fetch_sub(drained.len(), Ordering::SeqCst);
        drained
    }

    /// Number of readings waiting to be drained.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
