//! Completion delivery
//!
//! Asynchronous completions are handed to a [`Dispatcher`], which decides on
//! which context they run. UI consumers use a [`ChannelDispatcher`] and drain
//! the paired [`DeliveryQueue`] on their display thread.

use tokio::sync::mpsc;
use tracing::warn;

/// A completion bound to its outcome, ready to run
pub type Delivery = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, delivery: Delivery);
}

/// Runs completions on the worker task that resolved the load
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, delivery: Delivery) {
        delivery();
    }
}

/// Queues completions for a consumer-owned context
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, DeliveryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DeliveryQueue { rx })
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            warn!("Delivery queue closed, completion dropped");
        }
    }
}

/// Receiving end of a [`ChannelDispatcher`]
pub struct DeliveryQueue {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl DeliveryQueue {
    /// Run every queued completion without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            delivery();
            ran += 1;
        }
        ran
    }

    /// Wait for the next completion and run it. `false` once every
    /// dispatcher is gone.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(delivery) => {
                delivery();
                true
            }
            None => false,
        }
    }
}
