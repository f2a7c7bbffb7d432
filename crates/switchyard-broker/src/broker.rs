//! The broker trait and delivery handle.

use async_trait::async_trait;

use switchyard_core::{TransportError, WorkItem};

/// Redelivery attempts before a nacked message parks in the dead-letter
/// queue.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// One message handed to a consumer, awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned message id.
    pub id: i64,
    /// Raw UTF-8 JSON payload.
    pub payload: Vec<u8>,
    /// Delivery attempts so far, counting this one.
    pub attempts: u32,
}

impl Delivery {
    /// Decode the payload as a work item.
    pub fn work_item(&self) -> Result<WorkItem, TransportError> {
        WorkItem::from_bytes(&self.payload)
    }
}

/// Durable, acknowledged queue transport.
///
/// Each broker handle is one connection to one named queue. The consumer
/// side enforces a prefetch window of one: [`Broker::receive`] will not
/// hand out a second delivery until the first is acked or nacked: this
/// is the system's backpressure mechanism.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a persistent message. Fire-and-forget from the caller's
    /// perspective: no delivery confirmation is surfaced beyond the local
    /// write succeeding.
    async fn publish(&self, item: &WorkItem) -> Result<(), TransportError>;

    /// Claim the next ready message, or `None` when the queue is empty.
    ///
    /// Fails with [`TransportError::PrefetchExceeded`] while a previous
    /// delivery from this handle is unacknowledged.
    async fn receive(&self) -> Result<Option<Delivery>, TransportError>;

    /// Acknowledge a delivery, removing it from the queue.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Negatively acknowledge a delivery: re-queue it for another attempt,
    /// or park it in the dead-letter queue once attempts are exhausted.
    async fn nack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Ready messages currently in the queue (not counting unacknowledged
    /// deliveries).
    async fn depth(&self) -> Result<usize, TransportError>;
}
