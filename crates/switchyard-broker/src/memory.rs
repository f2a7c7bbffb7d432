//! In-process broker for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use switchyard_core::{TransportError, WorkItem};

use crate::broker::{Broker, Delivery, DEFAULT_MAX_ATTEMPTS};

#[derive(Default)]
struct Inner {
    next_id: i64,
    ready: VecDeque<Delivery>,
    in_flight: Option<i64>,
    dead: Vec<Delivery>,
}

/// In-memory queue with the same contract as the durable broker, minus
/// persistence. Single consumer.
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    max_attempts: u32,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_attempts,
        }
    }

    /// Dead-lettered deliveries, for assertions.
    pub async fn dead_letters(&self) -> Vec<Delivery> {
        self.inner.lock().await.dead.clone()
    }

    /// Enqueue an arbitrary payload, bypassing the wire codec. Lets tests
    /// exercise malformed-message handling.
    pub async fn publish_raw(&self, payload: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.ready.push_back(Delivery {
            id,
            payload,
            attempts: 0,
        });
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, item: &WorkItem) -> Result<(), TransportError> {
        let payload = item.to_bytes()?;
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.ready.push_back(Delivery {
            id,
            payload,
            attempts: 0,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight.is_some() {
            return Err(TransportError::PrefetchExceeded);
        }
        let Some(mut delivery) = inner.ready.pop_front() else {
            return Ok(None);
        };
        delivery.attempts += 1;
        inner.in_flight = Some(delivery.id);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight != Some(delivery.id) {
            return Err(TransportError::Consume(format!(
                "delivery {} is not in flight",
                delivery.id
            )));
        }
        inner.in_flight = None;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight != Some(delivery.id) {
            return Err(TransportError::Consume(format!(
                "delivery {} is not in flight",
                delivery.id
            )));
        }
        inner.in_flight = None;
        if delivery.attempts >= self.max_attempts {
            inner.dead.push(delivery.clone());
        } else {
            inner.ready.push_back(delivery.clone());
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, TransportError> {
        Ok(self.inner.lock().await.ready.len())
    }
}
