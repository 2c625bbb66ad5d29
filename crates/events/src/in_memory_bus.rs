//! In-memory broker for tests/dev.
//!
//! - No IO
//! - At-least-once: in-flight messages of a dropped consumer go back to the
//!   front of the queue (same attempt), requeued messages go to the back
//!   (attempt + 1)
//! - Every consumer created from one broker shares a single queue

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::{BrokerError, Delivery, MessageConsumer, MessagePublisher};

/// A message parked on the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub body: Vec<u8>,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Entry {
    body: Vec<u8>,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    consumer: u64,
    entry: Entry,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, InFlight>,
    dead: Vec<DeadLetter>,
    next_tag: u64,
    next_consumer: u64,
    published: u64,
    acked: u64,
    dropped: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Command("in-memory broker lock poisoned".to_string()))
    }
}

/// In-memory queue with manual acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new member of the consumer group.
    pub fn consumer(&self) -> InMemoryConsumer {
        let id = match self.shared.lock() {
            Ok(mut s) => {
                s.next_consumer += 1;
                s.next_consumer
            }
            Err(_) => 0,
        };
        InMemoryConsumer {
            id,
            shared: self.shared.clone(),
        }
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.shared.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight_len(&self) -> usize {
        self.shared.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn published(&self) -> u64 {
        self.shared.lock().map(|s| s.published).unwrap_or(0)
    }

    pub fn acked(&self) -> u64 {
        self.shared.lock().map(|s| s.acked).unwrap_or(0)
    }

    /// Messages removed by `nack` without requeue.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().map(|s| s.dropped).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, body: Vec<u8>) -> Result<(), BrokerError> {
        {
            let mut s = self.shared.lock()?;
            s.ready.push_back(Entry { body, attempt: 1 });
            s.published += 1;
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

/// One member of an [`InMemoryBroker`] consumer group.
#[derive(Debug)]
pub struct InMemoryConsumer {
    id: u64,
    shared: Arc<Shared>,
}

impl InMemoryConsumer {
    fn try_take(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut s = self.shared.lock()?;
        let Some(entry) = s.ready.pop_front() else {
            return Ok(None);
        };
        s.next_tag += 1;
        let tag = format!("mem-{}", s.next_tag);
        let delivery = Delivery {
            tag: tag.clone(),
            body: entry.body.clone(),
            attempt: entry.attempt,
        };
        s.in_flight.insert(
            tag,
            InFlight {
                consumer: self.id,
                entry,
            },
        );
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<(MutexGuard<'_, State>, Entry), BrokerError> {
        let mut s = self.shared.lock()?;
        let in_flight = s
            .in_flight
            .remove(&delivery.tag)
            .ok_or_else(|| BrokerError::Command(format!("unknown delivery tag {}", delivery.tag)))?;
        Ok((s, in_flight.entry))
    }
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn receive(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(d) = self.try_take()? {
                return Ok(Some(d));
            }
            let notified = self.shared.notify.notified();
            if let Some(d) = self.try_take()? {
                return Ok(Some(d));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let (mut s, _) = self.settle(delivery)?;
        s.acked += 1;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        {
            let (mut s, mut entry) = self.settle(delivery)?;
            if !requeue {
                s.dropped += 1;
                return Ok(());
            }
            entry.attempt = entry.attempt.saturating_add(1);
            s.ready.push_back(entry);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let (mut s, entry) = self.settle(delivery)?;
        s.dead.push(DeadLetter {
            body: entry.body,
            attempt: entry.attempt,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    // Unsettled deliveries return to the head of the queue, as when a broker
    // notices a consumer connection drop.
    fn drop(&mut self) {
        let returned = match self.shared.state.lock() {
            Ok(mut s) => {
                let mine: Vec<String> = s
                    .in_flight
                    .iter()
                    .filter(|(_, f)| f.consumer == self.id)
                    .map(|(tag, _)| tag.clone())
                    .collect();
                for tag in &mine {
                    if let Some(f) = s.in_flight.remove(tag) {
                        s.ready.push_front(f.entry);
                    }
                }
                !mine.is_empty()
            }
            Err(_) => false,
        };
        if returned {
            self.shared.notify.notify_one();
        }
    }
}
