use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

use super::{Delivery, Receipt, TaskBroker, TaskEnvelope, TaskPublisher};
use crate::error::QueueError;

#[derive(Default)]
struct State {
    ready: VecDeque<(i64, TaskEnvelope)>,
    published: Vec<TaskEnvelope>,
    dead: Vec<TaskEnvelope>,
    acked: Vec<i64>,
    next_offset: i64,
    closed: bool,
}

/// In-process broker. Keeps a log of everything published and dead-lettered
/// so callers can inspect what happened.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops accepting work and wakes consumers; queued tasks are still
    /// handed out before `next` reports `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn published(&self) -> Vec<TaskEnvelope> {
        self.lock().published.clone()
    }

    pub fn dead_letters(&self) -> Vec<TaskEnvelope> {
        self.lock().dead.clone()
    }

    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn acked(&self) -> usize {
        self.lock().acked.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskPublisher for MemoryBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let offset = state.next_offset;
            state.next_offset += 1;
            state.ready.push_back((offset, envelope.clone()));
            state.published.push(envelope.clone());
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn next(&self) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some((offset, envelope)) = state.ready.pop_front() {
                    return Ok(Delivery {
                        receipt: Receipt {
                            topic: envelope.queue.clone(),
                            partition: 0,
                            offset,
                        },
                        envelope,
                    });
                }
                if state.closed {
                    return Err(QueueError::Closed);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.lock().acked.push(delivery.receipt.offset);
        Ok(())
    }

    async fn dead_letter(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        self.lock().dead.push(envelope.clone());
        Ok(())
    }
}
