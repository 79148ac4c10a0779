//! In-memory queue
//!
//! Offset-tracking queue with at-least-once delivery: a message is delivered
//! until it is committed. Used by tests and local runs without NATS.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::Notify;

use crate::{
    message::QueueMessage,
    source::{MessageSource, QueuePublisher},
    Error, Result,
};

#[derive(Default)]
struct State {
    log: Vec<(Option<String>, Bytes)>,
    deliveries: Vec<u64>,
    ready: VecDeque<u64>,
    in_flight: BTreeSet<u64>,
    committed: BTreeSet<u64>,
    closed: bool,
    failing_fetches: usize,
    fail_commits: bool,
}

/// In-memory [`MessageSource`] and [`QueuePublisher`]
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryQueue")
            .field("messages", &state.log.len())
            .field("committed", &state.committed.len())
            .finish()
    }
}

impl MemoryQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Append a message; returns its sequence (starting at 1)
    pub fn push(&self, key: Option<&str>, payload: impl Into<Bytes>) -> u64 {
        let mut state = self.lock();
        state.log.push((key.map(str::to_string), payload.into()));
        state.deliveries.push(0);
        let sequence = state.log.len() as u64;
        state.ready.push_back(sequence);
        drop(state);
        self.notify.notify_one();
        sequence
    }

    /// Simulate a consumer restart: every uncommitted delivery becomes ready again
    pub fn redeliver_uncommitted(&self) {
        let mut state = self.lock();
        let in_flight: Vec<u64> = std::mem::take(&mut state.in_flight).into_iter().collect();
        for sequence in in_flight.into_iter().rev() {
            state.ready.push_front(sequence);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Make the next `count` fetches fail with a transport error
    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().failing_fetches = count;
        self.notify.notify_one();
    }

    /// Make commits fail until reset
    pub fn set_commit_failure(&self, failing: bool) {
        self.lock().fail_commits = failing;
    }

    /// Number of committed messages
    pub fn committed_count(&self) -> usize {
        self.lock().committed.len()
    }

    /// Whether a sequence was committed
    pub fn is_committed(&self, sequence: u64) -> bool {
        self.lock().committed.contains(&sequence)
    }

    /// Messages delivered or waiting that are not committed yet
    pub fn uncommitted_count(&self) -> usize {
        let state = self.lock();
        state.log.len() - state.committed.len()
    }

    /// How often a sequence was handed out
    pub fn delivery_count(&self, sequence: u64) -> u64 {
        let state = self.lock();
        sequence
            .checked_sub(1)
            .and_then(|i| state.deliveries.get(i as usize).copied())
            .unwrap_or_default()
    }

    fn try_take(&self) -> Option<Result<QueueMessage>> {
        let mut state = self.lock();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Some(Err(Error::Fetch("injected fetch failure".to_string())));
        }
        while let Some(sequence) = state.ready.pop_front() {
            if state.committed.contains(&sequence) {
                continue;
            }
            let index = (sequence - 1) as usize;
            state.deliveries[index] += 1;
            let attempt = state.deliveries[index];
            state.in_flight.insert(sequence);
            let (key, payload) = state.log[index].clone();
            let mut message = QueueMessage::detached(sequence, key, payload);
            message.delivery_attempt = attempt;
            return Some(Ok(message));
        }
        if state.closed {
            return Some(Err(Error::EndOfStream));
        }
        None
    }
}

#[async_trait]
impl MessageSource for MemoryQueue {
    async fn next_message(&self) -> Result<QueueMessage> {
        loop {
            if let Some(result) = self.try_take() {
                return result;
            }
            self.notify.notified().await;
        }
    }

    async fn commit(&self, messages: &[QueueMessage]) -> Result<()> {
        let mut state = self.lock();
        if state.fail_commits {
            return Err(Error::Ack("injected commit failure".to_string()));
        }
        for message in messages {
            state.in_flight.remove(&message.sequence);
            state.committed.insert(message.sequence);
        }
        Ok(())
    }

    async fn release(&self, messages: &[QueueMessage]) -> Result<()> {
        let mut state = self.lock();
        for message in messages.iter().rev() {
            if state.in_flight.remove(&message.sequence) {
                state.ready.push_front(message.sequence);
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<()> {
        self.push(Some(key), payload);
        Ok(())
    }
}
