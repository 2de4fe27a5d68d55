//! ==============================================================================
//! queue.rs - multi-consumer fifo with per-consumer acknowledgment
//! ==============================================================================
//!
//! purpose:
//!     the hand-off point between the connection workers (producers) and the
//!     downstream consumers (datamgr, storage). every registered consumer sees
//!     every reading exactly once, in push order, and a node is only released
//!     after the last consumer has acknowledged it.
//!
//! protocol:
//!
//!     push ──► [tail] ... [n2] [n1] [head] ──► pop(consumer)
//!                                     │
//!                          acked_by: bitmask of consumers that have seen it
//!
//!     - pop hands the head to a consumer that has not yet acked it
//!     - a consumer that already acked the head waits (it may not skip ahead)
//!     - the consumer that completes the ack mask removes the head and wakes
//!       everybody waiting on the condition
//!     - the end-of-stream marker is never returned as data; it turns into
//!       Pop::EndOfStream, which stays terminal for that consumer
//!
//! relationships:
//!     - written by: worker.rs (readings), acceptor.rs (end-of-stream marker)
//!     - drained by: consumer.rs (one loop per registered consumer)
//!
//! ==============================================================================

use crate::domain::{ConsumerId, Reading};

use std::collections::{TryReserveError, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// ack sets are a u64 bitmask indexed by registration slot
pub const MAX_CONSUMERS: usize = 64;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("shared queue needs at least one registered consumer")]
    NoConsumers,

    #[error("at most 64 consumers can register, got {0}")]
    TooManyConsumers(usize),

    #[error("{0} registered twice")]
    DuplicateConsumer(ConsumerId),

    #[error("{0} is not registered with this queue")]
    UnknownConsumer(ConsumerId),

    #[error("queue is sealed: end-of-stream has already been pushed")]
    Sealed,

    #[error("could not allocate a queue node: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("queue lock poisoned by a panicking thread")]
    Poisoned,
}

/// result of a successful pop
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Pop {
    Reading(Reading),
    /// ingestion is over; every further pop by this consumer returns this too
    EndOfStream,
}

struct QueueNode {
    reading: Reading,
    acked_by: u64,
}

#[derive(Default)]
struct QueueState {
    nodes: VecDeque<QueueNode>,
    /// set once the end-of-stream marker has been delivered to a consumer
    eos: bool,
    /// set once the end-of-stream marker has been pushed
    sealed: bool,
    /// consumers that have already been handed EndOfStream
    finished: u64,
}

pub struct SharedQueue {
    consumers: Vec<ConsumerId>,
    full_mask: u64,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl SharedQueue {
    /// build a queue for a fixed set of consumers
    ///
    /// the set cannot change afterwards, so every consumer that will ever
    /// call `pop` must be listed here before the first push.
    pub fn new<I>(consumers: I) -> Result<Self, QueueError>
    where
        I: IntoIterator<Item = ConsumerId>,
    {
        let mut registered: Vec<ConsumerId> = Vec::new();
        for id in consumers {
            if registered.contains(&id) {
                return Err(QueueError::DuplicateConsumer(id));
            }
            registered.push(id);
        }

        match registered.len() {
            0 => return Err(QueueError::NoConsumers),
            n if n > MAX_CONSUMERS => return Err(QueueError::TooManyConsumers(n)),
            _ => {}
        }

        let full_mask = if registered.len() == MAX_CONSUMERS {
            u64::MAX
        } else {
            (1u64 << registered.len()) - 1
        };

        Ok(Self {
            consumers: registered,
            full_mask,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
        })
    }

    pub fn consumers(&self) -> &[ConsumerId] {
        &self.consumers
    }

    /// append a reading at the tail and wake waiting consumers
    ///
    /// pushing the end-of-stream marker seals the queue; anything pushed
    /// after it is rejected with `QueueError::Sealed`.
    pub fn push(&self, reading: Reading) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.sealed {
            return Err(QueueError::Sealed);
        }

        state.nodes.try_reserve(1)?;
        state.nodes.push_back(QueueNode { reading, acked_by: 0 });
        if reading.is_end_of_stream() {
            state.sealed = true;
        }
        drop(state);

        self.not_empty.notify_all();
        Ok(())
    }

    /// take the next reading for `consumer`, blocking until there is one
    pub fn pop(&self, consumer: ConsumerId) -> Result<Pop, QueueError> {
        let bit = 1u64 << self.slot(consumer)?;
        let mut state = self.lock()?;

        loop {
            let inner = &mut *state;
            if inner.finished & bit != 0 {
                return Ok(Pop::EndOfStream);
            }

            if let Some(node) = inner.nodes.front_mut() {
                if node.acked_by & bit == 0 {
                    node.acked_by |= bit;
                    let reading = node.reading;

                    if node.acked_by == self.full_mask {
                        inner.nodes.pop_front();
                        self.not_empty.notify_all();
                    }

                    if reading.is_end_of_stream() {
                        inner.eos = true;
                        inner.finished |= bit;
                        return Ok(Pop::EndOfStream);
                    }
                    return Ok(Pop::Reading(reading));
                }
                // head already seen by us: hold here until the others catch up
            } else if inner.eos {
                inner.finished |= bit;
                return Ok(Pop::EndOfStream);
            }

            state = self.not_empty.wait(state).map_err(|_| QueueError::Poisoned)?;
        }
    }

    /// number of nodes still waiting for at least one acknowledgment
    #[cfg(test)]
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.nodes.len())
    }

    fn slot(&self, consumer: ConsumerId) -> Result<usize, QueueError> {
        self.consumers
            .iter()
            .position(|c| *c == consumer)
            .ok_or(QueueError::UnknownConsumer(consumer))
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }
}
