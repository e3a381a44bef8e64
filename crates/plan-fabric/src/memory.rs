use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use plan_types::ChangeEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::channel::ChangeChannel;
use crate::envelope::{
    DeadLetter, DeadLetterDelivery, Delivery, DeliveryTag, EventEnvelope, NackOutcome,
};
use crate::error::{FabricError, FabricResult};

/// Configuration for an [`InMemoryChannel`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Deliveries of one event before a nack dead-letters it.
    pub max_delivery_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
        }
    }
}

/// Counters since the channel was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

struct Pending {
    envelope: EventEnvelope,
    attempts: u32,
}

#[derive(Default)]
struct State {
    next_tag: u64,
    ready: VecDeque<Pending>,
    in_flight: HashMap<DeliveryTag, Pending>,
    dead: VecDeque<DeadLetter>,
    dead_in_flight: HashMap<DeliveryTag, DeadLetter>,
    closed: bool,
    stats: ChannelStats,
}

impl State {
    fn next_tag(&mut self) -> DeliveryTag {
        self.next_tag += 1;
        DeliveryTag(self.next_tag)
    }

    fn bury(&mut self, pending: Pending, reason: &str) {
        error!(
            event_id = %pending.envelope.event_id,
            object_id = pending.envelope.event.object_id(),
            attempts = pending.attempts,
            reason,
            "event dead-lettered"
        );
        self.stats.dead_lettered += 1;
        self.dead.push_back(DeadLetter {
            envelope: pending.envelope,
            reason: reason.to_string(),
            attempts: pending.attempts,
            dead_lettered_at: Utc::now(),
        });
    }

    fn drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }

    fn idle(&self) -> bool {
        self.drained() && self.dead.is_empty() && self.dead_in_flight.is_empty()
    }
}

/// In-process broker with per-delivery acknowledgement.
///
/// Events are delivered in publish order; a requeued event goes to the back
/// of the queue. `redeliver_unacked` simulates a consumer crash.
pub struct InMemoryChannel {
    config: ChannelConfig,
    state: Mutex<State>,
    changed: Notify,
}

impl InMemoryChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            changed: Notify::new(),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Stop accepting events. Consumers drain what is left, then see `None`.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        debug!("change channel closed");
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Return every unacknowledged delivery to the front of its queue,
    /// keeping attempt counts. Returns how many were returned.
    pub fn redeliver_unacked(&self) -> FabricResult<usize> {
        let returned = {
            let mut state = self.lock()?;

            let mut in_flight: Vec<_> = state.in_flight.drain().collect();
            in_flight.sort_by_key(|(tag, _)| *tag);
            let mut dead: Vec<_> = state.dead_in_flight.drain().collect();
            dead.sort_by_key(|(tag, _)| *tag);

            let returned = in_flight.len() + dead.len();
            for (_, pending) in in_flight.into_iter().rev() {
                state.ready.push_front(pending);
            }
            for (_, letter) in dead.into_iter().rev() {
                state.dead.push_front(letter);
            }
            returned
        };
        if returned > 0 {
            warn!(returned, "returned unacknowledged deliveries to the queue");
        }
        self.changed.notify_waiters();
        Ok(returned)
    }

    /// Events waiting for a consumer.
    pub fn depth(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Deliveries handed out and not yet acked or nacked.
    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Dead letters waiting for a recorder.
    pub fn dead_letter_depth(&self) -> usize {
        self.state.lock().map(|s| s.dead.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> ChannelStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    fn lock(&self) -> FabricResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| FabricError::Unavailable(format!("lock poisoned: {e}")))
    }

    /// Re-evaluate `poll` on every state change until it yields a value.
    async fn wait_until<T, F>(&self, mut poll: F) -> FabricResult<T>
    where
        F: FnMut(&mut State) -> Option<T> + Send,
        T: Send,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = {
                let mut state = self.lock()?;
                poll(&mut state)
            };
            if let Some(value) = ready {
                return Ok(value);
            }
            notified.await;
        }
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[async_trait]
impl ChangeChannel for InMemoryChannel {
    async fn publish(&self, event: ChangeEvent) -> FabricResult<EventEnvelope> {
        let envelope = EventEnvelope::new(event);
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(FabricError::Closed);
            }
            state.stats.published += 1;
            state.ready.push_back(Pending {
                envelope: envelope.clone(),
                attempts: 0,
            });
        }
        debug!(
            event_id = %envelope.event_id,
            object_id = envelope.event.object_id(),
            kind = envelope.event.kind(),
            "event published"
        );
        self.changed.notify_waiters();
        Ok(envelope)
    }

    async fn consume(&self) -> FabricResult<Option<Delivery>> {
        self.wait_until(|state| {
            if let Some(mut pending) = state.ready.pop_front() {
                pending.attempts += 1;
                let tag = state.next_tag();
                let delivery = Delivery {
                    tag,
                    attempt: pending.attempts,
                    envelope: pending.envelope.clone(),
                };
                state.in_flight.insert(tag, pending);
                state.stats.delivered += 1;
                return Some(Some(delivery));
            }
            if state.closed && state.in_flight.is_empty() {
                return Some(None);
            }
            None
        })
        .await
    }

    async fn ack(&self, tag: DeliveryTag) -> FabricResult<()> {
        {
            let mut state = self.lock()?;
            state
                .in_flight
                .remove(&tag)
                .ok_or(FabricError::UnknownDelivery(tag))?;
            state.stats.acked += 1;
        }
        debug!(%tag, "delivery acknowledged");
        self.changed.notify_waiters();
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, reason: &str) -> FabricResult<NackOutcome> {
        let outcome = {
            let mut state = self.lock()?;
            let pending = state
                .in_flight
                .remove(&tag)
                .ok_or(FabricError::UnknownDelivery(tag))?;
            if pending.attempts >= self.config.max_delivery_attempts {
                state.bury(pending, reason);
                NackOutcome::DeadLettered
            } else {
                let attempt = pending.attempts;
                warn!(
                    %tag,
                    event_id = %pending.envelope.event_id,
                    attempt,
                    reason,
                    "delivery rejected; requeued"
                );
                state.stats.requeued += 1;
                state.ready.push_back(pending);
                NackOutcome::Requeued { attempt }
            }
        };
        self.changed.notify_waiters();
        Ok(outcome)
    }

    async fn dead_letter(&self, tag: DeliveryTag, reason: &str) -> FabricResult<()> {
        {
            let mut state = self.lock()?;
            let pending = state
                .in_flight
                .remove(&tag)
                .ok_or(FabricError::UnknownDelivery(tag))?;
            state.bury(pending, reason);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn consume_dead_letter(&self) -> FabricResult<Option<DeadLetterDelivery>> {
        self.wait_until(|state| {
            if let Some(letter) = state.dead.pop_front() {
                let tag = state.next_tag();
                state.dead_in_flight.insert(tag, letter.clone());
                return Some(Some(DeadLetterDelivery { tag, letter }));
            }
            if state.closed && state.drained() && state.dead_in_flight.is_empty() {
                return Some(None);
            }
            None
        })
        .await
    }

    async fn ack_dead_letter(&self, tag: DeliveryTag) -> FabricResult<()> {
        {
            let mut state = self.lock()?;
            state
                .dead_in_flight
                .remove(&tag)
                .ok_or(FabricError::UnknownDelivery(tag))?;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn wait_idle(&self) -> FabricResult<()> {
        self.wait_until(|state| state.idle().then_some(())).await
    }
}

impl std::fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("config", &self.config)
            .field("depth", &self.depth())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
