use chrono::{DateTime, Utc};
use plan_types::ChangeEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, time-ordered identifier of a published event (UUIDv7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

/// A change event as it travels through the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub published_at: DateTime<Utc>,
    pub event: ChangeEvent,
}

impl EventEnvelope {
    pub fn new(event: ChangeEvent) -> Self {
        Self {
            event_id: EventId::new(),
            published_at: Utc::now(),
            event,
        }
    }
}

/// Handle for acknowledging one delivery of an event.
///
/// Every redelivery of the same event gets a fresh tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One delivery of an envelope to a consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub envelope: EventEnvelope,
}

/// What the channel did with a negatively acknowledged delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackOutcome {
    /// Put back on the queue; `attempt` deliveries have been made so far.
    Requeued { attempt: u32 },
    /// The delivery budget is exhausted; moved to the dead-letter queue.
    DeadLettered,
}

/// An event that could not be processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// One delivery of a dead letter, acknowledged once it has been recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetterDelivery {
    pub tag: DeliveryTag,
    pub letter: DeadLetter,
}
