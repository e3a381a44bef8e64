//! Change channel for plan mutations.
//!
//! The record manager publishes a [`ChangeEvent`](plan_types::ChangeEvent)
//! after every committed write; index projectors consume it. Delivery is
//! at-least-once with per-delivery acknowledgement. Events that keep failing,
//! or that can never succeed, move to a dead-letter queue, and a
//! [`DeadLetterLog`] keeps them on disk for inspection.

pub mod channel;
pub mod dead_letter_log;
pub mod envelope;
pub mod error;
pub mod memory;

pub use channel::ChangeChannel;
pub use dead_letter_log::{DeadLetterLog, DeadLetterRecord};
pub use envelope::{
    DeadLetter, DeadLetterDelivery, Delivery, DeliveryTag, EventEnvelope, EventId, NackOutcome,
};
pub use error::{FabricError, FabricResult};
pub use memory::{ChannelConfig, ChannelStats, InMemoryChannel};
