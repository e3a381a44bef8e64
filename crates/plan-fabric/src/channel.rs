use async_trait::async_trait;
use plan_types::ChangeEvent;

use crate::envelope::{DeadLetterDelivery, Delivery, DeliveryTag, EventEnvelope, NackOutcome};
use crate::error::FabricResult;

/// At-least-once channel carrying change events from the record manager to
/// the projector.
///
/// Every delivery must end in exactly one of `ack`, `nack`, or
/// `dead_letter`. An unacknowledged delivery may be handed out again, so
/// consumers must be idempotent.
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    /// Publish an event. Returns the envelope that will be delivered.
    async fn publish(&self, event: ChangeEvent) -> FabricResult<EventEnvelope>;

    /// Wait for the next delivery. `None` once the channel is closed and
    /// nothing remains queued or in flight.
    async fn consume(&self) -> FabricResult<Option<Delivery>>;

    /// Acknowledge successful processing.
    async fn ack(&self, tag: DeliveryTag) -> FabricResult<()>;

    /// Reject a delivery. The channel requeues it, or dead-letters it once
    /// its delivery budget is spent.
    async fn nack(&self, tag: DeliveryTag, reason: &str) -> FabricResult<NackOutcome>;

    /// Move a delivery straight to the dead-letter queue.
    async fn dead_letter(&self, tag: DeliveryTag, reason: &str) -> FabricResult<()>;

    /// Wait for the next dead letter. `None` once closed and drained.
    async fn consume_dead_letter(&self) -> FabricResult<Option<DeadLetterDelivery>>;

    /// Acknowledge that a dead letter has been recorded.
    async fn ack_dead_letter(&self, tag: DeliveryTag) -> FabricResult<()>;

    /// Wait until nothing is queued, in flight, or awaiting dead-letter
    /// recording.
    async fn wait_idle(&self) -> FabricResult<()>;
}
