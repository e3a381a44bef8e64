//! Channel consumers: the projection worker and the dead-letter recorder.

use std::sync::{Arc, Mutex};

use plan_fabric::{
    ChangeChannel, DeadLetterDelivery, DeadLetterLog, DeadLetterRecord, Delivery, FabricError,
    NackOutcome,
};
use plan_types::{ChangeEvent, RetryPolicy};
use tracing::{debug, error, info, warn};

use crate::backend::IndexBackend;
use crate::error::{ProjectionError, ProjectionResult};
use crate::project::project;

/// Apply one change event to the index.
///
/// A pure function of the event content: applying the same event twice
/// leaves the index as applying it once.
pub async fn apply(index: &dyn IndexBackend, event: &ChangeEvent) -> ProjectionResult<()> {
    match event {
        ChangeEvent::Upsert { object_id, data } => {
            let nodes = project(object_id, data)?;
            let count = nodes.len();
            index.replace_plan(object_id, nodes).await?;
            info!(object_id = %object_id, nodes = count, "plan projected");
        }
        ChangeEvent::Delete { object_id } => {
            let removed = index.remove_plan(object_id).await?;
            info!(object_id = %object_id, removed, "plan removed from index");
        }
    }
    Ok(())
}

/// How a single delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Failed transiently; the channel will deliver it again.
    Requeued { attempt: u32 },
    /// Failed transiently with no delivery budget left.
    DeadLettered,
    /// Can never be projected; dead-lettered without retry.
    PoisonMessage,
}

/// Counters for one worker's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub applied: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub poison: u64,
}

impl WorkerStats {
    fn count(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Applied => self.applied += 1,
            Disposition::Requeued { .. } => self.requeued += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
            Disposition::PoisonMessage => self.poison += 1,
        }
    }
}

/// Consumes change events and projects them into an index backend.
pub struct ProjectionWorker {
    name: String,
    channel: Arc<dyn ChangeChannel>,
    index: Arc<dyn IndexBackend>,
    retry: RetryPolicy,
}

impl ProjectionWorker {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn ChangeChannel>,
        index: Arc<dyn IndexBackend>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            index,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume until the channel is closed and drained.
    ///
    /// A delivery the channel no longer recognizes (it was redelivered
    /// elsewhere) is logged and skipped. Other channel errors stop the worker.
    pub async fn run(self) -> ProjectionResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        debug!(worker = %self.name, "projection worker started");
        while let Some(delivery) = self.channel.consume().await? {
            match self.process(delivery).await {
                Ok(disposition) => stats.count(disposition),
                Err(ProjectionError::Fabric(FabricError::UnknownDelivery(tag))) => {
                    warn!(worker = %self.name, %tag, "delivery settled elsewhere; skipping");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(worker = %self.name, ?stats, "projection worker stopped");
        Ok(stats)
    }

    /// Apply one delivery and settle it with the channel.
    pub async fn process(&self, delivery: Delivery) -> ProjectionResult<Disposition> {
        let event = &delivery.envelope.event;
        match apply(self.index.as_ref(), event).await {
            Ok(()) => {
                self.channel.ack(delivery.tag).await?;
                Ok(Disposition::Applied)
            }
            Err(e) if e.is_retryable() => {
                let delay = self.retry.delay_for(delivery.attempt);
                warn!(
                    worker = %self.name,
                    tag = %delivery.tag,
                    object_id = event.object_id(),
                    attempt = delivery.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "projection failed; will retry"
                );
                tokio::time::sleep(delay).await;
                match self.channel.nack(delivery.tag, &e.to_string()).await? {
                    NackOutcome::Requeued { attempt } => Ok(Disposition::Requeued { attempt }),
                    NackOutcome::DeadLettered => Ok(Disposition::DeadLettered),
                }
            }
            Err(e) => {
                error!(
                    worker = %self.name,
                    tag = %delivery.tag,
                    event_id = %delivery.envelope.event_id,
                    object_id = event.object_id(),
                    error = %e,
                    "poison message"
                );
                self.channel.dead_letter(delivery.tag, &e.to_string()).await?;
                Ok(Disposition::PoisonMessage)
            }
        }
    }
}

impl std::fmt::Debug for ProjectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionWorker")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Drains the dead-letter queue into a durable log.
///
/// Every recorded letter is also kept in memory. Letters are never
/// re-published.
#[derive(Clone)]
pub struct DeadLetterRecorder {
    channel: Arc<dyn ChangeChannel>,
    log: Option<Arc<DeadLetterLog>>,
    recorded: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl DeadLetterRecorder {
    pub fn new(channel: Arc<dyn ChangeChannel>, log: Option<Arc<DeadLetterLog>>) -> Self {
        Self {
            channel,
            log,
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Letters recorded so far, oldest first.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Consume until the channel is closed and fully drained.
    /// Returns how many letters were recorded.
    pub async fn run(self) -> ProjectionResult<usize> {
        let mut recorded = 0;
        while let Some(delivery) = self.channel.consume_dead_letter().await? {
            self.record(delivery).await?;
            recorded += 1;
        }
        Ok(recorded)
    }

    /// Persist one letter and acknowledge it.
    ///
    /// A failed log append is logged; the letter is still kept in memory
    /// and acknowledged so the queue keeps draining.
    pub async fn record(&self, delivery: DeadLetterDelivery) -> ProjectionResult<()> {
        let record = DeadLetterRecord::from_dead_letter(&delivery.letter)?;

        if let Some(log) = &self.log {
            let log = Arc::clone(log);
            let to_write = record.clone();
            let appended = tokio::task::spawn_blocking(move || log.append(&to_write))
                .await
                .map_err(|e| ProjectionError::Unavailable(format!("log task failed: {e}")))?;
            if let Err(e) = appended {
                error!(event_id = %record.event_id, error = %e, "dead letter not persisted");
            }
        }

        info!(
            event_id = %record.event_id,
            object_id = %record.object_id,
            attempts = record.attempts,
            reason = %record.reason,
            "dead letter recorded"
        );
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(record);
        }
        self.channel.ack_dead_letter(delivery.tag).await?;
        Ok(())
    }
}

impl std::fmt::Debug for DeadLetterRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterRecorder")
            .field("log", &self.log.as_ref().map(|l| l.path().to_path_buf()))
            .field("recorded", &self.records().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryIndex;
    use crate::node::IndexNode;
    use async_trait::async_trait;
    use plan_fabric::{ChannelConfig, InMemoryChannel};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_plan(id: &str, groups: &[&str]) -> Value {
        let services: Vec<Value> = groups
            .iter()
            .map(|g| {
                json!({
                    "objectId": g, "objectType": "planservice", "_org": "example.com",
                    "linkedService": {
                        "objectId": format!("{g}-ls"), "objectType": "service",
                        "_org": "example.com", "name": "Yearly physical"
                    },
                    "planserviceCostShares": {
                        "objectId": format!("{g}-scs"), "objectType": "membercostshare",
                        "_org": "example.com", "deductible": 10, "copay": 0
                    }
                })
            })
            .collect();
        json!({
            "objectId": id, "objectType": "plan", "_org": "example.com",
            "planType": "inNetwork", "creationDate": "2017-12-12",
            "planCostShares": {
                "objectId": format!("{id}-cs"), "objectType": "membercostshare",
                "_org": "example.com", "deductible": 2000, "copay": 23
            },
            "linkedPlanServices": services
        })
    }

    fn upsert(id: &str, groups: &[&str]) -> ChangeEvent {
        ChangeEvent::Upsert {
            object_id: id.into(),
            data: make_plan(id, groups),
        }
    }

    fn make_channel(max_delivery_attempts: u32) -> Arc<InMemoryChannel> {
        Arc::new(InMemoryChannel::new(ChannelConfig {
            max_delivery_attempts,
        }))
    }

    fn make_worker(channel: &Arc<InMemoryChannel>, index: Arc<dyn IndexBackend>) -> ProjectionWorker {
        ProjectionWorker::new("w0", channel.clone(), index, RetryPolicy::immediate(5))
    }

    /// Fails the first `failures` writes with `Unavailable`.
    struct FlakyIndex {
        inner: InMemoryIndex,
        failures: AtomicU32,
    }

    impl FlakyIndex {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryIndex::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> ProjectionResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(ProjectionError::Unavailable("index offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl IndexBackend for FlakyIndex {
        async fn replace_plan(&self, plan_id: &str, nodes: Vec<IndexNode>) -> ProjectionResult<()> {
            self.trip()?;
            self.inner.replace_plan(plan_id, nodes).await
        }
        async fn remove_plan(&self, plan_id: &str) -> ProjectionResult<bool> {
            self.trip()?;
            self.inner.remove_plan(plan_id).await
        }
        async fn get(&self, object_id: &str) -> ProjectionResult<Option<IndexNode>> {
            self.inner.get(object_id).await
        }
        async fn nodes_for_plan(&self, plan_id: &str) -> ProjectionResult<Vec<IndexNode>> {
            self.inner.nodes_for_plan(plan_id).await
        }
        async fn all_nodes(&self) -> ProjectionResult<Vec<IndexNode>> {
            self.inner.all_nodes().await
        }
    }

    // -----------------------------------------------------------------------
    // apply
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn triple_replay_is_idempotent() {
        let index = InMemoryIndex::new();
        let event = upsert("P1", &["SG1", "SG2"]);

        apply(&index, &event).await.unwrap();
        let once = index.all_nodes().await.unwrap();
        apply(&index, &event).await.unwrap();
        apply(&index, &event).await.unwrap();

        assert_eq!(index.all_nodes().await.unwrap(), once);
        assert_eq!(once.len(), 8);
    }

    #[tokio::test]
    async fn upsert_removes_stale_children() {
        let index = InMemoryIndex::new();
        apply(&index, &upsert("P1", &["SG1", "SG2"])).await.unwrap();
        apply(&index, &upsert("P1", &["SG2"])).await.unwrap();

        assert!(index.get("SG1").await.unwrap().is_none());
        assert!(index.get("SG1-ls").await.unwrap().is_none());
        assert!(index.get("SG2-scs").await.unwrap().is_some());
        assert_eq!(index.node_count(), 5);
    }

    #[tokio::test]
    async fn delete_removes_subtree_and_tolerates_unknown_plans() {
        let index = InMemoryIndex::new();
        apply(&index, &upsert("P1", &["SG1"])).await.unwrap();
        apply(&index, &upsert("P2", &[])).await.unwrap();

        let delete = ChangeEvent::Delete { object_id: "P1".into() };
        apply(&index, &delete).await.unwrap();
        apply(&index, &delete).await.unwrap();
        apply(&index, &ChangeEvent::Delete { object_id: "nope".into() }).await.unwrap();

        let plans: Vec<_> = index
            .all_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.plan_id)
            .collect();
        assert!(plans.iter().all(|p| p == "P2"));
    }

    // -----------------------------------------------------------------------
    // ProjectionWorker
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn worker_acks_and_stops_on_close() {
        let channel = make_channel(3);
        let index = Arc::new(InMemoryIndex::new());
        channel.publish(upsert("P1", &["SG1"])).await.unwrap();
        channel.publish(upsert("P2", &[])).await.unwrap();
        channel.close();

        let stats = make_worker(&channel, index.clone()).run().await.unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(index.plan_count(), 2);
        assert_eq!(channel.stats().acked, 2);
    }

    #[tokio::test]
    async fn redelivery_after_crash_converges() {
        let channel = make_channel(5);
        let index = Arc::new(InMemoryIndex::new());
        let worker = make_worker(&channel, index.clone());
        channel.publish(upsert("P1", &["SG1"])).await.unwrap();

        // Consumer applies but "crashes" before acking.
        let delivery = channel.consume().await.unwrap().unwrap();
        apply(index.as_ref(), &delivery.envelope.event).await.unwrap();
        assert_eq!(channel.redeliver_unacked().unwrap(), 1);

        let again = channel.consume().await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(worker.process(again).await.unwrap(), Disposition::Applied);
        assert_eq!(index.node_count(), 5);
        channel.wait_idle().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_is_requeued_then_applied() {
        let channel = make_channel(5);
        let index = Arc::new(FlakyIndex::new(2));
        channel.publish(upsert("P1", &[])).await.unwrap();
        channel.close();

        let stats = make_worker(&channel, index.clone()).run().await.unwrap();
        assert_eq!(stats.requeued, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(index.inner.plan_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_delivery_budget() {
        let channel = make_channel(2);
        let index = Arc::new(FlakyIndex::new(10));
        channel.publish(upsert("P1", &[])).await.unwrap();

        let worker = make_worker(&channel, index);
        let first = channel.consume().await.unwrap().unwrap();
        assert_eq!(worker.process(first).await.unwrap(), Disposition::Requeued { attempt: 1 });
        let second = channel.consume().await.unwrap().unwrap();
        assert_eq!(worker.process(second).await.unwrap(), Disposition::DeadLettered);
        assert_eq!(channel.dead_letter_depth(), 1);
    }

    #[tokio::test]
    async fn malformed_event_is_poison_and_worker_continues() {
        let channel = make_channel(5);
        let index = Arc::new(InMemoryIndex::new());
        channel
            .publish(ChangeEvent::Upsert {
                object_id: "BAD".into(),
                data: json!({"objectId": "BAD", "planCostShares": "oops"}),
            })
            .await
            .unwrap();
        channel.publish(upsert("P1", &[])).await.unwrap();
        channel.close();

        let stats = make_worker(&channel, index.clone()).run().await.unwrap();
        assert_eq!(stats.poison, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.requeued, 0);
        assert_eq!(channel.dead_letter_depth(), 1);
        assert_eq!(index.plan_count(), 1);
    }

    // -----------------------------------------------------------------------
    // DeadLetterRecorder
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn recorder_persists_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(DeadLetterLog::open(&dir.path().join("dead.log")).unwrap());
        let channel = make_channel(5);
        let index = Arc::new(InMemoryIndex::new());

        channel
            .publish(ChangeEvent::Upsert {
                object_id: "BAD".into(),
                data: json!([]),
            })
            .await
            .unwrap();
        channel.close();

        let recorder = DeadLetterRecorder::new(channel.clone(), Some(log.clone()));
        let recorder_task = tokio::spawn(recorder.clone().run());
        make_worker(&channel, index).run().await.unwrap();

        assert_eq!(recorder_task.await.unwrap().unwrap(), 1);
        channel.wait_idle().await.unwrap();

        let on_disk = log.recover().unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].object_id, "BAD");
        assert_eq!(on_disk[0].attempts, 1);
        assert!(on_disk[0].reason.contains("malformed"));
        assert_eq!(recorder.records(), on_disk);
    }

    #[tokio::test]
    async fn recorder_without_log_keeps_letters_in_memory() {
        let channel = make_channel(1);
        let index = Arc::new(FlakyIndex::new(1));
        channel.publish(upsert("P1", &[])).await.unwrap();
        channel.close();

        let recorder = DeadLetterRecorder::new(channel.clone(), None);
        let recorder_task = tokio::spawn(recorder.clone().run());
        let stats = make_worker(&channel, index).run().await.unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(recorder_task.await.unwrap().unwrap(), 1);
        let records = recorder.records();
        assert_eq!(records[0].event().unwrap().object_id(), "P1");
        assert!(records[0].reason.contains("index offline"));
    }
}
