use std::collections::BTreeSet;
use std::sync::Arc;

use plan_fabric::{ChangeChannel, ChannelStats, DeadLetterLog, DeadLetterRecord, InMemoryChannel};
use plan_index::{
    search, DeadLetterRecorder, InMemoryIndex, IndexBackend, IndexNode, PlanQuery,
    ProjectionResult, ProjectionWorker, WorkerStats,
};
use plan_records::{DeleteOutcome, ReadOutcome, RecordManager};
use plan_schema::{PlanSchemaValidator, Validator};
use plan_store::{DirectoryStore, InMemoryKeyedStore, KeyedStore};
use plan_types::{ChangeEvent, Fingerprint, PlanRecord};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PlanConfig;
use crate::error::{SdkError, SdkResult};

/// What the background tasks did before shutdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerStats>,
    pub dead_letters_recorded: usize,
}

/// The plan store as one service: record manager, change channel, projection
/// workers, and dead-letter recorder.
pub struct PlanService {
    config: PlanConfig,
    records: RecordManager,
    channel: Arc<InMemoryChannel>,
    index: Arc<InMemoryIndex>,
    recorder: DeadLetterRecorder,
    workers: Vec<JoinHandle<ProjectionResult<WorkerStats>>>,
    recorder_task: JoinHandle<ProjectionResult<usize>>,
}

impl PlanService {
    /// Open with the standard plan schema.
    pub async fn open(config: PlanConfig) -> SdkResult<Self> {
        Self::open_with_validator(config, Arc::new(PlanSchemaValidator)).await
    }

    pub async fn open_with_validator(
        config: PlanConfig,
        validator: Arc<dyn Validator>,
    ) -> SdkResult<Self> {
        config.check()?;

        let store: Arc<dyn KeyedStore> = match &config.store.data_dir {
            Some(dir) => Arc::new(DirectoryStore::open(dir)?),
            None => Arc::new(InMemoryKeyedStore::new()),
        };
        let channel = Arc::new(InMemoryChannel::new(config.channel.clone()));
        let index = Arc::new(InMemoryIndex::new());

        let records =
            RecordManager::open(store, channel.clone(), validator, config.record_config()).await?;

        let log = match &config.dead_letter.path {
            Some(path) => Some(Arc::new(DeadLetterLog::open(path)?)),
            None => None,
        };
        let recorder = DeadLetterRecorder::new(channel.clone(), log);
        let recorder_task = tokio::spawn(recorder.clone().run());

        let workers = (0..config.projector.workers)
            .map(|n| {
                let worker = ProjectionWorker::new(
                    format!("projector-{n}"),
                    channel.clone(),
                    index.clone(),
                    config.retry,
                );
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = config.projector.workers,
            data_dir = ?config.store.data_dir,
            dead_letter_log = ?config.dead_letter.path,
            "plan service started"
        );

        Ok(Self {
            config,
            records,
            channel,
            index,
            recorder,
            workers,
            recorder_task,
        })
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// The underlying record manager.
    pub fn records(&self) -> &RecordManager {
        &self.records
    }

    // ---- Record operations ----

    pub async fn create(&self, document: Value, actor: &str) -> SdkResult<PlanRecord> {
        Ok(self.records.create(document, actor).await?)
    }

    pub async fn read(&self, object_id: &str) -> SdkResult<PlanRecord> {
        Ok(self.records.read(object_id).await?)
    }

    pub async fn read_if_changed(
        &self,
        object_id: &str,
        known: Option<&Fingerprint>,
    ) -> SdkResult<ReadOutcome> {
        Ok(self.records.read_if_changed(object_id, known).await?)
    }

    pub async fn list(&self) -> SdkResult<Vec<PlanRecord>> {
        Ok(self.records.list().await?)
    }

    pub async fn replace(
        &self,
        object_id: &str,
        document: Value,
        expected: Option<&Fingerprint>,
        actor: &str,
    ) -> SdkResult<PlanRecord> {
        Ok(self.records.replace(object_id, document, expected, actor).await?)
    }

    pub async fn patch(
        &self,
        object_id: &str,
        partial: Value,
        expected: Option<&Fingerprint>,
        actor: &str,
    ) -> SdkResult<PlanRecord> {
        Ok(self.records.patch(object_id, partial, expected, actor).await?)
    }

    pub async fn delete(&self, id: &str, actor: &str) -> SdkResult<DeleteOutcome> {
        Ok(self.records.delete(id, actor).await?)
    }

    // ---- Index ----

    /// Run a search against the projection. Call [`settle`](Self::settle)
    /// first to observe every preceding write.
    pub async fn search(&self, query: &PlanQuery) -> SdkResult<Vec<IndexNode>> {
        Ok(search(self.index.as_ref(), query).await?)
    }

    pub async fn index_node(&self, object_id: &str) -> SdkResult<Option<IndexNode>> {
        Ok(self.index.get(object_id).await?)
    }

    /// Re-project every stored record, and drop indexed plans that are no
    /// longer stored. Returns how many records were republished.
    pub async fn reindex(&self) -> SdkResult<usize> {
        let republished = self.records.republish_all().await?;

        let stored: BTreeSet<String> = self
            .records
            .list()
            .await?
            .into_iter()
            .map(|r| r.object_id)
            .collect();
        let orphans: BTreeSet<String> = self
            .index
            .all_nodes()
            .await?
            .into_iter()
            .filter(|n| n.is_plan() && !stored.contains(&n.object_id))
            .map(|n| n.object_id)
            .collect();
        for object_id in orphans {
            debug!(object_id = %object_id, "dropping orphaned index entry");
            self.channel.publish(ChangeEvent::Delete { object_id }).await?;
        }
        Ok(republished)
    }

    /// Wait until every published event has been projected or recorded as a
    /// dead letter.
    pub async fn settle(&self) -> SdkResult<()> {
        Ok(self.channel.wait_idle().await?)
    }

    /// Dead letters recorded since the service started.
    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.recorder.records()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// Close the channel, let the workers drain it, and wait for them.
    pub async fn shutdown(self) -> SdkResult<ShutdownReport> {
        self.channel.close();

        let mut report = ShutdownReport::default();
        for handle in self.workers {
            let stats = handle
                .await
                .map_err(|e| SdkError::Internal(format!("projection worker panicked: {e}")))??;
            report.workers.push(stats);
        }
        report.dead_letters_recorded = self
            .recorder_task
            .await
            .map_err(|e| SdkError::Internal(format!("dead-letter recorder panicked: {e}")))??;

        info!(
            workers = report.workers.len(),
            dead_letters = report.dead_letters_recorded,
            "plan service stopped"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for PlanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanService")
            .field("config", &self.config)
            .field("index", &self.index)
            .field("workers", &self.workers.len())
            .finish()
    }
}
