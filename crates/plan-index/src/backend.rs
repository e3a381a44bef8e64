//! Index storage contract and the in-memory backend.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProjectionError, ProjectionResult};
use crate::node::IndexNode;

/// Storage for projected nodes, grouped by owning plan.
///
/// A plan's subtree is always written and removed as a unit, so readers
/// never observe a mix of two versions of one plan.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Replace every node of `plan_id` with `nodes`.
    async fn replace_plan(&self, plan_id: &str, nodes: Vec<IndexNode>) -> ProjectionResult<()>;

    /// Remove the plan node and all its descendants. Returns whether the
    /// plan was indexed.
    async fn remove_plan(&self, plan_id: &str) -> ProjectionResult<bool>;

    /// Look up a single node by object id.
    async fn get(&self, object_id: &str) -> ProjectionResult<Option<IndexNode>>;

    /// Every node of one plan, plan node first. Empty if not indexed.
    async fn nodes_for_plan(&self, plan_id: &str) -> ProjectionResult<Vec<IndexNode>>;

    /// Every indexed node, grouped by plan in plan id order.
    async fn all_nodes(&self) -> ProjectionResult<Vec<IndexNode>>;
}

/// BTreeMap-backed index keyed by plan id.
#[derive(Default)]
pub struct InMemoryIndex {
    plans: RwLock<BTreeMap<String, Vec<IndexNode>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed plans.
    pub fn plan_count(&self) -> usize {
        self.plans.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Number of indexed nodes across all plans.
    pub fn node_count(&self) -> usize {
        self.plans
            .read()
            .map(|p| p.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read(&self) -> ProjectionResult<RwLockReadGuard<'_, BTreeMap<String, Vec<IndexNode>>>> {
        self.plans
            .read()
            .map_err(|e| ProjectionError::Unavailable(format!("index lock poisoned: {e}")))
    }

    fn write(&self) -> ProjectionResult<RwLockWriteGuard<'_, BTreeMap<String, Vec<IndexNode>>>> {
        self.plans
            .write()
            .map_err(|e| ProjectionError::Unavailable(format!("index lock poisoned: {e}")))
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex")
            .field("plans", &self.plan_count())
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn replace_plan(&self, plan_id: &str, nodes: Vec<IndexNode>) -> ProjectionResult<()> {
        let count = nodes.len();
        let previous = self.write()?.insert(plan_id.to_string(), nodes);
        debug!(
            plan_id,
            nodes = count,
            replaced = previous.map(|p| p.len()).unwrap_or(0),
            "plan subtree replaced"
        );
        Ok(())
    }

    async fn remove_plan(&self, plan_id: &str) -> ProjectionResult<bool> {
        let removed = self.write()?.remove(plan_id);
        debug!(plan_id, removed = removed.is_some(), "plan subtree removed");
        Ok(removed.is_some())
    }

    async fn get(&self, object_id: &str) -> ProjectionResult<Option<IndexNode>> {
        let plans = self.read()?;
        Ok(plans
            .values()
            .flatten()
            .find(|n| n.object_id == object_id)
            .cloned())
    }

    async fn nodes_for_plan(&self, plan_id: &str) -> ProjectionResult<Vec<IndexNode>> {
        Ok(self.read()?.get(plan_id).cloned().unwrap_or_default())
    }

    async fn all_nodes(&self) -> ProjectionResult<Vec<IndexNode>> {
        Ok(self.read()?.values().flatten().cloned().collect())
    }
}
