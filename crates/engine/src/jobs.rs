//! The processor's in-memory job cache and the write path that keeps it in
//! step with the store.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use db::models::{JobRow, NewJob};
use db::{DbResult, Repository};
use nodes::JobOutcome;

/// Jobs of one execution, indexed by id and by node.
///
/// `latest_by_node` points at the most recently *written* job of a node,
/// which is not always the one with the highest id: re-saving an older job
/// (a parent resumed after its branch) makes it the latest again.
#[derive(Debug, Clone, Default)]
pub struct JobCache {
    by_id: BTreeMap<i64, JobRow>,
    latest_by_node: HashMap<i64, i64>,
}

impl JobCache {
    /// Build from stored jobs, oldest first.
    pub fn from_jobs(jobs: impl IntoIterator<Item = JobRow>) -> Self {
        let mut cache = Self::default();
        for job in jobs {
            cache.insert(job);
        }
        cache
    }

    pub fn insert(&mut self, job: JobRow) {
        self.latest_by_node.insert(job.node_id, job.id);
        self.by_id.insert(job.id, job);
    }

    pub fn get(&self, id: i64) -> Option<&JobRow> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All jobs, ordered by id.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &JobRow> {
        self.by_id.values()
    }

    pub fn for_node(&self, node_id: i64) -> Vec<&JobRow> {
        self.by_id.values().filter(|job| job.node_id == node_id).collect()
    }

    pub fn latest(&self, node_id: i64) -> Option<&JobRow> {
        self.latest_by_node.get(&node_id).and_then(|id| self.by_id.get(id))
    }

    /// `node id → result` of every node's latest job, as exposed to
    /// templates.
    pub fn results_by_node(&self) -> Map<String, Value> {
        self.latest_by_node
            .iter()
            .filter_map(|(node_id, job_id)| {
                self.by_id
                    .get(job_id)
                    .map(|job| (node_id.to_string(), job.result.clone()))
            })
            .collect()
    }
}

/// Persist what an instruction produced for `node_id`.
///
/// A new job is linked to `upstream_id`, the job that led to the node.
pub(crate) async fn write_job(
    repo: &dyn Repository,
    execution_id: i64,
    node_id: i64,
    upstream_id: Option<i64>,
    outcome: JobOutcome,
) -> DbResult<JobRow> {
    match outcome {
        JobOutcome::New { status, result } => {
            repo.insert_job(NewJob {
                execution_id,
                node_id,
                upstream_id,
                status,
                result,
            })
            .await
        }
        JobOutcome::Save(job) => repo.save_job(&job).await,
        JobOutcome::Patch { id, patch } => repo.update_job(id, patch).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use db::models::JobStatus;
    use serde_json::json;

    fn job(id: i64, node_id: i64, result: Value) -> JobRow {
        JobRow {
            id,
            execution_id: 1,
            node_id,
            upstream_id: None,
            status: JobStatus::Resolved,
            result,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn latest_follows_write_order() {
        let mut cache = JobCache::from_jobs(vec![job(1, 10, json!("a")), job(2, 10, json!("b"))]);
        assert_eq!(cache.latest(10).map(|j| j.id), Some(2));

        cache.insert(job(1, 10, json!("a2")));
        assert_eq!(cache.latest(10).map(|j| j.id), Some(1));
        assert_eq!(cache.results_by_node().get("10"), Some(&json!("a2")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn for_node_is_ordered_by_id() {
        let cache = JobCache::from_jobs(vec![job(5, 1, json!(null)), job(3, 1, json!(null)), job(4, 2, json!(null))]);
        let ids: Vec<i64> = cache.for_node(1).iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![3, 5]);
    }
}
