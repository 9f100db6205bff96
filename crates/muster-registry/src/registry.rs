use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use muster_core::ids::{ProjectId, WorkerId};
use muster_core::worker::Worker;

use crate::error::StoreError;
use crate::store::KvStore;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Externalized crew state: the per-project worker directory and the
/// content-addressed tool-result cache, both living in an injected KvStore
/// so they survive the process and are visible to out-of-process observers.
///
/// The underlying store has no native enumeration, so the directory keeps an
/// ordered id list per project as a secondary index; every worker
/// insert/delete keeps the list consistent with the set of live keys.
#[derive(Clone)]
pub struct CrewRegistry {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CrewRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn worker_key(project: &ProjectId, worker_id: &WorkerId) -> String {
        format!("crew:workers:{project}:{worker_id}")
    }

    fn list_key(project: &ProjectId) -> String {
        format!("crew:worker_list:{project}")
    }

    fn cache_key(hash: &str) -> String {
        format!("crew:tool_cache:{hash}")
    }

    // --- Worker directory ---

    /// Register or update a worker record.
    pub fn set_worker(&self, project: &ProjectId, worker: &Worker) -> Result<(), StoreError> {
        let key = Self::worker_key(project, &worker.id);
        self.store
            .set(&key, serde_json::to_value(worker)?, Some(self.ttl))?;

        let list_key = Self::list_key(project);
        let mut ids = self.worker_ids(project)?;
        if !ids.contains(&worker.id) {
            ids.push(worker.id.clone());
            self.store
                .set(&list_key, serde_json::to_value(&ids)?, Some(self.ttl))?;
        }
        Ok(())
    }

    pub fn get_worker(
        &self,
        project: &ProjectId,
        worker_id: &WorkerId,
    ) -> Result<Option<Worker>, StoreError> {
        let key = Self::worker_key(project, worker_id);
        match self.store.get(&key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Remove a worker record, keeping the id list consistent.
    pub fn delete_worker(
        &self,
        project: &ProjectId,
        worker_id: &WorkerId,
    ) -> Result<(), StoreError> {
        self.store.delete(&Self::worker_key(project, worker_id))?;

        let mut ids = self.worker_ids(project)?;
        if let Some(pos) = ids.iter().position(|id| id == worker_id) {
            ids.remove(pos);
            self.store.set(
                &Self::list_key(project),
                serde_json::to_value(&ids)?,
                Some(self.ttl),
            )?;
        }
        Ok(())
    }

    /// The ordered id index for a project. Missing index means no workers.
    pub fn worker_ids(&self, project: &ProjectId) -> Result<Vec<WorkerId>, StoreError> {
        match self.store.get(&Self::list_key(project))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// List all live workers in index order. Records whose keys have
    /// independently expired are skipped.
    pub fn all_workers(&self, project: &ProjectId) -> Result<Vec<Worker>, StoreError> {
        let mut workers = Vec::new();
        for id in self.worker_ids(project)? {
            if let Some(worker) = self.get_worker(project, &id)? {
                workers.push(worker);
            }
        }
        Ok(workers)
    }

    /// Drop every worker record and the id index for a project.
    pub fn clear_project(&self, project: &ProjectId) -> Result<(), StoreError> {
        for id in self.worker_ids(project)? {
            self.store.delete(&Self::worker_key(project, &id))?;
        }
        self.store.delete(&Self::list_key(project))?;
        Ok(())
    }

    // --- Tool-result cache ---

    pub fn cache_tool_result(&self, hash: &str, result: &str) -> Result<(), StoreError> {
        self.store
            .set(&Self::cache_key(hash), Value::String(result.to_string()), Some(self.ttl))
    }

    pub fn get_tool_result(&self, hash: &str) -> Result<Option<String>, StoreError> {
        match self.store.get(&Self::cache_key(hash))? {
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => {
                warn!(value = %other, "non-string tool cache entry — ignoring");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Deterministic digest for a tool call. Arguments are canonicalized
    /// (recursive key sort) so argument order cannot defeat deduplication.
    pub fn tool_hash(agent_role: &str, tool_name: &str, arguments: &Value, context: &str) -> String {
        let args = canonical_json(arguments);
        let raw = format!("{agent_role}|{tool_name}|{args}|{context}");
        let digest = Sha256::digest(raw.as_bytes());
        hex_encode(&digest)
    }
}

/// Serialize JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
