//! Task queue between the orchestrator and the workers.
//!
//! Tasks are delivered at least once. [`LocalTaskQueue`] drops an enqueue
//! whose key is already waiting; once a worker pops a task its key can be
//! enqueued again, so a change arriving mid-task is never lost.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use llm_index_core::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexTask {
    /// (Re)index one document of one collection.
    Document {
        tenant: String,
        collection_id: String,
        document_id: String,
    },
    /// Re-apply the scope of a collection and schedule its missing documents.
    Collection {
        tenant: String,
        collection_id: String,
    },
}

impl IndexTask {
    pub fn document(tenant: &str, collection_id: &str, document_id: &str) -> Self {
        IndexTask::Document {
            tenant: tenant.to_string(),
            collection_id: collection_id.to_string(),
            document_id: document_id.to_string(),
        }
    }

    pub fn collection(tenant: &str, collection_id: &str) -> Self {
        IndexTask::Collection {
            tenant: tenant.to_string(),
            collection_id: collection_id.to_string(),
        }
    }

    /// Deduplication key.
    pub fn key(&self) -> String {
        match self {
            IndexTask::Document {
                tenant,
                collection_id,
                document_id,
            } => format!("doc|{}|{}|{}", tenant, collection_id, document_id),
            IndexTask::Collection {
                tenant,
                collection_id,
            } => format!("sweep|{}|{}", tenant, collection_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IndexTask::Document { .. } => "index-document",
            IndexTask::Collection { .. } => "sweep-collection",
        }
    }

    pub fn tenant(&self) -> &str {
        match self {
            IndexTask::Document { tenant, .. } | IndexTask::Collection { tenant, .. } => tenant,
        }
    }

    pub fn collection_id(&self) -> &str {
        match self {
            IndexTask::Document { collection_id, .. }
            | IndexTask::Collection { collection_id, .. } => collection_id,
        }
    }
}

impl std::fmt::Display for IndexTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexTask::Document {
                collection_id,
                document_id,
                ..
            } => write!(f, "{} {} in {}", self.kind(), document_id, collection_id),
            IndexTask::Collection {
                tenant,
                collection_id,
            } => write!(f, "{} {}:{}", self.kind(), tenant, collection_id),
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedules `task`. Returns `false` when an identical task is already waiting.
    async fn enqueue(&self, task: IndexTask) -> Result<bool>;
}

/// A task as handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// Fresh for every enqueue; kept across retries.
    pub id: Uuid,
    pub task: IndexTask,
    /// 1 on first delivery.
    pub attempt: u32,
}

#[derive(Default)]
struct State {
    tasks: VecDeque<QueuedTask>,
    pending: HashSet<String>,
}

/// In-process FIFO queue.
#[derive(Default)]
pub struct LocalTaskQueue {
    state: Mutex<State>,
}

impl LocalTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, queued: QueuedTask) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.pending.insert(queued.task.key()) {
            return false;
        }
        state.tasks.push_back(queued);
        true
    }

    pub fn try_pop(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = state.tasks.pop_front()?;
        state.pending.remove(&queued.task.key());
        Some(queued)
    }

    /// Puts a failed task back for another attempt.
    pub fn requeue(&self, queued: QueuedTask) -> bool {
        self.push(QueuedTask {
            attempt: queued.attempt + 1,
            ..queued
        })
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: IndexTask) -> Result<bool> {
        Ok(self.push(QueuedTask {
            id: Uuid::new_v4(),
            task,
            attempt: 1,
        }))
    }
}
