//! The seam between dispatch and concrete model clients.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::types::{BackendId, TaskRequest};

/// What a backend receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub request_id: Uuid,
    pub instruction: String,
    #[serde(default)]
    pub label: String,
}

impl BackendRequest {
    pub fn from_task(task: &TaskRequest) -> Self {
        Self {
            request_id: task.id,
            instruction: task.instruction.clone(),
            label: task.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Unprocessed payload returned by a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub content: String,
    /// Model name reported by the provider, if any.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl RawResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// A callable model endpoint.
///
/// Implementations must classify their own failures; the dispatcher only
/// looks at [`BackendError::retry_category`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Model name sent to the provider.
    fn model(&self) -> &str;

    async fn submit(&self, request: &BackendRequest) -> Result<RawResponse, BackendError>;
}

/// Backend implementations keyed by registry id.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BackendId, Arc<dyn Backend>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the adapter for `id`.
    pub fn insert(&mut self, id: impl Into<BackendId>, backend: Arc<dyn Backend>) {
        self.adapters.insert(id.into(), backend);
    }

    pub fn with(mut self, id: impl Into<BackendId>, backend: Arc<dyn Backend>) -> Self {
        self.insert(id, backend);
        self
    }

    pub fn get(&self, id: &BackendId) -> Option<Arc<dyn Backend>> {
        self.adapters.get(id).cloned()
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.adapters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Ids with an adapter, sorted.
    pub fn ids(&self) -> Vec<&BackendId> {
        let mut ids: Vec<&BackendId> = self.adapters.keys().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.ids()
                    .into_iter()
                    .filter_map(|id| self.adapters.get(id).map(|b| (id.as_str(), b.model()))),
            )
            .finish()
    }
}
