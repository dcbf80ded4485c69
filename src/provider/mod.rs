//! Provider adapter contract.
//!
//! The core talks to a model-provider backend (e.g. a local inference
//! daemon) through this capability set. The transport itself lives in the
//! host; the services here only depend on the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelCapabilities {
    pub tool_calling: bool,
    pub vision: bool,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    /// Blob size in bytes.
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub family: String,
    pub context_window: u32,
    pub capabilities: ModelCapabilities,
}

/// Progress report forwarded while a model blob downloads.
#[derive(Debug, Clone)]
pub struct PullProgress {
    pub status: String,
    pub completed: u64,
    pub total: u64,
}

/// Detailed model record as returned by the provider's show endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetails {
    pub info: ModelInfo,
    pub parameters: Option<String>,
    pub template: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    async fn pull_model(
        &self,
        name: &str,
        on_progress: &(dyn Fn(PullProgress) + Send + Sync),
    ) -> Result<(), ProviderError>;

    async fn delete_model(&self, name: &str) -> Result<(), ProviderError>;

    async fn show_model(&self, name: &str) -> Result<ModelDetails, ProviderError>;

    async fn keep_model_loaded(&self, name: &str) -> Result<(), ProviderError>;

    async fn unload_model(&self, name: &str) -> Result<(), ProviderError>;
}
