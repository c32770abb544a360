//! Interfaces to the generative model service.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coarse size/quality tier requested from the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Small,
    Medium,
    Large,
}

/// Structured reply produced by a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyContent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Classifies a rendered context into a participation token
/// (`RESPOND`, `IGNORE`, `STOP`, or anything else the model said).
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn decide(&self, context: &str, model_class: ModelClass) -> Result<String>;
}

/// Produces reply content for a rendered context.
///
/// `Ok(None)` means the model yielded nothing usable.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn generate(&self, context: &str, model_class: ModelClass)
        -> Result<Option<ReplyContent>>;
}
