//! Model-completion providers.
//!
//! The engine only depends on [`CompletionProvider`]; `anthropic` is the
//! production client.

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::state::{ToolInvocation, Turn};
use crate::errors::ProviderError;

pub use anthropic::AnthropicProvider;

/// A tool the model may request, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Input to one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    /// Trimmed conversation, excluding the system turn.
    pub turns: &'a [Turn],
    pub tools: &'a [ToolSpec],
}

/// The model's reply: free text plus zero or more tool invocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionReply {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionReply, ProviderError>;
}
