use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{CompletionProvider, CompletionReply, CompletionRequest, ToolSpec};
use crate::agent::state::{Role, ToolInvocation, Turn};
use crate::errors::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Build from `ANTHROPIC_API_KEY` (and optional `ANTHROPIC_BASE_URL`).
    pub fn from_env() -> Result<Self, ProviderError> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;
        let mut provider = Self::new(key)?;
        if let Ok(base) = std::env::var("ANTHROPIC_BASE_URL") {
            provider.base_url = base.trim_end_matches('/').to_string();
        }
        Ok(provider)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionReply, ProviderError> {
        let body = MessagesBody {
            model: request.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: request.system_prompt,
            messages: to_messages(request.turns),
            tools: request.tools.iter().map(tool_schema).collect(),
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        parse_reply(&value)
    }
}

fn tool_schema(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "input_schema": spec.parameters,
    })
}

/// Convert conversation turns to Messages API messages.
///
/// Consecutive same-role turns are merged, leading tool results whose
/// `tool_use` fell outside the trimmed window are dropped, and the list
/// always starts with a user message.
pub(crate) fn to_messages(turns: &[Turn]) -> Vec<Value> {
    let mut messages: Vec<(&'static str, Vec<Value>)> = Vec::new();

    let start = turns
        .iter()
        .position(|t| t.role != Role::Tool)
        .unwrap_or(turns.len());

    for turn in &turns[start..] {
        let (role, blocks): (&'static str, Vec<Value>) = match turn.role {
            // system text travels in the top-level `system` field
            Role::System => continue,
            Role::User => ("user", text_block(&turn.content).into_iter().collect()),
            // a tool result turn answers the tool_use of the preceding assistant turn
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": turn.tool_call_id.clone().unwrap_or_default(),
                    "content": turn.content,
                    "is_error": turn.is_error,
                })],
            ),
            Role::Assistant => {
                let mut blocks: Vec<Value> = text_block(&turn.content).into_iter().collect();
                blocks.extend(turn.tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": if call.args.is_object() { call.args.clone() } else { json!({}) },
                    })
                }));
                ("assistant", blocks)
            }
        };
        if blocks.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => messages.push((role, blocks)),
        }
    }

    if messages.first().is_none_or(|(role, _)| *role != "user") {
        messages.insert(0, ("user", vec![json!({"type": "text", "text": "Begin."})]));
    }

    messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn text_block(text: &str) -> Option<Value> {
    (!text.trim().is_empty()).then(|| json!({ "type": "text", "text": text }))
}

pub(crate) fn parse_reply(value: &Value) -> Result<CompletionReply, ProviderError> {
    let blocks = value
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("response has no content array".into()))?;

    let mut reply = CompletionReply::default();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !reply.content.is_empty() {
                        reply.content.push('\n');
                    }
                    reply.content.push_str(text);
                }
            }
            Some("tool_use") => reply.tool_calls.push(ToolInvocation {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                args: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            _ => {}
        }
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::ToolOutcome;

    #[test]
    fn test_to_messages_skips_system_and_merges_tool_results() {
        let call = ToolInvocation {
            id: "toolu_1".into(),
            name: "file_list".into(),
            args: json!({"path": "."}),
        };
        let turns = vec![
            Turn::system("sys"),
            Turn::user("Begin working."),
            Turn::assistant("Looking around", vec![call]),
            Turn::tool_result(&ToolOutcome {
                tool_call_id: "toolu_1".into(),
                name: "file_list".into(),
                content: "src/".into(),
                error: false,
            }),
            Turn::user("[Iteration 1/5] Goal status: NOT YET ACHIEVED."),
        ];
        let msgs = to_messages(&turns);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[1]["role"], "assistant");
        assert_eq!(msgs[1]["content"][1]["type"], "tool_use");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"][0]["type"], "tool_result");
        assert_eq!(msgs[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(msgs[2]["content"][1]["type"], "text");
    }

    #[test]
    fn test_to_messages_drops_orphaned_leading_tool_results() {
        let turns = vec![
            Turn::tool_result(&ToolOutcome {
                tool_call_id: "gone".into(),
                name: "bash_exec".into(),
                content: "ok".into(),
                error: false,
            }),
            Turn::assistant("next", vec![]),
        ];
        let msgs = to_messages(&turns);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"][0]["text"], "Begin.");
        assert_eq!(msgs[1]["role"], "assistant");
    }

    #[test]
    fn test_to_messages_empty_gets_kickoff() {
        let msgs = to_messages(&[]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn test_parse_reply_extracts_tool_calls() {
        let value = json!({
            "content": [
                {"type": "text", "text": "I'll run the tests."},
                {"type": "tool_use", "id": "toolu_9", "name": "bash_exec", "input": {"command": "pytest"}}
            ],
            "stop_reason": "tool_use"
        });
        let reply = parse_reply(&value).unwrap();
        assert_eq!(reply.content, "I'll run the tests.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "toolu_9");
        assert_eq!(reply.tool_calls[0].args["command"], "pytest");
    }

    #[test]
    fn test_parse_reply_rejects_missing_content() {
        let err = parse_reply(&json!({"type": "error"})).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
