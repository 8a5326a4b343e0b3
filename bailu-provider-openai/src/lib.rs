//! OpenAI-Compatible Chat Transport
//!
//! Implements `ChatTransport` against any OpenAI-compatible
//! chat-completions endpoint. Streams SSE chunks, applies
//! retry-with-backoff to the initial connection, and converts native
//! `tool_calls` responses into the textual `<action>` form so the
//! core parser stays the single source of truth.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use bailu_core::parser::render_action_block;
use bailu_core::retry::{classify_http_error, with_retry, RetryPolicy};
use bailu_core::transport::{ChatTransport, ChunkStream, TransportError};
use bailu_core::types::{Message, Role, ToolCall, ToolDefinition};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct OpenAiTransport {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiTransport {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Convert core messages and tool definitions into request JSON.
    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    // Tool feedback travels as ordinary user text; the
                    // conversation tags results inside the content.
                    Role::Tool => "user",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": api_messages,
            "stream": stream,
        });

        if let Some(tools) = tools {
            if !tools.is_empty() {
                let api_tools: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters_schema(),
                            }
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!(api_tools);
            }
        }

        body
    }

    /// POST with retry on transient failures. 4xx other than 429
    /// propagates immediately.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        with_retry(
            &self.retry,
            "chat_completions",
            |e: &TransportError| e.kind.clone(),
            || async {
                let response = self
                    .client
                    .post(url)
                    .bearer_auth(&self.api_key)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| TransportError::network(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let text = response.text().await.unwrap_or_default();
                    let kind = classify_http_error(status.as_u16(), retry_after.as_deref());
                    return Err(TransportError::new(
                        kind,
                        format!("HTTP {}: {}", status.as_u16(), text),
                    ));
                }
                Ok(response)
            },
        )
        .await
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream> {
        let body = self.build_request_body(messages, tools, true);
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, "opening chat stream");

        let response = self.post_with_retry(&url, &body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(32);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut line_buffer = String::new();
            let mut accumulator = TurnAccumulator::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::anyhow!("error reading stream: {}", e)))
                            .await;
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = line_buffer.find('\n') {
                    let line = line_buffer[..pos].trim_end_matches('\r').to_string();
                    line_buffer.drain(..pos + 1);

                    let Some(payload) = sse_data(&line) else { continue };
                    if payload == "[DONE]" {
                        break;
                    }
                    match accumulator.feed(payload) {
                        Some(text) if !text.is_empty() => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }

            // Native tool calls become a trailing action block.
            let calls = accumulator.finish();
            if !calls.is_empty() {
                let block = format!("\n{}", render_action_block(&calls));
                let _ = tx.send(Ok(block)).await;
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<String> {
        let body = self.build_request_body(messages, tools, false);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self.post_with_retry(&url, &body).await?;
        let parsed: serde_json::Value = response
            .json()
            .await
            .context("failed to parse chat response")?;

        let message = &parsed["choices"][0]["message"];
        let mut text = message["content"].as_str().unwrap_or_default().to_string();

        if let Some(raw_calls) = message["tool_calls"].as_array() {
            let calls: Vec<ToolCall> = raw_calls
                .iter()
                .filter_map(parse_complete_tool_call)
                .collect();
            if !calls.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&render_action_block(&calls));
            }
        }

        Ok(text)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to list models")?;

        if !response.status().is_success() {
            anyhow::bail!("models endpoint returned HTTP {}", response.status().as_u16());
        }

        let parsed: serde_json::Value = response.json().await?;
        let mut names: Vec<String> = parsed["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn current_model_name(&self) -> String {
        self.model.clone()
    }
}

// ---------------------------------------------------------------------------
// SSE plumbing
// ---------------------------------------------------------------------------

/// Extract the payload of a `data:` SSE line.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|rest| rest.trim_start())
}

/// Accumulates one streamed turn: text deltas pass through, native
/// tool-call deltas build up until the stream ends.
struct TurnAccumulator {
    /// index → (id, name, partial arguments JSON)
    tool_calls: BTreeMap<u64, (String, String, String)>,
}

impl TurnAccumulator {
    fn new() -> Self {
        Self {
            tool_calls: BTreeMap::new(),
        }
    }

    /// Feed one SSE payload; returns any text delta to forward.
    fn feed(&mut self, payload: &str) -> Option<String> {
        let parsed: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "skipping unparsable SSE payload");
                return None;
            }
        };
        let delta = &parsed["choices"][0]["delta"];

        if let Some(deltas) = delta["tool_calls"].as_array() {
            for tc in deltas {
                let index = tc["index"].as_u64().unwrap_or(0);
                let entry = self
                    .tool_calls
                    .entry(index)
                    .or_insert_with(|| (String::new(), String::new(), String::new()));
                if let Some(id) = tc["id"].as_str() {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    entry.1.push_str(name);
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.2.push_str(args);
                }
            }
        }

        delta["content"].as_str().map(|s| s.to_string())
    }

    /// Completed tool calls, in index order.
    fn finish(self) -> Vec<ToolCall> {
        self.tool_calls
            .into_values()
            .filter_map(|(_, name, arguments)| {
                if name.is_empty() {
                    return None;
                }
                let mut call = ToolCall::new(&name);
                if !arguments.trim().is_empty() {
                    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(
                        &arguments,
                    ) {
                        Ok(params) => call.params = params,
                        Err(e) => {
                            warn!(tool = %name, err = %e, "tool-call arguments were not valid JSON");
                            return None;
                        }
                    }
                }
                Some(call)
            })
            .collect()
    }
}

/// Parse a complete (non-streamed) tool call object.
fn parse_complete_tool_call(raw: &serde_json::Value) -> Option<ToolCall> {
    let name = raw["function"]["name"].as_str()?;
    let mut call = ToolCall::new(name);
    if let Some(args) = raw["function"]["arguments"].as_str() {
        if !args.trim().is_empty() {
            call.params = serde_json::from_str(args).ok()?;
        }
    }
    Some(call)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bailu_core::parser::parse_assistant_message;
    use bailu_core::types::{ParamType, ToolParameter};

    fn transport() -> OpenAiTransport {
        OpenAiTransport::new("sk-test", "gpt-4o-mini", "https://api.openai.com/")
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(transport().base_url, "https://api.openai.com");
    }

    #[test]
    fn request_body_maps_roles() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::new(Role::Tool, "result"),
        ];
        let body = transport().build_request_body(&messages, None, true);

        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["stream"], serde_json::json!(true));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn request_body_advertises_tools() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: vec![ToolParameter::required("path", ParamType::String, "Path")],
            safe: true,
        }];
        let body = transport().build_request_body(&[Message::user("x")], Some(&tools), false);

        let function = &body["tools"][0]["function"];
        assert_eq!(function["name"], "read_file");
        assert_eq!(function["parameters"]["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn sse_data_extraction() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: message"), None);
    }

    #[test]
    fn accumulator_passes_text_deltas() {
        let mut acc = TurnAccumulator::new();
        let text = acc.feed(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert_eq!(text.as_deref(), Some("hel"));
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn accumulator_builds_tool_calls_from_deltas() {
        let mut acc = TurnAccumulator::new();
        acc.feed(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":""}}]}}]}"#,
        );
        acc.feed(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]}}]}"#,
        );
        acc.feed(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\": \"a.txt\"}"}}]}}]}"#,
        );

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "read_file");
        assert_eq!(calls[0].str_param("path"), Some("a.txt"));
    }

    #[test]
    fn native_tool_calls_round_trip_through_parser() {
        let mut acc = TurnAccumulator::new();
        acc.feed(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"run_command","arguments":"{\"command\": \"ls\"}"}}]}}]}"#,
        );
        let rendered = render_action_block(&acc.finish());

        let parsed = parse_assistant_message(&rendered);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].tool, "run_command");
        assert_eq!(parsed.tool_calls[0].str_param("command"), Some("ls"));
    }

    #[test]
    fn accumulator_drops_malformed_arguments() {
        let mut acc = TurnAccumulator::new();
        acc.feed(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"bad","arguments":"{not json"}}]}}]}"#,
        );
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn complete_tool_call_parses() {
        let raw = serde_json::json!({
            "id": "c9",
            "function": { "name": "write_file", "arguments": "{\"path\": \"x\", \"content\": \"y\"}" }
        });
        let call = parse_complete_tool_call(&raw).unwrap();
        assert_eq!(call.tool, "write_file");
        assert_eq!(call.str_param("content"), Some("y"));
    }
}
