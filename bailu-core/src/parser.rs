//! Action-Block Parser
//!
//! Extracts structured tool invocations from an assistant message. The
//! message is plain text with zero or more embedded `<action>` blocks;
//! each block holds `<invoke tool="…">` elements whose `<param name="…">`
//! children carry the argument values.
//!
//! The parser never fails: malformed block syntax (unclosed tags) simply
//! yields zero tool calls and the whole input as the visible reply.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::types::ToolCall;

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<action>(.*?)</action>").unwrap());

static INVOKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<invoke\s+tool="([^"]+)"\s*>(.*?)</invoke>"#).unwrap());

// VALUE may contain arbitrary characters including `<` and `>`; the
// closing tag is the only terminator, which non-greedy matching honors.
static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<param\s+name="([^"]+)"\s*>(.*?)</param>"#).unwrap());

// ---------------------------------------------------------------------------
// Parse result
// ---------------------------------------------------------------------------

/// Output of [`parse_assistant_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// The portion of the message the user should see: the original text
    /// with all `<action>` regions removed, whitespace-trimmed.
    pub text: String,
    /// Tool invocations in emission order.
    pub tool_calls: Vec<ToolCall>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split a raw assistant message into its visible reply and tool calls.
pub fn parse_assistant_message(raw: &str) -> ParsedMessage {
    let mut tool_calls = Vec::new();

    for action in ACTION_RE.captures_iter(raw) {
        let body = &action[1];
        for invoke in INVOKE_RE.captures_iter(body) {
            let tool = invoke[1].to_string();
            let mut call = ToolCall::new(&tool);
            for param in PARAM_RE.captures_iter(&invoke[2]) {
                let name = param[1].to_string();
                let value = coerce_value(&param[2]);
                call.params.insert(name, value);
            }
            tool_calls.push(call);
        }
    }

    let text = ACTION_RE.replace_all(raw, "").trim().to_string();

    ParsedMessage { text, tool_calls }
}

/// Coerce an extracted parameter value into a typed JSON value.
///
/// A `<![CDATA[ … ]]>` wrapper is stripped first and its contents kept
/// verbatim. Otherwise the trimmed value is tried as structured data
/// (when it opens with `[` or `{`), then as a boolean literal, then as a
/// finite number; anything else stays a string.
fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();

    if let Some(inner) = strip_cdata(trimmed) {
        return Value::String(inner.to_string());
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return v;
        }
        return Value::String(trimmed.to_string());
    }

    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if !trimmed.is_empty() {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Number(i.into());
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                if let Some(n) = serde_json::Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
        }
    }

    Value::String(trimmed.to_string())
}

fn strip_cdata(s: &str) -> Option<&str> {
    s.strip_prefix("<![CDATA[")?.strip_suffix("]]>")
}

// ---------------------------------------------------------------------------
// Rendering (unparse)
// ---------------------------------------------------------------------------

/// Serialize tool calls back into the textual `<action>` form.
///
/// Used by transport adapters that receive tool calls through a native
/// function-calling channel, so the parser stays the single source of
/// truth for what a tool call looks like.
pub fn render_action_block(calls: &[ToolCall]) -> String {
    if calls.is_empty() {
        return String::new();
    }
    let mut out = String::from("<action>\n");
    for call in calls {
        out.push_str(&format!("<invoke tool=\"{}\">\n", call.tool));
        for (name, value) in &call.params {
            out.push_str(&format!(
                "<param name=\"{}\">{}</param>\n",
                name,
                render_value(value)
            ));
        }
        out.push_str("</invoke>\n");
    }
    out.push_str("</action>");
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
