//! Typed views over the free-form `data` of an [`AgentSignal`].
//!
//! Agents emit camelCase payloads, but older emitters use snake_case or
//! alternate names (`input` for `args`, `thinking` for `reasoning`). Before
//! parsing, each field is resolved from its spellings (first non-null wins)
//! and null entries are dropped, so a payload carrying two spellings of the
//! same field or an explicit `null` still parses. A payload that does not
//! parse after that is dropped by the caller.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::bus::AgentSignal;
use crate::trajectory::TokenUsage;

/// Canonical field name and its alternate spellings, in priority order.
pub type FieldSpellings = (&'static str, &'static [&'static str]);

/// A signal payload that can be parsed from normalized JSON.
pub trait SignalData: DeserializeOwned {
    const FIELDS: &'static [FieldSpellings];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSignal {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub error: Option<Value>,
}

impl SignalData for ToolSignal {
    const FIELDS: &'static [FieldSpellings] = &[
        ("name", &["toolName", "tool_name"]),
        ("toolCallId", &["tool_call_id", "callId", "id"]),
        ("args", &["input"]),
        ("result", &["output"]),
        ("isError", &["is_error"]),
    ];
}

impl ToolSignal {
    pub fn tool_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }

    /// Span key: the call id when present, otherwise the tool name.
    pub fn span_key(&self) -> Option<String> {
        self.tool_call_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.tool_name().map(str::to_string))
    }

    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(Value::Object(map.clone()).to_string())),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSignal {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_read: Option<u64>,
    #[serde(default)]
    pub cache_write: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl SignalData for UsageSignal {
    const FIELDS: &'static [FieldSpellings] = &[
        ("input", &["inputTokens", "input_tokens", "promptTokens"]),
        ("output", &["outputTokens", "output_tokens", "completionTokens"]),
        ("cacheRead", &["cacheReadTokens", "cache_read"]),
        ("cacheWrite", &["cacheWriteTokens", "cache_write"]),
        ("total", &["totalTokens", "total_tokens"]),
    ];
}

impl From<UsageSignal> for TokenUsage {
    fn from(usage: UsageSignal) -> Self {
        Self {
            input_tokens: usage.input,
            output_tokens: usage.output,
            cache_read_tokens: usage.cache_read,
            cache_write_tokens: usage.cache_write,
            total_tokens: usage.total,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSignal {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Raw usage object, normalized on demand by [`Self::billable_usage`].
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl SignalData for AssistantSignal {
    const FIELDS: &'static [FieldSpellings] = &[("reasoning", &["thinking"])];
}

impl AssistantSignal {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref().filter(|text| !text.trim().is_empty())
    }

    /// Usage with at least one nonzero input/output count.
    pub fn billable_usage(&self) -> Option<TokenUsage> {
        let usage: UsageSignal = parse_value(self.usage.as_ref()?).ok()?;
        let usage: TokenUsage = usage.into();
        (!usage.is_empty()).then_some(usage)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LifecycleSignal {
    #[serde(default)]
    pub phase: String,
}

impl SignalData for LifecycleSignal {
    const FIELDS: &'static [FieldSpellings] = &[];
}

/// Parse a signal's data into `T`, or `None` when it does not fit.
pub fn parse_data<T: SignalData>(signal: &AgentSignal) -> Option<T> {
    match parse_value(&signal.data) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            tracing::trace!(
                "ignoring malformed {:?} signal for run {}: {error}",
                signal.stream,
                signal.run_id
            );
            None
        }
    }
}

fn parse_value<T: SignalData>(value: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(normalize(value, T::FIELDS))
}

/// Collapse alternate spellings onto their canonical name and drop nulls.
fn normalize(value: &Value, fields: &[FieldSpellings]) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };

    let is_spelling = |key: &str| {
        fields
            .iter()
            .any(|(canonical, aliases)| *canonical == key || aliases.contains(&key))
    };

    let mut normalized: Map<String, Value> = map
        .iter()
        .filter(|(key, value)| !value.is_null() && !is_spelling(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (canonical, aliases) in fields {
        let resolved = std::iter::once(*canonical)
            .chain(aliases.iter().copied())
            .filter_map(|key| map.get(key))
            .find(|value| !value.is_null());
        if let Some(value) = resolved {
            normalized.insert(canonical.to_string(), value.clone());
        }
    }

    Value::Object(normalized)
}
