use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool types starting with this prefix are server-side search tools the
/// upstream cannot execute through this proxy; they are filtered out of
/// requests with a warning notice.
pub const WEB_SEARCH_TOOL_PREFIX: &str = "web_search";

/// Request body as received from the proxy client.
///
/// Only the fields the handler inspects are typed; everything else is
/// captured in `extra` and forwarded to the upstream untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub input: InputPayload,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ClientRequest {
    /// Whether the triggering input item was authored by the user: a plain
    /// string input, or a structured item whose role is `user`.
    pub fn is_user_initiated(&self) -> bool {
        match &self.input {
            InputPayload::Text(_) => true,
            InputPayload::Items(items) => items
                .last()
                .and_then(|item| item.get("role"))
                .and_then(Value::as_str)
                .is_some_and(|role| role == "user"),
        }
    }
}

/// The `input` field accepts either a bare prompt string or a list of
/// structured items.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputPayload {
    Text(String),
    Items(Vec<Value>),
}

/// A tool definition in the wire schema. Only the discriminator is typed;
/// the rest passes through.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Outbound request body built by the request-direction translator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponsesRequest {
    pub model: String,

    pub input: Vec<InputItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,

    pub stream: bool,

    pub truncation: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParams>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextParams>,

    pub store: bool,

    pub include: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReasoningParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextParams {
    pub verbosity: String,
}

/// A structured item in the `input` array.
///
/// The `Raw` variant carries opaque content parts and any item shape this
/// proxy does not model, so translation never drops collaborator data.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputItem {
    Known(KnownInputItem),
    Raw(Value),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownInputItem {
    Message {
        role: String,
        content: Vec<InputItem>,
    },
    InputText {
        text: String,
    },
    InputImage {
        image_url: String,
    },
    OutputText {
        text: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    Reasoning {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<Vec<SummaryPart>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
}

impl InputItem {
    pub fn message(role: &str, content: Vec<InputItem>) -> Self {
        InputItem::Known(KnownInputItem::Message {
            role: role.to_string(),
            content,
        })
    }

    pub fn input_text(text: impl Into<String>) -> Self {
        InputItem::Known(KnownInputItem::InputText { text: text.into() })
    }

    pub fn output_text(text: impl Into<String>) -> Self {
        InputItem::Known(KnownInputItem::OutputText { text: text.into() })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SummaryPart {
    pub text: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An output item carried by `response.output_item.*` events and the
/// terminal `response.completed` payload. Unknown item types fall into
/// `Unknown` and are ignored, keeping the accumulator forward-compatible.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OutputItem {
    Known(KnownOutputItem),
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownOutputItem {
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        content: Vec<OutputContent>,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<Vec<SummaryPart>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
    ImageGenerationCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Base64-encoded image payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OutputContent {
    Known(KnownOutputContent),
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownOutputContent {
    OutputText {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        logprobs: Option<Vec<WireLogProb>>,
    },
    Refusal {
        refusal: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireLogProb {
    #[serde(default)]
    pub token: String,
    pub logprob: f64,
}

/// Payload of a `response.output_text.delta` event.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputTextDelta {
    pub delta: String,

    #[serde(default)]
    pub logprobs: Vec<WireLogProb>,
}

/// Payload of `response.output_item.added` / `response.output_item.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputItemEvent {
    pub item: OutputItem,
}

/// Payload of a `response.reasoning_summary_text.delta` event.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryTextDelta {
    pub delta: String,
}

/// Payload of a `response.reasoning_summary_part.done` event.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryPartDone {
    pub part: SummaryPart,
}

/// Payload of the terminal `response.completed` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseCompleted {
    pub response: ResponsePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,

    #[serde(default)]
    pub output: Vec<OutputItem>,

    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,

    #[serde(default)]
    pub output_tokens: u64,

    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,

    #[serde(default)]
    pub output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: String,
}
