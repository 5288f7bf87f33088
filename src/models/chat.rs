use serde::{Deserialize, Serialize};

/// Role of a chat message in the generic internal representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One content part of a generic chat message.
///
/// `Thinking` carries an opaque reasoning payload (continuation id plus
/// encrypted content) that the upstream model emitted; it is round-tripped
/// without interpretation. `Opaque` preserves anything this proxy does not
/// model so collaborators never lose data.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
    Thinking {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
    Opaque { data: serde_json::Value },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// A tool call requested by the assistant. Arguments are the raw JSON
/// string exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Generic internal chat message, the format all non-core collaborators
/// speak.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMessage {
    pub role: Role,

    pub content: Vec<ContentPart>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `Role::Tool` messages: the id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Stateful continuation marker. When present on an assistant message,
    /// the upstream already holds the conversation up to and including that
    /// message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl RawMessage {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            response_id: None,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    pub fn system_text(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    /// Concatenation of all text parts.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Why the upstream stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Token accounting reported by the terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
}

/// Terminal structured result of one streamed completion, produced exactly
/// once per request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub finish_reason: FinishReason,
    pub message: RawMessage,
    pub usage: TokenUsage,
    pub request_id: String,
    /// Continuation marker for a stateful follow-up request.
    pub response_id: Option<String>,
}

/// A non-fatal warning surfaced to the caller without aborting the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    UnsupportedTool,
    MalformedInput,
}

/// A token logprob mapped back onto a byte span of the text delta it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogProbSpan {
    pub start: usize,
    pub end: usize,
    pub logprob: f64,
}

/// Incremental progress emitted by the completion accumulator while a
/// stream is in flight. Used for logging and telemetry only; the bytes the
/// client sees are forwarded separately and untouched.
#[derive(Debug, Clone, Serialize)]
pub enum ProgressDelta {
    Text {
        text: String,
        logprobs: Vec<LogProbSpan>,
    },
    ToolCallStarted {
        name: String,
    },
    ToolCallCompleted(ToolCall),
    Reasoning {
        id: String,
        encrypted_content: Option<String>,
        /// Full summary text, present only when no incremental summary
        /// delta was streamed for this request.
        summary: Option<String>,
    },
    ReasoningSummary {
        text: String,
    },
    Completed {
        response_id: Option<String>,
    },
    Error {
        code: Option<String>,
        message: String,
    },
}

/// Generic completion options accepted alongside the message history.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub max_output_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub logprob_count: Option<u32>,
    pub tool_choice: Option<serde_json::Value>,
    pub tools: Option<Vec<serde_json::Value>>,
}
