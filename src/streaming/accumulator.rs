use tracing::{debug, warn};

use crate::models::chat::{
    CompletionResult, ContentPart, FinishReason, LogProbSpan, ProgressDelta, RawMessage, Role,
    TokenUsage, ToolCall,
};
use crate::models::responses::{
    ErrorPayload, KnownOutputContent, KnownOutputItem, OutputContent, OutputItem, OutputItemEvent,
    OutputTextDelta, ResponseCompleted, ResponsePayload, SummaryPartDone, SummaryTextDelta,
    WireLogProb,
};
use crate::streaming::sse::SseEvent;

/// What one decoded event produced: zero or more progress deltas, plus the
/// terminal result on the completion event.
#[derive(Debug, Default)]
pub struct StreamUpdate {
    pub deltas: Vec<ProgressDelta>,
    pub result: Option<CompletionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Completed,
}

/// Reconstructs a structured completion from the decoded event stream.
///
/// One instance per request. Processes events one at a time, growing the
/// accumulated text monotonically, and transitions to its terminal state at
/// most once; events arriving after that are dropped.
pub struct CompletionAccumulator {
    request_id: String,
    state: State,
    text: String,
    summary_seen: bool,
}

impl CompletionAccumulator {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            state: State::Streaming,
            text: String::new(),
            summary_seen: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == State::Completed
    }

    /// Text accumulated from `response.output_text.delta` events so far.
    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    pub fn process(&mut self, event: &SseEvent) -> StreamUpdate {
        if self.state == State::Completed {
            debug!(event = %event.event, "Dropping event after terminal state");
            return StreamUpdate::default();
        }

        match event.event.as_str() {
            "error" => self.on_error(&event.data),
            "response.output_text.delta" => self.on_text_delta(&event.data),
            "response.output_item.added" => self.on_item_added(&event.data),
            "response.output_item.done" => self.on_item_done(&event.data),
            "response.reasoning_summary_text.delta" => self.on_summary_delta(&event.data),
            "response.reasoning_summary_part.done" => self.on_summary_part(&event.data),
            "response.completed" => self.on_completed(&event.data),
            // Forward-compatible: anything else is ignored.
            _ => StreamUpdate::default(),
        }
    }

    fn on_error(&mut self, data: &str) -> StreamUpdate {
        let payload: ErrorPayload = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(_) => ErrorPayload {
                code: None,
                message: data.to_string(),
            },
        };

        // Terminal: an error event does not require a later completion.
        self.state = State::Completed;

        StreamUpdate {
            deltas: vec![ProgressDelta::Error {
                code: payload.code,
                message: payload.message,
            }],
            result: None,
        }
    }

    fn on_text_delta(&mut self, data: &str) -> StreamUpdate {
        let payload: OutputTextDelta = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed output_text.delta payload, skipping");
                return StreamUpdate::default();
            }
        };

        let logprobs = map_logprobs(&payload.delta, &payload.logprobs);
        self.text.push_str(&payload.delta);

        StreamUpdate {
            deltas: vec![ProgressDelta::Text {
                text: payload.delta,
                logprobs,
            }],
            result: None,
        }
    }

    fn on_item_added(&mut self, data: &str) -> StreamUpdate {
        let payload: OutputItemEvent = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed output_item.added payload, skipping");
                return StreamUpdate::default();
            }
        };

        if let OutputItem::Known(KnownOutputItem::FunctionCall { name, .. }) = payload.item {
            return StreamUpdate {
                deltas: vec![ProgressDelta::ToolCallStarted { name }],
                result: None,
            };
        }

        StreamUpdate::default()
    }

    fn on_item_done(&mut self, data: &str) -> StreamUpdate {
        let payload: OutputItemEvent = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed output_item.done payload, skipping");
                return StreamUpdate::default();
            }
        };

        match payload.item {
            OutputItem::Known(KnownOutputItem::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            }) => StreamUpdate {
                deltas: vec![ProgressDelta::ToolCallCompleted(ToolCall {
                    id: call_id.or(id).unwrap_or_default(),
                    name,
                    arguments,
                })],
                result: None,
            },
            OutputItem::Known(KnownOutputItem::Reasoning {
                id,
                summary,
                encrypted_content,
            }) => {
                // The full summary rides along only when no incremental
                // summary delta was streamed for this request.
                let summary = if self.summary_seen {
                    None
                } else {
                    summary.map(|parts| {
                        parts
                            .into_iter()
                            .map(|p| p.text)
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                };

                StreamUpdate {
                    deltas: vec![ProgressDelta::Reasoning {
                        id,
                        encrypted_content,
                        summary,
                    }],
                    result: None,
                }
            }
            _ => StreamUpdate::default(),
        }
    }

    fn on_summary_delta(&mut self, data: &str) -> StreamUpdate {
        let payload: SummaryTextDelta = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed reasoning summary delta, skipping");
                return StreamUpdate::default();
            }
        };

        self.summary_seen = true;

        StreamUpdate {
            deltas: vec![ProgressDelta::ReasoningSummary {
                text: payload.delta,
            }],
            result: None,
        }
    }

    fn on_summary_part(&mut self, data: &str) -> StreamUpdate {
        let payload: SummaryPartDone = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed reasoning summary part, skipping");
                return StreamUpdate::default();
            }
        };

        // A completed part that follows incremental deltas would repeat
        // text the caller already saw.
        if self.summary_seen {
            return StreamUpdate::default();
        }
        self.summary_seen = true;

        StreamUpdate {
            deltas: vec![ProgressDelta::ReasoningSummary {
                text: payload.part.text,
            }],
            result: None,
        }
    }

    fn on_completed(&mut self, data: &str) -> StreamUpdate {
        let payload: ResponseCompleted = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed response.completed payload, skipping");
                return StreamUpdate::default();
            }
        };

        self.state = State::Completed;

        let response_id = payload.response.id.clone();
        let result = self.build_result(payload.response);

        StreamUpdate {
            deltas: vec![ProgressDelta::Completed {
                response_id: response_id.clone(),
            }],
            result: Some(result),
        }
    }

    fn build_result(&self, mut response: ResponsePayload) -> CompletionResult {
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut thinking_parts: Vec<ContentPart> = Vec::new();
        let mut image_parts: Vec<ContentPart> = Vec::new();

        for item in std::mem::take(&mut response.output) {
            let OutputItem::Known(item) = item else {
                continue;
            };
            match item {
                KnownOutputItem::Message { content, .. } => {
                    for part in content {
                        match part {
                            OutputContent::Known(KnownOutputContent::OutputText {
                                text: t, ..
                            }) => text.push_str(&t),
                            OutputContent::Known(KnownOutputContent::Refusal { refusal }) => {
                                text.push_str(&refusal)
                            }
                            OutputContent::Unknown(_) => {}
                        }
                    }
                }
                KnownOutputItem::FunctionCall {
                    id,
                    call_id,
                    name,
                    arguments,
                } => tool_calls.push(ToolCall {
                    id: call_id.or(id).unwrap_or_default(),
                    name,
                    arguments,
                }),
                KnownOutputItem::Reasoning {
                    id,
                    encrypted_content,
                    ..
                } => thinking_parts.push(ContentPart::Thinking {
                    id,
                    encrypted_content,
                }),
                KnownOutputItem::ImageGenerationCall { result, .. } => {
                    if let Some(result) = result {
                        image_parts.push(ContentPart::Image {
                            url: format!("data:image/png;base64,{}", result),
                        });
                    }
                }
            }
        }

        let finish_reason = map_finish_reason(&response, !tool_calls.is_empty());

        let mut content = thinking_parts;
        if !text.is_empty() {
            content.push(ContentPart::Text { text });
        }
        content.extend(image_parts);

        let mut message = RawMessage::new(Role::Assistant, content);
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }
        message.response_id = response.id.clone();

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                cached_tokens: u.input_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
                reasoning_tokens: u
                    .output_tokens_details
                    .map(|d| d.reasoning_tokens)
                    .unwrap_or(0),
            })
            .unwrap_or_default();

        CompletionResult {
            finish_reason,
            message,
            usage,
            request_id: self.request_id.clone(),
            response_id: response.id,
        }
    }
}

fn map_finish_reason(response: &ResponsePayload, has_tool_calls: bool) -> FinishReason {
    if let Some(reason) = response
        .incomplete_details
        .as_ref()
        .and_then(|d| d.reason.as_deref())
    {
        return match reason {
            "max_output_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        };
    }

    if has_tool_calls {
        FinishReason::ToolCalls
    } else if response.status.as_deref() == Some("completed") {
        FinishReason::Stop
    } else {
        FinishReason::Other
    }
}

/// Map token-level logprobs back onto byte spans of the delta they
/// annotate. Offsets are clamped so a mismatched tokenization can never
/// produce an out-of-range span.
fn map_logprobs(delta: &str, wire: &[WireLogProb]) -> Vec<LogProbSpan> {
    let mut spans = Vec::with_capacity(wire.len());
    let mut offset = 0usize;

    for lp in wire {
        let start = offset.min(delta.len());
        let end = (offset + lp.token.len()).min(delta.len());
        spans.push(LogProbSpan {
            start,
            end,
            logprob: lp.logprob,
        });
        offset += lp.token.len();
    }

    spans
}
