use crate::config::TuningConfig;
use crate::error::{ProxyError, Result};
use crate::models::chat::{ContentPart, RawMessage, RequestOptions, Role};
use crate::models::responses::{
    InputItem, KnownInputItem, ReasoningParams, ResponsesRequest, TextParams,
};

/// Caption attached to tool-result images: the wire schema has no image
/// slot on `function_call_output`, so images are re-expressed as a
/// follow-up user message.
pub const TOOL_RESULT_IMAGE_CAPTION: &str = "Image returned by the tool call above:";

/// Wire fields requested back from the upstream with every response.
const INCLUDE_FIELDS: &[&str] = &["reasoning.encrypted_content"];

/// Map a generic message history plus completion options into the
/// Responses wire-schema request body.
pub fn build_responses_request(
    model: &str,
    messages: &[RawMessage],
    options: &RequestOptions,
    tuning: &TuningConfig,
) -> Result<ResponsesRequest> {
    // A stateful continuation marker means the upstream already holds the
    // history up to and including that message.
    let (messages, previous_response_id) =
        match messages.iter().rposition(|m| m.response_id.is_some()) {
            Some(idx) => (&messages[idx + 1..], messages[idx].response_id.clone()),
            None => (messages, None),
        };

    let mut input = Vec::new();
    for message in messages {
        convert_message(message, &mut input)?;
    }

    let reasoning = match (tuning.reasoning_effort(), tuning.reasoning_summary()) {
        (None, None) => None,
        (effort, summary) => Some(ReasoningParams { effort, summary }),
    };

    let text = tuning.verbosity().map(|verbosity| TextParams { verbosity });

    Ok(ResponsesRequest {
        model: model.to_string(),
        input,
        tools: options.tools.clone(),
        tool_choice: options.tool_choice.clone(),
        top_p: options.top_p,
        max_output_tokens: options.max_output_tokens,
        top_logprobs: options.logprob_count,
        stream: true,
        truncation: tuning.truncation.clone(),
        reasoning,
        text,
        store: false,
        include: INCLUDE_FIELDS.iter().map(|s| s.to_string()).collect(),
        previous_response_id,
    })
}

fn convert_message(message: &RawMessage, input: &mut Vec<InputItem>) -> Result<()> {
    match message.role {
        Role::System | Role::User => {
            let role = if message.role == Role::System {
                "system"
            } else {
                "user"
            };
            input.push(InputItem::message(
                role,
                convert_input_parts(&message.content),
            ));
        }
        Role::Assistant => {
            // Reasoning items carry their continuation payload ahead of the
            // textual content.
            for part in &message.content {
                if let ContentPart::Thinking {
                    id,
                    encrypted_content,
                } = part
                {
                    input.push(InputItem::Known(KnownInputItem::Reasoning {
                        id: id.clone(),
                        summary: None,
                        encrypted_content: encrypted_content.clone(),
                    }));
                }
            }

            let text = message.joined_text();
            if !text.is_empty() {
                input.push(InputItem::message(
                    "assistant",
                    vec![InputItem::output_text(text)],
                ));
            }

            for call in message.tool_calls.iter().flatten() {
                input.push(InputItem::Known(KnownInputItem::FunctionCall {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }));
            }
        }
        Role::Tool => {
            let call_id = message.tool_call_id.clone().ok_or_else(|| {
                ProxyError::InvalidRequest("Tool message without tool_call_id".to_string())
            })?;

            input.push(InputItem::Known(KnownInputItem::FunctionCallOutput {
                call_id,
                output: message.joined_text(),
            }));

            let images: Vec<InputItem> = message
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Image { url } => Some(InputItem::Known(
                        KnownInputItem::InputImage {
                            image_url: url.clone(),
                        },
                    )),
                    _ => None,
                })
                .collect();

            if !images.is_empty() {
                let mut content = vec![InputItem::input_text(TOOL_RESULT_IMAGE_CAPTION)];
                content.extend(images);
                input.push(InputItem::message("user", content));
            }
        }
    }

    Ok(())
}

fn convert_input_parts(parts: &[ContentPart]) -> Vec<InputItem> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(InputItem::input_text(text.clone())),
            ContentPart::Image { url } => Some(InputItem::Known(KnownInputItem::InputImage {
                image_url: url.clone(),
            })),
            ContentPart::Opaque { data } => Some(InputItem::Raw(data.clone())),
            // Reasoning payloads only occur on assistant messages.
            ContentPart::Thinking { .. } => None,
        })
        .collect()
}
