//! Feed a canned upstream transcript through the streaming pipeline and
//! print what the proxy would observe alongside the pass-through bytes.
//!
//! Run with: cargo run --example streaming_demo

use lm_proxy::models::chat::ProgressDelta;
use lm_proxy::streaming::{CompletionAccumulator, SseParser};

const TRANSCRIPT: &[&str] = &[
    "event: response.created\ndata: {\"response\":{\"id\":\"resp_demo\"}}\n\n",
    "event: response.output_item.added\ndata: {\"item\":{\"type\":\"function_call\",\"name\":\"get_weather\"}}\n\n",
    "event: response.output_item.done\ndata: {\"item\":{\"type\":\"function_call\",\"call_id\":\"call_1\",\"name\":\"get_weather\",\"arguments\":\"{\\\"city\\\":\\\"SF\\\"}\"}}\n\n",
    "event: response.output_text.delta\ndata: {\"delta\":\"Looking up the \"}\n\n",
    "event: response.output_text.delta\ndata: {\"delta\":\"weather now.\"}\n\n",
    "event: response.completed\ndata: {\"response\":{\"id\":\"resp_demo\",\"status\":\"completed\",\"output\":[{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"Looking up the weather now.\"}]},{\"type\":\"function_call\",\"call_id\":\"call_1\",\"name\":\"get_weather\",\"arguments\":\"{\\\"city\\\":\\\"SF\\\"}\"}],\"usage\":{\"input_tokens\":21,\"output_tokens\":9}}}\n\n",
];

fn main() {
    let mut parser = SseParser::new();
    let mut accumulator = CompletionAccumulator::new("demo-request".to_string());

    for chunk in TRANSCRIPT {
        println!("--> forwarding {} bytes to the client", chunk.len());

        for event in parser.feed(chunk.as_bytes()) {
            let update = accumulator.process(&event);

            for delta in update.deltas {
                match delta {
                    ProgressDelta::Text { text, .. } => println!("    text delta: {:?}", text),
                    ProgressDelta::ToolCallStarted { name } => {
                        println!("    tool call started: {}", name)
                    }
                    ProgressDelta::ToolCallCompleted(call) => {
                        println!("    tool call completed: {}({})", call.name, call.arguments)
                    }
                    ProgressDelta::Completed { response_id } => {
                        println!("    stream completed: {:?}", response_id)
                    }
                    other => println!("    {:?}", other),
                }
            }

            if let Some(result) = update.result {
                println!();
                println!("Terminal record:");
                println!("  finish reason: {:?}", result.finish_reason);
                println!("  text:          {:?}", result.message.joined_text());
                println!(
                    "  tool calls:    {}",
                    result.message.tool_calls.map(|c| c.len()).unwrap_or(0)
                );
                println!(
                    "  usage:         {} prompt / {} completion tokens",
                    result.usage.prompt_tokens, result.usage.completion_tokens
                );
            }
        }
    }
}
