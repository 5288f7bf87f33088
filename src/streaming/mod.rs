pub mod accumulator;
pub mod sse;

pub use accumulator::{CompletionAccumulator, StreamUpdate};
pub use sse::{SseEvent, SseParser};
