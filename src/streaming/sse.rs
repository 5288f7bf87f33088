use bytes::{Buf, BytesMut};

/// One decoded Server-Sent-Events frame. The data payload is opaque text;
/// no JSON decoding happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Stateful incremental parser for a `text/event-stream` byte stream.
///
/// Chunks fed in never need to align with frame boundaries: a trailing
/// partial frame is buffered across calls, and a single chunk containing
/// several complete frames yields them all, in arrival order.
pub struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((frame_end, delim_len)) = self.find_frame_end() {
            let frame = self.buffer.split_to(frame_end);
            self.buffer.advance(delim_len);

            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }

        events
    }

    /// Bytes held back waiting for a frame terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Locate the first blank-line frame terminator, tolerating both LF and
    /// CRLF line endings. Returns (frame length, terminator length).
    fn find_frame_end(&self) -> Option<(usize, usize)> {
        let buf = &self.buffer[..];
        let mut i = 0;
        while i < buf.len() {
            if buf[i] == b'\n' {
                if buf[i + 1..].first() == Some(&b'\n') {
                    return Some((i, 2));
                }
                if buf[i + 1..].starts_with(b"\r\n") {
                    return Some((i, 3));
                }
            }
            i += 1;
        }
        None
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one complete frame. Comment lines and unknown fields are
/// ignored; multiple `data:` lines join with newlines per the SSE spec.
fn parse_frame(frame: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(frame);

    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event_type.is_none() && data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event_type.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
    })
}
