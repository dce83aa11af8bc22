//! Incremental SSE parsing for `/generate_stream` responses.
//!
//! Push model: raw byte chunks go in as they arrive off the wire, decoded
//! signals come out. The parser owns the buffer of bytes not yet resolved
//! into complete events; everything before the last `\n\n` boundary has
//! been consumed, so at most one trailing incomplete event is ever held.
//! Because only byte runs ending at an event boundary are decoded, a
//! UTF-8 code point split across chunks simply waits in the buffer.

use serde::Deserialize;
use serde_json::Value;

/// Sentinel the server sends as the final data payload.
const DONE_SENTINEL: &str = "[DONE]";
/// Event delimiter in the SSE framing.
const EVENT_BOUNDARY: &[u8] = b"\n\n";

/// A decoded unit of the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// One content token (may be the empty string).
    Delta(String),
    /// Server-reported error inside a well-formed event.
    Error(String),
    /// Generation finished; nothing follows.
    Done,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    terminated: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminal signal (`[DONE]` or `finish_reason: "stop"`)
    /// has been emitted; later pushes are ignored.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed the next chunk of response bytes, yielding any signals that
    /// became complete. Signals preserve wire order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamSignal> {
        let mut signals = Vec::new();
        if self.terminated {
            return signals;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = find_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..pos + EVENT_BOUNDARY.len()).collect();
            self.parse_event(&event[..pos], &mut signals);
            if self.terminated {
                self.buffer.clear();
                break;
            }
        }
        signals
    }

    /// One complete event: scan its `data:` lines for payloads.
    /// Events with no recognized data lines are silently ignored.
    fn parse_event(&mut self, raw: &[u8], signals: &mut Vec<StreamSignal>) {
        let Ok(text) = std::str::from_utf8(raw) else {
            tracing::warn!("skipping non-UTF-8 stream event ({} bytes)", raw.len());
            return;
        };

        for line in text.split('\n') {
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            let payload = payload.trim();

            if payload == DONE_SENTINEL {
                signals.push(StreamSignal::Done);
                self.terminated = true;
                return;
            }

            let parsed: StreamPayload = match serde_json::from_str(payload) {
                Ok(parsed) => parsed,
                Err(err) => {
                    // One corrupt line must not abort the stream.
                    tracing::warn!("failed to parse stream payload: {err}");
                    continue;
                }
            };

            if let Some(error) = parsed.error {
                signals.push(StreamSignal::Error(error_message(&error)));
                continue;
            }

            if let Some(choice) = parsed.choices.into_iter().next() {
                if let Some(content) = choice.delta.and_then(|delta| delta.content) {
                    signals.push(StreamSignal::Delta(content));
                }
                if choice.finish_reason.as_deref() == Some("stop") {
                    signals.push(StreamSignal::Done);
                    self.terminated = true;
                    return;
                }
            }
        }
    }
}

fn find_boundary(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(EVENT_BOUNDARY.len())
        .position(|window| window == EVENT_BOUNDARY)
}

fn error_message(error: &Value) -> String {
    error
        .as_str()
        .map_or_else(|| error.to_string(), str::to_string)
}
