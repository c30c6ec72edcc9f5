//! Event-stream decoding for streamed completions.
//!
//! The stream format is line-delimited text where each payload line is
//! `data: <json>` and the stream ends with `data: [DONE]`:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"listDir","arguments":""}}]}}]}
//!
//! data: [DONE]
//! ```
//!
//! [`StreamDecoder`] accepts chunks with arbitrary boundaries (even inside a
//! UTF-8 sequence) and reconstructs one finalized assistant [`Message`].

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::model::{Message, ModelError, ToolCall};

/// Prefix marking a payload line.
pub const DATA_PREFIX: &str = "data:";

/// Payload that terminates the stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// A tool call under construction.
#[derive(Debug, Default)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder state for one streamed response.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes after the last newline seen so far.
    line_buffer: Vec<u8>,
    content: String,
    /// Tool-call fragments keyed by their position in the reply.
    tool_calls: BTreeMap<u32, ToolCallSlot>,
    terminal: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the done marker has been seen.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Feed one chunk. Complete lines are processed immediately; a trailing
    /// partial line is kept for the next chunk. Input after the done marker
    /// is ignored.
    pub fn feed(&mut self, chunk: &[u8], on_delta: &mut impl FnMut(&str)) {
        if self.terminal {
            return;
        }
        self.line_buffer.extend_from_slice(chunk);

        while let Some(pos) = self.line_buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            self.process_line(&line[..pos], on_delta);
            if self.terminal {
                self.line_buffer.clear();
                return;
            }
        }
    }

    /// Finish decoding and build the assistant message.
    ///
    /// A stream that ended without the done marker is finalized the same
    /// way; any unterminated last line is processed first.
    pub fn finish(mut self, on_delta: &mut impl FnMut(&str)) -> Message {
        if !self.terminal && !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            self.process_line(&line, on_delta);
        }
        self.terminal = true;

        let calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|slot| ToolCall::new(slot.id, slot.name, slot.arguments))
            .collect();
        Message::reply(Some(self.content), calls)
    }

    fn process_line(&mut self, raw: &[u8], on_delta: &mut impl FnMut(&str)) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();

        if payload == DONE_MARKER {
            self.terminal = true;
            return;
        }
        if payload.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => self.apply(chunk, on_delta),
            Err(e) => tracing::warn!(error = %e, payload, "skipping malformed stream payload"),
        }
    }

    fn apply(&mut self, chunk: StreamChunk, on_delta: &mut impl FnMut(&str)) {
        let Some(delta) = chunk
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.delta)
        else {
            return;
        };

        if let Some(content) = delta.content
            && !content.is_empty()
        {
            self.content.push_str(&content);
            on_delta(&content);
        }

        for fragment in delta.tool_calls.unwrap_or_default() {
            let slot = self.tool_calls.entry(fragment.index).or_default();

            if let Some(id) = fragment.id
                && slot.id.is_empty()
            {
                slot.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    slot.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    slot.arguments.push_str(&arguments);
                }
            }
        }
    }
}

/// Decode a whole event stream into one assistant message.
///
/// `on_delta` is called synchronously, once per content fragment, in
/// arrival order. A read error aborts decoding with [`ModelError::Stream`].
pub async fn decode_stream<S, B, E>(
    stream: S,
    mut on_delta: impl FnMut(&str),
) -> Result<Message, ModelError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = StreamDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ModelError::Stream(e.to_string()))?;
        decoder.feed(chunk.as_ref(), &mut on_delta);
        if decoder.is_terminal() {
            break;
        }
    }

    Ok(decoder.finish(&mut on_delta))
}
