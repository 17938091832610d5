//! Server-sent event frame reassembly
//!
//! Upstream bodies arrive split at arbitrary byte offsets. [`ChunkReassembler`]
//! buffers partial records between feeds, decodes each `data:` payload and
//! recovers payloads that an intermediary split across two records. Once a
//! `Done`, an `Error` frame or a `MalformedFrame` has been produced, the
//! reassembler yields nothing further.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::forwarder::TERMINAL_MARKER;
use crate::ByteStream;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Delta { text: String },
    Done,
    Error { payload: Value },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame payload {payload:?}: {reason}")]
    MalformedFrame { payload: String, reason: String },
    #[error("stream interrupted: {0}")]
    Transport(String),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, FrameError>> + Send>>;

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for one upstream stream.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffer: Vec<u8>,
    pending_fragment: Option<String>,
    finished: bool,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminal frame or a fatal error has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one raw chunk and return the frames it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamFrame, FrameError>> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..pos], &mut out);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }

        out
    }

    /// Flush the trailing record at end of input.
    pub fn finish(&mut self) -> Vec<Result<StreamFrame, FrameError>> {
        let mut out = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out);
        }

        if let Some(fragment) = self.pending_fragment.take() {
            warn!(fragment = %fragment, "discarding incomplete payload at end of stream");
        }
        self.buffer.clear();
        self.finished = true;
        out
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<Result<StreamFrame, FrameError>>) {
        let line = String::from_utf8_lossy(line);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if line.is_empty() || line.starts_with(':') {
            return;
        }

        let payload = match line.split_once(':') {
            Some(("data", value)) => value.strip_prefix(' ').unwrap_or(value),
            Some(("event" | "id" | "retry", _)) => return,
            // Proxies that break a record sometimes drop the field name on
            // the continuation line.
            _ => {
                debug!(line, "treating bare line as payload");
                line
            }
        };

        if let Some(frame) = self.process_payload(payload) {
            out.push(frame);
        }
    }

    fn process_payload(&mut self, payload: &str) -> Option<Result<StreamFrame, FrameError>> {
        if payload.trim().is_empty() {
            return None;
        }

        if payload.trim() == TERMINAL_MARKER {
            if let Some(fragment) = self.pending_fragment.take() {
                warn!(fragment = %fragment, "discarding incomplete payload before terminal marker");
            }
            self.finished = true;
            return Some(Ok(StreamFrame::Done));
        }

        let (candidate, joined) = match self.pending_fragment.take() {
            Some(mut fragment) => {
                fragment.push_str(payload);
                (fragment, true)
            }
            None => (payload.to_string(), false),
        };

        match serde_json::from_str::<ChunkPayload>(&candidate) {
            Ok(chunk) => self.interpret(chunk),
            Err(err) if joined => {
                self.finished = true;
                Some(Err(FrameError::MalformedFrame {
                    payload: candidate,
                    reason: err.to_string(),
                }))
            }
            Err(err) => {
                debug!(error = %err, "holding undecodable payload for the next record");
                self.pending_fragment = Some(candidate);
                None
            }
        }
    }

    fn interpret(&mut self, chunk: ChunkPayload) -> Option<Result<StreamFrame, FrameError>> {
        if let Some(payload) = chunk.error.filter(|e| !e.is_null()) {
            self.finished = true;
            return Some(Ok(StreamFrame::Error { payload }));
        }

        chunk
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|text| !text.is_empty())
            .map(|text| Ok(StreamFrame::Delta { text }))
    }
}

/// Lazily decode a byte stream into frames.
///
/// A transport error ends the sequence with [`FrameError::Transport`]. The
/// underlying stream is not polled after a terminal frame, and dropping the
/// returned stream drops (and so cancels) the upstream body.
pub fn frames(bytes: ByteStream) -> FrameStream {
    let state = (bytes, ChunkReassembler::new(), VecDeque::new(), false);

    Box::pin(stream::unfold(
        state,
        |(mut bytes, mut reassembler, mut queue, mut input_done)| async move {
            loop {
                if let Some(item) = queue.pop_front() {
                    return Some((item, (bytes, reassembler, queue, input_done)));
                }
                if input_done || reassembler.is_finished() {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => queue.extend(reassembler.feed(&chunk)),
                    Some(Err(err)) => {
                        input_done = true;
                        queue.push_back(Err(FrameError::Transport(err.to_string())));
                    }
                    None => {
                        input_done = true;
                        queue.extend(reassembler.finish());
                    }
                }
            }
        },
    ))
}
