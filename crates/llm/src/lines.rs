// Byte stream to text stream: split provider responses into lines and let a
// per-provider parser turn each line into a text delta.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};

use crate::error::GenerationError;
use crate::generator::TextStream;

/// What one provider line means.
#[derive(Debug)]
pub(crate) enum LineEvent {
    Text(String),
    Skip,
    Done,
    Error(GenerationError),
}

/// Accumulates raw bytes and hands back complete lines. Bytes are kept until
/// a newline arrives, so multi-byte characters split across reads survive.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            lines.push(line.trim_end_matches('\r').to_owned());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_owned())
    }
}

struct DecodeState<F> {
    bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, GenerationError>> + Send>>,
    lines: LineBuffer,
    queue: VecDeque<Result<String, GenerationError>>,
    parse: F,
    finished: bool,
}

impl<F> DecodeState<F>
where
    F: FnMut(&str) -> LineEvent,
{
    fn handle(&mut self, line: &str) {
        if self.finished || line.trim().is_empty() {
            return;
        }
        match (self.parse)(line) {
            LineEvent::Text(text) if !text.is_empty() => self.queue.push_back(Ok(text)),
            LineEvent::Text(_) | LineEvent::Skip => {}
            LineEvent::Done => self.finished = true,
            LineEvent::Error(err) => {
                self.queue.push_back(Err(err));
                self.finished = true;
            }
        }
    }
}

/// Decode a response body into text deltas with `parse`.
pub(crate) fn decode_text_stream<S, B, F>(body: S, parse: F) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: FnMut(&str) -> LineEvent + Send + 'static,
{
    let bytes = body.map(|chunk| chunk.map(|bytes| bytes.as_ref().to_vec()).map_err(GenerationError::from));
    let state = DecodeState {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        queue: VecDeque::new(),
        parse,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.handle(&line);
                    }
                }
                Some(Err(err)) => {
                    state.queue.push_back(Err(err));
                    state.finished = true;
                }
                None => {
                    if let Some(line) = state.lines.finish() {
                        state.handle(&line);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
