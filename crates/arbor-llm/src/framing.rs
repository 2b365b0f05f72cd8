//! Incremental record framing for streamed response bodies.
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! sequences and records split across network reads decode correctly.

use bytes::BytesMut;

/// How records are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-Sent Events: `event:`/`data:` lines, records end at a blank line.
    Sse,
    /// One JSON document per line.
    Ndjson,
}

/// One complete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// SSE `event:` name, if the record carried one.
    pub event: Option<String>,
    /// Record payload. Multiple SSE `data:` lines are joined with `\n`.
    pub data: String,
}

impl Frame {
    /// True for the OpenAI-style `[DONE]` sentinel.
    pub fn is_done_marker(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Splits a byte stream into [`Frame`]s.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: BytesMut::new(),
            event: None,
            data: Vec::new(),
        }
    }

    /// Feed a chunk of bytes, returning every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            if let Some(frame) = self.line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the body ends.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let raw = self.buffer.split();
            let line = String::from_utf8_lossy(&raw).into_owned();
            if let Some(frame) = self.line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.take_record() {
            frames.push(frame);
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<Frame> {
        match self.framing {
            Framing::Ndjson => {
                let line = line.trim();
                (!line.is_empty()).then(|| Frame {
                    event: None,
                    data: line.to_string(),
                })
            }
            Framing::Sse => {
                if line.is_empty() {
                    return self.take_record();
                }
                // Comment / keep-alive
                if line.starts_with(':') {
                    return None;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                    None => (line, ""),
                };
                match field {
                    "event" => self.event = Some(value.to_string()),
                    "data" => self.data.push(value.to_string()),
                    _ => {}
                }
                None
            }
        }
    }

    fn take_record(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(Frame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
