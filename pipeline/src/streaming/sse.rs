use bytes::{Buf, BytesMut};

use crate::error::{PipelineError, Result};

/// Longest line the decoder will hold while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// One dispatched `text/event-stream` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split at arbitrary points; complete lines are consumed and
/// partial lines stay buffered until the next push.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    max_line_bytes: usize,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_bytes,
            event: None,
            data: Vec::new(),
            last_event_id: None,
        }
    }

    /// Feed raw bytes, returning every event completed by them.
    ///
    /// Fails once an unterminated line grows past the line limit; the
    /// buffered bytes are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let mut line = &raw[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_line_bytes {
            let pending = self.buffer.len();
            self.buffer.clear();
            return Err(PipelineError::Connection(format!(
                "event stream line exceeded {} bytes without a terminator ({} pending)",
                self.max_line_bytes, pending
            )));
        }
        Ok(events)
    }

    /// Bytes still waiting for a line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.remaining()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
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
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            // retry and unknown fields carry nothing we act on
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);

        // Named events are dispatched even without data so that a bare `end` still terminates.
        if data.is_empty() && event.is_none() {
            return None;
        }

        Some(SseEvent {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
            id: self.last_event_id.clone(),
        })
    }
}
