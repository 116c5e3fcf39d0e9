//! Push-stream framing: one `data: <json>\n\n` frame per event.

use crate::StreamEvent;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("frame payload is not a stream event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode one event as a complete frame.
pub fn encode(event: &StreamEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Incremental decoder for a push-stream body.
///
/// Chunks may split frames (and UTF-8 sequences) anywhere. Line endings may
/// be `\n`, `\r\n` or a bare `\r`. Comment lines (`: keep-alive`) and
/// `event:`/`id:`/`retry:` fields are ignored; frames carrying no `data:` are
/// skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Normalized to `\n` line endings.
    buf: Vec<u8>,
    /// `buf[..scanned]` holds no frame terminator.
    scanned: usize,
    /// The previous chunk ended in `\r`; a leading `\n` belongs to it.
    after_cr: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, FrameError>> {
        self.buf.reserve(chunk.len());
        for &b in chunk {
            match b {
                b'\r' => {
                    self.buf.push(b'\n');
                    self.after_cr = true;
                }
                b'\n' if self.after_cr => self.after_cr = false,
                _ => {
                    self.buf.push(b);
                    self.after_cr = false;
                }
            }
        }

        let mut out = Vec::new();
        loop {
            // A terminator may straddle the previous scan boundary.
            let from = self.scanned.saturating_sub(1);
            let Some(end) = find_frame_end(&self.buf[from..]).map(|i| i + from) else {
                self.scanned = self.buf.len();
                break;
            };
            let frame: Vec<u8> = self.buf.drain(..end + 2).take(end).collect();
            self.scanned = 0;
            match decode_frame(frame) {
                Ok(Some(ev)) => out.push(Ok(ev)),
                Ok(None) => {}
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Bytes buffered for an incomplete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn decode_frame(frame: Vec<u8>) -> Result<Option<StreamEvent>, FrameError> {
    let text = String::from_utf8(frame)?;
    let mut data: Option<String> = None;

    for line in text.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(d) => {
                d.push('\n');
                d.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    match data {
        Some(d) => Ok(Some(serde_json::from_str(&d)?)),
        None => Ok(None),
    }
}
