//! Decoder for container log output.
//!
//! Containers without a TTY return their logs in Docker's multiplexed
//! framing: every payload is preceded by an 8-byte header
//!
//! ```text
//! [stream:u8][0x00][0x00][0x00][length:u32 big-endian]
//! ```
//!
//! where `stream` is 0 (stdin), 1 (stdout) or 2 (stderr). TTY containers send
//! plain bytes. The first eight bytes of the body decide which of the two the
//! whole response uses, however the transport splits them; that decision is
//! never revisited. A body whose opening bytes already rule out a header is
//! judged raw without waiting for the rest.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use dockwatch_core::{LogChunk, LogStreamKind};

/// Size of a multiplexed frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload length accepted when sniffing the framing (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// How a log response is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Multiplexed,
    Raw,
}

/// Incremental log decoder for one response.
///
/// Feed chunks in arrival order with [`LogDecoder::push`]; frames that span
/// chunk boundaries are reassembled from a carry-over buffer. Call
/// [`LogDecoder::finish`] once the response ends.
#[derive(Debug, Default)]
pub struct LogDecoder {
    framing: Option<Framing>,
    buffer: BytesMut,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framing chosen for this response, `None` until enough bytes arrived.
    pub fn framing(&self) -> Option<Framing> {
        self.framing
    }

    pub fn is_multiplexed(&self) -> bool {
        self.framing == Some(Framing::Multiplexed)
    }

    /// Decode the next chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogChunk> {
        if chunk.is_empty() {
            return Vec::new();
        }

        match self.framing {
            Some(Framing::Raw) => vec![LogChunk::stdout(String::from_utf8_lossy(chunk))],
            Some(Framing::Multiplexed) => {
                self.buffer.extend_from_slice(chunk);
                self.drain_frames()
            }
            None => {
                self.buffer.extend_from_slice(chunk);
                let Some(framing) = sniff(&self.buffer) else {
                    return Vec::new();
                };
                debug!("Log response framing: {:?}", framing);
                self.framing = Some(framing);
                match framing {
                    Framing::Raw => {
                        let pending = self.buffer.split();
                        vec![LogChunk::stdout(String::from_utf8_lossy(&pending))]
                    }
                    Framing::Multiplexed => self.drain_frames(),
                }
            }
        }
    }

    /// Flush whatever is left in the carry-over buffer.
    ///
    /// A truncated final frame yields the payload bytes that did arrive.
    pub fn finish(&mut self) -> Vec<LogChunk> {
        if self.buffer.is_empty() {
            return Vec::new();
        }

        let leftover = self.buffer.split();
        if self.framing.is_none() {
            // Too short to ever hold a header.
            self.framing = Some(Framing::Raw);
            return vec![LogChunk::stdout(String::from_utf8_lossy(&leftover))];
        }
        if leftover.len() < FRAME_HEADER_LEN {
            debug!("Dropping {} bytes of partial frame header", leftover.len());
            return Vec::new();
        }

        let kind = stream_kind(leftover[0]);
        let payload = &leftover[FRAME_HEADER_LEN..];
        match kind {
            Some(kind) if !payload.is_empty() => vec![chunk(kind, payload)],
            _ => Vec::new(),
        }
    }

    fn drain_frames(&mut self) -> Vec<LogChunk> {
        let mut out = Vec::new();

        while self.buffer.len() >= FRAME_HEADER_LEN {
            if !is_frame_header(&self.buffer[..FRAME_HEADER_LEN]) {
                // Lost sync: hand the bytes through as text rather than stall.
                warn!(
                    "Malformed log frame header, passing {} bytes through",
                    self.buffer.len()
                );
                let raw = self.buffer.split();
                out.push(LogChunk::stdout(String::from_utf8_lossy(&raw)));
                break;
            }

            let len = frame_len(&self.buffer) as usize;
            if self.buffer.len() < FRAME_HEADER_LEN + len {
                break;
            }

            let stream = self.buffer[0];
            self.buffer.advance(FRAME_HEADER_LEN);
            let payload = self.buffer.split_to(len);

            // stdin frames carry nothing worth showing.
            if let Some(kind) = stream_kind(stream) {
                if !payload.is_empty() {
                    out.push(chunk(kind, &payload));
                }
            }
        }

        out
    }
}

/// Decide the framing of a response from the start of its body.
pub fn detect_framing(first_chunk: &[u8]) -> Framing {
    if first_chunk.len() >= FRAME_HEADER_LEN && is_frame_header(&first_chunk[..FRAME_HEADER_LEN])
    {
        Framing::Multiplexed
    } else {
        Framing::Raw
    }
}

/// Framing implied by the bytes buffered so far, `None` while a header is
/// still possible but incomplete.
fn sniff(prefix: &[u8]) -> Option<Framing> {
    let bad_stream = prefix.first().is_some_and(|&stream| stream > 2);
    if bad_stream || prefix.iter().skip(1).take(3).any(|&b| b != 0) {
        return Some(Framing::Raw);
    }
    (prefix.len() >= FRAME_HEADER_LEN).then(|| detect_framing(prefix))
}

/// Decode a complete response body in one go.
pub fn decode_all(body: &[u8]) -> Vec<LogChunk> {
    let mut decoder = LogDecoder::new();
    let mut chunks = decoder.push(body);
    chunks.extend(decoder.finish());
    chunks
}

fn is_frame_header(header: &[u8]) -> bool {
    header[0] <= 2 && header[1..4] == [0, 0, 0] && frame_len(header) <= MAX_FRAME_LEN
}

fn frame_len(header: &[u8]) -> u32 {
    u32::from_be_bytes([header[4], header[5], header[6], header[7]])
}

fn stream_kind(byte: u8) -> Option<LogStreamKind> {
    match byte {
        1 => Some(LogStreamKind::Stdout),
        2 => Some(LogStreamKind::Stderr),
        _ => None,
    }
}

fn chunk(kind: LogStreamKind, payload: &[u8]) -> LogChunk {
    LogChunk {
        stream: kind,
        text: String::from_utf8_lossy(payload).into_owned(),
    }
}
