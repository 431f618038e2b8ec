//! Newline-delimited line codec
//!
//! The wire protocol is one message per line. A single receive may carry a
//! partial line or several complete ones; the decoder buffers across reads
//! and yields exactly one message per newline.
//!
//! # Line length limit
//!
//! `MAX_LINE_LEN` (1024 bytes) is the documented per-message limit inherited
//! from the legacy protocol. A longer line is truncated at that boundary and
//! the remainder up to the next newline is discarded; the truncated prefix
//! is still delivered as a message. A trailing `\r` (CRLF peers) is
//! stripped. An unterminated line at end-of-stream is dropped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Maximum length of a single protocol line, in bytes (newline excluded)
pub const MAX_LINE_LEN: usize = 1024;

/// Codec for newline-delimited protocol lines
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Remainder of a truncated line is being discarded until the next newline
    discarding: bool,
    /// Buffer offset already scanned for a newline
    scanned: usize,
}

impl LineCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            discarding: false,
            scanned: 0,
        }
    }

    fn take_line(&mut self, src: &mut BytesMut, len: usize) -> Result<Option<String>, ProtocolError> {
        let mut line = src.split_to(len);
        line.truncate(line.len().min(MAX_LINE_LEN));
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        match std::str::from_utf8(&line) {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(ProtocolError::InvalidUtf8),
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|pos| pos + self.scanned);

            match newline {
                Some(idx) => {
                    self.scanned = 0;
                    if self.discarding {
                        // Tail of a truncated line; swallow through the newline
                        src.advance(idx + 1);
                        self.discarding = false;
                        continue;
                    }
                    let line = self.take_line(src, idx)?;
                    src.advance(1); // consume the newline
                    return Ok(line);
                }
                None => {
                    if self.discarding {
                        src.clear();
                        self.scanned = 0;
                        return Ok(None);
                    }
                    if src.len() > MAX_LINE_LEN {
                        // Line still streaming past the limit: deliver the
                        // truncated prefix now, discard up to the newline
                        self.discarding = true;
                        self.scanned = 0;
                        return self.take_line(src, MAX_LINE_LEN);
                    }
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                // Unterminated trailing line is dropped
                src.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if line.contains('\n') {
            return Err(ProtocolError::EmbeddedNewline);
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
