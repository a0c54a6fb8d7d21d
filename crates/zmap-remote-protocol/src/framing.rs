//! Two-frame message framing for stream transports.
//!
//! A message is a header frame followed by a body frame. Each frame is a
//! 4-byte big-endian length prefix followed by UTF-8 text:
//!
//! ```text
//! +---------------+-----------+---------------+-----------+
//! | len (4 BE)    |  header   | len (4 BE)    |  body     |
//! +---------------+-----------+---------------+-----------+
//! ```
//!
//! A header frame that is not followed by a body frame is a protocol
//! violation ([`ProtocolError::ShortMessage`]), never a partial success.

use std::io::{Read, Write};

use crate::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::header::MessageHeader;
use crate::message::WireMessage;

const LEN_PREFIX: usize = 4;

/// Encodes a single length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    let len = check_len(payload.len())?;
    let mut buffer = Vec::with_capacity(LEN_PREFIX + payload.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Encodes a message as its header frame followed by its body frame.
pub fn encode_message(message: &WireMessage) -> ProtocolResult<Vec<u8>> {
    let mut buffer = encode_frame(message.header.to_string().as_bytes())?;
    buffer.extend(encode_frame(message.body.as_bytes())?);
    Ok(buffer)
}

fn check_len(len: usize) -> ProtocolResult<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
        _ => Err(ProtocolError::FrameTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        }),
    }
}

/// Looks for a complete frame starting at `offset`.
///
/// Returns the payload range and the offset just past the frame.
fn frame_at(data: &[u8], offset: usize) -> ProtocolResult<Option<(std::ops::Range<usize>, usize)>> {
    let Some(prefix) = data.get(offset..offset + LEN_PREFIX) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let start = offset + LEN_PREFIX;
    let end = start + len as usize;
    if data.len() < end {
        return Ok(None);
    }
    Ok(Some((start..end, end)))
}

fn build_message(header: &[u8], body: &[u8]) -> ProtocolResult<WireMessage> {
    let header = String::from_utf8(header.to_vec())?;
    let body = String::from_utf8(body.to_vec())?;
    Ok(WireMessage::new(MessageHeader::parse(&header)?, body))
}

/// Incremental decoder for bytes arriving from a non-blocking stream.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete message, if both of its frames have arrived.
    pub fn next_message(&mut self) -> ProtocolResult<Option<WireMessage>> {
        let Some((header, after_header)) = frame_at(&self.buffer, 0)? else {
            return Ok(None);
        };
        let Some((body, consumed)) = frame_at(&self.buffer, after_header)? else {
            return Ok(None);
        };
        let message = build_message(&self.buffer[header], &self.buffer[body]);
        self.buffer.drain(..consumed);
        message.map(Some)
    }

    /// Checks the leftover bytes once the stream has reached EOF.
    pub fn finish(&self) -> ProtocolResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match frame_at(&self.buffer, 0)? {
            Some(_) => Err(ProtocolError::ShortMessage),
            None => Err(ProtocolError::IncompleteFrame {
                expected: LEN_PREFIX,
                received: self.buffer.len(),
            }),
        }
    }
}

/// Reads two-frame messages from a blocking byte stream.
pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads one message.
    ///
    /// Returns `Ok(None)` on EOF before any byte of a message. EOF after the
    /// header frame is [`ProtocolError::ShortMessage`].
    pub fn read_message(&mut self) -> ProtocolResult<Option<WireMessage>> {
        let Some(header) = self.read_frame()? else {
            return Ok(None);
        };
        let Some(body) = self.read_frame()? else {
            return Err(ProtocolError::ShortMessage);
        };
        build_message(&header, &body).map(Some)
    }

    fn read_frame(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; LEN_PREFIX];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes two-frame messages to a byte sink.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_message(&mut self, message: &WireMessage) -> ProtocolResult<()> {
        let data = encode_message(message)?;
        self.writer.write_all(&data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
