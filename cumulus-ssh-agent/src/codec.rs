//! Agent protocol framing and field encoding.
//!
//! On the wire every message is `length:u32_be ‖ payload[length]`, where the
//! first payload byte is the message type.  Payload fields are bytes,
//! big-endian `u32`s, length-prefixed strings and SSH `mpint`s.
//!
//! [`MessageWriter`] assembles fields into an owned buffer and frames them on
//! [`finish`](MessageWriter::finish); [`MessageReader`] walks a payload slice
//! field by field.

use std::io::{self, Read, Write};

use crate::error::{DecodeError, FrameError};

/// Default bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 256 * 1024;

const LEN_PREFIX: usize = 4;

/// One received message: the payload that followed a length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Message type, or `None` for an empty frame.
    pub fn msg_type(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Reader over the fields that follow the type byte.
    pub fn body(&self) -> MessageReader<'_> {
        MessageReader::new(self.payload.get(1..).unwrap_or_default())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Read one length-prefixed frame.
///
/// EOF before the first byte of the frame is [`FrameError::ConnectionClosed`];
/// EOF anywhere after that is [`FrameError::Truncated`].  A declared length
/// above `max_len` is rejected before any payload is read.
pub fn read_message(reader: &mut impl Read, max_len: u32) -> Result<Frame, FrameError> {
    let mut header = [0u8; LEN_PREFIX];
    match fill(reader, &mut header)? {
        0 => return Err(FrameError::ConnectionClosed),
        LEN_PREFIX => {}
        _ => return Err(FrameError::Truncated),
    }

    let len = u32::from_be_bytes(header);
    if len > max_len {
        return Err(FrameError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    if fill(reader, &mut payload)? != payload.len() {
        return Err(FrameError::Truncated);
    }
    Ok(Frame { payload })
}

/// Read until `buf` is full or the reader hits EOF; returns the bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Frame `body` under `msg_type` and send it in one buffer.
pub fn write_message(writer: &mut impl Write, msg_type: u8, body: &[u8]) -> io::Result<()> {
    let mut msg = MessageWriter::message(msg_type);
    msg.put_raw(body);
    write_frame(writer, &msg.finish())
}

/// Send bytes that already carry their length prefix.
pub fn write_frame(writer: &mut impl Write, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame)?;
    writer.flush()
}

/// Builder for a message payload or a bare field sequence (key and
/// signature blobs).
#[derive(Debug, Default, Clone)]
pub struct MessageWriter {
    buf: Vec<u8>,
    framed: bool,
}

impl MessageWriter {
    /// Bare field sequence, no length prefix and no type byte.
    pub fn new() -> Self {
        Self::default()
    }

    /// A message of `msg_type`; [`finish`](Self::finish) prepends the length.
    pub fn message(msg_type: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0u8; LEN_PREFIX]);
        buf.push(msg_type);
        Self { buf, framed: true }
    }

    pub fn put_byte(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_string(&mut self, value: &[u8]) -> &mut Self {
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.put_u32(len);
        self.buf.extend_from_slice(value);
        self
    }

    /// Encode an unsigned big-endian magnitude as an `mpint`.
    ///
    /// Leading zero bytes are stripped, zero becomes the empty string, and a
    /// zero byte is prepended when the high bit is set so the value stays
    /// positive.
    pub fn put_mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let start = magnitude
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(magnitude.len());
        let digits = &magnitude[start..];
        let pad = digits.first().is_some_and(|&b| b & 0x80 != 0);

        let len = u32::try_from(digits.len() + usize::from(pad)).unwrap_or(u32::MAX);
        self.put_u32(len);
        if pad {
            self.buf.push(0);
        }
        self.buf.extend_from_slice(digits);
        self
    }

    /// Append already-encoded fields.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Finished bytes: length-prefixed for messages, as-is for bare fields.
    pub fn finish(mut self) -> Vec<u8> {
        if self.framed {
            let len = u32::try_from(self.buf.len() - LEN_PREFIX).unwrap_or(u32::MAX);
            self.buf[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
        }
        self.buf
    }
}

/// Sequential field reader over a payload slice.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read an `mpint` and return its unsigned magnitude (no sign padding).
    pub fn read_mpint(&mut self) -> Result<&'a [u8], DecodeError> {
        let raw = self.read_string()?;
        match raw.first() {
            Some(&b) if b & 0x80 != 0 => Err(DecodeError::NegativeMpint),
            Some(0) => Ok(&raw[1..]),
            _ => Ok(raw),
        }
    }
}
