//! AMQP frame codec.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! +------+---------+---------+-------------+-----+
//! | type | channel |  size   |   payload   | end |
//! |  u8  |   u16   |   u32   | size octets | CE  |
//! +------+---------+---------+-------------+-----+
//! ```
//!
//! Decoding works on any `io::Read` (in practice a ring reader) so the
//! reader thread can stop after the header of a body frame and hand the
//! payload to a gate instead of copying it. Encoding appends complete frames
//! to a reusable `BytesMut` that the writer thread flushes in one go.

use crate::protocol::{ClassMethod, FrameType, FRAME_END, FRAME_HEADER_SIZE, FRAME_OVERHEAD, PROTOCOL_HEADER};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hutch_core::error::{HutchError, Result};
use std::io::{self, Read, Write};

/// The fixed 7-octet prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub channel: u16,
    pub size: u32,
}

impl FrameHeader {
    /// Parse the prefix octets.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] for an unknown frame type.
    pub fn parse(raw: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        let frame_type = FrameType::from_u8(raw[0])
            .ok_or_else(|| HutchError::invalid_frame(format!("unknown frame type {}", raw[0])))?;
        Ok(Self {
            frame_type,
            channel: u16::from_be_bytes([raw[1], raw[2]]),
            size: u32::from_be_bytes([raw[3], raw[4], raw[5], raw[6]]),
        })
    }
}

/// A decoded method frame. `args` excludes the class and method ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFrame {
    pub channel: u16,
    pub method: ClassMethod,
    pub args: Bytes,
}

impl MethodFrame {
    /// Split a method payload into ids and arguments.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the payload is shorter than the ids.
    pub fn parse(channel: u16, mut payload: Bytes) -> Result<Self> {
        if payload.len() < 4 {
            return Err(HutchError::invalid_frame(format!(
                "method payload of {} bytes on channel {channel}",
                payload.len()
            )));
        }
        let class_id = payload.get_u16();
        let method_id = payload.get_u16();
        Ok(Self {
            channel,
            method: ClassMethod::new(class_id, method_id),
            args: payload,
        })
    }
}

/// A decoded content header frame.
///
/// Property flags and the property list are kept raw in `properties`;
/// decoding them is left to the message layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHeader {
    pub channel: u16,
    pub class_id: u16,
    pub weight: u16,
    pub body_size: u64,
    pub properties: Bytes,
}

impl ContentHeader {
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the fixed fields are truncated.
    pub fn parse(channel: u16, mut payload: Bytes) -> Result<Self> {
        if payload.len() < 12 {
            return Err(HutchError::invalid_frame(format!(
                "content header of {} bytes on channel {channel}",
                payload.len()
            )));
        }
        Ok(Self {
            channel,
            class_id: payload.get_u16(),
            weight: payload.get_u16(),
            body_size: payload.get_u64(),
            properties: payload,
        })
    }
}

/// A fully buffered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Method(MethodFrame),
    Header(ContentHeader),
    Body { channel: u16, payload: Bytes },
    Heartbeat { channel: u16 },
}

/// Read a frame prefix.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first octet.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] for an unknown type or a stream that ends
/// inside the prefix; I/O errors from `src`.
pub fn read_frame_header<R: Read + ?Sized>(src: &mut R) -> Result<Option<FrameHeader>> {
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < raw.len() {
        match src.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(HutchError::invalid_frame("stream ended inside frame header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    FrameHeader::parse(&raw).map(Some)
}

/// Read exactly `size` payload octets.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] if the stream ends early.
pub fn read_payload<R: Read + ?Sized>(src: &mut R, size: u32) -> Result<Bytes> {
    let mut payload = vec![0u8; size as usize];
    src.read_exact(&mut payload).map_err(truncated)?;
    Ok(Bytes::from(payload))
}

/// Consume and check the frame-end octet.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] if the octet is not `0xCE` or missing.
pub fn read_frame_end<R: Read + ?Sized>(src: &mut R) -> Result<()> {
    let mut end = [0u8; 1];
    src.read_exact(&mut end).map_err(truncated)?;
    if end[0] != FRAME_END {
        return Err(HutchError::invalid_frame(format!(
            "frame end {:#04x}, expected {FRAME_END:#04x}",
            end[0]
        )));
    }
    Ok(())
}

fn truncated(e: io::Error) -> HutchError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        HutchError::invalid_frame("stream ended inside frame")
    } else {
        e.into()
    }
}

/// Read one complete frame, rejecting payloads larger than `frame_max`.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] for any malformed or oversized frame.
pub fn read_frame<R: Read + ?Sized>(src: &mut R, frame_max: u32) -> Result<Option<Frame>> {
    let Some(header) = read_frame_header(src)? else {
        return Ok(None);
    };
    check_size(&header, frame_max)?;
    let payload = read_payload(src, header.size)?;
    read_frame_end(src)?;
    let frame = match header.frame_type {
        FrameType::Method => Frame::Method(MethodFrame::parse(header.channel, payload)?),
        FrameType::Header => Frame::Header(ContentHeader::parse(header.channel, payload)?),
        FrameType::Body => Frame::Body {
            channel: header.channel,
            payload,
        },
        FrameType::Heartbeat => Frame::Heartbeat {
            channel: header.channel,
        },
    };
    Ok(Some(frame))
}

/// Reject a frame whose total size exceeds the negotiated maximum.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] if the frame is too large.
pub fn check_size(header: &FrameHeader, frame_max: u32) -> Result<()> {
    let total = u64::from(header.size) + FRAME_OVERHEAD as u64;
    if total > u64::from(frame_max) {
        return Err(HutchError::invalid_frame(format!(
            "frame of {total} bytes on channel {} exceeds frame-max {frame_max}",
            header.channel
        )));
    }
    Ok(())
}

/// Append a `shortstr` (length octet + bytes).
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] if `value` is longer than 255 bytes.
pub fn put_short_str(dst: &mut BytesMut, value: &str) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| HutchError::invalid_frame(format!("shortstr of {} bytes", value.len())))?;
    dst.put_u8(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

/// Take a `shortstr` off the front of `src`.
///
/// # Errors
///
/// [`HutchError::InvalidFrame`] if truncated or not UTF-8.
pub fn get_short_str(src: &mut Bytes) -> Result<String> {
    if src.is_empty() {
        return Err(HutchError::invalid_frame("missing shortstr length"));
    }
    let len = src.get_u8() as usize;
    if src.len() < len {
        return Err(HutchError::invalid_frame("truncated shortstr"));
    }
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| HutchError::invalid_frame("shortstr is not UTF-8"))
}

/// Encodes frames into a reusable buffer.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    frame_max: u32,
}

impl FrameWriter {
    /// `frame_max` is raised to the smallest size that still fits a payload octet.
    #[must_use]
    pub fn new(frame_max: u32) -> Self {
        let frame_max = frame_max.max(FRAME_OVERHEAD as u32 + 1);
        Self {
            buf: BytesMut::with_capacity(frame_max as usize),
            frame_max,
        }
    }

    #[must_use]
    pub const fn frame_max(&self) -> u32 {
        self.frame_max
    }

    /// Largest payload that fits one frame.
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.frame_max as usize - FRAME_OVERHEAD
    }

    /// Append a method frame.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the arguments do not fit one frame.
    pub fn method(&mut self, channel: u16, method: ClassMethod, args: &[u8]) -> Result<()> {
        let size = 4 + args.len();
        self.check_payload(size)?;
        self.begin(FrameType::Method, channel, size);
        self.buf.put_u16(method.class_id);
        self.buf.put_u16(method.method_id);
        self.buf.put_slice(args);
        self.buf.put_u8(FRAME_END);
        Ok(())
    }

    /// Append a content header frame.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the properties do not fit one frame.
    pub fn content_header(
        &mut self,
        channel: u16,
        class_id: u16,
        body_size: u64,
        properties: &[u8],
    ) -> Result<()> {
        let size = 12 + properties.len();
        self.check_payload(size)?;
        self.begin(FrameType::Header, channel, size);
        self.buf.put_u16(class_id);
        self.buf.put_u16(0);
        self.buf.put_u64(body_size);
        self.buf.put_slice(properties);
        self.buf.put_u8(FRAME_END);
        Ok(())
    }

    /// Append `body` as as many body frames as `frame_max` requires.
    /// An empty body produces no frame.
    pub fn body(&mut self, channel: u16, body: &[u8]) {
        for chunk in body.chunks(self.max_payload()) {
            self.begin(FrameType::Body, channel, chunk.len());
            self.buf.put_slice(chunk);
            self.buf.put_u8(FRAME_END);
        }
    }

    /// Append a heartbeat frame (always channel 0, empty payload).
    pub fn heartbeat(&mut self) {
        self.begin(FrameType::Heartbeat, 0, 0);
        self.buf.put_u8(FRAME_END);
    }

    /// Append the protocol preamble.
    pub fn protocol_header(&mut self) {
        self.buf.put_slice(&PROTOCOL_HEADER);
    }

    fn begin(&mut self, frame_type: FrameType, channel: u16, size: usize) {
        self.buf.reserve(FRAME_OVERHEAD + size);
        self.buf.put_u8(frame_type as u8);
        self.buf.put_u16(channel);
        self.buf.put_u32(size as u32);
    }

    fn check_payload(&self, size: usize) -> Result<()> {
        if size > self.max_payload() {
            return Err(HutchError::invalid_frame(format!(
                "payload of {size} bytes exceeds frame-max {}",
                self.frame_max
            )));
        }
        Ok(())
    }

    /// Encoded bytes not yet flushed.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop anything encoded since the last flush.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the encoded bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Write every pending byte to `dst` and clear the buffer.
    ///
    /// # Errors
    ///
    /// I/O errors from `dst`; the buffer is cleared either way.
    pub fn flush_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<()> {
        let result = dst.write_all(&self.buf);
        self.buf.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_frame_layout() {
        let mut w = FrameWriter::new(4096);
        w.method(3, ClassMethod::QUEUE_DECLARE_OK, &[0xAA, 0xBB]).unwrap();
        assert_eq!(
            w.pending(),
            &[1, 0, 3, 0, 0, 0, 6, 0, 50, 0, 11, 0xAA, 0xBB, 0xCE][..]
        );

        let bytes = w.take();
        let frame = read_frame(&mut &bytes[..], 4096).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Method(MethodFrame {
                channel: 3,
                method: ClassMethod::QUEUE_DECLARE_OK,
                args: Bytes::from_static(&[0xAA, 0xBB]),
            })
        );
    }

    #[test]
    fn body_is_split_by_frame_max() {
        let mut w = FrameWriter::new(4096);
        let body = vec![7u8; 10_000];
        w.body(1, &body);
        let bytes = w.take();
        let mut src = &bytes[..];

        let mut sizes = Vec::new();
        while let Some(frame) = read_frame(&mut src, 4096).unwrap() {
            match frame {
                Frame::Body { channel, payload } => {
                    assert_eq!(channel, 1);
                    sizes.push(payload.len());
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(sizes, vec![4088, 4088, 1824]);
    }

    #[test]
    fn content_header_round_trip() {
        let mut w = FrameWriter::new(4096);
        w.content_header(9, 60, 12_345, &[0x80, 0x00]).unwrap();
        let bytes = w.take();
        let Some(Frame::Header(header)) = read_frame(&mut &bytes[..], 4096).unwrap() else {
            panic!("expected header");
        };
        assert_eq!(header.class_id, 60);
        assert_eq!(header.body_size, 12_345);
        assert_eq!(&header.properties[..], &[0x80, 0x00]);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        // unknown type
        let raw = [9u8, 0, 0, 0, 0, 0, 0, 0xCE];
        assert!(matches!(read_frame(&mut &raw[..], 4096), Err(HutchError::InvalidFrame(_))));

        // bad end octet
        let raw = [8u8, 0, 0, 0, 0, 0, 0, 0x00];
        assert!(matches!(read_frame(&mut &raw[..], 4096), Err(HutchError::InvalidFrame(_))));

        // oversized
        let raw = [3u8, 0, 1, 0, 1, 0, 0];
        assert!(matches!(read_frame(&mut &raw[..], 4096), Err(HutchError::InvalidFrame(_))));

        // truncated header
        let raw = [1u8, 0, 1];
        assert!(matches!(read_frame(&mut &raw[..], 4096), Err(HutchError::InvalidFrame(_))));

        // clean end of stream
        let raw: [u8; 0] = [];
        assert!(read_frame(&mut &raw[..], 4096).unwrap().is_none());
    }

    #[test]
    fn oversized_method_is_refused_by_writer() {
        let mut w = FrameWriter::new(4096);
        let args = vec![0u8; 4096];
        assert!(w.method(1, ClassMethod::BASIC_PUBLISH, &args).is_err());
        assert!(w.is_empty());
    }

    #[test]
    fn short_strings() {
        let mut buf = BytesMut::new();
        put_short_str(&mut buf, "amq.direct").unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(get_short_str(&mut bytes).unwrap(), "amq.direct");
        assert!(bytes.is_empty());
        assert!(put_short_str(&mut BytesMut::new(), &"x".repeat(256)).is_err());
    }
}
