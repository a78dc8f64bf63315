//! Scripted broker on the far end of a socket pair.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use hutch_amqp::frame::{read_frame, Frame, FrameWriter, MethodFrame};
use hutch_amqp::protocol::{class, ClassMethod, PROTOCOL_HEADER};
use hutch_amqp::{CloseArgs, Connection};
use hutch_core::options::ConnectionOptions;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub const FRAME_MAX: u32 = 16 * 1024;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn options() -> ConnectionOptions {
    ConnectionOptions::new()
        .with_ring_capacity(64 * 1024)
        .with_frame_max(FRAME_MAX)
        .with_close_drain_timeout(Duration::from_secs(1))
        .with_protocol_header(false)
}

/// Start a connection over a socket pair and return both ends.
pub fn connect(options: ConnectionOptions) -> (Connection, FakeServer) {
    let (client, server) = UnixStream::pair().unwrap();
    server.set_read_timeout(Some(WAIT)).unwrap();
    let conn = Connection::start(client, options).unwrap();
    (conn, FakeServer::new(server))
}

pub struct FakeServer {
    stream: UnixStream,
}

impl FakeServer {
    fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn expect_protocol_header(&mut self) {
        let mut raw = [0u8; 8];
        self.stream.read_exact(&mut raw).unwrap();
        assert_eq!(raw, PROTOCOL_HEADER);
    }

    pub fn next_frame(&mut self) -> Frame {
        read_frame(&mut self.stream, FRAME_MAX)
            .unwrap()
            .expect("client closed the socket")
    }

    /// Next method frame, skipping heartbeats.
    pub fn next_method(&mut self) -> MethodFrame {
        loop {
            match self.next_frame() {
                Frame::Method(frame) => return frame,
                Frame::Heartbeat { .. } => {}
                other => panic!("expected a method frame, got {other:?}"),
            }
        }
    }

    pub fn expect_method(&mut self, channel: u16, method: ClassMethod) -> MethodFrame {
        let frame = self.next_method();
        assert_eq!((frame.channel, frame.method), (channel, method));
        frame
    }

    /// `true` once the client has shut its side down.
    pub fn at_eof(&mut self) -> bool {
        matches!(read_frame(&mut self.stream, FRAME_MAX), Ok(None))
    }

    pub fn send(&mut self, build: impl FnOnce(&mut FrameWriter)) {
        let mut w = FrameWriter::new(FRAME_MAX);
        build(&mut w);
        self.stream.write_all(&w.take()).unwrap();
    }

    pub fn send_raw(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).unwrap();
    }

    pub fn send_method(&mut self, channel: u16, method: ClassMethod, args: &[u8]) {
        self.send(|w| w.method(channel, method, args).unwrap());
    }

    pub fn send_close(&mut self, channel: u16, args: &CloseArgs) {
        let method = if channel == 0 {
            ClassMethod::CONNECTION_CLOSE
        } else {
            ClassMethod::CHANNEL_CLOSE
        };
        let mut encoded = BytesMut::new();
        args.encode(&mut encoded).unwrap();
        self.send_method(channel, method, &encoded);
    }

    pub fn send_delivery(&mut self, channel: u16, body: &[u8]) {
        self.send(|w| {
            w.method(channel, ClassMethod::BASIC_DELIVER, &[0]).unwrap();
            w.content_header(channel, class::BASIC, body.len() as u64, &[0, 0])
                .unwrap();
            w.body(channel, body);
        });
    }

    pub fn send_heartbeat(&mut self) {
        self.send(FrameWriter::heartbeat);
    }

    /// Answer `channel.open` for `channel`.
    pub fn accept_channel(&mut self, channel: u16) {
        self.expect_method(channel, ClassMethod::CHANNEL_OPEN);
        self.send_method(channel, ClassMethod::CHANNEL_OPEN_OK, &[0, 0, 0, 0]);
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

pub fn args(tag: u8) -> Bytes {
    Bytes::copy_from_slice(&[tag])
}
