//! End to end over a real TCP socket: preamble, connection open, a channel
//! with a publish and a delivery, then a clean close from both sides.

use hutch::amqp::prelude::*;
use hutch::amqp::{read_frame, ContentHeader, Frame, FrameWriter};
use hutch::kernel::GatedReader;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FRAME_MAX: u32 = 8192;
const WAIT: Duration = Duration::from_secs(5);

fn send(stream: &mut TcpStream, build: impl FnOnce(&mut FrameWriter)) {
    let mut w = FrameWriter::new(FRAME_MAX);
    build(&mut w);
    w.flush_to(stream).unwrap();
}

fn next_method(stream: &mut TcpStream) -> MethodFrame {
    loop {
        match read_frame(stream, FRAME_MAX).unwrap().expect("client hung up") {
            Frame::Method(frame) => return frame,
            Frame::Heartbeat { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}

/// Publishes are echoed back as deliveries.
fn broker(listener: TcpListener) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();

        let mut preamble = [0u8; 8];
        stream.read_exact(&mut preamble).unwrap();
        assert_eq!(&preamble, b"AMQP\x00\x00\x09\x01");
        send(&mut stream, |w| w.method(0, ClassMethod::CONNECTION_START, &[0, 9]).unwrap());

        let open = next_method(&mut stream);
        assert_eq!(open.method, ClassMethod::CONNECTION_OPEN);
        send(&mut stream, |w| w.method(0, ClassMethod::CONNECTION_OPEN_OK, &[0]).unwrap());

        let channel_open = next_method(&mut stream);
        assert_eq!(channel_open.method, ClassMethod::CHANNEL_OPEN);
        let ch = channel_open.channel;
        send(&mut stream, |w| w.method(ch, ClassMethod::CHANNEL_OPEN_OK, &[0, 0, 0, 0]).unwrap());

        let publish = next_method(&mut stream);
        assert_eq!(publish.method, ClassMethod::BASIC_PUBLISH);
        let Frame::Header(header) = read_frame(&mut stream, FRAME_MAX).unwrap().unwrap() else {
            panic!("expected content header");
        };
        let mut body = Vec::new();
        while (body.len() as u64) < header.body_size {
            match read_frame(&mut stream, FRAME_MAX).unwrap().unwrap() {
                Frame::Body { payload, .. } => body.extend_from_slice(&payload),
                other => panic!("expected body, got {other:?}"),
            }
        }

        send(&mut stream, |w| {
            w.method(ch, ClassMethod::BASIC_DELIVER, &[0]).unwrap();
            w.content_header(ch, 60, body.len() as u64, &[0, 0]).unwrap();
            w.body(ch, &body);
        });

        let close = next_method(&mut stream);
        assert_eq!(close.method, ClassMethod::CONNECTION_CLOSE);
        send(&mut stream, |w| w.method(0, ClassMethod::CONNECTION_CLOSE_OK, &[]).unwrap());
        stream.flush().unwrap();

        // The client shuts the socket down once its close finished.
        assert!(read_frame(&mut stream, FRAME_MAX).unwrap().is_none());
    })
}

struct Collect(flume::Sender<Vec<u8>>);

impl DeliveryHandler for Collect {
    fn on_frame(&self, frame: &MethodFrame) {
        assert_eq!(frame.method, ClassMethod::BASIC_DELIVER);
    }

    fn on_content_header(&self, header: &ContentHeader) {
        assert_eq!(header.class_id, 60);
    }

    fn on_content_body(&self, _channel: u16, mut body: GatedReader, _len: u32) {
        let chunk = body.read_to_bytes().unwrap();
        let _ = self.0.send(chunk.to_vec());
    }
}

#[test]
fn connection_lifecycle_over_tcp() {
    hutch::dev_tracing::init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = broker(listener);

    let options = ConnectionOptions::new()
        .with_ring_capacity(32 * 1024)
        .with_frame_max(FRAME_MAX)
        .with_tcp_keepalive(Some(Duration::from_secs(30)));
    let conn = Connection::connect(addr, options).unwrap();

    let greeting = conn.greeting();
    assert!(greeting.wait_timeout(WAIT));
    assert_eq!(
        greeting.take_result().unwrap().into_frame().unwrap().method,
        ClassMethod::CONNECTION_START
    );

    let open = conn.call(ClassMethod::CONNECTION_OPEN, Bytes::from_static(b"\x01/\x00\x00")).unwrap();
    assert!(open.wait_timeout(WAIT));
    open.release();
    assert_eq!(conn.state(), ChannelState::Open);

    let channel = conn.open_channel().unwrap();
    let (tx, rx) = flume::unbounded();
    channel.set_delivery_handler(Arc::new(Collect(tx)));
    assert!(channel.opened().wait_timeout(WAIT));

    let body: Vec<u8> = (0..20_000u32).map(|i| (i * 7) as u8).collect();
    let published = channel
        .publish(Bytes::from_static(&[0, 0, 0, 0, 0]), Bytes::from_static(&[0, 0]), Bytes::from(body.clone()))
        .unwrap();
    assert!(published.wait_timeout(WAIT));

    let mut echoed = Vec::new();
    while echoed.len() < body.len() {
        echoed.extend(rx.recv_timeout(WAIT).unwrap());
    }
    assert_eq!(echoed, body);

    let closed = conn.close();
    assert!(closed.wait_timeout(WAIT));
    assert!(closed.get_result().is_ok());
    assert!(channel.is_closed());

    conn.join();
    server.join().unwrap();
}
