//! Command round-trip latency through the full thread pipeline.
//!
//! Each iteration submits one `basic.qos` and waits for the scripted
//! broker's `basic.qos-ok`: app thread → writer → socket → broker →
//! socket → reader → completion handle.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hutch::amqp::prelude::*;
use hutch::amqp::{read_frame, Frame, FrameWriter};
use hutch::kernel::WaitStrategyKind;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const FRAME_MAX: u32 = 16 * 1024;
const PIPELINE_DEPTHS: &[usize] = &[1, 16, 128];

/// Answers every method that expects a reply with its `-ok`.
fn spawn_broker(mut stream: UnixStream) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut out = FrameWriter::new(FRAME_MAX);
        while let Ok(Some(frame)) = read_frame(&mut stream, FRAME_MAX) {
            let Frame::Method(method) = frame else {
                continue;
            };
            let reply = match method.method {
                ClassMethod::CHANNEL_OPEN => ClassMethod::CHANNEL_OPEN_OK,
                ClassMethod::BASIC_QOS => ClassMethod::BASIC_QOS_OK,
                ClassMethod::CHANNEL_CLOSE => ClassMethod::CHANNEL_CLOSE_OK,
                ClassMethod::CONNECTION_CLOSE => ClassMethod::CONNECTION_CLOSE_OK,
                _ => continue,
            };
            if out.method(method.channel, reply, &[]).is_err() || out.flush_to(&mut stream).is_err() {
                break;
            }
            let _ = stream.flush();
        }
    })
}

fn dispatch_latency(c: &mut Criterion) {
    hutch::dev_tracing::init_tracing();
    let mut group = c.benchmark_group("dispatch/basic_qos");
    group.measurement_time(Duration::from_secs(10));

    for kind in [WaitStrategyKind::Blocking, WaitStrategyKind::Spin] {
        let (client, server) = UnixStream::pair().unwrap();
        let broker = spawn_broker(server);
        let options = ConnectionOptions::new()
            .with_ring_capacity(64 * 1024)
            .with_frame_max(FRAME_MAX)
            .with_wait_strategy(kind)
            .with_protocol_header(false);
        let conn = Connection::start(client, options).unwrap();
        let channel = conn.open_channel().unwrap();
        channel.opened().wait();

        for &depth in PIPELINE_DEPTHS {
            group.throughput(Throughput::Elements(depth as u64));
            let id = BenchmarkId::new(format!("{kind:?}"), depth);
            group.bench_with_input(id, &depth, |b, &depth| {
                let args = Bytes::from_static(&[0, 0, 0, 0, 0, 1, 0]);
                b.iter(|| {
                    let handles: Vec<_> = (0..depth)
                        .map(|_| channel.call(ClassMethod::BASIC_QOS, args.clone()).unwrap())
                        .collect();
                    for handle in handles {
                        handle.wait();
                        handle.release();
                    }
                });
            });
        }

        conn.close().wait();
        drop(conn);
        broker.join().unwrap();
    }
    group.finish();
}

criterion_group!(benches, dispatch_latency);
criterion_main!(benches);
