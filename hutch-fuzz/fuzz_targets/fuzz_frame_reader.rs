#![no_main]

use bytes::Bytes;
use hutch_amqp::close::CloseArgs;
use hutch_amqp::frame::{read_frame, Frame};
use hutch_amqp::protocol::ClassMethod;
use libfuzzer_sys::fuzz_target;

const FRAME_MAX: u32 = 4096;

fuzz_target!(|data: &[u8]| {
    // Decode frames until the input runs out or turns malformed; neither
    // may panic.
    let mut src = data;
    while let Ok(Some(frame)) = read_frame(&mut src, FRAME_MAX) {
        if let Frame::Method(method) = frame {
            if matches!(
                method.method,
                ClassMethod::CONNECTION_CLOSE | ClassMethod::CHANNEL_CLOSE
            ) {
                let _ = CloseArgs::decode(method.args);
            }
        }
    }

    // Close arguments straight from raw bytes.
    let _ = CloseArgs::decode(Bytes::copy_from_slice(data));
});
