//! Hutch Core
//!
//! This crate contains the protocol-agnostic building blocks of the client:
//! - SPSC byte ring buffer with read gates (`ring`)
//! - `std::io` adapters over the ring (`stream`)
//! - Wait strategies and the shutdown signal (`wait`, `shutdown`)
//! - Socket producer/consumer threads and transports (`socket`, `transport`, `tcp`)
//! - Poolable completion handles (`completion`, `pool`, `dispatch`)
//! - Connection options and error types (`options`, `error`)

// The ring module owns the only unsafe block in the crate
#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::new_without_default)]
pub mod completion;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod pool;
pub mod ring;
pub mod shutdown;
pub mod socket;
pub mod stream;
pub mod tcp;
pub mod transport;
pub mod wait;

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::completion::{CompletionHandle, CompletionState};
    pub use crate::error::{HutchError, Result};
    pub use crate::options::ConnectionOptions;
    pub use crate::pool::CompletionPool;
    pub use crate::ring::{Gate, RingBuffer};
    pub use crate::shutdown::ShutdownSignal;
    pub use crate::socket::{SocketConsumer, SocketProducer};
    pub use crate::stream::{GatedReader, RingReader, RingWriter};
    pub use crate::tcp::{configure_tcp_keepalive, enable_tcp_nodelay};
    pub use crate::transport::Transport;
    pub use crate::wait::{WaitStrategy, WaitStrategyKind};
}
