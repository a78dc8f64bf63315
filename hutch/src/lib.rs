//! # Hutch
//!
//! A threaded AMQP 0-9-1 client transport built around gated ring buffers.
//!
//! ## Architecture
//!
//! Hutch is structured as a **transport kernel** with a protocol layer on top:
//!
//! - **`hutch-core`**: SPSC ring buffers with read gates, wait strategies,
//!   completion handles and pools, socket pump threads
//! - **`hutch-amqp`**: frame codec, command dispatch, channel and close protocol
//! - **`hutch`**: public API surface (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`amqp`** (default) - AMQP 0-9-1 connection and channels
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "amqp")]
//! use hutch::amqp::prelude::*;
//!
//! # #[cfg(feature = "amqp")]
//! # fn example() -> Result<(), HutchError> {
//! let conn = Connection::connect("127.0.0.1:5672", ConnectionOptions::new())?;
//! let start = conn.greeting();
//! start.wait();
//!
//! // ... connection.start-ok / tune-ok / open via conn.call ...
//!
//! let channel = conn.open_channel()?;
//! channel.opened().wait();
//! channel.close().wait();
//! conn.close().wait();
//! # Ok(())
//! # }
//! ```
//!
//! ## Threads
//!
//! Every connection runs four named threads (`hutch-socket-rx`,
//! `hutch-reader`, `hutch-writer`, `hutch-socket-tx`). Application threads
//! never touch the socket; they queue commands and wait on completion
//! handles.
//!
//! ## Safety
//!
//! - `unsafe` code is isolated to `hutch-core/src/ring.rs` (raw ring storage)
//! - The protocol layer is 100% safe Rust

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;
pub use hutch_core::error::{HutchError, Result};
pub use hutch_core::options::ConnectionOptions;

pub mod dev_tracing;

/// Transport kernel building blocks.
pub mod kernel {
    pub use hutch_core::completion::{CompletionHandle, CompletionState};
    pub use hutch_core::pool::CompletionPool;
    pub use hutch_core::ring::{Gate, RingBuffer};
    pub use hutch_core::shutdown::ShutdownSignal;
    pub use hutch_core::stream::{GatedReader, RingReader, RingWriter};
    pub use hutch_core::transport::Transport;
    pub use hutch_core::wait::{WaitStrategy, WaitStrategyKind};
}

// Protocol modules (opt-in via features)
#[cfg(feature = "amqp")]
pub mod amqp;
