//! # Hutch AMQP
//!
//! AMQP 0-9-1 command dispatch on top of the `hutch-core` transport kernel.
//!
//! ## Overview
//!
//! A [`Connection`] owns four threads:
//! - **hutch-socket-rx**: socket reads into the input ring
//! - **hutch-reader**: parses frames, matches replies, hands bodies out through gates
//! - **hutch-writer**: encodes queued commands into the output ring
//! - **hutch-socket-tx**: output ring into socket writes
//!
//! Application threads only ever enqueue [`Command`]s and wait on
//! completion handles. Replies are matched per channel in FIFO order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hutch_amqp::prelude::*;
//! use bytes::Bytes;
//!
//! fn main() -> Result<(), HutchError> {
//!     let conn = Connection::connect("127.0.0.1:5672", ConnectionOptions::new())?;
//!     let greeting = conn.greeting();
//!     greeting.wait();
//!     let start = greeting.take_result()?;
//!     println!("server says {:?}", start.into_frame());
//!
//!     // ... connection.start-ok / tune-ok / open exchanged with conn.call ...
//!
//!     let channel = conn.open_channel()?;
//!     let reply = channel.call(ClassMethod::BASIC_QOS, Bytes::from_static(&[0, 0, 0, 0, 0, 10, 0]))?;
//!     reply.wait();
//!     reply.release();
//!
//!     conn.close().wait();
//!     Ok(())
//! }
//! ```

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

pub mod channel;
pub mod close;
pub mod command;
pub mod connection;
pub mod frame;
pub mod protocol;

pub use channel::{Channel, ChannelState, DeliveryHandler};
pub use close::CloseArgs;
pub use command::{Command, CommandReply};
pub use connection::Connection;
pub use frame::{ContentHeader, FrameWriter, MethodFrame};
pub use protocol::ClassMethod;

/// Prelude module for convenient imports
///
/// ```rust
/// use hutch_amqp::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Channel, ChannelState, ClassMethod, CloseArgs, Command, CommandReply, Connection,
        ContentHeader, DeliveryHandler, MethodFrame,
    };
    pub use bytes::Bytes;
    pub use hutch_core::prelude::{CompletionHandle, ConnectionOptions, HutchError};
}
