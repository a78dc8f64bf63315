//! AMQP 0-9-1 protocol implementation.
//!
//! # Types
//!
//! - [`Connection`] - owns the socket and the four connection threads
//! - [`Channel`] - cheap handle to one channel of a connection
//! - [`Command`] - one outbound operation with its reply callback
//! - [`DeliveryHandler`] - receives server-initiated methods and content
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hutch::amqp::prelude::*;
//!
//! # fn example() -> Result<(), HutchError> {
//! let conn = Connection::connect("127.0.0.1:5672", ConnectionOptions::new())?;
//! let channel = conn.open_channel()?;
//!
//! let reply = channel.call(ClassMethod::TX_SELECT, Bytes::new())?;
//! reply.wait();
//! println!("{:?}", reply.take_result()?);
//! reply.release();
//! # Ok(())
//! # }
//! ```

pub use hutch_amqp::channel::{Channel, ChannelState, DeliveryHandler};
pub use hutch_amqp::close::CloseArgs;
pub use hutch_amqp::command::{Command, CommandArgs, CommandReply, FrameGenerator};
pub use hutch_amqp::connection::Connection;
pub use hutch_amqp::frame::{read_frame, ContentHeader, Frame, FrameWriter, MethodFrame};
pub use hutch_amqp::protocol::{class, reply_code, ClassMethod, FrameType};

/// Convenient imports for the AMQP protocol.
///
/// # Example
///
/// ```rust
/// use hutch::amqp::prelude::*;
///
/// // Now you have:
/// // - Connection, Channel, Command, ClassMethod
/// // - ConnectionOptions, HutchError, CompletionHandle
/// // - Bytes for zero-copy payloads
/// ```
pub mod prelude {
    pub use super::{
        Channel, ChannelState, ClassMethod, CloseArgs, Command, CommandReply, Connection,
        DeliveryHandler, MethodFrame,
    };
    pub use bytes::Bytes;
    pub use hutch_core::completion::CompletionHandle;
    pub use hutch_core::error::HutchError;
    pub use hutch_core::options::ConnectionOptions;
}
