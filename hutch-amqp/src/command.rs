//! Outbound command objects.
//!
//! A command is everything the writer thread needs to put one operation on
//! the wire and everything the reader thread needs to finish it:
//!
//! - a frame generator run on the writer thread
//! - whether a reply method is expected
//! - a reply callback, fired exactly once with the reply, `Written`, or an error
//! - optional caller arguments handed back to the callback
//!
//! A command dropped without being resolved fires its callback with
//! [`HutchError::Closed`], so no queue slot is ever lost silently.

use crate::frame::{FrameWriter, MethodFrame};
use crate::protocol::ClassMethod;
use bytes::Bytes;
use hutch_core::error::{HutchError, Result};
use std::any::Any;
use std::fmt;

/// Encodes a command's frames. Runs on the writer thread.
pub type FrameGenerator = Box<dyn FnOnce(&mut FrameWriter) -> Result<()> + Send + 'static>;

/// Opaque caller data carried alongside a command.
pub type CommandArgs = Box<dyn Any + Send + 'static>;

/// Receives the outcome of a command.
pub type ReplyCallback = Box<dyn FnOnce(Result<CommandReply>, Option<CommandArgs>) + Send + 'static>;

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// The frames were written and no reply was expected.
    Written,
    /// The matching reply method arrived.
    Replied(MethodFrame),
}

impl CommandReply {
    /// The reply frame, if one was expected.
    #[must_use]
    pub fn into_frame(self) -> Option<MethodFrame> {
        match self {
            Self::Written => None,
            Self::Replied(frame) => Some(frame),
        }
    }
}

pub struct Command {
    channel: u16,
    method: ClassMethod,
    generator: Option<FrameGenerator>,
    expects_reply: bool,
    handshake: bool,
    on_reply: Option<ReplyCallback>,
    args: Option<CommandArgs>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("channel", &self.channel)
            .field("method", &self.method)
            .field("expects_reply", &self.expects_reply)
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// A command for `method` on `channel` that writes nothing until a
    /// generator is attached.
    #[must_use]
    pub fn new(channel: u16, method: ClassMethod) -> Self {
        Self {
            channel,
            method,
            generator: None,
            expects_reply: false,
            handshake: method.is_close_handshake(),
            on_reply: None,
            args: None,
        }
    }

    /// Writes nothing; its callback fires once every command queued before
    /// it has been written. Passes sticky errors like a close method.
    #[must_use]
    pub(crate) fn barrier(channel: u16) -> Self {
        let mut command = Self::new(channel, ClassMethod::NONE);
        command.handshake = true;
        command
    }

    /// A command whose only frame is `method` with pre-encoded `args`.
    #[must_use]
    pub fn method(channel: u16, method: ClassMethod, args: Bytes) -> Self {
        Self::new(channel, method)
            .with_generator(move |w: &mut FrameWriter| w.method(channel, method, &args))
    }

    /// Attach the frame generator.
    #[must_use]
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: FnOnce(&mut FrameWriter) -> Result<()> + Send + 'static,
    {
        self.generator = Some(Box::new(generator));
        self
    }

    /// Wait for a reply method instead of completing once written.
    #[must_use]
    pub fn expect_reply(mut self) -> Self {
        self.expects_reply = true;
        self
    }

    /// Attach caller data handed back to the reply callback.
    #[must_use]
    pub fn with_args(mut self, args: CommandArgs) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach the reply callback.
    #[must_use]
    pub fn on_reply<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<CommandReply>, Option<CommandArgs>) + Send + 'static,
    {
        self.on_reply = Some(Box::new(callback));
        self
    }

    #[inline]
    #[must_use]
    pub const fn channel(&self) -> u16 {
        self.channel
    }

    #[inline]
    #[must_use]
    pub const fn class_method(&self) -> ClassMethod {
        self.method
    }

    #[inline]
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        self.expects_reply
    }

    /// Close handshake commands still go out once a sticky error is set.
    #[must_use]
    pub const fn is_close_handshake(&self) -> bool {
        self.handshake
    }

    /// Whether `error` names this command as the offending one.
    #[must_use]
    pub fn is_offending(&self, error: &HutchError) -> bool {
        error.offending_method() == Some((self.method.class_id, self.method.method_id))
    }

    /// Run the generator. A second call writes nothing.
    pub(crate) fn generate(&mut self, writer: &mut FrameWriter) -> Result<()> {
        match self.generator.take() {
            Some(generator) => generator(writer),
            None => Ok(()),
        }
    }

    /// Fire the reply callback with `outcome`.
    pub fn complete(mut self, outcome: Result<CommandReply>) {
        self.fire(outcome);
    }

    /// Fire the reply callback with `error`.
    pub fn fail(self, error: HutchError) {
        self.complete(Err(error));
    }

    fn fire(&mut self, outcome: Result<CommandReply>) {
        if let Some(callback) = self.on_reply.take() {
            callback(outcome, self.args.take());
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.fire(Err(HutchError::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder() -> (
        Arc<Mutex<Vec<Result<CommandReply>>>>,
        impl FnOnce(Result<CommandReply>, Option<CommandArgs>) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |outcome, _args| sink.lock().push(outcome))
    }

    #[test]
    fn callback_fires_once() {
        let (seen, callback) = recorder();
        let cmd = Command::new(1, ClassMethod::BASIC_QOS).on_reply(callback);
        cmd.complete(Ok(CommandReply::Written));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Ok(CommandReply::Written)));
    }

    #[test]
    fn dropped_command_reports_closed() {
        let (seen, callback) = recorder();
        drop(Command::new(1, ClassMethod::BASIC_QOS).expect_reply().on_reply(callback));
        assert!(matches!(seen.lock()[0], Err(HutchError::Closed)));
    }

    #[test]
    fn args_come_back_to_the_callback() {
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        Command::new(2, ClassMethod::QUEUE_BIND)
            .with_args(Box::new(41u32))
            .on_reply(move |_, args| {
                *sink.lock() = args.and_then(|a| a.downcast::<u32>().ok()).map(|v| *v + 1);
            })
            .complete(Ok(CommandReply::Written));
        assert_eq!(*got.lock(), Some(42));
    }

    #[test]
    fn generator_runs_once() {
        let mut writer = FrameWriter::new(4096);
        let mut cmd = Command::method(1, ClassMethod::TX_SELECT, Bytes::new());
        cmd.generate(&mut writer).unwrap();
        let first = writer.pending().len();
        cmd.generate(&mut writer).unwrap();
        assert_eq!(writer.pending().len(), first);
    }

    #[test]
    fn close_methods_and_barriers_are_handshake() {
        assert!(Command::new(0, ClassMethod::CONNECTION_CLOSE_OK).is_close_handshake());
        assert!(Command::new(4, ClassMethod::CHANNEL_CLOSE).is_close_handshake());
        assert!(Command::barrier(0).is_close_handshake());
        assert!(!Command::new(4, ClassMethod::BASIC_PUBLISH).is_close_handshake());
    }

    #[test]
    fn offending_method_match() {
        let cmd = Command::new(1, ClassMethod::QUEUE_DECLARE);
        let err = HutchError::Protocol {
            reply_code: 404,
            reply_text: "NOT_FOUND".into(),
            class_id: 50,
            method_id: 10,
        };
        assert!(cmd.is_offending(&err));
        assert!(!cmd.is_offending(&HutchError::Closed));
    }
}
