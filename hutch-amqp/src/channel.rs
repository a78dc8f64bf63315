//! Per-channel protocol state and the public channel handle.
//!
//! Every channel (and the connection itself, as channel 0) owns:
//!
//! - a lifecycle state: `Opening → Open → Closing → Closed`, monotonic
//! - a bounded FIFO of commands waiting for their reply
//! - a sticky error, recorded once
//! - a `closed` flag: once set, only close handshake methods reach the wire
//!
//! The connection keeps the channel states in a table indexed by channel
//! number; a [`Channel`] handle is a number plus shared references, never a
//! back-pointer cycle.

use crate::close::CloseArgs;
use crate::command::{Command, CommandReply};
use crate::connection::Shared;
use crate::frame::{ContentHeader, FrameWriter, MethodFrame};
use crate::protocol::{class, ClassMethod};
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use hutch_core::completion::CompletionHandle;
use hutch_core::error::{HutchError, Result};
use hutch_core::stream::GatedReader;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle of a channel or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelState {
    Opening = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Receives server-initiated methods and message content for one channel.
///
/// Called on the frame reader thread. A slow handler delays every channel
/// of the connection, except for body content: a handler may move the
/// [`GatedReader`] to another thread and return at once, and the reader
/// carries on parsing while the body is drained.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// A method that does not answer a command (`basic.deliver`,
    /// `basic.ack`, `connection.blocked`, ...).
    fn on_frame(&self, frame: &MethodFrame);

    /// The header announcing the content that follows a delivery.
    fn on_content_header(&self, header: &ContentHeader) {
        let _ = header;
    }

    /// One body frame. The gate is closed when `body` is dropped, read or not.
    fn on_content_body(&self, channel: u16, body: GatedReader, body_length: u32) {
        let _ = (channel, body_length);
        drop(body);
    }
}

#[derive(Debug, Default)]
struct ContentState {
    class_id: u16,
    body_size: u64,
    received: u64,
    in_body: bool,
}

/// Shared state of one channel.
pub(crate) struct ChannelCore {
    number: u16,
    state: AtomicU8,
    closed: AtomicBool,
    replies: ArrayQueue<Command>,
    last_error: OnceCell<HutchError>,
    handler: RwLock<Option<Arc<dyn DeliveryHandler>>>,
    content: Mutex<ContentState>,
    opened: CompletionHandle<()>,
    close_done: CompletionHandle<()>,
}

impl fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCore")
            .field("number", &self.number)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .field("outstanding", &self.replies.len())
            .field("last_error", &self.last_error.get())
            .finish()
    }
}

impl ChannelCore {
    pub(crate) fn new(number: u16, max_outstanding: usize) -> Self {
        Self {
            number,
            state: AtomicU8::new(ChannelState::Opening as u8),
            closed: AtomicBool::new(false),
            replies: ArrayQueue::new(max_outstanding),
            last_error: OnceCell::new(),
            handler: RwLock::new(None),
            content: Mutex::new(ContentState::default()),
            opened: CompletionHandle::new(),
            close_done: CompletionHandle::new(),
        }
    }

    #[inline]
    pub(crate) const fn number(&self) -> u16 {
        self.number
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.replies.len()
    }

    pub(crate) fn opened(&self) -> &CompletionHandle<()> {
        &self.opened
    }

    pub(crate) fn close_done(&self) -> &CompletionHandle<()> {
        &self.close_done
    }

    /// `Opening → Open`. Returns `false` if the channel already left `Opening`.
    pub(crate) fn mark_open(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                ChannelState::Opening as u8,
                ChannelState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.opened.try_set_completed();
        }
        won
    }

    /// Move to `Closing`. Only the first caller wins.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ChannelState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                ChannelState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Set the `closed` flag. Returns `true` for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Record `error` unless one is already stored; returns the stored one.
    pub(crate) fn record_error(&self, error: HutchError) -> &HutchError {
        self.last_error.get_or_init(|| error)
    }

    pub(crate) fn last_error(&self) -> Option<HutchError> {
        self.last_error.get().cloned()
    }

    /// Error a non-handshake command is short-circuited with, if any.
    pub(crate) fn rejection(&self) -> Option<HutchError> {
        if let Some(error) = self.last_error.get() {
            return Some(error.clone());
        }
        self.is_closed().then_some(HutchError::Closed)
    }

    /// Register a command awaiting its reply. Hands it back when full.
    pub(crate) fn push_reply(&self, command: Command) -> std::result::Result<(), Command> {
        self.replies.push(command)
    }

    /// Resolve the oldest outstanding command with `frame`.
    pub(crate) fn resolve_reply(&self, frame: MethodFrame) {
        match self.replies.pop() {
            Some(command) => {
                trace!(channel = self.number, method = %frame.method, "reply matched");
                command.complete(Ok(CommandReply::Replied(frame)));
            }
            None => debug!(
                "[Channel {}] reply {} with no outstanding command",
                self.number, frame.method
            ),
        }
    }

    /// Fail every outstanding command. The first one named by `error` gets
    /// it (guarded by `specific`); the rest get [`HutchError::Closed`].
    pub(crate) fn drain_replies(&self, error: &HutchError, specific: &AtomicBool) -> usize {
        let mut drained = 0;
        while let Some(command) = self.replies.pop() {
            let outcome = if command.is_offending(error) && !specific.swap(true, Ordering::AcqRel) {
                error.clone()
            } else {
                HutchError::Closed
            };
            command.fail(outcome);
            drained += 1;
        }
        if drained > 0 {
            debug!("[Channel {}] drained {drained} outstanding commands", self.number);
        }
        drained
    }

    /// The close handshake finished.
    pub(crate) fn finish_close(&self) {
        self.state.store(ChannelState::Closed as u8, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.opened.try_set_exception(HutchError::Closed);
        self.close_done.try_set_completed();
    }

    /// The channel went down without a handshake.
    pub(crate) fn fail_close(&self, reason: &HutchError) {
        self.state.store(ChannelState::Closed as u8, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.opened.try_set_exception(reason.clone());
        self.close_done.try_set_exception(reason.clone());
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn DeliveryHandler>> {
        self.handler.read().clone()
    }

    pub(crate) fn set_handler(&self, handler: Option<Arc<dyn DeliveryHandler>>) {
        *self.handler.write() = handler;
    }

    /// Pass a server-initiated method to the handler, if any.
    pub(crate) fn deliver_frame(&self, frame: &MethodFrame) {
        match self.handler() {
            Some(handler) => handler.on_frame(frame),
            None => trace!(channel = self.number, method = %frame.method, "no handler, dropped"),
        }
    }

    /// A content-bearing method starts a new message; the previous one
    /// must be complete.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the previous body is incomplete.
    pub(crate) fn content_method(&self, method: ClassMethod) -> Result<()> {
        let content = self.content.lock();
        if content.in_body {
            return Err(HutchError::invalid_frame(format!(
                "{method} on channel {} with {} of {} body bytes outstanding",
                self.number,
                content.body_size - content.received,
                content.body_size
            )));
        }
        Ok(())
    }

    /// Track a content header.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if the previous body is incomplete.
    pub(crate) fn content_header(&self, header: &ContentHeader) -> Result<()> {
        let mut content = self.content.lock();
        if content.in_body {
            return Err(HutchError::invalid_frame(format!(
                "content header on channel {} with {} of {} body bytes outstanding",
                self.number,
                content.body_size - content.received,
                content.body_size
            )));
        }
        content.class_id = header.class_id;
        content.body_size = header.body_size;
        content.received = 0;
        content.in_body = header.body_size > 0;
        Ok(())
    }

    /// Track a body frame of `len` bytes.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] for a body without a header or one that
    /// overruns the announced size.
    pub(crate) fn content_body(&self, len: u32) -> Result<()> {
        let mut content = self.content.lock();
        if !content.in_body {
            return Err(HutchError::invalid_frame(format!(
                "body frame on channel {} without a content header",
                self.number
            )));
        }
        content.received += u64::from(len);
        if content.received > content.body_size {
            return Err(HutchError::invalid_frame(format!(
                "body of {} bytes on channel {} exceeds announced {}",
                content.received, self.number, content.body_size
            )));
        }
        if content.received == content.body_size {
            trace!(channel = self.number, class = content.class_id, "content complete");
            content.in_body = false;
        }
        Ok(())
    }
}

/// Handle to an open channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Channel").field(&self.core).finish()
    }
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>, shared: Arc<Shared>) -> Self {
        Self { core, shared }
    }

    #[must_use]
    pub fn number(&self) -> u16 {
        self.core.number()
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// The sticky error of this channel, or of the connection if the
    /// channel has none.
    #[must_use]
    pub fn last_error(&self) -> Option<HutchError> {
        self.core
            .last_error()
            .or_else(|| self.shared.root().last_error())
    }

    /// Commands waiting for their reply.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.core.outstanding()
    }

    /// A blank command for `method` on this channel.
    #[must_use]
    pub fn command(&self, method: ClassMethod) -> Command {
        Command::new(self.number(), method)
    }

    /// Queue `command` for the writer thread.
    ///
    /// Its callback fires synchronously if the channel or connection has
    /// already failed, or if the command targets another channel.
    pub fn submit(&self, command: Command) {
        if command.channel() != self.number() {
            let target = command.channel();
            command.fail(HutchError::invalid_config(format!(
                "command for channel {target} submitted on channel {}",
                self.number()
            )));
            return;
        }
        self.shared.submit_to(&self.core, command);
    }

    /// Send `method` with pre-encoded `args` and wait for its reply.
    ///
    /// # Errors
    ///
    /// [`HutchError::PoolExhausted`] if no completion handle is free.
    pub fn call(&self, method: ClassMethod, args: Bytes) -> Result<CompletionHandle<CommandReply>> {
        self.shared.call(
            &self.core,
            Command::method(self.number(), method, args).expect_reply(),
        )
    }

    /// Send `method` with pre-encoded `args`; resolves once written.
    ///
    /// # Errors
    ///
    /// [`HutchError::PoolExhausted`] if no completion handle is free.
    pub fn send(&self, method: ClassMethod, args: Bytes) -> Result<CompletionHandle<CommandReply>> {
        self.shared
            .call(&self.core, Command::method(self.number(), method, args))
    }

    /// Send `basic.publish` followed by its content header and body frames.
    ///
    /// # Errors
    ///
    /// [`HutchError::PoolExhausted`] if no completion handle is free.
    pub fn publish(
        &self,
        args: Bytes,
        properties: Bytes,
        body: Bytes,
    ) -> Result<CompletionHandle<CommandReply>> {
        let number = self.number();
        let command = Command::new(number, ClassMethod::BASIC_PUBLISH).with_generator(
            move |w: &mut FrameWriter| {
                w.method(number, ClassMethod::BASIC_PUBLISH, &args)?;
                w.content_header(number, class::BASIC, body.len() as u64, &properties)?;
                w.body(number, &body);
                Ok(())
            },
        );
        self.shared.call(&self.core, command)
    }

    pub fn set_delivery_handler(&self, handler: Arc<dyn DeliveryHandler>) {
        self.core.set_handler(Some(handler));
    }

    pub fn clear_delivery_handler(&self) {
        self.core.set_handler(None);
    }

    /// Resolves when `channel.open-ok` arrives.
    #[must_use]
    pub fn opened(&self) -> CompletionHandle<()> {
        self.core.opened().clone()
    }

    /// Resolves when the channel is closed, without initiating a close.
    #[must_use]
    pub fn closed(&self) -> CompletionHandle<()> {
        self.core.close_done().clone()
    }

    /// Close the channel normally. Idempotent.
    pub fn close(&self) -> CompletionHandle<()> {
        self.close_with(CloseArgs::normal())
    }

    /// Close the channel with explicit close arguments. Idempotent.
    pub fn close_with(&self, args: CloseArgs) -> CompletionHandle<()> {
        self.shared.close_local(&self.core, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn recording(core: &ChannelCore, method: ClassMethod, seen: &Arc<PlMutex<Vec<String>>>) {
        let sink = Arc::clone(seen);
        let command = Command::new(core.number(), method)
            .expect_reply()
            .on_reply(move |outcome, _| {
                sink.lock().push(match outcome {
                    Ok(reply) => format!("ok {:?}", reply.into_frame().map(|f| f.method)),
                    Err(e) => format!("err {e}"),
                });
            });
        assert!(core.push_reply(command).is_ok());
    }

    #[test]
    fn lifecycle_is_monotonic() {
        let core = ChannelCore::new(1, 4);
        assert_eq!(core.state(), ChannelState::Opening);
        assert!(core.mark_open());
        assert!(!core.mark_open());
        assert!(core.begin_close());
        assert!(!core.begin_close());
        assert_eq!(core.state(), ChannelState::Closing);
        core.finish_close();
        assert_eq!(core.state(), ChannelState::Closed);
        assert!(!core.begin_close());
        assert!(core.close_done().is_resolved());
    }

    #[test]
    fn sticky_error_is_set_once() {
        let core = ChannelCore::new(1, 4);
        assert!(core.rejection().is_none());
        core.record_error(HutchError::transport("reset"));
        core.record_error(HutchError::Closed);
        assert!(matches!(core.last_error(), Some(HutchError::Transport(_))));
        assert!(matches!(core.rejection(), Some(HutchError::Transport(_))));
    }

    #[test]
    fn reply_queue_is_bounded() {
        let core = ChannelCore::new(1, 1);
        let seen = Arc::new(PlMutex::new(Vec::new()));
        recording(&core, ClassMethod::QUEUE_DECLARE, &seen);
        let overflow = Command::new(1, ClassMethod::QUEUE_BIND).expect_reply();
        assert!(core.push_reply(overflow).is_err());
    }

    #[test]
    fn drain_gives_specific_error_to_offending_command_only() {
        let core = ChannelCore::new(3, 8);
        let seen = Arc::new(PlMutex::new(Vec::new()));
        recording(&core, ClassMethod::QUEUE_DECLARE, &seen);
        recording(&core, ClassMethod::QUEUE_BIND, &seen);
        recording(&core, ClassMethod::QUEUE_BIND, &seen);

        let error = HutchError::Protocol {
            reply_code: 404,
            reply_text: "NOT_FOUND - no exchange".into(),
            class_id: 50,
            method_id: 20,
        };
        let specific = AtomicBool::new(false);
        assert_eq!(core.drain_replies(&error, &specific), 3);
        assert_eq!(core.drain_replies(&error, &specific), 0);

        let seen = seen.lock();
        assert_eq!(seen[0], "err Closed");
        assert!(seen[1].contains("NOT_FOUND"));
        assert_eq!(seen[2], "err Closed");
    }

    #[test]
    fn content_tracking() {
        let core = ChannelCore::new(1, 1);
        assert!(core.content_body(10).is_err());

        let header = ContentHeader {
            channel: 1,
            class_id: 60,
            weight: 0,
            body_size: 10,
            properties: Bytes::new(),
        };
        core.content_header(&header).unwrap();
        core.content_body(4).unwrap();
        assert!(core.content_header(&header).is_err());
        core.content_body(6).unwrap();
        assert!(core.content_body(1).is_err());

        core.content_header(&header).unwrap();
        assert!(core.content_body(11).is_err());
    }

    #[test]
    fn content_method_requires_complete_body() {
        let core = ChannelCore::new(1, 1);
        core.content_method(ClassMethod::BASIC_DELIVER).unwrap();

        let header = ContentHeader {
            channel: 1,
            class_id: 60,
            weight: 0,
            body_size: 8,
            properties: Bytes::new(),
        };
        core.content_header(&header).unwrap();
        core.content_body(3).unwrap();
        assert!(matches!(
            core.content_method(ClassMethod::BASIC_DELIVER),
            Err(HutchError::InvalidFrame(_))
        ));
        core.content_body(5).unwrap();
        core.content_method(ClassMethod::BASIC_RETURN).unwrap();
    }
}
