//! Connection: the command dispatcher and its four threads.
//!
//! ```text
//!  app threads ──submit──▶ outbound queue ──▶ [hutch-writer] ──▶ output ring ──▶ [hutch-socket-tx] ──▶ socket
//!                                                  │
//!                                       push before write
//!                                                  ▼
//!                                  per-channel outstanding replies
//!                                                  ▲
//!                                           pop on reply
//!                                                  │
//!  socket ──▶ [hutch-socket-rx] ──▶ input ring ──▶ [hutch-reader] ──▶ delivery handlers / gates
//! ```
//!
//! # Close protocol
//!
//! Connection and channels share one shape:
//!
//! - **local close**: wait (bounded) until every command queued earlier has
//!   been written, send the close method, set `closed`, drain the
//!   outstanding replies. `close-ok` from the server finishes the close.
//! - **server close**: record the error, set `closed`, drain, then send
//!   `close-ok`. Writing the `close-ok` finishes the close, so it can never
//!   overtake the drain.
//! - **abrupt close** (socket failure, malformed input): record the error,
//!   drain everything, stop the threads and shut the socket down.
//!
//! Every step is idempotent; each outstanding command is drained exactly
//! once because draining pops from a lock-free queue.

use crate::channel::{Channel, ChannelCore, ChannelState, DeliveryHandler};
use crate::close::CloseArgs;
use crate::command::{Command, CommandReply};
use crate::frame::{
    check_size, read_frame_end, read_frame_header, read_payload, ContentHeader, FrameWriter,
    MethodFrame,
};
use crate::protocol::{ClassMethod, FrameType};
use bytes::{Bytes, BytesMut};
use hutch_core::completion::CompletionHandle;
use hutch_core::error::{HutchError, Result};
use hutch_core::options::ConnectionOptions;
use hutch_core::pool::CompletionPool;
use hutch_core::ring::RingBuffer;
use hutch_core::shutdown::ShutdownSignal;
use hutch_core::socket::{FailureHook, LoopThread, SocketConsumer, SocketProducer};
use hutch_core::stream::{RingReader, RingWriter};
use hutch_core::tcp;
use hutch_core::transport::Transport;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::ToSocketAddrs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace, warn};

pub(crate) const READER_THREAD: &str = "hutch-reader";
pub(crate) const WRITER_THREAD: &str = "hutch-writer";

enum Outbound {
    Command(Command),
    Stop,
}

/// State shared by the connection handle, channel handles and the threads.
pub(crate) struct Shared {
    options: ConnectionOptions,
    shutdown: ShutdownSignal,
    input: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
    outbound: flume::Sender<Outbound>,
    root: Arc<ChannelCore>,
    channels: RwLock<Vec<Option<Arc<ChannelCore>>>>,
    completions: CompletionPool<CommandReply>,
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Shared {
    /// The connection itself, as channel 0.
    pub(crate) fn root(&self) -> &Arc<ChannelCore> {
        &self.root
    }

    fn core(&self, number: u16) -> Option<Arc<ChannelCore>> {
        if number == 0 {
            return Some(Arc::clone(&self.root));
        }
        self.channels
            .read()
            .get(number as usize)
            .and_then(Clone::clone)
    }

    fn register_channel(&self) -> Result<Arc<ChannelCore>> {
        let max = self.options.channel_max;
        let mut table = self.channels.write();
        let number = (1..=max)
            .find(|&n| table[n as usize].is_none())
            .ok_or(HutchError::ChannelLimit(max))?;
        let core = Arc::new(ChannelCore::new(number, self.options.max_outstanding_replies));
        table[number as usize] = Some(Arc::clone(&core));
        Ok(core)
    }

    fn remove_channel(&self, core: &Arc<ChannelCore>) {
        let mut table = self.channels.write();
        if let Some(slot) = table.get_mut(core.number() as usize) {
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, core)) {
                *slot = None;
            }
        }
    }

    fn take_channels(&self) -> Vec<Arc<ChannelCore>> {
        self.channels
            .write()
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    fn live_channels(&self) -> Vec<Arc<ChannelCore>> {
        self.channels.read().iter().flatten().cloned().collect()
    }

    // =========================
    // Submission
    // =========================

    /// Queue a command for the channel its number names.
    pub(crate) fn submit(&self, command: Command) {
        match self.core(command.channel()) {
            Some(core) => self.submit_to(&core, command),
            None => {
                let channel = command.channel();
                command.fail(HutchError::ChannelNotFound(channel));
            }
        }
    }

    /// Queue a command for `core`. Anything but a close handshake is failed
    /// at once with the sticky error of the connection or of `core`.
    pub(crate) fn submit_to(&self, core: &ChannelCore, command: Command) {
        if !command.is_close_handshake() {
            if let Some(error) = self.root.rejection().or_else(|| core.rejection()) {
                trace!(channel = command.channel(), "command short-circuited: {error}");
                command.fail(error);
                return;
            }
        }
        if let Err(flume::SendError(Outbound::Command(command))) =
            self.outbound.send(Outbound::Command(command))
        {
            command.fail(HutchError::Closed);
        }
    }

    /// Submit `command` to `core` with a pooled completion handle as its callback.
    pub(crate) fn call(
        &self,
        core: &ChannelCore,
        command: Command,
    ) -> Result<CompletionHandle<CommandReply>> {
        let handle = self.completions.acquire()?;
        let completion = handle.clone();
        let token = handle.token();
        self.submit_to(
            core,
            command.on_reply(move |outcome, _| {
                if completion.token() != token {
                    trace!(token, "reply for a recycled completion dropped");
                    return;
                }
                match outcome {
                    Ok(reply) => completion.try_set_result(reply),
                    Err(error) => completion.try_set_exception(error),
                };
            }),
        );
        Ok(handle)
    }

    /// Wait until every command queued so far has been written.
    fn flush_outbound(&self) {
        if thread::current().name() == Some(WRITER_THREAD) {
            return;
        }
        let flushed = CompletionHandle::<()>::new();
        let done = flushed.clone();
        self.submit(Command::barrier(0).on_reply(move |_, _| {
            done.try_set_completed();
        }));
        if !flushed.wait_timeout(self.options.close_drain_timeout) {
            warn!(
                "[Connection] outbound queue not drained within {:?}",
                self.options.close_drain_timeout
            );
        }
    }

    // =========================
    // Writer thread
    // =========================

    fn run_writer(self: Arc<Self>, rx: flume::Receiver<Outbound>) {
        let mut out = RingWriter::new(Arc::clone(&self.output));
        let mut frames = FrameWriter::new(self.options.frame_max);
        debug!("[Writer] started");

        for message in rx.iter() {
            match message {
                Outbound::Command(command) => {
                    let written = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.write_command(command, &mut frames, &mut out);
                    }));
                    if written.is_err() {
                        error!("[Writer] reply callback panicked, closing connection");
                        self.abort(HutchError::transport("writer callback panicked"));
                        break;
                    }
                }
                Outbound::Stop => break,
            }
        }

        let error = self.root.last_error().unwrap_or(HutchError::Closed);
        for message in rx.try_iter() {
            if let Outbound::Command(command) = message {
                command.fail(error.clone());
            }
        }
        debug!("[Writer] stopped");
    }

    fn write_command(&self, mut command: Command, frames: &mut FrameWriter, out: &mut RingWriter) {
        // Channel traffic never follows connection.close onto the wire.
        if command.channel() != 0 && self.root.is_closed() {
            command.fail(self.root.last_error().unwrap_or(HutchError::Closed));
            return;
        }
        let Some(owner) = self.core(command.channel()) else {
            // An abort empties the table before it marks the connection closed.
            let channel = command.channel();
            let error = self
                .root
                .last_error()
                .unwrap_or(HutchError::ChannelNotFound(channel));
            command.fail(error);
            return;
        };

        if !command.is_close_handshake() && owner.is_closed() {
            let error = owner
                .last_error()
                .or_else(|| self.root.last_error())
                .unwrap_or(HutchError::Closed);
            command.fail(error);
            return;
        }

        if let Err(error) = command.generate(frames) {
            frames.clear();
            command.fail(error);
            return;
        }

        let mut written = None;
        if command.expects_reply() {
            // Register before the bytes leave so the reply can never win.
            if let Err(command) = owner.push_reply(command) {
                frames.clear();
                command.fail(HutchError::ReplyQueueFull {
                    channel: owner.number(),
                    capacity: self.options.max_outstanding_replies,
                });
                return;
            }
            if owner.is_closed() {
                // Lost a race with a close whose drain may already be over.
                frames.clear();
                let error = owner.last_error().unwrap_or(HutchError::Closed);
                owner.drain_replies(&error, &AtomicBool::new(true));
                return;
            }
        } else {
            written = Some(command);
        }

        if let Err(e) = frames.flush_to(out) {
            let error = HutchError::transport(format!("output ring closed: {e}"));
            if let Some(command) = written {
                command.fail(error.clone());
            }
            self.abort(error);
            return;
        }
        if let Some(command) = written {
            command.complete(Ok(CommandReply::Written));
        }
    }

    // =========================
    // Reader thread
    // =========================

    fn run_reader(self: Arc<Self>) {
        let mut input = RingReader::new(Arc::clone(&self.input));
        debug!("[Reader] started");
        loop {
            let Ok(read) = panic::catch_unwind(AssertUnwindSafe(|| self.read_frame(&mut input)))
            else {
                error!("[Reader] reply callback panicked, closing connection");
                self.abort(HutchError::transport("reader callback panicked"));
                break;
            };
            match read {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    if !self.shutdown.is_cancelled() {
                        warn!("[Reader] {error}");
                        self.abort(error);
                    }
                    break;
                }
            }
        }
        debug!("[Reader] stopped");
    }

    /// Parse and dispatch one frame. `Ok(false)` at end of input.
    fn read_frame(self: &Arc<Self>, input: &mut RingReader) -> Result<bool> {
        let Some(header) = read_frame_header(input)? else {
            return Ok(false);
        };
        check_size(&header, self.options.frame_max)?;

        match header.frame_type {
            FrameType::Method => {
                let payload = read_payload(input, header.size)?;
                read_frame_end(input)?;
                self.dispatch_method(MethodFrame::parse(header.channel, payload)?)?;
            }
            FrameType::Header => {
                let payload = read_payload(input, header.size)?;
                read_frame_end(input)?;
                let content = ContentHeader::parse(header.channel, payload)?;
                if let Some(core) = self.core(header.channel) {
                    core.content_header(&content)?;
                    if let Some(handler) = core.handler() {
                        handler.on_content_header(&content);
                    }
                }
            }
            FrameType::Body => {
                self.dispatch_body(input, header.channel, header.size)?;
                read_frame_end(input)?;
            }
            FrameType::Heartbeat => {
                input.skip(header.size as usize)?;
                read_frame_end(input)?;
                trace!("heartbeat received");
            }
        }
        Ok(true)
    }

    /// Hand a body to the channel's handler through a gate, then step the
    /// primary reader over it without waiting for the handler.
    fn dispatch_body(&self, input: &mut RingReader, channel: u16, size: u32) -> Result<()> {
        let handler = match self.core(channel) {
            Some(core) => {
                core.content_body(size)?;
                core.handler()
            }
            None => None,
        };
        if let Some(handler) = handler.filter(|_| size > 0) {
            let body = input.open_gate(size)?;
            handler.on_content_body(channel, body, size);
        }
        input.skip(size as usize)?;
        Ok(())
    }

    fn dispatch_method(self: &Arc<Self>, frame: MethodFrame) -> Result<()> {
        trace!(channel = frame.channel, method = %frame.method, "method received");
        if frame.channel == 0 {
            return self.dispatch_connection_method(frame);
        }
        let Some(core) = self.core(frame.channel) else {
            debug!("[Reader] {} for unknown channel {}", frame.method, frame.channel);
            return Ok(());
        };
        if frame.method.carries_content() {
            core.content_method(frame.method)?;
        }
        match frame.method {
            ClassMethod::CHANNEL_CLOSE => {
                let args = CloseArgs::decode(frame.args)?;
                self.close_by_server(&core, args);
            }
            ClassMethod::CHANNEL_CLOSE_OK => self.close_ok_received(&core),
            method if method.is_server_initiated() => core.deliver_frame(&frame),
            _ => core.resolve_reply(frame),
        }
        Ok(())
    }

    fn dispatch_connection_method(self: &Arc<Self>, frame: MethodFrame) -> Result<()> {
        let root = Arc::clone(&self.root);
        match frame.method {
            ClassMethod::CONNECTION_CLOSE => {
                let args = CloseArgs::decode(frame.args)?;
                self.close_by_server(&root, args);
            }
            ClassMethod::CONNECTION_CLOSE_OK => self.close_ok_received(&root),
            method if method.is_server_initiated() => root.deliver_frame(&frame),
            ClassMethod::CONNECTION_OPEN_OK => {
                root.mark_open();
                root.resolve_reply(frame);
            }
            _ => root.resolve_reply(frame),
        }
        Ok(())
    }

    // =========================
    // Close protocol
    // =========================

    /// Locally initiated clean close of `core` (the connection when `core`
    /// is the root).
    pub(crate) fn close_local(
        self: &Arc<Self>,
        core: &Arc<ChannelCore>,
        args: CloseArgs,
    ) -> CompletionHandle<()> {
        let done = core.close_done().clone();
        if !core.begin_close() {
            return done;
        }
        let number = core.number();
        debug!("[Channel {number}] closing: {} {}", args.reply_code, args.reply_text);
        core.record_error(HutchError::Closed);

        if number != 0 && self.root.is_closed() {
            // Nothing may follow connection.close; finish locally.
            self.drain(core, &HutchError::Closed);
            core.finish_close();
            self.remove_channel(core);
            return done;
        }

        self.flush_outbound();

        let mut encoded = BytesMut::new();
        if let Err(e) = args.encode(&mut encoded) {
            warn!("[Channel {number}] close arguments rejected ({e}), sending normal close");
            encoded.clear();
            let _ = CloseArgs::normal().encode(&mut encoded);
        }
        let method = if number == 0 {
            ClassMethod::CONNECTION_CLOSE
        } else {
            ClassMethod::CHANNEL_CLOSE
        };
        self.submit_to(core, Command::method(number, method, encoded.freeze()));

        self.drain(core, &HutchError::Closed);
        done
    }

    /// The server closed `core`: drain with its error, then confirm.
    fn close_by_server(self: &Arc<Self>, core: &Arc<ChannelCore>, args: CloseArgs) {
        let number = core.number();
        warn!(
            "[Channel {number}] closed by server: {} {} (offending {}.{})",
            args.reply_code, args.reply_text, args.class_id, args.method_id
        );
        let error = core.record_error(args.into_error()).clone();
        core.begin_close();
        self.drain(core, &error);

        let method = if number == 0 {
            ClassMethod::CONNECTION_CLOSE_OK
        } else {
            ClassMethod::CHANNEL_CLOSE_OK
        };
        let shared = Arc::clone(self);
        let target = Arc::clone(core);
        self.submit_to(
            core,
            Command::method(number, method, Bytes::new()).on_reply(move |outcome, _| match outcome {
                Ok(_) => shared.finish(&target),
                Err(e) => target.fail_close(&e),
            }),
        );
    }

    fn close_ok_received(&self, core: &Arc<ChannelCore>) {
        if core.state() != ChannelState::Closing {
            debug!("[Channel {}] close-ok while {:?}, ignored", core.number(), core.state());
            return;
        }
        self.finish(core);
    }

    /// Set `closed` and fail every outstanding command of `core` (and of all
    /// channels when `core` is the connection).
    fn drain(&self, core: &ChannelCore, error: &HutchError) {
        core.mark_closed();
        let specific = AtomicBool::new(false);
        let mut drained = core.drain_replies(error, &specific);
        if core.number() == 0 {
            for channel in self.live_channels() {
                channel.record_error(error.clone());
                channel.begin_close();
                channel.mark_closed();
                drained += channel.drain_replies(error, &specific);
            }
        }
        debug!("[Channel {}] close drained {drained} commands", core.number());
    }

    /// The close handshake of `core` is over.
    fn finish(&self, core: &Arc<ChannelCore>) {
        if core.number() == 0 {
            debug!("[Connection] closed");
            self.teardown();
            let error = core.last_error().unwrap_or(HutchError::Closed);
            for channel in self.take_channels() {
                channel.mark_closed();
                channel.drain_replies(&error, &AtomicBool::new(true));
                channel.finish_close();
            }
        } else {
            debug!("[Channel {}] closed", core.number());
            self.remove_channel(core);
        }
        core.finish_close();
    }

    /// Close without a handshake. Idempotent.
    pub(crate) fn abort(&self, reason: HutchError) {
        let error = self.root.record_error(reason).clone();
        if !self.shutdown.is_cancelled() {
            warn!("[Connection] abrupt close: {error}");
        }

        let specific = AtomicBool::new(false);
        let mut cores = self.take_channels();
        cores.push(Arc::clone(&self.root));
        for core in &cores {
            // A close already on the wire counts as a finished close.
            let close_sent = core.is_closed() && core.state() == ChannelState::Closing;
            core.record_error(error.clone());
            core.begin_close();
            core.mark_closed();
            core.drain_replies(&error, &specific);
            if close_sent {
                core.finish_close();
            } else {
                core.fail_close(&error);
            }
        }

        self.teardown();
        self.shutdown_transport();
    }

    /// Stop the loop threads. The socket consumer flushes the output ring
    /// and then shuts the socket down.
    fn teardown(&self) {
        if !self.shutdown.cancel() {
            return;
        }
        debug!("[Connection] stopping threads");
        self.input.wake_all();
        self.output.wake_all();
        let _ = self.outbound.send(Outbound::Stop);
    }

    fn shutdown_transport(&self) {
        if let Some(transport) = self.transport.lock().as_ref() {
            if let Err(e) = transport.shutdown_both() {
                trace!("transport shutdown: {e}");
            }
        }
    }
}

struct Threads {
    producer: SocketProducer,
    consumer: SocketConsumer,
    reader: LoopThread,
    writer: LoopThread,
}

/// An AMQP connection over one blocking transport.
///
/// Dropping the handle aborts a connection that is still open and joins
/// its threads.
pub struct Connection {
    shared: Arc<Shared>,
    greeting: CompletionHandle<CommandReply>,
    threads: Mutex<Option<Threads>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("channels", &self.shared.live_channels().len())
            .field("last_error", &self.last_error())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect over TCP and start the connection.
    ///
    /// # Errors
    ///
    /// Invalid options, connect failures, or thread creation failures.
    pub fn connect(addr: impl ToSocketAddrs, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        let stream = tcp::connect(addr, options.tcp_nodelay, options.tcp_keepalive)?;
        Self::start(stream, options)
    }

    /// Start the threads over an already connected transport.
    ///
    /// With `send_protocol_header` set, the preamble is the first thing
    /// written and [`greeting`](Self::greeting) resolves with the server's
    /// `connection.start`.
    ///
    /// # Errors
    ///
    /// Invalid options, or failure to clone the transport or spawn a thread.
    pub fn start<T: Transport>(transport: T, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;

        let shutdown = ShutdownSignal::new();
        let input = Arc::new(RingBuffer::with_gate_limit(
            options.ring_capacity,
            options.max_gates,
            options.wait_strategy,
            shutdown.clone(),
        )?);
        let output = Arc::new(RingBuffer::new(
            options.ring_capacity,
            options.wait_strategy,
            shutdown.clone(),
        )?);
        let rx_half = transport.try_clone_transport()?;
        let tx_half = transport.try_clone_transport()?;
        let (outbound, outbound_rx) = flume::unbounded();

        let shared = Arc::new(Shared {
            root: Arc::new(ChannelCore::new(0, options.max_outstanding_replies)),
            channels: RwLock::new(vec![None; options.channel_max as usize + 1]),
            completions: CompletionPool::new(options.completion_pool_size),
            transport: Mutex::new(Some(Box::new(transport) as Box<dyn Transport>)),
            options,
            shutdown,
            input,
            output,
            outbound,
        });

        // Queued before the writer starts, so the preamble is always first.
        let greeting = CompletionHandle::new();
        if shared.options.send_protocol_header {
            let completion = greeting.clone();
            shared.submit(
                Command::new(0, ClassMethod::CONNECTION_START)
                    .with_generator(|w: &mut FrameWriter| {
                        w.protocol_header();
                        Ok(())
                    })
                    .expect_reply()
                    .on_reply(move |outcome, _| {
                        match outcome {
                            Ok(reply) => completion.try_set_result(reply),
                            Err(error) => completion.try_set_exception(error),
                        };
                    }),
            );
        }

        let threads = match Self::spawn_threads(&shared, rx_half, tx_half, outbound_rx) {
            Ok(threads) => threads,
            Err(e) => {
                shared.abort(HutchError::transport(format!("thread spawn failed: {e}")));
                return Err(e.into());
            }
        };
        debug!(
            ring = shared.options.ring_capacity,
            frame_max = shared.options.frame_max,
            "[Connection] started"
        );

        Ok(Self {
            shared,
            greeting,
            threads: Mutex::new(Some(threads)),
        })
    }

    fn spawn_threads<T: Transport>(
        shared: &Arc<Shared>,
        rx_half: T,
        tx_half: T,
        outbound_rx: flume::Receiver<Outbound>,
    ) -> std::io::Result<Threads> {
        let on_failure: FailureHook = {
            let shared = Arc::clone(shared);
            Arc::new(move |error: HutchError| shared.abort(error))
        };
        let chunk = shared.options.socket_chunk_size;

        let producer = SocketProducer::spawn(
            rx_half,
            Arc::clone(&shared.input),
            chunk,
            Arc::clone(&on_failure),
        )?;
        let consumer =
            SocketConsumer::spawn(tx_half, Arc::clone(&shared.output), chunk, on_failure)?;
        let reader = {
            let shared = Arc::clone(shared);
            LoopThread::spawn(READER_THREAD, move || shared.run_reader())?
        };
        let writer = {
            let shared = Arc::clone(shared);
            LoopThread::spawn(WRITER_THREAD, move || shared.run_writer(outbound_rx))?
        };
        Ok(Threads {
            producer,
            consumer,
            reader,
            writer,
        })
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.root.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.root.is_closed()
    }

    /// The sticky connection error, if one was recorded.
    #[must_use]
    pub fn last_error(&self) -> Option<HutchError> {
        self.shared.root.last_error()
    }

    /// Resolves with the server's `connection.start` once the preamble has
    /// been answered.
    #[must_use]
    pub fn greeting(&self) -> CompletionHandle<CommandReply> {
        self.greeting.clone()
    }

    /// Resolves when `connection.open-ok` arrives.
    #[must_use]
    pub fn opened(&self) -> CompletionHandle<()> {
        self.shared.root.opened().clone()
    }

    /// Queue a command for the writer thread. Its callback fires
    /// synchronously when the connection or target channel has failed.
    pub fn submit(&self, command: Command) {
        self.shared.submit(command);
    }

    /// Send a channel-0 method and wait for its reply.
    ///
    /// # Errors
    ///
    /// [`HutchError::PoolExhausted`] if no completion handle is free.
    pub fn call(&self, method: ClassMethod, args: Bytes) -> Result<CompletionHandle<CommandReply>> {
        self.shared.call(
            &self.shared.root,
            Command::method(0, method, args).expect_reply(),
        )
    }

    /// Allocate the lowest free channel number and send `channel.open`.
    ///
    /// The channel accepts commands at once; they queue behind the open.
    /// [`Channel::opened`] resolves on `channel.open-ok`.
    ///
    /// # Errors
    ///
    /// The sticky error once the connection failed or closed, or
    /// [`HutchError::ChannelLimit`] when every number is taken.
    pub fn open_channel(&self) -> Result<Channel> {
        if let Some(error) = self.shared.root.rejection() {
            return Err(error);
        }
        let core = self.shared.register_channel()?;
        if self.shared.root.is_closed() {
            self.shared.remove_channel(&core);
            return Err(self.shared.root.last_error().unwrap_or(HutchError::Closed));
        }

        let number = core.number();
        debug!("[Channel {number}] opening");
        let target = Arc::clone(&core);
        // channel.open carries one reserved shortstr
        self.shared.submit_to(
            &core,
            Command::method(number, ClassMethod::CHANNEL_OPEN, Bytes::from_static(&[0]))
                .expect_reply()
                .on_reply(move |outcome, _| match outcome {
                    Ok(_) => {
                        target.mark_open();
                    }
                    Err(error) => target.fail_close(&error),
                }),
        );
        Ok(Channel::new(core, Arc::clone(&self.shared)))
    }

    /// Handle to an already open channel.
    #[must_use]
    pub fn channel(&self, number: u16) -> Option<Channel> {
        if number == 0 {
            return None;
        }
        self.shared
            .core(number)
            .map(|core| Channel::new(core, Arc::clone(&self.shared)))
    }

    /// Number of channels in the table.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.shared.live_channels().len()
    }

    /// Receives `connection.blocked` / `connection.unblocked`.
    pub fn set_delivery_handler(&self, handler: Arc<dyn DeliveryHandler>) {
        self.shared.root.set_handler(Some(handler));
    }

    /// Queue one heartbeat frame.
    pub fn send_heartbeat(&self) {
        self.shared.submit(
            Command::new(0, ClassMethod::NONE).with_generator(|w: &mut FrameWriter| {
                w.heartbeat();
                Ok(())
            }),
        );
    }

    /// Close the connection normally. Idempotent.
    pub fn close(&self) -> CompletionHandle<()> {
        self.close_with(CloseArgs::normal())
    }

    /// Close the connection with explicit close arguments. Idempotent.
    pub fn close_with(&self, args: CloseArgs) -> CompletionHandle<()> {
        self.shared.close_local(&self.shared.root, args)
    }

    /// Resolves when the connection is closed, without initiating a close.
    #[must_use]
    pub fn closed(&self) -> CompletionHandle<()> {
        self.shared.root.close_done().clone()
    }

    /// Tear the connection down without a close handshake.
    pub fn abort(&self, reason: HutchError) {
        self.shared.abort(reason);
    }

    /// Wait for every thread to exit. Only returns after the connection has
    /// closed or been aborted.
    pub fn join(&self) {
        let Some(mut threads) = self.threads.lock().take() else {
            return;
        };
        threads.writer.join();
        threads.consumer.join();
        threads.reader.join();
        threads.producer.join();
        debug!("[Connection] threads joined");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.shared.shutdown.is_cancelled() {
            self.shared.abort(HutchError::Closed);
        }
        self.join();
    }
}
