//! Connection configuration.
//!
//! Every knob that sizes a queue, a ring or a thread buffer lives here so a
//! connection can be built from one value. Options use the builder pattern:
//!
//! ```
//! use hutch_core::options::ConnectionOptions;
//! use std::time::Duration;
//!
//! let opts = ConnectionOptions::new()
//!     .with_ring_capacity(64 * 1024)
//!     .with_frame_max(32 * 1024)
//!     .with_close_drain_timeout(Duration::from_secs(1));
//! assert!(opts.validate().is_ok());
//! ```

use crate::error::{HutchError, Result};
use crate::ring::{validate_capacity, MAX_GATES};
use crate::tcp::{configure_tcp_keepalive, enable_tcp_nodelay};
use crate::wait::WaitStrategyKind;
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Smallest frame size a peer may negotiate.
pub const FRAME_MIN_SIZE: u32 = 4096;

/// Options applied when a connection is created.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Capacity of each of the input and output rings, in bytes.
    ///
    /// Must be a power of two and at least 32.
    ///
    /// Default: 512 KiB
    pub ring_capacity: usize,

    /// How ring readers and writers wait for each other.
    ///
    /// Default: [`WaitStrategyKind::Blocking`]
    pub wait_strategy: WaitStrategyKind,

    /// Bound of each channel's outstanding-reply queue.
    ///
    /// Default: 256
    pub max_outstanding_replies: usize,

    /// Number of gate slots per input ring (at most 32).
    ///
    /// Default: 32
    pub max_gates: usize,

    /// Scratch buffer size used by the socket threads.
    ///
    /// Default: 64 KiB
    pub socket_chunk_size: usize,

    /// Largest frame the writer produces (body content is split to fit) and
    /// the largest inbound frame accepted. Must not exceed `ring_capacity`.
    ///
    /// Default: 131072
    pub frame_max: u32,

    /// Highest channel number handed out by `open_channel`.
    ///
    /// Default: 2047
    pub channel_max: u16,

    /// How long a local close waits for already submitted commands to be
    /// written before sending the close method.
    ///
    /// Default: 5 seconds
    pub close_drain_timeout: Duration,

    /// Number of pooled completion handles per connection.
    ///
    /// Default: 128
    pub completion_pool_size: usize,

    /// Disable Nagle's algorithm on TCP transports.
    ///
    /// Default: true
    pub tcp_nodelay: bool,

    /// Idle time before TCP keepalive probes start (`None` leaves the OS default).
    ///
    /// Default: None
    pub tcp_keepalive: Option<Duration>,

    /// Write the `AMQP 0-9-1` protocol header when the transport starts.
    ///
    /// Default: true
    pub send_protocol_header: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ring_capacity: 512 * 1024,
            wait_strategy: WaitStrategyKind::Blocking,
            max_outstanding_replies: 256,
            max_gates: MAX_GATES,
            socket_chunk_size: 64 * 1024,
            frame_max: 131_072,
            channel_max: 2047,
            close_drain_timeout: Duration::from_secs(5),
            completion_pool_size: 128,
            tcp_nodelay: true,
            tcp_keepalive: None,
            send_protocol_header: true,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ring capacity (power of two, at least 32).
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the ring wait strategy.
    ///
    /// # Examples
    ///
    /// ```
    /// use hutch_core::options::ConnectionOptions;
    /// use hutch_core::wait::WaitStrategyKind;
    ///
    /// // Burn a core for latency
    /// let opts = ConnectionOptions::new().with_wait_strategy(WaitStrategyKind::Spin);
    /// ```
    pub fn with_wait_strategy(mut self, kind: WaitStrategyKind) -> Self {
        self.wait_strategy = kind;
        self
    }

    /// Set the per-channel outstanding-reply bound.
    pub fn with_max_outstanding_replies(mut self, max: usize) -> Self {
        self.max_outstanding_replies = max;
        self
    }

    /// Set the number of gate slots.
    pub fn with_max_gates(mut self, gates: usize) -> Self {
        self.max_gates = gates;
        self
    }

    /// Set the socket thread scratch size.
    pub fn with_socket_chunk_size(mut self, size: usize) -> Self {
        self.socket_chunk_size = size;
        self
    }

    /// Set the largest outgoing frame.
    pub fn with_frame_max(mut self, frame_max: u32) -> Self {
        self.frame_max = frame_max;
        self
    }

    /// Set the highest channel number.
    pub fn with_channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    /// Set the local close drain timeout.
    pub fn with_close_drain_timeout(mut self, timeout: Duration) -> Self {
        self.close_drain_timeout = timeout;
        self
    }

    /// Set the completion pool size.
    pub fn with_completion_pool_size(mut self, size: usize) -> Self {
        self.completion_pool_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Set TCP keepalive idle time.
    pub fn with_tcp_keepalive(mut self, idle: Option<Duration>) -> Self {
        self.tcp_keepalive = idle;
        self
    }

    /// Enable or disable the protocol header on start.
    pub fn with_protocol_header(mut self, send: bool) -> Self {
        self.send_protocol_header = send;
        self
    }

    /// Check that the options describe a buildable connection.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidCapacity`] for a bad ring size, otherwise
    /// [`HutchError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        validate_capacity(self.ring_capacity)?;
        if self.max_gates == 0 || self.max_gates > MAX_GATES {
            return Err(HutchError::invalid_config(format!(
                "max_gates must be within 1..={MAX_GATES}, got {}",
                self.max_gates
            )));
        }
        if self.max_outstanding_replies == 0 {
            return Err(HutchError::invalid_config(
                "max_outstanding_replies must be non-zero",
            ));
        }
        if self.completion_pool_size == 0 {
            return Err(HutchError::invalid_config(
                "completion_pool_size must be non-zero",
            ));
        }
        if self.socket_chunk_size == 0 {
            return Err(HutchError::invalid_config("socket_chunk_size must be non-zero"));
        }
        if self.frame_max < FRAME_MIN_SIZE {
            return Err(HutchError::invalid_config(format!(
                "frame_max must be at least {FRAME_MIN_SIZE}, got {}",
                self.frame_max
            )));
        }
        if self.frame_max as usize > self.ring_capacity {
            return Err(HutchError::invalid_config(format!(
                "frame_max {} exceeds ring_capacity {}",
                self.frame_max, self.ring_capacity
            )));
        }
        if self.channel_max == 0 {
            return Err(HutchError::invalid_config("channel_max must be non-zero"));
        }
        Ok(())
    }

    /// Apply the TCP tuning options to `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if a socket option cannot be set.
    pub fn configure_tcp(&self, stream: &TcpStream) -> io::Result<()> {
        if self.tcp_nodelay {
            enable_tcp_nodelay(stream)?;
        }
        if let Some(idle) = self.tcp_keepalive {
            configure_tcp_keepalive(stream, idle)?;
        }
        Ok(())
    }
}
