//! AMQP 0-9-1 constant tables: frame types, class/method ids, reply codes.

use std::fmt;

/// Preamble written before the first frame.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Trailing octet of every frame.
pub const FRAME_END: u8 = 0xCE;

/// `type:1 channel:2 size:4`
pub const FRAME_HEADER_SIZE: usize = 7;

/// Header plus the end octet.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Frame type octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

impl FrameType {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Method),
            2 => Some(Self::Header),
            3 => Some(Self::Body),
            8 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Class ids.
pub mod class {
    pub const CONNECTION: u16 = 10;
    pub const CHANNEL: u16 = 20;
    pub const EXCHANGE: u16 = 40;
    pub const QUEUE: u16 = 50;
    pub const BASIC: u16 = 60;
    pub const CONFIRM: u16 = 85;
    pub const TX: u16 = 90;
}

/// Reply codes carried by close methods.
pub mod reply_code {
    pub const SUCCESS: u16 = 200;
    pub const CONTENT_TOO_LARGE: u16 = 311;
    pub const NO_CONSUMERS: u16 = 313;
    pub const CONNECTION_FORCED: u16 = 320;
    pub const INVALID_PATH: u16 = 402;
    pub const ACCESS_REFUSED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const FRAME_ERROR: u16 = 501;
    pub const SYNTAX_ERROR: u16 = 502;
    pub const COMMAND_INVALID: u16 = 503;
    pub const CHANNEL_ERROR: u16 = 504;
    pub const UNEXPECTED_FRAME: u16 = 505;
    pub const RESOURCE_ERROR: u16 = 506;
    pub const NOT_ALLOWED: u16 = 530;
    pub const NOT_IMPLEMENTED: u16 = 540;
    pub const INTERNAL_ERROR: u16 = 541;
}

/// A `(class-id, method-id)` pair identifying one method.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassMethod {
    pub class_id: u16,
    pub method_id: u16,
}

impl ClassMethod {
    #[must_use]
    pub const fn new(class_id: u16, method_id: u16) -> Self {
        Self {
            class_id,
            method_id,
        }
    }

    /// Packed `class << 16 | method` form, handy as a map key.
    #[inline]
    #[must_use]
    pub const fn packed(self) -> u32 {
        ((self.class_id as u32) << 16) | self.method_id as u32
    }

    /// Close handshake methods are exempt from sticky-error short-circuiting.
    #[must_use]
    pub const fn is_close_handshake(self) -> bool {
        matches!(
            self,
            Self::CONNECTION_CLOSE
                | Self::CONNECTION_CLOSE_OK
                | Self::CHANNEL_CLOSE
                | Self::CHANNEL_CLOSE_OK
        )
    }

    /// Methods the server sends unprompted. They never answer a command and
    /// must not consume an outstanding-reply slot.
    #[must_use]
    pub const fn is_server_initiated(self) -> bool {
        matches!(
            self,
            Self::BASIC_DELIVER
                | Self::BASIC_RETURN
                | Self::BASIC_ACK
                | Self::BASIC_NACK
                | Self::BASIC_CANCEL
                | Self::CHANNEL_FLOW
                | Self::CONNECTION_BLOCKED
                | Self::CONNECTION_UNBLOCKED
        )
    }

    /// Methods followed by a content header and body frames.
    #[must_use]
    pub const fn carries_content(self) -> bool {
        matches!(
            self,
            Self::BASIC_PUBLISH | Self::BASIC_RETURN | Self::BASIC_DELIVER | Self::BASIC_GET_OK
        )
    }

    /// Placeholder for frames that are not methods (heartbeats, preamble).
    pub const NONE: Self = Self::new(0, 0);

    pub const CONNECTION_START: Self = Self::new(class::CONNECTION, 10);
    pub const CONNECTION_START_OK: Self = Self::new(class::CONNECTION, 11);
    pub const CONNECTION_SECURE: Self = Self::new(class::CONNECTION, 20);
    pub const CONNECTION_SECURE_OK: Self = Self::new(class::CONNECTION, 21);
    pub const CONNECTION_TUNE: Self = Self::new(class::CONNECTION, 30);
    pub const CONNECTION_TUNE_OK: Self = Self::new(class::CONNECTION, 31);
    pub const CONNECTION_OPEN: Self = Self::new(class::CONNECTION, 40);
    pub const CONNECTION_OPEN_OK: Self = Self::new(class::CONNECTION, 41);
    pub const CONNECTION_CLOSE: Self = Self::new(class::CONNECTION, 50);
    pub const CONNECTION_CLOSE_OK: Self = Self::new(class::CONNECTION, 51);
    pub const CONNECTION_BLOCKED: Self = Self::new(class::CONNECTION, 60);
    pub const CONNECTION_UNBLOCKED: Self = Self::new(class::CONNECTION, 61);

    pub const CHANNEL_OPEN: Self = Self::new(class::CHANNEL, 10);
    pub const CHANNEL_OPEN_OK: Self = Self::new(class::CHANNEL, 11);
    pub const CHANNEL_FLOW: Self = Self::new(class::CHANNEL, 20);
    pub const CHANNEL_FLOW_OK: Self = Self::new(class::CHANNEL, 21);
    pub const CHANNEL_CLOSE: Self = Self::new(class::CHANNEL, 40);
    pub const CHANNEL_CLOSE_OK: Self = Self::new(class::CHANNEL, 41);

    pub const EXCHANGE_DECLARE: Self = Self::new(class::EXCHANGE, 10);
    pub const EXCHANGE_DECLARE_OK: Self = Self::new(class::EXCHANGE, 11);
    pub const EXCHANGE_DELETE: Self = Self::new(class::EXCHANGE, 20);
    pub const EXCHANGE_DELETE_OK: Self = Self::new(class::EXCHANGE, 21);
    pub const EXCHANGE_BIND: Self = Self::new(class::EXCHANGE, 30);
    pub const EXCHANGE_BIND_OK: Self = Self::new(class::EXCHANGE, 31);
    pub const EXCHANGE_UNBIND: Self = Self::new(class::EXCHANGE, 40);
    pub const EXCHANGE_UNBIND_OK: Self = Self::new(class::EXCHANGE, 51);

    pub const QUEUE_DECLARE: Self = Self::new(class::QUEUE, 10);
    pub const QUEUE_DECLARE_OK: Self = Self::new(class::QUEUE, 11);
    pub const QUEUE_BIND: Self = Self::new(class::QUEUE, 20);
    pub const QUEUE_BIND_OK: Self = Self::new(class::QUEUE, 21);
    pub const QUEUE_PURGE: Self = Self::new(class::QUEUE, 30);
    pub const QUEUE_PURGE_OK: Self = Self::new(class::QUEUE, 31);
    pub const QUEUE_DELETE: Self = Self::new(class::QUEUE, 40);
    pub const QUEUE_DELETE_OK: Self = Self::new(class::QUEUE, 41);
    pub const QUEUE_UNBIND: Self = Self::new(class::QUEUE, 50);
    pub const QUEUE_UNBIND_OK: Self = Self::new(class::QUEUE, 51);

    pub const BASIC_QOS: Self = Self::new(class::BASIC, 10);
    pub const BASIC_QOS_OK: Self = Self::new(class::BASIC, 11);
    pub const BASIC_CONSUME: Self = Self::new(class::BASIC, 20);
    pub const BASIC_CONSUME_OK: Self = Self::new(class::BASIC, 21);
    pub const BASIC_CANCEL: Self = Self::new(class::BASIC, 30);
    pub const BASIC_CANCEL_OK: Self = Self::new(class::BASIC, 31);
    pub const BASIC_PUBLISH: Self = Self::new(class::BASIC, 40);
    pub const BASIC_RETURN: Self = Self::new(class::BASIC, 50);
    pub const BASIC_DELIVER: Self = Self::new(class::BASIC, 60);
    pub const BASIC_GET: Self = Self::new(class::BASIC, 70);
    pub const BASIC_GET_OK: Self = Self::new(class::BASIC, 71);
    pub const BASIC_GET_EMPTY: Self = Self::new(class::BASIC, 72);
    pub const BASIC_ACK: Self = Self::new(class::BASIC, 80);
    pub const BASIC_REJECT: Self = Self::new(class::BASIC, 90);
    pub const BASIC_RECOVER_ASYNC: Self = Self::new(class::BASIC, 100);
    pub const BASIC_RECOVER: Self = Self::new(class::BASIC, 110);
    pub const BASIC_RECOVER_OK: Self = Self::new(class::BASIC, 111);
    pub const BASIC_NACK: Self = Self::new(class::BASIC, 120);

    pub const CONFIRM_SELECT: Self = Self::new(class::CONFIRM, 10);
    pub const CONFIRM_SELECT_OK: Self = Self::new(class::CONFIRM, 11);

    pub const TX_SELECT: Self = Self::new(class::TX, 10);
    pub const TX_SELECT_OK: Self = Self::new(class::TX, 11);
    pub const TX_COMMIT: Self = Self::new(class::TX, 20);
    pub const TX_COMMIT_OK: Self = Self::new(class::TX, 21);
    pub const TX_ROLLBACK: Self = Self::new(class::TX, 30);
    pub const TX_ROLLBACK_OK: Self = Self::new(class::TX, 31);
}

impl fmt::Debug for ClassMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_id, self.method_id)
    }
}

impl fmt::Display for ClassMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<(u16, u16)> for ClassMethod {
    fn from((class_id, method_id): (u16, u16)) -> Self {
        Self::new(class_id, method_id)
    }
}
