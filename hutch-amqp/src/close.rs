//! Arguments of `connection.close` and `channel.close`.
//!
//! ```text
//! reply-code:u16  reply-text:shortstr  class-id:u16  method-id:u16
//! ```
//!
//! Both close-ok methods carry no arguments.

use crate::frame::{get_short_str, put_short_str};
use crate::protocol::{reply_code, ClassMethod};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hutch_core::error::{HutchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseArgs {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl CloseArgs {
    /// A normal shutdown with no offending method.
    #[must_use]
    pub fn normal() -> Self {
        Self {
            reply_code: reply_code::SUCCESS,
            reply_text: "Goodbye".to_owned(),
            class_id: 0,
            method_id: 0,
        }
    }

    /// Describe a local error. Protocol errors keep their fields; anything
    /// else is reported as an internal error.
    #[must_use]
    pub fn from_error(error: &HutchError) -> Self {
        match error {
            HutchError::Protocol {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => Self {
                reply_code: *reply_code,
                reply_text: reply_text.clone(),
                class_id: *class_id,
                method_id: *method_id,
            },
            HutchError::Closed => Self::normal(),
            HutchError::InvalidFrame(text) => Self {
                reply_code: reply_code::FRAME_ERROR,
                reply_text: truncate(text),
                class_id: 0,
                method_id: 0,
            },
            other => Self {
                reply_code: reply_code::INTERNAL_ERROR,
                reply_text: truncate(&other.to_string()),
                class_id: 0,
                method_id: 0,
            },
        }
    }

    /// The offending method, if the peer named one.
    #[must_use]
    pub const fn offending_method(&self) -> Option<ClassMethod> {
        if self.class_id == 0 {
            None
        } else {
            Some(ClassMethod::new(self.class_id, self.method_id))
        }
    }

    /// Append the encoded arguments.
    ///
    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] if `reply_text` exceeds a shortstr.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u16(self.reply_code);
        put_short_str(dst, &self.reply_text)?;
        dst.put_u16(self.class_id);
        dst.put_u16(self.method_id);
        Ok(())
    }

    /// # Errors
    ///
    /// [`HutchError::InvalidFrame`] for truncated or malformed arguments.
    pub fn decode(mut src: Bytes) -> Result<Self> {
        if src.len() < 2 {
            return Err(HutchError::invalid_frame("close arguments truncated"));
        }
        let reply_code = src.get_u16();
        let reply_text = get_short_str(&mut src)?;
        if src.len() < 4 {
            return Err(HutchError::invalid_frame("close arguments truncated"));
        }
        Ok(Self {
            reply_code,
            reply_text,
            class_id: src.get_u16(),
            method_id: src.get_u16(),
        })
    }

    /// The sticky error a received close records.
    #[must_use]
    pub fn into_error(self) -> HutchError {
        HutchError::Protocol {
            reply_code: self.reply_code,
            reply_text: self.reply_text,
            class_id: self.class_id,
            method_id: self.method_id,
        }
    }
}

fn truncate(text: &str) -> String {
    let mut end = text.len().min(u8::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}
