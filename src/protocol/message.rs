//! Application message payload
//!
//! The payload of a `Transfer` frame. Payload serialization is deliberately
//! thin: an optional subject and an opaque body.

use crate::error::{LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Application message
///
/// # Examples
///
/// ```
/// use msglink::Message;
///
/// let msg = Message::new("hello").with_subject("greeting");
/// assert_eq!(msg.body_str(), Some("hello"));
/// assert_eq!(msg.subject(), Some("greeting"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    subject: Option<String>,
    body: Bytes,
}

impl Message {
    /// Create a message with the given body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            subject: None,
            body: body.into(),
        }
    }

    /// Set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Message subject
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Raw body bytes
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Encode to a transfer payload
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(3 + self.body.len());
        match &self.subject {
            Some(subject) => {
                let len = u16::try_from(subject.len()).map_err(|_| {
                    LinkError::InvalidFrame(format!("subject too long: {} bytes", subject.len()))
                })?;
                buf.put_u8(1);
                buf.put_u16(len);
                buf.put_slice(subject.as_bytes());
            }
            None => buf.put_u8(0),
        }
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Decode from a transfer payload
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if !payload.has_remaining() {
            return Err(LinkError::InvalidFrame("empty message payload".to_string()));
        }
        let subject = match payload.get_u8() {
            0 => None,
            _ => {
                if payload.remaining() < 2 {
                    return Err(LinkError::InvalidFrame("truncated subject length".to_string()));
                }
                let len = payload.get_u16() as usize;
                if payload.remaining() < len {
                    return Err(LinkError::InvalidFrame("truncated subject".to_string()));
                }
                let raw = payload.split_to(len);
                Some(String::from_utf8(raw.to_vec())?)
            }
        };
        Ok(Self {
            subject,
            body: payload,
        })
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Message::new(body.to_string())
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Message::new(body)
    }
}
