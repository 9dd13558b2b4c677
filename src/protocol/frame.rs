//! Wire frames
//!
//! Every frame is an 8-byte header followed by a type-specific body:
//!
//! ```text
//! +----------+--------+--------+-----------+------------------+
//! | size u32 | type u8| flags  | channel   | body ...         |
//! | (total)  |        | u8     | u16       |                  |
//! +----------+--------+--------+-----------+------------------+
//! ```
//!
//! All integers are big-endian. Strings are a `u16` length followed by UTF-8
//! bytes; opaque payloads are a `u32` length followed by the bytes.

use crate::error::{ErrorCondition, LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum accepted frame size (header included)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    SaslMechanisms = 0x10,
    SaslInit = 0x11,
    SaslOutcome = 0x12,
    Open = 0x20,
    Close = 0x21,
    Attach = 0x22,
    Detach = 0x23,
    Flow = 0x24,
    Transfer = 0x25,
    Disposition = 0x26,
    Empty = 0x2F,
}

impl TryFrom<u8> for FrameType {
    type Error = LinkError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0x10 => FrameType::SaslMechanisms,
            0x11 => FrameType::SaslInit,
            0x12 => FrameType::SaslOutcome,
            0x20 => FrameType::Open,
            0x21 => FrameType::Close,
            0x22 => FrameType::Attach,
            0x23 => FrameType::Detach,
            0x24 => FrameType::Flow,
            0x25 => FrameType::Transfer,
            0x26 => FrameType::Disposition,
            0x2F => FrameType::Empty,
            other => {
                return Err(LinkError::InvalidFrame(format!(
                    "unknown frame type {:#04x}",
                    other
                )))
            }
        })
    }
}

/// Fixed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including this header
    pub size: u32,
    /// Frame type code
    pub frame_type: u8,
    /// Reserved
    pub flags: u8,
    /// Session channel (always 0; one session per connection)
    pub channel: u16,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.size);
        buf.put_u8(self.frame_type);
        buf.put_u8(self.flags);
        buf.put_u16(self.channel);
    }

    /// Decode header from the first 8 bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(LinkError::InvalidFrame(format!(
                "header needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let header = FrameHeader {
            size: data.get_u32(),
            frame_type: data.get_u8(),
            flags: data.get_u8(),
            channel: data.get_u16(),
        };
        let size = header.size as usize;
        if size < Self::SIZE {
            return Err(LinkError::InvalidFrame(format!("frame size {} below header size", size)));
        }
        if size > MAX_FRAME_SIZE {
            return Err(LinkError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(header)
    }
}

/// Direction of a link from the point of view of the frame's sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role the peer takes on the same link
    pub fn opposite(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

/// Delivery outcome reported by a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
    Released,
}

/// SASL outcome code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslCode {
    Ok,
    Auth,
}

/// A protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Server offers its mechanisms (first frame on every connection)
    SaslMechanisms { mechanisms: Vec<String> },
    /// Client picks a mechanism
    SaslInit {
        mechanism: String,
        initial_response: Bytes,
    },
    /// Server accepts or rejects the client's credentials
    SaslOutcome { code: SaslCode },
    Open {
        container_id: String,
        hostname: String,
        /// Sender's idle timeout in milliseconds (0 = none)
        idle_timeout_ms: u32,
    },
    Close { error: Option<ErrorCondition> },
    Attach {
        handle: u32,
        name: String,
        role: Role,
        address: String,
    },
    Detach {
        handle: u32,
        error: Option<ErrorCondition>,
    },
    /// Receiver grants `credit` additional transfers
    Flow { handle: u32, credit: u32 },
    Transfer {
        handle: u32,
        delivery_id: u32,
        payload: Bytes,
    },
    Disposition {
        handle: u32,
        delivery_id: u32,
        outcome: Outcome,
    },
    /// Heartbeat
    Empty,
}

impl Frame {
    /// Frame type code for this frame
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::SaslMechanisms { .. } => FrameType::SaslMechanisms,
            Frame::SaslInit { .. } => FrameType::SaslInit,
            Frame::SaslOutcome { .. } => FrameType::SaslOutcome,
            Frame::Open { .. } => FrameType::Open,
            Frame::Close { .. } => FrameType::Close,
            Frame::Attach { .. } => FrameType::Attach,
            Frame::Detach { .. } => FrameType::Detach,
            Frame::Flow { .. } => FrameType::Flow,
            Frame::Transfer { .. } => FrameType::Transfer,
            Frame::Disposition { .. } => FrameType::Disposition,
            Frame::Empty => FrameType::Empty,
        }
    }

    /// Encode the frame, header included
    ///
    /// # Errors
    ///
    /// - [`LinkError::FrameTooLarge`] - body would exceed [`MAX_FRAME_SIZE`]
    /// - [`LinkError::InvalidFrame`] - a string field exceeds 65535 bytes
    pub fn encode(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        match self {
            Frame::SaslMechanisms { mechanisms } => {
                let count = u16::try_from(mechanisms.len())
                    .map_err(|_| LinkError::InvalidFrame("too many mechanisms".to_string()))?;
                body.put_u16(count);
                for mech in mechanisms {
                    put_str(&mut body, mech)?;
                }
            }
            Frame::SaslInit {
                mechanism,
                initial_response,
            } => {
                put_str(&mut body, mechanism)?;
                put_bytes(&mut body, initial_response);
            }
            Frame::SaslOutcome { code } => body.put_u8(match code {
                SaslCode::Ok => 0,
                SaslCode::Auth => 1,
            }),
            Frame::Open {
                container_id,
                hostname,
                idle_timeout_ms,
            } => {
                put_str(&mut body, container_id)?;
                put_str(&mut body, hostname)?;
                body.put_u32(*idle_timeout_ms);
            }
            Frame::Close { error } => put_condition(&mut body, error.as_ref())?,
            Frame::Attach {
                handle,
                name,
                role,
                address,
            } => {
                body.put_u32(*handle);
                put_str(&mut body, name)?;
                body.put_u8(match role {
                    Role::Sender => 0,
                    Role::Receiver => 1,
                });
                put_str(&mut body, address)?;
            }
            Frame::Detach { handle, error } => {
                body.put_u32(*handle);
                put_condition(&mut body, error.as_ref())?;
            }
            Frame::Flow { handle, credit } => {
                body.put_u32(*handle);
                body.put_u32(*credit);
            }
            Frame::Transfer {
                handle,
                delivery_id,
                payload,
            } => {
                body.put_u32(*handle);
                body.put_u32(*delivery_id);
                put_bytes(&mut body, payload);
            }
            Frame::Disposition {
                handle,
                delivery_id,
                outcome,
            } => {
                body.put_u32(*handle);
                body.put_u32(*delivery_id);
                body.put_u8(match outcome {
                    Outcome::Accepted => 0,
                    Outcome::Rejected => 1,
                    Outcome::Released => 2,
                });
            }
            Frame::Empty => {}
        }

        let size = FrameHeader::SIZE + body.len();
        if size > MAX_FRAME_SIZE {
            return Err(LinkError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        FrameHeader {
            size: size as u32,
            frame_type: self.frame_type() as u8,
            flags: 0,
            channel: 0,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&body);
        Ok(buf.freeze())
    }

    /// Decode a complete frame (header + body)
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(data)?;
        let size = header.size as usize;
        if data.len() < size {
            return Err(LinkError::InvalidFrame(format!(
                "frame declares {} bytes, got {}",
                size,
                data.len()
            )));
        }
        let mut body = &data[FrameHeader::SIZE..size];

        let frame = match FrameType::try_from(header.frame_type)? {
            FrameType::SaslMechanisms => {
                let count = get_u16(&mut body)?;
                let mut mechanisms = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    mechanisms.push(get_str(&mut body)?);
                }
                Frame::SaslMechanisms { mechanisms }
            }
            FrameType::SaslInit => Frame::SaslInit {
                mechanism: get_str(&mut body)?,
                initial_response: get_bytes(&mut body)?,
            },
            FrameType::SaslOutcome => Frame::SaslOutcome {
                code: match get_u8(&mut body)? {
                    0 => SaslCode::Ok,
                    _ => SaslCode::Auth,
                },
            },
            FrameType::Open => Frame::Open {
                container_id: get_str(&mut body)?,
                hostname: get_str(&mut body)?,
                idle_timeout_ms: get_u32(&mut body)?,
            },
            FrameType::Close => Frame::Close {
                error: get_condition(&mut body)?,
            },
            FrameType::Attach => Frame::Attach {
                handle: get_u32(&mut body)?,
                name: get_str(&mut body)?,
                role: match get_u8(&mut body)? {
                    0 => Role::Sender,
                    1 => Role::Receiver,
                    other => {
                        return Err(LinkError::InvalidFrame(format!("invalid role {}", other)))
                    }
                },
                address: get_str(&mut body)?,
            },
            FrameType::Detach => Frame::Detach {
                handle: get_u32(&mut body)?,
                error: get_condition(&mut body)?,
            },
            FrameType::Flow => Frame::Flow {
                handle: get_u32(&mut body)?,
                credit: get_u32(&mut body)?,
            },
            FrameType::Transfer => Frame::Transfer {
                handle: get_u32(&mut body)?,
                delivery_id: get_u32(&mut body)?,
                payload: get_bytes(&mut body)?,
            },
            FrameType::Disposition => Frame::Disposition {
                handle: get_u32(&mut body)?,
                delivery_id: get_u32(&mut body)?,
                outcome: match get_u8(&mut body)? {
                    0 => Outcome::Accepted,
                    1 => Outcome::Rejected,
                    2 => Outcome::Released,
                    other => {
                        return Err(LinkError::InvalidFrame(format!("invalid outcome {}", other)))
                    }
                },
            },
            FrameType::Empty => Frame::Empty,
        };

        if body.has_remaining() {
            return Err(LinkError::InvalidFrame(format!(
                "{} trailing bytes in {:?} frame",
                body.remaining(),
                frame.frame_type()
            )));
        }
        Ok(frame)
    }
}

/// Pull one complete frame off the front of a read buffer
///
/// Returns `Ok(None)` until the buffer holds a whole frame. Safe to call
/// repeatedly after every read.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < FrameHeader::SIZE {
        return Ok(None);
    }
    let header = FrameHeader::decode(&buf[..FrameHeader::SIZE])?;
    let size = header.size as usize;
    if buf.len() < size {
        buf.reserve(size - buf.len());
        return Ok(None);
    }
    let data = buf.split_to(size);
    Frame::decode(&data).map(Some)
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| LinkError::InvalidFrame(format!("string field too long: {} bytes", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn put_condition(buf: &mut BytesMut, cond: Option<&ErrorCondition>) -> Result<()> {
    match cond {
        Some(cond) => {
            buf.put_u8(1);
            put_str(buf, &cond.name)?;
            put_str(buf, &cond.description)?;
        }
        None => buf.put_u8(0),
    }
    Ok(())
}

fn need(body: &[u8], n: usize) -> Result<()> {
    if body.remaining() < n {
        return Err(LinkError::InvalidFrame(format!(
            "truncated body: need {} bytes, have {}",
            n,
            body.remaining()
        )));
    }
    Ok(())
}

fn get_u8(body: &mut &[u8]) -> Result<u8> {
    need(body, 1)?;
    Ok(body.get_u8())
}

fn get_u16(body: &mut &[u8]) -> Result<u16> {
    need(body, 2)?;
    Ok(body.get_u16())
}

fn get_u32(body: &mut &[u8]) -> Result<u32> {
    need(body, 4)?;
    Ok(body.get_u32())
}

fn get_str(body: &mut &[u8]) -> Result<String> {
    let len = get_u16(body)? as usize;
    need(body, len)?;
    let s = String::from_utf8(body[..len].to_vec())?;
    body.advance(len);
    Ok(s)
}

fn get_bytes(body: &mut &[u8]) -> Result<Bytes> {
    let len = get_u32(body)? as usize;
    need(body, len)?;
    let data = Bytes::copy_from_slice(&body[..len]);
    body.advance(len);
    Ok(data)
}

fn get_condition(body: &mut &[u8]) -> Result<Option<ErrorCondition>> {
    match get_u8(body)? {
        0 => Ok(None),
        _ => Ok(Some(ErrorCondition {
            name: get_str(body)?,
            description: get_str(body)?,
        })),
    }
}
