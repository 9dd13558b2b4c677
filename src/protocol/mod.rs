//! Wire protocol module
//!
//! Frame layout and the message payload carried by transfers.

pub mod frame;
pub mod message;

// Re-export commonly used types
pub use frame::{
    decode_frame, Frame, FrameHeader, FrameType, Outcome, Role, SaslCode, MAX_FRAME_SIZE,
};
pub use message::Message;
