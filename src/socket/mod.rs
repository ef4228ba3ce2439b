pub mod consts;
pub mod error;
pub mod framing;

pub use error::{Result, SocketError};
pub use framing::{encode_frame, Frame, FrameDecoder};
