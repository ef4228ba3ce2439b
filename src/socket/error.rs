use thiserror::Error;

use crate::crypto::KeyStreamError;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Socket is closed")]
    SocketClosed,
    #[error("Socket is already open")]
    SocketAlreadyOpen,
    #[error("Frame is too large (max: {max}, got: {got})")]
    FrameTooLarge { max: usize, got: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame crypto error: {0}")]
    KeyStream(#[from] KeyStreamError),
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;
