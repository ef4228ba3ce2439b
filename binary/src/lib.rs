pub mod attrs;
pub mod builder;
pub mod consts;
mod decoder;
mod encoder;
pub mod error;
pub mod jid;
pub mod node;
pub mod token;

pub use error::{BinaryError, Result};
pub use node::{Node, NodeContent};

use decoder::Decoder;
use encoder::Encoder;

/// Decodes one complete node tree from `data`.
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let mut decoder = Decoder::new(data);
    let node = decoder.read_node()?;

    if decoder.is_finished() {
        Ok(node)
    } else {
        Err(BinaryError::LeftoverData(decoder.bytes_left()))
    }
}

/// Encodes a `Node` into the tree bytes that go inside one frame.
pub fn marshal(node: &Node) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer);
    encoder.write_node(node)?;
    Ok(buffer)
}

/// Encodes the once-per-connection stream opener carrying server host and
/// resource. The caller frames the returned payload like any other frame
/// body and sends the `MESSAGE_START` magic separately, raw on the wire.
pub fn marshal_stream_open(server: &str, resource: &str) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer);
    encoder.write_stream_open(server, resource)?;
    Ok(buffer)
}
