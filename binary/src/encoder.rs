use std::io::Write;

use crate::error::Result;
use crate::node::{Attrs, Node, NodeContent};
use crate::token;

pub(crate) struct Encoder<W: Write> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.writer.write_all(&[val])?;
        Ok(())
    }

    fn write_u16_be(&mut self, val: u16) -> Result<()> {
        self.writer.write_all(&val.to_be_bytes())?;
        Ok(())
    }

    fn write_u20_be(&mut self, value: u32) -> Result<()> {
        self.writer.write_all(&[
            ((value >> 16) & 0x0F) as u8,
            ((value >> 8) & 0xFF) as u8,
            (value & 0xFF) as u8,
        ])?;
        Ok(())
    }

    fn write_u32_be(&mut self, val: u32) -> Result<()> {
        self.writer.write_all(&val.to_be_bytes())?;
        Ok(())
    }

    fn write_bytes_with_len(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        if len < 256 {
            self.write_u8(token::BINARY_8)?;
            self.write_u8(len as u8)?;
        } else if len < (1 << 20) {
            self.write_u8(token::BINARY_20)?;
            self.write_u20_be(len as u32)?;
        } else {
            self.write_u8(token::BINARY_31)?;
            self.write_u32_be(len as u32 & 0x7FFF_FFFF)?;
        }
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if let Some(tok) = token::index_of_single_token(s) {
            self.write_u8(tok)?;
        } else if let Some((dict, tok)) = token::index_of_double_byte_token(s) {
            self.write_u8(token::DICTIONARY_0 + dict)?;
            self.write_u8(tok)?;
        } else if Self::validate_nibble(s) {
            self.write_packed_bytes(s, token::NIBBLE_8)?;
        } else if Self::validate_hex(s) {
            self.write_packed_bytes(s, token::HEX_8)?;
        } else if let Some((user, server)) = Self::parse_jid(s) {
            self.write_jid(user, server)?;
        } else {
            self.write_bytes_with_len(s.as_bytes())?;
        }
        Ok(())
    }

    /// Splits `user@server` for the compact JID form. Only applies when the
    /// server half is itself a dictionary token, so arbitrary strings with an
    /// `@` still round-trip as literals.
    fn parse_jid(input: &str) -> Option<(&str, &str)> {
        let (user, server) = input.split_once('@')?;
        if user.is_empty() || token::index_of_single_token(server).is_none() {
            return None;
        }
        Some((user, server))
    }

    fn write_jid(&mut self, user: &str, server: &str) -> Result<()> {
        self.write_u8(token::JID_PAIR)?;
        self.write_string(user)?;
        self.write_string(server)?;
        Ok(())
    }

    fn validate_nibble(value: &str) -> bool {
        !value.is_empty()
            && value.len() <= token::PACKED_MAX as usize
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-' || c == '.')
    }

    fn pack_nibble(value: char) -> u8 {
        match value {
            '-' => 10,
            '.' => 11,
            '\x00' => 15,
            c if c.is_ascii_digit() => c as u8 - b'0',
            _ => unreachable!("validate_nibble admitted {value:?}"),
        }
    }

    fn validate_hex(value: &str) -> bool {
        !value.is_empty()
            && value.len() <= token::PACKED_MAX as usize
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    }

    fn pack_hex(value: char) -> u8 {
        match value {
            c if c.is_ascii_digit() => c as u8 - b'0',
            c if ('A'..='F').contains(&c) => 10 + (c as u8 - b'A'),
            '\x00' => 15,
            _ => unreachable!("validate_hex admitted {value:?}"),
        }
    }

    fn write_packed_bytes(&mut self, value: &str, data_type: u8) -> Result<()> {
        let packer: fn(char) -> u8 = if data_type == token::NIBBLE_8 {
            Self::pack_nibble
        } else {
            Self::pack_hex
        };

        self.write_u8(data_type)?;

        let mut rounded_len = value.len().div_ceil(2) as u8;
        if value.len() % 2 != 0 {
            rounded_len |= 0x80;
        }
        self.write_u8(rounded_len)?;

        let mut chars = value.chars();
        while let Some(first) = chars.next() {
            let second = chars.next().unwrap_or('\x00');
            self.write_u8((packer(first) << 4) | packer(second))?;
        }
        Ok(())
    }

    fn write_list_start(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            self.write_u8(token::LIST_EMPTY)?;
        } else if len < 256 {
            self.write_u8(token::LIST_8)?;
            self.write_u8(len as u8)?;
        } else {
            self.write_u8(token::LIST_16)?;
            self.write_u16_be(len as u16)?;
        }
        Ok(())
    }

    fn write_attributes(&mut self, attrs: &Attrs) -> Result<()> {
        for (key, value) in attrs {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    fn write_content(&mut self, content: &NodeContent) -> Result<()> {
        match content {
            NodeContent::Bytes(bytes) => self.write_bytes_with_len(bytes)?,
            NodeContent::Nodes(nodes) => {
                self.write_list_start(nodes.len())?;
                for node in nodes {
                    self.write_node(node)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_node(&mut self, node: &Node) -> Result<()> {
        // Children win over a payload when both are present in memory.
        let content = match &node.content {
            Some(NodeContent::Nodes(nodes)) if nodes.is_empty() => None,
            other => other.as_ref(),
        };
        let list_len = 1 + (node.attrs.len() * 2) + usize::from(content.is_some());

        self.write_list_start(list_len)?;
        self.write_string(&node.tag)?;
        self.write_attributes(&node.attrs)?;

        if let Some(content) = content {
            self.write_content(content)?;
        }
        Ok(())
    }

    /// The stream opener: a list opened by the `STREAM_START` marker
    /// carrying the server host and resource pair. The `MESSAGE_START`
    /// magic travels separately, raw on the wire.
    pub(crate) fn write_stream_open(&mut self, server: &str, resource: &str) -> Result<()> {
        self.write_list_start(1 + 2 * 2)?;
        self.write_u8(token::STREAM_START)?;
        self.write_string("to")?;
        self.write_string(server)?;
        self.write_string("resource")?;
        self.write_bytes_with_len(resource.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Attrs;

    type TestResult = crate::error::Result<()>;

    fn encode(node: &Node) -> Vec<u8> {
        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_node(node).unwrap();
        buffer
    }

    #[test]
    fn test_encode_tokenized_node() {
        let node = Node::new(
            "message",
            [("type".to_string(), "text".to_string())]
                .into_iter()
                .collect(),
            None,
        );
        let buffer = encode(&node);

        let message_tok = token::index_of_single_token("message").unwrap();
        let type_tok = token::index_of_single_token("type").unwrap();
        let text_tok = token::index_of_single_token("text").unwrap();
        assert_eq!(
            buffer,
            vec![token::LIST_8, 3, message_tok, type_tok, text_tok]
        );
    }

    #[test]
    fn test_encode_literal_tag() {
        let node = Node::new("zzz-not-a-token", Attrs::new(), None);
        let buffer = encode(&node);
        assert_eq!(buffer[0], token::LIST_8);
        assert_eq!(buffer[1], 1);
        assert_eq!(buffer[2], token::BINARY_8);
        assert_eq!(buffer[3], 15);
        assert_eq!(&buffer[4..], b"zzz-not-a-token");
    }

    #[test]
    fn test_nibble_packing() {
        let node = Node::new(
            "t",
            [("t".to_string(), "-.0123456789".to_string())]
                .into_iter()
                .collect(),
            None,
        );
        let buffer = encode(&node);
        let tail = &buffer[buffer.len() - 8..];
        assert_eq!(tail[0], token::NIBBLE_8);
        assert_eq!(tail[1], 6);
        assert_eq!(&tail[2..], &[0xAB, 0x01, 0x23, 0x45, 0x67, 0x89]);
    }

    #[test]
    fn test_nibble_odd_length_sets_half_byte_flag() {
        let node = Node::new(
            "t",
            [("t".to_string(), "123".to_string())].into_iter().collect(),
            None,
        );
        let buffer = encode(&node);
        let tail = &buffer[buffer.len() - 4..];
        assert_eq!(tail[0], token::NIBBLE_8);
        assert_eq!(tail[1], 0x80 | 2);
        assert_eq!(&tail[2..], &[0x12, 0x3F]);
    }

    #[test]
    fn test_hex_validation() {
        assert!(Encoder::<Vec<u8>>::validate_hex("0123456789ABCDEF"));
        assert!(Encoder::<Vec<u8>>::validate_hex("DEADBEEF"));
        assert!(!Encoder::<Vec<u8>>::validate_hex("deadbeef"));
        assert!(!Encoder::<Vec<u8>>::validate_hex(""));
        assert!(!Encoder::<Vec<u8>>::validate_hex("G1"));
    }

    #[test]
    fn test_nibble_validation() {
        assert!(Encoder::<Vec<u8>>::validate_nibble("123-456.789"));
        assert!(!Encoder::<Vec<u8>>::validate_nibble("123abc"));
        assert!(!Encoder::<Vec<u8>>::validate_nibble(""));
        let over_max = "0".repeat(token::PACKED_MAX as usize + 1);
        assert!(!Encoder::<Vec<u8>>::validate_nibble(&over_max));
    }

    #[test]
    fn test_jid_pair_form() {
        let node = Node::new(
            "presence",
            [("from".to_string(), "49123@s.whatsapp.net".to_string())]
                .into_iter()
                .collect(),
            None,
        );
        let buffer = encode(&node);
        let pos = buffer
            .iter()
            .position(|&b| b == token::JID_PAIR)
            .expect("jid pair marker present");
        // user half is number-like, so it packs as nibbles
        assert_eq!(buffer[pos + 1], token::NIBBLE_8);
    }

    #[test]
    fn test_binary_length_boundaries() -> TestResult {
        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_bytes_with_len(&[0x42; 255])?;
        assert_eq!(buffer[0], token::BINARY_8);
        assert_eq!(buffer[1], 255);

        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_bytes_with_len(&[0x42; 256])?;
        assert_eq!(buffer[0], token::BINARY_20);
        assert_eq!(&buffer[1..4], &[0x00, 0x01, 0x00]);
        Ok(())
    }

    #[test]
    fn test_list_size_boundaries() -> TestResult {
        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_list_start(255)?;
        assert_eq!(buffer, vec![token::LIST_8, 255]);

        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_list_start(256)?;
        assert_eq!(buffer, vec![token::LIST_16, 0x01, 0x00]);

        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_list_start(0)?;
        assert_eq!(buffer, vec![token::LIST_EMPTY]);
        Ok(())
    }

    #[test]
    fn test_stream_open_payload() -> TestResult {
        let mut buffer = Vec::new();
        Encoder::new(&mut buffer).write_stream_open("s.whatsapp.net", "S40-2.4.7-443")?;
        assert_eq!(buffer[0], token::LIST_8);
        assert_eq!(buffer[1], 5);
        assert_eq!(buffer[2], token::STREAM_START);
        Ok(())
    }
}
