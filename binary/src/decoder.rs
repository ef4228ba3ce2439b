use crate::error::{BinaryError, Result};
use crate::node::{Attrs, Node, NodeContent};
use crate::token;

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.position >= self.data.len()
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.data.len() - self.position
    }

    fn check_eos(&self, len: usize) -> Result<()> {
        if self.bytes_left() >= len {
            Ok(())
        } else {
            Err(BinaryError::UnexpectedEof)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        self.check_eos(2)?;
        let value = u16::from_be_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        Ok(value)
    }

    fn read_u20_be(&mut self) -> Result<u32> {
        self.check_eos(3)?;
        let bytes = &self.data[self.position..self.position + 3];
        self.position += 3;
        Ok(((bytes[0] as u32 & 0x0F) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        self.check_eos(4)?;
        let value = u32::from_be_bytes(
            self.data[self.position..self.position + 4]
                .try_into()
                .expect("slice of length 4"),
        );
        self.position += 4;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.check_eos(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match tag {
            token::LIST_EMPTY => Ok(0),
            token::LIST_8 => self.read_u8().map(|v| v as usize),
            token::LIST_16 => self.read_u16_be().map(|v| v as usize),
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_jid_pair(&mut self) -> Result<String> {
        let user = self.read_value_as_string()?.unwrap_or_default();
        let server = self.read_value_as_string()?.unwrap_or_default();
        Ok(format!("{user}@{server}"))
    }

    fn read_value_as_string(&mut self) -> Result<Option<String>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let size = self.read_u8()? as usize;
                self.read_string(size).map(Some)
            }
            token::BINARY_20 => {
                let size = self.read_u20_be()? as usize;
                self.read_string(size).map(Some)
            }
            token::BINARY_31 => {
                let size = self.read_u32_be()? as usize;
                self.read_string(size).map(Some)
            }
            token::JID_PAIR => self.read_jid_pair().map(Some),
            token::NIBBLE_8 | token::HEX_8 => self.read_packed(tag).map(Some),
            tag @ token::DICTIONARY_0..=token::DICTIONARY_7 => {
                let index = self.read_u8()?;
                token::get_double_token(tag - token::DICTIONARY_0, index)
                    .map(|s| Some(s.to_string()))
                    .ok_or(BinaryError::InvalidToken(index))
            }
            _ => token::get_single_token(tag)
                .map(|s| Some(s.to_string()))
                .ok_or(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_packed(&mut self, tag: u8) -> Result<String> {
        let packed_len_byte = self.read_u8()?;
        let is_half_byte = (packed_len_byte & 0x80) != 0;
        let len = (packed_len_byte & 0x7F) as usize;

        let mut result = String::with_capacity(len * 2);
        let packed_data = self.read_bytes(len)?;

        for &byte in packed_data {
            result.push(Self::unpack_byte(tag, (byte & 0xF0) >> 4)?);
            result.push(Self::unpack_byte(tag, byte & 0x0F)?);
        }

        if is_half_byte {
            result.pop();
        }

        Ok(result)
    }

    fn unpack_byte(tag: u8, value: u8) -> Result<char> {
        match tag {
            token::NIBBLE_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10 => Ok('-'),
                11 => Ok('.'),
                15 => Ok('\x00'),
                _ => Err(BinaryError::InvalidToken(value)),
            },
            token::HEX_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10..=15 => Ok((b'A' + value - 10) as char),
                _ => Err(BinaryError::InvalidToken(value)),
            },
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_attributes(&mut self, size: usize) -> Result<Attrs> {
        let mut attrs = Attrs::with_capacity(size);
        for _ in 0..size {
            let key = self
                .read_value_as_string()?
                .ok_or(BinaryError::NonStringKey)?;
            let value = self.read_value_as_string()?.unwrap_or_default();
            attrs.insert(key, value);
        }
        Ok(attrs)
    }

    fn read_content(&mut self) -> Result<Option<NodeContent>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_31 => {
                let len = self.read_u32_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::LIST_8 | token::LIST_16 => {
                let size = self.read_list_size(tag)?;
                let mut nodes = Vec::with_capacity(size);
                for _ in 0..size {
                    nodes.push(self.read_node()?);
                }
                Ok(Some(NodeContent::Nodes(nodes)))
            }
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    pub(crate) fn read_node(&mut self) -> Result<Node> {
        let tag = self.read_u8()?;
        let list_size = self.read_list_size(tag)?;
        if list_size == 0 {
            return Err(BinaryError::InvalidNode);
        }

        let tag = self
            .read_value_as_string()?
            .ok_or(BinaryError::InvalidNode)?;

        let attr_count = (list_size - 1) / 2;
        let has_content = list_size % 2 == 0;

        let attrs = self.read_attributes(attr_count)?;
        let content = if has_content {
            self.read_content()?
        } else {
            None
        };

        Ok(Node {
            tag,
            attrs,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::{marshal, unmarshal};

    #[test]
    fn test_roundtrip_preserves_attr_order() {
        let node = NodeBuilder::new("iq")
            .attr("id", "42")
            .attr("xmlns", "jabber:iq:last")
            .attr("type", "get")
            .attr("to", "31000000000@s.whatsapp.net")
            .build();

        let decoded = unmarshal(&marshal(&node).unwrap()).unwrap();
        let keys: Vec<&String> = decoded.attrs.keys().collect();
        assert_eq!(keys, ["id", "xmlns", "type", "to"]);
    }

    #[test]
    fn test_roundtrip_nested_children() {
        let node = NodeBuilder::new("notification")
            .attr("type", "participant")
            .children([NodeBuilder::new("add")
                .children([NodeBuilder::new("participant")
                    .attr("jid", "31000000000@s.whatsapp.net")
                    .build()])
                .build()])
            .build();
        let decoded = unmarshal(&marshal(&node).unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_roundtrip_packed_attr_values() {
        let node = NodeBuilder::new("receipt")
            .attr("t", "1700000000")
            .attr("id", "DEADBEEF")
            .build();
        let decoded = unmarshal(&marshal(&node).unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_roundtrip_large_payload() {
        let node = NodeBuilder::new("media").bytes(vec![0x5A; 300]).build();
        let decoded = unmarshal(&marshal(&node).unwrap()).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_unknown_token_is_fatal() {
        // 244 is in the reserved gap between the dictionaries and LIST_8
        let data = [token::LIST_8, 1, 244];
        assert!(matches!(
            unmarshal(&data),
            Err(BinaryError::InvalidToken(244))
        ));
    }

    #[test]
    fn test_truncated_input_is_eof() {
        let node = NodeBuilder::new("message").attr("id", "abc").build();
        let data = marshal(&node).unwrap();
        assert!(matches!(
            unmarshal(&data[..data.len() - 1]),
            Err(BinaryError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_empty_list_node_is_invalid() {
        let data = [token::LIST_EMPTY];
        assert!(matches!(unmarshal(&data), Err(BinaryError::InvalidNode)));
    }
}
