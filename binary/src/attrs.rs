use crate::error::{BinaryError, Result};
use crate::jid::Jid;
use crate::node::Node;

/// Error-accumulating attribute reader. Optional accessors never record an
/// error; required accessors record one when the attribute is missing or
/// malformed, and `finish()` reports everything at once.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(BinaryError::AttrList(self.errors.clone()))
        }
    }

    pub fn optional_string(&self, key: &str) -> Option<&'a str> {
        self.node.attrs.get(key).map(|s| s.as_str())
    }

    pub fn required_string(&mut self, key: &str) -> &'a str {
        match self.optional_string(key) {
            Some(v) => v,
            None => {
                self.errors.push(BinaryError::MissingAttr(key.to_string()));
                ""
            }
        }
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let raw = self.optional_string(key)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "attribute '{key}'='{raw}' is not an integer: {e}"
                )));
                None
            }
        }
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.optional_string(key)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors.push(BinaryError::Jid(e));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        if self.optional_string(key).is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
            return Jid::default();
        }
        self.optional_jid(key).unwrap_or_default()
    }
}
