use std::fmt;

use indexmap::IndexMap;

use crate::attrs::AttrParser;

/// Attribute order matters for the wire encoding, so attributes live in an
/// insertion-ordered map.
pub type Attrs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    Nodes(Vec<Node>),
}

/// The in-memory tree representation of a single protocol element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    /// The node's payload as bytes, if it has one.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// The node's payload decoded as UTF-8, if it has one.
    pub fn content_string(&self) -> Option<String> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }

    /// Finds the first direct child with the given tag.
    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    /// Walks a path of tags, descending one matching child per step.
    pub fn get_optional_child_by_tag<'a>(&'a self, tags: &[&str]) -> Option<&'a Node> {
        let mut current_node = self;
        for &tag in tags {
            match current_node.children() {
                Some(children) => match children.iter().find(|c| c.tag == tag) {
                    Some(found) => current_node = found,
                    None => return None,
                },
                None => return None,
            }
        }
        Some(current_node)
    }

    /// Returns all direct children with the given tag.
    pub fn get_children_by_tag(&self, tag: &str) -> Vec<&Node> {
        match self.children() {
            Some(children) => children.iter().filter(|c| c.tag == tag).collect(),
            None => Vec::new(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (key, value) in &self.attrs {
            write!(f, " {key}={value:?}")?;
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::Bytes(b)) => match std::str::from_utf8(b) {
                Ok(s) if s.chars().all(|c| !c.is_control()) => {
                    write!(f, ">{s}</{}>", self.tag)
                }
                _ => write!(f, ">[{} bytes]</{}>", b.len(), self.tag),
            },
            Some(NodeContent::Nodes(nodes)) => {
                write!(f, ">")?;
                for node in nodes {
                    write!(f, "{node}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}
