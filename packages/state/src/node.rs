//! # Node Records
//!
//! A node is an addressable unit of content identified by a stable key.
//! Records are plain data: the sibling/parent structure is a doubly linked
//! list expressed through keys, so insert/remove/move rewrite a handful of
//! links instead of shifting arrays.
//!
//! ```text
//!            parent
//!      first ┌──┴──┐ last
//!            ▼     ▼
//!   None ◀── a ⇄ b ⇄ c ──▶ None
//!          prev    next
//! ```

use crate::key::NodeKey;
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

/// Node-kind-specific fields (format, indent, style, ...)
pub type Fields = serde_json::Map<String, Value>;

/// Structural capability of a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    /// Has children
    Element,
    /// Leaf carrying a text payload
    Text,
    /// Leaf without payload
    Leaf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Element {
        first: Option<NodeKey>,
        last: Option<NodeKey>,
        size: usize,
    },
    Text {
        text: String,
    },
    Leaf,
}

impl NodeBody {
    pub(crate) fn for_shape(shape: NodeShape) -> Self {
        match shape {
            NodeShape::Element => NodeBody::Element {
                first: None,
                last: None,
                size: 0,
            },
            NodeShape::Text => NodeBody::Text {
                text: String::new(),
            },
            NodeShape::Leaf => NodeBody::Leaf,
        }
    }

    pub fn shape(&self) -> NodeShape {
        match self {
            NodeBody::Element { .. } => NodeShape::Element,
            NodeBody::Text { .. } => NodeShape::Text,
            NodeBody::Leaf => NodeShape::Leaf,
        }
    }
}

/// One node as stored in a node map
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub(crate) key: NodeKey,
    pub(crate) node_type: String,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) prev: Option<NodeKey>,
    pub(crate) next: Option<NodeKey>,
    pub(crate) body: NodeBody,
    pub(crate) fields: Fields,
}

impl NodeRecord {
    pub fn new(key: NodeKey, node_type: impl Into<String>, shape: NodeShape, fields: Fields) -> Self {
        Self {
            key,
            node_type: node_type.into(),
            parent: None,
            prev: None,
            next: None,
            body: NodeBody::for_shape(shape),
            fields,
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn parent(&self) -> Option<&NodeKey> {
        self.parent.as_ref()
    }

    pub fn prev(&self) -> Option<&NodeKey> {
        self.prev.as_ref()
    }

    pub fn next(&self) -> Option<&NodeKey> {
        self.next.as_ref()
    }

    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    pub fn shape(&self) -> NodeShape {
        self.body.shape()
    }

    pub fn is_element(&self) -> bool {
        matches!(self.body, NodeBody::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, NodeBody::Text { .. })
    }

    pub fn first_child(&self) -> Option<&NodeKey> {
        match &self.body {
            NodeBody::Element { first, .. } => first.as_ref(),
            _ => None,
        }
    }

    pub fn last_child(&self) -> Option<&NodeKey> {
        match &self.body {
            NodeBody::Element { last, .. } => last.as_ref(),
            _ => None,
        }
    }

    /// Number of children (0 for leaves)
    pub fn size(&self) -> usize {
        match &self.body {
            NodeBody::Element { size, .. } => *size,
            _ => 0,
        }
    }

    /// Text payload of a text leaf
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    /// Same record under another key (for replacement factories)
    pub fn with_key(mut self, key: NodeKey) -> Self {
        self.key = key;
        self
    }

    /// Same record under another type tag (for replacement factories)
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub(crate) fn set_text(&mut self, value: String) -> bool {
        match &mut self.body {
            NodeBody::Text { text } => {
                *text = value;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn child_links_mut(
        &mut self,
    ) -> Option<(&mut Option<NodeKey>, &mut Option<NodeKey>, &mut usize)> {
        match &mut self.body {
            NodeBody::Element { first, last, size } => Some((first, last, size)),
            _ => None,
        }
    }
}

/// Read-only view of a node, stamped with the state version it was read from
///
/// Views are snapshots: they do not follow later writes. Handing a view from
/// a superseded version back to a transaction fails with `StaleReference`.
#[derive(Debug, Clone)]
pub struct Node {
    record: Arc<NodeRecord>,
    epoch: u64,
}

impl Node {
    pub(crate) fn new(record: Arc<NodeRecord>, epoch: u64) -> Self {
        Self { record, epoch }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }
}

impl Deref for Node {
    type Target = NodeRecord;

    fn deref(&self) -> &NodeRecord {
        &self.record
    }
}
