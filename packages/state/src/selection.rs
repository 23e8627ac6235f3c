//! Selection value carried by every state snapshot.
//!
//! The engine only stores and copies selections; caret and range geometry
//! belongs to the selection model layered on top.

use crate::key::NodeKey;
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Text,
    Element,
}

/// Position inside a node: a character offset for text, a child index for elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Text,
        }
    }

    pub fn element(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Element,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Selection {
    Range { anchor: Point, focus: Point },
    Node { keys: Vec<NodeKey> },
}

impl Selection {
    pub fn range(anchor: Point, focus: Point) -> Self {
        Selection::Range { anchor, focus }
    }

    pub fn caret(point: Point) -> Self {
        Selection::Range {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn nodes(keys: impl IntoIterator<Item = NodeKey>) -> Self {
        Selection::Node {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn is_collapsed(&self) -> bool {
        match self {
            Selection::Range { anchor, focus } => anchor == focus,
            Selection::Node { .. } => false,
        }
    }

    /// Keys the selection points into
    pub fn keys(&self) -> Vec<&NodeKey> {
        match self {
            Selection::Range { anchor, focus } => vec![&anchor.key, &focus.key],
            Selection::Node { keys } => keys.iter().collect(),
        }
    }

    pub(crate) fn is_valid_in(&self, store: &NodeStore) -> bool {
        self.keys().into_iter().all(|key| store.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_is_collapsed() {
        let caret = Selection::caret(Point::text("3", 1));
        assert!(caret.is_collapsed());
        let range = Selection::range(Point::text("3", 0), Point::text("3", 2));
        assert!(!range.is_collapsed());
    }

    #[test]
    fn test_selection_json_shape() {
        let sel = Selection::nodes(vec![NodeKey::from("4")]);
        let json = serde_json::to_value(&sel).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "node", "keys": ["4"] }));
    }
}
