//! # Persisted Format
//!
//! Tree-shaped JSON: `{"root": {"type": "root", "version": 1, "children": [...]}}`.
//! Every record carries `type` and `version`; elements carry `children`, text
//! leaves carry `text`, and node-kind fields are flattened next to them.
//! Keys are not persisted: parsing assigns a fresh key to every node.

use crate::error::{EditorError, EditorResult};
use crate::key::{KeyGenerator, NodeKey, ROOT_KEY};
use crate::kinds::NodeRegistry;
use crate::node::{Fields, NodeBody, NodeRecord, NodeShape};
use crate::state::EditorState;
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field names owned by the format itself
pub const RESERVED_FIELDS: [&str; 4] = ["type", "version", "children", "text"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub node_type: String,

    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SerializedNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEditorState {
    pub root: SerializedNode,
}

pub(crate) fn export_state(state: &EditorState) -> EditorResult<SerializedEditorState> {
    Ok(SerializedEditorState {
        root: export_node(state.store(), state.registry(), ROOT_KEY)?,
    })
}

fn export_node(store: &NodeStore, registry: &NodeRegistry, key: &str) -> EditorResult<SerializedNode> {
    let rec = store.latest(key)?;
    let kind = registry.get(&rec.node_type)?;

    let children = if rec.is_element() {
        let children = store
            .children(key)
            .iter()
            .map(|child| export_node(store, registry, child))
            .collect::<EditorResult<Vec<_>>>()?;
        Some(children)
    } else {
        None
    };

    Ok(SerializedNode {
        node_type: rec.node_type.clone(),
        version: kind.version(),
        children,
        text: rec.text().map(str::to_string),
        fields: rec.fields.clone(),
    })
}

/// Parse a JSON document into a detached state (version 0, no selection)
pub fn parse_state(
    json: &str,
    registry: &Arc<NodeRegistry>,
    keys: &KeyGenerator,
) -> EditorResult<EditorState> {
    let serialized: SerializedEditorState = serde_json::from_str(json)?;
    import_state(serialized, registry, keys)
}

pub fn import_state(
    serialized: SerializedEditorState,
    registry: &Arc<NodeRegistry>,
    keys: &KeyGenerator,
) -> EditorResult<EditorState> {
    if serialized.root.node_type != ROOT_KEY {
        return Err(EditorError::Serialization(format!(
            "top-level node must be of type root, found {}",
            serialized.root.node_type
        )));
    }

    let mut records = Vec::new();
    let links = Links {
        key: NodeKey::root(),
        parent: None,
        prev: None,
        next: None,
    };
    import_node(serialized.root, links, registry, keys, &mut records)?;

    Ok(EditorState::from_parts(
        NodeStore::from_records(records),
        None,
        0,
        registry.clone(),
    ))
}

struct Links {
    key: NodeKey,
    parent: Option<NodeKey>,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

fn import_node(
    node: SerializedNode,
    links: Links,
    registry: &NodeRegistry,
    keys: &KeyGenerator,
    out: &mut Vec<NodeRecord>,
) -> EditorResult<()> {
    let kind = registry.get(&node.node_type)?;
    if node.version > kind.version() {
        return Err(EditorError::Serialization(format!(
            "{} version {} is newer than supported version {}",
            node.node_type,
            node.version,
            kind.version()
        )));
    }

    let mut stored = node.fields;
    if node.version < kind.version() {
        kind.migrate(&mut stored, node.version)?;
    }
    let mut fields = kind.default_fields();
    fields.extend(stored);

    let shape = kind.shape();
    let mut rec = NodeRecord::new(links.key.clone(), node.node_type.clone(), shape, fields);
    rec.parent = links.parent;
    rec.prev = links.prev;
    rec.next = links.next;

    if shape != NodeShape::Element && node.children.is_some() {
        return Err(EditorError::Serialization(format!(
            "{} cannot have children",
            node.node_type
        )));
    }

    match shape {
        NodeShape::Text => {
            rec.set_text(node.text.unwrap_or_default());
            out.push(rec);
        }
        NodeShape::Leaf => out.push(rec),
        NodeShape::Element => {
            let children = node.children.unwrap_or_default();
            if let Some(max) = kind.max_children() {
                if children.len() > max {
                    return Err(EditorError::Serialization(format!(
                        "{} allows at most {} children, found {}",
                        node.node_type,
                        max,
                        children.len()
                    )));
                }
            }

            let child_keys: Vec<NodeKey> = children.iter().map(|_| keys.next_key()).collect();
            rec.body = NodeBody::Element {
                first: child_keys.first().cloned(),
                last: child_keys.last().cloned(),
                size: child_keys.len(),
            };
            out.push(rec);

            for (i, child) in children.into_iter().enumerate() {
                let child_links = Links {
                    key: child_keys[i].clone(),
                    parent: Some(links.key.clone()),
                    prev: i.checked_sub(1).map(|p| child_keys[p].clone()),
                    next: child_keys.get(i + 1).cloned(),
                };
                import_node(child, child_links, registry, keys, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::with_builtins())
    }

    #[test]
    fn test_parse_assigns_fresh_linked_keys() {
        let doc = json!({
            "root": {
                "type": "root", "version": 1, "children": [
                    { "type": "paragraph", "version": 1, "children": [
                        { "type": "text", "version": 1, "text": "Hello" },
                        { "type": "linebreak", "version": 1 },
                        { "type": "text", "version": 1, "text": "World", "format": 1 }
                    ]}
                ]
            }
        });
        let keys = KeyGenerator::new();
        let state = parse_state(&doc.to_string(), &registry(), &keys).unwrap();

        assert_eq!(state.len(), 5);
        assert!(state.store().check_integrity().is_ok());
        assert_eq!(state.text_content(), "Hello\nWorld");

        let paragraph = state.store().children(ROOT_KEY)[0].clone();
        let texts = state.store().children(&paragraph);
        assert_eq!(texts.len(), 3);
        let last = state.node(&texts[2]).unwrap();
        assert_eq!(last.field("format"), Some(&json!(1)));
        assert_eq!(last.field("mode"), Some(&json!("normal")));
    }

    #[test]
    fn test_rejects_non_root_top_level() {
        let doc = r#"{"root": {"type": "paragraph", "version": 1, "children": []}}"#;
        let err = parse_state(doc, &registry(), &KeyGenerator::new()).unwrap_err();
        assert!(matches!(err, EditorError::Serialization(_)));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let doc = r#"{"root": {"type": "root", "version": 1, "children": [
            {"type": "table", "version": 1, "children": []}
        ]}}"#;
        let err = parse_state(doc, &registry(), &KeyGenerator::new()).unwrap_err();
        assert_eq!(err, EditorError::UnknownNodeType("table".into()));
    }

    #[test]
    fn test_rejects_children_on_leaf() {
        let doc = r#"{"root": {"type": "root", "version": 1, "children": [
            {"type": "text", "version": 1, "text": "x", "children": []}
        ]}}"#;
        assert!(parse_state(doc, &registry(), &KeyGenerator::new()).is_err());
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let doc = r#"{"root": {"type": "root", "children": []}}"#;
        let err = parse_state(doc, &registry(), &KeyGenerator::new()).unwrap_err();
        assert!(matches!(err, EditorError::Serialization(_)));
    }
}
