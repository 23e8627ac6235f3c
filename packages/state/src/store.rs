//! # Node Store
//!
//! Arena mapping keys to records. A store is cheap to clone: both the map and
//! the records are reference counted, so a draft shares everything with the
//! committed version until it writes. The first write copies the map (entry
//! pointers only) and the touched record; untouched records stay shared.

use crate::error::{EditorError, EditorResult};
use crate::key::{NodeKey, ROOT_KEY};
use crate::kinds::NodeRegistry;
use crate::node::NodeRecord;
use std::collections::HashMap;
use std::sync::Arc;

type NodeMap = HashMap<NodeKey, Arc<NodeRecord>>;

#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Arc<NodeMap>,
}

impl NodeStore {
    pub(crate) fn from_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let nodes = records
            .into_iter()
            .map(|rec| (rec.key.clone(), Arc::new(rec)))
            .collect();
        Self {
            nodes: Arc::new(nodes),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<NodeRecord>> {
        self.nodes.get(key)
    }

    /// Like `get`, failing with `StaleReference` for keys that are not live
    pub fn latest(&self, key: &str) -> EditorResult<&Arc<NodeRecord>> {
        self.nodes.get(key).ok_or_else(|| EditorError::stale(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<NodeRecord>> {
        self.nodes.values()
    }

    /// True when both stores share the same map allocation
    pub fn ptr_eq(&self, other: &NodeStore) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }

    /// True when both stores hold the very same record allocation for `key`
    pub fn shares_record(&self, other: &NodeStore, key: &str) -> bool {
        match (self.get(key), other.get(key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Child keys in sibling order
    pub fn children(&self, key: &str) -> Vec<NodeKey> {
        let mut children = Vec::new();
        let mut cursor = self.get(key).and_then(|rec| rec.first_child().cloned());
        while let Some(child) = cursor {
            cursor = self.get(&child).and_then(|rec| rec.next.clone());
            children.push(child);
        }
        children
    }

    /// Walks parent links up to the root
    pub fn is_attached(&self, key: &str) -> bool {
        let mut cursor = match self.get(key) {
            Some(rec) if rec.key.is_root() => return true,
            Some(rec) => rec.parent.clone(),
            None => return false,
        };
        while let Some(parent) = cursor {
            if parent.is_root() {
                return true;
            }
            cursor = match self.get(&parent) {
                Some(rec) => rec.parent.clone(),
                None => return false,
            };
        }
        false
    }

    /// True if `ancestor` is `key` itself or on its parent chain
    pub fn is_ancestor_of(&self, ancestor: &str, key: &str) -> bool {
        let mut cursor = Some(NodeKey::from(key));
        while let Some(current) = cursor {
            if current.as_str() == ancestor {
                return true;
            }
            cursor = self.get(&current).and_then(|rec| rec.parent.clone());
        }
        false
    }

    /// `key` and every node linked below it, parents before children
    pub fn subtree(&self, key: &str) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![NodeKey::from(key)];
        while let Some(current) = stack.pop() {
            let Some(rec) = self.get(&current) else { continue };
            let children: Vec<NodeKey> = self
                .children(&current)
                .into_iter()
                .filter(|child| {
                    self.get(child)
                        .map(|c| c.parent.as_ref() == Some(&rec.key))
                        .unwrap_or(false)
                })
                .collect();
            out.push(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Flattened text content of `key`; block children are separated by a blank line
    pub fn text_content(&self, registry: &NodeRegistry, key: &str) -> String {
        let Some(rec) = self.get(key) else {
            return String::new();
        };
        if !rec.is_element() {
            return match registry.get(&rec.node_type) {
                Ok(kind) => kind.text_content(rec),
                Err(_) => rec.text().unwrap_or_default().to_string(),
            };
        }

        let children = self.children(key);
        let mut text = String::new();
        for (i, child) in children.iter().enumerate() {
            text.push_str(&self.text_content(registry, child));
            let is_block = self
                .get(child)
                .and_then(|c| registry.get(&c.node_type).ok())
                .map(|kind| !kind.is_inline())
                .unwrap_or(false);
            if is_block && i + 1 < children.len() {
                text.push_str("\n\n");
            }
        }
        text
    }

    /// Checks that every link has a matching back-link
    pub fn check_integrity(&self) -> Result<(), String> {
        if !self.contains(ROOT_KEY) {
            return Err("root node missing".into());
        }
        for rec in self.records() {
            if let Some(parent) = &rec.parent {
                let siblings = self.children(parent);
                let hits = siblings.iter().filter(|k| *k == &rec.key).count();
                if hits != 1 {
                    return Err(format!("{} appears {} times under {}", rec.key, hits, parent));
                }
            }
            if let Some((first, last, size)) = element_links(rec) {
                let children = self.children(&rec.key);
                if children.len() != size {
                    return Err(format!(
                        "{} records size {} but links {} children",
                        rec.key,
                        size,
                        children.len()
                    ));
                }
                if children.first() != first || children.last() != last {
                    return Err(format!("{} has inconsistent first/last links", rec.key));
                }
                for child in &children {
                    let parent = self.get(child).and_then(|c| c.parent.as_ref());
                    if parent != Some(&rec.key) {
                        return Err(format!("{} is linked under {} without a back-link", child, rec.key));
                    }
                }
            }
            if let Some(next) = &rec.next {
                let back = self.get(next).and_then(|n| n.prev.as_ref());
                if back != Some(&rec.key) {
                    return Err(format!("{} -> {} has no matching prev link", rec.key, next));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, record: NodeRecord) {
        Arc::make_mut(&mut self.nodes).insert(record.key.clone(), Arc::new(record));
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Arc<NodeRecord>> {
        Arc::make_mut(&mut self.nodes).remove(key)
    }

    /// Mutable access, copying the map and the record if they are shared
    pub(crate) fn record_mut(&mut self, key: &str) -> Option<&mut NodeRecord> {
        Arc::make_mut(&mut self.nodes).get_mut(key).map(Arc::make_mut)
    }
}

fn element_links(rec: &NodeRecord) -> Option<(Option<&NodeKey>, Option<&NodeKey>, usize)> {
    if rec.is_element() {
        Some((rec.first_child(), rec.last_child(), rec.size()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Fields, NodeBody, NodeShape};

    fn element(key: &str, node_type: &str) -> NodeRecord {
        NodeRecord::new(key.into(), node_type, NodeShape::Element, Fields::new())
    }

    fn text(key: &str, value: &str) -> NodeRecord {
        let mut rec = NodeRecord::new(key.into(), "text", NodeShape::Text, Fields::new());
        rec.set_text(value.to_string());
        rec
    }

    /// root > p(1) > [t(2) "ab", t(3) "cd"], p(4) > [t(5) "ef"]
    fn sample() -> NodeStore {
        let mut root = element("root", "root");
        root.body = NodeBody::Element {
            first: Some("1".into()),
            last: Some("4".into()),
            size: 2,
        };
        let mut p1 = element("1", "paragraph");
        p1.parent = Some("root".into());
        p1.next = Some("4".into());
        p1.body = NodeBody::Element {
            first: Some("2".into()),
            last: Some("3".into()),
            size: 2,
        };
        let mut t2 = text("2", "ab");
        t2.parent = Some("1".into());
        t2.next = Some("3".into());
        let mut t3 = text("3", "cd");
        t3.parent = Some("1".into());
        t3.prev = Some("2".into());
        let mut p4 = element("4", "paragraph");
        p4.parent = Some("root".into());
        p4.prev = Some("1".into());
        p4.body = NodeBody::Element {
            first: Some("5".into()),
            last: Some("5".into()),
            size: 1,
        };
        let mut t5 = text("5", "ef");
        t5.parent = Some("4".into());
        NodeStore::from_records(vec![root, p1, t2, t3, p4, t5])
    }

    #[test]
    fn test_children_in_order() {
        let store = sample();
        assert_eq!(store.children("root"), vec![NodeKey::from("1"), NodeKey::from("4")]);
        assert_eq!(store.children("1"), vec![NodeKey::from("2"), NodeKey::from("3")]);
        assert!(store.children("2").is_empty());
    }

    #[test]
    fn test_text_content_separates_blocks() {
        let store = sample();
        let registry = NodeRegistry::with_builtins();
        assert_eq!(store.text_content(&registry, "root"), "abcd\n\nef");
        assert_eq!(store.text_content(&registry, "1"), "abcd");
    }

    #[test]
    fn test_attachment_and_ancestry() {
        let mut store = sample();
        assert!(store.is_attached("3"));
        assert!(store.is_ancestor_of("root", "3"));
        assert!(store.is_ancestor_of("1", "3"));
        assert!(!store.is_ancestor_of("4", "3"));

        store.insert(text("9", "loose"));
        assert!(!store.is_attached("9"));
        assert!(!store.is_attached("missing"));
    }

    #[test]
    fn test_subtree_parents_first() {
        let store = sample();
        let keys: Vec<String> = store.subtree("root").iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["root", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_copy_on_write_shares_untouched_records() {
        let committed = sample();
        let mut draft = committed.clone();
        assert!(draft.ptr_eq(&committed));

        draft.record_mut("2").unwrap().set_text("xy".into());

        assert!(!draft.ptr_eq(&committed));
        assert!(draft.shares_record(&committed, "3"));
        assert!(!draft.shares_record(&committed, "2"));
        assert_eq!(committed.get("2").unwrap().text(), Some("ab"));
    }

    #[test]
    fn test_integrity_detects_broken_links() {
        let mut store = sample();
        assert!(store.check_integrity().is_ok());
        store.record_mut("3").unwrap().prev = None;
        assert!(store.check_integrity().is_err());
    }
}
