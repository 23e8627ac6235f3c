//! # Draft
//!
//! The single in-progress working copy of the node graph.
//!
//! A draft starts out sharing everything with the committed state it was
//! cloned from. `get_writable` is the only way to mutate a record: the first
//! write copies the record into the draft, and every write marks the key
//! dirty and propagates dirtiness to its ancestors. Every structural
//! operation goes through `get_writable` for each node whose links change.
//!
//! Dirty keys are tracked twice:
//! - `dirty_*` accumulate over the whole transaction and feed the diff
//! - `pass_*` hold keys dirtied since the transform scheduler last looked

use crate::error::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::node::{NodeBody, NodeRecord};
use crate::selection::Selection;
use crate::serialize::RESERVED_FIELDS;
use crate::state::EditorState;
use crate::store::NodeStore;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) struct Draft {
    pub(crate) store: NodeStore,
    pub(crate) selection: Option<Selection>,

    /// Committed state this draft was cloned from
    pub(crate) base: Arc<EditorState>,

    pub(crate) dirty_leaves: IndexSet<NodeKey>,
    /// Element key → intentionally marked (written directly, not via propagation)
    pub(crate) dirty_elements: IndexMap<NodeKey, bool>,
    pub(crate) pass_leaves: IndexSet<NodeKey>,
    pub(crate) pass_elements: IndexMap<NodeKey, bool>,

    /// Mutators that landed in this draft, outermost and nested alike
    pub(crate) callback_count: usize,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) on_update: Vec<Box<dyn FnOnce()>>,

    /// Commit synchronously once the callback stack unwinds
    pub(crate) flush_sync: bool,

    /// Set when a nested mutator failed; the whole draft is discarded
    pub(crate) aborted: Option<EditorError>,
}

impl Draft {
    pub(crate) fn new(base: Arc<EditorState>) -> Self {
        Self {
            store: base.store().clone(),
            selection: base.selection().cloned(),
            base,
            dirty_leaves: IndexSet::new(),
            dirty_elements: IndexMap::new(),
            pass_leaves: IndexSet::new(),
            pass_elements: IndexMap::new(),
            callback_count: 0,
            tags: BTreeSet::new(),
            on_update: Vec::new(),
            flush_sync: false,
            aborted: None,
        }
    }

    /// Version the draft will commit as; node views read from it carry this stamp
    pub(crate) fn epoch(&self) -> u64 {
        self.base.version() + 1
    }

    pub(crate) fn has_dirty_nodes(&self) -> bool {
        !self.dirty_leaves.is_empty() || !self.dirty_elements.is_empty()
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.has_dirty_nodes() || self.selection.as_ref() != self.base.selection()
    }

    pub(crate) fn clear_pass(&mut self) {
        self.pass_leaves.clear();
        self.pass_elements.clear();
    }

    /// Freeze into the next committed version
    pub(crate) fn to_state(&self) -> EditorState {
        let selection = self
            .selection
            .clone()
            .filter(|sel| sel.is_valid_in(&self.store));
        EditorState::from_parts(
            self.store.clone(),
            selection,
            self.epoch(),
            self.base.registry().clone(),
        )
    }

    /// Clone-on-first-write access to a record; marks it and its ancestors dirty
    pub(crate) fn get_writable(&mut self, key: &str) -> EditorResult<&mut NodeRecord> {
        let (node_key, is_element, parent) = {
            let rec = self.store.latest(key)?;
            (rec.key.clone(), rec.is_element(), rec.parent.clone())
        };
        self.mark_dirty(&node_key, is_element, parent);
        self.store.record_mut(key).ok_or_else(|| EditorError::stale(key))
    }

    fn mark_dirty(&mut self, key: &NodeKey, is_element: bool, parent: Option<NodeKey>) {
        if is_element {
            self.pass_elements.insert(key.clone(), true);
            self.dirty_elements.insert(key.clone(), true);
        } else {
            self.pass_leaves.insert(key.clone());
            self.dirty_leaves.insert(key.clone());
        }
        self.mark_ancestors_dirty(parent);
    }

    fn mark_ancestors_dirty(&mut self, mut cursor: Option<NodeKey>) {
        while let Some(key) = cursor {
            if self.pass_elements.contains_key(&key) {
                return;
            }
            cursor = self.store.get(&key).and_then(|rec| rec.parent.clone());
            self.dirty_elements.entry(key.clone()).or_insert(false);
            self.pass_elements.insert(key, false);
        }
    }

    /// Add a freshly constructed node, detached
    pub(crate) fn create(&mut self, mut record: NodeRecord) -> EditorResult<NodeKey> {
        if self.store.contains(&record.key) {
            return Err(EditorError::KeyCollision(record.key.to_string()));
        }
        record.parent = None;
        record.prev = None;
        record.next = None;
        if record.is_element() {
            record.body = NodeBody::Element {
                first: None,
                last: None,
                size: 0,
            };
        }

        let key = record.key.clone();
        let is_element = record.is_element();
        self.store.insert(record);
        self.mark_dirty(&key, is_element, None);
        Ok(key)
    }

    /// Unlink a node from its parent; a detached node is left alone
    pub(crate) fn detach(&mut self, key: &str) -> EditorResult<()> {
        let rec = self.store.latest(key)?.clone();
        let Some(parent) = rec.parent.clone() else {
            return Ok(());
        };

        self.get_writable(key)?;
        {
            let parent_rec = self.get_writable(&parent)?;
            let (first, last, size) = parent_rec
                .child_links_mut()
                .ok_or_else(|| EditorError::InvalidOperation(format!("{} is not an element", parent)))?;
            if rec.prev.is_none() {
                *first = rec.next.clone();
            }
            if rec.next.is_none() {
                *last = rec.prev.clone();
            }
            *size = size.saturating_sub(1);
        }
        if let Some(prev) = &rec.prev {
            self.get_writable(prev)?.next = rec.next.clone();
        }
        if let Some(next) = &rec.next {
            self.get_writable(next)?.prev = rec.prev.clone();
        }

        let node = self.store.record_mut(key).ok_or_else(|| EditorError::stale(key))?;
        node.parent = None;
        node.prev = None;
        node.next = None;
        Ok(())
    }

    /// Link a detached node into `parent` between two adjacent children
    fn link(
        &mut self,
        key: &str,
        parent: &str,
        prev: Option<NodeKey>,
        next: Option<NodeKey>,
    ) -> EditorResult<()> {
        let node_key = self.store.latest(key)?.key.clone();
        {
            let parent_rec = self.get_writable(parent)?;
            let (first, last, size) = parent_rec
                .child_links_mut()
                .ok_or_else(|| EditorError::InvalidOperation(format!("{} cannot have children", parent)))?;
            if prev.is_none() {
                *first = Some(node_key.clone());
            }
            if next.is_none() {
                *last = Some(node_key.clone());
            }
            *size += 1;
        }
        if let Some(prev) = &prev {
            self.get_writable(prev)?.next = Some(node_key.clone());
        }
        if let Some(next) = &next {
            self.get_writable(next)?.prev = Some(node_key.clone());
        }

        let parent_key = self.store.latest(parent)?.key.clone();
        let node = self.get_writable(key)?;
        node.parent = Some(parent_key);
        node.prev = prev;
        node.next = next;
        Ok(())
    }

    fn validate_insert(&self, key: &str, parent: &str) -> EditorResult<()> {
        let node = self.store.latest(key)?;
        if node.key.is_root() {
            return Err(EditorError::InvalidOperation("the root cannot be moved".into()));
        }
        let parent_rec = self.store.latest(parent)?;
        if !parent_rec.is_element() {
            return Err(EditorError::InvalidOperation(format!(
                "{} ({}) cannot have children",
                parent, parent_rec.node_type
            )));
        }
        if self.store.is_ancestor_of(key, parent) {
            return Err(EditorError::InvalidOperation(format!(
                "inserting {} under {} would create a cycle",
                key, parent
            )));
        }

        let kind = self.base.registry().get(&parent_rec.node_type)?;
        if let Some(max) = kind.max_children() {
            let already_child = node.parent.as_deref() == Some(parent);
            let others = parent_rec.size() - usize::from(already_child);
            if others >= max {
                return Err(EditorError::InvalidOperation(format!(
                    "{} allows at most {} children",
                    parent_rec.node_type, max
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn append(&mut self, parent: &str, key: &str) -> EditorResult<()> {
        self.validate_insert(key, parent)?;
        self.detach(key)?;
        let last = self.store.latest(parent)?.last_child().cloned();
        self.link(key, parent, last, None)
    }

    pub(crate) fn prepend(&mut self, parent: &str, key: &str) -> EditorResult<()> {
        self.validate_insert(key, parent)?;
        self.detach(key)?;
        let first = self.store.latest(parent)?.first_child().cloned();
        self.link(key, parent, None, first)
    }

    fn anchor_parent(&self, anchor: &str, key: &str) -> EditorResult<NodeKey> {
        if anchor == key {
            return Err(EditorError::InvalidOperation(format!(
                "{} cannot be inserted next to itself",
                key
            )));
        }
        self.store.latest(anchor)?.parent.clone().ok_or_else(|| {
            EditorError::InvalidOperation(format!("{} is not attached to a parent", anchor))
        })
    }

    pub(crate) fn insert_after(&mut self, anchor: &str, key: &str) -> EditorResult<()> {
        let parent = self.anchor_parent(anchor, key)?;
        self.validate_insert(key, &parent)?;
        self.detach(key)?;
        let anchor_rec = self.store.latest(anchor)?;
        let (prev, next) = (Some(anchor_rec.key.clone()), anchor_rec.next.clone());
        self.link(key, &parent, prev, next)
    }

    pub(crate) fn insert_before(&mut self, anchor: &str, key: &str) -> EditorResult<()> {
        let parent = self.anchor_parent(anchor, key)?;
        self.validate_insert(key, &parent)?;
        self.detach(key)?;
        let anchor_rec = self.store.latest(anchor)?;
        let (prev, next) = (anchor_rec.prev.clone(), Some(anchor_rec.key.clone()));
        self.link(key, &parent, prev, next)
    }

    pub(crate) fn remove(&mut self, key: &str) -> EditorResult<()> {
        if self.store.latest(key)?.key.is_root() {
            return Err(EditorError::InvalidOperation("the root cannot be removed".into()));
        }
        self.detach(key)
    }

    /// Checks every step of a replace up front, counting `old` as already gone
    fn validate_replace(&self, old: &str, new: &str, include_children: bool) -> EditorResult<NodeKey> {
        if self.store.latest(old)?.key.is_root() {
            return Err(EditorError::InvalidOperation("the root cannot be replaced".into()));
        }
        let parent = self.anchor_parent(old, new)?;
        let new_rec = self.store.latest(new)?;
        if new_rec.key.is_root() {
            return Err(EditorError::InvalidOperation("the root cannot be moved".into()));
        }
        if self.store.is_ancestor_of(new, &parent) {
            return Err(EditorError::InvalidOperation(format!(
                "inserting {} under {} would create a cycle",
                new, parent
            )));
        }

        let parent_rec = self.store.latest(&parent)?;
        if let Some(max) = self.base.registry().get(&parent_rec.node_type)?.max_children() {
            let already_child = new_rec.parent.as_deref() == Some(parent.as_str());
            let after = parent_rec.size().saturating_sub(1) + usize::from(!already_child);
            if after > max {
                return Err(EditorError::InvalidOperation(format!(
                    "{} allows at most {} children",
                    parent_rec.node_type, max
                )));
            }
        }

        if !include_children {
            return Ok(parent);
        }
        let moving = self.store.children(old).iter().filter(|c| c.as_str() != new).count();
        if moving == 0 {
            return Ok(parent);
        }
        if !new_rec.is_element() {
            return Err(EditorError::InvalidOperation(format!(
                "{} ({}) cannot have children",
                new, new_rec.node_type
            )));
        }
        if let Some(max) = self.base.registry().get(&new_rec.node_type)?.max_children() {
            if new_rec.size() + moving > max {
                return Err(EditorError::InvalidOperation(format!(
                    "{} allows at most {} children",
                    new_rec.node_type, max
                )));
            }
        }
        Ok(parent)
    }

    /// Put `new` where `old` is; optionally hand `old`'s children over first
    pub(crate) fn replace(&mut self, old: &str, new: &str, include_children: bool) -> EditorResult<()> {
        let parent = self.validate_replace(old, new, include_children)?;
        self.detach(new)?;
        let anchor = self.store.latest(old)?;
        let (prev, next) = (Some(anchor.key.clone()), anchor.next.clone());
        self.link(new, &parent, prev, next)?;
        if include_children {
            for child in self.store.children(old) {
                self.detach(&child)?;
                let last = self.store.latest(new)?.last_child().cloned();
                self.link(&child, new, last, None)?;
            }
        }
        self.detach(old)
    }

    pub(crate) fn clear(&mut self, parent: &str) -> EditorResult<()> {
        for child in self.store.children(parent) {
            self.remove(&child)?;
        }
        Ok(())
    }

    pub(crate) fn set_text(&mut self, key: &str, text: String) -> EditorResult<()> {
        let rec = self.store.latest(key)?;
        if !rec.is_text() {
            return Err(EditorError::InvalidOperation(format!(
                "{} ({}) has no text payload",
                key, rec.node_type
            )));
        }
        self.get_writable(key)?.set_text(text);
        Ok(())
    }

    pub(crate) fn set_field(&mut self, key: &str, name: &str, value: Value) -> EditorResult<()> {
        if RESERVED_FIELDS.contains(&name) {
            return Err(EditorError::InvalidOperation(format!("{} is a reserved field name", name)));
        }
        self.get_writable(key)?.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Delete dirty nodes no longer reachable from the root, with their subtrees
    ///
    /// Keys that never existed in the base state vanish from the dirty sets;
    /// keys that did stay (or are added) so the diff reports them destroyed.
    pub(crate) fn collect_garbage(&mut self) -> usize {
        let candidates: Vec<NodeKey> = self
            .dirty_leaves
            .iter()
            .chain(self.dirty_elements.keys())
            .filter(|key| !key.is_root())
            .cloned()
            .collect();

        let mut doomed: IndexSet<NodeKey> = IndexSet::new();
        for key in candidates {
            if doomed.contains(&key) || !self.store.contains(&key) || self.store.is_attached(&key) {
                continue;
            }
            doomed.extend(self.store.subtree(&key));
        }

        let previous = self.base.store().clone();
        for key in &doomed {
            let Some(rec) = self.store.remove(key) else {
                continue;
            };
            if previous.contains(key) {
                if rec.is_element() {
                    self.dirty_elements.entry(key.clone()).or_insert(false);
                } else {
                    self.dirty_leaves.insert(key.clone());
                }
            } else {
                self.dirty_leaves.shift_remove(key);
                self.dirty_elements.shift_remove(key);
            }
            self.pass_leaves.shift_remove(key);
            self.pass_elements.shift_remove(key);
        }
        doomed.len()
    }
}
