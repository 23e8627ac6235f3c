//! # Transactions
//!
//! The handle mutators, transforms, command handlers and readers receive.
//!
//! ## Access modes
//!
//! ```text
//!   update()  ──▶ Write      reads and writes go to the draft
//!   read()    ──▶ Read       reads a pinned committed snapshot
//!   read() inside update()
//!             ──▶ DraftRead  reads the draft, writes are rejected
//! ```
//!
//! Structural writes (`append`, `insert_*`, `replace`, `remove`) check every
//! constraint before touching the draft, so a rejected one leaves it as it
//! was. All writes go through the draft's `get_writable`. An error returned
//! from an update still discards the whole draft.

use crate::draft::Draft;
use crate::editor::Editor;
use crate::error::{EditorError, EditorResult};
use crate::key::{NodeKey, ROOT_KEY};
use crate::node::{Fields, Node, NodeRecord};
use crate::selection::Selection;
use crate::state::EditorState;
use crate::store::NodeStore;
use serde_json::Value;
use std::sync::Arc;

pub(crate) enum Access {
    Read(Arc<EditorState>),
    DraftRead,
    Write,
}

pub struct Transaction<'a> {
    editor: &'a Editor,
    access: Access,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(editor: &'a Editor, access: Access) -> Self {
        Self { editor, access }
    }

    pub fn editor(&self) -> &'a Editor {
        self.editor
    }

    pub fn is_read_only(&self) -> bool {
        !matches!(self.access, Access::Write)
    }

    /// Version node views from this transaction are stamped with
    pub fn epoch(&self) -> u64 {
        self.view(|_, _, epoch| epoch)
    }

    fn view<R>(&self, f: impl FnOnce(&NodeStore, Option<&Selection>, u64) -> R) -> R {
        if let Access::Read(state) = &self.access {
            return f(state.store(), state.selection(), state.version());
        }
        let draft = self.editor.inner.draft.borrow();
        if let Some(d) = draft.as_ref() {
            return f(&d.store, d.selection.as_ref(), d.epoch());
        }
        drop(draft);
        let state = self.editor.get_editor_state();
        f(state.store(), state.selection(), state.version())
    }

    fn write<R>(&self, operation: &str, f: impl FnOnce(&mut Draft) -> EditorResult<R>) -> EditorResult<R> {
        if self.is_read_only() {
            return Err(EditorError::read_only(operation));
        }
        let mut draft = self.editor.inner.draft.borrow_mut();
        let d = draft
            .as_mut()
            .ok_or_else(|| EditorError::read_only(operation))?;
        f(d)
    }

    // ---- reads ----

    /// Latest view of `key` in the visible version
    pub fn get_latest(&self, key: &str) -> EditorResult<Node> {
        self.view(|store, _, epoch| store.latest(key).map(|rec| Node::new(rec.clone(), epoch)))
    }

    pub fn get_node(&self, key: &str) -> Option<Node> {
        self.get_latest(key).ok()
    }

    /// Re-resolve a view; views from another version are stale
    pub fn latest(&self, node: &Node) -> EditorResult<Node> {
        if node.epoch() != self.epoch() {
            return Err(EditorError::stale(node.key()));
        }
        self.get_latest(node.key())
    }

    pub fn root(&self) -> EditorResult<Node> {
        self.get_latest(ROOT_KEY)
    }

    pub fn children(&self, key: &str) -> EditorResult<Vec<Node>> {
        self.view(|store, _, epoch| {
            store.latest(key)?;
            store
                .children(key)
                .iter()
                .map(|child| store.latest(child).map(|rec| Node::new(rec.clone(), epoch)))
                .collect()
        })
    }

    fn linked(&self, key: &str, pick: impl FnOnce(&NodeRecord) -> Option<&NodeKey>) -> EditorResult<Option<Node>> {
        self.view(|store, _, epoch| {
            let rec = store.latest(key)?;
            match pick(rec) {
                Some(other) => Ok(Some(Node::new(store.latest(other)?.clone(), epoch))),
                None => Ok(None),
            }
        })
    }

    pub fn parent(&self, key: &str) -> EditorResult<Option<Node>> {
        self.linked(key, NodeRecord::parent)
    }

    pub fn next_sibling(&self, key: &str) -> EditorResult<Option<Node>> {
        self.linked(key, NodeRecord::next)
    }

    pub fn previous_sibling(&self, key: &str) -> EditorResult<Option<Node>> {
        self.linked(key, NodeRecord::prev)
    }

    pub fn text_content(&self, key: &str) -> EditorResult<String> {
        let registry = self.editor.registry();
        self.view(|store, _, _| {
            store.latest(key)?;
            Ok(store.text_content(registry, key))
        })
    }

    pub fn is_attached(&self, key: &str) -> bool {
        self.view(|store, _, _| store.is_attached(key))
    }

    /// Every live node of `node_type`, ordered by key
    pub fn nodes_of_type(&self, node_type: &str) -> Vec<Node> {
        self.view(|store, _, epoch| {
            let mut nodes: Vec<Node> = store
                .records()
                .filter(|rec| rec.node_type == node_type)
                .map(|rec| Node::new(rec.clone(), epoch))
                .collect();
            nodes.sort_by(|a, b| a.key().cmp(b.key()));
            nodes
        })
    }

    pub fn selection(&self) -> Option<Selection> {
        self.view(|_, selection, _| selection.cloned())
    }

    // ---- writes ----

    fn build_record(&self, node_type: &str, key: NodeKey) -> EditorResult<NodeRecord> {
        let registry = self.editor.registry();
        let kind = registry.get(node_type)?;
        let record = NodeRecord::new(key, node_type, kind.shape(), kind.default_fields());
        let Some(factory) = registry.replacement(node_type) else {
            return Ok(record);
        };

        let replaced = factory(&record);
        let replacement_kind = registry.get(&replaced.node_type)?;
        if replacement_kind.shape() != replaced.shape() {
            return Err(EditorError::InvalidOperation(format!(
                "replacement for {} produced a {} record with the wrong shape",
                node_type, replaced.node_type
            )));
        }
        Ok(replaced)
    }

    fn insert_record(&self, record: NodeRecord) -> EditorResult<Node> {
        let key = self.write("create_node", |d| d.create(record))?;
        self.get_latest(&key)
    }

    /// Construct a detached node of `node_type`, honouring replacements
    pub fn create_node(&self, node_type: &str) -> EditorResult<Node> {
        if self.is_read_only() {
            return Err(EditorError::read_only("create_node"));
        }
        let key = self.editor.inner.keys.next_key();
        let record = self.build_record(node_type, key)?;
        self.insert_record(record)
    }

    /// Like `create_node` with a caller-chosen key; a live key is a `KeyCollision`
    pub fn create_node_with_key(&self, node_type: &str, key: impl Into<NodeKey>) -> EditorResult<Node> {
        if self.is_read_only() {
            return Err(EditorError::read_only("create_node"));
        }
        let record = self.build_record(node_type, key.into())?;
        self.insert_record(record)
    }

    pub fn create_text(&self, text: &str) -> EditorResult<Node> {
        let node = self.create_node("text")?;
        self.set_text(node.key(), text)?;
        self.get_latest(node.key())
    }

    pub fn append(&self, parent: &str, child: &str) -> EditorResult<()> {
        self.write("append", |d| d.append(parent, child))
    }

    pub fn prepend(&self, parent: &str, child: &str) -> EditorResult<()> {
        self.write("prepend", |d| d.prepend(parent, child))
    }

    pub fn insert_after(&self, anchor: &str, node: &str) -> EditorResult<()> {
        self.write("insert_after", |d| d.insert_after(anchor, node))
    }

    pub fn insert_before(&self, anchor: &str, node: &str) -> EditorResult<()> {
        self.write("insert_before", |d| d.insert_before(anchor, node))
    }

    /// Detach `key`; it is deleted at commit unless re-attached first
    pub fn remove(&self, key: &str) -> EditorResult<()> {
        self.write("remove", |d| d.remove(key))
    }

    pub fn replace(&self, old: &str, new: &str, include_children: bool) -> EditorResult<()> {
        self.write("replace", |d| d.replace(old, new, include_children))
    }

    pub fn clear(&self, parent: &str) -> EditorResult<()> {
        self.write("clear", |d| d.clear(parent))
    }

    pub fn set_text(&self, key: &str, text: &str) -> EditorResult<()> {
        self.write("set_text", |d| d.set_text(key, text.to_string()))
    }

    pub fn set_field(&self, key: &str, name: &str, value: Value) -> EditorResult<()> {
        self.write("set_field", |d| d.set_field(key, name, value))
    }

    /// Write access to a node's kind fields
    ///
    /// `f` edits a copy that is stored back once it returns, so it may read
    /// through this transaction. Field writes it makes to the same node
    /// through the transaction are overwritten.
    pub fn get_writable<R>(&self, key: &str, f: impl FnOnce(&mut Fields) -> R) -> EditorResult<R> {
        let mut fields = self.write("get_writable", |d| Ok(d.get_writable(key)?.fields.clone()))?;
        let result = f(&mut fields);
        self.write("get_writable", |d| {
            d.get_writable(key)?.fields = fields;
            Ok(())
        })?;
        Ok(result)
    }

    /// Mark `key` dirty without changing it, so its transforms run again
    pub fn mark_dirty(&self, key: &str) -> EditorResult<()> {
        self.write("mark_dirty", |d| d.get_writable(key).map(|_| ()))
    }

    pub fn set_selection(&self, selection: Option<Selection>) -> EditorResult<()> {
        self.write("set_selection", |d| {
            d.selection = selection;
            Ok(())
        })
    }
}
