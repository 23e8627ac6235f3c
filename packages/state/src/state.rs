//! # Editor State
//!
//! An immutable snapshot of the node graph plus the selection.
//!
//! ## Lifecycle
//!
//! ```text
//! empty ──update──▶ draft ──commit──▶ v1 ──update──▶ draft ──commit──▶ v2
//!                     │                                │
//!               shares records                   shares records
//!                 with v0                          with v1
//! ```
//!
//! The editor keeps only the latest committed snapshot. Anything that wants
//! history holds on to the `Arc<EditorState>` values it receives.

use crate::error::EditorResult;
use crate::key::{NodeKey, ROOT_KEY};
use crate::kinds::NodeRegistry;
use crate::node::NodeRecord;
use crate::selection::Selection;
use crate::serialize::{self, SerializedEditorState};
use crate::store::NodeStore;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EditorState {
    store: NodeStore,
    selection: Option<Selection>,
    version: u64,
    registry: Arc<NodeRegistry>,
}

impl EditorState {
    /// State holding only an empty root
    pub fn empty(registry: Arc<NodeRegistry>) -> EditorResult<Self> {
        let kind = registry.get(ROOT_KEY)?;
        let root = NodeRecord::new(NodeKey::root(), ROOT_KEY, kind.shape(), kind.default_fields());
        Ok(Self::from_parts(NodeStore::from_records([root]), None, 0, registry))
    }

    pub(crate) fn from_parts(
        store: NodeStore,
        selection: Option<Selection>,
        version: u64,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            store,
            selection,
            version,
            registry,
        }
    }

    /// Commit counter; 0 for the initial and for freshly parsed states
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn node(&self, key: &str) -> Option<&NodeRecord> {
        self.store.get(key).map(|rec| rec.as_ref())
    }

    pub fn root(&self) -> Option<&NodeRecord> {
        self.node(ROOT_KEY)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when the root has no children
    pub fn is_empty(&self) -> bool {
        self.root().map(|root| root.size() == 0).unwrap_or(true)
    }

    /// Flattened text of the whole document
    pub fn text_content(&self) -> String {
        self.store.text_content(&self.registry, ROOT_KEY)
    }

    /// Keys of every node of `node_type`
    pub fn keys_of_type(&self, node_type: &str) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self
            .store
            .records()
            .filter(|rec| rec.node_type == node_type)
            .map(|rec| rec.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn to_serialized(&self) -> EditorResult<SerializedEditorState> {
        serialize::export_state(self)
    }

    pub fn to_json(&self) -> EditorResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_serialized()?)?)
    }
}

impl fmt::Display for EditorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = self.to_json().map_err(|_| fmt::Error)?;
        write!(f, "{}", json)
    }
}
