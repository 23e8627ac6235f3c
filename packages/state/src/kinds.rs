//! # Node Kinds
//!
//! The engine never inspects what a paragraph or a text span *means*. Each
//! node kind is a plugin declaring a type tag plus a small capability record,
//! and the engine dispatches on the tag.
//!
//! Built-in kinds: `root`, `paragraph`, `text`, `linebreak`.

use crate::error::{EditorError, EditorResult};
use crate::node::{Fields, NodeRecord, NodeShape};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Capability contract every node kind implements
pub trait NodeKind: Send + Sync {
    /// Type tag stored on every record and in the persisted format
    fn node_type(&self) -> &str;

    fn shape(&self) -> NodeShape;

    /// Version written into the persisted format
    fn version(&self) -> u32 {
        1
    }

    /// Fields a freshly constructed node starts with
    fn default_fields(&self) -> Fields {
        Fields::new()
    }

    /// Upper bound on children for element kinds
    fn max_children(&self) -> Option<usize> {
        None
    }

    /// Inline nodes flow inside a block; block siblings are separated in text content
    fn is_inline(&self) -> bool {
        self.shape() != NodeShape::Element
    }

    /// Text a leaf contributes to the flattened text content
    fn text_content(&self, record: &NodeRecord) -> String {
        record.text().unwrap_or_default().to_string()
    }

    /// Bring fields persisted at `from_version` up to `self.version()`
    fn migrate(&self, _fields: &mut Fields, _from_version: u32) -> EditorResult<()> {
        Ok(())
    }
}

fn block_fields() -> Fields {
    let mut fields = Fields::new();
    fields.insert("direction".into(), Value::Null);
    fields.insert("format".into(), json!(""));
    fields.insert("indent".into(), json!(0));
    fields
}

#[derive(Debug)]
pub struct RootKind;

impl NodeKind for RootKind {
    fn node_type(&self) -> &str {
        "root"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Element
    }

    fn default_fields(&self) -> Fields {
        block_fields()
    }
}

#[derive(Debug)]
pub struct ParagraphKind;

impl NodeKind for ParagraphKind {
    fn node_type(&self) -> &str {
        "paragraph"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Element
    }

    fn default_fields(&self) -> Fields {
        block_fields()
    }
}

#[derive(Debug)]
pub struct TextKind;

impl NodeKind for TextKind {
    fn node_type(&self) -> &str {
        "text"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Text
    }

    fn default_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("detail".into(), json!(0));
        fields.insert("format".into(), json!(0));
        fields.insert("mode".into(), json!("normal"));
        fields.insert("style".into(), json!(""));
        fields
    }
}

#[derive(Debug)]
pub struct LineBreakKind;

impl NodeKind for LineBreakKind {
    fn node_type(&self) -> &str {
        "linebreak"
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Leaf
    }

    fn text_content(&self, _record: &NodeRecord) -> String {
        "\n".to_string()
    }
}

/// Factory that constructs the replacement for a requested type
pub type ReplacementFn = Arc<dyn Fn(&NodeRecord) -> NodeRecord + Send + Sync>;

/// Type → kind lookup, immutable once the editor is built
#[derive(Clone, Default)]
pub struct NodeRegistry {
    kinds: HashMap<String, Arc<dyn NodeKind>>,
    replacements: HashMap<String, ReplacementFn>,
}

impl NodeRegistry {
    /// Registry holding only the built-in kinds
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(RootKind);
        registry.register(ParagraphKind);
        registry.register(TextKind);
        registry.register(LineBreakKind);
        registry
    }

    /// Register a kind, replacing any kind with the same type tag
    pub fn register(&mut self, kind: impl NodeKind + 'static) {
        self.kinds.insert(kind.node_type().to_string(), Arc::new(kind));
    }

    /// Construct `node_type` through `factory` instead of directly
    pub fn register_replacement(&mut self, node_type: impl Into<String>, factory: ReplacementFn) {
        self.replacements.insert(node_type.into(), factory);
    }

    pub fn get(&self, node_type: &str) -> EditorResult<&Arc<dyn NodeKind>> {
        self.kinds
            .get(node_type)
            .ok_or_else(|| EditorError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.kinds.contains_key(node_type)
    }

    pub fn replacement(&self, node_type: &str) -> Option<&ReplacementFn> {
        self.replacements.get(node_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Every replacement must start from a registered type
    pub(crate) fn validate(&self) -> EditorResult<()> {
        if !self.contains("root") {
            return Err(EditorError::Config("the root kind must stay registered".into()));
        }
        if let Some(root) = self.kinds.get("root") {
            if root.shape() != NodeShape::Element {
                return Err(EditorError::Config("the root kind must be an element".into()));
            }
        }
        for node_type in self.replacements.keys() {
            if !self.contains(node_type) {
                return Err(EditorError::Config(format!(
                    "replacement registered for unknown type {}",
                    node_type
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.types().collect();
        types.sort_unstable();
        let mut replaced: Vec<&str> = self.replacements.keys().map(String::as_str).collect();
        replaced.sort_unstable();
        f.debug_struct("NodeRegistry")
            .field("types", &types)
            .field("replacements", &replaced)
            .finish()
    }
}
