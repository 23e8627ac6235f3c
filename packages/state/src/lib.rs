//! # Folio State
//!
//! Versioned, copy-on-write document state engine for a rich-text editor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ update(mutator) / dispatch_command(cmd)     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ draft: copy-on-write node map               │
//! │  - get_writable clones on first write       │
//! │  - dirty keys propagate to ancestors        │
//! │  - nested updates share the draft           │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ transforms: leaf/element passes to a fixed  │
//! │ point, then detached nodes are collected    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ pipeline: new Arc<EditorState>, reconciler, │
//! │ update / mutation / text listeners          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Committed states are immutable**: every commit produces a new
//!    `Arc<EditorState>` sharing untouched records with the previous one
//! 2. **One draft at a time**: all writes, nested or batched, land in it
//! 3. **All or nothing**: any error discards the draft
//! 4. **Keys, not pointers**: nodes refer to each other by `NodeKey`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_state::{Editor, UpdateOptions};
//!
//! let editor = Editor::new()?;
//!
//! editor.update(
//!     |tx| {
//!         let paragraph = tx.create_node("paragraph")?;
//!         let text = tx.create_text("Hello")?;
//!         tx.append(paragraph.key(), text.key())?;
//!         tx.append("root", paragraph.key())
//!     },
//!     UpdateOptions::discrete(),
//! )?;
//!
//! let text = editor.read(|tx| tx.text_content("root"))?;
//! assert_eq!(text, "Hello");
//! ```

mod commands;
mod config;
mod draft;
mod editor;
mod error;
mod key;
mod kinds;
mod listeners;
mod node;
mod pipeline;
mod scheduler;
mod selection;
mod serialize;
mod state;
mod store;
mod transaction;
mod transforms;

pub use commands::{Command, CommandPriority};
pub use config::{EditorConfig, DEFAULT_MAX_TRANSFORM_PASSES};
pub use editor::{
    Editor, EditorBuilder, ErrorHandler, Phase, UpdateOptions, REGISTER_MUTATION_LISTENER_TAG,
};
pub use error::{EditorError, EditorResult, ReconcileError};
pub use key::{KeyGenerator, NodeKey, ROOT_KEY};
pub use kinds::{
    LineBreakKind, NodeKind, NodeRegistry, ParagraphKind, ReplacementFn, RootKind, TextKind,
};
pub use listeners::{
    EditableListener, MutationListener, MutationListenerOptions, TextContentListener, Unregister,
    UpdateListener,
};
pub use node::{Fields, Node, NodeBody, NodeRecord, NodeShape};
pub use pipeline::{
    mutations_for_type, MutationMap, MutationMeta, NodeMutation, Reconciler, UpdatePayload,
};
pub use selection::{Point, PointKind, Selection};
pub use serialize::{
    import_state, parse_state, SerializedEditorState, SerializedNode, RESERVED_FIELDS,
};
pub use state::EditorState;
pub use store::NodeStore;
pub use transaction::Transaction;
pub use transforms::TransformFn;
