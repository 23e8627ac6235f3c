//! # Commit Pipeline
//!
//! Turns a converged draft into the next committed state and tells the
//! outside world about it.
//!
//! ```text
//!   draft ──▶ elide? ──yes──▶ on_update callbacks
//!               │ no
//!               ▼
//!   committed = Arc::new(next)
//!               │
//!               ▼
//!   reconciler.reconcile(prev, next, dirty)  ──err──▶ report + rebuild(next)
//!               │
//!               ▼
//!   update listeners ▶ mutation listeners ▶ text-content listeners ▶ on_update
//! ```
//!
//! The committed state is installed before anybody is notified, so a
//! listener that reads or updates sees the new version.

use crate::editor::{Editor, Phase};
use crate::error::{EditorError, ReconcileError};
use crate::key::NodeKey;
use crate::state::EditorState;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// External render surface driven by commits
pub trait Reconciler {
    /// Apply the difference between two committed states
    fn reconcile(
        &mut self,
        prev: &EditorState,
        next: &EditorState,
        dirty_elements: &IndexMap<NodeKey, bool>,
        dirty_leaves: &IndexSet<NodeKey>,
    ) -> Result<(), ReconcileError>;

    /// Discard incremental state and render `state` from scratch
    fn rebuild(&mut self, state: &EditorState);
}

/// What update listeners receive once per commit
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    pub editor_state: Arc<EditorState>,
    pub prev_editor_state: Arc<EditorState>,
    /// Element key → written directly (as opposed to dirtied by a descendant)
    pub dirty_elements: IndexMap<NodeKey, bool>,
    pub dirty_leaves: IndexSet<NodeKey>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMutation {
    Created,
    Updated,
    Destroyed,
}

pub type MutationMap = IndexMap<NodeKey, NodeMutation>;

#[derive(Debug, Clone)]
pub struct MutationMeta {
    pub update_tags: BTreeSet<String>,
    pub dirty_leaves: IndexSet<NodeKey>,
    pub prev_editor_state: Arc<EditorState>,
}

/// Classify every dirty key of `node_type` between two states
pub fn mutations_for_type(
    node_type: &str,
    prev: &EditorState,
    next: &EditorState,
    dirty_elements: &IndexMap<NodeKey, bool>,
    dirty_leaves: &IndexSet<NodeKey>,
) -> MutationMap {
    let mut mutations = MutationMap::new();
    for key in dirty_leaves.iter().chain(dirty_elements.keys()) {
        let before = prev.store().get(key);
        let after = next.store().get(key);
        let mutation = match (before, after) {
            (None, Some(rec)) if rec.node_type == node_type => NodeMutation::Created,
            (Some(rec), None) if rec.node_type == node_type => NodeMutation::Destroyed,
            (Some(old), Some(new)) if new.node_type == node_type => {
                if Arc::ptr_eq(old, new) || old == new {
                    continue;
                }
                NodeMutation::Updated
            }
            _ => continue,
        };
        mutations.insert(key.clone(), mutation);
    }
    mutations
}

/// Commit the pending draft, if any
#[instrument(skip_all, fields(namespace = %editor.config().namespace))]
pub(crate) fn commit(editor: &Editor) {
    let inner = &editor.inner;
    let taken = inner.draft.borrow_mut().take();
    let Some(draft) = taken else {
        return;
    };

    if !draft.has_changes() {
        inner.phase.set(Phase::Idle);
        debug!(callbacks = draft.callback_count, "commit elided");
        for callback in draft.on_update {
            callback();
        }
        return;
    }

    inner.phase.set(Phase::Committing);
    let prev = editor.get_editor_state();
    let next = Arc::new(draft.to_state());
    debug!(
        version = next.version(),
        dirty_elements = draft.dirty_elements.len(),
        dirty_leaves = draft.dirty_leaves.len(),
        callbacks = draft.callback_count,
        "committing"
    );

    let payload = UpdatePayload {
        editor_state: next,
        prev_editor_state: prev,
        dirty_elements: draft.dirty_elements,
        dirty_leaves: draft.dirty_leaves,
        tags: draft.tags,
    };
    install(editor, payload);

    for callback in draft.on_update {
        callback();
    }
}

/// Make `payload.editor_state` the committed state and notify everybody
pub(crate) fn install(editor: &Editor, payload: UpdatePayload) {
    let inner = &editor.inner;
    *inner.committed.borrow_mut() = payload.editor_state.clone();
    inner.phase.set(Phase::Idle);

    reconcile(editor, &payload);
    publish(editor, &payload);
}

fn reconcile(editor: &Editor, payload: &UpdatePayload) {
    // Taken out of its cell so the reconciler may call back into the editor.
    let taken = editor.inner.reconciler.borrow_mut().take();
    let Some(mut reconciler) = taken else {
        return;
    };

    let result = reconciler.reconcile(
        &payload.prev_editor_state,
        &payload.editor_state,
        &payload.dirty_elements,
        &payload.dirty_leaves,
    );
    if let Err(err) = result {
        let error = EditorError::ReconciliationFailure(err.0);
        warn!(version = payload.editor_state.version(), error = %error, "reconciliation failed, rebuilding");
        editor.report(&error);
        reconciler.rebuild(&payload.editor_state);
    }

    // replaced while it ran
    if editor.inner.reconciler.borrow().is_some() {
        return;
    }
    // commits made from inside the reconciler found the slot empty
    let latest = editor.get_editor_state();
    if latest.version() != payload.editor_state.version() {
        debug!(version = latest.version(), "state committed during reconciliation, rebuilding");
        reconciler.rebuild(&latest);
    }
    *editor.inner.reconciler.borrow_mut() = Some(reconciler);
}

fn publish(editor: &Editor, payload: &UpdatePayload) {
    let listeners = editor.inner.listeners.borrow().snapshot();

    for listener in &listeners.update {
        listener(editor, payload);
    }

    if !listeners.mutation.is_empty() {
        let meta = MutationMeta {
            update_tags: payload.tags.clone(),
            dirty_leaves: payload.dirty_leaves.clone(),
            prev_editor_state: payload.prev_editor_state.clone(),
        };
        let mut by_type: HashMap<&str, MutationMap> = HashMap::new();
        for (node_type, listener) in &listeners.mutation {
            let mutations = by_type.entry(node_type.as_str()).or_insert_with(|| {
                mutations_for_type(
                    node_type,
                    &payload.prev_editor_state,
                    &payload.editor_state,
                    &payload.dirty_elements,
                    &payload.dirty_leaves,
                )
            });
            if !mutations.is_empty() {
                listener(editor, mutations, &meta);
            }
        }
    }

    if !listeners.text_content.is_empty() {
        let before = payload.prev_editor_state.text_content();
        let after = payload.editor_state.text_content();
        if before != after {
            for listener in &listeners.text_content {
                listener(editor, &after);
            }
        }
    }
}
