//! # Node Transforms
//!
//! Transforms are per-type normalizers that run after an update's mutators
//! and before its commit. A transform may write; whatever it dirties is
//! visited again in a later pass, so transforms chain until nothing changes.
//!
//! ## Pass order
//!
//! ```text
//!        ┌──────────────┐  new leaves   ┌──────────────┐
//!  ───▶  │  leaf pass   │ ────────────▶ │  leaf pass   │ ...
//!        └──────┬───────┘               └──────┬───────┘
//!               │ no new leaves                │
//!               ▼                              ▼
//!        ┌──────────────┐   anything dirtied goes around again
//!        │ element pass │ ───────────────────────────────────▶
//!        └──────────────┘   (root last, intentional only)
//! ```
//!
//! Every pass counts against `maxTransformPasses`. Transforms must reach a
//! fixed point: one that always writes aborts the update with
//! `TransformDivergence`.

use crate::editor::{Editor, Phase};
use crate::error::{EditorError, EditorResult};
use crate::key::{NodeKey, ROOT_KEY};
use crate::node::Node;
use crate::transaction::{Access, Transaction};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

pub type TransformFn = Rc<dyn Fn(&Transaction, &Node) -> EditorResult<()>>;

/// Transforms keyed by node type, kept in registration order
#[derive(Default)]
pub(crate) struct TransformRegistry {
    next_id: u64,
    by_type: HashMap<String, IndexMap<u64, TransformFn>>,
}

impl TransformRegistry {
    pub(crate) fn register(&mut self, node_type: &str, transform: TransformFn) -> u64 {
        self.next_id += 1;
        self.by_type
            .entry(node_type.to_string())
            .or_default()
            .insert(self.next_id, transform);
        self.next_id
    }

    pub(crate) fn remove(&mut self, node_type: &str, id: u64) -> bool {
        let Some(transforms) = self.by_type.get_mut(node_type) else {
            return false;
        };
        let removed = transforms.shift_remove(&id).is_some();
        if transforms.is_empty() {
            self.by_type.remove(node_type);
        }
        removed
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Copy of the current list; registrations made while it runs apply next time
    pub(crate) fn snapshot(&self, node_type: &str) -> Vec<TransformFn> {
        self.by_type
            .get(node_type)
            .map(|transforms| transforms.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Run transform passes over the draft until no untransformed keys remain
///
/// Returns the number of passes taken.
pub(crate) fn apply_transforms(editor: &Editor, max_passes: usize) -> EditorResult<usize> {
    if editor.inner.transforms.borrow().is_empty() {
        editor.with_draft(|d| d.clear_pass());
        return Ok(0);
    }

    let previous_phase = editor.inner.phase.replace(Phase::TransformRunning);
    let result = run_passes(editor, max_passes);
    editor.inner.phase.set(previous_phase);

    if let Ok(passes) = &result {
        debug!(passes = *passes, "transforms converged");
    }
    result
}

fn run_passes(editor: &Editor, max_passes: usize) -> EditorResult<usize> {
    let tx = Transaction::new(editor, Access::Write);
    let (mut leaves, mut elements) = take_pass(editor);
    let mut passes = 0;

    while !leaves.is_empty() || !elements.is_empty() {
        passes += 1;
        if passes > max_passes {
            return Err(EditorError::TransformDivergence { passes });
        }

        if !leaves.is_empty() {
            trace!(pass = passes, leaves = leaves.len(), "leaf pass");
            for key in &leaves {
                transform_node(editor, &tx, key)?;
            }
            let (next_leaves, dirtied_elements) = take_pass(editor);
            leaves = next_leaves;
            for (key, intentional) in dirtied_elements {
                *elements.entry(key).or_insert(false) |= intentional;
            }
            continue;
        }

        elements.shift_remove(ROOT_KEY);
        elements.insert(NodeKey::root(), true);
        trace!(pass = passes, elements = elements.len(), "element pass");
        for (key, intentional) in &elements {
            if *intentional {
                transform_node(editor, &tx, key)?;
            }
        }
        (leaves, elements) = take_pass(editor);
    }
    Ok(passes)
}

fn take_pass(editor: &Editor) -> (IndexSet<NodeKey>, IndexMap<NodeKey, bool>) {
    editor
        .with_draft(|d| (std::mem::take(&mut d.pass_leaves), std::mem::take(&mut d.pass_elements)))
        .unwrap_or_default()
}

/// Latest view of `key` if it still exists and is reachable from the root
fn live_node(editor: &Editor, key: &str) -> Option<Node> {
    editor
        .inspect_draft(|d| {
            let rec = d.store.get(key)?;
            d.store
                .is_attached(key)
                .then(|| Node::new(rec.clone(), d.epoch()))
        })
        .flatten()
}

fn transform_node(editor: &Editor, tx: &Transaction, key: &str) -> EditorResult<()> {
    let Some(node) = live_node(editor, key) else {
        return Ok(());
    };
    let transforms = editor.inner.transforms.borrow().snapshot(node.node_type());

    for transform in transforms {
        let Some(current) = live_node(editor, key) else {
            break;
        };
        transform(tx, &current)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TransformFn {
        Rc::new(|_: &Transaction, _: &Node| Ok(()))
    }

    #[test]
    fn test_registry_keeps_registration_order() {
        let mut registry = TransformRegistry::default();
        let first = registry.register("text", noop());
        let second = registry.register("text", noop());
        registry.register("paragraph", noop());

        assert!(first < second);
        assert_eq!(registry.snapshot("text").len(), 2);
        assert_eq!(registry.snapshot("linebreak").len(), 0);
    }

    #[test]
    fn test_remove_drops_empty_types() {
        let mut registry = TransformRegistry::default();
        let id = registry.register("text", noop());
        assert!(registry.remove("text", id));
        assert!(!registry.remove("text", id));
        assert!(registry.is_empty());
    }
}
