//! Listener registry.
//!
//! Listeners are stored by id in insertion order. Dispatch always works on a
//! snapshot taken before the first call, so a listener that registers or
//! unregisters others only affects the next dispatch.

use crate::editor::{Editor, EditorInner};
use crate::pipeline::{MutationMap, MutationMeta, UpdatePayload};
use indexmap::IndexMap;
use std::rc::{Rc, Weak};

pub type UpdateListener = Rc<dyn Fn(&Editor, &UpdatePayload)>;
pub type MutationListener = Rc<dyn Fn(&Editor, &MutationMap, &MutationMeta)>;
pub type TextContentListener = Rc<dyn Fn(&Editor, &str)>;
pub type EditableListener = Rc<dyn Fn(&Editor, bool)>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationListenerOptions {
    /// Do not replay existing nodes as `Created` on registration
    pub skip_initialization: bool,
}

/// Identifies one registration across every editor registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Update(u64),
    Mutation(u64),
    TextContent(u64),
    Editable(u64),
    Transform { node_type: String, id: u64 },
    Command { name: &'static str, id: u64 },
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    update: IndexMap<u64, UpdateListener>,
    mutation: IndexMap<u64, (String, MutationListener)>,
    text_content: IndexMap<u64, TextContentListener>,
    editable: IndexMap<u64, EditableListener>,
}

pub(crate) struct ListenerSnapshot {
    pub(crate) update: Vec<UpdateListener>,
    pub(crate) mutation: Vec<(String, MutationListener)>,
    pub(crate) text_content: Vec<TextContentListener>,
}

impl ListenerRegistry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn add_update(&mut self, listener: UpdateListener) -> Slot {
        let id = self.next_id();
        self.update.insert(id, listener);
        Slot::Update(id)
    }

    pub(crate) fn add_mutation(&mut self, node_type: &str, listener: MutationListener) -> Slot {
        let id = self.next_id();
        self.mutation.insert(id, (node_type.to_string(), listener));
        Slot::Mutation(id)
    }

    pub(crate) fn add_text_content(&mut self, listener: TextContentListener) -> Slot {
        let id = self.next_id();
        self.text_content.insert(id, listener);
        Slot::TextContent(id)
    }

    pub(crate) fn add_editable(&mut self, listener: EditableListener) -> Slot {
        let id = self.next_id();
        self.editable.insert(id, listener);
        Slot::Editable(id)
    }

    pub(crate) fn remove(&mut self, slot: &Slot) -> bool {
        match slot {
            Slot::Update(id) => self.update.shift_remove(id).is_some(),
            Slot::Mutation(id) => self.mutation.shift_remove(id).is_some(),
            Slot::TextContent(id) => self.text_content.shift_remove(id).is_some(),
            Slot::Editable(id) => self.editable.shift_remove(id).is_some(),
            Slot::Transform { .. } | Slot::Command { .. } => false,
        }
    }

    pub(crate) fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            update: self.update.values().cloned().collect(),
            mutation: self.mutation.values().cloned().collect(),
            text_content: self.text_content.values().cloned().collect(),
        }
    }

    pub(crate) fn editable_snapshot(&self) -> Vec<EditableListener> {
        self.editable.values().cloned().collect()
    }
}

/// Handle returned by every registration
///
/// Dropping the handle keeps the registration alive; call `unregister` to
/// remove it. The handle does not keep the editor alive.
#[must_use = "dropping an Unregister handle keeps the registration alive"]
#[derive(Debug)]
pub struct Unregister {
    editor: Weak<EditorInner>,
    slot: Slot,
}

impl Unregister {
    pub(crate) fn new(editor: Weak<EditorInner>, slot: Slot) -> Self {
        Self { editor, slot }
    }

    /// Remove the registration; false if it was already gone
    pub fn unregister(self) -> bool {
        let Some(inner) = self.editor.upgrade() else {
            return false;
        };
        match &self.slot {
            Slot::Transform { node_type, id } => inner.transforms.borrow_mut().remove(node_type, *id),
            Slot::Command { name, id } => inner.commands.borrow_mut().remove(name, *id),
            slot => inner.listeners.borrow_mut().remove(slot),
        }
    }
}
