//! # Commands
//!
//! A typed command bus. A `Command<P>` is a name plus the payload type its
//! handlers accept; handlers are grouped in five priority tiers and run from
//! `Critical` down to `Editor` until one returns `true`.
//!
//! ```rust,ignore
//! const INSERT_TEXT: Command<String> = Command::new("INSERT_TEXT");
//!
//! editor.register_command(&INSERT_TEXT, |text, tx| { ... Ok(true) }, CommandPriority::Editor);
//! editor.dispatch_command(&INSERT_TEXT, "hi".to_string())?;
//! ```

use crate::error::EditorResult;
use crate::transaction::Transaction;
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Command identifier carrying its payload type
pub struct Command<P> {
    name: &'static str,
    _payload: PhantomData<fn(&P)>,
}

impl<P> Command<P> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Command<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Command<P> {}

impl<P> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Editor = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

const TIERS: usize = 5;

pub(crate) type ErasedHandler = Rc<dyn Fn(&dyn Any, &Transaction) -> EditorResult<bool>>;

#[derive(Default)]
pub(crate) struct CommandRegistry {
    next_id: u64,
    handlers: HashMap<&'static str, [IndexMap<u64, ErasedHandler>; TIERS]>,
}

impl CommandRegistry {
    pub(crate) fn register<P, F>(&mut self, command: &Command<P>, handler: F, priority: CommandPriority) -> u64
    where
        P: 'static,
        F: Fn(&P, &Transaction) -> EditorResult<bool> + 'static,
    {
        let erased: ErasedHandler = Rc::new(move |payload: &dyn Any, tx: &Transaction| {
            match payload.downcast_ref::<P>() {
                Some(payload) => handler(payload, tx),
                None => Ok(false),
            }
        });

        self.next_id += 1;
        self.handlers.entry(command.name()).or_default()[priority as usize].insert(self.next_id, erased);
        self.next_id
    }

    pub(crate) fn remove(&mut self, name: &str, id: u64) -> bool {
        let Some(tiers) = self.handlers.get_mut(name) else {
            return false;
        };
        let removed = tiers.iter_mut().any(|tier| tier.shift_remove(&id).is_some());
        if tiers.iter().all(IndexMap::is_empty) {
            self.handlers.remove(name);
        }
        removed
    }

    /// Handlers for `name`, highest tier first, registration order within a tier
    pub(crate) fn snapshot(&self, name: &str) -> Vec<ErasedHandler> {
        self.handlers
            .get(name)
            .map(|tiers| {
                tiers
                    .iter()
                    .rev()
                    .flat_map(|tier| tier.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
