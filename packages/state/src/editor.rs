//! # Editor
//!
//! The engine instance: owns the committed state, the draft, and every
//! registry, and runs the update lifecycle.
//!
//! ## Update lifecycle
//!
//! ```text
//!            update()                      update() while Open
//!   Idle ──────────────▶ Open ◀──────────────────────────────┐
//!    ▲                    │ mutator returns                  │
//!    │                    ▼                                  │
//!    │            TransformRunning ── converged ──▶ Open ────┘
//!    │                                             │
//!    │         discrete: now / otherwise: microtask│
//!    │                                             ▼
//!    └──────────────────────────────────────── Committing
//! ```
//!
//! Nested calls (an update issued from a mutator, transform or command
//! handler) run in-line against the same draft and commit with it. Any error
//! discards the whole draft: the committed state never sees half an update.
//!
//! `Editor` is a cheap `Rc` handle; clones refer to the same engine.

use crate::commands::{Command, CommandPriority, CommandRegistry};
use crate::config::EditorConfig;
use crate::draft::Draft;
use crate::error::{EditorError, EditorResult};
use crate::key::KeyGenerator;
use crate::kinds::{NodeKind, NodeRegistry};
use crate::listeners::{ListenerRegistry, MutationListenerOptions, Slot, Unregister};
use crate::node::{Node, NodeRecord};
use crate::pipeline::{self, MutationMap, MutationMeta, NodeMutation, Reconciler, UpdatePayload};
use crate::scheduler::MicrotaskQueue;
use crate::serialize;
use crate::state::EditorState;
use crate::transaction::{Access, Transaction};
use crate::transforms::{self, TransformRegistry};
use indexmap::{IndexMap, IndexSet};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tag carried by the synthetic report a new mutation listener receives
pub const REGISTER_MUTATION_LISTENER_TAG: &str = "registerMutationListener";

pub type ErrorHandler = Rc<dyn Fn(&EditorError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A draft exists: a mutator is running or a flush is pending
    Open,
    TransformRunning,
    Committing,
}

/// Per-update settings
#[derive(Default)]
pub struct UpdateOptions {
    /// Commit before `update` returns instead of at the next microtask checkpoint
    pub discrete: bool,
    pub tags: Vec<String>,
    /// Called after the commit (or after the update turned out to be a no-op)
    pub on_update: Option<Box<dyn FnOnce()>>,
    pub skip_transforms: bool,
}

impl UpdateOptions {
    pub fn discrete() -> Self {
        Self {
            discrete: true,
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn on_update(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }

    pub fn skip_transforms(mut self) -> Self {
        self.skip_transforms = true;
        self
    }
}

impl fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("discrete", &self.discrete)
            .field("tags", &self.tags)
            .field("on_update", &self.on_update.is_some())
            .field("skip_transforms", &self.skip_transforms)
            .finish()
    }
}

pub(crate) struct EditorInner {
    pub(crate) config: EditorConfig,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) keys: KeyGenerator,

    pub(crate) committed: RefCell<Arc<EditorState>>,
    pub(crate) draft: RefCell<Option<Draft>>,
    pub(crate) phase: Cell<Phase>,

    /// Depth of the mutator/transform/command stack
    pub(crate) updating: Cell<usize>,
    pub(crate) reading: Cell<usize>,
    pub(crate) flush_scheduled: Cell<bool>,
    pub(crate) microtasks: MicrotaskQueue<Editor>,

    pub(crate) transforms: RefCell<TransformRegistry>,
    pub(crate) commands: RefCell<CommandRegistry>,
    pub(crate) listeners: RefCell<ListenerRegistry>,

    pub(crate) editable: Cell<bool>,
    pub(crate) error_handler: RefCell<ErrorHandler>,
    pub(crate) reconciler: RefCell<Option<Box<dyn Reconciler>>>,
}

#[derive(Clone)]
pub struct Editor {
    pub(crate) inner: Rc<EditorInner>,
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("namespace", &self.inner.config.namespace)
            .field("phase", &self.inner.phase.get())
            .field("version", &self.get_editor_state().version())
            .finish()
    }
}

/// Builds an editor from a config, extra node kinds and replacements
pub struct EditorBuilder {
    config: EditorConfig,
    registry: NodeRegistry,
}

impl Default for EditorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorBuilder {
    pub fn new() -> Self {
        Self {
            config: EditorConfig::default(),
            registry: NodeRegistry::with_builtins(),
        }
    }

    pub fn config(mut self, config: EditorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node(mut self, kind: impl NodeKind + 'static) -> Self {
        self.registry.register(kind);
        self
    }

    /// Construct every `node_type` node through `factory` instead
    pub fn replace(
        mut self,
        node_type: impl Into<String>,
        factory: impl Fn(&NodeRecord) -> NodeRecord + Send + Sync + 'static,
    ) -> Self {
        self.registry.register_replacement(node_type, Arc::new(factory));
        self
    }

    pub fn build(self) -> EditorResult<Editor> {
        self.config.validate()?;
        self.registry.validate()?;

        let registry = Arc::new(self.registry);
        let initial = EditorState::empty(registry.clone())?;
        info!(
            namespace = %self.config.namespace,
            node_types = registry.types().count(),
            "editor created"
        );

        let default_handler: ErrorHandler = Rc::new(|err: &EditorError| {
            error!(class = err.classification(), error = %err, "editor error");
        });

        Ok(Editor {
            inner: Rc::new(EditorInner {
                editable: Cell::new(self.config.editable),
                config: self.config,
                registry,
                keys: KeyGenerator::new(),
                committed: RefCell::new(Arc::new(initial)),
                draft: RefCell::new(None),
                phase: Cell::new(Phase::Idle),
                updating: Cell::new(0),
                reading: Cell::new(0),
                flush_scheduled: Cell::new(false),
                microtasks: MicrotaskQueue::new(),
                transforms: RefCell::new(TransformRegistry::default()),
                commands: RefCell::new(CommandRegistry::default()),
                listeners: RefCell::new(ListenerRegistry::default()),
                error_handler: RefCell::new(default_handler),
                reconciler: RefCell::new(None),
            }),
        })
    }
}

/// Marks the callback stack as active; restores the read depth on exit
struct UpdateScope<'a> {
    inner: &'a EditorInner,
    saved_reading: usize,
}

impl<'a> UpdateScope<'a> {
    fn enter(inner: &'a EditorInner) -> Self {
        inner.updating.set(inner.updating.get() + 1);
        let saved_reading = inner.reading.replace(0);
        Self { inner, saved_reading }
    }
}

impl Drop for UpdateScope<'_> {
    fn drop(&mut self) {
        self.inner.updating.set(self.inner.updating.get() - 1);
        self.inner.reading.set(self.saved_reading);
    }
}

struct ReadScope<'a> {
    inner: &'a EditorInner,
}

impl<'a> ReadScope<'a> {
    fn enter(inner: &'a EditorInner) -> Self {
        inner.reading.set(inner.reading.get() + 1);
        Self { inner }
    }
}

impl Drop for ReadScope<'_> {
    fn drop(&mut self) {
        self.inner.reading.set(self.inner.reading.get() - 1);
    }
}

impl Editor {
    /// Editor with the default config and only the built-in node kinds
    pub fn new() -> EditorResult<Self> {
        EditorBuilder::new().build()
    }

    pub fn builder() -> EditorBuilder {
        EditorBuilder::new()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Latest committed state; pending work is not flushed
    pub fn get_editor_state(&self) -> Arc<EditorState> {
        self.inner.committed.borrow().clone()
    }

    /// True while a draft exists (running, or waiting for its flush)
    pub fn has_pending_update(&self) -> bool {
        self.inner.draft.borrow().is_some()
    }

    pub(crate) fn with_draft<R>(&self, f: impl FnOnce(&mut Draft) -> R) -> Option<R> {
        self.inner.draft.borrow_mut().as_mut().map(f)
    }

    pub(crate) fn inspect_draft<R>(&self, f: impl FnOnce(&Draft) -> R) -> Option<R> {
        self.inner.draft.borrow().as_ref().map(f)
    }

    pub(crate) fn report(&self, error: &EditorError) {
        let handler = self.inner.error_handler.borrow().clone();
        handler(error);
    }

    /// Replace the error collaborator (default: log with `tracing::error!`)
    pub fn set_error_handler(&self, handler: impl Fn(&EditorError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Rc::new(handler);
    }

    /// Attach a render surface; it is immediately built from the committed state
    pub fn set_reconciler(&self, mut reconciler: impl Reconciler + 'static) {
        reconciler.rebuild(&self.get_editor_state());
        *self.inner.reconciler.borrow_mut() = Some(Box::new(reconciler));
    }

    // ---- updates ----

    /// Run `mutator` against the draft and commit the result
    ///
    /// Non-discrete updates are batched: the commit happens at the next
    /// `run_microtasks`, `commit_pending`, `read` or discrete update.
    pub fn update<F>(&self, mutator: F, options: UpdateOptions) -> EditorResult<()>
    where
        F: FnOnce(&Transaction) -> EditorResult<()>,
    {
        self.run_update(mutator, options)
    }

    pub(crate) fn run_update<T, F>(&self, mutator: F, options: UpdateOptions) -> EditorResult<T>
    where
        F: FnOnce(&Transaction) -> EditorResult<T>,
    {
        if self.inner.updating.get() > 0 {
            return self.run_nested(mutator, options);
        }

        let skip_transforms = options.skip_transforms;
        self.begin(options);

        let result = {
            let _scope = UpdateScope::enter(&self.inner);
            let tx = Transaction::new(self, Access::Write);
            mutator(&tx).and_then(|value| {
                self.check_aborted()?;
                self.converge(skip_transforms)?;
                self.check_aborted()?;
                Ok(value)
            })
        };

        match result {
            Ok(value) => {
                let flush_sync = self.inspect_draft(|d| d.flush_sync).unwrap_or(false);
                if flush_sync {
                    self.commit_pending();
                } else {
                    self.schedule_flush();
                }
                Ok(value)
            }
            Err(err) => {
                self.abort(&err);
                Err(err)
            }
        }
    }

    fn run_nested<T, F>(&self, mutator: F, options: UpdateOptions) -> EditorResult<T>
    where
        F: FnOnce(&Transaction) -> EditorResult<T>,
    {
        let absorbed = self.with_draft(|d| absorb(d, options));
        if absorbed.is_none() {
            return Err(EditorError::InvalidOperation(
                "nested update without an open draft".into(),
            ));
        }
        self.check_aborted()?;

        let tx = Transaction::new(self, Access::Write);
        let result = mutator(&tx);
        if let Err(err) = &result {
            self.with_draft(|d| {
                if d.aborted.is_none() {
                    d.aborted = Some(err.clone());
                }
            });
        }
        result
    }

    fn begin(&self, options: UpdateOptions) {
        let mut slot = self.inner.draft.borrow_mut();
        let draft = slot.get_or_insert_with(|| {
            let base = self.get_editor_state();
            debug!(base_version = base.version(), "transaction opened");
            Draft::new(base)
        });
        absorb(draft, options);
        self.inner.phase.set(Phase::Open);
    }

    fn check_aborted(&self) -> EditorResult<()> {
        match self.inspect_draft(|d| d.aborted.clone()).flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Transforms to a fixed point, then drop whatever became unreachable
    fn converge(&self, skip_transforms: bool) -> EditorResult<()> {
        if skip_transforms {
            self.with_draft(|d| d.clear_pass());
        } else {
            transforms::apply_transforms(self, self.inner.config.max_transform_passes)?;
        }
        let collected = self.with_draft(|d| d.collect_garbage()).unwrap_or(0);
        if collected > 0 {
            debug!(collected, "detached nodes collected");
        }
        Ok(())
    }

    fn abort(&self, err: &EditorError) {
        let discarded = self.inner.draft.borrow_mut().take();
        self.inner.phase.set(Phase::Idle);
        warn!(
            class = err.classification(),
            error = %err,
            callbacks = discarded.map(|d| d.callback_count).unwrap_or(0),
            "transaction rolled back"
        );
        self.report(err);
    }

    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.replace(true) {
            return;
        }
        self.inner.microtasks.schedule(Box::new(|editor: &Editor| {
            editor.inner.flush_scheduled.set(false);
            editor.commit_pending();
        }));
    }

    /// Commit the pending draft now
    ///
    /// Inside a running update this only requests a synchronous flush once
    /// the outermost callback returns.
    pub fn commit_pending(&self) {
        if self.inner.updating.get() > 0 {
            self.with_draft(|d| d.flush_sync = true);
            return;
        }
        pipeline::commit(self);
    }

    /// Host microtask checkpoint: run deferred flushes; returns how many tasks ran
    pub fn run_microtasks(&self) -> usize {
        self.inner.microtasks.drain(self)
    }

    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.len()
    }

    /// Run `accessor` against a read-only view
    ///
    /// Outside an update pending work is flushed first and the committed
    /// state is read; inside one the draft is read.
    pub fn read<T, F>(&self, accessor: F) -> EditorResult<T>
    where
        F: FnOnce(&Transaction) -> EditorResult<T>,
    {
        if self.inner.reading.get() > 0 {
            return Err(EditorError::read_only("read inside read"));
        }

        let access = if self.inner.updating.get() > 0 {
            Access::DraftRead
        } else {
            self.commit_pending();
            Access::Read(self.get_editor_state())
        };

        let result = {
            let _scope = ReadScope::enter(&self.inner);
            accessor(&Transaction::new(self, access))
        };
        // Inside an update the error aborts the draft and is reported there.
        if let (Err(err), 0) = (&result, self.inner.updating.get()) {
            self.report(err);
        }
        result
    }

    // ---- state replacement ----

    /// Parse a persisted document with this editor's node kinds
    pub fn parse_editor_state(&self, json: &str) -> EditorResult<EditorState> {
        serialize::parse_state(json, &self.inner.registry, &self.inner.keys)
    }

    /// Replace the committed state wholesale
    pub fn set_editor_state(&self, state: EditorState) -> EditorResult<()> {
        if self.inner.updating.get() > 0 {
            return Err(EditorError::InvalidOperation(
                "cannot replace the editor state during an update".into(),
            ));
        }
        for rec in state.store().records() {
            self.inner.registry.get(&rec.node_type)?;
        }
        state
            .store()
            .check_integrity()
            .map_err(EditorError::InvalidOperation)?;

        self.commit_pending();
        let prev = self.get_editor_state();
        let next = Arc::new(EditorState::from_parts(
            state.store().clone(),
            state.selection().cloned(),
            prev.version() + 1,
            self.inner.registry.clone(),
        ));
        self.inner.keys.reset_past(next.store().keys());

        let mut dirty_elements = IndexMap::new();
        let mut dirty_leaves = IndexSet::new();
        for rec in prev.store().records().chain(next.store().records()) {
            if rec.is_element() {
                dirty_elements.insert(rec.key.clone(), false);
            } else {
                dirty_leaves.insert(rec.key.clone());
            }
        }
        info!(
            version = next.version(),
            nodes = next.len(),
            "editor state replaced"
        );

        pipeline::install(
            self,
            UpdatePayload {
                editor_state: next,
                prev_editor_state: prev,
                dirty_elements,
                dirty_leaves,
                tags: BTreeSet::new(),
            },
        );
        Ok(())
    }

    // ---- registrations ----

    fn handle(&self, slot: Slot) -> Unregister {
        Unregister::new(Rc::downgrade(&self.inner), slot)
    }

    /// Register a transform for `node_type`; existing nodes of that type are
    /// marked dirty so it applies to current content too
    pub fn register_node_transform<F>(&self, node_type: &str, transform: F) -> EditorResult<Unregister>
    where
        F: Fn(&Transaction, &Node) -> EditorResult<()> + 'static,
    {
        self.inner.registry.get(node_type)?;
        let id = self
            .inner
            .transforms
            .borrow_mut()
            .register(node_type, Rc::new(transform));

        let existing = self.get_editor_state().keys_of_type(node_type);
        if !existing.is_empty() {
            self.update(
                |tx| {
                    for key in &existing {
                        if tx.get_node(key).is_some() {
                            tx.mark_dirty(key)?;
                        }
                    }
                    Ok(())
                },
                UpdateOptions::default(),
            )?;
        }

        Ok(self.handle(Slot::Transform {
            node_type: node_type.to_string(),
            id,
        }))
    }

    pub fn register_update_listener(&self, listener: impl Fn(&Editor, &UpdatePayload) + 'static) -> Unregister {
        let slot = self.inner.listeners.borrow_mut().add_update(Rc::new(listener));
        self.handle(slot)
    }

    /// Listen for created/updated/destroyed nodes of `node_type`
    pub fn register_mutation_listener<F>(
        &self,
        node_type: &str,
        listener: F,
        options: MutationListenerOptions,
    ) -> EditorResult<Unregister>
    where
        F: Fn(&Editor, &MutationMap, &MutationMeta) + 'static,
    {
        self.inner.registry.get(node_type)?;
        let listener = Rc::new(listener);
        let slot = self
            .inner
            .listeners
            .borrow_mut()
            .add_mutation(node_type, listener.clone());

        if !options.skip_initialization {
            let state = self.get_editor_state();
            let existing: MutationMap = state
                .keys_of_type(node_type)
                .into_iter()
                .map(|key| (key, NodeMutation::Created))
                .collect();
            if !existing.is_empty() {
                let meta = MutationMeta {
                    update_tags: BTreeSet::from([REGISTER_MUTATION_LISTENER_TAG.to_string()]),
                    dirty_leaves: IndexSet::new(),
                    prev_editor_state: state,
                };
                listener(self, &existing, &meta);
            }
        }
        Ok(self.handle(slot))
    }

    /// Called with the document text whenever a commit changes it
    pub fn register_text_content_listener(&self, listener: impl Fn(&Editor, &str) + 'static) -> Unregister {
        let slot = self
            .inner
            .listeners
            .borrow_mut()
            .add_text_content(Rc::new(listener));
        self.handle(slot)
    }

    pub fn register_editable_listener(&self, listener: impl Fn(&Editor, bool) + 'static) -> Unregister {
        let slot = self
            .inner
            .listeners
            .borrow_mut()
            .add_editable(Rc::new(listener));
        self.handle(slot)
    }

    pub fn is_editable(&self) -> bool {
        self.inner.editable.get()
    }

    pub fn set_editable(&self, editable: bool) {
        if self.inner.editable.replace(editable) == editable {
            return;
        }
        debug!(editable, "editable changed");
        let listeners = self.inner.listeners.borrow().editable_snapshot();
        for listener in listeners {
            listener(self, editable);
        }
    }

    // ---- commands ----

    pub fn register_command<P, F>(&self, command: &Command<P>, handler: F, priority: CommandPriority) -> Unregister
    where
        P: 'static,
        F: Fn(&P, &Transaction) -> EditorResult<bool> + 'static,
    {
        let id = self
            .inner
            .commands
            .borrow_mut()
            .register(command, handler, priority);
        self.handle(Slot::Command {
            name: command.name(),
            id,
        })
    }

    /// Run the handlers of `command` until one returns `true`
    ///
    /// Handlers run inside an update: in-line if one is active, otherwise in
    /// a new one. Returns whether any handler claimed the command.
    pub fn dispatch_command<P: 'static>(&self, command: &Command<P>, payload: P) -> EditorResult<bool> {
        let handlers = self.inner.commands.borrow().snapshot(command.name());
        if handlers.is_empty() {
            return Ok(false);
        }
        debug!(command = command.name(), handlers = handlers.len(), "dispatching command");

        self.run_update(
            |tx| {
                for handler in &handlers {
                    if handler(&payload as &dyn Any, tx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            UpdateOptions::default(),
        )
    }
}

fn absorb(draft: &mut Draft, options: UpdateOptions) {
    draft.callback_count += 1;
    draft.tags.extend(options.tags);
    if let Some(callback) = options.on_update {
        draft.on_update.push(callback);
    }
    if options.discrete {
        draft.flush_sync = true;
    }
}
