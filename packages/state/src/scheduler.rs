//! Deferred work queue.
//!
//! The editor runs on a single thread with no event loop of its own. Work that
//! must happen "after the current synchronous call stack" (the batched commit
//! of a non-discrete update) is queued here, and the host drains the queue
//! with `Editor::run_microtasks` at the end of its own turn.

use std::cell::RefCell;
use std::collections::VecDeque;

pub(crate) type Microtask<C> = Box<dyn FnOnce(&C)>;

pub(crate) struct MicrotaskQueue<C> {
    tasks: RefCell<VecDeque<Microtask<C>>>,
}

impl<C> MicrotaskQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn schedule(&self, task: Microtask<C>) {
        self.tasks.borrow_mut().push_back(task);
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run tasks in FIFO order, including tasks queued while draining
    pub(crate) fn drain(&self, context: &C) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before the task runs; tasks may schedule more.
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task(context);
            ran += 1;
        }
        ran
    }
}
