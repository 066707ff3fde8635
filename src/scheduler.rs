//! Deferred execution on the host event loop.
//!
//! The request lifecycle must never fail synchronously from construction:
//! failures are posted as zero-delay continuations and delivered on a later
//! tick. [`Schedule`] is the seam through which a host event loop (a wasm
//! microtask queue, a GUI loop, a test harness) receives those continuations;
//! [`TaskQueue`] is the in-process implementation.

use std::cell::RefCell;
use std::collections::VecDeque;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Posts zero-delay continuations onto the host's event loop.
pub trait Schedule {
    /// Enqueue `task` to run on a later tick, after the current callback
    /// unwinds.
    fn defer(&self, task: Task);
}

/// A plain FIFO task queue for hosts without their own loop.
///
/// Tasks may enqueue further tasks while running; no queue borrow is held
/// across a task invocation.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued tasks until none remain, including tasks scheduled while
    /// draining. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Whether any tasks are pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Schedule for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}
