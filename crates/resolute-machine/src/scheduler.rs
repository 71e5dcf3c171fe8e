//! Deterministic cooperative scheduler.
//!
//! One scheduler exists per workflow instance. Tasks are boxed futures polled
//! with a no-op waker, strictly in FIFO spawn order, on the caller's thread.
//! [`Scheduler::tick`] sweeps every live task repeatedly until a full sweep
//! makes no progress, where progress means: a task completed, a new task was
//! spawned, a suspension slot handed out its value, or a condition predicate
//! fired. Suspension-point futures report those events through
//! [`SchedulerShared::mark_progress`].
//!
//! The scheduler never reads the wall clock, never spawns threads, and never
//! performs I/O. Everything user code can observe flows in through applied
//! activation jobs, which keeps replay byte-for-byte identical.

use resolute_types::TaskFailure;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

/// A suspended user continuation owned by the scheduler.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle shared with workflow context primitives: spawning and progress
/// marking are the only two scheduler operations reachable from user-facing
/// code.
#[derive(Default)]
pub(crate) struct SchedulerShared {
    spawns: Mutex<Vec<TaskFuture>>,
    progress: AtomicBool,
}

impl SchedulerShared {
    /// Enqueue a new task. It joins the FIFO order behind every live task and
    /// is first polled within the current sweep if one is running.
    pub(crate) fn spawn(&self, task: TaskFuture) {
        self.spawns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
        self.mark_progress();
    }

    /// Record that state observable by suspended tasks changed, forcing
    /// another sweep.
    pub(crate) fn mark_progress(&self) {
        self.progress.store(true, Ordering::Relaxed);
    }

    fn take_progress(&self) -> bool {
        self.progress.swap(false, Ordering::Relaxed)
    }

    fn drain_spawns(&self) -> Vec<TaskFuture> {
        std::mem::take(
            &mut *self
                .spawns
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

pub(crate) struct Scheduler {
    shared: std::sync::Arc<SchedulerShared>,
    /// Live tasks in spawn order. Slots are tombstoned during a sweep and
    /// compacted afterwards so indices stay stable while iterating.
    tasks: Vec<Option<TaskFuture>>,
}

impl Scheduler {
    pub(crate) fn new(shared: std::sync::Arc<SchedulerShared>) -> Self {
        Self {
            shared,
            tasks: Vec::new(),
        }
    }

    /// Number of live (not yet completed) tasks.
    pub(crate) fn live_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_some()).count()
    }

    /// Run every ready task to its next suspension point, sweeping until the
    /// instance quiesces.
    ///
    /// A panic in user code aborts the tick and is reported as a workflow
    /// task failure; the panicking task is dropped and the remaining tasks
    /// are left suspended for the server's retry of the activation.
    pub(crate) fn tick(&mut self) -> Result<(), TaskFailure> {
        // Clear any progress noise left over from job application; the first
        // sweep always runs.
        self.shared.take_progress();

        loop {
            let mut index = 0;
            // New spawns land at the tail and are picked up by this same
            // sweep, preserving FIFO order.
            for spawned in self.shared.drain_spawns() {
                self.tasks.push(Some(spawned));
            }

            while index < self.tasks.len() {
                for spawned in self.shared.drain_spawns() {
                    self.tasks.push(Some(spawned));
                }

                if let Some(task) = &mut self.tasks[index] {
                    let waker = Waker::noop();
                    let mut cx = Context::from_waker(waker);
                    let poll = catch_unwind(AssertUnwindSafe(|| task.as_mut().poll(&mut cx)));
                    match poll {
                        Ok(Poll::Ready(())) => {
                            self.tasks[index] = None;
                            self.shared.mark_progress();
                        }
                        Ok(Poll::Pending) => {}
                        Err(panic) => {
                            self.tasks[index] = None;
                            return Err(TaskFailure::generic(format!(
                                "workflow code panicked: {}",
                                panic_message(panic.as_ref())
                            )));
                        }
                    }
                }
                index += 1;
            }

            self.tasks.retain(Option::is_some);

            if !self.shared.take_progress() {
                return Ok(());
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
