//! Deferred task scheduling
//!
//! A [`GpuTask`] is a unit of deferred work executed against the device.
//! Tasks are pushed with a [`TaskPriority`] relative to the frame lifecycle:
//!
//! - **Immediate** runs synchronously on the caller's thread before `push`
//!   returns; it never enters a queue.
//! - **Apply** is routed into the *target resource's* pending queue and runs
//!   the next time that resource is bound, tying execution to actual use.
//! - **StartOfFrame** / **EndOfFrame** enter one of two MPSC buckets drained
//!   strictly FIFO by the frame driver at the matching boundary.
//!
//! Submission is multi-threaded ([`TaskSender`] and
//! [`ResourceWriter::push_task`](crate::resource::ResourceWriter::push_task)
//! are `Send + Clone`); draining is single-threaded on the render thread,
//! which is the only place a `&mut dyn Device` exists.
//!
//! Repeated per-frame task types come out of a typed [`TaskPool`]; a pooled
//! task returns to its pool once processed, success or failure, so steady
//! state allocates nothing.

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::backend::Device;
use crate::errors::{GpuError, Result};
use crate::resource::{PendingWork, ResourceArena, ResourceKey};

/// A unit of deferred work.
pub trait GpuTask: Send {
    /// Execute against the device. Runs on the render thread only.
    fn process(&mut self, device: &mut dyn Device, resources: &mut ResourceArena) -> Result<()>;

    /// Resource this task operates on; required for `Apply` priority.
    fn target(&self) -> Option<ResourceKey> {
        None
    }
}

type CompletionFn = Box<dyn FnOnce(&Result<()>) + Send>;

/// A task plus its completion-callback list, as held in queues.
///
/// Dropping the envelope drops the task, which is how pooled tasks find
/// their way back to their pool (see [`Pooled`]).
pub struct QueuedTask {
    task: Box<dyn GpuTask>,
    callbacks: SmallVec<[CompletionFn; 1]>,
}

impl QueuedTask {
    pub fn new(task: impl GpuTask + 'static) -> Self {
        Self::from_boxed(Box::new(task))
    }

    #[must_use]
    pub fn from_boxed(task: Box<dyn GpuTask>) -> Self {
        Self {
            task,
            callbacks: SmallVec::new(),
        }
    }

    /// Add a completion callback; callbacks observe the process result and
    /// run in registration order.
    #[must_use]
    pub fn on_complete(mut self, callback: impl FnOnce(&Result<()>) + Send + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    #[must_use]
    pub fn target(&self) -> Option<ResourceKey> {
        self.task.target()
    }

    /// Execute, notify callbacks, and consume the envelope.
    pub(crate) fn run(
        mut self,
        device: &mut dyn Device,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        let result = self.task.process(device, resources);
        for callback in self.callbacks.drain(..) {
            callback(&result);
        }
        result
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("target", &self.target())
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

/// When a task runs relative to the frame lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    Immediate,
    Apply,
    StartOfFrame,
    EndOfFrame,
}

/// The two scheduler-owned priority buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBucket {
    StartOfFrame,
    EndOfFrame,
}

/// Priority-bucketed queues of deferred tasks.
pub struct TaskScheduler {
    start_tx: flume::Sender<QueuedTask>,
    start_rx: flume::Receiver<QueuedTask>,
    end_tx: flume::Sender<QueuedTask>,
    end_rx: flume::Receiver<QueuedTask>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (start_tx, start_rx) = flume::unbounded();
        let (end_tx, end_rx) = flume::unbounded();
        Self {
            start_tx,
            start_rx,
            end_tx,
            end_rx,
        }
    }

    /// Push a task from the render thread.
    ///
    /// `Immediate` executes synchronously before this returns. `Apply`
    /// requires [`GpuTask::target`] and fails with
    /// [`GpuError::TaskWithoutTarget`] otherwise. Frame buckets always
    /// succeed.
    pub fn push(
        &self,
        priority: TaskPriority,
        task: QueuedTask,
        device: &mut dyn Device,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        match priority {
            TaskPriority::Immediate => task.run(device, resources),
            TaskPriority::Apply => {
                let key = task.target().ok_or(GpuError::TaskWithoutTarget)?;
                resources.push_work(key, PendingWork::Task(task))
            }
            TaskPriority::StartOfFrame => {
                self.start_tx
                    .send(task)
                    .expect("scheduler owns the receiver");
                Ok(())
            }
            TaskPriority::EndOfFrame => {
                self.end_tx.send(task).expect("scheduler owns the receiver");
                Ok(())
            }
        }
    }

    /// Cross-thread handle into the frame buckets.
    #[must_use]
    pub fn sender(&self) -> TaskSender {
        TaskSender {
            start: self.start_tx.clone(),
            end: self.end_tx.clone(),
        }
    }

    /// Number of tasks currently queued in `bucket`.
    #[must_use]
    pub fn queued(&self, bucket: FrameBucket) -> usize {
        match bucket {
            FrameBucket::StartOfFrame => self.start_rx.len(),
            FrameBucket::EndOfFrame => self.end_rx.len(),
        }
    }

    /// Drain one bucket in strict FIFO order. Render thread only.
    ///
    /// Tasks pushed *while* draining run at the next drain, not this one.
    /// Every snapshot task runs even if an earlier one failed; the first
    /// failure is reported after the pass.
    pub fn drain(
        &self,
        bucket: FrameBucket,
        device: &mut dyn Device,
        resources: &mut ResourceArena,
    ) -> Result<usize> {
        let rx = match bucket {
            FrameBucket::StartOfFrame => &self.start_rx,
            FrameBucket::EndOfFrame => &self.end_rx,
        };
        let batch: Vec<QueuedTask> = rx.try_iter().collect();
        let count = batch.len();

        let mut first_err = None;
        for task in batch {
            if let Err(e) = task.run(device, resources) {
                log::warn!("deferred task failed during {bucket:?} drain: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(count),
            Some(e) => Err(e),
        }
    }
}

/// `Send + Clone` handle for pushing into the frame buckets from any thread.
#[derive(Clone)]
pub struct TaskSender {
    start: flume::Sender<QueuedTask>,
    end: flume::Sender<QueuedTask>,
}

impl TaskSender {
    pub fn push(&self, bucket: FrameBucket, task: QueuedTask) -> Result<()> {
        let tx = match bucket {
            FrameBucket::StartOfFrame => &self.start,
            FrameBucket::EndOfFrame => &self.end,
        };
        tx.send(task).map_err(|_| GpuError::SchedulerShutDown)
    }
}

/// Typed free-list of tasks of one concrete type.
///
/// Parameterized at the call site instead of keyed by runtime type identity;
/// the scheduler only ever sees `Box<dyn GpuTask>`.
pub struct TaskPool<T: GpuTask> {
    free: Arc<Mutex<Vec<T>>>,
}

impl<T: GpuTask> Clone for TaskPool<T> {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
        }
    }
}

impl<T: GpuTask> Default for TaskPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GpuTask> TaskPool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take a pooled task, constructing a fresh one with `init` when the
    /// pool is cold. The caller is expected to overwrite any stale fields.
    pub fn acquire_with(&self, init: impl FnOnce() -> T) -> Pooled<T> {
        let task = self.free.lock().pop().unwrap_or_else(init);
        Pooled {
            task: Some(task),
            home: Arc::clone(&self.free),
        }
    }

    pub fn acquire(&self) -> Pooled<T>
    where
        T: Default,
    {
        self.acquire_with(T::default)
    }

    /// Tasks currently resting in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// A task borrowed from a [`TaskPool`]; returns to the pool when dropped,
/// which happens right after the scheduler finishes `process`, whether it
/// succeeded or failed.
pub struct Pooled<T: GpuTask> {
    task: Option<T>,
    home: Arc<Mutex<Vec<T>>>,
}

impl<T: GpuTask> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.task.as_ref().expect("pooled task already recycled")
    }
}

impl<T: GpuTask> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.task.as_mut().expect("pooled task already recycled")
    }
}

impl<T: GpuTask> GpuTask for Pooled<T> {
    fn process(&mut self, device: &mut dyn Device, resources: &mut ResourceArena) -> Result<()> {
        self.task
            .as_mut()
            .expect("pooled task already recycled")
            .process(device, resources)
    }

    fn target(&self) -> Option<ResourceKey> {
        self.task
            .as_ref()
            .expect("pooled task already recycled")
            .target()
    }
}

impl<T: GpuTask> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.home.lock().push(task);
        }
    }
}
