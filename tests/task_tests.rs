//! Task Scheduler & Pool Tests
//!
//! Tests for:
//! - Immediate tasks executing synchronously before push returns
//! - Frame-bucket tasks deferring until the matching drain, strict FIFO
//! - Apply tasks riding the target resource's pending queue until bind
//! - Completion callbacks observing the result in registration order
//! - A failing task not stopping the rest of the drain pass
//! - Cross-thread submission through a cloned sender
//! - Typed task pools recycling processed tasks

mod common;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{MockDevice, RecordingBinder, vertex_buffer};
use vesper_gpu::{
    BindQueue, Device, FrameBucket, GpuError, GpuTask, QueueId, QueueLimits, QueuedTask,
    ResourceArena, ResourceKey, Result, TaskPool, TaskPriority, TaskScheduler,
};

/// Task double that counts executions and optionally fails.
struct CountingTask {
    hits: Arc<AtomicUsize>,
    target: Option<ResourceKey>,
    fail: bool,
}

impl CountingTask {
    fn new(hits: &Arc<AtomicUsize>) -> Self {
        Self {
            hits: Arc::clone(hits),
            target: None,
            fail: false,
        }
    }
}

impl GpuTask for CountingTask {
    fn process(&mut self, _device: &mut dyn Device, _resources: &mut ResourceArena) -> Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GpuError::ResourceDestroyed);
        }
        Ok(())
    }

    fn target(&self) -> Option<ResourceKey> {
        self.target
    }
}

/// Task double that appends its tag to a shared log.
struct TagTask {
    tag: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl GpuTask for TagTask {
    fn process(&mut self, _device: &mut dyn Device, _resources: &mut ResourceArena) -> Result<()> {
        self.log.lock().unwrap().push(self.tag);
        Ok(())
    }
}

#[test]
fn immediate_tasks_run_before_push_returns() {
    common::init_logger();
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    scheduler
        .push(
            TaskPriority::Immediate,
            QueuedTask::new(CountingTask::new(&hits)),
            &mut device,
            &mut resources,
        )
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.queued(FrameBucket::StartOfFrame), 0);
    assert_eq!(scheduler.queued(FrameBucket::EndOfFrame), 0);
}

#[test]
fn frame_bucket_tasks_defer_until_drain() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    scheduler
        .push(
            TaskPriority::EndOfFrame,
            QueuedTask::new(CountingTask::new(&hits)),
            &mut device,
            &mut resources,
        )
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.queued(FrameBucket::EndOfFrame), 1);

    // Buckets are independent; draining the wrong one runs nothing.
    let ran = scheduler
        .drain(FrameBucket::StartOfFrame, &mut device, &mut resources)
        .unwrap();
    assert_eq!(ran, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let ran = scheduler
        .drain(FrameBucket::EndOfFrame, &mut device, &mut resources)
        .unwrap();
    assert_eq!(ran, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.queued(FrameBucket::EndOfFrame), 0);
}

#[test]
fn drain_runs_strictly_fifo() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        scheduler
            .push(
                TaskPriority::StartOfFrame,
                QueuedTask::new(TagTask {
                    tag,
                    log: Arc::clone(&log),
                }),
                &mut device,
                &mut resources,
            )
            .unwrap();
    }
    scheduler
        .drain(FrameBucket::StartOfFrame, &mut device, &mut resources)
        .unwrap();

    assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
}

#[test]
fn apply_tasks_run_when_the_target_binds() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let mut binder = RecordingBinder::new();
    let mut queue = BindQueue::new(QueueId(0), QueueLimits::default());
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let vb = vertex_buffer(&mut resources, 1);
    let mut task = CountingTask::new(&hits);
    task.target = Some(vb);
    scheduler
        .push(
            TaskPriority::Apply,
            QueuedTask::new(task),
            &mut device,
            &mut resources,
        )
        .unwrap();

    // Queued, not run: the resource has not been bound yet.
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(resources.get(vb).unwrap().has_pending());

    queue.set_vertex_stream(0, Some(vb), &mut resources).unwrap();
    queue
        .resolve_all(&mut resources, &mut device, &mut binder)
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // The task counts as a mutation of its target.
    assert_eq!(resources.get(vb).unwrap().version(), 1);
}

#[test]
fn apply_without_a_target_is_rejected() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let err = scheduler
        .push(
            TaskPriority::Apply,
            QueuedTask::new(CountingTask::new(&hits)),
            &mut device,
            &mut resources,
        )
        .unwrap_err();

    assert!(matches!(err, GpuError::TaskWithoutTarget));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn completion_callbacks_observe_result_in_order() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let log_a = Arc::clone(&log);
    let log_b = Arc::clone(&log);
    let mut task = CountingTask::new(&hits);
    task.fail = true;
    let task = QueuedTask::new(task)
        .on_complete(move |result| {
            log_a.lock().unwrap().push(("a", result.is_err()));
        })
        .on_complete(move |result| {
            log_b.lock().unwrap().push(("b", result.is_err()));
        });

    let err = scheduler
        .push(TaskPriority::Immediate, task, &mut device, &mut resources)
        .unwrap_err();
    assert!(matches!(err, GpuError::ResourceDestroyed));
    assert_eq!(*log.lock().unwrap(), [("a", true), ("b", true)]);
}

#[test]
fn one_failure_does_not_stop_the_drain_pass() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let mut failing = CountingTask::new(&hits);
    failing.fail = true;
    scheduler
        .push(
            TaskPriority::EndOfFrame,
            QueuedTask::new(failing),
            &mut device,
            &mut resources,
        )
        .unwrap();
    scheduler
        .push(
            TaskPriority::EndOfFrame,
            QueuedTask::new(CountingTask::new(&hits)),
            &mut device,
            &mut resources,
        )
        .unwrap();

    let err = scheduler
        .drain(FrameBucket::EndOfFrame, &mut device, &mut resources)
        .unwrap_err();
    assert!(matches!(err, GpuError::ResourceDestroyed));
    // The healthy task still ran.
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn sender_pushes_from_another_thread() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let sender = scheduler.sender();
    let thread_hits = Arc::clone(&hits);
    std::thread::spawn(move || {
        sender
            .push(
                FrameBucket::StartOfFrame,
                QueuedTask::new(CountingTask::new(&thread_hits)),
            )
            .unwrap();
    })
    .join()
    .unwrap();

    let ran = scheduler
        .drain(FrameBucket::StartOfFrame, &mut device, &mut resources)
        .unwrap();
    assert_eq!(ran, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn sender_fails_after_scheduler_drops() {
    let scheduler = TaskScheduler::new();
    let sender = scheduler.sender();
    drop(scheduler);

    let hits = Arc::new(AtomicUsize::new(0));
    let err = sender
        .push(
            FrameBucket::EndOfFrame,
            QueuedTask::new(CountingTask::new(&hits)),
        )
        .unwrap_err();
    assert!(matches!(err, GpuError::SchedulerShutDown));
}

#[test]
fn pool_recycles_dropped_tasks() {
    let pool: TaskPool<CountingTask> = TaskPool::new();
    let hits = Arc::new(AtomicUsize::new(0));

    assert_eq!(pool.idle(), 0);
    let pooled = pool.acquire_with(|| CountingTask::new(&hits));
    assert_eq!(pool.idle(), 0);
    drop(pooled);
    assert_eq!(pool.idle(), 1);

    // Reacquiring takes the recycled task back out.
    let reused = pool.acquire_with(|| CountingTask::new(&hits));
    assert_eq!(pool.idle(), 0);
    drop(reused);
}

#[test]
fn pooled_task_returns_home_after_processing() {
    let mut resources = ResourceArena::new();
    let mut device = MockDevice::new();
    let scheduler = TaskScheduler::new();
    let pool: TaskPool<CountingTask> = TaskPool::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let pooled = pool.acquire_with(|| CountingTask::new(&hits));
    scheduler
        .push(
            TaskPriority::EndOfFrame,
            QueuedTask::new(pooled),
            &mut device,
            &mut resources,
        )
        .unwrap();
    assert_eq!(pool.idle(), 0);

    scheduler
        .drain(FrameBucket::EndOfFrame, &mut device, &mut resources)
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(pool.idle(), 1);
}
