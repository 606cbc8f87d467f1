//! Versioned resources and the pending-operation queue
//!
//! A [`VersionedResource`] wraps one backend object with a monotonically
//! increasing version counter and a FIFO of pending mutations. Mutations are
//! *not* applied when enqueued; they are applied exactly once, in order, the
//! next time the resource participates in a bind. The version is bumped once
//! per drain pass, not once per operation, so dependent slots see a single
//! dirty transition per frame.
//!
//! # Threading
//!
//! Producers (content streaming, background decode) hold a cloneable
//! [`ResourceWriter`] and only ever append to the resource's MPSC channel.
//! Draining, and every other mutation of the resource itself, happens on the
//! render thread through `&mut ResourceArena`, so the resource needs no
//! internal locking.

mod ops;

use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::backend::{BackendHandle, Device, Extent};
use crate::binding::{QueueId, SlotAddr};
use crate::errors::{GpuError, Result};
use crate::tasks::QueuedTask;

pub use ops::{PendingWork, ReadConsumer, ResourceOp};

new_key_type! {
    /// Arena handle of a [`VersionedResource`]. Slots reference resources by
    /// key and resources back-reference slots by address, so there are no
    /// object cycles and teardown order is irrelevant.
    pub struct ResourceKey;
}

bitflags! {
    /// Bind capabilities a resource was created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        /// The resource tolerates being bound as input and output at the
        /// same time; slots targeting it never conflict.
        const SIMULTANEOUS_RW = 1 << 6;
    }
}

/// Closed set of resource kinds this core tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Shader,
}

/// Everything the arena needs to wrap a backend object. The native object
/// itself is allocated by an external factory; this core never creates one.
#[derive(Debug, Clone)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    pub flags: BindFlags,
    pub extent: Extent,
    pub handle: BackendHandle,
    pub label: String,
}

impl ResourceDesc {
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        flags: BindFlags,
        extent: Extent,
        handle: BackendHandle,
        label: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            flags,
            extent,
            handle,
            label: label.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        let reason = match self.kind {
            ResourceKind::Shader if !self.flags.is_empty() => {
                Some("shaders take no bind capabilities")
            }
            ResourceKind::Buffer
                if self
                    .flags
                    .intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) =>
            {
                Some("buffers cannot be render or depth targets")
            }
            ResourceKind::Texture
                if self
                    .flags
                    .intersects(BindFlags::VERTEX | BindFlags::INDEX | BindFlags::CONSTANT) =>
            {
                Some("textures cannot carry buffer bind flags")
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(GpuError::InvalidResourceDesc {
                label: self.label.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Lifecycle observer invoked by the arena in strict order:
/// pre-create → create-or-fail → post-create, and destroyed on release.
#[allow(unused_variables)]
pub trait ResourceObserver {
    fn pre_create(&mut self, desc: &ResourceDesc) {}
    fn created(&mut self, key: ResourceKey, desc: &ResourceDesc) {}
    fn post_create(&mut self, key: ResourceKey) {}
    fn destroyed(&mut self, key: ResourceKey, handle: BackendHandle) {}
}

/// A GPU-resident object with a version counter and a pending-work FIFO.
pub struct VersionedResource {
    handle: BackendHandle,
    kind: ResourceKind,
    flags: BindFlags,
    extent: Extent,
    label: String,
    version: u64,
    next_bind_id: u64,
    /// Back-references only; the slots own nothing.
    bound_to: SmallVec<[(QueueId, SlotAddr); 4]>,
    pending_tx: flume::Sender<PendingWork>,
    pending_rx: flume::Receiver<PendingWork>,
}

impl VersionedResource {
    fn new(desc: ResourceDesc) -> Self {
        let (pending_tx, pending_rx) = flume::unbounded();
        Self {
            handle: desc.handle,
            kind: desc.kind,
            flags: desc.flags,
            extent: desc.extent,
            label: desc.label,
            version: 0,
            next_bind_id: 0,
            bound_to: SmallVec::new(),
            pending_tx,
            pending_rx,
        }
    }

    #[must_use]
    pub fn handle(&self) -> BackendHandle {
        self.handle
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn flags(&self) -> BindFlags {
        self.flags
    }

    #[must_use]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current version. Only increases; bumped once per drain pass that
    /// applied at least one mutation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Slots currently holding a bound reference to this resource.
    #[must_use]
    pub fn bound_to(&self) -> &[(QueueId, SlotAddr)] {
        &self.bound_to
    }

    /// Whether any pending work is queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_rx.is_empty()
    }

    fn take_bind_id(&mut self) -> u64 {
        self.next_bind_id += 1;
        self.next_bind_id
    }
}

impl std::fmt::Debug for VersionedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedResource")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("extent", &self.extent)
            .field("bound_to", &self.bound_to.len())
            .field("pending", &self.pending_rx.len())
            .finish_non_exhaustive()
    }
}

/// Cloneable producer handle for one resource's pending-work queue.
///
/// Safe to use from any thread; only appends. All sends fail with
/// [`GpuError::ResourceDestroyed`] once the resource has been released.
#[derive(Clone)]
pub struct ResourceWriter {
    key: ResourceKey,
    tx: flume::Sender<PendingWork>,
}

impl ResourceWriter {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn push_op(&self, op: ResourceOp) -> Result<()> {
        self.tx
            .send(PendingWork::Op(op))
            .map_err(|_| GpuError::ResourceDestroyed)
    }

    /// Queue an apply-priority task; it runs the next time the resource is
    /// bound.
    pub fn push_task(&self, task: QueuedTask) -> Result<()> {
        self.tx
            .send(PendingWork::Task(task))
            .map_err(|_| GpuError::ResourceDestroyed)
    }

    pub fn write(&self, offset: u64, data: Vec<u8>) -> Result<()> {
        self.push_op(ResourceOp::Write { offset, data })
    }

    pub fn read(
        &self,
        offset: u64,
        len: u64,
        consumer: impl FnOnce(Result<Vec<u8>>) + Send + 'static,
    ) -> Result<()> {
        self.push_op(ResourceOp::Read {
            offset,
            len,
            consumer: Box::new(consumer),
        })
    }

    pub fn copy_from(&self, src: ResourceKey) -> Result<()> {
        self.push_op(ResourceOp::CopyFrom { src })
    }

    pub fn resize(&self, extent: Extent) -> Result<()> {
        self.push_op(ResourceOp::Resize { extent })
    }
}

/// Arena of every [`VersionedResource`] known to the core.
///
/// Lives on the render thread; all mutation goes through `&mut self`.
#[derive(Default)]
pub struct ResourceArena {
    resources: SlotMap<ResourceKey, VersionedResource>,
    observers: Vec<Box<dyn ResourceObserver>>,
}

impl ResourceArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lifecycle observer. Observers are invoked in registration
    /// order.
    pub fn add_observer(&mut self, observer: Box<dyn ResourceObserver>) {
        self.observers.push(observer);
    }

    /// Wrap a factory-supplied backend object.
    ///
    /// Observer order is strict: every `pre_create` runs before the
    /// description is validated (create-or-fail), and `created`/`post_create`
    /// only run when creation succeeded.
    pub fn create(&mut self, desc: ResourceDesc) -> Result<ResourceKey> {
        for observer in &mut self.observers {
            observer.pre_create(&desc);
        }
        desc.validate()?;
        let key = self.resources.insert(VersionedResource::new(desc.clone()));
        for observer in &mut self.observers {
            observer.created(key, &desc);
        }
        for observer in &mut self.observers {
            observer.post_create(key);
        }
        Ok(key)
    }

    /// Release a resource, returning the backend handle for the factory to
    /// free. Fails while slots still hold bound back-references; callers
    /// evict the resource from its queues first (or use
    /// [`BindQueue::evict`](crate::queue::BindQueue::evict)).
    pub fn destroy(&mut self, key: ResourceKey) -> Result<BackendHandle> {
        let resource = self.resources.get(key).ok_or(GpuError::MissingResource(key))?;
        if !resource.bound_to.is_empty() {
            return Err(GpuError::ResourceStillBound {
                label: resource.label.clone(),
                count: resource.bound_to.len(),
            });
        }
        let resource = self.resources.remove(key).expect("presence checked above");
        let dropped = resource.pending_rx.len();
        if dropped > 0 {
            log::warn!(
                "destroying '{}' with {dropped} pending operation(s) never applied",
                resource.label
            );
        }
        for observer in &mut self.observers {
            observer.destroyed(key, resource.handle);
        }
        Ok(resource.handle)
    }

    #[must_use]
    pub fn get(&self, key: ResourceKey) -> Option<&VersionedResource> {
        self.resources.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Producer handle for cross-thread writes against `key`.
    pub fn writer(&self, key: ResourceKey) -> Result<ResourceWriter> {
        let resource = self.expect(key)?;
        Ok(ResourceWriter {
            key,
            tx: resource.pending_tx.clone(),
        })
    }

    /// Render-thread shortcut past the channel clone.
    pub fn push_work(&self, key: ResourceKey, work: PendingWork) -> Result<()> {
        self.expect(key)?
            .pending_tx
            .send(work)
            .map_err(|_| GpuError::ResourceDestroyed)
    }

    /// Drain the resource's pending-work FIFO against the device.
    ///
    /// Returns `true` if at least one mutation was applied, in which case the
    /// version was bumped exactly once. Read-backs do not bump the version.
    /// Once a resize actually changed dimensions, later read-backs in the
    /// same pass are invalidated.
    ///
    /// A fault mid-batch still bumps the version when earlier operations
    /// already committed; the unapplied tail of the batch is dropped with a
    /// warning and the fault propagates.
    pub fn apply_pending(&mut self, key: ResourceKey, device: &mut dyn Device) -> Result<bool> {
        let batch: SmallVec<[PendingWork; 8]> = self.expect(key)?.pending_rx.try_iter().collect();
        if batch.is_empty() {
            return Ok(false);
        }

        let mut mutated = false;
        let mut resized = false;
        let mut first_err = None;
        let mut dropped = 0usize;
        for work in batch {
            if first_err.is_some() {
                dropped += 1;
                continue;
            }
            let result = match work {
                PendingWork::Op(op) => self.apply_op(key, op, device, &mut mutated, &mut resized),
                PendingWork::Task(task) => task.run(device, self).map(|()| mutated = true),
            };
            if let Err(e) = result {
                first_err = Some(e);
            }
        }

        // Operations committed before a fault are real device mutations;
        // slots caching the old version must still see this drain as dirty.
        if mutated {
            let resource = &mut self.resources[key];
            resource.version = resource.version.wrapping_add(1);
        }
        match first_err {
            None => Ok(mutated),
            Some(e) => {
                if dropped > 0 {
                    let label = self
                        .resources
                        .get(key)
                        .map_or("<destroyed>", |r| r.label.as_str());
                    log::warn!(
                        "fault on '{label}' dropped {dropped} queued operation(s) behind it"
                    );
                }
                Err(e)
            }
        }
    }

    fn apply_op(
        &mut self,
        key: ResourceKey,
        op: ResourceOp,
        device: &mut dyn Device,
        mutated: &mut bool,
        resized: &mut bool,
    ) -> Result<()> {
        match op {
            ResourceOp::Write { offset, data } => {
                let handle = self.expect(key)?.handle;
                device
                    .write(handle, offset, &data)
                    .map_err(|e| self.fault(key, e))?;
                *mutated = true;
            }
            ResourceOp::Read {
                offset,
                len,
                consumer,
            } => {
                if *resized {
                    let label = self.expect(key)?.label.clone();
                    log::warn!("read-back on '{label}' dropped: invalidated by earlier resize");
                    consumer(Err(GpuError::ReadInvalidated { label }));
                    return Ok(());
                }
                let handle = self.expect(key)?.handle;
                match device.read(handle, offset, len) {
                    Ok(bytes) => consumer(Ok(bytes)),
                    Err(e) => {
                        let label = self.expect(key)?.label.clone();
                        consumer(Err(GpuError::ResourceFault {
                            label: label.clone(),
                            source: crate::errors::BackendError(e.to_string()),
                        }));
                        return Err(GpuError::ResourceFault {
                            label,
                            source: e,
                        });
                    }
                }
            }
            ResourceOp::CopyFrom { src } => {
                let src_handle = self.expect(src)?.handle;
                let dst_handle = self.expect(key)?.handle;
                device
                    .copy(src_handle, dst_handle)
                    .map_err(|e| self.fault(key, e))?;
                *mutated = true;
            }
            ResourceOp::Resize { extent } => {
                let resource = self.expect(key)?;
                if resource.extent == extent {
                    log::trace!("no-op resize on '{}' dropped", resource.label);
                    return Ok(());
                }
                let new_handle = device
                    .resize(resource.handle, extent)
                    .map_err(|e| self.fault(key, e))?;
                let resource = &mut self.resources[key];
                resource.handle = new_handle;
                resource.extent = extent;
                *mutated = true;
                *resized = true;
            }
        }
        Ok(())
    }

    fn fault(&self, key: ResourceKey, source: crate::errors::BackendError) -> GpuError {
        let label = self
            .resources
            .get(key)
            .map_or_else(|| format!("{key:?}"), |r| r.label.clone());
        GpuError::ResourceFault { label, source }
    }

    pub(crate) fn expect(&self, key: ResourceKey) -> Result<&VersionedResource> {
        self.resources.get(key).ok_or(GpuError::MissingResource(key))
    }

    pub(crate) fn take_bind_id(&mut self, key: ResourceKey) -> Result<u64> {
        self.resources
            .get_mut(key)
            .ok_or(GpuError::MissingResource(key))
            .map(VersionedResource::take_bind_id)
    }

    pub(crate) fn add_bound(&mut self, key: ResourceKey, queue: QueueId, addr: SlotAddr) {
        if let Some(resource) = self.resources.get_mut(key) {
            if !resource.bound_to.contains(&(queue, addr)) {
                resource.bound_to.push((queue, addr));
            }
        }
    }

    pub(crate) fn remove_bound(&mut self, key: ResourceKey, queue: QueueId, addr: SlotAddr) {
        if let Some(resource) = self.resources.get_mut(key) {
            resource.bound_to.retain(|entry| *entry != (queue, addr));
        }
    }
}
