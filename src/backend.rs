//! Abstract backend surface
//!
//! The binding core never calls a native graphics API. Everything it needs
//! from the concrete backend is expressed through the traits in this module:
//! [`Device`] for mapping/copy/resize primitives, [`Fence`] for GPU-to-CPU
//! completion signals, and [`QueueBinder`] for the actual bind/unbind calls
//! a submission queue issues once slot diffs are resolved.
//!
//! A backend object is named by an opaque [`BackendHandle`]; the wrapping
//! [`VersionedResource`](crate::resource::VersionedResource) owns its handle
//! exclusively and is the only place it is stored.

use std::time::Duration;

use crate::binding::{SlotAddr, SlotContainer};
use crate::errors::BackendResult;

/// Opaque name of a native backend object (buffer, texture, shader,
/// command list). Meaningful only to the backend that issued it.
pub type BackendHandle = u64;

/// Dimensions of a GPU resource.
///
/// Buffers use [`Extent::linear`]; textures use the full three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    #[must_use]
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Extent of a linear buffer of `len` bytes.
    #[must_use]
    pub const fn linear(len: u32) -> Self {
        Self {
            width: len,
            height: 1,
            depth: 1,
        }
    }
}

/// Mapping and transfer primitives of the concrete backend.
///
/// Called only from the render thread, while draining a resource's
/// pending-operation queue or executing a task. A refusal is wrapped into
/// [`GpuError::ResourceFault`](crate::errors::GpuError::ResourceFault) by
/// the caller, which knows the resource identity.
pub trait Device {
    /// Write `data` into the object at `offset` bytes.
    fn write(&mut self, handle: BackendHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Read `len` bytes back from the object at `offset`.
    fn read(&mut self, handle: BackendHandle, offset: u64, len: u64) -> BackendResult<Vec<u8>>;

    /// Copy the full contents of `src` into `dst`.
    fn copy(&mut self, src: BackendHandle, dst: BackendHandle) -> BackendResult<()>;

    /// Recreate the object with new dimensions, returning the handle of the
    /// replacement object. The old handle is invalid afterwards.
    fn resize(&mut self, handle: BackendHandle, extent: Extent) -> BackendResult<BackendHandle>;
}

/// A GPU-to-CPU completion signal.
pub trait Fence: Send {
    /// Wait for the fence to signal.
    ///
    /// `None` blocks until signaled; `Some(Duration::ZERO)` is a
    /// non-blocking poll. Returns `true` if the fence signaled within the
    /// timeout.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Non-blocking poll.
    fn is_signaled(&self) -> bool {
        self.wait(Some(Duration::ZERO))
    }
}

/// Bind/unbind surface of one submission queue.
///
/// Invoked by [`BindQueue::resolve_all`](crate::queue::BindQueue::resolve_all)
/// once slot diffs are known. Group containers additionally receive a single
/// [`QueueBinder::bind_range`] call covering the contiguous changed index
/// range, letting the backend issue one bulk bind instead of per-slot calls.
pub trait QueueBinder {
    /// A resolved slot now holds `handle`.
    fn bind(&mut self, addr: SlotAddr, handle: BackendHandle);

    /// A resolved slot no longer holds a resource.
    fn unbind(&mut self, addr: SlotAddr);

    /// At least one slot in `container` changed; `first..=last` is the
    /// contiguous changed index range.
    fn bind_range(&mut self, container: SlotContainer, first: u16, last: u16);

    /// Backend-specific hook invoked by a full queue reset.
    fn reset(&mut self) {}
}

/// Capacities a submission queue's pipeline state is sized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_render_targets: usize,
    pub max_vertex_streams: usize,
    pub max_constant_buffers: usize,
    pub max_shader_resources: usize,
    /// Maximum dispatch group count per dimension.
    pub max_compute_groups: [u32; 3],
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_render_targets: 8,
            max_vertex_streams: 16,
            max_constant_buffers: 14,
            max_shader_resources: 16,
            max_compute_groups: [65_535; 3],
        }
    }
}
