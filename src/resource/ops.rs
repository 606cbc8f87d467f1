use crate::backend::Extent;
use crate::errors::Result;
use crate::resource::ResourceKey;
use crate::tasks::QueuedTask;

/// Consumer of a read-back result. Receives `Err` when the read was refused
/// by the backend or invalidated by a resize earlier in the same drain pass.
pub type ReadConsumer = Box<dyn FnOnce(Result<Vec<u8>>) + Send>;

/// A single queued mutation against a resource.
///
/// Operations are appended by producers on any thread and applied exactly
/// once, in FIFO order, the next time the resource participates in a bind
/// (or when an immediate-priority task forces a drain).
pub enum ResourceOp {
    /// Write `data` into the resource at `offset` bytes.
    Write { offset: u64, data: Vec<u8> },
    /// Read `len` bytes back from `offset` and hand them to `consumer`.
    Read {
        offset: u64,
        len: u64,
        consumer: ReadConsumer,
    },
    /// Copy the full contents of another resource into this one.
    CopyFrom { src: ResourceKey },
    /// Recreate the backend object with new dimensions. A no-op resize
    /// (identical extent) is dropped without touching the backend or the
    /// version counter.
    Resize { extent: Extent },
}

impl std::fmt::Debug for ResourceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { offset, data } => f
                .debug_struct("Write")
                .field("offset", offset)
                .field("len", &data.len())
                .finish(),
            Self::Read { offset, len, .. } => f
                .debug_struct("Read")
                .field("offset", offset)
                .field("len", len)
                .finish_non_exhaustive(),
            Self::CopyFrom { src } => f.debug_struct("CopyFrom").field("src", src).finish(),
            Self::Resize { extent } => f.debug_struct("Resize").field("extent", extent).finish(),
        }
    }
}

/// An entry in a resource's pending-work queue.
///
/// Apply-priority tasks ride the same FIFO as plain mutation operations so
/// that both run at the point the resource is next used by the device.
pub enum PendingWork {
    Op(ResourceOp),
    Task(QueuedTask),
}
