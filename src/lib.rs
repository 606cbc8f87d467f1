#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod binding;
pub mod errors;
pub mod frame;
pub mod queue;
pub mod resource;
pub mod state;
pub mod tasks;

pub use backend::{BackendHandle, Device, Extent, Fence, QueueBinder, QueueLimits};
pub use binding::{BindMask, BindingSlot, QueueId, ResolveOutcome, SlotAddr, SlotContainer, SlotGroup};
pub use errors::{BackendError, BackendResult, GpuError, Result};
pub use frame::{CommandList, FrameRing, TrackedFrame};
pub use queue::{BindQueue, ResolveReport};
pub use resource::{
    BindFlags, PendingWork, ResourceArena, ResourceDesc, ResourceKey, ResourceKind,
    ResourceObserver, ResourceOp, ResourceWriter, VersionedResource,
};
pub use state::{DrawValidation, PipelineState};
pub use tasks::{
    FrameBucket, GpuTask, Pooled, QueuedTask, TaskPool, TaskPriority, TaskScheduler, TaskSender,
};
