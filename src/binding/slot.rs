use bitflags::bitflags;

use crate::resource::{BindFlags, ResourceKey, ResourceKind};

/// Identity of one submission queue. Resources may be bound on several
/// queues at once; conflict resolution only runs within a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u32);

bitflags! {
    /// Direction a slot position uses a resource in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindMask: u8 {
        /// The pipeline reads through this slot (shader resources, vertex
        /// streams, constant buffers).
        const INPUT = 1 << 0;
        /// The pipeline writes through this slot (render targets, depth).
        const OUTPUT = 1 << 1;
    }
}

/// The slot containers a submission queue exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotContainer {
    Shader,
    RenderTarget,
    DepthTarget,
    VertexStream,
    IndexBuffer,
    ConstantBuffer,
    ShaderResource,
}

impl SlotContainer {
    /// Direction this container uses its resources in.
    #[must_use]
    pub fn mask(self) -> BindMask {
        match self {
            Self::RenderTarget | Self::DepthTarget => BindMask::OUTPUT,
            _ => BindMask::INPUT,
        }
    }

    /// Whether a resource of the given kind and capability flags may be
    /// requested on this container at all.
    #[must_use]
    pub fn accepts(self, kind: ResourceKind, flags: BindFlags) -> bool {
        match self {
            Self::Shader => kind == ResourceKind::Shader,
            Self::RenderTarget => {
                kind == ResourceKind::Texture && flags.contains(BindFlags::RENDER_TARGET)
            }
            Self::DepthTarget => {
                kind == ResourceKind::Texture && flags.contains(BindFlags::DEPTH_STENCIL)
            }
            Self::VertexStream => {
                kind == ResourceKind::Buffer && flags.contains(BindFlags::VERTEX)
            }
            Self::IndexBuffer => kind == ResourceKind::Buffer && flags.contains(BindFlags::INDEX),
            Self::ConstantBuffer => {
                kind == ResourceKind::Buffer && flags.contains(BindFlags::CONSTANT)
            }
            Self::ShaderResource => flags.contains(BindFlags::SHADER_RESOURCE),
        }
    }
}

/// Address of one slot on a queue: container plus index within it.
/// Single-slot containers (shader, depth, index buffer) use index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddr {
    pub container: SlotContainer,
    pub index: u16,
}

impl SlotAddr {
    #[must_use]
    pub const fn new(container: SlotContainer, index: u16) -> Self {
        Self { container, index }
    }
}

/// One pipeline attachment point.
///
/// Plain data: pipeline-state snapshots clone these wholesale, and the
/// push/pop round-trip guarantee relies on `PartialEq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingSlot {
    /// What the caller most recently asked for.
    pub requested: Option<ResourceKey>,
    /// What the backend currently has bound here.
    pub bound: Option<ResourceKey>,
    /// Resource version observed at bind time; an advanced resource version
    /// marks this slot dirty even when `bound == requested`.
    pub bound_version: u64,
    /// Recency stamp taken from the resource's own bind-id counter when
    /// `requested` was set; 0 when the request is a clear. The strictly
    /// higher stamp wins a same-resource conflict.
    pub pending_bind_id: u64,
}

impl BindingSlot {
    /// True when the next resolve has no structural work to do.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.requested == self.bound
    }
}

/// What a resolve pass did to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Requested and bound already agreed and the resource version had not
    /// advanced. No callbacks were invoked.
    Unchanged,
    /// The slot was bound, unbound, or soft-rebound (same object, refreshed
    /// version).
    Changed,
    /// The slot lost a same-resource conflict to a more recent request and
    /// stays unbound this pass. The caller may retry next tick while the
    /// request stands.
    Blocked,
}
