//! Pipeline state snapshots and draw validation
//!
//! A [`PipelineState`] is a dense snapshot of every slot container attached
//! to one submission queue, sized from the backend's [`QueueLimits`].
//! Snapshots are plain data with equality, which is what makes the
//! push/clone/pop discipline on [`BindQueue`](crate::queue::BindQueue) a
//! bit-for-bit round trip.

use bitflags::bitflags;

use crate::backend::QueueLimits;
use crate::binding::{BindingSlot, SlotAddr, SlotContainer, SlotGroup};

bitflags! {
    /// Recoverable draw/dispatch precondition failures.
    ///
    /// OR-combined across all checks so one call reports every violated
    /// precondition at once; the caller decides whether to skip the draw,
    /// log, or retry next frame. Never raised as an error.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DrawValidation: u32 {
        const MISSING_SHADER = 1 << 0;
        const MISSING_VERTEX_BUFFER = 1 << 1;
        const MISSING_INDEX_BUFFER = 1 << 2;
        const MISSING_RENDER_TARGET = 1 << 3;
        /// Some slot's request has not resolved to a binding yet (lost a
        /// conflict or resolve has not run since the request).
        const BLOCKED_BINDING = 1 << 4;
        const UNSUPPORTED_COMPUTE_GROUPS = 1 << 5;
    }
}

impl DrawValidation {
    /// Whether the draw/dispatch may proceed.
    #[must_use]
    pub fn is_ok(self) -> bool {
        self.is_empty()
    }
}

/// Snapshot of all slots active on one submission queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub(crate) shader: BindingSlot,
    pub(crate) depth_target: BindingSlot,
    pub(crate) index_buffer: BindingSlot,
    pub(crate) render_targets: SlotGroup,
    pub(crate) vertex_streams: SlotGroup,
    pub(crate) constant_buffers: SlotGroup,
    pub(crate) shader_resources: SlotGroup,
}

impl PipelineState {
    #[must_use]
    pub fn new(limits: &QueueLimits) -> Self {
        Self {
            shader: BindingSlot::default(),
            depth_target: BindingSlot::default(),
            index_buffer: BindingSlot::default(),
            render_targets: SlotGroup::new(SlotContainer::RenderTarget, limits.max_render_targets),
            vertex_streams: SlotGroup::new(SlotContainer::VertexStream, limits.max_vertex_streams),
            constant_buffers: SlotGroup::new(
                SlotContainer::ConstantBuffer,
                limits.max_constant_buffers,
            ),
            shader_resources: SlotGroup::new(
                SlotContainer::ShaderResource,
                limits.max_shader_resources,
            ),
        }
    }

    /// Clear every slot (nothing requested, nothing bound).
    pub fn reset(&mut self) {
        self.shader = BindingSlot::default();
        self.depth_target = BindingSlot::default();
        self.index_buffer = BindingSlot::default();
        self.render_targets.clear();
        self.vertex_streams.clear();
        self.constant_buffers.clear();
        self.shader_resources.clear();
    }

    /// Copy this snapshot into `other` without reallocating; the free-list
    /// reuse on push/pop depends on this staying allocation-free.
    pub fn copy_to(&self, other: &mut PipelineState) {
        other.shader = self.shader;
        other.depth_target = self.depth_target;
        other.index_buffer = self.index_buffer;
        other.render_targets.copy_from(&self.render_targets);
        other.vertex_streams.copy_from(&self.vertex_streams);
        other.constant_buffers.copy_from(&self.constant_buffers);
        other.shader_resources.copy_from(&self.shader_resources);
    }

    #[must_use]
    pub fn slot(&self, addr: SlotAddr) -> &BindingSlot {
        let i = addr.index as usize;
        match addr.container {
            SlotContainer::Shader => &self.shader,
            SlotContainer::DepthTarget => &self.depth_target,
            SlotContainer::IndexBuffer => &self.index_buffer,
            SlotContainer::RenderTarget => self.render_targets.slot(i),
            SlotContainer::VertexStream => self.vertex_streams.slot(i),
            SlotContainer::ConstantBuffer => self.constant_buffers.slot(i),
            SlotContainer::ShaderResource => self.shader_resources.slot(i),
        }
    }

    pub(crate) fn slot_mut(&mut self, addr: SlotAddr) -> &mut BindingSlot {
        let i = addr.index as usize;
        match addr.container {
            SlotContainer::Shader => &mut self.shader,
            SlotContainer::DepthTarget => &mut self.depth_target,
            SlotContainer::IndexBuffer => &mut self.index_buffer,
            SlotContainer::RenderTarget => self.render_targets.slot_mut(i),
            SlotContainer::VertexStream => self.vertex_streams.slot_mut(i),
            SlotContainer::ConstantBuffer => self.constant_buffers.slot_mut(i),
            SlotContainer::ShaderResource => self.shader_resources.slot_mut(i),
        }
    }

    #[must_use]
    pub(crate) fn group(&self, container: SlotContainer) -> Option<&SlotGroup> {
        match container {
            SlotContainer::RenderTarget => Some(&self.render_targets),
            SlotContainer::VertexStream => Some(&self.vertex_streams),
            SlotContainer::ConstantBuffer => Some(&self.constant_buffers),
            SlotContainer::ShaderResource => Some(&self.shader_resources),
            _ => None,
        }
    }

    /// Visit the address of every slot in this state, single slots first,
    /// then groups in slot-index order.
    pub(crate) fn for_each_addr(&self, mut f: impl FnMut(SlotAddr)) {
        f(SlotAddr::new(SlotContainer::Shader, 0));
        f(SlotAddr::new(SlotContainer::DepthTarget, 0));
        f(SlotAddr::new(SlotContainer::IndexBuffer, 0));
        for (container, group) in [
            (SlotContainer::RenderTarget, &self.render_targets),
            (SlotContainer::VertexStream, &self.vertex_streams),
            (SlotContainer::ConstantBuffer, &self.constant_buffers),
            (SlotContainer::ShaderResource, &self.shader_resources),
        ] {
            for index in 0..group.len() {
                f(SlotAddr::new(container, index as u16));
            }
        }
    }
}
