//! Submission-queue binding state
//!
//! A [`BindQueue`] owns the live [`PipelineState`] of one submission queue,
//! a push/pop stack of saved states, and a free-list of released snapshots
//! so nested rendering scopes allocate nothing once the pool is warm.
//!
//! `resolve_all` is the heart of the core: it diffs every slot's requested
//! value against its bound value, drains the pending-operation queue of each
//! touched resource, resolves same-resource conflicts by recency, and issues
//! the minimal set of bind/unbind callbacks to the backend.

use smallvec::SmallVec;

use crate::backend::{Device, QueueBinder, QueueLimits};
use crate::binding::{BindMask, QueueId, ResolveOutcome, SlotAddr, SlotContainer};
use crate::errors::{GpuError, Result};
use crate::resource::{BindFlags, ResourceArena, ResourceKey};
use crate::state::{DrawValidation, PipelineState};

/// Aggregate outcome of one resolve pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Slots that were bound, unbound, or soft-rebound.
    pub changed_slots: u32,
    /// Slots that lost a same-resource conflict and stay unbound this pass.
    pub blocked_slots: u32,
}

impl ResolveReport {
    #[must_use]
    pub fn any_changed(&self) -> bool {
        self.changed_slots > 0
    }

    #[must_use]
    pub fn any_blocked(&self) -> bool {
        self.blocked_slots > 0
    }
}

/// Binding state of one submission queue.
pub struct BindQueue {
    id: QueueId,
    limits: QueueLimits,
    current: PipelineState,
    saved: Vec<PipelineState>,
    free: Vec<PipelineState>,
}

impl BindQueue {
    #[must_use]
    pub fn new(id: QueueId, limits: QueueLimits) -> Self {
        Self {
            id,
            limits,
            current: PipelineState::new(&limits),
            saved: Vec::new(),
            free: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> QueueId {
        self.id
    }

    #[must_use]
    pub fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    /// The live state. Snapshots of this are what `push` saves.
    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.current
    }

    /// Depth of the saved-state stack.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.saved.len()
    }

    /// Released snapshots waiting for reuse.
    #[must_use]
    pub fn pooled_states(&self) -> usize {
        self.free.len()
    }

    // ========================================================================
    // Request operations
    // ========================================================================

    pub fn set_shader(
        &mut self,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        self.set_value(SlotAddr::new(SlotContainer::Shader, 0), value, resources)
    }

    pub fn set_render_target(
        &mut self,
        index: usize,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        assert!(
            index < self.limits.max_render_targets,
            "render target index {index} exceeds queue limit"
        );
        self.set_value(
            SlotAddr::new(SlotContainer::RenderTarget, index as u16),
            value,
            resources,
        )
    }

    pub fn set_depth_target(
        &mut self,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        self.set_value(SlotAddr::new(SlotContainer::DepthTarget, 0), value, resources)
    }

    pub fn set_vertex_stream(
        &mut self,
        index: usize,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        assert!(
            index < self.limits.max_vertex_streams,
            "vertex stream index {index} exceeds queue limit"
        );
        self.set_value(
            SlotAddr::new(SlotContainer::VertexStream, index as u16),
            value,
            resources,
        )
    }

    pub fn set_index_buffer(
        &mut self,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        self.set_value(SlotAddr::new(SlotContainer::IndexBuffer, 0), value, resources)
    }

    pub fn set_constant_buffer(
        &mut self,
        index: usize,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        assert!(
            index < self.limits.max_constant_buffers,
            "constant buffer index {index} exceeds queue limit"
        );
        self.set_value(
            SlotAddr::new(SlotContainer::ConstantBuffer, index as u16),
            value,
            resources,
        )
    }

    pub fn set_shader_resource(
        &mut self,
        index: usize,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        assert!(
            index < self.limits.max_shader_resources,
            "shader resource index {index} exceeds queue limit"
        );
        self.set_value(
            SlotAddr::new(SlotContainer::ShaderResource, index as u16),
            value,
            resources,
        )
    }

    /// Store a request into a slot and stamp its recency id.
    ///
    /// Requests are not applied here; nothing touches the backend until the
    /// next `resolve_all`.
    fn set_value(
        &mut self,
        addr: SlotAddr,
        value: Option<ResourceKey>,
        resources: &mut ResourceArena,
    ) -> Result<()> {
        let pending_bind_id = match value {
            Some(key) => {
                let resource = resources.expect(key)?;
                if !addr.container.accepts(resource.kind(), resource.flags()) {
                    return Err(GpuError::IncompatibleBinding {
                        label: resource.label().to_string(),
                        container: addr.container,
                    });
                }
                resources.take_bind_id(key)?
            }
            None => 0,
        };
        let slot = self.current.slot_mut(addr);
        slot.requested = value;
        slot.pending_bind_id = pending_bind_id;
        Ok(())
    }

    // ========================================================================
    // Resolve
    // ========================================================================

    /// Resolve every slot on this queue against its requested value.
    ///
    /// Group containers fire a single
    /// [`bind_range`](QueueBinder::bind_range) callback covering the
    /// contiguous changed index range, and only when at least one member
    /// changed.
    pub fn resolve_all(
        &mut self,
        resources: &mut ResourceArena,
        device: &mut dyn Device,
        binder: &mut dyn QueueBinder,
    ) -> Result<ResolveReport> {
        let mut report = ResolveReport::default();

        for container in [
            SlotContainer::Shader,
            SlotContainer::RenderTarget,
            SlotContainer::DepthTarget,
            SlotContainer::VertexStream,
            SlotContainer::IndexBuffer,
            SlotContainer::ConstantBuffer,
            SlotContainer::ShaderResource,
        ] {
            match self.current.group(container) {
                Some(group) => {
                    let len = group.len();
                    let mut changed_range: Option<(u16, u16)> = None;
                    for index in 0..len {
                        let addr = SlotAddr::new(container, index as u16);
                        match self.resolve_slot(addr, resources, device, binder)? {
                            ResolveOutcome::Unchanged => {}
                            ResolveOutcome::Changed => {
                                report.changed_slots += 1;
                                let i = index as u16;
                                changed_range = Some(match changed_range {
                                    None => (i, i),
                                    Some((min, max)) => (min.min(i), max.max(i)),
                                });
                            }
                            ResolveOutcome::Blocked => report.blocked_slots += 1,
                        }
                    }
                    if let Some((min, max)) = changed_range {
                        binder.bind_range(container, min, max);
                    }
                }
                None => {
                    let addr = SlotAddr::new(container, 0);
                    match self.resolve_slot(addr, resources, device, binder)? {
                        ResolveOutcome::Unchanged => {}
                        ResolveOutcome::Changed => report.changed_slots += 1,
                        ResolveOutcome::Blocked => report.blocked_slots += 1,
                    }
                }
            }
        }
        Ok(report)
    }

    /// Resolve a single slot. Exposed for callers that only touched one
    /// attachment point; `resolve_all` is the usual entry.
    pub fn resolve_slot(
        &mut self,
        addr: SlotAddr,
        resources: &mut ResourceArena,
        device: &mut dyn Device,
        binder: &mut dyn QueueBinder,
    ) -> Result<ResolveOutcome> {
        let slot = *self.current.slot(addr);

        // Fast path: requested and bound agree structurally. The resource
        // may still have pending mutations, which makes this a soft rebind.
        if slot.requested == slot.bound {
            let Some(key) = slot.bound else {
                return Ok(ResolveOutcome::Unchanged);
            };
            resources.apply_pending(key, device)?;
            let resource = resources.expect(key)?;
            if resource.version() == slot.bound_version {
                return Ok(ResolveOutcome::Unchanged);
            }
            let version = resource.version();
            let handle = resource.handle();
            let live = self.current.slot_mut(addr);
            live.bound_version = version;
            binder.bind(addr, handle);
            return Ok(ResolveOutcome::Changed);
        }

        // Unbind path.
        let Some(key) = slot.requested else {
            binder.unbind(addr);
            if let Some(old) = slot.bound {
                resources.remove_bound(old, self.id, addr);
            }
            let live = self.current.slot_mut(addr);
            live.bound = None;
            live.bound_version = 0;
            return Ok(ResolveOutcome::Changed);
        };

        // Bind path: scan every other slot on this queue holding the same
        // resource and resolve conflicts by recency.
        let flags = resources.expect(key)?.flags();
        let my_mask = addr.container.mask();
        let others: SmallVec<[(QueueId, SlotAddr); 4]> =
            resources.expect(key)?.bound_to().iter().copied().collect();

        let mut evicted: SmallVec<[SlotAddr; 4]> = SmallVec::new();
        for (queue, other_addr) in others {
            if queue != self.id || other_addr == addr {
                continue;
            }
            let other = *self.current.slot(other_addr);
            if other.bound != Some(key) {
                // Stale back-reference: that slot has since moved on to a
                // different resource. Unbind it unconditionally.
                evicted.push(other_addr);
                continue;
            }
            let other_mask = other_addr.container.mask();
            if my_mask == BindMask::INPUT && other_mask == BindMask::INPUT {
                // Multiple simultaneous reads never conflict.
                continue;
            }
            if flags.contains(BindFlags::SIMULTANEOUS_RW) {
                continue;
            }
            if other.requested != Some(key) {
                // The other slot still holds the resource but has since
                // requested something else, so its recency stamp came from
                // that other resource's counter and cannot be compared.
                // No contest: unbind it.
                evicted.push(other_addr);
                continue;
            }
            // Both slots actively request the resource: the more recent
            // request wins. Equal stamps mean two slots requested the same
            // object in the same tick, which is a structural bug in the
            // caller.
            assert_ne!(
                other.pending_bind_id, slot.pending_bind_id,
                "binding conflict on queue {:?}: slots {:?} and {:?} requested {:?} with equal bind id {}",
                self.id, addr, other_addr, key, slot.pending_bind_id,
            );
            if other.pending_bind_id > slot.pending_bind_id {
                log::debug!(
                    "slot {addr:?} blocked: {other_addr:?} holds {key:?} with a newer request"
                );
                // The loser stays unbound for this pass; a binding left
                // over from an earlier pass must not survive as a stale
                // attachment.
                if let Some(prev) = slot.bound {
                    binder.unbind(addr);
                    resources.remove_bound(prev, self.id, addr);
                    let live = self.current.slot_mut(addr);
                    live.bound = None;
                    live.bound_version = 0;
                }
                return Ok(ResolveOutcome::Blocked);
            }
            evicted.push(other_addr);
        }

        for other_addr in evicted {
            binder.unbind(other_addr);
            let other = self.current.slot_mut(other_addr);
            let prev = other.bound.take();
            other.bound_version = 0;
            if let Some(prev) = prev {
                resources.remove_bound(prev, self.id, other_addr);
            }
            // Clear any stale back-reference the scan found.
            resources.remove_bound(key, self.id, other_addr);
        }

        // Release our own previous binding before taking the new one.
        if let Some(prev) = slot.bound {
            resources.remove_bound(prev, self.id, addr);
        }

        resources.apply_pending(key, device)?;
        let resource = resources.expect(key)?;
        let version = resource.version();
        let handle = resource.handle();
        resources.add_bound(key, self.id, addr);

        let live = self.current.slot_mut(addr);
        live.bound = Some(key);
        live.bound_version = version;
        binder.bind(addr, handle);
        Ok(ResolveOutcome::Changed)
    }

    // ========================================================================
    // State stack
    // ========================================================================

    /// Save the current state and continue with either a clone of it or
    /// `replacement`. Amortized O(1) and allocation-free once the free-list
    /// is warm.
    pub fn push(&mut self, replacement: Option<PipelineState>) {
        let next = match replacement {
            Some(state) => state,
            None => {
                let mut clone = self
                    .free
                    .pop()
                    .unwrap_or_else(|| PipelineState::new(&self.limits));
                self.current.copy_to(&mut clone);
                clone
            }
        };
        let saved = std::mem::replace(&mut self.current, next);
        self.saved.push(saved);
    }

    /// Restore the previously pushed state and recycle the discarded one.
    ///
    /// # Panics
    ///
    /// Panics when the stack is empty: an unbalanced pop means a rendering
    /// scope forgot to restore, which is a structural bug, not a runtime
    /// condition.
    pub fn pop(&mut self, resources: &mut ResourceArena) {
        let Some(restored) = self.saved.pop() else {
            panic!("BindQueue::pop on an empty state stack (unbalanced push/pop scope)");
        };
        let discarded = std::mem::replace(&mut self.current, restored);
        self.reconcile_bound_refs(&discarded, resources);
        self.free.push(discarded);
    }

    /// Unwind the entire stack back to the base state and invoke the
    /// backend reset hook.
    pub fn reset(&mut self, resources: &mut ResourceArena, binder: &mut dyn QueueBinder) {
        while !self.saved.is_empty() {
            self.pop(resources);
        }
        binder.reset();
    }

    /// Keep resource back-references consistent with the newly restored
    /// snapshot: bindings taken between push and pop are handed back to
    /// whatever the restored state says.
    fn reconcile_bound_refs(&mut self, discarded: &PipelineState, resources: &mut ResourceArena) {
        let id = self.id;
        let current = &self.current;
        current.for_each_addr(|addr| {
            let old = discarded.slot(addr).bound;
            let new = current.slot(addr).bound;
            if old != new {
                if let Some(old) = old {
                    resources.remove_bound(old, id, addr);
                }
                if let Some(new) = new {
                    resources.add_bound(new, id, addr);
                }
            }
        });
    }

    /// Forcibly drop every request and binding of `key` on this queue.
    /// Called before a resource is destroyed.
    pub fn evict(
        &mut self,
        key: ResourceKey,
        resources: &mut ResourceArena,
        binder: &mut dyn QueueBinder,
    ) {
        let id = self.id;
        let mut touched: SmallVec<[SlotAddr; 8]> = SmallVec::new();
        self.current.for_each_addr(|addr| touched.push(addr));
        for addr in touched {
            let slot = self.current.slot_mut(addr);
            if slot.requested == Some(key) {
                slot.requested = None;
                slot.pending_bind_id = 0;
            }
            if slot.bound == Some(key) {
                slot.bound = None;
                slot.bound_version = 0;
                binder.unbind(addr);
                resources.remove_bound(key, id, addr);
            }
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check draw preconditions. All violations are OR-combined; an empty
    /// mask means the draw may proceed.
    #[must_use]
    pub fn validate_draw(&self, indexed: bool) -> DrawValidation {
        let mut result = DrawValidation::empty();
        let state = &self.current;

        if state.shader.bound.is_none() {
            result |= DrawValidation::MISSING_SHADER;
        }
        if !state.vertex_streams.iter().any(|s| s.bound.is_some()) {
            result |= DrawValidation::MISSING_VERTEX_BUFFER;
        }
        if indexed && state.index_buffer.bound.is_none() {
            result |= DrawValidation::MISSING_INDEX_BUFFER;
        }
        if state.depth_target.bound.is_none()
            && !state.render_targets.iter().any(|s| s.bound.is_some())
        {
            result |= DrawValidation::MISSING_RENDER_TARGET;
        }
        if self.any_unsettled() {
            result |= DrawValidation::BLOCKED_BINDING;
        }
        result
    }

    /// Check dispatch preconditions against the queue's compute limits.
    #[must_use]
    pub fn validate_dispatch(&self, groups: [u32; 3]) -> DrawValidation {
        let mut result = DrawValidation::empty();
        if self.current.shader.bound.is_none() {
            result |= DrawValidation::MISSING_SHADER;
        }
        let supported = groups
            .iter()
            .zip(self.limits.max_compute_groups)
            .all(|(&g, max)| g > 0 && g <= max);
        if !supported {
            result |= DrawValidation::UNSUPPORTED_COMPUTE_GROUPS;
        }
        if self.any_unsettled() {
            result |= DrawValidation::BLOCKED_BINDING;
        }
        result
    }

    fn any_unsettled(&self) -> bool {
        let mut unsettled = false;
        self.current.for_each_addr(|addr| {
            unsettled |= !self.current.slot(addr).is_settled();
        });
        unsettled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHandle, Extent};
    use crate::errors::BackendResult;
    use crate::resource::{ResourceDesc, ResourceKind};

    struct NopDevice;
    impl Device for NopDevice {
        fn write(&mut self, _: BackendHandle, _: u64, _: &[u8]) -> BackendResult<()> {
            Ok(())
        }
        fn read(&mut self, _: BackendHandle, _: u64, len: u64) -> BackendResult<Vec<u8>> {
            Ok(vec![0; len as usize])
        }
        fn copy(&mut self, _: BackendHandle, _: BackendHandle) -> BackendResult<()> {
            Ok(())
        }
        fn resize(&mut self, handle: BackendHandle, _: Extent) -> BackendResult<BackendHandle> {
            Ok(handle + 1000)
        }
    }

    struct NopBinder;
    impl QueueBinder for NopBinder {
        fn bind(&mut self, _: SlotAddr, _: BackendHandle) {}
        fn unbind(&mut self, _: SlotAddr) {}
        fn bind_range(&mut self, _: SlotContainer, _: u16, _: u16) {}
    }

    fn feedback_texture(resources: &mut ResourceArena) -> ResourceKey {
        resources
            .create(ResourceDesc::new(
                ResourceKind::Texture,
                BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET,
                Extent::new(256, 256, 1),
                42,
                "feedback",
            ))
            .unwrap()
    }

    #[test]
    #[should_panic(expected = "equal bind id")]
    fn equal_recency_conflict_is_fatal() {
        let mut resources = ResourceArena::new();
        let tex = feedback_texture(&mut resources);
        let mut queue = BindQueue::new(QueueId(0), QueueLimits::default());

        queue.set_render_target(0, Some(tex), &mut resources).unwrap();
        queue.set_shader_resource(0, Some(tex), &mut resources).unwrap();

        // Forge the structural bug the assert guards against: two requests
        // for one resource stamped in the same tick.
        queue
            .current
            .slot_mut(SlotAddr::new(SlotContainer::ShaderResource, 0))
            .pending_bind_id = 1;
        queue
            .current
            .slot_mut(SlotAddr::new(SlotContainer::RenderTarget, 0))
            .pending_bind_id = 1;

        let _ = queue.resolve_all(&mut resources, &mut NopDevice, &mut NopBinder);
    }

    #[test]
    #[should_panic(expected = "empty state stack")]
    fn pop_on_empty_stack_is_fatal() {
        let mut resources = ResourceArena::new();
        let mut queue = BindQueue::new(QueueId(0), QueueLimits::default());
        queue.pop(&mut resources);
    }

    #[test]
    fn set_value_rejects_wrong_container() {
        let mut resources = ResourceArena::new();
        let tex = feedback_texture(&mut resources);
        let mut queue = BindQueue::new(QueueId(0), QueueLimits::default());

        let err = queue.set_index_buffer(Some(tex), &mut resources).unwrap_err();
        assert!(matches!(err, GpuError::IncompatibleBinding { .. }));
    }
}
