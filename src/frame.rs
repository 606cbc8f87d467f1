//! In-flight frame ring
//!
//! A [`FrameRing`] bounds how far the CPU may run ahead of the GPU: it keeps
//! a fixed-depth ring of [`TrackedFrame`] records, each owning a fence and a
//! set of independent submission branches. Starting a frame whose ring slot
//! is still occupied blocks on that occupant's fence, so ring slot N cannot
//! begin recording until its previous occupant finished on the GPU.

use std::time::Duration;

use crate::backend::{BackendHandle, Fence};
use crate::errors::{GpuError, Result};

/// One recorded command list, tracked within a frame branch.
///
/// `previous` threads a dependency link to the list recorded immediately
/// before this one on the same branch, for later dependency walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandList {
    pub handle: BackendHandle,
    pub branch_index: usize,
    pub previous: Option<BackendHandle>,
}

impl CommandList {
    #[must_use]
    pub const fn new(handle: BackendHandle, branch_index: usize) -> Self {
        Self {
            handle,
            branch_index,
            previous: None,
        }
    }
}

/// One in-flight frame record: independent ordered command-list branches
/// plus the fence that tells us the GPU finished the frame.
pub struct TrackedFrame {
    frame_index: Option<u64>,
    fence: Option<Box<dyn Fence>>,
    branches: Vec<Vec<CommandList>>,
}

impl TrackedFrame {
    fn new() -> Self {
        Self {
            frame_index: None,
            fence: None,
            branches: Vec::new(),
        }
    }

    /// Frame identifier of the current (or last) occupant.
    #[must_use]
    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    /// Lists recorded on one branch, in recording order.
    #[must_use]
    pub fn branch(&self, index: usize) -> &[CommandList] {
        self.branches.get(index).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn branch_capacity(&self) -> usize {
        self.branches.len()
    }

    /// Total command lists tracked across all branches.
    #[must_use]
    pub fn command_list_count(&self) -> usize {
        self.branches.iter().map(Vec::len).sum()
    }

    /// Append a list to its branch, growing the branch array geometrically
    /// when the index exceeds current capacity, and thread the `previous`
    /// dependency link.
    pub fn track(&mut self, mut list: CommandList) {
        let index = list.branch_index;
        if index >= self.branches.len() {
            let new_len = (self.branches.len().max(1) * 2).max(index + 1);
            log::debug!(
                "frame {:?}: growing branch array {} -> {new_len}",
                self.frame_index,
                self.branches.len()
            );
            self.branches.resize_with(new_len, Vec::new);
        }
        let branch = &mut self.branches[index];
        list.previous = branch.last().map(|l| l.handle);
        branch.push(list);
    }

    /// Prepare the slot for a new occupant, keeping branch allocations.
    fn recycle(&mut self, frame_index: u64) {
        for branch in &mut self.branches {
            branch.clear();
        }
        self.fence = None;
        self.frame_index = Some(frame_index);
    }

    fn release_all(&mut self, release: &mut dyn FnMut(CommandList)) {
        for branch in &mut self.branches {
            for list in branch.drain(..) {
                release(list);
            }
        }
        self.fence = None;
        self.frame_index = None;
    }
}

/// Fixed-depth ring of in-flight frames gated by fences.
pub struct FrameRing {
    frames: Vec<TrackedFrame>,
    current: usize,
}

impl FrameRing {
    /// `depth` is the buffering depth (2 or 3 for typical double/triple
    /// buffering).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        assert!(depth >= 1, "frame ring needs at least one slot");
        Self {
            frames: (0..depth).map(|_| TrackedFrame::new()).collect(),
            current: 0,
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The frame record currently being recorded into.
    #[must_use]
    pub fn current_frame(&self) -> &TrackedFrame {
        &self.frames[self.current]
    }

    /// Inspect an arbitrary ring slot.
    #[must_use]
    pub fn frame(&self, slot: usize) -> &TrackedFrame {
        &self.frames[slot]
    }

    /// Begin recording frame `frame_index`.
    ///
    /// Waits on the fence left by the slot's previous occupant (frame
    /// `frame_index - depth`); `Some(Duration::ZERO)` polls and returns
    /// [`GpuError::FenceTimeout`] if the GPU has not caught up.
    ///
    /// # Panics
    ///
    /// Panics when `frame_index` is already the occupant of its slot: a new
    /// frame must not start before the previous one finished, so this is a
    /// structural bug in the frame driver.
    pub fn start_frame(&mut self, frame_index: u64, timeout: Option<Duration>) -> Result<()> {
        let slot_index = (frame_index % self.frames.len() as u64) as usize;
        let slot = &mut self.frames[slot_index];

        assert_ne!(
            slot.frame_index,
            Some(frame_index),
            "frame {frame_index} started twice without finishing",
        );

        if let Some(fence) = slot.fence.take() {
            if !fence.wait(timeout) {
                let in_flight = slot.frame_index.unwrap_or_default();
                // Put the fence back; the driver may retry.
                slot.fence = Some(fence);
                return Err(GpuError::FenceTimeout {
                    frame_index: in_flight,
                });
            }
        }

        slot.recycle(frame_index);
        self.current = slot_index;
        Ok(())
    }

    /// Record the fence that will signal when the GPU finishes the current
    /// frame's submitted work.
    pub fn end_frame(&mut self, fence: Box<dyn Fence>) {
        self.frames[self.current].fence = Some(fence);
    }

    /// Track a command list on the current frame.
    pub fn track(&mut self, list: CommandList) {
        self.frames[self.current].track(list);
    }

    /// Free every outstanding command list across every branch of every
    /// ring slot. Used on shutdown or device-loss recovery; `release` hands
    /// each list back to the backend.
    pub fn reset(&mut self, mut release: impl FnMut(CommandList)) {
        let mut freed = 0usize;
        for frame in &mut self.frames {
            freed += frame.command_list_count();
            frame.release_all(&mut release);
        }
        self.current = 0;
        log::info!("frame ring reset: released {freed} command list(s)");
    }
}
