//! Shared test doubles: a recording device, a recording queue binder, and a
//! manually signaled fence.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vesper_gpu::{
    BackendError, BackendHandle, BackendResult, BindFlags, Device, Extent, Fence, QueueBinder,
    ResourceArena, ResourceDesc, ResourceKey, ResourceKind, SlotAddr, SlotContainer,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Backend double that records every mapping/transfer call.
#[derive(Default)]
pub struct MockDevice {
    pub writes: Vec<(BackendHandle, u64, Vec<u8>)>,
    pub reads: Vec<(BackendHandle, u64, u64)>,
    pub copies: Vec<(BackendHandle, BackendHandle)>,
    pub resizes: Vec<(BackendHandle, Extent)>,
    /// Returned from every read.
    pub read_data: Vec<u8>,
    /// When set, every write is refused.
    pub fail_writes: bool,
    /// When set, every copy is refused.
    pub fail_copies: bool,
    next_handle: BackendHandle,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            next_handle: 9000,
            ..Self::default()
        }
    }
}

impl Device for MockDevice {
    fn write(&mut self, handle: BackendHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        if self.fail_writes {
            return Err(BackendError("write refused".into()));
        }
        self.writes.push((handle, offset, data.to_vec()));
        Ok(())
    }

    fn read(&mut self, handle: BackendHandle, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        self.reads.push((handle, offset, len));
        Ok(self.read_data.clone())
    }

    fn copy(&mut self, src: BackendHandle, dst: BackendHandle) -> BackendResult<()> {
        if self.fail_copies {
            return Err(BackendError("copy refused".into()));
        }
        self.copies.push((src, dst));
        Ok(())
    }

    fn resize(&mut self, handle: BackendHandle, extent: Extent) -> BackendResult<BackendHandle> {
        self.resizes.push((handle, extent));
        self.next_handle += 1;
        Ok(self.next_handle)
    }
}

/// Queue binder double that records bind traffic.
#[derive(Default)]
pub struct RecordingBinder {
    pub binds: Vec<(SlotAddr, BackendHandle)>,
    pub unbinds: Vec<SlotAddr>,
    pub ranges: Vec<(SlotContainer, u16, u16)>,
    pub resets: usize,
}

impl RecordingBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.binds.clear();
        self.unbinds.clear();
        self.ranges.clear();
    }

    pub fn total_calls(&self) -> usize {
        self.binds.len() + self.unbinds.len() + self.ranges.len()
    }
}

impl QueueBinder for RecordingBinder {
    fn bind(&mut self, addr: SlotAddr, handle: BackendHandle) {
        self.binds.push((addr, handle));
    }

    fn unbind(&mut self, addr: SlotAddr) {
        self.unbinds.push(addr);
    }

    fn bind_range(&mut self, container: SlotContainer, first: u16, last: u16) {
        self.ranges.push((container, first, last));
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Fence signaled by flipping a shared flag.
#[derive(Clone)]
pub struct TestFence {
    signaled: Arc<AtomicBool>,
}

impl TestFence {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let signaled = Arc::new(AtomicBool::new(false));
        (
            Self {
                signaled: Arc::clone(&signaled),
            },
            signaled,
        )
    }

    pub fn signaled() -> Self {
        let (fence, flag) = Self::new();
        flag.store(true, Ordering::Release);
        fence
    }
}

impl Fence for TestFence {
    fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(_) => self.signaled.load(Ordering::Acquire),
            None => {
                // Blocking wait; tests only use it on already-signaled
                // fences or fences another thread is about to flip.
                while !self.signaled.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                true
            }
        }
    }
}

// ============================================================================
// Resource construction helpers
// ============================================================================

pub fn vertex_buffer(resources: &mut ResourceArena, handle: BackendHandle) -> ResourceKey {
    resources
        .create(ResourceDesc::new(
            ResourceKind::Buffer,
            BindFlags::VERTEX,
            Extent::linear(1024),
            handle,
            format!("vb{handle}"),
        ))
        .unwrap()
}

pub fn index_buffer(resources: &mut ResourceArena, handle: BackendHandle) -> ResourceKey {
    resources
        .create(ResourceDesc::new(
            ResourceKind::Buffer,
            BindFlags::INDEX,
            Extent::linear(512),
            handle,
            format!("ib{handle}"),
        ))
        .unwrap()
}

pub fn constant_buffer(resources: &mut ResourceArena, handle: BackendHandle) -> ResourceKey {
    resources
        .create(ResourceDesc::new(
            ResourceKind::Buffer,
            BindFlags::CONSTANT,
            Extent::linear(256),
            handle,
            format!("cb{handle}"),
        ))
        .unwrap()
}

pub fn feedback_texture(resources: &mut ResourceArena, handle: BackendHandle) -> ResourceKey {
    resources
        .create(ResourceDesc::new(
            ResourceKind::Texture,
            BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET,
            Extent::new(256, 256, 1),
            handle,
            format!("tex{handle}"),
        ))
        .unwrap()
}

pub fn shader(resources: &mut ResourceArena, handle: BackendHandle) -> ResourceKey {
    resources
        .create(ResourceDesc::new(
            ResourceKind::Shader,
            BindFlags::empty(),
            Extent::linear(0),
            handle,
            format!("shader{handle}"),
        ))
        .unwrap()
}
