//! Host resource backend seam.
//!
//! The cache creates exactly one host resource per object that needs one and
//! routes payload reads/writes through it. Concrete realizations bind to a
//! real graphics API (buffer objects, textures with mip levels); this crate
//! ships a null backend for headless operation and an in-memory backend used
//! by tests.
//!
//! Offsets passed to [`ResourceBackend::read`]/[`ResourceBackend::write`] are
//! payload-relative: offset 0 is the first byte after the object's header.

use std::collections::HashMap;

use crate::object::ObjectKind;

/// Opaque host resource handle minted by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

pub trait ResourceBackend {
    /// Create a host resource for a new object and upload its initial payload.
    ///
    /// Returning `None` means the kind has no host-side representation; the
    /// cache then serves the payload from the backing store.
    fn create(&mut self, kind: ObjectKind, payload: &[u8]) -> Option<HandleId>;

    /// Read `dst.len()` payload bytes starting at `offset`.
    fn read(&self, handle: HandleId, offset: u64, dst: &mut [u8]);

    /// Write payload bytes starting at `offset`.
    fn write(&mut self, handle: HandleId, offset: u64, src: &[u8]);

    /// Release the resource. The handle is never used again.
    fn destroy(&mut self, handle: HandleId);
}

/// Backend with no host resources at all; every access stays in the backing
/// store.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceBackend for NullBackend {
    fn create(&mut self, _kind: ObjectKind, _payload: &[u8]) -> Option<HandleId> {
        None
    }

    fn read(&self, _handle: HandleId, _offset: u64, _dst: &mut [u8]) {}

    fn write(&mut self, _handle: HandleId, _offset: u64, _src: &[u8]) {}

    fn destroy(&mut self, _handle: HandleId) {}
}

/// In-memory backend: each handle owns a byte vector sized to the payload.
///
/// Behaves like a real backend for coherence purposes (the host copy can
/// diverge from the backing store until flushed), which is exactly what the
/// aliasing tests need.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    resources: HashMap<HandleId, Vec<u8>>,
    next_handle: u64,
    created: u64,
    destroyed: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.resources.contains_key(&handle)
    }

    pub fn live_handles(&self) -> usize {
        self.resources.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    pub fn payload(&self, handle: HandleId) -> Option<&[u8]> {
        self.resources.get(&handle).map(Vec::as_slice)
    }
}

impl ResourceBackend for MemoryBackend {
    fn create(&mut self, kind: ObjectKind, payload: &[u8]) -> Option<HandleId> {
        if !kind.has_host_resource() {
            return None;
        }
        let handle = HandleId(self.next_handle);
        self.next_handle += 1;
        self.created += 1;
        self.resources.insert(handle, payload.to_vec());
        Some(handle)
    }

    fn read(&self, handle: HandleId, offset: u64, dst: &mut [u8]) {
        let data = self
            .resources
            .get(&handle)
            .expect("read from a destroyed handle");
        let start = offset as usize;
        dst.copy_from_slice(&data[start..start + dst.len()]);
    }

    fn write(&mut self, handle: HandleId, offset: u64, src: &[u8]) {
        let data = self
            .resources
            .get_mut(&handle)
            .expect("write to a destroyed handle");
        let start = offset as usize;
        data[start..start + src.len()].copy_from_slice(src);
    }

    fn destroy(&mut self, handle: HandleId) {
        let removed = self.resources.remove(&handle);
        assert!(removed.is_some(), "double destroy of handle {handle:?}");
        self.destroyed += 1;
    }
}
