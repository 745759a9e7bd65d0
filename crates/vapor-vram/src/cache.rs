//! Object registry, overlap tracker and lifecycle manager.
//!
//! One [`VramCache`] owns everything mutable about the cache: the backing
//! store handle, the bucket index, the id-keyed object arena, the tracked
//! overlap set and the recency counter. It is single-writer: all mutation
//! happens on the thread that processes command buffers. Background DMA copy
//! tasks only ever touch [`Store`] handles, after this cache has been
//! pre-flushed/staled for their ranges.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::backend::ResourceBackend;
use crate::coherence::RecencyPreference;
use crate::error::{Result, VramError};
use crate::index::BucketIndex;
use crate::object::{decode_header, Header, Object, ObjectId, ObjectKind};
use crate::store::Store;

/// Default device-visible memory size (128 MiB).
pub const VRAM_CAPACITY: u64 = 0x800_0000;

/// Every object's base address must be aligned to this.
pub const OBJECT_ALIGN: u64 = 256;

/// Largest legal uniform-buffer length; lengths must also be 16-byte aligned.
pub const MAX_UNIFORM_LEN: u64 = 0x4000;

/// Length argument for [`VramCache::reference`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LenSpec {
    Exact(u64),
    /// Derive the length from the kind's header at the referenced address.
    Auto,
}

/// Length argument for [`VramCache::lookup_exact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LenMatch {
    Exact(u64),
    Any,
}

pub struct VramCache {
    pub(crate) store: Store,
    pub(crate) index: BucketIndex,
    pub(crate) objects: HashMap<ObjectId, Object>,
    /// Objects currently known to alias another object's range.
    pub(crate) overlaps: Vec<ObjectId>,
    pub(crate) backend: Box<dyn ResourceBackend>,
    next_id: u64,
    recency_counter: u64,
}

impl VramCache {
    pub fn new(store: Store, backend: Box<dyn ResourceBackend>) -> Self {
        let capacity = store.capacity();
        Self {
            store,
            index: BucketIndex::new(capacity),
            objects: HashMap::new(),
            overlaps: Vec::new(),
            backend,
            next_id: 0,
            recency_counter: 0,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn capacity(&self) -> u64 {
        self.store.capacity()
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn live_object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn live_objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Number of objects currently tracked as overlapping.
    pub fn tracked_overlap_count(&self) -> usize {
        self.overlaps.len()
    }

    /// Downcast access to the backend, for consumers that own its concrete
    /// type (tests, the host presenter).
    pub fn backend(&self) -> &dyn ResourceBackend {
        self.backend.as_ref()
    }

    pub(crate) fn next_recency(&mut self) -> u64 {
        self.recency_counter += 1;
        self.recency_counter
    }

    /// Distinct live objects whose range intersects `[addr, addr + len)`.
    pub(crate) fn region_objects(&self, addr: u64, len: u64) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for id in self.index.candidates(addr, len) {
            if !seen.insert(id) {
                continue;
            }
            let obj = &self.objects[&id];
            if obj.intersects(addr, len) {
                found.push(id);
            }
        }
        found
    }

    /// Pure exact lookup, no side effects: the object starting at `addr` with
    /// this kind (and length, unless [`LenMatch::Any`]), if one is live.
    pub fn lookup_exact(&self, addr: u64, kind: ObjectKind, len: LenMatch) -> Option<ObjectId> {
        if addr >= self.capacity() {
            return None;
        }
        if let LenMatch::Exact(len) = len {
            if len == 0 || addr.checked_add(len).is_none_or(|end| end > self.capacity()) {
                return None;
            }
        }

        // An object starting at `addr` is always listed in addr's bucket.
        for &id in self.index.bucket_of(addr) {
            let obj = &self.objects[&id];
            let len_matches = match len {
                LenMatch::Exact(len) => obj.len == len,
                LenMatch::Any => true,
            };
            if obj.addr == addr && obj.kind == kind && len_matches {
                return Some(id);
            }
        }
        None
    }

    /// Materialize (or re-reference) the object for `(addr, kind, len)`.
    ///
    /// An exact live match that is not stale is returned as-is with a fresh
    /// recency. A live object at the same `(addr, kind)` with a different
    /// length, or a stale exact match, is flushed and destroyed first, then a
    /// new object is created from the backing store's current content.
    pub fn reference(&mut self, addr: u64, kind: ObjectKind, len: LenSpec) -> Result<ObjectId> {
        if addr >= self.capacity() {
            let err = VramError::OutOfBounds {
                addr,
                len: 0,
                capacity: self.capacity(),
            };
            warn!(addr, %err, "referenced address past end of VRAM");
            return Err(err);
        }
        if addr % OBJECT_ALIGN != 0 {
            let err = VramError::Misaligned {
                addr,
                align: OBJECT_ALIGN,
            };
            warn!(addr, %err, "referenced misaligned address");
            return Err(err);
        }

        let len = match len {
            LenSpec::Exact(0) => {
                warn!(addr, ?kind, "referenced zero-length range");
                return Err(VramError::ZeroLength { addr });
            }
            LenSpec::Exact(len) => len,
            LenSpec::Auto => self.derive_len(addr, kind)?,
        };

        if addr.checked_add(len).is_none_or(|end| end > self.capacity()) {
            let err = VramError::OutOfBounds {
                addr,
                len,
                capacity: self.capacity(),
            };
            warn!(addr, len, %err, "referenced range past end of VRAM");
            return Err(err);
        }

        if let Some(id) = self.lookup_exact(addr, kind, LenMatch::Exact(len)) {
            if !self.objects[&id].needs_resync {
                let recency = self.next_recency();
                self.objects
                    .get_mut(&id)
                    .expect("exact match is live")
                    .recency = recency;
                return Ok(id);
            }
        }

        // Resize, retype-by-length, or stale header: supersede the old view.
        if let Some(old) = self.lookup_exact(addr, kind, LenMatch::Any) {
            self.destroy_object(old);
        }

        self.create_object(addr, kind, len)
    }

    /// Read and parse the kind's header at `addr` to derive the total length.
    fn derive_len(&mut self, addr: u64, kind: ObjectKind) -> Result<u64> {
        let header_len = kind.header_len();
        assert!(
            header_len > 0,
            "{kind:?} has no header to derive a length from"
        );

        let mut raw = vec![0u8; header_len as usize];
        self.range_read(&mut raw, addr, RecencyPreference::Oldest)
            .inspect_err(|err| {
                warn!(addr, ?kind, %err, "failed to read object header");
            })?;

        match decode_header(kind, &raw) {
            Some((_, total_len)) => Ok(total_len),
            None => {
                warn!(addr, ?kind, "invalid header for auto-length reference");
                Err(VramError::BadHeader { kind, addr })
            }
        }
    }

    fn create_object(&mut self, addr: u64, kind: ObjectKind, len: u64) -> Result<ObjectId> {
        let mut data = vec![0u8; usize::try_from(len).expect("object length fits in usize")];
        self.range_read(&mut data, addr, RecencyPreference::Oldest)
            .inspect_err(|err| {
                warn!(addr, len, %err, "read failed during object creation");
            })?;

        // An explicit length may truncate a self-describing kind below its
        // own header (the guest aliasing a fragment); such an object carries
        // no decoded metadata and its bytes are served from the store.
        let header_len = (kind.header_len() as usize).min(data.len());
        let header = if kind.self_describing() && header_len == kind.header_len() as usize {
            match decode_header(kind, &data[..header_len]) {
                Some((header, _)) => header,
                None => Header::None,
            }
        } else {
            Header::None
        };

        let id = ObjectId(self.next_id);
        self.next_id += 1;

        let handle = self.backend.create(kind, &data[header_len..]);
        let recency = self.next_recency();
        self.objects.insert(
            id,
            Object {
                id,
                addr,
                len,
                kind,
                header,
                handle,
                in_overlaps: false,
                needs_resync: false,
                recency,
            },
        );
        self.index.insert(id, addr, len);
        self.mark_overlaps(addr, len);
        Ok(id)
    }

    /// Re-evaluate overlap status for every object touching the range: with
    /// two or more objects present, each untracked one joins the tracked set.
    /// A single match is the common, non-aliased case and is a no-op.
    pub(crate) fn mark_overlaps(&mut self, addr: u64, len: u64) {
        let ids = self.region_objects(addr, len);
        if ids.len() <= 1 {
            return;
        }
        for id in ids {
            let obj = self.objects.get_mut(&id).expect("region object is live");
            if !obj.in_overlaps {
                obj.in_overlaps = true;
                self.overlaps.push(id);
            }
        }
    }

    /// Remove the object from the tracked overlap set. Safe to call on
    /// non-tracked objects.
    pub(crate) fn untrack(&mut self, id: ObjectId) {
        let Some(obj) = self.objects.get_mut(&id) else {
            return;
        };
        if obj.in_overlaps {
            obj.in_overlaps = false;
            self.overlaps.retain(|&entry| entry != id);
        }
    }

    /// Flush the object's current content back to the backing store.
    ///
    /// For a non-aliased object this is a straight object read plus store
    /// write. For an aliased object the recency preferences invert: read
    /// `Newest` to capture the freshest bytes, write `Oldest` so the views
    /// that the default read policy favors observe them.
    pub fn flush_object(&mut self, id: ObjectId) {
        let (addr, len, aliased) = {
            let obj = self.objects.get(&id).expect("flush of a dead object");
            (obj.addr, obj.len, obj.in_overlaps)
        };
        let mut data = vec![0u8; usize::try_from(len).expect("object length fits in usize")];

        if !aliased {
            let obj = &self.objects[&id];
            obj.read_bytes(&self.store, self.backend.as_ref(), &mut data, addr);
            self.store
                .write_from(addr, &data)
                .expect("object range lies within the store");
        } else {
            self.range_read(&mut data, addr, RecencyPreference::Newest)
                .expect("object range lies within the store");
            self.range_write(addr, &data, RecencyPreference::Oldest)
                .expect("object range lies within the store");
        }
    }

    /// Flush then destroy a live object. Destruction never loses content: the
    /// object's current bytes land in the backing store before the host
    /// resource is released.
    pub fn destroy_object(&mut self, id: ObjectId) {
        if !self.objects.contains_key(&id) {
            return;
        }
        self.flush_object(id);
        self.remove_object(id);
    }

    /// Drop a live object from the registry, index and tracked set, release
    /// its host resource, then re-evaluate overlaps over the vacated range so
    /// a remaining object stops being tracked once its partner is gone.
    ///
    /// Does not flush; [`VramCache::destroy_object`] and `settle_all` handle
    /// content before calling this.
    fn remove_object(&mut self, id: ObjectId) {
        let Some(obj) = self.objects.remove(&id) else {
            return;
        };
        self.index.remove(id, obj.addr, obj.len);
        let was_tracked = obj.in_overlaps;
        if was_tracked {
            self.overlaps.retain(|&entry| entry != id);
        }
        if let Some(handle) = obj.handle {
            self.backend.destroy(handle);
        }

        if was_tracked {
            // Survivors in the vacated range stay tracked only if something
            // else still intersects their own range.
            for other in self.region_objects(obj.addr, obj.len) {
                let (other_addr, other_len) = {
                    let survivor = &self.objects[&other];
                    (survivor.addr, survivor.len)
                };
                if self.region_objects(other_addr, other_len).len() > 1 {
                    let survivor = self.objects.get_mut(&other).expect("survivor is live");
                    if !survivor.in_overlaps {
                        survivor.in_overlaps = true;
                        self.overlaps.push(other);
                    }
                } else {
                    self.untrack(other);
                }
            }
        }
    }

    /// Settle all aliasing at a batch boundary: flush every tracked object's
    /// freshest content straight into the backing store, then destroy them
    /// all. Aliasing never persists across command buffers.
    pub fn settle_all(&mut self) {
        let tracked = self.overlaps.clone();

        // Flush everything before destroying anything: a tracked object's
        // freshest bytes may live in its aliasing partner.
        for &id in &tracked {
            let (addr, len) = {
                let obj = self.objects.get(&id).expect("tracked object is live");
                (obj.addr, obj.len)
            };
            let mut data = vec![0u8; usize::try_from(len).expect("object length fits in usize")];
            self.range_read(&mut data, addr, RecencyPreference::Newest)
                .expect("object range lies within the store");
            // Straight into the store: the object is about to be destroyed,
            // so per-object resync bookkeeping would be wasted work.
            self.store
                .write_from(addr, &data)
                .expect("object range lies within the store");
        }

        for id in tracked {
            self.remove_object(id);
        }
    }

    /// Mark every object overlapping the range as needing a rebuild. Used by
    /// the DMA boundary before a raw copy lands in the range.
    pub fn stale_region(&mut self, addr: u64, len: u64) {
        if !self.region_in_bounds(addr, len) {
            return;
        }
        for id in self.region_objects(addr, len) {
            self.objects
                .get_mut(&id)
                .expect("region object is live")
                .needs_resync = true;
        }
    }

    /// Flush every object overlapping the range to the backing store. Used by
    /// the DMA boundary before a raw copy reads from the range.
    pub fn flush_region(&mut self, addr: u64, len: u64) {
        if !self.region_in_bounds(addr, len) {
            return;
        }
        for id in self.region_objects(addr, len) {
            self.flush_object(id);
        }
    }

    fn region_in_bounds(&self, addr: u64, len: u64) -> bool {
        if len == 0 {
            return false;
        }
        if addr.checked_add(len).is_none_or(|end| end > self.capacity()) {
            warn!(addr, len, "out-of-bounds region request ignored");
            return false;
        }
        true
    }
}

/// Validate a uniform-buffer length the way the descriptor binder must:
/// non-zero, 16-byte aligned, at most [`MAX_UNIFORM_LEN`].
pub fn uniform_len_valid(len: u64) -> bool {
    len != 0 && len % 16 == 0 && len <= MAX_UNIFORM_LEN
}
