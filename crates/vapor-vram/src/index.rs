//! Bucket-table spatial index.
//!
//! The address space is partitioned into fixed-size buckets; every live object
//! is listed in each bucket its range touches. Range queries then only visit
//! the spanned buckets instead of every live object. A bucket can list objects
//! that merely pass through it, so callers still interval-test each candidate.
//!
//! Buckets hold [`ObjectId`]s, never owning references; the registry arena in
//! the cache is the single owner of object state.

use crate::object::ObjectId;

/// Bucket granularity in bytes.
pub const BUCKET_SIZE: u64 = 4096;

#[derive(Debug)]
pub struct BucketIndex {
    bucket_size: u64,
    buckets: Vec<Vec<ObjectId>>,
}

impl BucketIndex {
    pub fn new(capacity: u64) -> Self {
        Self::with_bucket_size(capacity, BUCKET_SIZE)
    }

    pub fn with_bucket_size(capacity: u64, bucket_size: u64) -> Self {
        assert!(bucket_size > 0);
        let count = capacity.div_ceil(bucket_size);
        Self {
            bucket_size,
            buckets: vec![Vec::new(); usize::try_from(count).expect("bucket count fits in usize")],
        }
    }

    fn span(&self, addr: u64, len: u64) -> std::ops::RangeInclusive<usize> {
        debug_assert!(len > 0);
        let start = (addr / self.bucket_size) as usize;
        let end = ((addr + len - 1) / self.bucket_size) as usize;
        debug_assert!(end < self.buckets.len(), "range outside the indexed space");
        start..=end
    }

    pub fn insert(&mut self, id: ObjectId, addr: u64, len: u64) {
        for b in self.span(addr, len) {
            self.buckets[b].push(id);
        }
    }

    pub fn remove(&mut self, id: ObjectId, addr: u64, len: u64) {
        for b in self.span(addr, len) {
            self.buckets[b].retain(|&entry| entry != id);
        }
    }

    /// All ids listed in buckets spanned by `[addr, addr + len)`.
    ///
    /// May contain duplicates (an object spanning several buckets) and false
    /// positives (a bucket neighbor that does not intersect the query range);
    /// the caller deduplicates and interval-tests.
    pub fn candidates(&self, addr: u64, len: u64) -> impl Iterator<Item = ObjectId> + '_ {
        self.span(addr, len)
            .flat_map(|b| self.buckets[b].iter().copied())
    }

    /// Ids listed in the single bucket containing `addr`.
    pub fn bucket_of(&self, addr: u64) -> &[ObjectId] {
        &self.buckets[(addr / self.bucket_size) as usize]
    }
}
