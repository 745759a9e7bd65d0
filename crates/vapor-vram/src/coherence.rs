//! Aliasing-coherence engine: recency-ordered range reads and writes.
//!
//! Every device-side access of a VRAM range is decomposed into portions, each
//! served either by exactly one live object or by the raw backing store. When
//! several objects alias a byte, a [`RecencyPreference`] decides which object's
//! copy wins that portion: reads default to `Oldest` (the view established
//! first keeps serving readers), writes default to `Newest` (the view the
//! guest set up most recently absorbs new data). Flushing an aliased object
//! inverts both, see [`VramCache::flush_object`].

use tracing::warn;

use crate::cache::VramCache;
use crate::error::{Result, VramError};
use crate::object::ObjectId;

/// Which aliasing object's copy serves a contested portion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecencyPreference {
    /// Least recently referenced object wins.
    Oldest,
    /// Most recently referenced object wins.
    Newest,
}

/// One contiguous chunk of a decomposed range access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Portion {
    /// Object serving the chunk, or `None` for the raw backing store.
    pub id: Option<ObjectId>,
    pub addr: u64,
    pub len: u64,
}

impl VramCache {
    /// Among live objects intersecting `[addr, addr + search_len)`, pick the
    /// one to serve byte `addr`: lowest base address first, preferred recency
    /// breaking ties. An excluded object's recency acts as a cutoff so the
    /// caller can find where its portion must end.
    fn next_object(
        &self,
        addr: u64,
        search_len: u64,
        exclude: Option<ObjectId>,
        pref: RecencyPreference,
    ) -> Option<ObjectId> {
        let exclude_recency = exclude.map(|id| self.objects[&id].recency);

        let mut next = None;
        let mut min_addr = u64::MAX;
        // Recencies start at 1, so 0 is below every live object's.
        let mut best_recency = match pref {
            RecencyPreference::Oldest => u64::MAX,
            RecencyPreference::Newest => 0,
        };

        for id in self.region_objects(addr, search_len) {
            if Some(id) == exclude {
                continue;
            }
            let obj = &self.objects[&id];

            // Objects on the wrong side of the excluded recency cannot cut
            // the excluded object's portion.
            if let Some(cutoff) = exclude_recency {
                let worse = match pref {
                    RecencyPreference::Oldest => obj.recency > cutoff,
                    RecencyPreference::Newest => obj.recency < cutoff,
                };
                if worse {
                    continue;
                }
            }

            let better_recency = match pref {
                RecencyPreference::Oldest => obj.recency < best_recency,
                RecencyPreference::Newest => obj.recency > best_recency,
            };

            // Same base address: recency alone breaks the tie.
            if obj.addr == min_addr && !better_recency {
                continue;
            }

            if obj.addr < addr {
                // `addr` falls inside this object.
                if !better_recency {
                    continue;
                }
                next = Some(id);
                min_addr = addr;
                best_recency = obj.recency;
            }

            // A lower base address wins even at a worse recency.
            if obj.addr >= addr && obj.addr <= min_addr {
                next = Some(id);
                min_addr = obj.addr;
                if better_recency {
                    best_recency = obj.recency;
                }
            }
        }

        next
    }

    /// Decompose the next chunk of `[addr, addr + max_len)`: the single object
    /// (or raw store) serving bytes from `addr`, and how many bytes it serves
    /// before another object takes over.
    ///
    /// `max_len` must be non-zero and the range in bounds; callers validate.
    pub fn portion(&self, addr: u64, max_len: u64, pref: RecencyPreference) -> Portion {
        let ids = self.region_objects(addr, max_len);

        // Optimal case: one object covering the whole range.
        if let [id] = ids[..] {
            let obj = &self.objects[&id];
            if obj.addr <= addr && addr + max_len <= obj.end() {
                let remaining = obj.len - (addr - obj.addr);
                return Portion {
                    id: Some(id),
                    addr,
                    len: remaining.min(max_len),
                };
            }
        }

        // Optimal case: nothing live in the range.
        if ids.is_empty() {
            return Portion {
                id: None,
                addr,
                len: max_len,
            };
        }

        let chosen = self
            .next_object(addr, max_len, None, pref)
            .expect("a live object intersects the range");
        let chosen_addr = self.objects[&chosen].addr;

        // Gap before the first object: raw store up to its base.
        if chosen_addr > addr {
            return Portion {
                id: None,
                addr,
                len: (chosen_addr - addr).min(max_len),
            };
        }

        let chosen_obj = &self.objects[&chosen];
        let mut remaining = (chosen_obj.len - (addr - chosen_addr)).min(max_len);

        // No competing object before this object's end, or nothing to cut.
        if remaining == 1 || self.region_objects(addr, remaining).len() == 1 {
            return Portion {
                id: Some(chosen),
                addr,
                len: remaining,
            };
        }

        // Another object with an acceptable recency starts inside the chunk:
        // the chosen object's portion ends where that one begins.
        if let Some(cut) = self.next_object(addr + 1, remaining - 1, Some(chosen), pref) {
            let cut_addr = self.objects[&cut].addr;
            if cut_addr > addr {
                remaining = remaining.min(cut_addr - addr);
            }
        }

        Portion {
            id: Some(chosen),
            addr,
            len: remaining,
        }
    }

    /// Read `dst.len()` bytes starting at `src`, portion by portion.
    pub fn range_read(&self, dst: &mut [u8], src: u64, pref: RecencyPreference) -> Result<()> {
        let n = dst.len() as u64;
        self.check_range(src, n)?;

        let mut addr = src;
        let mut done = 0usize;
        while (done as u64) < n {
            let portion = self.portion(addr, n - done as u64, pref);
            let chunk = &mut dst[done..done + portion.len as usize];
            match portion.id {
                Some(id) => {
                    self.objects[&id].read_bytes(&self.store, self.backend.as_ref(), chunk, addr);
                }
                None => self
                    .store
                    .read_into(addr, chunk)
                    .expect("range was bounds-checked"),
            }
            done += portion.len as usize;
            addr += portion.len;
        }
        Ok(())
    }

    /// Write `src` starting at `dst`, portion by portion.
    ///
    /// The backing store always receives the full write, then each portion's
    /// winning object absorbs its share so subsequent object reads stay
    /// coherent. Losing aliases keep their old copy until settled.
    pub fn range_write(&mut self, dst: u64, src: &[u8], pref: RecencyPreference) -> Result<()> {
        let n = src.len() as u64;
        self.check_range(dst, n)?;

        self.store
            .write_from(dst, src)
            .expect("range was bounds-checked");

        let mut addr = dst;
        let mut done = 0usize;
        while (done as u64) < n {
            let portion = self.portion(addr, n - done as u64, pref);
            if let Some(id) = portion.id {
                let chunk = &src[done..done + portion.len as usize];
                self.objects
                    .get_mut(&id)
                    .expect("portion object is live")
                    .write_bytes(self.backend.as_mut(), addr, chunk);
            }
            done += portion.len as usize;
            addr += portion.len;
        }
        Ok(())
    }

    /// Device-side read with the default preference: the oldest aliasing
    /// object's copy wins.
    pub fn read(&self, dst: &mut [u8], src: u64) -> Result<()> {
        self.range_read(dst, src, RecencyPreference::Oldest)
    }

    /// Device-side write with the default preference: the newest aliasing
    /// object absorbs the data.
    pub fn write(&mut self, dst: u64, src: &[u8]) -> Result<()> {
        self.range_write(dst, src, RecencyPreference::Newest)
    }

    fn check_range(&self, addr: u64, len: u64) -> Result<()> {
        if len == 0 {
            warn!(addr, "zero-length VRAM access");
            return Err(VramError::ZeroLength { addr });
        }
        if addr.checked_add(len).is_none_or(|end| end > self.capacity()) {
            let err = VramError::OutOfBounds {
                addr,
                len,
                capacity: self.capacity(),
            };
            warn!(addr, len, %err, "VRAM access out of bounds");
            return Err(err);
        }
        Ok(())
    }
}
