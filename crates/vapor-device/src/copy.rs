//! Background DMA copy engine between host RAM and VRAM.
//!
//! The guest requests bulk copies through the copy-channel registers; the
//! actual byte movement runs on a detached worker thread so the emulation
//! loop is not stalled. Per direction at most one copy is in flight; a request
//! arriving while its direction is busy is dropped, never queued. The guest
//! observes completion by the REQUEST bit clearing (plus the completion hook,
//! which the machine wires to an interrupt line).
//!
//! Coherence with the object cache is settled *before* the thread starts, on
//! the caller's thread: a device-to-RAM copy flushes every object overlapping
//! the VRAM source, a RAM-to-device copy marks every object overlapping the
//! VRAM destination stale. After that the raw stores are safe to touch
//! concurrently.

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};
use vapor_vram::{Store, VramCache};

use crate::regs::{RegisterFile, COPY_READ_CTRL_REG, COPY_WRITE_CTRL_REG};

/// Direction of a DMA copy, named from the guest's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyClass {
    /// Read channel: VRAM source into RAM destination.
    DeviceToRam,
    /// Write channel: RAM source into VRAM destination.
    RamToDevice,
}

impl CopyClass {
    fn ctrl_reg(self) -> u64 {
        match self {
            CopyClass::DeviceToRam => COPY_READ_CTRL_REG,
            CopyClass::RamToDevice => COPY_WRITE_CTRL_REG,
        }
    }
}

pub type CompletionHook = Box<dyn Fn(CopyClass) + Send + Sync>;

#[derive(Default)]
struct InFlight {
    device_to_ram: bool,
    ram_to_device: bool,
}

impl InFlight {
    fn flag_mut(&mut self, class: CopyClass) -> &mut bool {
        match class {
            CopyClass::DeviceToRam => &mut self.device_to_ram,
            CopyClass::RamToDevice => &mut self.ram_to_device,
        }
    }
}

struct CopyShared {
    ram: Store,
    vram: Store,
    regs: RegisterFile,
    /// In-flight flags and the REQUEST-bit clearing share this lock so a
    /// completing copy is never observed half-finished.
    in_flight: Mutex<InFlight>,
    on_complete: Option<CompletionHook>,
}

pub struct CopyEngine {
    shared: Arc<CopyShared>,
}

impl CopyEngine {
    pub fn new(ram: Store, vram: Store, regs: RegisterFile) -> Self {
        Self::with_completion_hook(ram, vram, regs, None)
    }

    pub fn with_completion_hook(
        ram: Store,
        vram: Store,
        regs: RegisterFile,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        Self {
            shared: Arc::new(CopyShared {
                ram,
                vram,
                regs,
                in_flight: Mutex::new(InFlight::default()),
                on_complete,
            }),
        }
    }

    pub fn is_busy(&self, class: CopyClass) -> bool {
        let mut in_flight = self.shared.in_flight.lock().expect("copy state poisoned");
        *in_flight.flag_mut(class)
    }

    /// Claim the direction's in-flight slot if the request is acceptable.
    /// Returns `false` (request dropped) when the direction is busy or the
    /// ranges do not fit their address spaces.
    fn try_begin(&self, class: CopyClass, dst: u64, src: u64, n: u64) -> bool {
        if n == 0 {
            warn!(?class, "zero-length copy request dropped");
            return false;
        }

        let (dst_capacity, src_capacity) = match class {
            CopyClass::DeviceToRam => (self.shared.ram.capacity(), self.shared.vram.capacity()),
            CopyClass::RamToDevice => (self.shared.vram.capacity(), self.shared.ram.capacity()),
        };
        if dst.checked_add(n).is_none_or(|end| end > dst_capacity)
            || src.checked_add(n).is_none_or(|end| end > src_capacity)
        {
            warn!(?class, dst, src, n, "out-of-bounds copy request dropped");
            return false;
        }

        let mut in_flight = self.shared.in_flight.lock().expect("copy state poisoned");
        let flag = in_flight.flag_mut(class);
        if *flag {
            debug!(?class, dst, src, n, "copy channel busy, request dropped");
            return false;
        }
        *flag = true;
        true
    }

    /// Service a guest copy request: settle cache coherence synchronously,
    /// then move the bytes on a detached worker thread.
    pub fn request(&self, cache: &mut VramCache, class: CopyClass, dst: u64, src: u64, n: u64) {
        if !self.try_begin(class, dst, src, n) {
            return;
        }

        // The cache is only safe to touch from this thread; settle it before
        // the worker exists.
        match class {
            CopyClass::DeviceToRam => cache.flush_region(src, n),
            CopyClass::RamToDevice => cache.stale_region(dst, n),
        }

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let (dst_store, src_store) = match class {
                CopyClass::DeviceToRam => (&shared.ram, &shared.vram),
                CopyClass::RamToDevice => (&shared.vram, &shared.ram),
            };

            let mut buf = vec![0u8; usize::try_from(n).expect("copy length fits in usize")];
            src_store
                .read_into(src, &mut buf)
                .expect("range was bounds-checked");
            dst_store
                .write_from(dst, &buf)
                .expect("range was bounds-checked");

            {
                let mut in_flight = shared.in_flight.lock().expect("copy state poisoned");
                *in_flight.flag_mut(class) = false;
                shared.regs.clear_copy_request(class.ctrl_reg());
            }
            if let Some(hook) = &shared.on_complete {
                hook(class);
            }
        });
    }

    /// Block until both copy channels are idle. Test and shutdown aid; the
    /// guest-visible idle signal is the REQUEST bit.
    pub fn wait_idle(&self) {
        loop {
            {
                let in_flight = self.shared.in_flight.lock().expect("copy state poisoned");
                if !in_flight.device_to_ram && !in_flight.ram_to_device {
                    return;
                }
            }
            thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (CopyEngine, Store, Store) {
        let ram = Store::new(0x30000);
        let vram = Store::new(0x10000);
        let regs = RegisterFile::new(ram.clone());
        (CopyEngine::new(ram.clone(), vram.clone(), regs), ram, vram)
    }

    #[test]
    fn try_begin_rejects_bad_ranges_and_busy_channels() {
        let (engine, _ram, _vram) = engine();

        assert!(!engine.try_begin(CopyClass::DeviceToRam, 0, 0, 0));
        // VRAM source past its 0x10000 capacity; RAM would fit.
        assert!(!engine.try_begin(CopyClass::DeviceToRam, 0, 0x10000, 8));
        // RAM destination past its capacity.
        assert!(!engine.try_begin(CopyClass::DeviceToRam, 0x30000, 0, 8));

        assert!(engine.try_begin(CopyClass::DeviceToRam, 0, 0, 8));
        // Same direction busy, other direction free.
        assert!(!engine.try_begin(CopyClass::DeviceToRam, 0x100, 0x100, 8));
        assert!(engine.try_begin(CopyClass::RamToDevice, 0, 0, 8));
    }
}
