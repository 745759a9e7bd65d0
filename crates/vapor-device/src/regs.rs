//! Guest-visible register block.
//!
//! The device exposes its registers as a fixed window of host RAM; the guest
//! writes them with ordinary stores and then pokes the device (an MMIO trap in
//! the full machine, [`crate::GpuDevice::registers_update`] here). All
//! multi-byte registers are little-endian.

use bitflags::bitflags;
use vapor_vram::Store;

/// First byte of the register window.
pub const REGS_BASE: u64 = 0x26000;
/// First byte past the register window.
pub const REGS_END: u64 = 0x27000;

pub const CTRL_REG: u64 = 0x26000;
pub const RAM_ADDR_REG: u64 = 0x26004;
pub const VRAM_ADDR_REG: u64 = 0x2600C;
pub const RING_ADDR_REG: u64 = 0x26014;
pub const RING_READ_PTR_REG: u64 = 0x2601C;
pub const RING_READ_LEN_REG: u64 = 0x26024;
// 0x2602C..0x26038 is the scanout block, owned by the display engine.
pub const COPY_READ_CTRL_REG: u64 = 0x26038;
pub const COPY_READ_DST_REG: u64 = 0x2603C;
pub const COPY_READ_SRC_REG: u64 = 0x26044;
pub const COPY_READ_LEN_REG: u64 = 0x2604C;
pub const COPY_WRITE_CTRL_REG: u64 = 0x26054;
pub const COPY_WRITE_DST_REG: u64 = 0x26058;
pub const COPY_WRITE_SRC_REG: u64 = 0x26060;
pub const COPY_WRITE_LEN_REG: u64 = 0x26068;

bitflags! {
    /// Main control register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CtrlFlags: u32 {
        /// Guest rang the doorbell: a batch is ready in the DMA ring.
        const DOORBELL = 1 << 31;
    }
}

bitflags! {
    /// Copy-channel control register (one per direction).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CopyFlags: u32 {
        /// Guest requests a copy; the device clears it on completion.
        const REQUEST = 1 << 31;
    }
}

/// Typed accessors over the register window of a RAM store.
///
/// Construction asserts the window fits, so the accessors can treat register
/// I/O as infallible.
#[derive(Clone)]
pub struct RegisterFile {
    ram: Store,
}

impl RegisterFile {
    pub fn new(ram: Store) -> Self {
        assert!(
            ram.capacity() >= REGS_END,
            "RAM too small for the register window"
        );
        Self { ram }
    }

    pub fn ctrl(&self) -> CtrlFlags {
        CtrlFlags::from_bits_retain(self.read_u32(CTRL_REG))
    }

    pub fn set_ctrl(&self, flags: CtrlFlags) {
        self.write_u32(CTRL_REG, flags.bits());
    }

    pub fn copy_ctrl(&self, ctrl_reg: u64) -> CopyFlags {
        CopyFlags::from_bits_retain(self.read_u32(ctrl_reg))
    }

    pub fn clear_copy_request(&self, ctrl_reg: u64) {
        // `difference` keeps bits outside the defined flag set, `!` does not.
        let flags = self.copy_ctrl(ctrl_reg).difference(CopyFlags::REQUEST);
        self.write_u32(ctrl_reg, flags.bits());
    }

    pub fn read_u32(&self, reg: u64) -> u32 {
        self.ram
            .read_u32(reg)
            .expect("register window is in bounds")
    }

    pub fn write_u32(&self, reg: u64, value: u32) {
        self.ram
            .write_u32(reg, value)
            .expect("register window is in bounds")
    }

    pub fn read_u64(&self, reg: u64) -> u64 {
        self.ram
            .read_u64(reg)
            .expect("register window is in bounds")
    }

    pub fn write_u64(&self, reg: u64, value: u64) {
        self.ram
            .write_u64(reg, value)
            .expect("register window is in bounds")
    }
}
