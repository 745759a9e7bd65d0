//! VaporGPU device model: register window, DMA ring dispatch and the
//! background copy engine, layered over the `vapor-vram` object cache.
//!
//! The device owns one [`VramCache`] and a handle to guest RAM. The machine
//! drives it through [`GpuDevice::registers_update`] whenever the guest
//! touches the register window; everything else (batch processing, copy
//! scheduling, cache settling) follows from the register state.

mod copy;
mod regs;
mod ring;

use vapor_vram::{Store, VramCache};

pub use copy::{CompletionHook, CopyClass, CopyEngine};
pub use regs::{
    CopyFlags, CtrlFlags, RegisterFile, COPY_READ_CTRL_REG, COPY_READ_DST_REG, COPY_READ_LEN_REG,
    COPY_READ_SRC_REG, COPY_WRITE_CTRL_REG, COPY_WRITE_DST_REG, COPY_WRITE_LEN_REG,
    COPY_WRITE_SRC_REG, CTRL_REG, RAM_ADDR_REG, REGS_BASE, REGS_END, RING_ADDR_REG,
    RING_READ_LEN_REG, RING_READ_PTR_REG, VRAM_ADDR_REG,
};
pub use ring::{CommandDecoder, NullDecoder, RING_SIZE};

pub struct GpuDevice {
    pub(crate) ram: Store,
    pub(crate) regs: RegisterFile,
    pub(crate) cache: VramCache,
    copy: CopyEngine,
    pub(crate) decoder: Box<dyn CommandDecoder>,
}

impl GpuDevice {
    pub fn new(ram: Store, cache: VramCache, decoder: Box<dyn CommandDecoder>) -> Self {
        Self::with_completion_hook(ram, cache, decoder, None)
    }

    /// Like [`GpuDevice::new`], with a hook fired on each DMA copy
    /// completion (the machine's interrupt line).
    pub fn with_completion_hook(
        ram: Store,
        cache: VramCache,
        decoder: Box<dyn CommandDecoder>,
        on_copy_complete: Option<CompletionHook>,
    ) -> Self {
        let regs = RegisterFile::new(ram.clone());
        let copy = CopyEngine::with_completion_hook(
            ram.clone(),
            cache.store().clone(),
            regs.clone(),
            on_copy_complete,
        );
        Self {
            ram,
            regs,
            cache,
            copy,
            decoder,
        }
    }

    /// Entry point after the guest writes the register window: service any
    /// pending copy requests, then the doorbell.
    pub fn registers_update(&mut self) {
        if self
            .regs
            .copy_ctrl(COPY_READ_CTRL_REG)
            .contains(CopyFlags::REQUEST)
        {
            let dst = self.regs.read_u64(COPY_READ_DST_REG);
            let src = self.regs.read_u64(COPY_READ_SRC_REG);
            let n = self.regs.read_u64(COPY_READ_LEN_REG);
            self.copy
                .request(&mut self.cache, CopyClass::DeviceToRam, dst, src, n);
        }

        if self
            .regs
            .copy_ctrl(COPY_WRITE_CTRL_REG)
            .contains(CopyFlags::REQUEST)
        {
            let dst = self.regs.read_u64(COPY_WRITE_DST_REG);
            let src = self.regs.read_u64(COPY_WRITE_SRC_REG);
            let n = self.regs.read_u64(COPY_WRITE_LEN_REG);
            self.copy
                .request(&mut self.cache, CopyClass::RamToDevice, dst, src, n);
        }

        if self.regs.ctrl().contains(CtrlFlags::DOORBELL) {
            self.issue_batch();
        }
    }

    pub fn ram(&self) -> &Store {
        &self.ram
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn cache(&self) -> &VramCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VramCache {
        &mut self.cache
    }

    pub fn copy_engine(&self) -> &CopyEngine {
        &self.copy
    }
}
