//! DMA ring and command-buffer batch dispatch.
//!
//! The guest builds batches as arrays of little-endian `u64` command-buffer
//! addresses inside a fixed-size ring in host RAM, then rings the doorbell.
//! The device consumes the batch between the read pointer and read length,
//! wrapping at the ring's end, and dispatches each command buffer in order.
//! Malformed input never faults the device: every validation failure logs and
//! skips the offending batch or entry.

use tracing::warn;

use vapor_vram::{Header, LenSpec, ObjectKind, OBJECT_ALIGN};

use crate::regs::{CtrlFlags, RING_ADDR_REG, RING_READ_LEN_REG, RING_READ_PTR_REG};
use crate::GpuDevice;

/// Ring size in bytes; the ring base must be aligned to it.
pub const RING_SIZE: u64 = 16384;

/// Seam to the command-stream interpreter. Receives the payload of one
/// command buffer (header stripped) per dispatch.
pub trait CommandDecoder {
    fn decode(&mut self, commands: &[u8]);
}

/// Decoder that ignores every command stream; headless and bring-up use.
#[derive(Debug, Default)]
pub struct NullDecoder;

impl CommandDecoder for NullDecoder {
    fn decode(&mut self, _commands: &[u8]) {}
}

impl GpuDevice {
    /// Service the doorbell: consume it, advance the read pointer past the
    /// batch, and process the batch the pointers described.
    ///
    /// The doorbell and pointer are consumed before validation so a malformed
    /// ring configuration cannot wedge the channel.
    pub fn issue_batch(&mut self) {
        let ctrl = self.regs.ctrl();
        if !ctrl.contains(CtrlFlags::DOORBELL) {
            return;
        }

        let ring_addr = self.regs.read_u64(RING_ADDR_REG);
        let read_ptr = self.regs.read_u64(RING_READ_PTR_REG);
        let read_len = self.regs.read_u64(RING_READ_LEN_REG);

        self.regs
            .write_u64(RING_READ_PTR_REG, read_ptr.wrapping_add(read_len));
        self.regs.set_ctrl(ctrl.difference(CtrlFlags::DOORBELL));

        self.process_batch(ring_addr, read_ptr, read_len);
    }

    /// Read one batch out of the ring (wrapping at its end) and dispatch
    /// every command-buffer address in it. Validates the ring placement as
    /// well as the batch pointers, so it is safe against arbitrary register
    /// values.
    pub fn process_batch(&mut self, ring_addr: u64, read_ptr: u64, read_len: u64) {
        if ring_addr % RING_SIZE != 0 {
            warn!(ring_addr, "DMA ring misaligned, skipping batch");
            return;
        }
        if ring_addr
            .checked_add(RING_SIZE)
            .is_none_or(|end| end > self.ram.capacity())
        {
            warn!(ring_addr, "DMA ring out of RAM bounds, skipping batch");
            return;
        }
        if read_len == 0 {
            warn!("zero-length batch, skipping");
            return;
        }
        if read_len % 8 != 0 {
            warn!(read_len, "batch length is not a multiple of 8, skipping");
            return;
        }
        if read_len > RING_SIZE {
            warn!(read_len, "batch longer than the ring, skipping");
            return;
        }
        let ring_end = ring_addr + RING_SIZE;
        if read_ptr < ring_addr || read_ptr >= ring_end {
            warn!(
                read_ptr,
                ring_addr, "batch read pointer outside the ring, skipping"
            );
            return;
        }

        let mut batch = vec![0u8; read_len as usize];
        let first = (ring_end - read_ptr).min(read_len) as usize;
        self.ram
            .read_into(read_ptr, &mut batch[..first])
            .expect("ring lies within RAM");
        if first < batch.len() {
            // Wrapped: the tail continues from the ring base.
            self.ram
                .read_into(ring_addr, &mut batch[first..])
                .expect("ring lies within RAM");
        }

        for entry in batch.chunks_exact(8) {
            let addr = u64::from_le_bytes(entry.try_into().expect("chunks are 8 bytes"));
            self.dispatch_cmd_buffer(addr);
        }
    }

    /// Reference the command buffer at `addr`, feed its payload to the
    /// decoder, then settle all aliasing. Aliased views never survive past
    /// the command buffer that created them.
    fn dispatch_cmd_buffer(&mut self, addr: u64) {
        if addr % OBJECT_ALIGN != 0 {
            warn!(addr, "command buffer address misaligned, skipping");
            return;
        }

        let id = match self
            .cache
            .reference(addr, ObjectKind::CommandBuffer, LenSpec::Auto)
        {
            Ok(id) => id,
            Err(err) => {
                warn!(addr, %err, "failed to reference command buffer, skipping");
                return;
            }
        };

        let obj = self.cache.object(id).expect("just referenced");
        let Header::CommandBuffer { .. } = obj.header else {
            warn!(addr, "command buffer object carries no header, skipping");
            return;
        };
        let (len, header_len) = (obj.len as usize, obj.header_len() as usize);

        let mut bytes = vec![0u8; len];
        self.cache
            .read(&mut bytes, addr)
            .expect("object range lies within VRAM");

        self.decoder.decode(&bytes[header_len..]);

        self.cache.settle_all();
    }
}
