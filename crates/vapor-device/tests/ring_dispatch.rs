//! Doorbell and DMA ring batch dispatch, end to end through the registers.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use vapor_device::{
    CommandDecoder, CtrlFlags, GpuDevice, RING_ADDR_REG, RING_READ_LEN_REG, RING_READ_PTR_REG,
    RING_SIZE,
};
use vapor_vram::backend::MemoryBackend;
use vapor_vram::{Store, VramCache};

const RING_BASE: u64 = 0x28000;

struct RecordingDecoder(Arc<Mutex<Vec<Vec<u8>>>>);

impl CommandDecoder for RecordingDecoder {
    fn decode(&mut self, commands: &[u8]) {
        self.0.lock().unwrap().push(commands.to_vec());
    }
}

fn device() -> (GpuDevice, Arc<Mutex<Vec<Vec<u8>>>>) {
    let ram = Store::new(0x30000);
    let cache = VramCache::new(Store::new(0x8000), Box::new(MemoryBackend::new()));
    let decoded = Arc::new(Mutex::new(Vec::new()));
    let device = GpuDevice::new(ram, cache, Box::new(RecordingDecoder(Arc::clone(&decoded))));
    (device, decoded)
}

fn write_cmd_buffer(device: &GpuDevice, addr: u64, payload: &[u8]) {
    let store = device.cache().store();
    store.write_u32(addr, payload.len() as u32).unwrap();
    store.write_from(addr + 4, payload).unwrap();
}

#[test]
fn doorbell_dispatches_one_command_buffer() {
    let (mut device, decoded) = device();
    write_cmd_buffer(&device, 0x400, &[1, 2, 3, 4, 5, 6, 7, 8]);

    device.ram().write_u64(RING_BASE, 0x400).unwrap();
    let regs = device.regs();
    regs.write_u64(RING_ADDR_REG, RING_BASE);
    regs.write_u64(RING_READ_PTR_REG, RING_BASE);
    regs.write_u64(RING_READ_LEN_REG, 8);
    regs.set_ctrl(CtrlFlags::DOORBELL);

    device.registers_update();

    assert_eq!(*decoded.lock().unwrap(), vec![vec![1, 2, 3, 4, 5, 6, 7, 8]]);
    // Doorbell consumed, read pointer advanced past the batch.
    assert!(device.regs().ctrl().is_empty());
    assert_eq!(device.regs().read_u64(RING_READ_PTR_REG), RING_BASE + 8);
    // The command buffer object outlives its dispatch; only aliases settle.
    assert_eq!(device.cache().live_object_count(), 1);
    assert_eq!(device.cache().tracked_overlap_count(), 0);
}

#[test]
fn batch_wraps_at_the_ring_end() {
    let (mut device, decoded) = device();
    write_cmd_buffer(&device, 0x400, &[1, 1, 1, 1]);
    write_cmd_buffer(&device, 0x800, &[2, 2, 2, 2]);

    // First entry in the ring's last slot, second wraps to the ring base.
    let read_ptr = RING_BASE + RING_SIZE - 8;
    device.ram().write_u64(read_ptr, 0x400).unwrap();
    device.ram().write_u64(RING_BASE, 0x800).unwrap();
    let regs = device.regs();
    regs.write_u64(RING_ADDR_REG, RING_BASE);
    regs.write_u64(RING_READ_PTR_REG, read_ptr);
    regs.write_u64(RING_READ_LEN_REG, 16);
    regs.set_ctrl(CtrlFlags::DOORBELL);

    device.registers_update();

    assert_eq!(
        *decoded.lock().unwrap(),
        vec![vec![1, 1, 1, 1], vec![2, 2, 2, 2]]
    );
}

#[test]
fn bad_entries_are_skipped_without_faulting() {
    let (mut device, decoded) = device();
    write_cmd_buffer(&device, 0x800, &[5, 5, 5, 5]);

    // Misaligned address, then a header with a zero command count, then a
    // valid buffer.
    device.ram().write_u64(RING_BASE, 0x401).unwrap();
    device.ram().write_u64(RING_BASE + 8, 0x600).unwrap();
    device.ram().write_u64(RING_BASE + 16, 0x800).unwrap();
    let regs = device.regs();
    regs.write_u64(RING_ADDR_REG, RING_BASE);
    regs.write_u64(RING_READ_PTR_REG, RING_BASE);
    regs.write_u64(RING_READ_LEN_REG, 24);
    regs.set_ctrl(CtrlFlags::DOORBELL);

    device.registers_update();

    assert_eq!(*decoded.lock().unwrap(), vec![vec![5, 5, 5, 5]]);
}

#[test]
fn misaligned_ring_consumes_the_doorbell_but_dispatches_nothing() {
    let (mut device, decoded) = device();

    let regs = device.regs();
    regs.write_u64(RING_ADDR_REG, RING_BASE + 0x100);
    regs.write_u64(RING_READ_PTR_REG, RING_BASE + 0x100);
    regs.write_u64(RING_READ_LEN_REG, 8);
    regs.set_ctrl(CtrlFlags::DOORBELL);

    device.registers_update();

    assert!(decoded.lock().unwrap().is_empty());
    assert!(device.regs().ctrl().is_empty());
}

#[test]
fn direct_batch_calls_reject_bad_ring_placement() {
    let (mut device, decoded) = device();

    // Ring base that would overflow past the address space, one past the end
    // of RAM, and a misaligned one.
    device.process_batch(u64::MAX - (u64::MAX % RING_SIZE), 0, 8);
    device.process_batch(0x30000, 0x30000, 8);
    device.process_batch(RING_BASE + 1, RING_BASE + 1, 8);

    assert!(decoded.lock().unwrap().is_empty());
}

#[test]
fn aliases_created_by_a_batch_are_settled() {
    let (mut device, decoded) = device();
    write_cmd_buffer(&device, 0x400, &[0u8; 8]);

    // Two views aliasing the same VRAM range, live before the batch runs.
    device
        .cache_mut()
        .reference(
            0x1000,
            vapor_vram::ObjectKind::VertexBuffer,
            vapor_vram::LenSpec::Exact(64),
        )
        .unwrap();
    device
        .cache_mut()
        .reference(
            0x1000,
            vapor_vram::ObjectKind::IndexBuffer,
            vapor_vram::LenSpec::Exact(64),
        )
        .unwrap();
    assert_eq!(device.cache().tracked_overlap_count(), 2);

    device.ram().write_u64(RING_BASE, 0x400).unwrap();
    let regs = device.regs();
    regs.write_u64(RING_ADDR_REG, RING_BASE);
    regs.write_u64(RING_READ_PTR_REG, RING_BASE);
    regs.write_u64(RING_READ_LEN_REG, 8);
    regs.set_ctrl(CtrlFlags::DOORBELL);

    device.registers_update();

    assert_eq!(decoded.lock().unwrap().len(), 1);
    assert_eq!(device.cache().tracked_overlap_count(), 0);
    // The aliased pair settled; only the command buffer object survives.
    assert_eq!(device.cache().live_object_count(), 1);
}
