//! DMA copy engine, driven through the copy-channel registers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use vapor_device::{
    CopyFlags, GpuDevice, NullDecoder, COPY_READ_CTRL_REG, COPY_READ_DST_REG, COPY_READ_LEN_REG,
    COPY_READ_SRC_REG, COPY_WRITE_CTRL_REG, COPY_WRITE_DST_REG, COPY_WRITE_LEN_REG,
    COPY_WRITE_SRC_REG,
};
use vapor_vram::backend::MemoryBackend;
use vapor_vram::{LenSpec, ObjectKind, Store, VramCache};

fn device() -> GpuDevice {
    let ram = Store::new(0x30000);
    let cache = VramCache::new(Store::new(0x8000), Box::new(MemoryBackend::new()));
    GpuDevice::new(ram, cache, Box::new(NullDecoder))
}

#[test]
fn ram_to_device_copy_lands_and_stales_overlapping_objects() {
    let mut device = device();

    // A live object over the copy destination.
    let id = device
        .cache_mut()
        .reference(0x1000, ObjectKind::VertexBuffer, LenSpec::Exact(64))
        .unwrap();

    device.ram().write_from(0x10000, &[0xEE; 64]).unwrap();
    let regs = device.regs();
    regs.write_u64(COPY_WRITE_DST_REG, 0x1000);
    regs.write_u64(COPY_WRITE_SRC_REG, 0x10000);
    regs.write_u64(COPY_WRITE_LEN_REG, 64);
    regs.write_u32(COPY_WRITE_CTRL_REG, CopyFlags::REQUEST.bits());

    device.registers_update();

    // The stale pass runs synchronously, before the copy thread.
    assert!(device.cache().object(id).unwrap().needs_resync);

    device.copy_engine().wait_idle();
    assert_eq!(
        device.cache().store().read_vec(0x1000, 64).unwrap(),
        vec![0xEE; 64]
    );
    assert!(!device
        .regs()
        .copy_ctrl(COPY_WRITE_CTRL_REG)
        .contains(CopyFlags::REQUEST));

    // Re-referencing the stale object picks up the copied bytes.
    let rebuilt = device
        .cache_mut()
        .reference(0x1000, ObjectKind::VertexBuffer, LenSpec::Exact(64))
        .unwrap();
    assert_ne!(id, rebuilt);
    let mut seen = [0u8; 64];
    device.cache().read(&mut seen, 0x1000).unwrap();
    assert_eq!(seen, [0xEE; 64]);
}

#[test]
fn device_to_ram_copy_flushes_objects_first_and_signals_completion() {
    let completions = Arc::new(AtomicUsize::new(0));
    let hook_count = Arc::clone(&completions);

    let ram = Store::new(0x30000);
    let cache = VramCache::new(Store::new(0x8000), Box::new(MemoryBackend::new()));
    let mut device = GpuDevice::with_completion_hook(
        ram,
        cache,
        Box::new(NullDecoder),
        Some(Box::new(move |_class| {
            hook_count.fetch_add(1, Ordering::SeqCst);
        })),
    );

    // Content that only exists host-side until flushed: snapshot the object,
    // then zero the backing store behind its back. Only the pre-copy flush
    // can put 0xCD back for the DMA thread to read.
    device.cache().store().write_from(0x2000, &[0xCD; 32]).unwrap();
    device
        .cache_mut()
        .reference(0x2000, ObjectKind::VertexBuffer, LenSpec::Exact(32))
        .unwrap();
    device.cache().store().write_from(0x2000, &[0u8; 32]).unwrap();

    let regs = device.regs();
    regs.write_u64(COPY_READ_DST_REG, 0x20000);
    regs.write_u64(COPY_READ_SRC_REG, 0x2000);
    regs.write_u64(COPY_READ_LEN_REG, 32);
    regs.write_u32(COPY_READ_CTRL_REG, CopyFlags::REQUEST.bits());

    device.registers_update();
    device.copy_engine().wait_idle();

    assert_eq!(
        device.ram().read_vec(0x20000, 32).unwrap(),
        vec![0xCD; 32]
    );
    assert!(!device
        .regs()
        .copy_ctrl(COPY_READ_CTRL_REG)
        .contains(CopyFlags::REQUEST));
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn out_of_bounds_requests_are_dropped_and_leave_the_request_bit() {
    let mut device = device();

    let regs = device.regs();
    // VRAM destination past its 0x8000 capacity.
    regs.write_u64(COPY_WRITE_DST_REG, 0x9000);
    regs.write_u64(COPY_WRITE_SRC_REG, 0x10000);
    regs.write_u64(COPY_WRITE_LEN_REG, 64);
    regs.write_u32(COPY_WRITE_CTRL_REG, CopyFlags::REQUEST.bits());

    device.registers_update();
    device.copy_engine().wait_idle();

    // Dropped, not serviced: the device never clears the bit.
    assert!(device
        .regs()
        .copy_ctrl(COPY_WRITE_CTRL_REG)
        .contains(CopyFlags::REQUEST));
}
