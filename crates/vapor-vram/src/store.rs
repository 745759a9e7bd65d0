//! Flat byte stores for the two independently-addressed memory spaces
//! (device-visible VRAM and host-visible RAM).
//!
//! A [`Store`] is a cheaply cloneable handle; clones address the same bytes.
//! That lets a background DMA copy task hold a handle to both spaces while the
//! main thread keeps servicing cache lookups. All accessors take `&self` and
//! lock internally, so a read or write is never torn.

use std::sync::{Arc, Mutex};

use crate::error::{Result, VramError};

#[derive(Clone)]
pub struct Store {
    bytes: Arc<Mutex<Vec<u8>>>,
    capacity: u64,
}

impl Store {
    pub fn new(capacity: u64) -> Self {
        let len = usize::try_from(capacity).expect("store capacity must fit in usize");
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; len])),
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn check(&self, addr: u64, len: u64) -> Result<()> {
        let end = addr.checked_add(len);
        match end {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(VramError::OutOfBounds {
                addr,
                len,
                capacity: self.capacity,
            }),
        }
    }

    pub fn read_into(&self, addr: u64, dst: &mut [u8]) -> Result<()> {
        self.check(addr, dst.len() as u64)?;
        let bytes = self.bytes.lock().expect("store mutex poisoned");
        let start = addr as usize;
        dst.copy_from_slice(&bytes[start..start + dst.len()]);
        Ok(())
    }

    pub fn write_from(&self, addr: u64, src: &[u8]) -> Result<()> {
        self.check(addr, src.len() as u64)?;
        let mut bytes = self.bytes.lock().expect("store mutex poisoned");
        let start = addr as usize;
        bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub fn read_vec(&self, addr: u64, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; usize::try_from(len).expect("read length must fit in usize")];
        self.read_into(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&self, addr: u64, value: u32) -> Result<()> {
        self.write_from(addr, &value.to_le_bytes())
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&self, addr: u64, value: u64) -> Result<()> {
        self.write_from(addr, &value.to_le_bytes())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("capacity", &self.capacity)
            .finish()
    }
}
