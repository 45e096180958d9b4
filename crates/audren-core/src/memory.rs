//! Host memory bridge
//!
//! Wave-buffers, ADPCM coefficient tables and aux ring buffers live in guest
//! memory owned by the producer. The renderer only ever touches them through
//! [`HostMemory`]; reads and writes are memcpy-like and never block. A failed
//! access is not an error for the caller: decode paths treat it as "zero
//! samples produced".

use std::sync::Mutex;

/// Access to guest memory
///
/// Implementations must be safe to call concurrently with the guest.
pub trait HostMemory: Send + Sync {
    /// Copy `out.len()` bytes starting at `address`; `false` if unmapped
    fn read(&self, address: u64, out: &mut [u8]) -> bool;

    /// Copy `data` to guest memory at `address`; `false` if unmapped
    fn write(&self, address: u64, data: &[u8]) -> bool;
}

/// Read a plain-old-data record from guest memory
pub fn read_pod<T: bytemuck::Pod>(memory: &dyn HostMemory, address: u64) -> Option<T> {
    let mut value = T::zeroed();
    if memory.read(address, bytemuck::bytes_of_mut(&mut value)) {
        Some(value)
    } else {
        None
    }
}

/// Write a plain-old-data record to guest memory
pub fn write_pod<T: bytemuck::Pod>(memory: &dyn HostMemory, address: u64, value: &T) -> bool {
    memory.write(address, bytemuck::bytes_of(value))
}

/// Guest address window backed by a heap allocation
///
/// Used by the player binary and by tests. Addresses outside
/// `[base, base + len)` are unmapped.
pub struct VecMemory {
    base: u64,
    bytes: Mutex<Vec<u8>>,
}

impl VecMemory {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            bytes: Mutex::new(vec![0; len]),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn range(&self, address: u64, len: usize, total: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= total).then_some(start..end)
    }
}

impl HostMemory for VecMemory {
    fn read(&self, address: u64, out: &mut [u8]) -> bool {
        let bytes = self.lock();
        match self.range(address, out.len(), bytes.len()) {
            Some(range) => {
                out.copy_from_slice(&bytes[range]);
                true
            }
            None => false,
        }
    }

    fn write(&self, address: u64, data: &[u8]) -> bool {
        let mut bytes = self.lock();
        let total = bytes.len();
        match self.range(address, data.len(), total) {
            Some(range) => {
                bytes[range].copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_memory_bounds() {
        let memory = VecMemory::new(0x1000, 16);
        assert!(memory.write(0x1000, &[1, 2, 3, 4]));
        assert!(memory.write(0x100C, &[9, 9, 9, 9]));
        assert!(!memory.write(0x100D, &[9, 9, 9, 9]));
        assert!(!memory.write(0x0FFF, &[0]));

        let mut out = [0u8; 4];
        assert!(memory.read(0x1000, &mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(!memory.read(0x2000, &mut out));
    }

    #[test]
    fn test_pod_helpers() {
        let memory = VecMemory::new(0, 64);
        assert!(write_pod(&memory, 8, &0xDEAD_BEEFu32));
        assert_eq!(read_pod::<u32>(&memory, 8), Some(0xDEAD_BEEF));
        assert_eq!(read_pod::<u64>(&memory, 60), None);
    }
}
