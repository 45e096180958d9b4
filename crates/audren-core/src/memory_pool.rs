//! Guest memory pools
//!
//! The guest registers the regions its wave-buffers and aux buffers live in.
//! Only attach and detach requests change server state; every other state
//! is echoed back unchanged.

use crate::error::{RendererError, RendererResult};
use crate::protocol::{MemoryPoolInParams, MemoryPoolOutParams};
use crate::types::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPoolState {
    #[default]
    Invalid,
    Acquired,
    RequestDetach,
    Detached,
    RequestAttach,
    Attached,
    Released,
}

impl MemoryPoolState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => MemoryPoolState::Acquired,
            2 => MemoryPoolState::RequestDetach,
            3 => MemoryPoolState::Detached,
            4 => MemoryPoolState::RequestAttach,
            5 => MemoryPoolState::Attached,
            6 => MemoryPoolState::Released,
            _ => MemoryPoolState::Invalid,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            MemoryPoolState::Invalid => 0,
            MemoryPoolState::Acquired => 1,
            MemoryPoolState::RequestDetach => 2,
            MemoryPoolState::Detached => 3,
            MemoryPoolState::RequestAttach => 4,
            MemoryPoolState::Attached => 5,
            MemoryPoolState::Released => 6,
        }
    }
}

/// Server-side view of one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPoolInfo {
    pub address: u64,
    pub size: u64,
    pub state: MemoryPoolState,
}

impl MemoryPoolInfo {
    pub fn is_attached(&self) -> bool {
        self.state == MemoryPoolState::Attached
    }

    /// Whether `[address, address + size)` lies inside this attached pool
    pub fn contains(&self, address: u64, size: u64) -> bool {
        self.is_attached()
            && address >= self.address
            && match (address.checked_add(size), self.address.checked_add(self.size)) {
                (Some(end), Some(pool_end)) => end <= pool_end,
                _ => false,
            }
    }

    /// Apply one input record and produce its output record
    pub fn update(&mut self, params: &MemoryPoolInParams) -> RendererResult<MemoryPoolOutParams> {
        let requested = MemoryPoolState::from_raw(params.state);
        let mut out = MemoryPoolOutParams {
            state: params.state,
            ..Default::default()
        };

        match requested {
            MemoryPoolState::RequestAttach => {
                if params.address == 0
                    || params.size == 0
                    || params.address % PAGE_SIZE != 0
                    || params.size % PAGE_SIZE != 0
                    || params.address.checked_add(params.size).is_none()
                {
                    return Err(RendererError::invalid(format!(
                        "memory pool attach of {:#x}+{:#x} is not page aligned",
                        params.address, params.size
                    )));
                }
                self.address = params.address;
                self.size = params.size;
                self.state = MemoryPoolState::Attached;
                out.state = MemoryPoolState::Attached.to_raw();
            }
            MemoryPoolState::RequestDetach => {
                if self.address != params.address || self.size != params.size {
                    return Err(RendererError::invalid(format!(
                        "memory pool detach of {:#x}+{:#x} does not match attached {:#x}+{:#x}",
                        params.address, params.size, self.address, self.size
                    )));
                }
                self.address = 0;
                self.size = 0;
                self.state = MemoryPoolState::Detached;
                out.state = MemoryPoolState::Detached.to_raw();
            }
            _ => {}
        }
        Ok(out)
    }
}

/// Whether some attached pool covers the range
pub fn is_mapped(pools: &[MemoryPoolInfo], address: u64, size: u64) -> bool {
    pools.iter().any(|pool| pool.contains(address, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(state: MemoryPoolState, address: u64, size: u64) -> MemoryPoolInParams {
        MemoryPoolInParams {
            address,
            size,
            state: state.to_raw(),
            ..Default::default()
        }
    }

    #[test]
    fn test_attach_then_detach() {
        let mut pool = MemoryPoolInfo::default();
        let out = pool
            .update(&request(MemoryPoolState::RequestAttach, 0x10000, 0x2000))
            .unwrap();
        assert_eq!(MemoryPoolState::from_raw(out.state), MemoryPoolState::Attached);
        assert!(pool.contains(0x10800, 0x100));
        assert!(!pool.contains(0x11F00, 0x200));

        let out = pool
            .update(&request(MemoryPoolState::RequestDetach, 0x10000, 0x2000))
            .unwrap();
        assert_eq!(MemoryPoolState::from_raw(out.state), MemoryPoolState::Detached);
        assert!(!pool.is_attached());
    }

    #[test]
    fn test_attach_requires_alignment() {
        let mut pool = MemoryPoolInfo::default();
        assert!(pool
            .update(&request(MemoryPoolState::RequestAttach, 0x10010, 0x1000))
            .is_err());
        assert!(pool
            .update(&request(MemoryPoolState::RequestAttach, 0, 0x1000))
            .is_err());
        assert!(pool
            .update(&request(MemoryPoolState::RequestAttach, 0x1000, 0))
            .is_err());
    }

    #[test]
    fn test_pool_end_overflow_is_not_contained() {
        let top = u64::MAX - PAGE_SIZE + 1;
        let mut pool = MemoryPoolInfo::default();
        assert!(pool
            .update(&request(MemoryPoolState::RequestAttach, top, 2 * PAGE_SIZE))
            .is_err());

        let pool = MemoryPoolInfo {
            address: top,
            size: 2 * PAGE_SIZE,
            state: MemoryPoolState::Attached,
        };
        assert!(!pool.contains(top, 0x10));
        assert!(!pool.contains(u64::MAX, 2));
    }

    #[test]
    fn test_detach_must_match() {
        let mut pool = MemoryPoolInfo::default();
        pool.update(&request(MemoryPoolState::RequestAttach, 0x10000, 0x1000))
            .unwrap();
        assert!(pool
            .update(&request(MemoryPoolState::RequestDetach, 0x10000, 0x2000))
            .is_err());
        assert!(pool.is_attached());
    }

    #[test]
    fn test_other_states_echo() {
        let mut pool = MemoryPoolInfo::default();
        let out = pool
            .update(&request(MemoryPoolState::Acquired, 0x123, 0x1))
            .unwrap();
        assert_eq!(MemoryPoolState::from_raw(out.state), MemoryPoolState::Acquired);
        assert_eq!(pool, MemoryPoolInfo::default());
    }
}
