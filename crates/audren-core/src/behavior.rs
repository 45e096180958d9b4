//! Revision-gated feature set and the behavior error list
//!
//! The client announces its protocol generation as a 'REV?' magic where `?`
//! is an ASCII digit. A feature introduced in revision N is available when
//! the client's digit is at least N.

use crate::config::CURRENT_REVISION;
use crate::error::{RendererError, RendererResult};
use crate::protocol::{BehaviorInParams, ErrorEntry, ErrorInfoOutParams};
use crate::types::MAX_ERROR_INFOS;

/// Behavior flag: memory pools are treated as mapped regardless of state
pub const FLAG_MEMORY_POOL_FORCE_MAPPING: u64 = 1 << 0;

const REVISION_SPLITTER: u32 = 2;
const REVISION_SPLITTER_BUG_FIXED: u32 = 5;
const REVISION_ELAPSED_FRAME_COUNT: u32 = 5;
const REVISION_PLAYED_SAMPLES_RESET_AT_LOOP: u32 = 5;
const REVISION_MIX_DIRTY_ONLY_UPDATE: u32 = 7;

/// Encode a revision digit as its 'REV?' magic
pub const fn revision_magic(digit: u32) -> u32 {
    u32::from_le_bytes([b'R', b'E', b'V', b'0' + (digit % 10) as u8])
}

/// Extract the digit from a 'REV?' magic
pub fn revision_digit(magic: u32) -> Option<u32> {
    let [r, e, v, digit] = magic.to_le_bytes();
    if [r, e, v] != *b"REV" || !digit.is_ascii_digit() {
        return None;
    }
    Some((digit - b'0') as u32)
}

/// `required <= user`: whether a feature from `required` is available
pub fn is_revision_supported(required: u32, user: u32) -> bool {
    required <= user
}

/// One entry of the behavior error list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub result_code: u32,
    pub address: u64,
}

/// Client revision, behavior flags and accumulated non-fatal errors
#[derive(Debug, Clone)]
pub struct BehaviorInfo {
    user_revision: u32,
    flags: u64,
    errors: Vec<ErrorInfo>,
}

impl BehaviorInfo {
    pub fn new(user_revision: u32) -> Self {
        Self {
            user_revision,
            flags: 0,
            errors: Vec::with_capacity(MAX_ERROR_INFOS),
        }
    }

    pub fn user_revision(&self) -> u32 {
        self.user_revision
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    /// Apply the behavior block of an update
    pub fn update(&mut self, params: &BehaviorInParams) -> RendererResult<()> {
        let digit = revision_digit(params.revision).ok_or_else(|| {
            RendererError::invalid(format!("bad behavior revision magic {:#010x}", params.revision))
        })?;
        if digit > CURRENT_REVISION || digit != self.user_revision {
            return Err(RendererError::invalid(format!(
                "behavior revision REV{} does not match client REV{}",
                digit, self.user_revision
            )));
        }
        self.errors.clear();
        self.flags = params.flags;
        Ok(())
    }

    /// Record a non-fatal error; entries past the tenth are dropped
    pub fn append_error(&mut self, result_code: u32, address: u64) {
        if self.errors.len() < MAX_ERROR_INFOS {
            self.errors.push(ErrorInfo {
                result_code,
                address,
            });
        } else {
            log::debug!("Behavior error list full, dropping {:#x}", result_code);
        }
    }

    pub fn errors(&self) -> &[ErrorInfo] {
        &self.errors
    }

    /// Error section of the response
    pub fn error_info(&self) -> ErrorInfoOutParams {
        let mut out = ErrorInfoOutParams::default();
        for (slot, error) in out.errors.iter_mut().zip(&self.errors) {
            *slot = ErrorEntry {
                result_code: error.result_code,
                padding: 0,
                address: error.address,
            };
        }
        out.error_count = self.errors.len() as u32;
        out
    }

    fn supports(&self, required: u32) -> bool {
        is_revision_supported(required, self.user_revision)
    }

    pub fn is_splitter_supported(&self) -> bool {
        self.supports(REVISION_SPLITTER)
    }

    pub fn is_splitter_bug_fixed(&self) -> bool {
        self.supports(REVISION_SPLITTER_BUG_FIXED)
    }

    pub fn is_elapsed_frame_count_supported(&self) -> bool {
        self.supports(REVISION_ELAPSED_FRAME_COUNT)
    }

    pub fn is_played_samples_reset_at_loop_supported(&self) -> bool {
        self.supports(REVISION_PLAYED_SAMPLES_RESET_AT_LOOP)
    }

    pub fn is_mix_in_parameter_dirty_only_update_supported(&self) -> bool {
        self.supports(REVISION_MIX_DIRTY_ONLY_UPDATE)
    }

    pub fn is_memory_pool_force_mapping_enabled(&self) -> bool {
        self.flags & FLAG_MEMORY_POOL_FORCE_MAPPING != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_magic() {
        assert_eq!(&revision_magic(9).to_le_bytes(), b"REV9");
        assert_eq!(revision_digit(revision_magic(4)), Some(4));
        assert_eq!(revision_digit(u32::from_le_bytes(*b"REVX")), None);
        assert_eq!(revision_digit(u32::from_le_bytes(*b"ABC1")), None);
    }

    #[test]
    fn test_feature_gating() {
        let old = BehaviorInfo::new(1);
        assert!(!old.is_splitter_supported());
        assert!(!old.is_elapsed_frame_count_supported());

        let mid = BehaviorInfo::new(5);
        assert!(mid.is_splitter_supported());
        assert!(mid.is_splitter_bug_fixed());
        assert!(!mid.is_mix_in_parameter_dirty_only_update_supported());

        let current = BehaviorInfo::new(CURRENT_REVISION);
        assert!(current.is_mix_in_parameter_dirty_only_update_supported());
    }

    #[test]
    fn test_update_checks_revision() {
        let mut behavior = BehaviorInfo::new(5);
        let mut params = BehaviorInParams {
            revision: revision_magic(5),
            padding: 0,
            flags: FLAG_MEMORY_POOL_FORCE_MAPPING,
        };
        behavior.append_error(1, 2);
        assert!(behavior.update(&params).is_ok());
        assert!(behavior.errors().is_empty());
        assert!(behavior.is_memory_pool_force_mapping_enabled());

        params.revision = revision_magic(6);
        assert!(behavior.update(&params).is_err());
        params.revision = 0;
        assert!(behavior.update(&params).is_err());
    }

    #[test]
    fn test_error_list_caps_at_ten() {
        let mut behavior = BehaviorInfo::new(9);
        for i in 0..12 {
            behavior.append_error(i, i as u64 * 0x10);
        }
        let out = behavior.error_info();
        assert_eq!(out.error_count, 10);
        assert_eq!(out.errors[9].result_code, 9);
        assert_eq!(out.errors[9].address, 0x90);
    }
}
