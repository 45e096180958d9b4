//! Aux effect: bidirectional ring buffers in guest memory
//!
//! The DSP writes each input channel to the send ring and reads the guest's
//! processed audio back from the recv ring. Both rings hold `ring_len`
//! samples shared by all channels: channel `c` starts `c * frame_len` samples
//! past the ring's offset. The offsets in the info records advance by one
//! frame, on the last channel.

use super::{channel_pairs, pass_through, ProcessContext};
use crate::command::MixBufferPool;
use crate::memory::{read_pod, write_pod, HostMemory};
use crate::protocol::AuxParams;
use crate::types::MAX_MIX_BUFFERS;

/// Ring bookkeeping shared with the guest (0x40 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AuxInfoDsp {
    pub read_offset: u32,
    pub write_offset: u32,
    /// Samples available to the consumer of the ring
    pub remaining: u32,
    pub padding: [u32; 13],
}

const SAMPLE_SIZE: u64 = std::mem::size_of::<i32>() as u64;

/// Write `data` into the ring at `info.write_offset + channel_offset`
///
/// Wraps at `ring_len`. The write offset and `remaining` move by
/// `update_count`, which is non-zero only for the frame's last channel.
fn write_aux(
    memory: &dyn HostMemory,
    info: &mut AuxInfoDsp,
    buffer: u64,
    ring_len: u32,
    data: &[i32],
    channel_offset: u32,
    update_count: u32,
) -> usize {
    if ring_len == 0 {
        return 0;
    }
    let count = data.len();
    let mut position = ((info.write_offset as u64 + channel_offset as u64) % ring_len as u64) as u32;
    let mut written = 0;
    while written < count {
        let chunk = ((ring_len - position) as usize).min(count - written);
        let address = buffer + position as u64 * SAMPLE_SIZE;
        let bytes: &[u8] = bytemuck::cast_slice(&data[written..written + chunk]);
        if !memory.write(address, bytes) {
            log::warn!("Aux send write at {:#x} failed", address);
            break;
        }
        written += chunk;
        position = (position + chunk as u32) % ring_len;
    }
    if update_count > 0 {
        info.write_offset = ((info.write_offset as u64 + update_count as u64) % ring_len as u64) as u32;
        info.remaining = info.remaining.saturating_add(update_count).min(ring_len);
    }
    written
}

/// Read into `out` from the ring at `info.read_offset + channel_offset`
///
/// The unread tail of `out` is zero-filled. The read offset and `remaining`
/// move by `update_count`.
fn read_aux(
    memory: &dyn HostMemory,
    info: &mut AuxInfoDsp,
    buffer: u64,
    ring_len: u32,
    out: &mut [i32],
    channel_offset: u32,
    update_count: u32,
) -> usize {
    let mut read = 0;
    if ring_len > 0 {
        let count = out.len();
        let mut position = ((info.read_offset as u64 + channel_offset as u64) % ring_len as u64) as u32;
        while read < count {
            let chunk = ((ring_len - position) as usize).min(count - read);
            let address = buffer + position as u64 * SAMPLE_SIZE;
            let target: &mut [u8] = bytemuck::cast_slice_mut(&mut out[read..read + chunk]);
            if !memory.read(address, target) {
                log::warn!("Aux recv read at {:#x} failed", address);
                break;
            }
            read += chunk;
            position = (position + chunk as u32) % ring_len;
        }
        if update_count > 0 {
            info.read_offset = ((info.read_offset as u64 + update_count as u64) % ring_len as u64) as u32;
            info.remaining = info.remaining.saturating_sub(update_count);
        }
    }
    out[read..].fill(0);
    read
}

#[derive(Debug, Clone, Default)]
pub struct AuxEffect {
    params: AuxParams,
}

impl AuxEffect {
    pub fn update(&mut self, params: &AuxParams) {
        self.params = *params;
    }

    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool, context: &ProcessContext<'_>) {
        let p = self.params;
        let count = (p.count as usize).min(MAX_MIX_BUFFERS);
        let pairs = channel_pairs(&p.input, &p.output, count, base, pool);
        let memory = context.memory;

        if !enabled || p.sample_count == 0 {
            write_pod(memory, p.send_info_address, &AuxInfoDsp::default());
            write_pod(memory, p.recv_info_address, &AuxInfoDsp::default());
            pass_through(pool, &pairs);
            return;
        }

        let mut send_info = read_pod::<AuxInfoDsp>(memory, p.send_info_address).unwrap_or_default();
        let mut recv_info = read_pod::<AuxInfoDsp>(memory, p.recv_info_address).unwrap_or_default();
        let last = pairs.len().saturating_sub(1);
        let frame_len = context.sample_count as u32;

        for (channel, &(input, output)) in pairs.iter().enumerate() {
            let channel_offset = channel as u32 * frame_len;
            let update_count = if channel == last { frame_len } else { 0 };
            if let Some(data) = pool.get(input) {
                write_aux(
                    memory,
                    &mut send_info,
                    p.send_buffer_address,
                    p.sample_count,
                    data,
                    channel_offset,
                    update_count,
                );
            }
            if let Some(out) = pool.get_mut(output) {
                read_aux(
                    memory,
                    &mut recv_info,
                    p.recv_buffer_address,
                    p.sample_count,
                    out,
                    channel_offset,
                    update_count,
                );
            }
        }

        write_pod(memory, p.send_info_address, &send_info);
        write_pod(memory, p.recv_info_address, &recv_info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemory;

    const SEND_INFO: u64 = 0x1000;
    const RECV_INFO: u64 = 0x1040;
    const SEND_BUFFER: u64 = 0x1100;
    const RECV_BUFFER: u64 = 0x1200;

    fn aux_params(ring_len: u32) -> AuxParams {
        let mut params = AuxParams {
            count: 1,
            sample_count: ring_len,
            send_info_address: SEND_INFO,
            recv_info_address: RECV_INFO,
            send_buffer_address: SEND_BUFFER,
            recv_buffer_address: RECV_BUFFER,
            ..Default::default()
        };
        params.output[0] = 1;
        params
    }

    fn context(memory: &VecMemory, sample_count: usize) -> ProcessContext<'_> {
        ProcessContext {
            sample_rate: 48000,
            sample_count,
            memory,
        }
    }

    fn read_ring(memory: &VecMemory, address: u64, len: usize) -> Vec<i32> {
        let mut ring = vec![0i32; len];
        assert!(memory.read(address, bytemuck::cast_slice_mut(&mut ring)));
        ring
    }

    #[test]
    fn test_ring_write_wraps() {
        let memory = VecMemory::new(0x1000, 0x1000);
        let mut info = AuxInfoDsp {
            write_offset: 3,
            ..Default::default()
        };
        let written = write_aux(&memory, &mut info, SEND_BUFFER, 4, &[1, 2, 3], 0, 3);
        assert_eq!(written, 3);
        assert_eq!(info.write_offset, 2);
        assert_eq!(info.remaining, 3);
        assert_eq!(read_ring(&memory, SEND_BUFFER, 4), [2, 3, 0, 1]);
    }

    #[test]
    fn test_ring_write_offsets_only_move_with_update_count() {
        let memory = VecMemory::new(0x1000, 0x1000);
        let mut info = AuxInfoDsp::default();
        write_aux(&memory, &mut info, SEND_BUFFER, 8, &[5, 5], 2, 0);
        assert_eq!(info.write_offset, 0);
        assert_eq!(info.remaining, 0);
        assert_eq!(read_ring(&memory, SEND_BUFFER, 8), [0, 0, 5, 5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ring_read_zero_fills() {
        let memory = VecMemory::new(0x1000, 0x1000);
        assert!(memory.write(RECV_BUFFER, bytemuck::cast_slice(&[9i32, 8])));
        let mut info = AuxInfoDsp::default();
        let mut out = [5i32; 4];
        // Ring of 2 wraps onto itself for a 4-sample read
        let read = read_aux(&memory, &mut info, RECV_BUFFER, 2, &mut out, 0, 4);
        assert_eq!(read, 4);
        assert_eq!(out, [9, 8, 9, 8]);
        assert_eq!(info.read_offset, 0);

        let mut out = [5i32; 4];
        let read = read_aux(&memory, &mut info, RECV_BUFFER, 0, &mut out, 0, 4);
        assert_eq!(read, 0);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_two_channels_share_one_ring() {
        let memory = VecMemory::new(0x1000, 0x1000);
        let mut pool = MixBufferPool::new(4, 4);
        pool.get_mut(0).unwrap().fill(1);
        pool.get_mut(1).unwrap().fill(2);

        let mut params = aux_params(8);
        params.count = 2;
        params.input[1] = 1;
        params.output[0] = 2;
        params.output[1] = 3;
        let mut effect = AuxEffect::default();
        effect.update(&params);
        effect.process(&mut pool, 0, true, &context(&memory, 4));

        assert_eq!(read_ring(&memory, SEND_BUFFER, 8), [1, 1, 1, 1, 2, 2, 2, 2]);
        // Nothing past the end of the ring
        assert_eq!(read_ring(&memory, SEND_BUFFER + 8 * 4, 4), [0; 4]);
        let send_info: AuxInfoDsp = read_pod(&memory, SEND_INFO).unwrap();
        assert_eq!(send_info.write_offset, 4);
        assert_eq!(send_info.remaining, 4);
    }

    #[test]
    fn test_two_channels_wrap_and_read_back() {
        let memory = VecMemory::new(0x1000, 0x1000);
        // Guest filled the return ring; channel 0 starts at 6, channel 1 at 2
        assert!(memory.write(RECV_BUFFER, bytemuck::cast_slice(&[10i32, 11, 12, 13, 14, 15, 16, 17])));
        write_pod(
            &memory,
            SEND_INFO,
            &AuxInfoDsp {
                write_offset: 6,
                ..Default::default()
            },
        );
        write_pod(
            &memory,
            RECV_INFO,
            &AuxInfoDsp {
                read_offset: 6,
                remaining: 8,
                ..Default::default()
            },
        );
        let mut pool = MixBufferPool::new(4, 4);
        pool.get_mut(0).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        pool.get_mut(1).unwrap().copy_from_slice(&[5, 6, 7, 8]);

        let mut params = aux_params(8);
        params.count = 2;
        params.input[1] = 1;
        params.output[0] = 2;
        params.output[1] = 3;
        let mut effect = AuxEffect::default();
        effect.update(&params);
        effect.process(&mut pool, 0, true, &context(&memory, 4));

        assert_eq!(read_ring(&memory, SEND_BUFFER, 8), [3, 4, 5, 6, 7, 8, 1, 2]);
        assert_eq!(pool.get(2).unwrap(), &[16, 17, 10, 11]);
        assert_eq!(pool.get(3).unwrap(), &[12, 13, 14, 15]);

        let send_info: AuxInfoDsp = read_pod(&memory, SEND_INFO).unwrap();
        assert_eq!(send_info.write_offset, 2);
        let recv_info: AuxInfoDsp = read_pod(&memory, RECV_INFO).unwrap();
        assert_eq!(recv_info.read_offset, 2);
        assert_eq!(recv_info.remaining, 4);
    }

    #[test]
    fn test_enabled_round_trip() {
        let memory = VecMemory::new(0x1000, 0x1000);
        assert!(memory.write(RECV_BUFFER, bytemuck::cast_slice(&[7i32, 7, 7, 7])));
        let mut pool = MixBufferPool::new(2, 4);
        pool.get_mut(0).unwrap().copy_from_slice(&[1, 2, 3, 4]);

        let mut effect = AuxEffect::default();
        effect.update(&aux_params(8));
        effect.process(&mut pool, 0, true, &context(&memory, 4));

        assert_eq!(pool.get(1).unwrap(), &[7, 7, 7, 7]);
        assert_eq!(read_ring(&memory, SEND_BUFFER, 4), [1, 2, 3, 4]);
        let send_info: AuxInfoDsp = read_pod(&memory, SEND_INFO).unwrap();
        assert_eq!(send_info.write_offset, 4);
        let recv_info: AuxInfoDsp = read_pod(&memory, RECV_INFO).unwrap();
        assert_eq!(recv_info.read_offset, 4);
    }

    #[test]
    fn test_disabled_copies_and_clears_info() {
        let memory = VecMemory::new(0x1000, 0x1000);
        write_pod(
            &memory,
            SEND_INFO,
            &AuxInfoDsp {
                write_offset: 5,
                ..Default::default()
            },
        );
        let mut pool = MixBufferPool::new(2, 3);
        pool.get_mut(0).unwrap().copy_from_slice(&[-4, 0, 4]);

        let mut effect = AuxEffect::default();
        effect.update(&aux_params(8));
        effect.process(&mut pool, 0, false, &context(&memory, 3));

        assert_eq!(pool.get(1).unwrap(), pool.get(0).unwrap());
        assert_eq!(read_pod::<AuxInfoDsp>(&memory, SEND_INFO), Some(AuxInfoDsp::default()));
    }
}
