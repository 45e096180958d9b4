//! Request builder and response decoder
//!
//! Clients describe a whole update as typed records and call
//! [`UpdateRequest::encode`]; the renderer's answer is read back with
//! [`UpdateResponse::decode`].

use bytemuck::Pod;

use super::layout::*;
use super::{align_up, SectionReader, HEADER_SIZE};
use crate::behavior::{revision_magic, BehaviorInfo};
use crate::config::RendererParams;
use crate::error::RendererResult;

/// Splitter section contents
#[derive(Debug, Clone, Default)]
pub struct SplitterSection {
    /// Info records, each with its destination id list
    pub infos: Vec<(SplitterInfoInParams, Vec<i32>)>,
    pub destinations: Vec<SplitterDestinationInParams>,
}

impl SplitterSection {
    /// Add an info record routing to the given destination ids
    pub fn add_info(&mut self, id: i32, sample_rate: u32, destination_ids: &[i32]) {
        let info = SplitterInfoInParams {
            magic: SPLITTER_INFO_MAGIC,
            id,
            sample_rate,
            length: destination_ids.len() as u32,
            node_id: id as u32,
        };
        self.infos.push((info, destination_ids.to_vec()));
    }

    /// Add a destination record sending to `mix_id` with the given volumes
    pub fn add_destination(&mut self, id: i32, mix_id: i32, volumes: &[f32]) {
        let mut destination = SplitterDestinationInParams {
            magic: SPLITTER_DESTINATION_MAGIC,
            id,
            mix_id,
            in_use: 1,
            ..Default::default()
        };
        for (slot, &volume) in destination.mix_volumes.iter_mut().zip(volumes) {
            *slot = volume;
        }
        self.destinations.push(destination);
    }

    fn encode(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        let header = SplitterHeader {
            magic: SPLITTER_HEADER_MAGIC,
            info_count: self.infos.len() as u32,
            data_count: self.destinations.len() as u32,
            ..Default::default()
        };
        out.extend_from_slice(bytemuck::bytes_of(&header));
        for (info, ids) in &self.infos {
            out.extend_from_slice(bytemuck::bytes_of(info));
            out.extend_from_slice(bytemuck::cast_slice(ids));
        }
        out.extend_from_slice(bytemuck::cast_slice(&self.destinations));
        let aligned = align_up(out.len() - start, 16);
        out.resize(start + aligned, 0);
        aligned
    }
}

/// Mix section in full or dirty-only form
#[derive(Debug, Clone)]
pub enum MixSection {
    /// One record per mix, indexed by position
    Full(Vec<MixInParams>),
    /// Only the listed mixes, each addressed by its `mix_id`
    Dirty(Vec<MixInParams>),
}

/// A complete update request
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Revision digit written as 'REV?'
    pub revision: u32,
    pub behavior_flags: u64,
    pub memory_pools: Vec<MemoryPoolInParams>,
    pub voice_channel_resources: Vec<VoiceChannelResourceInParams>,
    pub voices: Vec<VoiceInParams>,
    pub effects: Vec<EffectInParams>,
    pub splitter: Option<SplitterSection>,
    pub mixes: MixSection,
    pub sinks: Vec<SinkInParams>,
}

fn push_records<T: Pod>(out: &mut Vec<u8>, records: &[T]) -> u32 {
    let bytes: &[u8] = bytemuck::cast_slice(records);
    out.extend_from_slice(bytes);
    bytes.len() as u32
}

impl UpdateRequest {
    /// A request sized for `params` with every slot unused
    pub fn new(params: &RendererParams) -> Self {
        let voice_count = params.voice_count as usize;
        let mixes = (0..params.mix_count() as i32)
            .map(|mix_id| MixInParams {
                mix_id,
                ..Default::default()
            })
            .collect();
        Self {
            revision: params.revision,
            behavior_flags: 0,
            memory_pools: vec![MemoryPoolInParams::default(); params.memory_pool_count() as usize],
            voice_channel_resources: (0..voice_count)
                .map(|id| VoiceChannelResourceInParams {
                    id: id as u32,
                    ..Default::default()
                })
                .collect(),
            voices: (0..voice_count)
                .map(|id| VoiceInParams {
                    id: id as u32,
                    ..Default::default()
                })
                .collect(),
            effects: vec![EffectInParams::default(); params.effect_count as usize],
            splitter: None,
            mixes: if BehaviorInfo::new(params.revision).is_mix_in_parameter_dirty_only_update_supported() {
                MixSection::Dirty(mixes)
            } else {
                MixSection::Full(mixes)
            },
            sinks: vec![SinkInParams::default(); params.sink_count as usize],
        }
    }

    /// Mutable access to the full mix list (converts a dirty section back)
    pub fn mixes_mut(&mut self) -> &mut Vec<MixInParams> {
        match &mut self.mixes {
            MixSection::Full(mixes) | MixSection::Dirty(mixes) => mixes,
        }
    }

    /// Serialize into a request blob
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let mut sizes = SectionSizes::default();

        let behavior = BehaviorInParams {
            revision: revision_magic(self.revision),
            padding: 0,
            flags: self.behavior_flags,
        };
        sizes.behavior = push_records(&mut body, std::slice::from_ref(&behavior));
        sizes.memory_pool = push_records(&mut body, &self.memory_pools);
        sizes.voice_channel_resource = push_records(&mut body, &self.voice_channel_resources);
        sizes.voice = push_records(&mut body, &self.voices);
        sizes.effect = push_records(&mut body, &self.effects);
        if let Some(splitter) = &self.splitter {
            sizes.splitter = splitter.encode(&mut body) as u32;
        }
        sizes.mixer = match &self.mixes {
            MixSection::Full(mixes) => push_records(&mut body, mixes),
            MixSection::Dirty(mixes) => {
                let header = MixDirtyHeader {
                    mix_count: mixes.len() as u32,
                    ..Default::default()
                };
                push_records(&mut body, std::slice::from_ref(&header)) + push_records(&mut body, mixes)
            }
        };
        sizes.sink = push_records(&mut body, &self.sinks);

        let header = UpdateDataHeader {
            revision: revision_magic(self.revision),
            sizes,
            padding: [0; 4],
            total_size: (HEADER_SIZE + body.len()) as u32,
        };

        let mut blob = Vec::with_capacity(HEADER_SIZE + body.len());
        blob.extend_from_slice(bytemuck::bytes_of(&header));
        blob.extend_from_slice(&body);
        blob
    }
}

/// Decoded response blob
#[derive(Debug, Clone, Default)]
pub struct UpdateResponse {
    pub header: UpdateDataHeader,
    pub memory_pools: Vec<MemoryPoolOutParams>,
    pub voices: Vec<VoiceOutParams>,
    pub effects: Vec<EffectOutParams>,
    pub sinks: Vec<SinkOutParams>,
    pub performance: PerformanceOutParams,
    pub errors: ErrorInfoOutParams,
    pub renderer_info: Option<RendererInfoOutParams>,
}

fn read_records<T: Pod>(reader: &mut SectionReader<'_>, size: u32) -> RendererResult<Vec<T>> {
    let count = size as usize / std::mem::size_of::<T>();
    (0..count).map(|_| reader.read::<T>()).collect()
}

impl UpdateResponse {
    pub fn decode(bytes: &[u8]) -> RendererResult<Self> {
        let mut reader = SectionReader::new(bytes, 0);
        let header: UpdateDataHeader = reader.read()?;
        let sizes = header.sizes;

        let memory_pools = read_records(&mut reader, sizes.memory_pool)?;
        let voices = read_records(&mut reader, sizes.voice)?;
        let effects = read_records(&mut reader, sizes.effect)?;
        let sinks = read_records(&mut reader, sizes.sink)?;
        let performance = if sizes.performance > 0 {
            reader.read()?
        } else {
            PerformanceOutParams::default()
        };
        let errors = if sizes.behavior > 0 {
            reader.read()?
        } else {
            ErrorInfoOutParams::default()
        };
        let renderer_info = if sizes.render_info > 0 {
            Some(reader.read()?)
        } else {
            None
        };

        Ok(Self {
            header,
            memory_pools,
            voices,
            effects,
            sinks,
            performance,
            errors,
            renderer_info,
        })
    }

    /// Result codes of the reported behavior errors
    pub fn error_codes(&self) -> Vec<u32> {
        let count = (self.errors.error_count as usize).min(self.errors.errors.len());
        self.errors.errors[..count].iter().map(|e| e.result_code).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_section_sizes() {
        let params = RendererParams::default();
        let request = UpdateRequest::new(&params);
        let blob = request.encode();

        let header: UpdateDataHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_SIZE]);
        assert_eq!(header.total_size as usize, blob.len());
        assert_eq!(header.sizes.behavior, 0x10);
        assert_eq!(header.sizes.voice, params.voice_count * 0x170);
        assert_eq!(header.sizes.voice_channel_resource, params.voice_count * 0x70);
        assert_eq!(header.sizes.mixer, 0x20 + params.mix_count() * 0x930);
        assert_eq!(header.sizes.splitter, 0);
        assert_eq!(&header.revision.to_le_bytes(), b"REV9");
    }

    #[test]
    fn test_splitter_section_is_aligned() {
        let mut splitter = SplitterSection::default();
        splitter.add_info(0, 48000, &[0]);
        splitter.add_destination(0, 1, &[1.0]);

        let mut out = Vec::new();
        let size = splitter.encode(&mut out);
        // 0x20 header + 0x14 info + 4 id + 0x70 destination = 0xA8, aligned to 0xB0
        assert_eq!(size, 0xB0);
        assert_eq!(out.len(), 0xB0);
    }

    #[test]
    fn test_dirty_mix_section_has_header() {
        let params = RendererParams::default().with_revision(7);
        let mut request = UpdateRequest::new(&params);
        request.mixes = MixSection::Dirty(vec![MixInParams::default()]);
        let blob = request.encode();
        let header: UpdateDataHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_SIZE]);
        assert_eq!(header.sizes.mixer, 0x20 + 0x930);
    }
}
