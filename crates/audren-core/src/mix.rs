//! Mix records, the mix graph sort and mix-buffer packing

use crate::error::{RendererError, RendererResult};
use crate::protocol::MixInParams;
use crate::splitter::{tsort, EdgeMatrix, SplitterContext};
use crate::types::{FINAL_MIX, MAX_MIX_BUFFERS, NO_EFFECT_ORDER, NO_FINAL_MIX, NO_MIX, NO_SPLITTER};

/// Server-side record of one mix
#[derive(Debug, Clone, PartialEq)]
pub struct MixInfo {
    pub mix_id: i32,
    pub in_use: bool,
    pub dest_mix_id: i32,
    pub splitter_id: i32,
    pub sample_rate: u32,
    pub buffer_count: usize,
    /// First mix buffer owned by this mix, assigned after sorting
    pub buffer_offset: usize,
    pub volume: f32,
    pub mix_volume: [[f32; MAX_MIX_BUFFERS]; MAX_MIX_BUFFERS],
    pub node_id: u32,
    pub final_mix_distance: i32,
    pub effect_count: usize,
    /// Effect slot per processing position, `NO_EFFECT_ORDER` when empty
    pub effect_processing_order: Vec<i32>,
}

impl MixInfo {
    fn new(mix_id: i32, max_effects: usize) -> Self {
        Self {
            mix_id,
            in_use: false,
            dest_mix_id: NO_MIX,
            splitter_id: NO_SPLITTER,
            sample_rate: 0,
            buffer_count: 0,
            buffer_offset: 0,
            volume: 0.0,
            mix_volume: [[0.0; MAX_MIX_BUFFERS]; MAX_MIX_BUFFERS],
            node_id: 0,
            final_mix_distance: NO_FINAL_MIX,
            effect_count: 0,
            effect_processing_order: vec![NO_EFFECT_ORDER; max_effects],
        }
    }

    pub fn is_final(&self) -> bool {
        self.mix_id == FINAL_MIX
    }

    /// Copy one mix record; the mix keeps the id of its slot
    pub fn update(&mut self, params: &MixInParams) {
        self.in_use = params.in_use != 0;
        self.dest_mix_id = params.dest_mix_id;
        self.splitter_id = params.splitter_id;
        self.sample_rate = params.sample_rate;
        self.buffer_count = (params.buffer_count as usize).min(MAX_MIX_BUFFERS);
        self.volume = params.volume;
        self.mix_volume = params.mix_volume;
        self.node_id = params.node_id;
        self.effect_count = (params.effect_count as usize).min(self.effect_processing_order.len());
    }

    /// Buffer index range `[offset, offset + count)`
    pub fn buffers(&self) -> std::ops::Range<usize> {
        self.buffer_offset..self.buffer_offset + self.buffer_count
    }
}

#[derive(Debug, Clone)]
pub struct MixContext {
    infos: Vec<MixInfo>,
    sorted: Vec<usize>,
    edges: EdgeMatrix,
}

impl MixContext {
    /// `mix_count` mixes where index 0 is the final mix
    pub fn new(mix_count: usize, max_effects: usize) -> Self {
        Self {
            infos: (0..mix_count).map(|id| MixInfo::new(id as i32, max_effects)).collect(),
            sorted: Vec::with_capacity(mix_count),
            edges: EdgeMatrix::new(mix_count),
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, mix_id: i32) -> Option<&MixInfo> {
        usize::try_from(mix_id).ok().and_then(|id| self.infos.get(id))
    }

    pub fn info_mut(&mut self, mix_id: i32) -> Option<&mut MixInfo> {
        usize::try_from(mix_id).ok().and_then(|id| self.infos.get_mut(id))
    }

    pub fn final_mix(&self) -> Option<&MixInfo> {
        self.infos.first()
    }

    pub fn infos(&self) -> &[MixInfo] {
        &self.infos
    }

    /// Mix indices in processing order (sources first)
    pub fn sorted(&self) -> &[usize] {
        &self.sorted
    }

    pub fn edges(&self) -> &EdgeMatrix {
        &self.edges
    }

    /// Rebuild the outgoing edges of one mix
    ///
    /// A direct destination wins over a splitter; unused mixes have no edges.
    pub fn update_connection(&mut self, index: usize, splitters: &SplitterContext) {
        let Some(info) = self.infos.get(index) else {
            return;
        };
        self.edges.remove_edges(index);
        if !info.in_use {
            return;
        }
        if info.dest_mix_id != NO_MIX {
            if let Ok(dest) = usize::try_from(info.dest_mix_id) {
                self.edges.connect(index, dest);
            }
        } else if info.splitter_id != NO_SPLITTER {
            for destination in splitters.chain(info.splitter_id).filter(|d| d.is_configured()) {
                if let Ok(dest) = usize::try_from(destination.mix_id) {
                    self.edges.connect(index, dest);
                }
            }
        }
    }

    pub fn update_connections(&mut self, splitters: &SplitterContext) {
        for index in 0..self.infos.len() {
            self.update_connection(index, splitters);
        }
    }

    /// Distance of every mix to the final mix along `dest_mix_id`
    fn compute_distances(&mut self) {
        let count = self.infos.len();
        let distances: Vec<i32> = (0..count)
            .map(|start| {
                let mut current = start;
                for steps in 0..=count {
                    let info = &self.infos[current];
                    if !info.in_use {
                        return NO_FINAL_MIX;
                    }
                    if info.is_final() {
                        return steps as i32;
                    }
                    match usize::try_from(info.dest_mix_id).ok().filter(|&dest| dest < count) {
                        Some(dest) => current = dest,
                        None => return NO_FINAL_MIX,
                    }
                }
                NO_FINAL_MIX
            })
            .collect();
        for (info, distance) in self.infos.iter_mut().zip(distances) {
            info.final_mix_distance = distance;
        }
    }

    /// Sort by descending distance to the final mix
    pub fn sort_info(&mut self) {
        self.compute_distances();
        self.sorted.clear();
        self.sorted
            .extend((0..self.infos.len()).filter(|&i| self.infos[i].in_use));
        let infos = &self.infos;
        self.sorted
            .sort_by(|&a, &b| infos[b].final_mix_distance.cmp(&infos[a].final_mix_distance));
    }

    /// Topological sort over the edge matrix
    pub fn tsort_info(&mut self) -> RendererResult<()> {
        self.compute_distances();
        let order = tsort(&self.edges).ok_or(RendererError::SplitterSortFailed)?;
        self.sorted.clear();
        self.sorted
            .extend(order.into_iter().filter(|&i| self.infos[i].in_use));
        Ok(())
    }

    /// Pack the sorted mixes into consecutive mix buffers
    pub fn assign_buffer_offsets(&mut self, mix_buffer_count: usize) {
        let mut offset = 0;
        for &index in &self.sorted {
            let info = &mut self.infos[index];
            let available = mix_buffer_count - offset;
            if info.buffer_count > available {
                log::warn!(
                    "Mix {} wants {} buffers, only {} left",
                    info.mix_id,
                    info.buffer_count,
                    available
                );
                info.buffer_count = available;
            }
            info.buffer_offset = offset;
            offset += info.buffer_count;
        }
    }

    /// Refill every mix's effect order from `(effect_index, mix_id, order)`
    pub fn rebuild_effect_order(&mut self, effects: impl IntoIterator<Item = (usize, i32, i32)>) {
        for info in self.infos.iter_mut() {
            info.effect_processing_order.fill(NO_EFFECT_ORDER);
        }
        for (effect, mix_id, order) in effects {
            let Some(info) = self.info_mut(mix_id) else {
                continue;
            };
            match usize::try_from(order).ok().filter(|&order| order < info.effect_count) {
                Some(order) => info.effect_processing_order[order] = effect as i32,
                None => log::debug!("Effect {} order {} outside mix {}", effect, order, mix_id),
            }
        }
    }

    /// Trace the sorted mix graph
    pub fn log_graph(&self) {
        for &index in &self.sorted {
            let info = &self.infos[index];
            log::trace!(
                "mix {} buffers {:?} dest {} splitter {} distance {}",
                info.mix_id,
                info.buffers(),
                info.dest_mix_id,
                info.splitter_id,
                info.final_mix_distance
            );
        }
    }
}
