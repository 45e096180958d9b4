//! Splitters, the mix edge matrix and the topological sort
//!
//! A splitter fans a voice or mix out to several destination mixes. Each info
//! record owns a chain of destinations threaded through `next` handles into the
//! destination pool; chains are rebuilt from the id list that follows every
//! info record in an update.

use crate::behavior::BehaviorInfo;
use crate::error::{RendererError, RendererResult};
use crate::protocol::{
    align_up, SectionReader, SplitterDestinationInParams, SplitterHeader, SplitterInfoInParams,
    SPLITTER_DESTINATION_MAGIC, SPLITTER_HEADER_MAGIC, SPLITTER_INFO_MAGIC,
};
use crate::types::{MAX_MIX_BUFFERS, NO_MIX};

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitterDestination {
    pub id: i32,
    pub mix_id: i32,
    pub mix_volumes: [f32; MAX_MIX_BUFFERS],
    pub last_mix_volumes: [f32; MAX_MIX_BUFFERS],
    pub in_use: bool,
    /// Touched by a voice this frame; last volumes catch up afterwards
    pub needs_update: bool,
    latched: bool,
    /// Next destination in the owning info's chain
    pub next: Option<usize>,
}

impl Default for SplitterDestination {
    fn default() -> Self {
        Self {
            id: 0,
            mix_id: NO_MIX,
            mix_volumes: [0.0; MAX_MIX_BUFFERS],
            last_mix_volumes: [0.0; MAX_MIX_BUFFERS],
            in_use: false,
            needs_update: false,
            latched: false,
            next: None,
        }
    }
}

impl SplitterDestination {
    fn update(&mut self, params: &SplitterDestinationInParams) {
        self.id = params.id;
        self.mix_id = params.mix_id;
        self.in_use = params.in_use != 0;
        self.mix_volumes = params.mix_volumes;
        if !self.in_use {
            // A reused destination starts from its new volumes
            self.latched = false;
            self.needs_update = false;
            return;
        }
        if !self.latched {
            self.last_mix_volumes = self.mix_volumes;
            self.latched = true;
        }
    }

    /// Whether the destination routes anywhere
    pub fn is_configured(&self) -> bool {
        self.in_use && self.mix_id != NO_MIX
    }

    pub fn commit_mix_volumes(&mut self) {
        self.last_mix_volumes = self.mix_volumes;
        self.needs_update = false;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitterInfo {
    pub id: i32,
    pub sample_rate: u32,
    /// Number of destinations in the chain
    pub length: usize,
    pub head: Option<usize>,
    pub new_connection: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SplitterContext {
    infos: Vec<SplitterInfo>,
    destinations: Vec<SplitterDestination>,
}

impl SplitterContext {
    pub fn new(info_count: usize, destination_count: usize) -> Self {
        Self {
            infos: vec![SplitterInfo::default(); info_count],
            destinations: vec![SplitterDestination::default(); destination_count],
        }
    }

    pub fn info_count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, id: i32) -> Option<&SplitterInfo> {
        usize::try_from(id).ok().and_then(|id| self.infos.get(id))
    }

    pub fn destination(&self, index: usize) -> Option<&SplitterDestination> {
        self.destinations.get(index)
    }

    /// Pool index of the `n`th destination in an info's chain
    pub fn destination_index(&self, info_id: i32, n: usize) -> Option<usize> {
        let info = self.info(info_id)?;
        if n >= info.length {
            return None;
        }
        let mut cursor = info.head;
        for _ in 0..n {
            cursor = self.destinations.get(cursor?)?.next;
        }
        cursor
    }

    /// Destinations of an info, in chain order
    pub fn chain(&self, info_id: i32) -> impl Iterator<Item = &SplitterDestination> + '_ {
        let length = self.info(info_id).map_or(0, |info| info.length);
        let mut cursor = self.info(info_id).and_then(|info| info.head);
        std::iter::from_fn(move || {
            let destination = self.destinations.get(cursor?)?;
            cursor = destination.next;
            Some(destination)
        })
        .take(length)
    }

    pub fn mark_dirty(&mut self, index: usize) {
        if let Some(destination) = self.destinations.get_mut(index) {
            destination.needs_update = true;
        }
    }

    /// Copy current to last volumes on every destination touched this frame
    pub fn update_internal_state(&mut self) {
        for destination in self.destinations.iter_mut().filter(|d| d.needs_update) {
            destination.commit_mix_volumes();
        }
    }

    pub fn clear_new_connections(&mut self) {
        for info in self.infos.iter_mut() {
            info.new_connection = false;
        }
    }

    /// Parse the splitter section
    ///
    /// `reader` sits at the start of the section and `size` is its declared
    /// length. Info and destination records may be interleaved; each is
    /// recognized by its magic.
    pub fn update(
        &mut self,
        reader: &mut SectionReader<'_>,
        size: usize,
        behavior: &BehaviorInfo,
    ) -> RendererResult<()> {
        let start = reader.offset();
        let header: SplitterHeader = reader.read()?;
        if header.magic != SPLITTER_HEADER_MAGIC {
            return Err(RendererError::invalid(format!(
                "bad splitter header magic {:#010x}",
                header.magic
            )));
        }

        let legacy_limit = if behavior.is_splitter_bug_fixed() || header.info_count == 0 {
            None
        } else {
            Some((header.data_count / header.info_count) as usize)
        };

        for _ in 0..header.info_count + header.data_count {
            let record_start = reader.offset();
            let magic: u32 = reader.read()?;
            reader.seek(record_start)?;
            match magic {
                SPLITTER_INFO_MAGIC => {
                    let params: SplitterInfoInParams = reader.read()?;
                    let mut ids = Vec::with_capacity((params.length as usize).min(self.destinations.len()));
                    for _ in 0..params.length {
                        ids.push(reader.read::<i32>()?);
                    }
                    self.update_info(&params, &ids, legacy_limit);
                }
                SPLITTER_DESTINATION_MAGIC => {
                    let params: SplitterDestinationInParams = reader.read()?;
                    match usize::try_from(params.id).ok().and_then(|id| self.destinations.get_mut(id)) {
                        Some(destination) => destination.update(&params),
                        None => log::warn!("Splitter destination id {} out of range", params.id),
                    }
                }
                other => {
                    return Err(RendererError::invalid(format!(
                        "bad splitter record magic {:#010x}",
                        other
                    )))
                }
            }
        }

        let consumed = align_up(reader.offset() - start, 16);
        if consumed != size {
            return Err(RendererError::invalid(format!(
                "splitter section used {:#x} bytes of {:#x}",
                consumed, size
            )));
        }
        reader.seek(start + consumed)
    }

    fn update_info(&mut self, params: &SplitterInfoInParams, ids: &[i32], legacy_limit: Option<usize>) {
        let Some(index) = usize::try_from(params.id).ok().filter(|&id| id < self.infos.len()) else {
            log::warn!("Splitter info id {} out of range", params.id);
            return;
        };

        let mut length = ids.len();
        if let Some(limit) = legacy_limit {
            if length > limit {
                log::debug!("Splitter {}: legacy mode truncates {} destinations to {}", params.id, length, limit);
                length = limit;
            }
        }

        let chain: Vec<usize> = ids[..length]
            .iter()
            .filter_map(|&id| usize::try_from(id).ok().filter(|&id| id < self.destinations.len()))
            .collect();
        for pair in chain.windows(2) {
            self.destinations[pair[0]].next = Some(pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.destinations[last].next = None;
        }

        let info = &mut self.infos[index];
        info.id = params.id;
        info.sample_rate = params.sample_rate;
        info.length = chain.len();
        info.head = chain.first().copied();
        info.new_connection = true;
    }

    /// Trace every splitter chain
    pub fn log_graph(&self) {
        for (index, info) in self.infos.iter().enumerate().filter(|(_, info)| info.length > 0) {
            let targets: Vec<i32> = self.chain(index as i32).map(|d| d.mix_id).collect();
            log::trace!("splitter {} -> mixes {:?}", index, targets);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge matrix and topological sort
// ─────────────────────────────────────────────────────────────────────────────

/// Dense `node_count × node_count` adjacency stored as a bitset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeMatrix {
    node_count: usize,
    bits: Vec<u64>,
}

impl EdgeMatrix {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            bits: vec![0; (node_count * node_count).div_ceil(64)],
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    fn bit(&self, from: usize, to: usize) -> Option<(usize, u64)> {
        (from < self.node_count && to < self.node_count).then(|| {
            let index = from * self.node_count + to;
            (index / 64, 1u64 << (index % 64))
        })
    }

    pub fn connect(&mut self, from: usize, to: usize) {
        if let Some((word, mask)) = self.bit(from, to) {
            self.bits[word] |= mask;
        }
    }

    pub fn disconnect(&mut self, from: usize, to: usize) {
        if let Some((word, mask)) = self.bit(from, to) {
            self.bits[word] &= !mask;
        }
    }

    pub fn connected(&self, from: usize, to: usize) -> bool {
        self.bit(from, to)
            .is_some_and(|(word, mask)| self.bits[word] & mask != 0)
    }

    /// Drop every outgoing edge of `from`
    pub fn remove_edges(&mut self, from: usize) {
        for to in 0..self.node_count {
            self.disconnect(from, to);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    NoState,
    InFound,
    InCompleted,
}

/// Depth-first topological sort
///
/// Returns nodes with every source before its destinations, or `None` when a
/// cycle is found.
pub fn tsort(edges: &EdgeMatrix) -> Option<Vec<usize>> {
    let count = edges.node_count();
    let mut states = vec![NodeState::NoState; count];
    let mut completed = Vec::with_capacity(count);
    let mut stack: Vec<(usize, usize)> = Vec::with_capacity(count);

    for root in 0..count {
        if states[root] != NodeState::NoState {
            continue;
        }
        states[root] = NodeState::InFound;
        stack.push((root, 0));

        while let Some(&(node, cursor)) = stack.last() {
            let next = (cursor..count).find(|&to| edges.connected(node, to));
            match next {
                Some(to) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 = to + 1;
                    }
                    match states[to] {
                        NodeState::NoState => {
                            states[to] = NodeState::InFound;
                            stack.push((to, 0));
                        }
                        NodeState::InFound => return None,
                        NodeState::InCompleted => {}
                    }
                }
                None => {
                    states[node] = NodeState::InCompleted;
                    completed.push(node);
                    stack.pop();
                }
            }
        }
    }

    completed.reverse();
    Some(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SplitterSection;
    use crate::protocol::HEADER_SIZE;

    fn parse(section: &SplitterSection, revision: u32, context: &mut SplitterContext) -> RendererResult<()> {
        let mut request = crate::protocol::UpdateRequest::new(&crate::config::RendererParams::default());
        request.splitter = Some(section.clone());
        let blob = request.encode();
        let header: crate::protocol::UpdateDataHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_SIZE]);
        let sizes = header.sizes;
        let offset = HEADER_SIZE
            + (sizes.behavior + sizes.memory_pool + sizes.voice_channel_resource + sizes.voice + sizes.effect)
                as usize;
        let mut reader = SectionReader::new(&blob, offset);
        context.update(&mut reader, sizes.splitter as usize, &BehaviorInfo::new(revision))
    }

    #[test]
    fn test_chain_is_built_from_ids() {
        let mut section = SplitterSection::default();
        section.add_info(0, 48000, &[2, 0, 1]);
        section.add_destination(0, 3, &[1.0]);
        section.add_destination(1, 4, &[1.0]);
        section.add_destination(2, 5, &[0.5]);

        let mut context = SplitterContext::new(2, 4);
        parse(&section, 9, &mut context).unwrap();

        let mixes: Vec<i32> = context.chain(0).map(|d| d.mix_id).collect();
        assert_eq!(mixes, vec![5, 3, 4]);
        assert_eq!(context.destination_index(0, 0), Some(2));
        assert_eq!(context.destination_index(0, 2), Some(1));
        assert_eq!(context.destination_index(0, 3), None);
        assert!(context.info(0).unwrap().new_connection);
    }

    #[test]
    fn test_legacy_mode_truncates_chain() {
        let mut section = SplitterSection::default();
        section.add_info(0, 48000, &[0, 1, 2]);
        section.add_info(1, 48000, &[3]);
        for id in 0..4 {
            section.add_destination(id, 1, &[1.0]);
        }

        let mut legacy = SplitterContext::new(2, 4);
        parse(&section, 4, &mut legacy).unwrap();
        // 4 destinations over 2 infos: at most 2 per chain
        assert_eq!(legacy.info(0).unwrap().length, 2);
        assert_eq!(legacy.info(1).unwrap().length, 1);

        let mut fixed = SplitterContext::new(2, 4);
        parse(&section, 5, &mut fixed).unwrap();
        assert_eq!(fixed.info(0).unwrap().length, 3);
    }

    #[test]
    fn test_first_use_latches_volumes() {
        let mut section = SplitterSection::default();
        section.add_destination(0, 1, &[0.25, 0.75]);
        let mut context = SplitterContext::new(1, 1);
        parse(&section, 9, &mut context).unwrap();
        let destination = context.destination(0).unwrap();
        assert_eq!(destination.last_mix_volumes[1], 0.75);

        let mut section = SplitterSection::default();
        section.add_destination(0, 1, &[1.0, 1.0]);
        parse(&section, 9, &mut context).unwrap();
        assert_eq!(context.destination(0).unwrap().last_mix_volumes[1], 0.75);

        context.mark_dirty(0);
        context.update_internal_state();
        let destination = context.destination(0).unwrap();
        assert_eq!(destination.last_mix_volumes[1], 1.0);
        assert!(!destination.needs_update);
    }

    #[test]
    fn test_released_destination_latches_again() {
        let mut section = SplitterSection::default();
        section.add_destination(0, 1, &[0.25]);
        let mut context = SplitterContext::new(1, 1);
        parse(&section, 9, &mut context).unwrap();

        section.destinations[0].in_use = 0;
        parse(&section, 9, &mut context).unwrap();
        assert!(!context.destination(0).unwrap().is_configured());

        // Reused with a new volume: no ramp from the old one
        let mut section = SplitterSection::default();
        section.add_destination(0, 2, &[0.5]);
        parse(&section, 9, &mut context).unwrap();
        let destination = context.destination(0).unwrap();
        assert_eq!(destination.last_mix_volumes[0], 0.5);
        assert_eq!(destination.mix_volumes[0], 0.5);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut section = SplitterSection::default();
        section.add_destination(0, 1, &[1.0]);
        section.destinations[0].magic = 0;
        let mut context = SplitterContext::new(1, 1);
        assert!(parse(&section, 9, &mut context).is_err());
    }

    #[test]
    fn test_tsort_orders_sources_first() {
        let mut edges = EdgeMatrix::new(4);
        edges.connect(3, 1);
        edges.connect(1, 0);
        edges.connect(2, 0);
        edges.connect(3, 2);

        let order = tsort(&edges).unwrap();
        let position = |node| order.iter().position(|&n| n == node).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), 0);
        for from in 0..4 {
            for to in 0..4 {
                if edges.connected(from, to) {
                    assert!(position(from) < position(to));
                }
            }
        }
    }

    #[test]
    fn test_tsort_detects_cycle() {
        let mut edges = EdgeMatrix::new(3);
        edges.connect(1, 2);
        edges.connect(2, 1);
        assert_eq!(tsort(&edges), None);

        edges.remove_edges(2);
        assert!(tsort(&edges).is_some());
    }

    #[test]
    fn test_edge_matrix_bounds() {
        let mut edges = EdgeMatrix::new(9);
        edges.connect(8, 7);
        edges.connect(9, 0);
        assert!(edges.connected(8, 7));
        assert!(!edges.connected(7, 8));
        assert!(!edges.connected(9, 0));
    }
}
