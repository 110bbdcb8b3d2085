//! Watershed partitioning of a [`CompactHeightfield`] into regions.

use std::cmp::Reverse;

use thiserror::Error;
use tracing::{debug_span, warn};

use crate::{AreaType, CompactHeightfield, region::RegionId};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;

impl CompactHeightfield {
    /// Partitions the walkable spans into regions using the watershed algorithm.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// If a connected group of regions is smaller than `min_region_area` spans and does not touch the
    /// tile border, its spans are reassigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal corridors.
    /// Regions of at most `merge_region_area` spans are merged into their neighbors where possible.
    ///
    /// The region data will be available via [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region).
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before building regions.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u32,
        merge_region_area: u32,
    ) -> Result<(), RegionError> {
        let _span = debug_span!("build_regions").entered();
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id: u16 = 1;
        let mut level = (self.max_distance + 1) & !1;

        // expand_iters defines how much the watershed "overflows" and simplifies the regions.
        let expand_iters = 8;

        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_height = border_size.min(self.height);
            let rects = [
                (0, border_width, 0, self.height),
                (self.width - border_width, self.width, 0, self.height),
                (0, self.width, 0, border_height),
                (0, self.width, self.height - border_height, self.height),
            ];
            for (min_x, max_x, min_z, max_z) in rects {
                self.paint_rect_region(
                    min_x,
                    max_x,
                    min_z,
                    max_z,
                    RegionId::from(region_id) | RegionId::BORDER_REGION,
                    &mut src_reg,
                );
                region_id += 1;
            }
        }
        self.border_size = border_size;

        let mut s_id = -1_i32;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS as i32 - 1);
            let s = s_id as usize;

            if s == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(s);
                append_stacks(&src[s - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[s].len() {
                let entry = level_stacks[s][j].clone();
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    entry.x,
                    entry.z,
                    i,
                    level,
                    RegionId::from(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= RegionError::MAX_REGIONS {
                        return Err(RegionError::TooManyRegions {
                            max: RegionError::MAX_REGIONS,
                        });
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let border_regions = if border_size > 0 { 4 } else { 0 };
        let (max_region, overlaps) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            border_regions,
            region_id,
            &mut src_reg,
        );
        self.max_region = max_region;

        // If overlapping regions were found, the contours built from them may be broken.
        if !overlaps.is_empty() {
            warn!(
                "Found {} overlapping regions, the resulting contours may be broken",
                overlaps.len()
            );
        }

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = (start_level >> log_levels_per_stack) as i32;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = (self.dist[i] >> log_levels_per_stack) as i32;
                    let s_id = (start_level - level).max(0) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut r = src_reg[i];
                let mut d2 = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some((_, _, a_index)) =
                        self.neighbor(entry.x as i32, entry.z as i32, i, dir)
                    else {
                        continue;
                    };
                    if self.areas[a_index] != area {
                        continue;
                    }
                    let a_region = src_reg[a_index];
                    let a_dist = src_dist[a_index].saturating_add(2);
                    if a_region != RegionId::NONE && !a_region.is_border() && a_dist < d2 {
                        r = a_region;
                        d2 = a_dist;
                    }
                }
                if r != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region: r,
                        distance2: d2,
                    });
                } else {
                    failed += 1;
                }
            }

            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance2;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Grows a new region from the span at `i`. Returns `false` if the region ended up empty.
    fn flood_region(
        &self,
        x: u16,
        z: u16,
        i: usize,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let area = self.areas[i];

        // Flood fill mark region.
        stack.clear();
        stack.push(LevelStackEntry { x, z, index: Some(i) });
        src_reg[i] = region;
        src_dist[i] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(back) = stack.pop() {
            let Some(ci) = back.index else {
                continue;
            };
            let (cx, cz) = (back.x as i32, back.z as i32);

            // Check if any of the neighbours already have a valid region set.
            let mut ar = RegionId::NONE;
            for dir in 0..4 {
                // 8 connected
                let Some((a_x, a_z, a_index)) = self.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                if self.areas[a_index] != area {
                    continue;
                }
                let nr = src_reg[a_index];
                // Do not take borders into account.
                if nr.is_border() {
                    continue;
                }
                if nr != RegionId::NONE && nr != region {
                    ar = nr;
                    break;
                }

                let dir2 = (dir + 1) & 0x3;
                if let Some((_, _, a2_index)) = self.neighbor(a_x, a_z, a_index, dir2) {
                    if self.areas[a2_index] != area {
                        continue;
                    }
                    let nr2 = src_reg[a2_index];
                    if nr2 != RegionId::NONE && nr2 != region {
                        ar = nr2;
                        break;
                    }
                }
            }
            if ar != RegionId::NONE {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some((a_x, a_z, a_index)) = self.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                if self.areas[a_index] != area {
                    continue;
                }
                if self.dist[a_index] >= lev && src_reg[a_index] == RegionId::NONE {
                    src_reg[a_index] = region;
                    src_dist[a_index] = 0;
                    stack.push(LevelStackEntry {
                        x: a_x as u16,
                        z: a_z as u16,
                        index: Some(a_index),
                    });
                }
            }
        }

        count > 0
    }

    /// Whether the edge of span `i` in `dir` separates it from a span of another region.
    fn is_solid_edge(&self, src_reg: &[RegionId], x: i32, z: i32, i: usize, dir: u8) -> bool {
        let r = self
            .neighbor(x, z, i, dir)
            .map_or(RegionId::NONE, |(_, _, a_index)| src_reg[a_index]);
        r != src_reg[i]
    }

    /// Walks the outline of the region containing span `i`, collecting the neighboring regions in order.
    fn walk_region_contour(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
    ) -> Vec<RegionId> {
        let start_dir = dir;
        let start_i = i;

        let mut cur_reg = self
            .neighbor(x, z, i, dir)
            .map_or(RegionId::NONE, |(_, _, a_index)| src_reg[a_index]);
        let mut contour = vec![cur_reg];

        for _ in 0..40_000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let r = self
                    .neighbor(x, z, i, dir)
                    .map_or(RegionId::NONE, |(_, _, a_index)| src_reg[a_index]);
                if r != cur_reg {
                    cur_reg = r;
                    contour.push(cur_reg);
                }
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor(x, z, i, dir) else {
                    // A non-solid edge always has a neighbor.
                    return contour;
                };
                x = n_x;
                z = n_z;
                i = n_i;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        let mut j = 0;
        while contour.len() > 1 && j < contour.len() {
            let nj = (j + 1) % contour.len();
            if contour[j] == contour[nj] {
                contour.remove(j);
            } else {
                j += 1;
            }
        }
        contour
    }

    fn merge_and_filter_regions(
        &self,
        min_region_area: u32,
        merge_region_area: u32,
        border_regions: u16,
        region_count: u16,
        src_reg: &mut [RegionId],
    ) -> (RegionId, Vec<RegionId>) {
        let nreg = region_count as usize;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| {
                let id = RegionId::from(i);
                if (1..=border_regions).contains(&i) {
                    Region::new(id | RegionId::BORDER_REGION)
                } else {
                    Region::new(id)
                }
            })
            .collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    let r = src_reg[i];
                    if r == RegionId::NONE || r.index() >= nreg {
                        continue;
                    }

                    let reg = &mut regions[r.index()];
                    reg.span_count += 1;

                    // Update floors.
                    for j in self.cell_at(x as u16, z as u16).index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE || floor_id.index() >= nreg {
                            continue;
                        }
                        if floor_id == r {
                            reg.overlap = true;
                        }
                        add_unique(&mut reg.floors, floor_id);
                    }

                    // Count the span faces shared with other regions.
                    for dir in 0..4 {
                        let Some((_, _, a_index)) = self.neighbor(x, z, i, dir) else {
                            continue;
                        };
                        let neighbor_region = src_reg[a_index];
                        if neighbor_region != r && neighbor_region.is_walkable_region() {
                            reg.add_shared_border(neighbor_region, 1);
                        }
                    }

                    // Have found contour
                    if !reg.connections.is_empty() {
                        continue;
                    }

                    reg.area_type = self.areas[i];

                    // Check if this cell is next to a border.
                    let edge_dir =
                        (0..4).find(|&dir| self.is_solid_edge(src_reg, x, z, i, dir));
                    if let Some(dir) = edge_dir {
                        // The cell is at border.
                        // Walk around the contour to find all the neighbours.
                        let connections = self.walk_region_contour(x, z, i, dir, src_reg);
                        regions[r.index()].connections = connections;
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == RegionId::NONE || reg.id.is_border() || reg.span_count == 0 || reg.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                let creg = &regions[ri];
                span_count += creg.span_count;
                trace.push(ri);

                let connections = creg.connections.clone();
                for connection in connections {
                    if connection.is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor_index = connection.index();
                    if neighbor_index >= nreg {
                        continue;
                    }
                    let neighbor = &mut regions[neighbor_index];
                    if neighbor.visited {
                        continue;
                    }
                    if neighbor.id == RegionId::NONE || neighbor.id.is_border() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbor_index);
                    neighbor.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area as usize && !connects_to_border {
                // Kill all visited regions.
                for &t in &trace {
                    regions[t].span_count = 0;
                    regions[t].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..nreg {
                let reg = &regions[i];
                if reg.id == RegionId::NONE || reg.id.is_border() || reg.overlap || reg.span_count == 0
                {
                    continue;
                }

                // Check to see if the region should be merged.
                if reg.span_count > merge_region_area as usize && reg.is_connected_to_border() {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find the neighbour with the longest shared border, preferring smaller and older regions on ties.
                let mut best: Option<(u32, usize, u16)> = None;
                let mut merge_id = reg.id;
                for connection in &reg.connections {
                    if connection.is_border() || connection.index() >= nreg {
                        continue;
                    }
                    let mreg = &regions[connection.index()];
                    if mreg.id == RegionId::NONE || mreg.id.is_border() || mreg.overlap {
                        continue;
                    }
                    if !reg.can_merge_with(mreg) || !mreg.can_merge_with(reg) {
                        continue;
                    }
                    let shared = reg.shared_border_with(mreg.id);
                    let better = match best {
                        None => true,
                        Some((best_shared, best_count, best_id)) => {
                            let candidate =
                                (shared, Reverse(mreg.span_count), Reverse(mreg.id.bits()));
                            candidate > (best_shared, Reverse(best_count), Reverse(best_id))
                        }
                    };
                    if better {
                        best = Some((shared, mreg.span_count, mreg.id.bits()));
                        merge_id = mreg.id;
                    }
                }

                // Found new id.
                if merge_id != reg.id {
                    let old_id = reg.id;
                    let target = merge_id.index();
                    let (reg, target_reg) = pair_mut(&mut regions, i, target);
                    // Merge neighbours.
                    if target_reg.merge(reg) {
                        // Fixup regions pointing to current region.
                        for region in &mut regions {
                            if region.id == RegionId::NONE || region.id.is_border() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if region.id == old_id {
                                region.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            region.replace_neighbour(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region ids. Only regions still owning spans get one, merged slots follow their target.
        let mut compact_ids = vec![RegionId::NONE; nreg];
        let mut reg_id_gen: u16 = 0;
        for reg in &regions {
            if reg.span_count == 0 || !reg.id.is_walkable_region() {
                continue;
            }
            let slot = &mut compact_ids[reg.id.index()];
            if *slot == RegionId::NONE {
                reg_id_gen += 1;
                *slot = RegionId::from(reg_id_gen);
            }
        }
        for reg in &mut regions {
            if reg.id.is_walkable_region() {
                reg.id = compact_ids[reg.id.index()];
            }
        }

        // Remap regions.
        for region in src_reg.iter_mut() {
            if !region.is_border() && region.index() < nreg {
                *region = regions[region.index()].id;
            }
        }

        // Return regions that we found to be overlapping.
        let overlaps = regions
            .iter()
            .filter(|reg| reg.overlap)
            .map(|reg| reg.id)
            .collect();

        (RegionId::from(reg_id_gen), overlaps)
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if src_reg[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

fn add_unique(ids: &mut Vec<RegionId>, id: RegionId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Borrows two distinct elements mutably.
fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance2: u16,
}

#[derive(Clone, Debug)]
struct Region {
    span_count: usize,
    id: RegionId,
    area_type: AreaType,
    visited: bool,
    overlap: bool,
    connections: Vec<RegionId>,
    floors: Vec<RegionId>,
    /// Number of span faces shared with each neighboring region.
    shared_borders: Vec<(RegionId, u32)>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: AreaType::NOT_WALKABLE,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
            shared_borders: Vec::new(),
        }
    }

    fn is_connected_to_border(&self) -> bool {
        // Region is connected to a border if one of the neighbours is a null id.
        self.connections.contains(&RegionId::NONE)
    }

    fn shared_border_with(&self, id: RegionId) -> u32 {
        self.shared_borders
            .iter()
            .find(|(region, _)| *region == id)
            .map_or(0, |(_, length)| *length)
    }

    fn add_shared_border(&mut self, id: RegionId, length: u32) {
        match self.shared_borders.iter_mut().find(|(region, _)| *region == id) {
            Some((_, existing)) => *existing += length,
            None => self.shared_borders.push((id, length)),
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared_edges = self.connections.iter().filter(|c| **c == other.id).count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn replace_neighbour(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if let Some(position) = self.shared_borders.iter().position(|(r, _)| *r == old_id) {
            let (_, length) = self.shared_borders.swap_remove(position);
            if new_id != self.id {
                self.add_shared_border(new_id, length);
            }
        }
        if changed {
            remove_adjacent_neighbours(&mut self.connections);
        }
    }

    /// Merges `other` into `self`. Returns `false` if the two regions do not share a single border.
    fn merge(&mut self, other: &mut Region) -> bool {
        let a_id = self.id;
        let b_id = other.id;

        // Duplicate current neighbourhood.
        let a_connections = self.connections.clone();
        let b_connections = &other.connections;

        // Find insertion point on A.
        let Some(insa) = a_connections.iter().position(|c| *c == b_id) else {
            return false;
        };
        // Find insertion point on B.
        let Some(insb) = b_connections.iter().position(|c| *c == a_id) else {
            return false;
        };

        // Merge neighbours.
        let mut connections = Vec::with_capacity(a_connections.len() + b_connections.len());
        let na = a_connections.len();
        for i in 0..na.saturating_sub(1) {
            connections.push(a_connections[(insa + 1 + i) % na]);
        }
        let nb = b_connections.len();
        for i in 0..nb.saturating_sub(1) {
            connections.push(b_connections[(insb + 1 + i) % nb]);
        }
        remove_adjacent_neighbours(&mut connections);
        self.connections = connections;

        for floor in other.floors.clone() {
            add_unique(&mut self.floors, floor);
        }

        for (region, length) in std::mem::take(&mut other.shared_borders) {
            if region != a_id && region != b_id {
                self.add_shared_border(region, length);
            }
        }
        self.shared_borders.retain(|(region, _)| *region != b_id);

        self.span_count += other.span_count;
        other.span_count = 0;
        other.connections.clear();
        true
    }
}

fn remove_adjacent_neighbours(connections: &mut Vec<RegionId>) {
    // Remove adjacent duplicates.
    let mut i = 0;
    while connections.len() > 1 && i < connections.len() {
        let ni = (i + 1) % connections.len();
        if connections[i] == connections[ni] {
            connections.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Errors that can occur while building regions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The watershed produced more regions than a [`RegionId`] can address.
    #[error("Too many regions, at most {max} are supported")]
    TooManyRegions {
        /// The largest supported region id.
        max: u16,
    },
}

impl RegionError {
    /// Region ids share their bits with [`RegionId::BORDER_REGION`], so they must stay below it.
    pub const MAX_REGIONS: u16 = RegionId::BORDER_REGION.bits() - 1;
}

#[cfg(test)]
mod tests {
    use crate::{
        CompactHeightfield,
        region::RegionId,
        test_utils::{compact_from_floors, flat_compact_heightfield},
    };

    fn regions(compact: &CompactHeightfield) -> Vec<RegionId> {
        compact.spans.iter().map(|span| span.region).collect()
    }

    fn build(compact: &mut CompactHeightfield, border: u16, min: u32, merge: u32) {
        compact.build_distance_field();
        compact.build_regions(border, min, merge).unwrap();
    }

    #[test]
    fn flat_plane_is_a_single_region() {
        let mut compact = flat_compact_heightfield(10.0);
        build(&mut compact, 0, 0, 20);
        assert_eq!(compact.max_region, RegionId::from(1));
        assert!(regions(&compact).iter().all(|r| *r == RegionId::from(1)));
    }

    #[test]
    fn disconnected_platforms_get_their_own_regions() {
        let high = Some(20);
        let low = Some(1);
        let row: &[Option<u16>] = &[low, low, low, low, high, high, high, high];
        let mut compact = compact_from_floors(&[row; 8]);
        build(&mut compact, 0, 0, 0);
        let regions = regions(&compact);
        assert!(regions.iter().all(|r| r.is_walkable_region()));
        let low_region = compact.spans[compact.cell_at(0, 0).index() as usize].region;
        let high_region = compact.spans[compact.cell_at(7, 7).index() as usize].region;
        assert_ne!(low_region, high_region);
        assert_eq!(compact.max_region, RegionId::from(2));
    }

    #[test]
    fn small_islands_are_removed() {
        let floor = Some(1);
        let island = Some(20);
        let mut rows = vec![vec![floor; 10]; 10];
        for row in rows.iter_mut().skip(4).take(2) {
            row[4] = island;
            row[5] = island;
        }
        let rows: Vec<&[Option<u16>]> = rows.iter().map(Vec::as_slice).collect();

        let mut filtered = compact_from_floors(&rows);
        build(&mut filtered, 0, 8, 0);
        let island_span = filtered.cell_at(4, 4).index() as usize;
        assert_eq!(filtered.spans[island_span].region, RegionId::NONE);
        let floor_span = filtered.cell_at(0, 0).index() as usize;
        assert!(filtered.spans[floor_span].region.is_walkable_region());

        let mut kept = compact_from_floors(&rows);
        build(&mut kept, 0, 1, 0);
        let island_span = kept.cell_at(4, 4).index() as usize;
        assert!(kept.spans[island_span].region.is_walkable_region());
    }

    #[test]
    fn border_spans_are_tagged() {
        let mut compact = flat_compact_heightfield(12.0);
        build(&mut compact, 2, 0, 20);
        assert_eq!(compact.border_size, 2);
        let edge = compact.spans[compact.cell_at(0, 5).index() as usize].region;
        assert!(edge.is_border());
        let corner = compact.spans[compact.cell_at(11, 11).index() as usize].region;
        assert!(corner.is_border());
        let inner = compact.spans[compact.cell_at(6, 6).index() as usize].region;
        assert!(inner.is_walkable_region());
        assert_eq!(compact.max_region, RegionId::from(1));
    }

    #[test]
    fn region_ids_are_compact() {
        let mut compact = flat_compact_heightfield(24.0);
        build(&mut compact, 0, 0, 0);
        let max = compact.max_region.bits();
        assert!(max >= 1);
        for id in 1..=max {
            assert!(regions(&compact).contains(&RegionId::from(id)));
        }
    }

    #[test]
    fn max_region_counts_the_regions_in_use() {
        for border in [0, 2] {
            let mut compact = flat_compact_heightfield(16.0);
            build(&mut compact, border, 0, 0);
            let mut ids: Vec<RegionId> = regions(&compact)
                .into_iter()
                .filter(RegionId::is_walkable_region)
                .collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), compact.max_region.index(), "border {border}");
            assert_eq!(ids.first(), Some(&RegionId::from(1)), "border {border}");
        }
    }
}
