use tracing::debug_span;

use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` to a boundary (a missing or unwalkable neighbor)
    /// is marked [`AreaType::NOT_WALKABLE`]. The distance is approximated with a two-pass chamfer transform
    /// using a cost of 2 for straight steps and 3 for diagonal steps.
    ///
    /// # Arguments
    ///
    /// - `walkable_radius` - The radius of erosion. `[Limits: 0 < value < 255] [Units: vx]`
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let _span = debug_span!("erode_walkable_area", walkable_radius).entered();
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = *self.cell_at(x as u16, z as u16);
                for span_index in cell.index_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                    let mut neighbor_count = 0;
                    for direction in 0..4 {
                        let Some((_, _, neighbor_index)) =
                            self.neighbor(x, z, span_index, direction)
                        else {
                            break;
                        };
                        if !self.areas[neighbor_index].is_walkable() {
                            break;
                        }
                        neighbor_count += 1;
                    }

                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
                    }
                }
            }
        }

        let relax = |distance: &mut [u8], target: usize, source: usize, cost: u8| {
            let new_distance = distance[source].saturating_add(cost);
            if new_distance < distance[target] {
                distance[target] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = *self.cell_at(x as u16, z as u16);
                for span_index in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, span_index, 0) {
                        // (-1,0)
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 3) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, span_index, 3) {
                        // (0,-1)
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 2) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height as i32).rev() {
            for x in (0..self.width as i32).rev() {
                let cell = *self.cell_at(x as u16, z as u16);
                for span_index in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, span_index, 2) {
                        // (1,0)
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (1,1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 1) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, span_index, 1) {
                        // (0,1)
                        relax(&mut distance_to_boundary, span_index, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 0) {
                            relax(&mut distance_to_boundary, span_index, aa_index, 3);
                        }
                    }
                }
            }
        }

        let min_boundary_distance = walkable_radius.saturating_mul(2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CompactHeightfield, test_utils::flat_compact_heightfield};

    fn walkable_cells(compact: &CompactHeightfield) -> Vec<(u16, u16)> {
        let mut cells = Vec::new();
        for z in 0..compact.height {
            for x in 0..compact.width {
                if compact
                    .cell_at(x, z)
                    .index_range()
                    .any(|i| compact.areas[i].is_walkable())
                {
                    cells.push((x, z));
                }
            }
        }
        cells
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.erode_walkable_area(0);
        assert_eq!(walkable_cells(&compact).len(), 25);
    }

    #[test]
    fn erodes_border_ring() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.erode_walkable_area(1);
        let cells = walkable_cells(&compact);
        assert_eq!(cells.len(), 9);
        assert!(cells.iter().all(|(x, z)| (1..=3).contains(x) && (1..=3).contains(z)));
    }

    #[test]
    fn large_radius_erodes_everything() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.erode_walkable_area(3);
        assert!(walkable_cells(&compact).is_empty());
    }
}
