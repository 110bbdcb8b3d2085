use tracing::debug_span;

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Builds the distance field for the compact heightfield.
    ///
    /// The distance of every span to the closest boundary (a missing neighbor or a neighbor of a different area)
    /// is stored in [`CompactHeightfield::dist`] after a 3x3 box blur,
    /// and the largest unblurred distance in [`CompactHeightfield::max_distance`].
    /// This is required before building regions with [`CompactHeightfield::build_regions`].
    pub fn build_distance_field(&mut self) {
        let _span = debug_span!("build_distance_field").entered();
        let (distances, max_distance) = self.calculate_distance_field();
        self.max_distance = max_distance;
        self.dist = self.box_blur(1, &distances);
    }

    fn calculate_distance_field(&self) -> (Vec<u16>, u16) {
        let mut distances = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    let area = self.areas[i];
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor(x, z, i, dir))
                        .filter(|(_, _, a_index)| self.areas[*a_index] == area)
                        .count();
                    if neighbor_count != 4 {
                        distances[i] = 0;
                    }
                }
            }
        }

        let relax = |distances: &mut [u16], target: usize, source: usize, cost: u16| {
            let new_distance = distances[source].saturating_add(cost);
            if new_distance < distances[target] {
                distances[target] = new_distance;
            }
        };

        // Pass 1
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, i, 0) {
                        // (-1,0)
                        relax(&mut distances, i, a_index, 2);
                        // (-1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 3) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, i, 3) {
                        // (0,-1)
                        relax(&mut distances, i, a_index, 2);
                        // (1,-1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 2) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height as i32).rev() {
            for x in (0..self.width as i32).rev() {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, i, 2) {
                        // (1,0)
                        relax(&mut distances, i, a_index, 2);
                        // (1,1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 1) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_index)) = self.neighbor(x, z, i, 1) {
                        // (0,1)
                        relax(&mut distances, i, a_index, 2);
                        // (-1,1)
                        if let Some((_, _, aa_index)) = self.neighbor(a_x, a_z, a_index, 0) {
                            relax(&mut distances, i, aa_index, 3);
                        }
                    }
                }
            }
        }

        let max_distance = distances.iter().copied().max().unwrap_or(0);
        (distances, max_distance)
    }

    fn box_blur(&self, threshold: u16, distances: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut blurred = vec![0; distances.len()];
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = *self.cell_at(x as u16, z as u16);
                for i in cell.index_range() {
                    let center = distances[i];
                    if center <= threshold {
                        blurred[i] = center;
                        continue;
                    }

                    let mut sum = center as u32;
                    for dir in 0..4 {
                        let Some((a_x, a_z, a_index)) = self.neighbor(x, z, i, dir) else {
                            sum += center as u32 * 2;
                            continue;
                        };
                        sum += distances[a_index] as u32;
                        let dir2 = (dir + 1) & 0x3;
                        match self.neighbor(a_x, a_z, a_index, dir2) {
                            Some((_, _, b_index)) => sum += distances[b_index] as u32,
                            None => sum += center as u32,
                        }
                    }
                    blurred[i] = ((sum + 5) / 9) as u16;
                }
            }
        }
        blurred
    }
}
