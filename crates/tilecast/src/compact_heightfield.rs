//! The open space above walkable spans, packed into flat arrays with per-span neighbor links.

use std::collections::TryReserveError;

use tracing::debug_span;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::{AreaType, Span},
};

/// A packed representation of a [`Heightfield`].
///
/// Only the walkable spans survive compaction. Each [`CompactSpan`] describes the open space
/// above a walkable floor, along with links to the spans in the four neighboring columns
/// an agent can step to.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = Span::MAX_HEIGHT + 1;
    const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// # Arguments
    ///
    /// - `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable. `[Limit: >= 3] [Units: vx]`
    /// - `walkable_climb` - Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has too many layers or the span storage cannot be allocated.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let _span = debug_span!("build_compact_heightfield").entered();
        let walkable_span_count = heightfield.walkable_span_count();
        let column_count = heightfield.width as usize * heightfield.height as usize;

        let mut cells = Vec::new();
        cells.try_reserve_exact(column_count)?;
        cells.resize(column_count, CompactCell::default());
        let mut spans = Vec::new();
        spans.try_reserve_exact(walkable_span_count)?;
        let mut areas = Vec::new();
        areas.try_reserve_exact(walkable_span_count)?;

        let mut aabb = heightfield.aabb;
        aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let first = spans.len();
                for key in heightfield.column_keys(x, z) {
                    let span = heightfield.span(key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map_or(Self::MAX_HEIGHT, |next| heightfield.span(next).min());
                    let mut compact_span = CompactSpan {
                        y: bot,
                        ..Default::default()
                    };
                    compact_span.set_height(top.saturating_sub(bot).min(u8::MAX.into()) as u8);
                    spans.push(compact_span);
                    areas.push(span.area());
                }
                let count = spans.len() - first;
                if count > u8::MAX as usize {
                    return Err(CompactHeightfieldError::TooManyLayers {
                        max_layer_index: Self::MAX_LAYERS,
                        layer_index: count as u32,
                    });
                }
                let cell = &mut cells[column_index];
                cell.set_index(first as u32);
                cell.set_count(count as u8);
            }
        }

        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };
        compact_heightfield.connect_neighbors()?;
        Ok(compact_heightfield)
    }

    /// Finds the neighbor connections of every span.
    fn connect_neighbors(&mut self) -> Result<(), CompactHeightfieldError> {
        let mut max_layer_index = 0_u32;
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = self.cells[(x + z * self.width as i32) as usize];
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        self.spans[i].set_con(dir, None);
                        let neighbor_x = x + dir_offset_x(dir);
                        let neighbor_z = z + dir_offset_z(dir);
                        // First check that the neighbour cell is in bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of them is
                        // accessible from current cell.
                        let neighbor_cell =
                            self.cells[(neighbor_x + neighbor_z * self.width as i32) as usize];
                        let span = &self.spans[i];
                        let span_top = span.y as i32 + span.height() as i32;
                        let mut connection = None;
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &self.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top =
                                span_top.min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= self.walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= self.walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = (k - neighbor_cell.index() as usize) as u32;
                            if layer_index >= Self::MAX_LAYERS as u32 {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            connection = Some(layer_index as u8);
                            break;
                        }
                        self.spans[i].set_con(dir, connection);
                    }
                }
            }
        }
        if max_layer_index >= Self::MAX_LAYERS as u32 {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index: max_layer_index,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if !self.contains(x as i32, z as i32) {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Returns the coordinates and span index of the neighbor reached by following `con` in `dir`
    /// from the column at `(x, z)`.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let neighbor_x = x + dir_offset_x(dir);
        let neighbor_z = z + dir_offset_z(dir);
        let cell_index = (neighbor_x + neighbor_z * self.width as i32) as usize;
        let neighbor_index = self.cells[cell_index].index() as usize + con as usize;
        (neighbor_x, neighbor_z, neighbor_index)
    }

    /// Like [`Self::con_indices`], but reads the connection from the span at `span_index`.
    /// Returns `None` if the span is not connected in `dir`.
    #[inline]
    pub(crate) fn neighbor(
        &self,
        x: i32,
        z: i32,
        span_index: usize,
        dir: u8,
    ) -> Option<(i32, i32, usize)> {
        let con = self.spans[span_index].con(dir)?;
        Some(self.con_indices(x, z, dir, con))
    }

    /// The number of walkable spans.
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: u32,
    },
    /// The span storage could not be allocated.
    #[error("Failed to allocate compact heightfield storage: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;
    use crate::{HeightfieldBuilder, heightfield::SpanInsertion, span::SpanBuilder};

    fn heightfield() -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [3.0, 10.0, 3.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..3 {
            for x in 0..3 {
                // The middle column is a step up, the one next to it is too high to climb.
                let max = match (x, z) {
                    (1, 1) => 3,
                    (2, 1) => 8,
                    _ => 2,
                };
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min: 0,
                            max,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield
    }

    #[test]
    fn compacts_every_walkable_span() {
        let compact = CompactHeightfield::from_heightfield(&heightfield(), 2, 1).unwrap();
        assert_eq!(compact.span_count(), 9);
        assert_eq!(compact.cells.len(), 9);
        for cell in &compact.cells {
            assert_eq!(cell.count(), 1);
        }
        let center = &compact.spans[compact.cell_at(1, 1).index() as usize];
        assert_eq!(center.y, 3);
        assert_eq!(center.height(), u8::MAX);
        assert_eq!(compact.areas[4], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn connects_climbable_neighbors_only() {
        let compact = CompactHeightfield::from_heightfield(&heightfield(), 2, 1).unwrap();
        let center_index = compact.cell_at(1, 1).index() as usize;
        let center = &compact.spans[center_index];
        // -x and +z and -z are one step away
        assert_eq!(center.con(0), Some(0));
        assert_eq!(center.con(1), Some(0));
        assert_eq!(center.con(3), Some(0));
        // +x is five steps up
        assert_eq!(center.con(2), None);

        let corner = &compact.spans[compact.cell_at(0, 0).index() as usize];
        assert_eq!(corner.con(0), None);
        assert_eq!(corner.con(3), None);
        assert_eq!(corner.con(1), Some(0));
        assert_eq!(corner.con(2), Some(0));

        let (x, z, index) = compact.neighbor(1, 1, center_index, 0).unwrap();
        assert_eq!((x, z), (0, 1));
        assert_eq!(index, compact.cell_at(0, 1).index() as usize);
    }

    #[test]
    fn skips_unwalkable_spans() {
        let mut heightfield = heightfield();
        heightfield
            .span_at_mut(0, 0)
            .unwrap()
            .set_area(AreaType::NOT_WALKABLE);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        assert_eq!(compact.span_count(), 8);
        assert_eq!(compact.cell_at(0, 0).count(), 0);
        let neighbor = &compact.spans[compact.cell_at(1, 0).index() as usize];
        assert_eq!(neighbor.con(0), None);
    }
}
