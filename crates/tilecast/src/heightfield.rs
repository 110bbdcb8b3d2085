//! Solid voxel columns produced by rasterization.
//!
//! Every column of a [`Heightfield`] is a bottom-to-top list of non-overlapping [`Span`]s.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// Obstructed space as columns of solid spans.
///
/// Created by [`HeightfieldBuilder`], filled by rasterizing triangles.
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Columns along x.
    pub width: u16,
    /// Columns along z.
    pub height: u16,
    /// World bounds covered by the columns.
    pub aabb: Aabb3d,
    /// Horizontal voxel size in world units.
    pub cell_size: f32,
    /// Vertical voxel size in world units.
    pub cell_height: f32,
    /// Lowest span of each column, row-major with x varying fastest.
    pub spans: Vec<Option<SpanKey>>,
    /// Backing storage of every span; columns link through [`Span::next`].
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, absorbing every span it overlaps.
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        let SpanInsertion {
            x,
            z,
            flag_merge_threshold,
            span: mut new_span,
        } = insertion;
        if !self.contains(x as i32, z as i32) {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds { x, z });
        }
        let column = self.column_index(x, z);

        // Columns are sorted bottom to top.
        let mut below = None;
        let mut cursor = self.spans[column];
        while let Some(key) = cursor {
            let existing = self.span(key).clone();
            cursor = existing.next();
            if existing.min() > new_span.max() {
                break;
            }
            if existing.max() < new_span.min() {
                below = Some(key);
                continue;
            }
            new_span.set_min(new_span.min().min(existing.min()));
            new_span.set_max(new_span.max().max(existing.max()));
            // Tops within the threshold are the same surface, the higher area id wins.
            if new_span.max().abs_diff(existing.max()) <= flag_merge_threshold {
                new_span.set_area(new_span.area().max(existing.area()));
            }
            self.allocated_spans.remove(key);
            self.link(column, below, cursor);
        }

        let above = match below {
            Some(key) => self.span(key).next(),
            None => self.spans[column],
        };
        new_span.set_next(above);
        let key = self.allocated_spans.insert(new_span);
        self.link(column, below, Some(key));
        Ok(())
    }

    /// Points `below` at `next`, or the column head if there is no span below.
    #[inline]
    fn link(&mut self, column: usize, below: Option<SpanKey>, next: Option<SpanKey>) {
        match below {
            Some(key) => self.span_mut(key).set_next(next),
            None => self.spans[column] = next,
        }
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Key of the bottom span at `(x, z)`, `None` for empty or out-of-range columns.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        self.contains(x as i32, z as i32)
            .then(|| self.spans[self.column_index(x, z)])
            .flatten()
    }

    /// Bottom span at `(x, z)`.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        self.span_key_at(x, z).map(|key| self.span(key))
    }

    /// Bottom span at `(x, z)`, mutably.
    #[inline]
    pub fn span_at_mut(&mut self, x: u16, z: u16) -> Option<&mut Span> {
        let key = self.span_key_at(x, z)?;
        self.allocated_spans.get_mut(key)
    }

    /// The span behind `key`.
    ///
    /// # Panics
    /// If `key` does not belong to this heightfield.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// The span behind `key`, mutably.
    ///
    /// # Panics
    /// If `key` does not belong to this heightfield.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }

    /// Iterates over the keys of the spans in a column, from bottom to top.
    pub fn column_keys(&self, x: u16, z: u16) -> impl Iterator<Item = SpanKey> + '_ {
        std::iter::successors(self.span_key_at(x, z), |key| self.span(*key).next())
    }

    /// The number of spans that are walkable, i.e. have an area other than [`AreaType::NOT_WALKABLE`](crate::AreaType::NOT_WALKABLE).
    pub fn walkable_span_count(&self) -> usize {
        self.allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count()
    }
}

/// Lays out an empty [`Heightfield`] over a bounding box.
#[derive(Debug, Clone)]
pub struct HeightfieldBuilder {
    /// Bounds to voxelize.
    pub aabb: Aabb3d,
    /// Horizontal voxel size.
    pub cell_size: f32,
    /// Vertical voxel size.
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// The largest number of columns a single heightfield may hold.
    pub const MAX_COLUMN_COUNT: usize = 1 << 26;

    /// Allocates the column table. Fails if the grid is degenerate or too large.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        let extent = self.aabb.extent();
        let width = extent.x / self.cell_size + 0.5;
        let height = extent.z / self.cell_size + 0.5;
        if !width.is_finite()
            || !height.is_finite()
            || width < 0.0
            || height < 0.0
            || width >= u16::MAX as f32
            || height >= u16::MAX as f32
            || (width as usize) * (height as usize) > Self::MAX_COLUMN_COUNT
        {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let width = width as u16;
        let height = height as u16;
        let column_count = width as usize * height as usize;

        let mut spans = Vec::new();
        spans.try_reserve_exact(column_count)?;
        spans.resize(column_count, None);

        let HeightfieldBuilder {
            aabb,
            cell_size,
            cell_height,
        } = self;
        Ok(Heightfield {
            width,
            height,
            aabb,
            cell_size,
            cell_height,
            spans,
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Failure of [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// The bounds and cell size give a grid with no columns, too many, or non-finite dimensions.
    #[error(
        "cannot lay out {width}x{height} columns, at most {max} are supported",
        max = HeightfieldBuilder::MAX_COLUMN_COUNT
    )]
    ColumnCountTooLarge {
        /// Columns along x before truncation.
        width: f32,
        /// Columns along z before truncation.
        height: f32,
    },
    /// The column table could not be allocated.
    #[error("out of memory for the heightfield columns: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

/// Failure of a span insertion.
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// `(x, z)` lies outside the grid.
    #[error("no column at ({x}, {z})")]
    ColumnIndexOutOfBounds {
        /// Requested column along x.
        x: u16,
        /// Requested column along z.
        z: u16,
    },
}

/// A span headed for column `(x, z)`.
pub(crate) struct SpanInsertion {
    pub(crate) x: u16,
    pub(crate) z: u16,
    /// Tops closer than this are one surface and merge their area ids.
    pub(crate) flag_merge_threshold: u16,
    pub(crate) span: Span,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;
    use crate::span::{AreaType, SpanBuilder};

    /// A 5x5 column grid with unit voxels.
    fn field() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn solid(min: u16, max: u16, area: u8) -> Span {
        SpanBuilder {
            min,
            max,
            area: AreaType(area),
            next: None,
        }
        .build()
    }

    fn push(field: &mut Heightfield, x: u16, z: u16, threshold: u16, span: Span) {
        field
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: threshold,
                span,
            })
            .unwrap();
    }

    fn column(field: &Heightfield, x: u16, z: u16) -> Vec<(u16, u16, AreaType)> {
        field
            .column_keys(x, z)
            .map(|key| {
                let span = field.span(key);
                (span.min(), span.max(), span.area())
            })
            .collect()
    }

    #[test]
    fn column_count_rounds_to_the_nearest_cell() {
        let field = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [4.6, 1.0, 2.2]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        assert_eq!((field.width, field.height), (5, 2));
        assert_eq!(field.spans.len(), 10);
    }

    #[test]
    fn zero_cell_size_is_rejected() {
        let result = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 0.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::ColumnCountTooLarge { .. })
        ));
    }

    #[test]
    fn span_lands_in_its_own_column() {
        let mut field = field();
        push(&mut field, 1, 3, 0, solid(2, 4, 2));
        assert_eq!(field.span_at(1, 3), Some(&solid(2, 4, 2)));
        assert_eq!(field.span_at(3, 1), None);
        assert_eq!(field.span_at(7, 1), None);
    }

    #[test]
    fn columns_outside_the_grid_are_rejected() {
        let mut field = field();
        for (x, z) in [(2, 5), (5, 0), (u16::MAX, 1)] {
            let result = field.add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: solid(2, 4, 2),
            });
            assert!(matches!(
                result,
                Err(SpanInsertionError::ColumnIndexOutOfBounds { .. })
            ));
        }
        assert!(field.allocated_spans.is_empty());
    }

    #[test]
    fn columns_stay_sorted() {
        let mut field = field();
        push(&mut field, 1, 3, 0, solid(8, 10, 3));
        push(&mut field, 1, 3, 0, solid(2, 4, 2));
        push(&mut field, 1, 3, 0, solid(12, 14, 1));
        assert_eq!(
            column(&field, 1, 3),
            vec![
                (2, 4, AreaType(2)),
                (8, 10, AreaType(3)),
                (12, 14, AreaType(1)),
            ]
        );
    }

    #[test]
    fn touching_spans_merge() {
        let mut field = field();
        push(&mut field, 1, 3, 0, solid(2, 4, 2));
        push(&mut field, 1, 3, 0, solid(4, 7, 2));
        assert_eq!(column(&field, 1, 3), vec![(2, 7, AreaType(2))]);
        assert_eq!(field.allocated_spans.len(), 1);
    }

    #[test]
    fn bridging_span_swallows_the_spans_it_overlaps() {
        let mut field = field();
        push(&mut field, 0, 0, 0, solid(0, 2, 1));
        push(&mut field, 0, 0, 0, solid(4, 6, 1));
        push(&mut field, 0, 0, 0, solid(10, 12, 1));
        push(&mut field, 0, 0, 0, solid(1, 5, 1));
        assert_eq!(
            column(&field, 0, 0),
            vec![(0, 6, AreaType(1)), (10, 12, AreaType(1))]
        );
        assert_eq!(field.allocated_spans.len(), 2);
    }

    #[test]
    fn close_tops_keep_the_higher_area() {
        let mut field = field();
        push(&mut field, 0, 0, 0, solid(0, 5, 10));
        push(&mut field, 0, 0, 1, solid(3, 6, 2));
        assert_eq!(column(&field, 0, 0), vec![(0, 6, AreaType(10))]);
    }

    #[test]
    fn distant_tops_keep_the_new_area() {
        let mut field = field();
        push(&mut field, 0, 0, 0, solid(0, 5, 10));
        push(&mut field, 0, 0, 1, solid(3, 9, 2));
        assert_eq!(column(&field, 0, 0), vec![(0, 9, AreaType(2))]);
    }
}
