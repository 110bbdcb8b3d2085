//! Filters applied to a freshly rasterized [`Heightfield`] before it is compacted.

use tracing::debug_span;

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, Span, SpanKey},
};

/// The open ceiling of a column without a span above.
const OPEN_CEILING: i32 = Span::MAX_HEIGHT as i32 + 1;

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles that the agent would be able to walk over such as curbs,
    /// and also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        let _span = debug_span!("filter_low_hanging_walkable_obstacles").entered();
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_walkable: Option<(u16, AreaType)> = None;
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span_mut(key);
                    let walkable = span.area().is_walkable();
                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some((previous_max, previous_area)) = previous_walkable {
                        if !walkable && span.max().saturating_sub(previous_max) <= walkable_climb {
                            span.set_area(previous_area);
                        }
                    }
                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous_walkable = walkable.then_some((span.max(), span.area()));
                    span_key = span.next();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let _span = debug_span!("filter_ledge_spans").entered();
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        let mut ledges: Vec<SpanKey> = Vec::new();

        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span(key);
                    span_key = span.next();
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(OPEN_CEILING, |next| self.span(next).min() as i32);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = OPEN_CEILING;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for direction in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(direction);
                        let neighbor_z = z as i32 + dir_offset_z(direction);

                        // Skip neighbors which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        let mut neighbor_key =
                            self.span_key_at(neighbor_x as u16, neighbor_z as u16);

                        // Start with the open space under the lowest neighbor span.
                        let mut neighbor_ceiling =
                            neighbor_key.map_or(OPEN_CEILING, |key| self.span(key).min() as i32);

                        // The agent could drop into the space below the neighbor column.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        // For each span in the neighboring column...
                        while let Some(current_neighbor_key) = neighbor_key {
                            let neighbor_span = self.span(current_neighbor_key);
                            neighbor_key = neighbor_span.next();
                            let neighbor_floor = neighbor_span.max() as i32;
                            neighbor_ceiling = neighbor_span
                                .next()
                                .map_or(OPEN_CEILING, |next| self.span(next).min() as i32);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can early-out
                                break;
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent move between them, but the drop (surface slope) is too large to allow it.
                    if lowest_neighbor_floor_difference < -walkable_climb {
                        ledges.push(key);
                        continue;
                    }

                    // If the difference between all neighbor floors is too large, this is a steep slope, so mark the span as an unwalkable ledge.
                    if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                        > walkable_climb
                    {
                        ledges.push(key);
                    }
                }
            }
        }

        for key in ledges {
            self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        let _span = debug_span!("filter_walkable_low_height_spans").entered();
        let walkable_height = walkable_height as i32;
        let mut low_spans: Vec<SpanKey> = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                for key in self.column_keys(x, z) {
                    let span = self.span(key);
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(OPEN_CEILING, |next| self.span(next).min() as i32);
                    if ceiling - floor < walkable_height {
                        low_spans.push(key);
                    }
                }
            }
        }
        for key in low_spans {
            self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn heightfield(width: f32, depth: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [width, 1.0, depth]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn areas(heightfield: &Heightfield, x: u16, z: u16) -> Vec<AreaType> {
        heightfield
            .column_keys(x, z)
            .map(|key| heightfield.span(key).area())
            .collect()
    }

    #[test]
    fn low_hanging_span_without_span_above_is_unchanged() {
        let mut heightfield = heightfield(1.0, 1.0);
        insert(&mut heightfield, 0, 0, 0, 1, AreaType(1));
        heightfield.filter_low_hanging_walkable_obstacles(5);
        assert_eq!(areas(&heightfield, 0, 0), [AreaType(1)]);
    }

    #[test]
    fn low_hanging_obstacle_above_climb_is_unchanged() {
        let mut heightfield = heightfield(1.0, 1.0);
        insert(&mut heightfield, 0, 0, 0, 1, AreaType(1));
        insert(&mut heightfield, 0, 0, 6, 7, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(5);
        assert_eq!(
            areas(&heightfield, 0, 0),
            [AreaType(1), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn low_hanging_obstacle_within_climb_becomes_walkable() {
        let mut heightfield = heightfield(1.0, 1.0);
        insert(&mut heightfield, 0, 0, 0, 1, AreaType(1));
        insert(&mut heightfield, 0, 0, 5, 6, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(5);
        assert_eq!(areas(&heightfield, 0, 0), [AreaType(1), AreaType(1)]);
    }

    #[test]
    fn low_hanging_does_not_propagate_past_multiple_obstacles() {
        let mut heightfield = heightfield(1.0, 1.0);
        insert(&mut heightfield, 0, 0, 0, 1, AreaType(1));
        insert(&mut heightfield, 0, 0, 2, 3, AreaType::NOT_WALKABLE);
        insert(&mut heightfield, 0, 0, 4, 5, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(5);
        assert_eq!(
            areas(&heightfield, 0, 0),
            [AreaType(1), AreaType(1), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn edge_spans_are_ledges() {
        let mut heightfield = heightfield(3.0, 3.0);
        for z in 0..3 {
            for x in 0..3 {
                insert(&mut heightfield, x, z, 0, 1, AreaType(1));
            }
        }
        heightfield.filter_ledge_spans(10, 5);
        for z in 0..3 {
            for x in 0..3 {
                let expected = if x == 1 && z == 1 {
                    AreaType(1)
                } else {
                    AreaType::NOT_WALKABLE
                };
                assert_eq!(areas(&heightfield, x, z), [expected], "x={x}, z={z}");
            }
        }
    }

    #[test]
    fn drop_next_to_span_is_a_ledge() {
        let mut heightfield = heightfield(5.0, 5.0);
        for z in 0..5 {
            for x in 0..5 {
                let max = if x <= 2 { 10 } else { 1 };
                insert(&mut heightfield, x, z, 0, max, AreaType(1));
            }
        }
        heightfield.filter_ledge_spans(4, 2);
        assert_eq!(areas(&heightfield, 1, 2), [AreaType(1)]);
        assert_eq!(areas(&heightfield, 2, 2), [AreaType::NOT_WALKABLE]);
        assert_eq!(areas(&heightfield, 3, 2), [AreaType(1)]);
    }

    #[test]
    fn low_height_spans_become_unwalkable() {
        let mut heightfield = heightfield(2.0, 1.0);
        insert(&mut heightfield, 0, 0, 0, 1, AreaType(1));
        insert(&mut heightfield, 0, 0, 3, 4, AreaType(1));
        insert(&mut heightfield, 1, 0, 0, 1, AreaType(1));
        insert(&mut heightfield, 1, 0, 20, 21, AreaType(1));
        heightfield.filter_walkable_low_height_spans(5);
        assert_eq!(
            areas(&heightfield, 0, 0),
            [AreaType::NOT_WALKABLE, AreaType(1)]
        );
        assert_eq!(areas(&heightfield, 1, 0), [AreaType(1), AreaType(1)]);
    }
}
