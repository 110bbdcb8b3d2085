use std::{
    sync::{Arc, atomic::AtomicBool},
    time::Instant,
};

use glam::{UVec3, Vec3A};
use tilecast::{Aabb3d, AreaType, BuildStage, ErrorKind, NavmeshConfigBuilder, TriMesh};
use tilecast_tiles::{
    BuildAllOptions, StopReason, TileCoord, TileManager, TileManagerError, TileStage, TileStatus,
};

const TILE_WORLD_SIZE: f32 = 9.6;

fn flat(min: [f32; 2], max: [f32; 2]) -> TriMesh {
    TriMesh {
        vertices: vec![
            Vec3A::new(min[0], 0.0, min[1]),
            Vec3A::new(max[0], 0.0, min[1]),
            Vec3A::new(min[0], 0.0, max[1]),
            Vec3A::new(max[0], 0.0, max[1]),
        ],
        indices: vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
        area_types: vec![AreaType::NOT_WALKABLE; 2],
    }
}

/// Two 32x32 cell tiles next to each other along the x-axis.
fn settings() -> NavmeshConfigBuilder {
    NavmeshConfigBuilder {
        aabb: Aabb3d::new(
            [0.0, -1.0, 0.0],
            [2.0 * TILE_WORLD_SIZE, 1.0, TILE_WORLD_SIZE],
        ),
        tile_size: 32,
        ..Default::default()
    }
}

fn manager() -> TileManager {
    TileManager::new(flat([0.0, 0.0], [2.0 * TILE_WORLD_SIZE, TILE_WORLD_SIZE]), settings())
}

const LEFT: TileCoord = TileCoord::new(0, 0);
const RIGHT: TileCoord = TileCoord::new(1, 0);

#[test]
fn grid_covers_the_world() {
    let grid = manager().grid().unwrap();
    assert_eq!((grid.tiles_x, grid.tiles_z), (2, 1));
    assert_eq!(grid.tile_bounds(RIGHT).max.x, settings().aabb.max.x);
}

#[test]
fn building_then_removing_restores_the_navmesh() {
    let mut manager = manager();
    manager.build_tile(LEFT).unwrap();
    let before = manager.navmesh().clone();

    let tile = manager.build_tile(RIGHT).unwrap();
    assert!(tile.polygon_count > 0);
    assert_eq!(manager.tile_status(RIGHT), TileStatus::Built);
    assert_eq!(manager.navmesh().tile_count(), 2);

    assert!(manager.remove_tile(RIGHT).is_some());
    assert_eq!(manager.navmesh(), &before);
    assert_eq!(manager.tile_status(RIGHT), TileStatus::Absent);
}

#[test]
fn rebuilding_a_tile_is_deterministic() {
    let mut manager = manager();
    let first = manager.build_tile(LEFT).unwrap().clone();
    let second = manager.build_tile(LEFT).unwrap().clone();
    assert_eq!(first.data, second.data);
    assert_eq!(first.aabb, second.aabb);
    assert_eq!(manager.navmesh().tile_count(), 1);

    let mut batch = self::manager();
    batch.build_all_tiles(&BuildAllOptions::default()).unwrap();
    assert_eq!(batch.navmesh().tile(LEFT).unwrap().data, first.data);
}

#[test]
fn tile_pos_maps_points_back_to_their_tile() {
    let manager = manager();
    let grid = manager.grid().unwrap();
    for coord in grid.coords() {
        let bounds = grid.tile_bounds(coord);
        let extent = bounds.extent();
        for fraction in [0.01, 0.5, 0.99] {
            let point = Vec3A::new(
                bounds.min.x + extent.x * fraction,
                0.0,
                bounds.min.z + extent.z * (1.0 - fraction),
            );
            assert_eq!(manager.get_tile_pos(point).unwrap(), coord);
        }
    }
    assert_eq!(
        manager
            .get_tile_pos(Vec3A::new(-1.0, 0.0, 2.0 * TILE_WORLD_SIZE + 1.0))
            .unwrap(),
        TileCoord::new(-1, 2)
    );
}

#[test]
fn neighbors_agree_on_their_shared_edge() {
    let mut manager = manager();
    manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    let grid = manager.grid().unwrap();
    let shared_x = grid.tile_bounds(LEFT).max.x;
    assert_eq!(shared_x, grid.tile_bounds(RIGHT).min.x);

    let edge_vertices = |coord: TileCoord| {
        let mut vertices: Vec<Vec3A> = manager
            .navmesh()
            .tile(coord)
            .unwrap()
            .world_vertices(&grid)
            .unwrap()
            .into_iter()
            .filter(|vertex| vertex.x == shared_x)
            .collect();
        vertices.sort_by(|a, b| a.z.total_cmp(&b.z));
        vertices
    };
    let left = edge_vertices(LEFT);
    let right = edge_vertices(RIGHT);
    assert!(left.len() >= 2, "{left:?}");
    assert!(right.len() >= 2, "{right:?}");
    assert_eq!(left.first(), right.first());
    assert_eq!(left.last(), right.last());
}

#[test]
fn tile_without_geometry_is_empty_but_built() {
    let mut manager = TileManager::new(flat([0.0, 0.0], [5.0, TILE_WORLD_SIZE]), settings());
    let tile = manager.build_tile(RIGHT).unwrap();
    assert_eq!(tile.polygon_count, 0);
    assert_eq!(tile.triangle_count, 0);
    let data = tile.decode().unwrap();
    assert!(data.polygon_mesh.vertices.is_empty());
    assert!(data.detail_mesh.meshes.is_empty());
    assert_eq!(manager.tile_status(RIGHT), TileStatus::Built);
}

#[test]
fn invalid_settings_fail_before_building() {
    let mut manager = TileManager::new(
        flat([0.0, 0.0], [TILE_WORLD_SIZE, TILE_WORLD_SIZE]),
        NavmeshConfigBuilder {
            cell_size: 0.0,
            ..settings()
        },
    );
    let error = manager.build_tile(LEFT).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidConfig);
    assert_eq!(error.stage, TileStage::Pipeline(BuildStage::Config));
    assert_eq!(error.coord, LEFT);
    assert_eq!(
        manager.tile_status(LEFT),
        TileStatus::Failed {
            retained_previous: false
        }
    );
    assert!(manager.navmesh().is_empty());
    assert!(matches!(
        manager.get_tile_pos(Vec3A::ZERO),
        Err(TileManagerError::InvalidConfig(_))
    ));
    assert!(matches!(
        manager.build_all_tiles(&BuildAllOptions::default()),
        Err(TileManagerError::InvalidConfig(_))
    ));
}

#[test]
fn failed_rebuild_keeps_the_previous_tile() {
    let mut manager = manager();
    let previous = manager.build_tile(LEFT).unwrap().clone();

    manager.set_settings(NavmeshConfigBuilder {
        verts_per_poly: 3,
        max_polygons_per_tile: Some(1),
        ..settings()
    });
    let error = manager.build_tile(LEFT).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(error.stage, TileStage::Pipeline(BuildStage::PolygonMesh));
    assert_eq!(
        manager.tile_status(LEFT),
        TileStatus::Failed {
            retained_previous: true
        }
    );
    assert_eq!(manager.navmesh().tile(LEFT), Some(&previous));

    manager.set_settings(settings());
    manager.build_tile(LEFT).unwrap();
    assert_eq!(manager.tile_status(LEFT), TileStatus::Built);
}

#[test]
fn oversized_tile_field_keeps_the_previous_tile() {
    let mut manager = manager();
    let previous = manager.build_tile(LEFT).unwrap().clone();

    // A huge agent radius pads every tile far past the column ceiling without moving the grid.
    manager.set_settings(NavmeshConfigBuilder {
        agent_radius: 4000.0,
        ..settings()
    });
    let error = manager.build_tile(LEFT).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OutOfMemory);
    assert_eq!(error.stage, TileStage::Pipeline(BuildStage::Rasterization));
    assert_eq!(manager.navmesh().tile(LEFT), Some(&previous));
    assert_eq!(
        manager.tile_status(LEFT),
        TileStatus::Failed {
            retained_previous: true
        }
    );
}

#[test]
fn out_of_grid_tiles_are_rejected() {
    let mut manager = manager();
    let coord = TileCoord::new(2, 0);
    let error = manager.build_tile(coord).unwrap_err();
    assert_eq!(error.stage, TileStage::Placement);
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
    assert_eq!(manager.tile_status(coord), TileStatus::Absent);
    assert!(manager.remove_tile(coord).is_none());
}

#[test]
fn removal_is_idempotent() {
    let mut manager = manager();
    assert_eq!(manager.remove_all_tiles(), 0);
    assert!(manager.remove_tile(LEFT).is_none());

    manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    assert!(manager.remove_tile(LEFT).is_some());
    assert!(manager.remove_tile(LEFT).is_none());
    assert_eq!(manager.remove_all_tiles(), 1);
    assert_eq!(manager.remove_all_tiles(), 0);
    assert!(manager.navmesh().is_empty());
}

#[test]
fn build_all_reports_every_tile() {
    let mut manager = manager();
    let report = manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    assert_eq!(report.built, vec![LEFT, RIGHT]);
    assert!(report.failures.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.stopped, None);
    assert_eq!(manager.total_build_time(), report.total_build_time);
    assert!(manager.navmesh().polygon_count() >= 2);
    assert!(manager.navmesh().memory_usage() > 0);
}

#[test]
fn cancelled_batch_keeps_committed_tiles() {
    let mut manager = manager();
    manager.build_tile(LEFT).unwrap();
    let before = manager.navmesh().clone();

    let options = BuildAllOptions {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        deadline: None,
    };
    let report = manager.build_all_tiles(&options).unwrap();
    assert!(report.built.is_empty());
    assert_eq!(report.skipped, vec![LEFT, RIGHT]);
    assert_eq!(report.stopped, Some(StopReason::Cancelled));
    assert_eq!(manager.navmesh(), &before);

    let options = BuildAllOptions {
        cancel: None,
        deadline: Some(Instant::now()),
    };
    let report = manager.build_all_tiles(&options).unwrap();
    assert_eq!(report.stopped, Some(StopReason::DeadlineExceeded));
    assert_eq!(manager.navmesh(), &before);
}

#[test]
fn intermediates_are_kept_for_the_last_tile() {
    let mut manager = manager();
    manager.build_tile(LEFT).unwrap();
    assert!(manager.intermediate_results().is_none());

    manager.set_keep_intermediate_results(true);
    manager.build_tile(RIGHT).unwrap();
    let retained = manager.intermediate_results().unwrap();
    assert_eq!(retained.coord, RIGHT);
    assert!(retained.intermediates.compact_heightfield.span_count() > 0);
    let grid = manager.grid().unwrap();
    assert_eq!(
        manager.last_built_tile_bounds(),
        Some(grid.tile_bounds(RIGHT))
    );

    manager.set_keep_intermediate_results(false);
    assert!(manager.intermediate_results().is_none());
}

#[test]
fn batch_keeps_the_intermediates_of_its_last_tile() {
    let mut manager = manager();
    manager.set_keep_intermediate_results(true);
    manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    let retained = manager.intermediate_results().unwrap();
    assert_eq!(retained.coord, RIGHT);
    assert!(retained.intermediates.compact_heightfield.span_count() > 0);
}

#[test]
fn exported_tiles_can_be_imported() {
    let mut manager = manager();
    manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    let bytes = manager.export_tiles().unwrap();

    let mut restored = self::manager();
    assert_eq!(restored.import_tiles(&bytes).unwrap(), 2);
    assert_eq!(restored.navmesh(), manager.navmesh());

    let mut other = TileManager::new(
        manager.geometry().clone(),
        NavmeshConfigBuilder {
            tile_size: 16,
            ..settings()
        },
    );
    assert!(matches!(
        other.import_tiles(&bytes),
        Err(TileManagerError::GridMismatch { .. })
    ));
    assert!(other.navmesh().is_empty());
}

#[test]
fn untiled_settings_build_one_tile() {
    let mut manager = TileManager::new(
        flat([0.0, 0.0], [TILE_WORLD_SIZE, TILE_WORLD_SIZE]),
        NavmeshConfigBuilder {
            tile_size: 0,
            ..settings()
        },
    );
    assert!(matches!(
        manager.get_tile_pos(Vec3A::ONE),
        Err(TileManagerError::TilingDisabled)
    ));
    let report = manager.build_all_tiles(&BuildAllOptions::default()).unwrap();
    assert_eq!(report.built, vec![LEFT]);
    assert_eq!(
        manager.navmesh().tile(LEFT).unwrap().aabb,
        settings().aabb
    );
}
