use glam::{UVec3, Vec3A};
use tilecast::{
    Aabb3d, AreaType, BuildStage, ErrorKind, NavmeshConfig, NavmeshConfigBuilder, TriMesh, build_navmesh,
};

fn quad(min: [f32; 2], max: [f32; 2], height: impl Fn(f32, f32) -> f32) -> TriMesh {
    let corner = |x: f32, z: f32| Vec3A::new(x, height(x, z), z);
    TriMesh {
        vertices: vec![
            corner(min[0], min[1]),
            corner(max[0], min[1]),
            corner(min[0], max[1]),
            corner(max[0], max[1]),
        ],
        indices: vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
        area_types: vec![AreaType::NOT_WALKABLE; 2],
    }
}

fn flat(min: [f32; 2], max: [f32; 2]) -> TriMesh {
    quad(min, max, |_, _| 0.0)
}

fn single_tile(aabb: Aabb3d) -> NavmeshConfig {
    NavmeshConfigBuilder {
        aabb,
        tile_size: 0,
        ..Default::default()
    }
    .build()
    .unwrap()
}

#[test]
fn flat_plane_is_a_single_rectangle() {
    let config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10.0, 1.0, 10.0]));
    let artifacts = build_navmesh(&flat([0.0, 0.0], [10.0, 10.0]), &config, false).unwrap();

    let mesh = &artifacts.polygon_mesh;
    assert_eq!(mesh.polygon_count(), 1);
    let polygon = mesh.polygon_vertices(0);
    assert_eq!(polygon.len(), 4);
    let xs: Vec<u16> = polygon.iter().map(|v| mesh.vertices[*v as usize].x).collect();
    let zs: Vec<u16> = polygon.iter().map(|v| mesh.vertices[*v as usize].z).collect();
    // Every corner shares its x with one neighbor and its z with the other.
    for i in 0..4 {
        let next = (i + 1) % 4;
        assert!(xs[i] == xs[next] || zs[i] == zs[next]);
    }

    let detail = &artifacts.detail_mesh;
    assert_eq!(detail.meshes.len(), 1);
    let first_y = detail.vertices[0].y;
    assert!(detail.vertices.iter().all(|v| (v.y - first_y).abs() < 1.0e-4));
}

#[test]
fn rebuilding_is_deterministic() {
    let config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [12.0, 4.0, 12.0]));
    let mut trimesh = quad([0.0, 0.0], [12.0, 6.0], |x, _| x * 0.1);
    trimesh.extend(flat([2.0, 7.0], [11.0, 12.0]));
    let first = build_navmesh(&trimesh, &config, false).unwrap();
    let second = build_navmesh(&trimesh, &config, false).unwrap();
    assert_eq!(first.polygon_mesh, second.polygon_mesh);
    assert_eq!(first.detail_mesh, second.detail_mesh);
}

#[test]
fn small_islands_do_not_survive() {
    let config = NavmeshConfigBuilder {
        aabb: Aabb3d::new([0.0, -1.0, 0.0], [16.0, 1.0, 10.0]),
        tile_size: 0,
        agent_radius: 0.0,
        ..Default::default()
    }
    .build()
    .unwrap();
    let mut trimesh = flat([0.0, 0.0], [10.0, 10.0]);
    // 6x6 cells, below the 8x8 minimum.
    trimesh.extend(flat([13.0, 4.0], [14.8, 5.8]));
    let artifacts = build_navmesh(&trimesh, &config, false).unwrap();

    let mesh = &artifacts.polygon_mesh;
    assert!(mesh.polygon_count() > 0);
    let island_start = (12.0 / config.cell_size) as u16;
    assert!(mesh.vertices.iter().all(|v| v.x < island_start));
}

#[test]
fn detail_mesh_follows_slopes() {
    let config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10.0, 4.0, 10.0]));
    let height = |x: f32, _: f32| x * 0.2;
    let artifacts = build_navmesh(&quad([0.0, 0.0], [10.0, 10.0], height), &config, false).unwrap();

    let detail = &artifacts.detail_mesh;
    assert!(!detail.vertices.is_empty());
    for vertex in &detail.vertices {
        let expected = height(vertex.x, vertex.z);
        assert!(
            (vertex.y - expected).abs() <= 0.6,
            "{vertex} is too far from the surface ({expected})"
        );
    }
}

#[test]
fn geometry_outside_bounds_gives_empty_meshes() {
    let config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10.0, 1.0, 10.0]));
    let artifacts = build_navmesh(&flat([20.0, 20.0], [30.0, 30.0]), &config, true).unwrap();
    assert_eq!(artifacts.polygon_mesh.polygon_count(), 0);
    assert!(artifacts.polygon_mesh.vertices.is_empty());
    assert!(artifacts.detail_mesh.meshes.is_empty());
    let intermediates = artifacts.intermediates.unwrap();
    assert_eq!(intermediates.compact_heightfield.span_count(), 0);
}

#[test]
fn steep_walls_are_not_walkable() {
    let config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10.0, 10.0, 10.0]));
    let wall = TriMesh {
        vertices: vec![
            Vec3A::new(0.0, 0.0, 5.0),
            Vec3A::new(10.0, 0.0, 5.0),
            Vec3A::new(0.0, 8.0, 5.2),
            Vec3A::new(10.0, 8.0, 5.2),
        ],
        indices: vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
        area_types: vec![AreaType::NOT_WALKABLE; 2],
    };
    let artifacts = build_navmesh(&wall, &config, false).unwrap();
    assert_eq!(artifacts.polygon_mesh.polygon_count(), 0);
}

#[test]
fn non_positive_cell_size_is_invalid_config() {
    let mut config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10.0, 1.0, 10.0]));
    config.cell_size = -0.3;
    let error = build_navmesh(&flat([0.0, 0.0], [10.0, 10.0]), &config, false).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidConfig);
}

#[test]
fn oversized_field_runs_out_of_memory() {
    let mut config = single_tile(Aabb3d::new([0.0, -1.0, 0.0], [10_000.0, 1.0, 10_000.0]));
    config.cell_size = 1.0;
    let error = build_navmesh(&flat([0.0, 0.0], [10.0, 10.0]), &config, false).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OutOfMemory);
    assert_eq!(error.stage(), BuildStage::Rasterization);
}
