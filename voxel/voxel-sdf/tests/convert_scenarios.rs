//! End-to-end conversion scenarios.
//!
//! Exercises the full pipeline on closed, open, self-intersecting and
//! degenerate input, and checks the distance-field invariants: the sign
//! law, band confinement, primitive-index consistency and unsigned
//! non-negativity.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use voxel_grid::{nearest_coord, Coord, GridClass, GridTransform, SparseGrid};
use voxel_sdf::{
    mesh_to_level_set, mesh_to_unsigned_distance_field, tri_point_dist_sqr, CancelToken,
    MeshToVolume, QuadMesh, GENERATE_PRIM_INDEX_GRID, INVALID_IDX,
};

// =============================================================================
// Mesh builders
// =============================================================================

/// Axis-aligned cube with corners `(min, min, min)`–`(max, max, max)`,
/// triangulated into 12 faces. Coordinates are in index space.
fn cube_mesh(min: f32, max: f32) -> QuadMesh {
    let mut mesh = QuadMesh::new();
    for &z in &[min, max] {
        for &y in &[min, max] {
            for &x in &[min, max] {
                mesh.points.push(Point3::new(x, y, z));
            }
        }
    }
    let faces: [[u32; 4]; 6] = [
        [0, 1, 3, 2],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 3, 7, 6],
        [0, 2, 6, 4],
        [1, 3, 7, 5],
    ];
    for [a, b, c, d] in faces {
        mesh.push_triangle(a, b, c);
        mesh.push_triangle(a, c, d);
    }
    mesh
}

/// Icosphere of the given radius (index space) centered at the origin.
fn icosphere(subdivisions: u32, radius: f32) -> QuadMesh {
    let phi = (1.0 + 5.0f32.sqrt()) / 2.0;

    let mut points: Vec<Point3<f32>> = vec![
        Point3::new(-1.0, phi, 0.0),
        Point3::new(1.0, phi, 0.0),
        Point3::new(-1.0, -phi, 0.0),
        Point3::new(1.0, -phi, 0.0),
        Point3::new(0.0, -1.0, phi),
        Point3::new(0.0, 1.0, phi),
        Point3::new(0.0, -1.0, -phi),
        Point3::new(0.0, 1.0, -phi),
        Point3::new(phi, 0.0, -1.0),
        Point3::new(phi, 0.0, 1.0),
        Point3::new(-phi, 0.0, -1.0),
        Point3::new(-phi, 0.0, 1.0),
    ];
    let mut faces: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut next = Vec::with_capacity(faces.len() * 4);

        for [a, b, c] in faces {
            let ab = midpoint(&mut points, &mut midpoints, a, b);
            let bc = midpoint(&mut points, &mut midpoints, b, c);
            let ca = midpoint(&mut points, &mut midpoints, c, a);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    // Project onto the sphere.
    for p in &mut points {
        let scaled = p.coords.normalize() * radius;
        *p = Point3::from(scaled);
    }

    let mut mesh = QuadMesh::from_parts(points, Vec::new());
    for [a, b, c] in faces {
        mesh.push_triangle(a, b, c);
    }
    mesh
}

fn midpoint(
    points: &mut Vec<Point3<f32>>,
    cache: &mut HashMap<(u32, u32), u32>,
    a: u32,
    b: u32,
) -> u32 {
    let key = (a.min(b), a.max(b));
    if let Some(&index) = cache.get(&key) {
        return index;
    }
    let m = nalgebra::center(&points[a as usize], &points[b as usize]);
    let index = points.len() as u32;
    points.push(m);
    cache.insert(key, index);
    index
}

// =============================================================================
// Query helpers
// =============================================================================

/// Möller–Trumbore ray/triangle intersection.
fn ray_triangle_intersect(
    origin: Point3<f64>,
    dir: Vector3<f64>,
    v0: Point3<f64>,
    v1: Point3<f64>,
    v2: Point3<f64>,
) -> Option<f64> {
    const EPSILON: f64 = 1e-10;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t > EPSILON).then_some(t)
}

/// Point-in-mesh test by ray casting in +x and counting crossings.
///
/// The origin is nudged off the lattice so rays from integer voxel
/// centers cannot graze triangle edges or the shared face diagonals.
fn point_in_mesh(point: Point3<f64>, mesh: &QuadMesh) -> bool {
    let point = point + Vector3::new(0.0, 1.618e-4, 2.718e-4);
    let dir = Vector3::new(1.0, 0.0, 0.0);
    let mut count = 0;

    for prim in 0..mesh.prim_count() {
        let verts = mesh.prims[prim];
        let v0 = mesh.point(verts[0]);
        let v1 = mesh.point(verts[1]);
        let v2 = mesh.point(verts[2]);
        if ray_triangle_intersect(point, dir, v0, v1, v2).is_some() {
            count += 1;
        }
        if verts[3] != INVALID_IDX {
            let v3 = mesh.point(verts[3]);
            if ray_triangle_intersect(point, dir, v0, v3, v2).is_some() {
                count += 1;
            }
        }
    }

    count % 2 == 1
}

/// Iterates every active voxel of `grid` as `(coord, value)`.
fn active_voxels(grid: &SparseGrid<f32>) -> Vec<(Coord, f32)> {
    let mut out = Vec::new();
    for origin in grid.leaf_origins() {
        let leaf = grid.leaf(origin).unwrap();
        for (offset, value) in leaf.iter_active() {
            out.push((leaf.coord_of(offset), value));
        }
    }
    out
}

// =============================================================================
// S1: axis-aligned cube
// =============================================================================

#[test]
fn cube_interior_and_exterior_distances() {
    // Wide bands keep the cube center active with its exact distance.
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 6.0, 6.0).unwrap();

    let center = sdf.probe(Coord::new(5, 5, 5)).expect("center is in band");
    assert!((center + 5.0).abs() < 1e-4, "center distance {center}");

    let outside = sdf.probe(Coord::new(12, 5, 5)).expect("in exterior band");
    assert!((outside - 2.0).abs() < 1e-4, "outside distance {outside}");

    let on_face = sdf.probe(Coord::new(5, 5, 10)).expect("face voxel active");
    assert!(on_face.abs() <= 1.0 + 1e-4, "face distance {on_face}");
}

#[test]
fn cube_narrow_band_backgrounds() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    // Deep interior falls out of the band and reads the inside
    // background.
    assert!(sdf.probe(Coord::new(5, 5, 5)).is_none());
    assert!((sdf.get(Coord::new(5, 5, 5)) + 3.0).abs() < 1e-4);

    // Far outside reads the outside background.
    assert!((sdf.get(Coord::new(30, 5, 5)) - 3.0).abs() < 1e-4);

    // Near-surface values are still exact.
    let outside = sdf.probe(Coord::new(12, 5, 5)).expect("in exterior band");
    assert!((outside - 2.0).abs() < 1e-4);
}

#[test]
fn cube_sign_law_by_ray_casting() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 4.0, 4.0).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut checked = 0;

    while checked < 300 {
        let c = Coord::new(
            rng.gen_range(-4..15),
            rng.gen_range(-4..15),
            rng.gen_range(-4..15),
        );
        let p = c.to_point();

        // Skip voxel centers too close to a face to classify robustly.
        let surface_dist = [p.x, p.y, p.z, 10.0 - p.x, 10.0 - p.y, 10.0 - p.z]
            .into_iter()
            .fold(f64::MAX, f64::min);
        if surface_dist.abs() < 0.75 {
            continue;
        }

        let inside = point_in_mesh(p, &mesh);
        let value = sdf.get(c);
        assert_eq!(
            value < 0.0,
            inside,
            "sign mismatch at {c:?}: D = {value}, ray cast says inside = {inside}"
        );
        checked += 1;
    }
}

// =============================================================================
// S2: tessellated unit sphere
// =============================================================================

#[test]
fn sphere_distances_match_analytic_radius() {
    // 2562-vertex icosphere of world radius 1 at voxel size 0.05.
    let voxel_size = 0.05;
    let radius = 20.0; // index units
    let mesh = icosphere(4, radius);
    let transform = GridTransform::new(voxel_size).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    let mut worst: f64 = 0.0;
    for (c, value) in active_voxels(&sdf) {
        let world_radius = transform.voxel_center(c).coords.norm();
        let analytic = (world_radius - 1.0).abs();
        let error = (f64::from(value.abs()) - analytic).abs();
        worst = worst.max(error);
    }

    assert!(
        worst < 0.1 * voxel_size,
        "worst narrow-band error {worst} exceeds 0.1 voxel"
    );
}

#[test]
fn sphere_band_confinement() {
    let voxel_size = 0.05;
    let mesh = icosphere(4, 20.0);
    let transform = GridTransform::new(voxel_size).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    let ex_limit = 3.0 * voxel_size as f32 + 1e-4;
    let in_limit = 3.0 * voxel_size as f32 + 1e-4;
    for (c, value) in active_voxels(&sdf) {
        if value > 0.0 {
            assert!(value < ex_limit, "exterior voxel {c:?} out of band: {value}");
        } else {
            assert!(-value <= in_limit, "interior voxel {c:?} out of band: {value}");
        }
    }
}

#[test]
fn sphere_surface_round_trip() {
    // A finer sphere: every mesh vertex lands within two voxels of the
    // zero isosurface.
    let voxel_size = 0.1;
    let radius = 10.0;
    let mesh = icosphere(5, radius);
    assert!(mesh.points.len() >= 5000);

    let transform = GridTransform::new(voxel_size).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    for p in &mesh.points {
        let c = nearest_coord(Point3::new(
            f64::from(p.x),
            f64::from(p.y),
            f64::from(p.z),
        ));
        let value = sdf.probe(c).expect("surface voxel is active");
        assert!(
            f64::from(value.abs()) < 2.0 * voxel_size,
            "surface sample at {c:?} reads {value}"
        );
    }
}

#[test]
fn wider_bands_are_supersets() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();

    let narrow = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();
    let wide = mesh_to_level_set(transform, &mesh, 5.0, 5.0).unwrap();

    assert!(wide.active_voxel_count() > narrow.active_voxel_count());
}

// =============================================================================
// S3: self-intersecting input
// =============================================================================

#[test]
fn overlapping_cubes_have_no_positive_interior() {
    // Two unit cubes overlapping by half their extent, voxel size 0.1.
    let mut mesh = cube_mesh(0.0, 10.0);
    let second = cube_mesh(5.0, 15.0);
    let base = mesh.points.len() as u32;
    mesh.points.extend_from_slice(&second.points);
    for prim in &second.prims {
        mesh.push_triangle(prim[0] + base, prim[1] + base, prim[2] + base);
    }

    let transform = GridTransform::new(0.1).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    let inside_union = |p: Point3<f64>, margin: f64| {
        let in_a = p.iter().all(|&v| v > margin && v < 10.0 - margin);
        let in_b = p.iter().all(|&v| v > 5.0 + margin && v < 15.0 - margin);
        in_a || in_b
    };

    for (c, value) in active_voxels(&sdf) {
        if value > 0.0 {
            assert!(
                !inside_union(c.to_point(), 1.0),
                "positive voxel {c:?} ({value}) inside the union"
            );
        }
    }

    // Points in the overlap region read as inside.
    assert!(sdf.get(Coord::new(7, 7, 7)) < 0.0);
    assert!(sdf.get(Coord::new(8, 8, 8)) < 0.0);
}

// =============================================================================
// S4: open surface, unsigned conversion
// =============================================================================

#[test]
fn open_quad_unsigned_field() {
    let mut mesh = QuadMesh::new();
    mesh.points.push(Point3::new(0.0, 0.0, 0.0));
    mesh.points.push(Point3::new(10.0, 0.0, 0.0));
    mesh.points.push(Point3::new(10.0, 10.0, 0.0));
    mesh.points.push(Point3::new(0.0, 10.0, 0.0));
    mesh.push_quad(0, 1, 2, 3);

    let transform = GridTransform::new(1.0).unwrap();
    let sdf = mesh_to_unsigned_distance_field(transform, &mesh, 4.0).unwrap();

    // Unsigned fields are non-negative everywhere.
    for (c, value) in active_voxels(&sdf) {
        assert!(value >= 0.0, "negative unsigned distance at {c:?}");
    }

    let on_plane = sdf.probe(Coord::new(5, 5, 0)).expect("plane voxel active");
    assert!(on_plane.abs() < 1e-5);

    let above = sdf.probe(Coord::new(5, 5, 3)).expect("within the band");
    assert!((above - 3.0).abs() < 1e-4, "distance above the quad: {above}");
}

// =============================================================================
// S5: degenerate faces
// =============================================================================

#[test]
fn degenerate_triangle_does_not_perturb_cube() {
    let mut mesh = cube_mesh(0.0, 10.0);
    // A zero-area triangle (p0 == p1) well away from the cube.
    let base = mesh.points.len() as u32;
    mesh.points.push(Point3::new(20.0, 5.0, 5.0));
    mesh.points.push(Point3::new(20.0, 5.0, 5.0));
    mesh.points.push(Point3::new(22.0, 5.0, 5.0));
    mesh.push_triangle(base, base + 1, base + 2);

    let transform = GridTransform::new(1.0).unwrap();
    let sdf = mesh_to_level_set(transform, &mesh, 3.0, 3.0).unwrap();

    // The degenerate face rasterizes nothing.
    for (c, _) in active_voxels(&sdf) {
        assert!(c.x <= 14, "spurious active voxel at {c:?}");
    }

    // Cube distances match the clean S1 expectations.
    assert!((sdf.get(Coord::new(5, 5, 5)) + 3.0).abs() < 1e-4);
    let outside = sdf.probe(Coord::new(12, 5, 5)).expect("in exterior band");
    assert!((outside - 2.0).abs() < 1e-4);
}

// =============================================================================
// S6: cancellation
// =============================================================================

#[test]
fn cancelled_conversion_is_benign() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();
    let token = CancelToken::new();
    token.cancel();

    let mut converter = MeshToVolume::new(transform)
        .with_flags(GENERATE_PRIM_INDEX_GRID)
        .with_cancel_token(token);
    converter.convert_to_level_set(&mesh, 3.0, 3.0).unwrap();

    // Whatever came back satisfies the shared-topology invariant.
    let index = converter.prim_index_grid().unwrap();
    let dist = converter.distance_grid();
    for (c, _) in active_voxels(dist) {
        assert!(index.probe(c).is_some());
    }
    assert_eq!(dist.active_voxel_count(), 0);
}

// =============================================================================
// Primitive-index grid invariants
// =============================================================================

#[test]
fn index_grid_tracks_nearest_primitive() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(1.0).unwrap();

    let mut converter = MeshToVolume::new(transform).with_flags(GENERATE_PRIM_INDEX_GRID);
    converter.convert_to_level_set(&mesh, 3.0, 3.0).unwrap();

    let dist = converter.distance_grid();
    let index = converter.prim_index_grid().unwrap();

    for (c, value) in active_voxels(dist) {
        // Index topology covers distance topology.
        let prim = index.probe(c).expect("index voxel active wherever D is");

        // Within the one-voxel shell the stored primitive realizes the
        // true minimum distance.
        if value.abs() < 1.0 {
            let p = c.to_point();
            let stored = prim_distance(&mesh, prim as usize, p);
            let best = (0..mesh.prim_count())
                .map(|i| prim_distance(&mesh, i, p))
                .fold(f64::MAX, f64::min);
            assert!(
                (stored - best).abs() < 1e-9,
                "primitive {prim} at {c:?} is not nearest ({stored} vs {best})"
            );
        }
    }
}

fn prim_distance(mesh: &QuadMesh, prim: usize, p: Point3<f64>) -> f64 {
    let verts = mesh.prims[prim];
    let v0 = mesh.point(verts[0]);
    let v1 = mesh.point(verts[1]);
    let v2 = mesh.point(verts[2]);
    let mut d = tri_point_dist_sqr(p, v0, v1, v2);
    if verts[3] != INVALID_IDX {
        let v3 = mesh.point(verts[3]);
        d = d.min(tri_point_dist_sqr(p, v0, v3, v2));
    }
    d
}

#[test]
fn level_set_metadata_and_transform() {
    let mesh = cube_mesh(0.0, 10.0);
    let transform = GridTransform::new(0.25).unwrap();

    let mut converter = MeshToVolume::new(transform);
    converter.convert_to_level_set(&mesh, 3.0, 3.0).unwrap();

    assert_eq!(converter.grid_class(), GridClass::LevelSet);
    assert!((converter.transform().voxel_size() - 0.25).abs() < 1e-12);

    // Band widths scale with the voxel size.
    let sdf = converter.distance_grid();
    for (_, value) in active_voxels(sdf) {
        assert!(value.abs() <= 3.0 * 0.25 + 1e-4);
    }
}
