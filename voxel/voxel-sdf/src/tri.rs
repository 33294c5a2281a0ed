//! Point-to-triangle proximity queries.

use nalgebra::{Point3, Vector3};

use crate::mesh::{QuadMesh, INVALID_IDX};

/// Computes the closest point on a triangle to a query point, with its
/// barycentric coordinates.
///
/// This implements the Voronoi-region case analysis from "Real-Time Collision
/// Detection" by Christer Ericson. The returned `[u, v]` satisfy
/// `closest = u·v0 + v·v1 + (1 − u − v)·v2`.
///
/// # Arguments
///
/// * `point` - The query point
/// * `v0`, `v1`, `v2` - The triangle vertices
#[must_use]
pub fn tri_closest_point(
    point: Point3<f64>,
    v0: Point3<f64>,
    v1: Point3<f64>,
    v2: Point3<f64>,
) -> (Point3<f64>, [f64; 2]) {
    let ab = v1 - v0;
    let ac = v2 - v0;
    let ap = point - v0;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);

    // Vertex region outside A.
    if d1 <= 0.0 && d2 <= 0.0 {
        return (v0, [1.0, 0.0]);
    }

    let bp = point - v1;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);

    // Vertex region outside B.
    if d3 >= 0.0 && d4 <= d3 {
        return (v1, [0.0, 1.0]);
    }

    // Edge region of AB.
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return (v0 + ab * t, [1.0 - t, t]);
    }

    let cp = point - v2;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);

    // Vertex region outside C.
    if d6 >= 0.0 && d5 <= d6 {
        return (v2, [0.0, 0.0]);
    }

    // Edge region of AC.
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return (v0 + ac * t, [1.0 - t, 0.0]);
    }

    // Edge region of BC.
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (v1 + (v2 - v1) * t, [0.0, 1.0 - t]);
    }

    // Face region.
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;

    (v0 + ab * v + ac * w, [1.0 - v - w, v])
}

/// Squared Euclidean distance from a point to a closed triangle.
#[inline]
#[must_use]
pub fn tri_point_dist_sqr(
    point: Point3<f64>,
    v0: Point3<f64>,
    v1: Point3<f64>,
    v2: Point3<f64>,
) -> f64 {
    let (closest, _) = tri_closest_point(point, v0, v1, v2);
    (point - closest).norm_squared()
}

/// Squared distance from `point` to primitive `prim` of `mesh`.
///
/// Quads are evaluated as the two triangles `(v0, v1, v2)` and
/// `(v0, v3, v2)`, taking the smaller distance.
#[must_use]
pub(crate) fn prim_dist_sqr(mesh: &QuadMesh, prim: usize, point: Point3<f64>) -> f64 {
    let verts = mesh.prims[prim];
    let p0 = mesh.point(verts[0]);
    let p1 = mesh.point(verts[1]);
    let p2 = mesh.point(verts[2]);

    let mut dist = tri_point_dist_sqr(point, p0, p1, p2);

    if verts[3] != INVALID_IDX {
        let p3 = mesh.point(verts[3]);
        let second = tri_point_dist_sqr(point, p0, p3, p2);
        if second < dist {
            dist = second;
        }
    }

    dist
}

/// Normalized direction from `point`'s closest point on primitive `prim`
/// towards `point`.
#[must_use]
pub(crate) fn prim_closest_point_dir(
    mesh: &QuadMesh,
    prim: usize,
    point: Point3<f64>,
) -> Vector3<f64> {
    let verts = mesh.prims[prim];
    let p0 = mesh.point(verts[0]);
    let mut p1 = mesh.point(verts[1]);
    let p2 = mesh.point(verts[2]);

    let (_, mut uv) = tri_closest_point(point, p0, p1, p2);
    let dist = tri_point_dist_sqr(point, p0, p1, p2);

    if verts[3] != INVALID_IDX {
        let p3 = mesh.point(verts[3]);
        let second = tri_point_dist_sqr(point, p0, p3, p2);
        if second < dist {
            p1 = p3;
            uv = tri_closest_point(point, p0, p3, p2).1;
        }
    }

    let closest = Point3::from(
        p0.coords * uv[0] + p1.coords * uv[1] + p2.coords * (1.0 - uv[0] - uv[1]),
    );

    (point - closest).normalize()
}
