//! Signed-distance-field construction from triangle meshes.
//!
//! The builder samples exact point-to-triangle distance on a fixed-resolution
//! voxel grid over the mesh's padded world bounding box, then assigns sign
//! with a coarse inside/outside heuristic. The result is immutable; the
//! solver rebuilds it only when the cached key (object, geometry version,
//! world transform) changes.
//!
//! Known limitation: the sign heuristic averages normal alignment over a
//! bounded triangle subset and can misclassify voxels near thin walls or
//! strongly non-convex regions. Distance growth away from the surface is
//! therefore only approximately monotonic there.

use crate::config::ObjectId;
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Voxels per axis of every generated field.
pub const SDF_RESOLUTION: u32 = 32;

/// Bounding box padding as a fraction of its diagonal.
const BBOX_PAD_FRACTION: f32 = 0.01;

/// Upper bound on triangles consulted by the sign heuristic per voxel.
const SIGN_SAMPLE_MAX: usize = 32;

/// Triangle soup handed over by the host scene.
///
/// `indices` is optional; without it, consecutive position triples form
/// triangles directly.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    pub positions: Vec<Vec3>,
    pub indices: Option<Vec<u32>>,
}

impl TriangleMesh {
    fn world_triangles(&self, transform: &Mat4) -> Vec<[Vec3; 3]> {
        let world: Vec<Vec3> = self
            .positions
            .iter()
            .map(|&p| transform.transform_point3(p))
            .collect();

        match &self.indices {
            Some(indices) => indices
                .chunks_exact(3)
                .filter_map(|tri| {
                    let a = world.get(tri[0] as usize)?;
                    let b = world.get(tri[1] as usize)?;
                    let c = world.get(tri[2] as usize)?;
                    Some([*a, *b, *c])
                })
                .collect(),
            None => world.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect(),
        }
    }
}

/// Cache key deciding when a collider's SDF must be rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SdfKey {
    pub object: ObjectId,
    pub geometry_version: u64,
    transform_bits: u64,
}

impl SdfKey {
    pub fn new(object: ObjectId, geometry_version: u64, transform: &Mat4) -> Self {
        let mut hasher = FxHasher::default();
        for v in transform.to_cols_array() {
            v.to_bits().hash(&mut hasher);
        }
        Self {
            object,
            geometry_version,
            transform_bits: hasher.finish(),
        }
    }
}

/// Sampled signed-distance volume. Negative inside, positive outside.
#[derive(Clone, Debug)]
pub struct Sdf {
    /// Row-major x-fastest scalar field, `dims.x * dims.y * dims.z` long.
    pub field: Vec<f32>,
    pub dims: [u32; 3],
    pub bbox_min: Vec3,
    pub bbox_max: Vec3,
}

impl Sdf {
    /// World-space edge lengths of one voxel.
    pub fn voxel_size(&self) -> Vec3 {
        (self.bbox_max - self.bbox_min)
            / Vec3::new(self.dims[0] as f32, self.dims[1] as f32, self.dims[2] as f32)
    }

    fn cell_value(&self, x: i32, y: i32, z: i32) -> f32 {
        let cx = x.clamp(0, self.dims[0] as i32 - 1) as usize;
        let cy = y.clamp(0, self.dims[1] as i32 - 1) as usize;
        let cz = z.clamp(0, self.dims[2] as i32 - 1) as usize;
        self.field[(cz * self.dims[1] as usize + cy) * self.dims[0] as usize + cx]
    }

    /// Trilinear sample at a world position, mirroring the WGSL sampler.
    ///
    /// Positions outside the padded box clamp to the border voxels, which
    /// are positive by construction.
    pub fn sample(&self, p: Vec3) -> f32 {
        let extent = self.bbox_max - self.bbox_min;
        let u = ((p - self.bbox_min) / extent).clamp(Vec3::ZERO, Vec3::ONE);
        let gc = u * Vec3::new(self.dims[0] as f32, self.dims[1] as f32, self.dims[2] as f32)
            - Vec3::splat(0.5);
        let base = gc.floor();
        let f = gc - base;
        let (bx, by, bz) = (base.x as i32, base.y as i32, base.z as i32);

        let c000 = self.cell_value(bx, by, bz);
        let c100 = self.cell_value(bx + 1, by, bz);
        let c010 = self.cell_value(bx, by + 1, bz);
        let c110 = self.cell_value(bx + 1, by + 1, bz);
        let c001 = self.cell_value(bx, by, bz + 1);
        let c101 = self.cell_value(bx + 1, by, bz + 1);
        let c011 = self.cell_value(bx, by + 1, bz + 1);
        let c111 = self.cell_value(bx + 1, by + 1, bz + 1);

        let c00 = c000 + (c100 - c000) * f.x;
        let c10 = c010 + (c110 - c010) * f.x;
        let c01 = c001 + (c101 - c001) * f.x;
        let c11 = c011 + (c111 - c011) * f.x;
        let c0 = c00 + (c10 - c00) * f.y;
        let c1 = c01 + (c11 - c01) * f.y;
        c0 + (c1 - c0) * f.z
    }
}

/// Build an SDF for a mesh under a world transform.
///
/// Returns `None` for meshes without enough position data to form a
/// triangle; the caller then runs with collision disabled.
pub fn build_sdf(mesh: &TriangleMesh, transform: &Mat4) -> Option<Sdf> {
    let triangles = mesh.world_triangles(transform);
    if triangles.is_empty() {
        log::warn!("collision mesh has no triangles; skipping SDF build");
        return None;
    }

    let mut bbox_min = Vec3::splat(f32::MAX);
    let mut bbox_max = Vec3::splat(f32::MIN);
    for tri in &triangles {
        for v in tri {
            bbox_min = bbox_min.min(*v);
            bbox_max = bbox_max.max(*v);
        }
    }
    let pad = ((bbox_max - bbox_min).length() * BBOX_PAD_FRACTION).max(1.0e-3);
    let bbox_min = bbox_min - Vec3::splat(pad);
    let bbox_max = bbox_max + Vec3::splat(pad);
    let extent = bbox_max - bbox_min;

    let dims = [SDF_RESOLUTION, SDF_RESOLUTION, SDF_RESOLUTION];
    let (nx, ny, nz) = (dims[0] as usize, dims[1] as usize, dims[2] as usize);
    let sign_stride = (triangles.len() / SIGN_SAMPLE_MAX).max(1);

    let field: Vec<f32> = (0..nx * ny * nz)
        .into_par_iter()
        .map(|idx| {
            let x = idx % nx;
            let y = (idx / nx) % ny;
            let z = idx / (nx * ny);
            let center = bbox_min
                + extent
                    * Vec3::new(
                        (x as f32 + 0.5) / nx as f32,
                        (y as f32 + 0.5) / ny as f32,
                        (z as f32 + 0.5) / nz as f32,
                    );

            let mut dist2 = f32::MAX;
            let mut alignment = 0.0f32;
            for (t, tri) in triangles.iter().enumerate() {
                let q = closest_point_on_triangle(center, tri[0], tri[1], tri[2]);
                let offset = center - q;
                let d2 = offset.length_squared();
                dist2 = dist2.min(d2);

                // Inside/outside heuristic over a bounded triangle subset:
                // accumulate face-normal alignment, weighted toward nearby
                // triangles so the closest feature decides the sign.
                if t % sign_stride == 0 {
                    let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
                    let w = 1.0 / (d2 * d2.sqrt() + 1.0e-12);
                    alignment += offset.dot(n) * w;
                }
            }
            let dist = dist2.sqrt();
            if alignment < 0.0 {
                -dist
            } else {
                dist
            }
        })
        .collect();

    log::debug!(
        "built {}^3 SDF over {} triangles, bbox {:?}..{:?}",
        SDF_RESOLUTION,
        triangles.len(),
        bbox_min,
        bbox_max
    );

    Some(Sdf {
        field,
        dims,
        bbox_min,
        bbox_max,
    })
}

/// Closest point on triangle `abc` to `p` via barycentric region tests.
fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    // Interior: project onto the face plane.
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit cube [0,1]^3 as 12 triangles with outward-facing normals.
    fn unit_cube() -> TriangleMesh {
        let v = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        ];
        #[rustfmt::skip]
        let indices = vec![
            // -z
            0, 2, 1, 0, 3, 2,
            // +z
            4, 5, 6, 4, 6, 7,
            // -y
            0, 1, 5, 0, 5, 4,
            // +y
            3, 7, 6, 3, 6, 2,
            // -x
            0, 4, 7, 0, 7, 3,
            // +x
            1, 2, 6, 1, 6, 5,
        ];
        TriangleMesh {
            positions: v.to_vec(),
            indices: Some(indices),
        }
    }

    #[test]
    fn test_closest_point_face_interior() {
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 2.0, 0.0);
        let q = closest_point_on_triangle(Vec3::new(0.5, 0.5, 3.0), a, b, c);
        assert!((q - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_closest_point_vertex_region() {
        let a = Vec3::ZERO;
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 0.0);
        let q = closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), a, b, c);
        assert!((q - a).length() < 1e-6);
    }

    #[test]
    fn test_closest_point_edge_region() {
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 2.0, 0.0);
        let q = closest_point_on_triangle(Vec3::new(1.0, -1.0, 0.0), a, b, c);
        assert!((q - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_unit_cube_sign_correctness() {
        let sdf = build_sdf(&unit_cube(), &Mat4::IDENTITY).expect("cube builds");
        // Centroid is well inside
        let center = sdf.sample(Vec3::splat(0.5));
        assert!(center < 0.0, "centroid should be inside, got {center}");
        // Two half-extents away along each axis is well outside
        for outside in [
            Vec3::new(2.0, 0.5, 0.5),
            Vec3::new(0.5, 2.0, 0.5),
            Vec3::new(0.5, 0.5, 2.0),
            Vec3::new(-1.0, 0.5, 0.5),
        ] {
            let d = sdf.sample(outside);
            assert!(d > 0.0, "{outside:?} should be outside, got {d}");
        }
    }

    #[test]
    fn test_unit_cube_interior_distance_magnitude() {
        let sdf = build_sdf(&unit_cube(), &Mat4::IDENTITY).expect("cube builds");
        // At the centroid the nearest face is 0.5 away; the coarse grid
        // and trilinear blend cost accuracy, so allow a loose band.
        let d = sdf.sample(Vec3::splat(0.5));
        assert!(d < -0.3 && d > -0.7, "centroid distance {d}");
    }

    #[test]
    fn test_bbox_is_padded() {
        let sdf = build_sdf(&unit_cube(), &Mat4::IDENTITY).expect("cube builds");
        assert!(sdf.bbox_min.x < 0.0);
        assert!(sdf.bbox_max.x > 1.0);
    }

    #[test]
    fn test_transform_moves_the_field() {
        let shifted = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let sdf = build_sdf(&unit_cube(), &shifted).expect("cube builds");
        assert!(sdf.sample(Vec3::new(10.5, 0.5, 0.5)) < 0.0);
        assert!(sdf.sample(Vec3::new(0.5, 0.5, 0.5)) > 0.0);
    }

    #[test]
    fn test_empty_mesh_yields_none() {
        assert!(build_sdf(&TriangleMesh::default(), &Mat4::IDENTITY).is_none());
        // Two positions cannot form a triangle either
        let degenerate = TriangleMesh {
            positions: vec![Vec3::ZERO, Vec3::ONE],
            indices: None,
        };
        assert!(build_sdf(&degenerate, &Mat4::IDENTITY).is_none());
    }

    #[test]
    fn test_sample_outside_bbox_clamps_positive() {
        let sdf = build_sdf(&unit_cube(), &Mat4::IDENTITY).expect("cube builds");
        assert!(sdf.sample(Vec3::splat(100.0)) > 0.0);
        assert!(sdf.sample(Vec3::splat(-100.0)) > 0.0);
    }

    #[test]
    fn test_cache_key_tracks_transform() {
        let object = ObjectId(7);
        let a = SdfKey::new(object, 1, &Mat4::IDENTITY);
        let b = SdfKey::new(object, 1, &Mat4::IDENTITY);
        let moved = SdfKey::new(object, 1, &Mat4::from_translation(Vec3::X));
        let bumped = SdfKey::new(object, 2, &Mat4::IDENTITY);
        assert_eq!(a, b);
        assert_ne!(a, moved);
        assert_ne!(a, bumped);
    }
}
