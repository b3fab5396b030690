//! GPU uniform parameters for the PBF compute passes.
//!
//! One `#[repr(C)]` struct shared by every entry point in `pbf.wgsl`;
//! rebuilt on the CPU and re-uploaded once per substep. Field order and
//! padding mirror the WGSL declaration exactly.

use crate::config::FluidSystemConfig;
use crate::kernels::Kernels;
use crate::sdf::Sdf;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Threads per workgroup for every particle/cell dispatch.
pub const WORKGROUP_SIZE: u32 = 256;

/// Spatial hash cells per axis.
pub const GRID_DIM: u32 = 64;

/// Total spatial hash cell count.
pub const GRID_CELLS: u32 = GRID_DIM * GRID_DIM * GRID_DIM;

/// Hard ceiling on post-correction particle speed (m/s).
pub const MAX_SPEED: f32 = 100.0;

/// Tensile-instability correction strength.
pub const SCORR_K: f32 = 0.1;

/// Reference separation for the tensile correction, as a fraction of `h`.
pub const SCORR_DQ: f32 = 0.2;

/// Denominator guard for the Lagrange multiplier and normalizations.
pub const EPSILON: f32 = 1.0e-4;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct PbfParams {
    pub gravity: [f32; 3],
    pub dt: f32,

    pub grid_origin: [f32; 3],
    pub cell_size: f32,

    pub sdf_min: [f32; 3],
    pub sdf_present: u32,

    /// 1 / (bbox_max - bbox_min), per axis; zero when no SDF is set.
    pub sdf_inv_extent: [f32; 3],
    pub bounce: f32,

    pub grid_dims: [u32; 3],
    pub num_particles: u32,

    pub sdf_dims: [u32; 3],
    pub _pad0: u32,

    pub h: f32,
    pub h2: f32,
    pub rest_density: f32,
    pub inv_rest_density: f32,

    pub poly6_coef: f32,
    pub spiky_grad_coef: f32,
    pub scorr_k: f32,
    /// 1 / W(scorr_dq * h), precomputed so the shader only multiplies.
    pub scorr_inv_wdq: f32,

    pub viscosity: f32,
    /// 1 - drag, clamped to [0, 1].
    pub drag_keep: f32,
    pub max_speed: f32,
    pub epsilon: f32,
}

impl PbfParams {
    pub fn new(
        config: &FluidSystemConfig,
        num_particles: u32,
        dt: f32,
        grid_origin: Vec3,
        sdf: Option<&Sdf>,
    ) -> Self {
        let kernels = Kernels::new(config.radius);
        let dq = SCORR_DQ * kernels.h;
        let w_dq = kernels.poly6(dq * dq);
        let scorr_inv_wdq = if w_dq > 0.0 { 1.0 / w_dq } else { 0.0 };

        let (sdf_min, sdf_inv_extent, sdf_dims, sdf_present) = match sdf {
            Some(sdf) => {
                let extent = sdf.bbox_max - sdf.bbox_min;
                (
                    sdf.bbox_min.to_array(),
                    (Vec3::ONE / extent.max(Vec3::splat(1.0e-6))).to_array(),
                    sdf.dims,
                    1,
                )
            }
            None => ([0.0; 3], [0.0; 3], [1, 1, 1], 0),
        };

        Self {
            gravity: config.gravity.to_array(),
            dt: dt.max(1.0e-6),
            grid_origin: grid_origin.to_array(),
            cell_size: kernels.h,
            sdf_min,
            sdf_present,
            sdf_inv_extent,
            bounce: config.bounce.max(0.0),
            grid_dims: [GRID_DIM; 3],
            num_particles,
            sdf_dims,
            _pad0: 0,
            h: kernels.h,
            h2: kernels.h2,
            rest_density: config.rest_density.max(EPSILON),
            inv_rest_density: 1.0 / config.rest_density.max(EPSILON),
            poly6_coef: kernels.poly6_coef,
            spiky_grad_coef: kernels.spiky_grad_coef,
            scorr_k: SCORR_K,
            scorr_inv_wdq,
            viscosity: config.viscosity.clamp(0.0, 1.0),
            drag_keep: (1.0 - config.drag).clamp(0.0, 1.0),
            max_speed: MAX_SPEED,
            epsilon: EPSILON,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_size_matches_wgsl_struct() {
        // 9 rows of 16 bytes; a mismatch here corrupts every uniform read.
        assert_eq!(std::mem::size_of::<PbfParams>(), 144);
    }

    #[test]
    fn test_params_guard_degenerate_config() {
        let config = FluidSystemConfig {
            radius: 0.0,
            rest_density: 0.0,
            drag: 2.0,
            ..Default::default()
        };
        let p = PbfParams::new(&config, 0, 1.0 / 60.0, Vec3::ZERO, None);
        assert!(p.poly6_coef.is_finite());
        assert!(p.inv_rest_density.is_finite());
        assert_eq!(p.drag_keep, 0.0);
        assert_eq!(p.sdf_present, 0);
    }

    #[test]
    fn test_params_pick_up_sdf_volume() {
        let sdf = Sdf {
            field: vec![1.0; 8],
            dims: [2, 2, 2],
            bbox_min: Vec3::ZERO,
            bbox_max: Vec3::ONE * 2.0,
        };
        let config = FluidSystemConfig::default();
        let p = PbfParams::new(&config, 10, 1.0 / 120.0, Vec3::ZERO, Some(&sdf));
        assert_eq!(p.sdf_present, 1);
        assert_eq!(p.sdf_dims, [2, 2, 2]);
        assert!((p.sdf_inv_extent[0] - 0.5).abs() < 1e-6);
    }
}
