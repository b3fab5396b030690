//! SPH smoothing kernels.
//!
//! CPU mirror of the kernel math in `solver/shaders/pbf.wgsl`. The solver
//! itself evaluates these on the GPU; this module exists so that tests and
//! diagnostics can recompute densities from read-back positions with
//! bit-compatible coefficients.

use glam::Vec3;
use std::f32::consts::PI;

/// Smallest usable smoothing radius; guards the h^9 / h^6 normalizations.
pub const KERNEL_H_MIN: f32 = 1.0e-4;

/// Separation below which the spiky gradient is treated as zero.
const GRAD_R_MIN: f32 = 1.0e-5;

/// Precomputed kernel coefficients for a smoothing radius `h`.
#[derive(Clone, Copy, Debug)]
pub struct Kernels {
    pub h: f32,
    pub h2: f32,
    /// 315 / (64 pi h^9)
    pub poly6_coef: f32,
    /// -45 / (pi h^6)
    pub spiky_grad_coef: f32,
}

impl Kernels {
    pub fn new(h: f32) -> Self {
        let h = h.max(KERNEL_H_MIN);
        let h3 = h * h * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;
        Self {
            h,
            h2: h * h,
            poly6_coef: 315.0 / (64.0 * PI * h9),
            spiky_grad_coef: -45.0 / (PI * h6),
        }
    }

    /// Poly6 density kernel. Zero at and beyond the support radius.
    pub fn poly6(&self, r2: f32) -> f32 {
        if r2 >= self.h2 {
            return 0.0;
        }
        let term = self.h2 - r2;
        self.poly6_coef * term * term * term
    }

    /// Spiky kernel gradient; avoids poly6's vanishing gradient at small r.
    pub fn spiky_grad(&self, r_vec: Vec3, r: f32) -> Vec3 {
        if r >= self.h || r <= GRAD_R_MIN {
            return Vec3::ZERO;
        }
        let term = self.h - r;
        r_vec * (self.spiky_grad_coef * term * term / r)
    }

    /// Summed poly6 density of `point` against every position in `others`.
    ///
    /// Includes the self-contribution when `point` appears in `others`.
    pub fn density_at(&self, point: Vec3, others: &[Vec3]) -> f32 {
        let mut density = 0.0;
        for &q in others {
            let r2 = (point - q).length_squared();
            if r2 < self.h2 {
                density += self.poly6(r2);
            }
        }
        density
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly6_zero_outside_support() {
        let k = Kernels::new(0.1);
        assert_eq!(k.poly6(k.h2), 0.0);
        assert_eq!(k.poly6(k.h2 * 4.0), 0.0);
    }

    #[test]
    fn test_poly6_peaks_at_zero_separation() {
        let k = Kernels::new(0.1);
        let w0 = k.poly6(0.0);
        let w_half = k.poly6(0.05 * 0.05);
        assert!(w0 > w_half);
        assert!(w_half > 0.0);
    }

    #[test]
    fn test_poly6_normalization_constant() {
        // 315 / (64 pi h^9) at h = 1 is ~1.566
        let k = Kernels::new(1.0);
        assert!((k.poly6_coef - 315.0 / (64.0 * PI)).abs() < 1e-4);
    }

    #[test]
    fn test_spiky_grad_points_away_from_neighbor() {
        let k = Kernels::new(0.1);
        // Neighbor at origin, particle at +x: repulsive correction direction
        // is along -grad, so the raw gradient must point in -x.
        let r_vec = Vec3::new(0.05, 0.0, 0.0);
        let g = k.spiky_grad(r_vec, 0.05);
        assert!(g.x < 0.0);
        assert_eq!(g.y, 0.0);
        assert_eq!(g.z, 0.0);
    }

    #[test]
    fn test_spiky_grad_guards_degenerate_separation() {
        let k = Kernels::new(0.1);
        assert_eq!(k.spiky_grad(Vec3::ZERO, 0.0), Vec3::ZERO);
        assert_eq!(k.spiky_grad(Vec3::new(0.2, 0.0, 0.0), 0.2), Vec3::ZERO);
    }

    #[test]
    fn test_tiny_radius_is_clamped() {
        let k = Kernels::new(0.0);
        assert!(k.poly6_coef.is_finite());
        assert!(k.spiky_grad_coef.is_finite());
        assert!(k.h >= KERNEL_H_MIN);
    }

    #[test]
    fn test_density_includes_self_contribution() {
        let k = Kernels::new(0.1);
        let p = Vec3::new(1.0, 2.0, 3.0);
        let d = k.density_at(p, &[p]);
        assert!((d - k.poly6(0.0)).abs() < 1e-6);
    }
}
