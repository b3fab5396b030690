//! Host-owned fluid system configuration.
//!
//! The host UI mutates a [`FluidSystemConfig`] freely between frames; the
//! solver reads it as an immutable snapshot at each `step` call. Changing
//! `capacity` is the one destructive edit - it discards the running solver
//! state and allocates a fresh one.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Identifies a fluid system entity in the host scene graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FluidSystemId(pub u64);

/// Identifies any host scene object (emitters, collision meshes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Tunable parameters for one fluid system.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FluidSystemConfig {
    /// Maximum particle count; sizes every GPU buffer at solver construction.
    pub capacity: u32,
    /// Smoothing radius `h` (also the spatial hash cell size), in meters.
    pub radius: f32,
    /// Target rest density (kg/m3 for SI-scaled scenes).
    pub rest_density: f32,
    /// XSPH velocity-smoothing coefficient, 0 disables.
    pub viscosity: f32,
    /// Restitution applied when reflecting off SDF geometry.
    pub bounce: f32,
    pub gravity: Vec3,
    /// Per-substep velocity damping fraction in [0, 1).
    pub drag: f32,
    /// Particles emitted per second at the active emitter.
    pub emission_rate: f32,
    /// Fixed substeps per playback frame.
    pub substeps: u32,
    /// Density constraint iterations per substep.
    pub solver_iterations: u32,
}

impl Default for FluidSystemConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            radius: 0.1,
            rest_density: 1000.0,
            viscosity: 0.1,
            bounce: 0.3,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            drag: 0.01,
            emission_rate: 1000.0,
            substeps: 2,
            solver_iterations: 4,
        }
    }
}

impl FluidSystemConfig {
    /// Substep count with the degenerate zero guarded away.
    pub fn substeps(&self) -> u32 {
        self.substeps.max(1)
    }

    /// Solver iteration count with the degenerate zero guarded away.
    pub fn solver_iterations(&self) -> u32 {
        self.solver_iterations.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_sane() {
        let c = FluidSystemConfig::default();
        assert!(c.capacity > 0);
        assert!(c.radius > 0.0);
        assert!(c.rest_density > 0.0);
        assert!(c.drag >= 0.0 && c.drag < 1.0);
        assert!(c.substeps() >= 1);
        assert!(c.solver_iterations() >= 1);
    }

    #[test]
    fn test_zero_counts_are_guarded() {
        let c = FluidSystemConfig {
            substeps: 0,
            solver_iterations: 0,
            ..Default::default()
        };
        assert_eq!(c.substeps(), 1);
        assert_eq!(c.solver_iterations(), 1);
    }
}
