//! Silt - GPU particle fluid simulation core
//!
//! Position-Based-Fluids (PBF) solver running entirely in compute shaders:
//! - Fixed-capacity particle arena with append-only emission
//! - Lock-free uniform spatial hash grid, rebuilt every substep
//! - Signed-distance-field collision against arbitrary triangle meshes
//! - Deterministic fixed-substep time stepping with scrub-to-frame replay
//!
//! This crate is framework-agnostic - it handles simulation only. The host
//! application owns scene data (meshes, transforms, emitter objects) and
//! reaches it through the [`SceneHost`] trait; rendering consumes particle
//! positions via the async readback API on [`FluidSystem`].

pub mod config;
pub mod context;
pub mod kernels;
pub mod sdf;
pub mod solver;
pub mod stepper;
pub mod system;

pub use config::{FluidSystemConfig, FluidSystemId, ObjectId};
pub use context::{ComputeContext, ComputeError};
pub use kernels::Kernels;
pub use sdf::{build_sdf, Sdf, SdfKey, TriangleMesh, SDF_RESOLUTION};
pub use solver::params::MAX_SPEED;
pub use solver::PbfSolver;
pub use stepper::{EmissionAccumulator, TimeStepper, PLAYBACK_FPS};
pub use system::{FluidSystem, FluidSystems, SceneHost};
