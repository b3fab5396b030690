//! Host-facing fluid system entities and their registry.
//!
//! Each scene fluid entity owns one [`FluidSystem`]: a solver instance plus
//! the deterministic playback clock and emission accounting driving it. The
//! host reaches scene data (collision meshes, emitter transforms) through
//! the [`SceneHost`] trait; nothing in this module touches scene storage
//! directly, and there is no ambient/global solver state - systems live in
//! an explicit [`FluidSystems`] registry keyed by id.

use crate::config::{FluidSystemConfig, FluidSystemId, ObjectId};
use crate::context::ComputeContext;
use crate::sdf::{build_sdf, Sdf, SdfKey, TriangleMesh};
use crate::solver::PbfSolver;
use crate::stepper::{EmissionAccumulator, TimeStepper, PLAYBACK_FPS};
use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

/// The solver's window into host scene data.
pub trait SceneHost {
    /// Triangle geometry and world transform for a collision object.
    fn renderable_mesh(&self, object: ObjectId) -> Option<(TriangleMesh, Mat4)>;

    /// Current world position of an object (used to place the emitter).
    fn world_position(&self, object: ObjectId) -> Option<Vec3>;
}

/// One simulated fluid entity.
pub struct FluidSystem {
    ctx: ComputeContext,
    solver: PbfSolver,
    stepper: TimeStepper,
    emission: EmissionAccumulator,
    emitter: Option<ObjectId>,
    sdf_key: Option<SdfKey>,
}

impl FluidSystem {
    pub fn new(ctx: &ComputeContext, config: &FluidSystemConfig) -> Self {
        Self {
            ctx: ctx.clone(),
            solver: PbfSolver::new(ctx, config.capacity),
            stepper: TimeStepper::default(),
            emission: EmissionAccumulator::default(),
            emitter: None,
            sdf_key: None,
        }
    }

    /// Select the scene object whose position seeds emitted particles.
    pub fn set_emitter(&mut self, object: Option<ObjectId>) {
        self.emitter = object;
    }

    /// Point the system at a collision object, rebuilding the SDF only when
    /// the (object, geometry version, transform) key changed.
    pub fn set_collider(&mut self, object: ObjectId, geometry_version: u64, host: &dyn SceneHost) {
        let Some((mesh, transform)) = host.renderable_mesh(object) else {
            log::warn!("collider {object:?} has no renderable mesh; collision disabled");
            self.sdf_key = None;
            self.solver.set_sdf(None);
            return;
        };

        let key = SdfKey::new(object, geometry_version, &transform);
        if self.sdf_key == Some(key) {
            return;
        }

        log::info!("rebuilding SDF for collider {object:?} (version {geometry_version})");
        self.sdf_key = Some(key);
        self.solver.set_sdf(build_sdf(&mesh, &transform));
    }

    /// Remove the collision volume; particles pass through freely.
    pub fn clear_collider(&mut self) {
        self.sdf_key = None;
        self.solver.set_sdf(None);
    }

    /// Install a prebuilt SDF directly (bypasses the cache key).
    pub fn set_sdf(&mut self, sdf: Option<Sdf>) {
        self.sdf_key = None;
        self.solver.set_sdf(sdf);
    }

    /// Activate up to `count` particles at `world_pos`; returns how many
    /// were actually emitted after the capacity clamp.
    pub fn emit(&mut self, count: u32, world_pos: Vec3) -> u32 {
        self.solver.emit(count, world_pos)
    }

    /// Forward playback: accrue `dt_frame` of wall-clock time and run the
    /// whole simulation frames it covers.
    pub fn step(&mut self, config: &FluidSystemConfig, dt_frame: f32, host: &dyn SceneHost) {
        self.ensure_capacity(config);
        let frames = self.stepper.advance(dt_frame);
        self.run_frames(config, frames, host);
    }

    /// Deterministic replay: rebuild particle state for `frame` by stepping
    /// from an empty arena. Same config + same frame index reproduces
    /// bit-identical state.
    pub fn scrub_to_frame(&mut self, config: &FluidSystemConfig, frame: u64, host: &dyn SceneHost) {
        self.ensure_capacity(config);
        self.solver.reset();
        self.emission.reset();
        self.stepper.reset();
        self.run_frames(config, frame, host);
    }

    fn run_frames(&mut self, config: &FluidSystemConfig, frames: u64, host: &dyn SceneHost) {
        let substeps = config.substeps();
        let dt = (1.0 / PLAYBACK_FPS) / substeps as f32;

        for _ in 0..frames {
            for _ in 0..substeps {
                let spawn = self.emission.accrue(config.emission_rate, dt);
                if spawn > 0 {
                    if let Some(pos) = self.emitter.and_then(|obj| host.world_position(obj)) {
                        self.solver.emit(spawn, pos);
                    }
                }
                self.solver.substep(config, dt);
            }
            self.stepper.complete_frame();
        }
    }

    /// Discard and rebuild the solver when the configured capacity changed.
    fn ensure_capacity(&mut self, config: &FluidSystemConfig) {
        let capacity = config.capacity.max(1);
        if self.solver.capacity() == capacity {
            return;
        }
        log::info!(
            "fluid capacity changed ({} -> {}); rebuilding solver",
            self.solver.capacity(),
            capacity
        );
        let mut solver = PbfSolver::new(&self.ctx, capacity);
        // Carry the collision volume over; particle state is discarded.
        solver.set_sdf(self.solver.sdf().cloned());
        self.solver = solver;
        self.emission.reset();
    }

    pub fn alive_count(&self) -> u32 {
        self.solver.alive_count()
    }

    /// True when a collision volume is currently installed.
    pub fn has_collision(&self) -> bool {
        self.solver.sdf().is_some()
    }

    /// Index of the next simulation frame.
    pub fn frame(&self) -> u64 {
        self.stepper.frame()
    }

    /// Schedule the async position/velocity snapshot used by rendering.
    pub fn schedule_readback(&mut self) -> bool {
        self.solver.schedule_readback()
    }

    /// Poll the snapshot scheduled earlier; non-blocking, at most one frame
    /// behind the live simulation.
    pub fn try_read(
        &mut self,
        positions_out: &mut [Vec3],
        velocities_out: &mut [Vec3],
    ) -> Option<usize> {
        self.solver.try_read(positions_out, velocities_out)
    }

    /// Blocking position readback for tests and diagnostics.
    pub fn read_positions(&self) -> Vec<Vec3> {
        self.solver.read_positions()
    }

    /// Blocking velocity readback for tests and diagnostics.
    pub fn read_velocities(&self) -> Vec<Vec3> {
        self.solver.read_velocities()
    }
}

/// Registry of live fluid systems, keyed by scene id.
///
/// Holds the injected compute context; when none is available every insert
/// is a logged no-op and the scene simply renders without fluids.
pub struct FluidSystems {
    ctx: Option<ComputeContext>,
    systems: FxHashMap<FluidSystemId, FluidSystem>,
}

impl FluidSystems {
    /// Acquire a headless device and build an empty registry.
    pub fn new() -> Self {
        Self {
            ctx: ComputeContext::new(),
            systems: FxHashMap::default(),
        }
    }

    /// Build a registry around an existing context (shared with rendering).
    pub fn with_context(ctx: ComputeContext) -> Self {
        Self {
            ctx: Some(ctx),
            systems: FxHashMap::default(),
        }
    }

    pub fn has_compute(&self) -> bool {
        self.ctx.is_some()
    }

    /// Create (or replace) the system for `id`. Returns false when compute
    /// is unavailable and the system could not be created.
    pub fn insert(&mut self, id: FluidSystemId, config: &FluidSystemConfig) -> bool {
        match &self.ctx {
            Some(ctx) => {
                self.systems.insert(id, FluidSystem::new(ctx, config));
                true
            }
            None => {
                log::warn!("no compute device; fluid system {id:?} not created");
                false
            }
        }
    }

    pub fn get(&self, id: FluidSystemId) -> Option<&FluidSystem> {
        self.systems.get(&id)
    }

    pub fn get_mut(&mut self, id: FluidSystemId) -> Option<&mut FluidSystem> {
        self.systems.get_mut(&id)
    }

    pub fn remove(&mut self, id: FluidSystemId) -> bool {
        self.systems.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

impl Default for FluidSystems {
    fn default() -> Self {
        Self::new()
    }
}
