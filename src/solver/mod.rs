//! GPU position-based-fluids solver.
//!
//! Owns every particle and grid buffer for one fluid system. A substep is
//! one command buffer: clear the spatial hash, integrate + hash, iterate
//! the density constraint, apply XSPH viscosity, then resolve collisions
//! against the SDF with restitution. All stages are data-parallel across
//! particles; the per-cell linked-list heads are the only contended
//! resource and are updated with a single atomic exchange.

pub mod params;
pub(crate) mod readback;

use crate::config::FluidSystemConfig;
use crate::context::ComputeContext;
use crate::sdf::Sdf;
use glam::Vec3;
use params::{PbfParams, GRID_CELLS, GRID_DIM, WORKGROUP_SIZE};
use readback::{read_vec3_blocking, ReadbackSlot};
use std::borrow::Cow;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Bytes per particle entry in the vec4-strided buffers.
const VEC4_STRIDE: u64 = 16;

pub struct PbfSolver {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    params_buffer: wgpu::Buffer,

    // Particle arena (SoA)
    positions: wgpu::Buffer,
    prev_positions: wgpu::Buffer,
    velocities: wgpu::Buffer,
    lambdas: wgpu::Buffer,
    deltas: wgpu::Buffer,

    // Spatial hash grid
    cell_heads: wgpu::Buffer,
    cell_next: wgpu::Buffer,

    // Collision volume; a one-element placeholder when absent
    sdf_buffer: wgpu::Buffer,
    sdf: Option<Sdf>,

    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,

    clear_grid_pipeline: wgpu::ComputePipeline,
    integrate_pipeline: wgpu::ComputePipeline,
    solve_lambda_pipeline: wgpu::ComputePipeline,
    solve_delta_pipeline: wgpu::ComputePipeline,
    apply_delta_pipeline: wgpu::ComputePipeline,
    viscosity_pipeline: wgpu::ComputePipeline,
    apply_viscosity_pipeline: wgpu::ComputePipeline,
    collide_pipeline: wgpu::ComputePipeline,

    readback: ReadbackSlot,

    capacity: u32,
    alive: u32,
}

impl PbfSolver {
    pub fn new(ctx: &ComputeContext, capacity: u32) -> Self {
        let device = ctx.device.clone();
        let queue = ctx.queue.clone();
        let capacity = capacity.max(1);

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PBF Params"),
            size: std::mem::size_of::<PbfParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let particle_buffer = |label: &str, stride: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: u64::from(capacity) * stride,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };

        let positions = particle_buffer("PBF Positions", VEC4_STRIDE);
        let prev_positions = particle_buffer("PBF Prev Positions", VEC4_STRIDE);
        let velocities = particle_buffer("PBF Velocities", VEC4_STRIDE);
        let lambdas = particle_buffer("PBF Lambdas", 4);
        let deltas = particle_buffer("PBF Deltas", VEC4_STRIDE);
        let cell_next = particle_buffer("PBF Cell Next", 4);

        let cell_heads = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PBF Cell Heads"),
            size: u64::from(GRID_CELLS) * 4,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let sdf_buffer = Self::placeholder_sdf_buffer(&device);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PBF Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                Self::storage_layout_entry(1, false),
                Self::storage_layout_entry(2, false),
                Self::storage_layout_entry(3, false),
                Self::storage_layout_entry(4, false),
                Self::storage_layout_entry(5, false),
                Self::storage_layout_entry(6, false),
                Self::storage_layout_entry(7, false),
                Self::storage_layout_entry(8, true),
            ],
        });

        let bind_group = Self::create_bind_group(
            &device,
            &bind_group_layout,
            &params_buffer,
            &positions,
            &prev_positions,
            &velocities,
            &lambdas,
            &deltas,
            &cell_heads,
            &cell_next,
            &sdf_buffer,
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PBF Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PBF Kernels"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shaders/pbf.wgsl"))),
        });

        let create_pipeline = |label: &str, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let clear_grid_pipeline = create_pipeline("PBF Clear Grid", "clear_grid");
        let integrate_pipeline = create_pipeline("PBF Integrate", "integrate");
        let solve_lambda_pipeline = create_pipeline("PBF Solve Lambda", "solve_lambda");
        let solve_delta_pipeline = create_pipeline("PBF Solve Delta", "solve_delta");
        let apply_delta_pipeline = create_pipeline("PBF Apply Delta", "apply_delta");
        let viscosity_pipeline = create_pipeline("PBF Viscosity", "viscosity");
        let apply_viscosity_pipeline = create_pipeline("PBF Apply Viscosity", "apply_viscosity");
        let collide_pipeline = create_pipeline("PBF Collide", "collide");

        let readback = ReadbackSlot::new(&device, capacity as usize);

        Self {
            device,
            queue,
            params_buffer,
            positions,
            prev_positions,
            velocities,
            lambdas,
            deltas,
            cell_heads,
            cell_next,
            sdf_buffer,
            sdf: None,
            bind_group_layout,
            bind_group,
            clear_grid_pipeline,
            integrate_pipeline,
            solve_lambda_pipeline,
            solve_delta_pipeline,
            apply_delta_pipeline,
            viscosity_pipeline,
            apply_viscosity_pipeline,
            collide_pipeline,
            readback,
            capacity,
            alive: 0,
        }
    }

    fn storage_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        positions: &wgpu::Buffer,
        prev_positions: &wgpu::Buffer,
        velocities: &wgpu::Buffer,
        lambdas: &wgpu::Buffer,
        deltas: &wgpu::Buffer,
        cell_heads: &wgpu::Buffer,
        cell_next: &wgpu::Buffer,
        sdf: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PBF Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: prev_positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: lambdas.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: deltas.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: cell_heads.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: cell_next.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 8, resource: sdf.as_entire_binding() },
            ],
        })
    }

    fn placeholder_sdf_buffer(device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("PBF SDF Placeholder"),
            contents: bytemuck::bytes_of(&1.0f32),
            usage: wgpu::BufferUsages::STORAGE,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn alive_count(&self) -> u32 {
        self.alive
    }

    pub fn sdf(&self) -> Option<&Sdf> {
        self.sdf.as_ref()
    }

    /// Bulk reset for deterministic replay; buffers keep their contents but
    /// nothing below the watermark survives re-emission.
    pub fn reset(&mut self) {
        self.alive = 0;
    }

    /// Activate up to `count` particles at `world_pos` with zero velocity.
    ///
    /// Returns the number actually emitted after clamping to capacity.
    pub fn emit(&mut self, count: u32, world_pos: Vec3) -> u32 {
        let n = count.min(self.capacity - self.alive);
        if n == 0 {
            return 0;
        }

        let entry = [world_pos.x, world_pos.y, world_pos.z, 0.0f32];
        let spawned: Vec<[f32; 4]> = vec![entry; n as usize];
        let zeros: Vec<[f32; 4]> = vec![[0.0; 4]; n as usize];
        let offset = u64::from(self.alive) * VEC4_STRIDE;

        self.queue
            .write_buffer(&self.positions, offset, bytemuck::cast_slice(&spawned));
        self.queue
            .write_buffer(&self.prev_positions, offset, bytemuck::cast_slice(&spawned));
        self.queue
            .write_buffer(&self.velocities, offset, bytemuck::cast_slice(&zeros));

        self.alive += n;
        n
    }

    /// Install (or clear) the collision volume. The solver owns the SDF
    /// from here on and treats it as read-only during stepping.
    pub fn set_sdf(&mut self, sdf: Option<Sdf>) {
        self.sdf_buffer = match &sdf {
            Some(sdf) => self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("PBF SDF Field"),
                contents: bytemuck::cast_slice(&sdf.field),
                usage: wgpu::BufferUsages::STORAGE,
            }),
            None => Self::placeholder_sdf_buffer(&self.device),
        };
        self.sdf = sdf;
        self.bind_group = Self::create_bind_group(
            &self.device,
            &self.bind_group_layout,
            &self.params_buffer,
            &self.positions,
            &self.prev_positions,
            &self.velocities,
            &self.lambdas,
            &self.deltas,
            &self.cell_heads,
            &self.cell_next,
            &self.sdf_buffer,
        );
    }

    /// Origin of the spatial hash grid: centered on the collision volume
    /// when one is set, on the world origin otherwise.
    fn grid_origin(&self, h: f32) -> Vec3 {
        let half_span = 0.5 * GRID_DIM as f32 * h;
        match &self.sdf {
            Some(sdf) => 0.5 * (sdf.bbox_min + sdf.bbox_max) - Vec3::splat(half_span),
            None => -Vec3::splat(half_span),
        }
    }

    /// Execute one substep of size `dt`: a single submitted command buffer
    /// holding every stage in dependency order.
    pub fn substep(&mut self, config: &FluidSystemConfig, dt: f32) {
        if self.alive == 0 {
            return;
        }

        let params = PbfParams::new(
            config,
            self.alive,
            dt,
            self.grid_origin(config.radius.max(crate::kernels::KERNEL_H_MIN)),
            self.sdf.as_ref(),
        );
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let particle_groups = self.alive.div_ceil(WORKGROUP_SIZE);
        let cell_groups = GRID_CELLS.div_ceil(WORKGROUP_SIZE);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("PBF Substep"),
            });

        self.run_pass(&mut encoder, "PBF: Clear Grid", &self.clear_grid_pipeline, cell_groups);
        self.run_pass(&mut encoder, "PBF: Integrate", &self.integrate_pipeline, particle_groups);

        for _ in 0..config.solver_iterations() {
            self.run_pass(
                &mut encoder,
                "PBF: Solve Lambda",
                &self.solve_lambda_pipeline,
                particle_groups,
            );
            self.run_pass(
                &mut encoder,
                "PBF: Solve Delta",
                &self.solve_delta_pipeline,
                particle_groups,
            );
            self.run_pass(
                &mut encoder,
                "PBF: Apply Delta",
                &self.apply_delta_pipeline,
                particle_groups,
            );
        }

        self.run_pass(&mut encoder, "PBF: Viscosity", &self.viscosity_pipeline, particle_groups);
        self.run_pass(
            &mut encoder,
            "PBF: Apply Viscosity",
            &self.apply_viscosity_pipeline,
            particle_groups,
        );
        self.run_pass(&mut encoder, "PBF: Collide", &self.collide_pipeline, particle_groups);

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn run_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        workgroups: u32,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    /// Schedule the async snapshot copy used by rendering.
    pub fn schedule_readback(&mut self) -> bool {
        self.readback.schedule(
            &self.device,
            &self.queue,
            &self.positions,
            &self.velocities,
            self.alive as usize,
        )
    }

    /// Poll a previously scheduled snapshot. Non-blocking.
    pub fn try_read(
        &mut self,
        positions_out: &mut [Vec3],
        velocities_out: &mut [Vec3],
    ) -> Option<usize> {
        self.readback.try_read(positions_out, velocities_out)
    }

    pub fn readback_pending(&self) -> bool {
        self.readback.is_pending()
    }

    /// Blocking position readback for tests and diagnostics.
    pub fn read_positions(&self) -> Vec<Vec3> {
        read_vec3_blocking(&self.device, &self.queue, &self.positions, self.alive as usize)
    }

    /// Blocking velocity readback for tests and diagnostics.
    pub fn read_velocities(&self) -> Vec<Vec3> {
        read_vec3_blocking(&self.device, &self.queue, &self.velocities, self.alive as usize)
    }
}
