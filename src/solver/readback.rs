//! Async GPU buffer readback for particle data.
//!
//! Staged, poll-based readback so the render loop can consume simulated
//! positions without stalling the queue. A scheduled copy lands one frame
//! later at the earliest; the returned data is a snapshot, safe to read
//! while the next substep runs.

use crate::context::await_buffer_map;
use std::sync::mpsc;

/// A single staging buffer with async map tracking.
struct StagingBuffer {
    buffer: wgpu::Buffer,
    rx: Option<mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
}

impl StagingBuffer {
    fn new(device: &wgpu::Device, label: &str, size: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            rx: None,
        }
    }

    fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, src: &wgpu::Buffer, byte_size: u64) {
        encoder.copy_buffer_to_buffer(src, 0, &self.buffer, 0, byte_size);
    }

    fn start_map(&mut self) {
        let (tx, rx) = mpsc::channel();
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.rx = Some(rx);
    }

    fn check_ready(&mut self) -> ReadyState {
        if let Some(receiver) = &self.rx {
            match receiver.try_recv() {
                Ok(Ok(())) => {
                    self.rx = None;
                    ReadyState::Ready
                }
                Ok(Err(_)) => {
                    self.rx = None;
                    ReadyState::Failed
                }
                Err(mpsc::TryRecvError::Empty) => ReadyState::Pending,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.rx = None;
                    ReadyState::Failed
                }
            }
        } else {
            ReadyState::Ready
        }
    }

    fn read_vec3(&self, out: &mut [glam::Vec3], count: usize) {
        let data = self.buffer.slice(..).get_mapped_range();
        let slice: &[[f32; 4]] = bytemuck::cast_slice(&data);
        for i in 0..count {
            out[i] = glam::Vec3::new(slice[i][0], slice[i][1], slice[i][2]);
        }
    }

    fn unmap(&self) {
        self.buffer.unmap();
    }
}

#[derive(PartialEq)]
enum ReadyState {
    Ready,
    Pending,
    Failed,
}

/// Staged async readback slot for particle positions and velocities.
pub(crate) struct ReadbackSlot {
    positions: StagingBuffer,
    velocities: StagingBuffer,
    capacity: usize,
    count: usize,
    pending: bool,
}

impl ReadbackSlot {
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let buffer_size = (capacity * std::mem::size_of::<[f32; 4]>()) as u64;
        Self {
            positions: StagingBuffer::new(device, "Fluid Readback Positions", buffer_size),
            velocities: StagingBuffer::new(device, "Fluid Readback Velocities", buffer_size),
            capacity,
            count: 0,
            pending: false,
        }
    }

    /// Schedule an async copy from the live particle buffers.
    ///
    /// Returns false when a readback is already pending or nothing is alive.
    pub fn schedule(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        positions: &wgpu::Buffer,
        velocities: &wgpu::Buffer,
        count: usize,
    ) -> bool {
        if self.pending {
            return false;
        }
        let count = count.min(self.capacity);
        if count == 0 {
            return false;
        }

        let byte_size = (count * std::mem::size_of::<[f32; 4]>()) as u64;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fluid Readback Copy"),
        });
        self.positions.copy_from(&mut encoder, positions, byte_size);
        self.velocities.copy_from(&mut encoder, velocities, byte_size);
        queue.submit(std::iter::once(encoder.finish()));

        self.count = count;
        self.pending = true;
        self.positions.start_map();
        self.velocities.start_map();
        true
    }

    /// Read the staged snapshot if both buffers are mapped.
    ///
    /// Returns None while pending or after a map failure; Some(count) on
    /// success, with that many entries written to each output slice.
    pub fn try_read(
        &mut self,
        positions_out: &mut [glam::Vec3],
        velocities_out: &mut [glam::Vec3],
    ) -> Option<usize> {
        if !self.pending {
            return None;
        }

        let states = [
            self.positions.check_ready(),
            self.velocities.check_ready(),
        ];
        if states.iter().any(|s| *s == ReadyState::Failed) {
            self.pending = false;
            self.positions.unmap();
            self.velocities.unmap();
            log::warn!("fluid readback map failed; dropping snapshot");
            return None;
        }
        if !states.iter().all(|s| *s == ReadyState::Ready) {
            return None;
        }

        let count = self
            .count
            .min(positions_out.len())
            .min(velocities_out.len());

        self.positions.read_vec3(positions_out, count);
        self.positions.unmap();
        self.velocities.read_vec3(velocities_out, count);
        self.velocities.unmap();

        self.pending = false;
        self.count = 0;
        Some(count)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Blocking copy of `count` vec4 entries out of a particle buffer.
///
/// Diagnostics and tests only; returns an empty vec (and logs) on map
/// failure rather than panicking.
pub(crate) fn read_vec3_blocking(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    count: usize,
) -> Vec<glam::Vec3> {
    if count == 0 {
        return Vec::new();
    }
    let byte_size = (count * std::mem::size_of::<[f32; 4]>()) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Fluid Blocking Readback"),
        size: byte_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Fluid Blocking Readback Copy"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, byte_size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    if let Err(e) = await_buffer_map(rx) {
        log::warn!("blocking readback failed: {e}");
        return Vec::new();
    }

    let data = slice.get_mapped_range();
    let raw: &[[f32; 4]] = bytemuck::cast_slice(&data);
    let out = raw.iter().map(|p| glam::Vec3::new(p[0], p[1], p[2])).collect();
    drop(data);
    staging.unmap();
    out
}
