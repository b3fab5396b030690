//! Headless compute device acquisition.
//!
//! The fluid solver never creates its own device; a [`ComputeContext`] is
//! built once by the application (or test harness) and injected into every
//! solver instance. When no compute-capable adapter exists the context is
//! simply absent and the feature stays disabled - there is no CPU fallback.

use std::sync::mpsc;
use std::sync::Arc;

/// Error type for GPU buffer operations.
#[derive(Debug)]
pub enum ComputeError {
    BufferMapFailed(wgpu::BufferAsyncError),
    ChannelDisconnected,
}

impl std::fmt::Display for ComputeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeError::BufferMapFailed(e) => write!(f, "buffer map failed: {:?}", e),
            ComputeError::ChannelDisconnected => write!(f, "buffer map channel disconnected"),
        }
    }
}

impl std::error::Error for ComputeError {}

/// Wait for a buffer map operation to complete, returning Result instead of panicking.
pub(crate) fn await_buffer_map(
    rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
) -> Result<(), ComputeError> {
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("buffer map failed: {:?}", e);
            Err(ComputeError::BufferMapFailed(e))
        }
        Err(_) => {
            log::error!("buffer map channel disconnected - possible device loss");
            Err(ComputeError::ChannelDisconnected)
        }
    }
}

/// Shared device/queue handle for all fluid solvers.
#[derive(Clone)]
pub struct ComputeContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl ComputeContext {
    /// Acquire a headless compute device.
    ///
    /// Returns `None` when no compatible adapter is present; callers treat
    /// that as "fluid simulation disabled", not as an error.
    pub fn new() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = match pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        )) {
            Some(adapter) => adapter,
            None => {
                log::warn!("no compute adapter found; fluid simulation disabled");
                return None;
            }
        };

        log::info!("fluid compute adapter: {:?}", adapter.get_info());

        let (device, queue) = match pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Fluid Compute Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )) {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("compute device request failed ({e}); fluid simulation disabled");
                return None;
            }
        };

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}
