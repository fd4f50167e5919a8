//! GPU context - device acquisition and shared sampler state.

use super::BuildError;

/// Device features the pipeline cannot run without: bilinear sampling of
/// float grids (semi-Lagrangian advection) and additive blending into the
/// Rgba32Float velocity target (force injection).
pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::FLOAT32_FILTERABLE;

/// Owned GPU context: device, queue, the shared bilinear sampler every
/// kernel samples grids through, and the format of the visible surface the
/// visualize pass targets.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    surface_format: wgpu::TextureFormat,
}

impl GpuContext {
    /// Build a context from an already-acquired device, as the windowed
    /// binary does after choosing a surface-compatible adapter.
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Grid Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            device,
            queue,
            sampler,
            surface_format,
        }
    }

    /// Acquire a device without a window, for tests and offline runs.
    pub async fn headless(surface_format: wgpu::TextureFormat) -> Result<Self, BuildError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| BuildError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Stable Fluids Device"),
                required_features: REQUIRED_FEATURES,
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        Ok(Self::from_device(device, queue, surface_format))
    }

    /// Create an offscreen texture usable as the "screen" for headless runs.
    pub fn offscreen_target(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    /// Close the error scope opened by `push_error_scope`, blocking until
    /// the device has processed outstanding work.
    pub(crate) async fn pop_scope(&self) -> Option<wgpu::Error> {
        let scope = self.device.pop_error_scope();
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        scope.await
    }
}
