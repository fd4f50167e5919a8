//! Floating-point render-target grids and the two-slot ping-pong arena.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{BuildError, GpuContext};

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique grid identity, used for uniform diffing and for the
/// read/write hazard check. Survives clones of the same grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridId(u64);

/// Channel layout of a grid: one float (divergence, pressure) or four
/// floats (velocity lives in .xy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    Scalar,
    Vector,
}

impl ChannelFormat {
    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            ChannelFormat::Scalar => wgpu::TextureFormat::R32Float,
            ChannelFormat::Vector => wgpu::TextureFormat::Rgba32Float,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            ChannelFormat::Scalar => 1,
            ChannelFormat::Vector => 4,
        }
    }
}

/// A GPU-resident 2D floating-point buffer: a sampled image paired with a
/// render attachment. Owned by the pipeline; recreated (never resized in
/// place) on resize.
#[derive(Clone)]
pub struct Grid {
    width: u32,
    height: u32,
    format: ChannelFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    id: GridId,
}

impl Grid {
    /// Create a grid. Must be called inside the error scopes pushed by
    /// [`create_set`]; allocation failures surface when the scopes close.
    fn new(ctx: &GpuContext, label: &str, width: u32, height: u32, format: ChannelFormat) -> Self {
        let texture = ctx.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            width,
            height,
            format,
            texture,
            view,
            id: GridId(NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ChannelFormat {
        self.format
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    /// Record a clear-to-zero pass for this grid.
    pub(crate) fn record_clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Grid Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
    }
}

/// Descriptor for one grid in a [`create_set`] batch.
pub(crate) struct GridSpec {
    pub label: &'static str,
    pub format: ChannelFormat,
}

/// Allocate a batch of same-sized grids under paired out-of-memory and
/// validation error scopes, then clear them all to zero. Either every grid
/// succeeds or the partial set is dropped and a [`BuildError::GridAllocation`]
/// is returned; nothing is kept.
pub(crate) async fn create_set(
    ctx: &GpuContext,
    width: u32,
    height: u32,
    specs: &[GridSpec],
) -> Result<Vec<Grid>, BuildError> {
    let device = ctx.device();
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let grids: Vec<Grid> = specs
        .iter()
        .map(|spec| Grid::new(ctx, spec.label, width, height, spec.format))
        .collect();

    let validation = ctx.pop_scope().await;
    let oom = ctx.pop_scope().await;
    if let Some(error) = oom.or(validation) {
        return Err(BuildError::GridAllocation {
            width,
            height,
            message: error.to_string(),
        });
    }

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Grid Clear Encoder"),
    });
    for grid in &grids {
        grid.record_clear(&mut encoder);
    }
    ctx.queue().submit(std::iter::once(encoder.finish()));

    Ok(grids)
}

/// Explicit two-slot arena with a flip index: `read()` and `write()` name
/// the current roles, `swap()` flips them. Generic so the orientation
/// algebra is testable without a device.
pub struct GridPair<T> {
    slots: [T; 2],
    flip: usize,
}

impl<T> GridPair<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            flip: 0,
        }
    }

    /// Current read slot.
    pub fn read(&self) -> &T {
        &self.slots[self.flip]
    }

    /// Current write slot.
    pub fn write(&self) -> &T {
        &self.slots[1 - self.flip]
    }

    /// Exchange reader/writer roles.
    pub fn swap(&mut self) {
        self.flip = 1 - self.flip;
    }

    /// Slot by fixed index, ignoring the current orientation.
    pub fn slot(&self, index: usize) -> &T {
        &self.slots[index]
    }
}
