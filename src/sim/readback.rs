//! Grid download/upload between device and host.
//!
//! Downloads stage through a mapped buffer with 256-byte row alignment;
//! uploads go straight through `write_texture`. Used by diagnostics and by
//! the test suite to seed synthetic fields.

use super::grid::Grid;
use super::{BuildError, GpuContext};

const ROW_ALIGN: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Read a grid's contents back as tightly packed floats,
/// `width * height * channels` long, row-major from texel (0, 0).
pub fn read_grid(ctx: &GpuContext, grid: &Grid) -> Result<Vec<f32>, BuildError> {
    let device = ctx.device();
    let width = grid.width();
    let height = grid.height();
    let bytes_per_texel = (grid.format().channels() * std::mem::size_of::<f32>()) as u32;
    let unpadded_row = width * bytes_per_texel;
    let padded_row = unpadded_row.div_ceil(ROW_ALIGN) * ROW_ALIGN;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Grid Staging Buffer"),
        size: (padded_row * height) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Grid Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: grid.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.queue().submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device.poll(wgpu::PollType::wait_indefinitely()).ok();
    rx.recv().expect("map_async callback dropped")?;

    let mut out = Vec::with_capacity((width * height) as usize * grid.format().channels());
    {
        let data = buffer_slice.get_mapped_range();
        for row in 0..height {
            let start = (row * padded_row) as usize;
            let row_bytes = &data[start..start + unpadded_row as usize];
            out.extend_from_slice(bytemuck::cast_slice::<u8, f32>(row_bytes));
        }
    }
    staging.unmap();

    Ok(out)
}

/// Overwrite a grid's contents with tightly packed floats, as produced by
/// [`read_grid`]. Panics when the slice does not match the grid's size.
pub fn write_grid(ctx: &GpuContext, grid: &Grid, data: &[f32]) {
    let width = grid.width();
    let height = grid.height();
    let channels = grid.format().channels();
    assert_eq!(
        data.len(),
        (width * height) as usize * channels,
        "field data does not match grid dimensions"
    );

    let bytes_per_texel = (channels * std::mem::size_of::<f32>()) as u32;
    ctx.queue().write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: grid.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(data),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * bytes_per_texel),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}
