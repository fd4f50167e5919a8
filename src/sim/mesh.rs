//! Domain meshes - static vertex sets describing where a kernel rasterizes.
//!
//! All coordinates are clip space. Texture v runs opposite to clip y, so the
//! vertex stages map sample positions with a flip; the boundary mesh bakes
//! its inward sample points in clip space and the same flip applies.

use wgpu::util::DeviceExt;

/// One vertex attribute as declared by the mesh. The kernel resolves the
/// shader location by name at build time.
#[derive(Debug, Clone)]
pub struct MeshAttribute {
    pub name: &'static str,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

/// A static vertex set plus the layout information a kernel needs to
/// rasterize it. Derived purely from the resolution; rebuilt on resize.
pub struct DomainMesh {
    buffer: wgpu::Buffer,
    vertex_count: u32,
    stride: u64,
    topology: wgpu::PrimitiveTopology,
    attributes: Vec<MeshAttribute>,
}

impl DomainMesh {
    fn from_vertices(
        device: &wgpu::Device,
        label: &str,
        vertices: &[f32],
        stride: u64,
        topology: wgpu::PrimitiveTopology,
        attributes: Vec<MeshAttribute>,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let floats_per_vertex = stride as usize / std::mem::size_of::<f32>();
        Self {
            buffer,
            vertex_count: (vertices.len() / floats_per_vertex) as u32,
            stride,
            topology,
            attributes,
        }
    }

    /// Full-surface quad: every cell.
    pub fn all_cells(device: &wgpu::Device) -> Self {
        Self::from_vertices(
            device,
            "All Cells Mesh",
            &quad(1.0, 1.0),
            8,
            wgpu::PrimitiveTopology::TriangleList,
            vec![position_attribute()],
        )
    }

    /// Quad inset by one cell on each edge: interior cells only.
    pub fn interior_cells(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let cw = 2.0 / width as f32;
        let ch = 2.0 / height as f32;
        Self::from_vertices(
            device,
            "Interior Cells Mesh",
            &quad(1.0 - cw, 1.0 - ch),
            8,
            wgpu::PrimitiveTopology::TriangleList,
            vec![position_attribute()],
        )
    }

    /// Four line segments covering exactly the one-cell border. Lines sit on
    /// pixel centers (half a cell in from the clip edge) so rasterization
    /// deterministically covers the border cells. Each vertex also carries
    /// the clip position of the cell one step inward, which the boundary
    /// vertex stage uses as the fragment's sample point.
    pub fn boundary_cells(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::from_vertices(
            device,
            "Boundary Cells Mesh",
            &boundary_vertices(width, height),
            16,
            wgpu::PrimitiveTopology::LineList,
            vec![
                position_attribute(),
                MeshAttribute {
                    name: "offset",
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 8,
                },
            ],
        )
    }

    /// Small quad for force injection, sized in simulation cells; the cursor
    /// vertex stage translates it to the pointer position per tick.
    pub fn cursor_quad(device: &wgpu::Device, width: u32, height: u32, radius_cells: f32) -> Self {
        let cw = 2.0 / width as f32;
        let ch = 2.0 / height as f32;
        Self::from_vertices(
            device,
            "Cursor Mesh",
            &quad(radius_cells * cw, radius_cells * ch),
            8,
            wgpu::PrimitiveTopology::TriangleList,
            vec![position_attribute()],
        )
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        self.topology
    }

    pub fn attributes(&self) -> &[MeshAttribute] {
        &self.attributes
    }
}

fn position_attribute() -> MeshAttribute {
    MeshAttribute {
        name: "position",
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
    }
}

/// Boundary vertex data: position.xy then sample.xy per vertex, one line
/// segment per wall. Segments run head-to-tail around the ring so each
/// corner cell is the first fragment of some segment; line rasterization
/// may drop a segment's final fragment, never its first.
fn boundary_vertices(width: u32, height: u32) -> [f32; 32] {
    let cw = 2.0 / width as f32;
    let ch = 2.0 / height as f32;

    #[rustfmt::skip]
    let vertices = [
        // bottom edge left to right, sampling one cell up
        -1.0, -1.0 + ch * 0.5,    -1.0, -1.0 + ch * 1.5,
         1.0, -1.0 + ch * 0.5,     1.0, -1.0 + ch * 1.5,
        // right edge bottom to top, sampling one cell left
         1.0 - cw * 0.5, -1.0,     1.0 - cw * 1.5, -1.0,
         1.0 - cw * 0.5,  1.0,     1.0 - cw * 1.5,  1.0,
        // top edge right to left, sampling one cell down
         1.0,  1.0 - ch * 0.5,     1.0,  1.0 - ch * 1.5,
        -1.0,  1.0 - ch * 0.5,    -1.0,  1.0 - ch * 1.5,
        // left edge top to bottom, sampling one cell right
        -1.0 + cw * 0.5,  1.0,    -1.0 + cw * 1.5,  1.0,
        -1.0 + cw * 0.5, -1.0,    -1.0 + cw * 1.5, -1.0,
    ];
    vertices
}

/// Two-triangle quad centered on the origin with the given half-extents.
fn quad(xscale: f32, yscale: f32) -> [f32; 12] {
    [
        -xscale, yscale, //
        -xscale, -yscale, //
        xscale, -yscale, //
        -xscale, yscale, //
        xscale, -yscale, //
        xscale, yscale, //
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_spans_expected_extent() {
        let v = quad(0.5, 0.25);
        let xs: Vec<f32> = v.iter().step_by(2).copied().collect();
        let ys: Vec<f32> = v.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(xs.iter().cloned().fold(f32::MIN, f32::max), 0.5);
        assert_eq!(xs.iter().cloned().fold(f32::MAX, f32::min), -0.5);
        assert_eq!(ys.iter().cloned().fold(f32::MIN, f32::max), 0.25);
        assert_eq!(ys.iter().cloned().fold(f32::MAX, f32::min), -0.25);
    }

    #[test]
    fn interior_quad_is_inset_one_cell() {
        // At 8x4 one cell is 2/8 = 0.25 wide and 2/4 = 0.5 tall in clip
        // space; the interior quad loses half a cell per side of each axis.
        let v = quad(1.0 - 2.0 / 8.0, 1.0 - 2.0 / 4.0);
        assert_eq!(v[4], 0.75);
        assert_eq!(v[5], -0.5);
    }

    /// Boundary vertices sit half a cell in from the clip edge and sample
    /// exactly one cell further inward, perpendicular to their wall.
    #[test]
    fn boundary_sample_points_are_one_cell_inward() {
        let (w, h) = (8u32, 4u32);
        let cw = 2.0 / w as f32;
        let ch = 2.0 / h as f32;
        let verts = boundary_vertices(w, h);
        assert_eq!(verts.len(), 32);

        for vertex in verts.chunks(4) {
            let (px, py, sx, sy) = (vertex[0], vertex[1], vertex[2], vertex[3]);
            let (dx, dy) = (sx - px, sy - py);
            // One axis moves exactly one cell inward, the other not at all.
            let horizontal_wall = dx == 0.0;
            if horizontal_wall {
                assert!((dy.abs() - ch).abs() < 1e-6, "dy = {dy}");
                // Inward means toward the center.
                assert_eq!(dy > 0.0, py < 0.0);
            } else {
                assert_eq!(dy, 0.0);
                assert!((dx.abs() - cw).abs() < 1e-6, "dx = {dx}");
                assert_eq!(dx > 0.0, px < 0.0);
            }
            // Line positions sit half a cell in from the clip edge on the
            // perpendicular axis.
            if horizontal_wall {
                assert!((py.abs() - (1.0 - ch * 0.5)).abs() < 1e-6);
            } else {
                assert!((px.abs() - (1.0 - cw * 0.5)).abs() < 1e-6);
            }
        }
    }
}
