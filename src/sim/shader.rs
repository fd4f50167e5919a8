//! Shader programs: compilation, uniform upload caching and reflection.

use std::collections::HashMap;

use super::grid::GridId;
use super::uniform::{UniformBag, UniformLayout, UniformValue};
use super::{BuildError, GpuContext};

/// Provider of matched vertex/fragment WGSL text per logical kernel name.
///
/// The pipeline looks every name up before construction; a missing name is
/// a fatal build error.
pub struct ShaderSources {
    vertex: HashMap<&'static str, &'static str>,
    fragment: HashMap<&'static str, &'static str>,
}

impl ShaderSources {
    /// The built-in shader set, embedded at compile time.
    pub fn embedded() -> Self {
        let mut vertex = HashMap::new();
        vertex.insert("kernel", include_str!("shaders/kernel_vs.wgsl"));
        vertex.insert("cursor", include_str!("shaders/cursor_vs.wgsl"));
        vertex.insert("boundary", include_str!("shaders/boundary_vs.wgsl"));

        let mut fragment = HashMap::new();
        fragment.insert("advect", include_str!("shaders/advect_fs.wgsl"));
        fragment.insert("add_force", include_str!("shaders/add_force_fs.wgsl"));
        fragment.insert("divergence", include_str!("shaders/divergence_fs.wgsl"));
        fragment.insert("jacobi", include_str!("shaders/jacobi_fs.wgsl"));
        fragment.insert(
            "subtract_gradient",
            include_str!("shaders/subtract_gradient_fs.wgsl"),
        );
        fragment.insert("visualize", include_str!("shaders/visualize_fs.wgsl"));

        Self { vertex, fragment }
    }

    pub fn vertex(&self, name: &str) -> Result<&'static str, BuildError> {
        self.vertex
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::MissingShaderSource(format!("{name}.vs")))
    }

    pub fn fragment(&self, name: &str) -> Result<&'static str, BuildError> {
        self.fragment
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::MissingShaderSource(format!("{name}.fs")))
    }
}

/// A compiled two-stage program plus its resolved uniform layout, the
/// last-uploaded value cache, and the texture slot/bind group bookkeeping.
pub struct ShaderProgram {
    name: String,
    module: wgpu::ShaderModule,
    attribs: Vec<(String, u32)>,
    layout: UniformLayout,
    buffer: Option<wgpu::Buffer>,
    bind_layout: Option<wgpu::BindGroupLayout>,
    texture_slots: Vec<&'static str>,
    bind_groups: HashMap<Vec<GridId>, wgpu::BindGroup>,
    cached: HashMap<&'static str, UniformValue>,
    uploads: u64,
}

impl ShaderProgram {
    /// Compile a vertex/fragment pair into one module. Compile or link
    /// failure is fatal and carries the device's diagnostic text.
    pub async fn compile(
        ctx: &GpuContext,
        vertex_name: &str,
        fragment_name: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, BuildError> {
        let name = format!("{vertex_name}/{fragment_name}");
        let source = format!("{vertex_source}\n{fragment_source}");

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(error) = ctx.pop_scope().await {
            return Err(BuildError::ShaderCompile {
                name,
                message: error.to_string(),
            });
        }

        let attribs = reflect_vertex_inputs(vertex_source);

        Ok(Self {
            name,
            module,
            attribs,
            layout: UniformLayout::default(),
            buffer: None,
            bind_layout: None,
            texture_slots: Vec::new(),
            bind_groups: HashMap::new(),
            cached: HashMap::new(),
            uploads: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }

    /// Shader location of a vertex attribute. Absence indicates a
    /// mesh/shader mismatch: a configuration bug, fatal at build time.
    pub fn attrib_location(&self, attribute: &str) -> Result<u32, BuildError> {
        self.attribs
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, location)| *location)
            .ok_or_else(|| BuildError::MissingAttribute {
                shader: self.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    /// Resolve the uniform layout and texture slots for a bag, and allocate
    /// the backing uniform buffer and bind group layout. Called once, at
    /// kernel construction.
    pub fn prepare(&mut self, ctx: &GpuContext, bag: &UniformBag) {
        self.layout = UniformLayout::resolve(bag);
        self.texture_slots = bag.grids().map(|(name, _)| name).collect();

        let device = ctx.device();
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Params", self.name)),
            size: self.layout.size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        if !self.texture_slots.is_empty() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
            for slot in 0..self.texture_slots.len() {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 2 + slot as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
            }
        }
        self.bind_layout = Some(device.create_bind_group_layout(
            &wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} Bind Group Layout", self.name)),
                entries: &entries,
            },
        ));
    }

    pub fn bind_layout(&self) -> &wgpu::BindGroupLayout {
        self.bind_layout
            .as_ref()
            .expect("program not prepared before use")
    }

    /// Upload changed uniform values. Each entry is compared against the
    /// last-uploaded value and written only when it differs.
    pub fn upload(&mut self, queue: &wgpu::Queue, bag: &UniformBag) {
        let buffer = self
            .buffer
            .as_ref()
            .expect("program not prepared before use");
        for (name, value) in bag.entries() {
            if value.as_grid().is_some() {
                continue;
            }
            if let Some(previous) = self.cached.get(name) {
                if value.same_as(previous) {
                    continue;
                }
            }
            let offset = self
                .layout
                .offset_of(name)
                .expect("uniform missing from resolved layout");
            queue.write_buffer(buffer, offset, &value.bytes());
            self.cached.insert(name, value.clone());
            self.uploads += 1;
        }
    }

    /// Bind group for the bag's current grid references, cached by grid
    /// identity so texture slots are bound once per distinct combination.
    pub fn bind_group(&mut self, ctx: &GpuContext, bag: &UniformBag) -> wgpu::BindGroup {
        let key = bag.grid_ids();
        if let Some(group) = self.bind_groups.get(&key) {
            return group.clone();
        }

        let buffer = self
            .buffer
            .as_ref()
            .expect("program not prepared before use");
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }];
        let grids: Vec<_> = bag.grids().collect();
        if !grids.is_empty() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(ctx.sampler()),
            });
            for (slot, (_, grid)) in grids.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2 + slot as u32,
                    resource: wgpu::BindingResource::TextureView(grid.view()),
                });
            }
        }
        let group = ctx
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Bind Group", self.name)),
                layout: self.bind_layout(),
                entries: &entries,
            });
        log::trace!(
            "{}: bound {} texture slot(s) for {:?}",
            self.name,
            grids.len(),
            key
        );
        self.bind_groups.insert(key, group.clone());
        group
    }

    /// Number of uniform writes issued so far; the diffing cache keeps this
    /// flat across ticks with unchanged values.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}

/// Extract `(name, location)` for every vertex-stage input of `vs_main`.
///
/// The vertex sources declare their inputs directly in the entry point's
/// parameter list, so scanning that list is sufficient.
fn reflect_vertex_inputs(vertex_source: &str) -> Vec<(String, u32)> {
    let Some(start) = vertex_source.find("fn vs_main(") else {
        return Vec::new();
    };
    let params_start = start + "fn vs_main(".len();
    let Some(params_len) = vertex_source[params_start..].find(')') else {
        return Vec::new();
    };
    let params = &vertex_source[params_start..params_start + params_len];

    let mut inputs = Vec::new();
    let mut rest = params;
    while let Some(at) = rest.find("@location(") {
        rest = &rest[at + "@location(".len()..];
        let Some(close) = rest.find(')') else { break };
        let Ok(location) = rest[..close].trim().parse::<u32>() else {
            break;
        };
        rest = &rest[close + 1..];
        let name: String = rest
            .chars()
            .skip_while(|c| c.is_whitespace())
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            inputs.push((name, location));
        }
    }
    inputs
}
