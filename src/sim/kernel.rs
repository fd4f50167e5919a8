//! Compute kernels: one configured GPU pass each.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::binding::{BindingContext, TargetId};
use super::grid::Grid;
use super::mesh::DomainMesh;
use super::shader::ShaderProgram;
use super::uniform::{UniformBag, UniformValue};
use super::{BuildError, GpuContext};

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(0);

/// How a pass combines with its target: overwrite, or accumulate
/// (src-alpha times source, added onto the destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blend {
    #[default]
    Replace,
    Additive,
}

/// Pass output: an off-screen grid, or the externally supplied surface.
#[derive(Clone)]
pub enum Output {
    Grid(Grid),
    Screen,
}

/// Construction-time kernel flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOptions {
    pub blend: Blend,
    /// Join the pass left open by the previous kernel instead of binding
    /// the output anew.
    pub skip_output_bind: bool,
    /// Leave the output bound after the draw so the next kernel can join
    /// the same pass.
    pub skip_output_unbind: bool,
}

/// An immutable binding of shader, domain mesh, uniforms, output and blend
/// mode. Running it issues one GPU pass. Only the uniform bag's values and,
/// for solver kernels, the output reference mutate after construction.
pub struct Kernel {
    id: u64,
    program: ShaderProgram,
    mesh: Rc<DomainMesh>,
    bag: UniformBag,
    output: Output,
    options: KernelOptions,
    pipeline: wgpu::RenderPipeline,
}

impl Kernel {
    pub async fn new(
        ctx: &GpuContext,
        mut program: ShaderProgram,
        mesh: Rc<DomainMesh>,
        bag: UniformBag,
        output: Output,
        options: KernelOptions,
    ) -> Result<Self, BuildError> {
        if let Output::Grid(grid) = &output {
            if bag.grid_ids().contains(&grid.id()) {
                return Err(BuildError::ReadWriteHazard(program.name().to_string()));
            }
        }

        program.prepare(ctx, &bag);

        let mut attributes = Vec::with_capacity(mesh.attributes().len());
        for attribute in mesh.attributes() {
            attributes.push(wgpu::VertexAttribute {
                format: attribute.format,
                offset: attribute.offset,
                shader_location: program.attrib_location(attribute.name)?,
            });
        }

        let target_format = match &output {
            Output::Grid(grid) => grid.format().texture_format(),
            Output::Screen => ctx.surface_format(),
        };
        let blend = match options.blend {
            Blend::Replace => None,
            Blend::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        };

        let device = ctx.device();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", program.name())),
            bind_group_layouts: &[program.bind_layout()],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{} Pipeline", program.name())),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: program.module(),
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: mesh.stride(),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: program.module(),
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: mesh.topology(),
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(error) = ctx.pop_scope().await {
            return Err(BuildError::PipelineBuild {
                name: program.name().to_string(),
                message: error.to_string(),
            });
        }

        Ok(Self {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            program,
            mesh,
            bag,
            output,
            options,
            pipeline,
        })
    }

    /// Issue this kernel's pass: bind the output (or join the open pass),
    /// upload changed uniforms, bind the sampled grids, draw the domain
    /// mesh, then release the output unless the next kernel takes it over.
    pub fn run(&mut self, ctx: &mut BindingContext<'_>) {
        if let Output::Grid(grid) = &self.output {
            debug_assert!(
                !self.bag.grid_ids().contains(&grid.id()),
                "{}: kernel reads its own output",
                self.program.name()
            );
        }

        self.program.upload(ctx.gpu().queue(), &self.bag);
        let bind_group = self.program.bind_group(ctx.gpu(), &self.bag);

        let (view, target) = match &self.output {
            Output::Grid(grid) => (grid.view(), TargetId::Grid(grid.id())),
            Output::Screen => (ctx.screen_view(), TargetId::Screen),
        };
        ctx.begin_pass(view, target, self.options.skip_output_bind);

        ctx.draw(
            self.id,
            &self.pipeline,
            &bind_group,
            self.mesh.buffer(),
            self.mesh.vertex_count(),
        );

        if !self.options.skip_output_unbind {
            ctx.end_pass();
        }
    }

    /// Redirect the pass output; solver kernels alternate this between the
    /// pressure pair's slots. The replacement must share the old format.
    pub fn set_output(&mut self, grid: Grid) {
        match &self.output {
            Output::Grid(old) => debug_assert!(old.format() == grid.format()),
            Output::Screen => panic!("cannot retarget a screen kernel to a grid"),
        }
        self.output = Output::Grid(grid);
    }

    /// Replace one uniform value; rebinding a grid reference picks the
    /// cached texture binding for that grid combination.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.bag.set(name, value);
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }
}
