//! Explicit GPU binding state threaded through every kernel run.
//!
//! One `BindingContext` lives for exactly one tick: it owns the command
//! encoder, tracks which render pass is open and on which target, and
//! suppresses redundant pipeline binds. Everything submitted in `finish()`
//! executes in recording order.

use super::grid::GridId;
use super::GpuContext;

/// Identity of a pass's output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetId {
    Grid(GridId),
    Screen,
}

struct OpenPass {
    pass: wgpu::RenderPass<'static>,
    target: TargetId,
    last_kernel: Option<u64>,
}

/// Per-tick binding state. Kernels never touch the encoder directly; they
/// describe their pass and draw through this context.
pub struct BindingContext<'a> {
    gpu: &'a GpuContext,
    encoder: Option<wgpu::CommandEncoder>,
    open: Option<OpenPass>,
    screen: Option<&'a wgpu::TextureView>,
    passes_issued: u32,
}

impl<'a> BindingContext<'a> {
    pub fn new(gpu: &'a GpuContext, screen: Option<&'a wgpu::TextureView>) -> Self {
        let encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tick Encoder"),
            });
        Self {
            gpu,
            encoder: Some(encoder),
            open: None,
            screen,
            passes_issued: 0,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        self.gpu
    }

    /// The externally supplied visible surface for screen-targeted kernels.
    /// Borrows from the tick, not from this context, so it can be passed
    /// back into `begin_pass`.
    pub fn screen_view(&self) -> &'a wgpu::TextureView {
        self.screen
            .expect("no screen target supplied for this tick")
    }

    /// Open a render pass on `target`, or join the one already open there.
    ///
    /// With `reuse` the caller declares it expects the previous kernel's
    /// pass to still be bound to the same target; any mismatch is a
    /// sequencing bug in pipeline construction, not a runtime condition.
    pub fn begin_pass(&mut self, view: &wgpu::TextureView, target: TargetId, reuse: bool) {
        if reuse {
            let open = self
                .open
                .as_ref()
                .unwrap_or_else(|| panic!("no pass open to reuse for {target:?}"));
            assert_eq!(
                open.target, target,
                "pass reuse bound to a different target"
            );
            return;
        }

        // An open pass left behind by a skip_output_unbind kernel is closed
        // by the next kernel that binds its own output.
        self.end_pass();

        let encoder = self.encoder.as_mut().expect("context already finished");
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Kernel Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            })
            .forget_lifetime();
        self.open = Some(OpenPass {
            pass,
            target,
            last_kernel: None,
        });
        self.passes_issued += 1;
    }

    /// Record one kernel's draw into the open pass. The pipeline bind is
    /// skipped when the same kernel drew last in this pass.
    pub fn draw(
        &mut self,
        kernel_id: u64,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        vertices: &wgpu::Buffer,
        vertex_count: u32,
    ) {
        let open = self.open.as_mut().expect("draw without an open pass");
        if open.last_kernel != Some(kernel_id) {
            open.pass.set_pipeline(pipeline);
            open.last_kernel = Some(kernel_id);
        }
        open.pass.set_bind_group(0, bind_group, &[]);
        open.pass.set_vertex_buffer(0, vertices.slice(..));
        open.pass.draw(0..vertex_count, 0..1);
    }

    /// Close the open pass, restoring "no target bound". No-op when none is.
    pub fn end_pass(&mut self) {
        self.open = None;
    }

    /// Number of passes opened so far this tick.
    pub fn passes_issued(&self) -> u32 {
        self.passes_issued
    }

    /// Close any open pass and submit the tick's work to the queue.
    pub fn finish(mut self) {
        self.end_pass();
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue().submit(std::iter::once(encoder.finish()));
        }
    }
}
