//! The per-tick sequencer: fixed kernel order, the Jacobi pressure loop
//! with ping-pong swapping, pointer-driven force injection, and the full
//! rebuild on resize.

use std::rc::Rc;

use crate::schema::FluidConfig;

use super::binding::BindingContext;
use super::grid::{self, ChannelFormat, Grid, GridPair, GridSpec};
use super::kernel::{Blend, Kernel, KernelOptions, Output};
use super::mesh::DomainMesh;
use super::readback;
use super::shader::{ShaderProgram, ShaderSources};
use super::uniform::{UniformBag, UniformValue};
use super::{BuildError, GpuContext, ResizeError};

/// Fixed stencil coefficients of the Jacobi pressure relaxation.
const JACOBI_ALPHA: f32 = -1.0;
const JACOBI_BETA: f32 = 0.25;

/// Wall reflection scale for velocity boundary passes; pressure boundaries
/// copy their neighbor unscaled (Neumann).
const REFLECT: f32 = -1.0;

/// Pointer state sampled once per tick, in surface-local pixel coordinates.
/// The pipeline derives the per-tick delta itself.
#[derive(Debug, Clone, Copy)]
pub struct PointerSample {
    pub x: f32,
    pub y: f32,
    pub down: bool,
}

/// The fluid pipeline: grids, meshes and kernels for one resolution, plus
/// the configuration and pointer bookkeeping that survive resizes.
pub struct FluidPipeline {
    ctx: GpuContext,
    config: FluidConfig,
    sources: ShaderSources,
    surface_size: (u32, u32),
    passes: Option<Passes>,
    pointer_last: Option<(f32, f32)>,
}

impl FluidPipeline {
    /// Build every grid, mesh and kernel for the given surface size. All
    /// fatal conditions (missing shader source, compile failure, allocation
    /// failure, attribute mismatch) surface here, never mid-tick.
    pub async fn new(
        ctx: GpuContext,
        config: FluidConfig,
        sources: ShaderSources,
        surface_size: (u32, u32),
    ) -> Result<Self, BuildError> {
        config.validate()?;
        let passes = Passes::build(&ctx, &config, &sources, surface_size).await?;
        Ok(Self {
            ctx,
            config,
            sources,
            surface_size,
            passes: Some(passes),
            pointer_last: None,
        })
    }

    /// Advance the simulation by `dt` seconds and draw it to `screen`.
    ///
    /// A non-positive or non-finite `dt` skips the tick entirely; no grid
    /// is touched. Ticks on a pipeline whose last resize failed are no-ops.
    pub fn tick(&mut self, dt: f32, pointer: PointerSample, screen: &wgpu::TextureView) {
        if !(dt.is_finite() && dt > 0.0) {
            log::trace!("skipping tick, invalid dt {dt}");
            return;
        }
        let Some(passes) = self.passes.as_mut() else {
            log::trace!("skipping tick, pipeline has no grids");
            return;
        };

        let delta = match self.pointer_last {
            Some((x0, y0)) => (pointer.x - x0, pointer.y - y0),
            None => (0.0, 0.0),
        };
        self.pointer_last = Some((pointer.x, pointer.y));

        let mut ctx = BindingContext::new(&self.ctx, Some(screen));
        passes.run_tick(&mut ctx, &self.config, dt, pointer, delta, self.surface_size);
        ctx.finish();
    }

    /// Advance by the configured fixed timestep, for drivers without their
    /// own per-frame dt.
    pub fn step(&mut self, pointer: PointerSample, screen: &wgpu::TextureView) {
        self.tick(self.config.timestep, pointer, screen)
    }

    /// Rebuild everything at a new surface size. The previous grids are
    /// freed before the new set is built; on failure nothing is kept and
    /// ticks become no-ops until a later resize succeeds. Callers debounce
    /// resize bursts so each yields at most one rebuild.
    pub async fn resize(&mut self, width: u32, height: u32) -> Result<(), ResizeError> {
        self.passes = None;
        self.pointer_last = None;
        self.surface_size = (width, height);
        match Passes::build(&self.ctx, &self.config, &self.sources, (width, height)).await {
            Ok(passes) => {
                let (w, h) = (passes.width, passes.height);
                self.passes = Some(passes);
                log::debug!("rebuilt pipeline at {w}x{h}");
                Ok(())
            }
            Err(source) => {
                log::error!("resize to {width}x{height} failed: {source}");
                Err(ResizeError {
                    width,
                    height,
                    source,
                })
            }
        }
    }

    /// Whether the pipeline currently holds grids (false after a failed
    /// resize).
    pub fn is_operational(&self) -> bool {
        self.passes.is_some()
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    /// Simulation grid size, after the resolution scale.
    pub fn simulation_size(&self) -> Option<(u32, u32)> {
        self.passes.as_ref().map(|p| (p.width, p.height))
    }

    /// The velocity grid holding the last completed tick's output.
    pub fn velocity(&self) -> Option<&Grid> {
        self.passes.as_ref().map(|p| p.velocity.read())
    }

    /// The pressure grid holding the last solve's converged field.
    pub fn pressure(&self) -> Option<&Grid> {
        self.passes.as_ref().map(|p| p.pressure.read())
    }

    pub fn divergence(&self) -> Option<&Grid> {
        self.passes.as_ref().map(|p| &p.divergence)
    }

    /// Mean absolute discrete divergence of the current velocity field,
    /// computed host-side from a readback. Diagnostic only.
    pub fn mean_abs_divergence(&self) -> Result<f32, BuildError> {
        let passes = self
            .passes
            .as_ref()
            .expect("pipeline has no grids to read");
        let field = readback::read_grid(&self.ctx, passes.velocity.read())?;
        Ok(mean_abs_divergence_of(&field, passes.width, passes.height))
    }
}

/// Everything owned at one resolution: destroyed wholesale and rebuilt on
/// resize, so no state survives.
struct Passes {
    width: u32,
    height: u32,
    velocity: GridPair<Grid>,
    pressure: GridPair<Grid>,
    divergence: Grid,
    advect: Kernel,
    add_force: Kernel,
    advect_boundary: Kernel,
    divergence_kernel: Kernel,
    jacobi: Kernel,
    jacobi_boundary: Kernel,
    project: Kernel,
    project_boundary: Kernel,
    visualize: Kernel,
}

impl Passes {
    async fn build(
        ctx: &GpuContext,
        config: &FluidConfig,
        sources: &ShaderSources,
        surface_size: (u32, u32),
    ) -> Result<Self, BuildError> {
        let (width, height) = simulation_size(surface_size, config.resolution_scale);
        let px = [1.0 / width as f32, 1.0 / height as f32];
        let px1 = [1.0, width as f32 / height as f32];

        let mut grids = grid::create_set(
            ctx,
            width,
            height,
            &[
                GridSpec {
                    label: "Velocity Front",
                    format: ChannelFormat::Vector,
                },
                GridSpec {
                    label: "Velocity Back",
                    format: ChannelFormat::Vector,
                },
                GridSpec {
                    label: "Divergence",
                    format: ChannelFormat::Scalar,
                },
                GridSpec {
                    label: "Pressure 0",
                    format: ChannelFormat::Scalar,
                },
                GridSpec {
                    label: "Pressure 1",
                    format: ChannelFormat::Scalar,
                },
            ],
        )
        .await?
        .into_iter();
        let v_front = grids.next().unwrap();
        let v_back = grids.next().unwrap();
        let divergence = grids.next().unwrap();
        let p0 = grids.next().unwrap();
        let p1 = grids.next().unwrap();

        let device = ctx.device();
        let all = Rc::new(DomainMesh::all_cells(device));
        let interior = Rc::new(DomainMesh::interior_cells(device, width, height));
        let boundary = Rc::new(DomainMesh::boundary_cells(device, width, height));
        let cursor_cells = config.cursor_size * config.resolution_scale;
        let cursor = Rc::new(DomainMesh::cursor_quad(device, width, height, cursor_cells));
        // Cursor half-radius in clip units; the cursor stage divides by this
        // to hand the falloff local coordinates in [-2, 2].
        let cursor_clip = [
            cursor_cells / width as f32,
            cursor_cells / height as f32,
        ];

        let advect = Kernel::new(
            ctx,
            compile_program(ctx, sources, "kernel", "advect").await?,
            interior.clone(),
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("px1", UniformValue::Vec2(px1))
                .with("scale", UniformValue::Scalar(1.0))
                .with("dt", UniformValue::Scalar(config.timestep))
                .with("velocity", UniformValue::Grid(v_front.clone()))
                .with("source", UniformValue::Grid(v_front.clone())),
            Output::Grid(v_back.clone()),
            KernelOptions::default(),
        )
        .await?;

        let add_force = Kernel::new(
            ctx,
            compile_program(ctx, sources, "cursor", "add_force").await?,
            cursor,
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("force", UniformValue::Vec2([0.0, 0.0]))
                .with("center", UniformValue::Vec2([0.0, 0.0]))
                .with("scale", UniformValue::Vec2(cursor_clip)),
            Output::Grid(v_back.clone()),
            KernelOptions {
                blend: Blend::Additive,
                ..Default::default()
            },
        )
        .await?;

        let advect_boundary = Kernel::new(
            ctx,
            compile_program(ctx, sources, "boundary", "advect").await?,
            boundary.clone(),
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("px1", UniformValue::Vec2(px1))
                .with("scale", UniformValue::Scalar(REFLECT))
                .with("dt", UniformValue::Scalar(config.timestep))
                .with("velocity", UniformValue::Grid(v_front.clone()))
                .with("source", UniformValue::Grid(v_front.clone())),
            Output::Grid(v_back.clone()),
            KernelOptions::default(),
        )
        .await?;

        let divergence_kernel = Kernel::new(
            ctx,
            compile_program(ctx, sources, "kernel", "divergence").await?,
            all.clone(),
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("velocity", UniformValue::Grid(v_back.clone())),
            Output::Grid(divergence.clone()),
            KernelOptions::default(),
        )
        .await?;

        let jacobi = Kernel::new(
            ctx,
            compile_program(ctx, sources, "kernel", "jacobi").await?,
            all.clone(),
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("alpha", UniformValue::Scalar(JACOBI_ALPHA))
                .with("beta", UniformValue::Scalar(JACOBI_BETA))
                .with("pressure", UniformValue::Grid(p0.clone()))
                .with("divergence", UniformValue::Grid(divergence.clone())),
            Output::Grid(p1.clone()),
            KernelOptions {
                skip_output_unbind: true,
                ..Default::default()
            },
        )
        .await?;

        let jacobi_boundary = Kernel::new(
            ctx,
            compile_program(ctx, sources, "boundary", "jacobi").await?,
            boundary.clone(),
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("alpha", UniformValue::Scalar(JACOBI_ALPHA))
                .with("beta", UniformValue::Scalar(JACOBI_BETA))
                .with("pressure", UniformValue::Grid(p0.clone()))
                .with("divergence", UniformValue::Grid(divergence.clone())),
            Output::Grid(p1.clone()),
            KernelOptions {
                skip_output_bind: true,
                skip_output_unbind: true,
                ..Default::default()
            },
        )
        .await?;

        let project = Kernel::new(
            ctx,
            compile_program(ctx, sources, "kernel", "subtract_gradient").await?,
            interior,
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("scale", UniformValue::Scalar(1.0))
                .with("pressure", UniformValue::Grid(p0.clone()))
                .with("velocity", UniformValue::Grid(v_back.clone())),
            Output::Grid(v_front.clone()),
            KernelOptions::default(),
        )
        .await?;

        let project_boundary = Kernel::new(
            ctx,
            compile_program(ctx, sources, "boundary", "subtract_gradient").await?,
            boundary,
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("scale", UniformValue::Scalar(REFLECT))
                .with("pressure", UniformValue::Grid(p0.clone()))
                .with("velocity", UniformValue::Grid(v_back.clone())),
            Output::Grid(v_front.clone()),
            KernelOptions::default(),
        )
        .await?;

        let visualize = Kernel::new(
            ctx,
            compile_program(ctx, sources, "kernel", "visualize").await?,
            all,
            UniformBag::new()
                .with("px", UniformValue::Vec2(px))
                .with("velocity", UniformValue::Grid(v_front.clone()))
                .with("pressure", UniformValue::Grid(p0.clone())),
            Output::Screen,
            KernelOptions::default(),
        )
        .await?;

        log::info!("built fluid pipeline at {width}x{height}");

        Ok(Self {
            width,
            height,
            velocity: GridPair::new(v_front, v_back),
            pressure: GridPair::new(p0, p1),
            divergence,
            advect,
            add_force,
            advect_boundary,
            divergence_kernel,
            jacobi,
            jacobi_boundary,
            project,
            project_boundary,
            visualize,
        })
    }

    /// One tick in fixed order: advect, inject, velocity boundary,
    /// divergence, the Jacobi loop, projection and its boundary, visualize.
    fn run_tick(
        &mut self,
        ctx: &mut BindingContext<'_>,
        config: &FluidConfig,
        dt: f32,
        pointer: PointerSample,
        delta: (f32, f32),
        surface_size: (u32, u32),
    ) {
        self.advect.set_uniform("dt", UniformValue::Scalar(dt));
        self.advect_boundary.set_uniform("dt", UniformValue::Scalar(dt));
        self.advect.run(ctx);

        // Window-space y grows downward, as does texture v, so the force
        // delta carries over without a flip; only the clip-space center
        // needs one.
        if pointer.down && delta != (0.0, 0.0) {
            let force = force_vector(delta, (self.width, self.height), config);
            let center = pointer_to_clip((pointer.x, pointer.y), surface_size);
            self.add_force.set_uniform("force", UniformValue::Vec2(force));
            self.add_force.set_uniform("center", UniformValue::Vec2(center));
            self.add_force.run(ctx);
        }

        self.advect_boundary.run(ctx);

        self.divergence_kernel.run(ctx);

        for _ in 0..config.iterations {
            let read = self.pressure.read().clone();
            let write = self.pressure.write().clone();
            self.jacobi
                .set_uniform("pressure", UniformValue::Grid(read.clone()));
            self.jacobi.set_output(write.clone());
            self.jacobi_boundary
                .set_uniform("pressure", UniformValue::Grid(read));
            self.jacobi_boundary.set_output(write);

            // The boundary draw joins the interior draw's still-open pass.
            self.jacobi.run(ctx);
            self.jacobi_boundary.run(ctx);
            ctx.end_pass();

            self.pressure.swap();
        }

        let converged = self.pressure.read().clone();
        self.project
            .set_uniform("pressure", UniformValue::Grid(converged.clone()));
        self.project_boundary
            .set_uniform("pressure", UniformValue::Grid(converged.clone()));
        self.visualize
            .set_uniform("pressure", UniformValue::Grid(converged));

        self.project.run(ctx);
        self.project_boundary.run(ctx);

        self.visualize.run(ctx);
    }
}

/// Look both stage sources up and compile them into one program.
async fn compile_program(
    ctx: &GpuContext,
    sources: &ShaderSources,
    vertex: &str,
    fragment: &str,
) -> Result<ShaderProgram, BuildError> {
    ShaderProgram::compile(
        ctx,
        vertex,
        fragment,
        sources.vertex(vertex)?,
        sources.fragment(fragment)?,
    )
    .await
}

/// Simulation grid size for a surface, one cell minimum per axis.
fn simulation_size(surface: (u32, u32), scale: f32) -> (u32, u32) {
    let w = ((surface.0 as f32 * scale).round() as u32).max(1);
    let h = ((surface.1 as f32 * scale).round() as u32).max(1);
    (w, h)
}

/// Pointer position in surface pixels to clip-space cursor center. The
/// mapping is resolution independent: the same surface point lands on the
/// same clip position at any resolution scale.
fn pointer_to_clip(pointer: (f32, f32), surface: (u32, u32)) -> [f32; 2] {
    [
        pointer.0 / surface.0 as f32 * 2.0 - 1.0,
        -(pointer.1 / surface.1 as f32 * 2.0 - 1.0),
    ]
}

/// Injected force from a surface-pixel pointer delta: the delta expressed
/// in simulation cells, scaled by the cursor size (also in cells) and the
/// configured force constant, per cell of grid width.
fn force_vector(delta: (f32, f32), sim_size: (u32, u32), config: &FluidConfig) -> [f32; 2] {
    let cells = config.cursor_size * config.resolution_scale;
    [
        delta.0 * config.resolution_scale / sim_size.0 as f32 * cells * config.mouse_force,
        delta.1 * config.resolution_scale / sim_size.1 as f32 * cells * config.mouse_force,
    ]
}

/// Host-side mean absolute discrete divergence of a four-channel velocity
/// field, with the same central-difference stencil and clamped edges the
/// divergence kernel uses.
pub(crate) fn mean_abs_divergence_of(field: &[f32], width: u32, height: u32) -> f32 {
    let (w, h) = (width as i64, height as i64);
    let sample = |x: i64, y: i64, channel: usize| -> f32 {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        field[(y * w + x) as usize * 4 + channel]
    };

    let mut total = 0.0f32;
    for y in 0..h {
        for x in 0..w {
            let dx = sample(x + 1, y, 0) - sample(x - 1, y, 0);
            let dy = sample(x, y + 1, 1) - sample(x, y - 1, 1);
            total += ((dx + dy) * 0.5).abs();
        }
    }
    total / (w * h) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::readback::{read_grid, write_grid};

    const TEST_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    fn test_config() -> FluidConfig {
        FluidConfig {
            iterations: 40,
            mouse_force: 4.0,
            cursor_size: 1.0,
            resolution_scale: 1.0,
            timestep: 1.0 / 60.0,
        }
    }

    /// Build a pipeline at the given surface size, or None when the host
    /// has no GPU adapter (the test then passes vacuously, as in the rest
    /// of the suite).
    fn build_pipeline(width: u32, height: u32, config: FluidConfig) -> Option<FluidPipeline> {
        let ctx = match pollster::block_on(GpuContext::headless(TEST_FORMAT)) {
            Ok(ctx) => ctx,
            Err(BuildError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                return None;
            }
            Err(e) => panic!("Failed to create GPU context: {e:?}"),
        };
        let pipeline = pollster::block_on(FluidPipeline::new(
            ctx,
            config,
            ShaderSources::embedded(),
            (width, height),
        ))
        .expect("Failed to build pipeline");
        Some(pipeline)
    }

    fn screen_view(pipeline: &FluidPipeline, width: u32, height: u32) -> wgpu::TextureView {
        pipeline
            .gpu()
            .offscreen_target(width, height)
            .create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn idle_pointer() -> PointerSample {
        PointerSample {
            x: 0.0,
            y: 0.0,
            down: false,
        }
    }

    /// Upload a synthetic velocity field into the front grid and return the
    /// packed data for host-side comparison.
    fn seed_velocity(pipeline: &FluidPipeline, f: impl Fn(u32, u32) -> [f32; 2]) -> Vec<f32> {
        let (w, h) = pipeline.simulation_size().unwrap();
        let mut data = vec![0.0f32; (w * h) as usize * 4];
        for y in 0..h {
            for x in 0..w {
                let v = f(x, y);
                let i = ((y * w + x) * 4) as usize;
                data[i] = v[0];
                data[i + 1] = v[1];
            }
        }
        write_grid(pipeline.gpu(), pipeline.velocity().unwrap(), &data);
        data
    }

    #[test]
    fn simulation_size_rounds_and_clamps() {
        assert_eq!(simulation_size((640, 480), 1.0), (640, 480));
        assert_eq!(simulation_size((640, 480), 0.5), (320, 240));
        assert_eq!(simulation_size((3, 3), 0.1), (1, 1));
    }

    #[test]
    fn pointer_maps_to_clip_independent_of_scale() {
        // The clip position depends only on the surface-relative pointer
        // position, not on the simulation resolution.
        assert_eq!(pointer_to_clip((320.0, 240.0), (640, 480)), [0.0, 0.0]);
        assert_eq!(pointer_to_clip((0.0, 0.0), (640, 480)), [-1.0, 1.0]);
        assert_eq!(pointer_to_clip((640.0, 480.0), (640, 480)), [1.0, -1.0]);
    }

    #[test]
    fn force_scales_with_resolution() {
        let full = test_config();
        let half = FluidConfig {
            resolution_scale: 0.5,
            ..full.clone()
        };
        // cursor_size = 1 surface pixel, mouse_force = 4. At full scale over
        // a 4-cell grid a one-pixel drag is one cell: 1 * 1/4 * 1 * 4 = 1.
        let f = force_vector((1.0, 0.0), simulation_size((4, 4), 1.0), &full);
        assert!((f[0] - 1.0).abs() < 1e-6 && f[1] == 0.0);
        // At half scale the same drag covers half a cell of a half-size
        // grid, and the cursor is half a cell wide: 0.5 * 1/2 * 0.5 * 4.
        let f = force_vector((1.0, 0.0), simulation_size((4, 4), 0.5), &half);
        assert!((f[0] - 0.5).abs() < 1e-6);
        // No y flip: window-space and texture-space y both grow downward.
        let f = force_vector((0.0, 2.0), simulation_size((4, 4), 1.0), &full);
        assert!(f[1] > 0.0);
    }

    #[test]
    fn host_divergence_stencil() {
        // Constant field: zero divergence everywhere.
        let constant = vec![1.0f32; 4 * 4 * 4];
        assert_eq!(mean_abs_divergence_of(&constant, 4, 4), 0.0);

        // vx = x has unit divergence away from the clamped edges.
        let mut linear = vec![0.0f32; 4 * 4 * 4];
        for y in 0..4usize {
            for x in 0..4usize {
                linear[(y * 4 + x) * 4] = x as f32;
            }
        }
        assert!(mean_abs_divergence_of(&linear, 4, 4) > 0.5);
    }

    #[test]
    fn builds_at_minimal_resolution() {
        let Some(pipeline) = build_pipeline(4, 4, test_config()) else {
            return;
        };
        assert!(pipeline.is_operational());
        assert_eq!(pipeline.simulation_size(), Some((4, 4)));
    }

    #[test]
    fn invalid_dt_skips_the_tick_entirely() {
        let Some(mut pipeline) = build_pipeline(16, 16, test_config()) else {
            return;
        };
        let view = screen_view(&pipeline, 16, 16);
        seed_velocity(&pipeline, |x, y| [x as f32 * 0.1, y as f32 * 0.2]);

        let velocity_before = read_grid(pipeline.gpu(), pipeline.velocity().unwrap()).unwrap();
        let pressure_before = read_grid(pipeline.gpu(), pipeline.pressure().unwrap()).unwrap();
        let divergence_before = read_grid(pipeline.gpu(), pipeline.divergence().unwrap()).unwrap();

        for dt in [0.0, -0.25, f32::NAN, f32::NEG_INFINITY] {
            pipeline.tick(
                dt,
                PointerSample {
                    x: 8.0,
                    y: 8.0,
                    down: true,
                },
                &view,
            );
        }

        // Bit-identical: no grid was touched.
        assert_eq!(
            read_grid(pipeline.gpu(), pipeline.velocity().unwrap()).unwrap(),
            velocity_before
        );
        assert_eq!(
            read_grid(pipeline.gpu(), pipeline.pressure().unwrap()).unwrap(),
            pressure_before
        );
        assert_eq!(
            read_grid(pipeline.gpu(), pipeline.divergence().unwrap()).unwrap(),
            divergence_before
        );
    }

    #[test]
    fn uniform_uploads_are_diffed_across_ticks() {
        let Some(mut pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        let view = screen_view(&pipeline, 8, 8);

        pipeline.tick(1.0 / 60.0, idle_pointer(), &view);
        let after_first = pipeline.passes.as_ref().unwrap().advect.program().uploads();
        assert!(after_first > 0, "first tick must upload the initial values");

        pipeline.tick(1.0 / 60.0, idle_pointer(), &view);
        let after_second = pipeline.passes.as_ref().unwrap().advect.program().uploads();
        assert_eq!(
            after_first, after_second,
            "identical uniform values must not be re-uploaded"
        );

        // A changed dt is one more upload.
        pipeline.tick(1.0 / 30.0, idle_pointer(), &view);
        let after_third = pipeline.passes.as_ref().unwrap().advect.program().uploads();
        assert_eq!(after_second + 1, after_third);
    }

    /// After the velocity boundary pass, each wall cell holds the negation
    /// of its inward neighbor, independent of the rest of the field.
    #[test]
    fn velocity_boundary_reflects_inward_neighbor() {
        let Some(mut pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        let (w, h) = pipeline.simulation_size().unwrap();
        let seeded = seed_velocity(&pipeline, |x, y| {
            [x as f32 + 1.0, (y as f32 + 1.0) * 10.0]
        });

        let FluidPipeline { ctx, passes, .. } = &mut pipeline;
        let passes = passes.as_mut().unwrap();
        // With dt = 0 the backward trace is the identity and the pass
        // reduces to a pure reflection of the sampled neighbor.
        passes
            .advect_boundary
            .set_uniform("dt", UniformValue::Scalar(0.0));
        let mut binding = BindingContext::new(ctx, None);
        passes.advect_boundary.run(&mut binding);
        binding.finish();

        let out = read_grid(ctx, passes.velocity.write()).unwrap();
        let at = |data: &[f32], x: u32, y: u32, c: usize| data[((y * w + x) * 4) as usize + c];

        for c in 0..2usize {
            for x in 1..w - 1 {
                // Top texture row is the wall at clip y = +1; its neighbor
                // is row 1. Bottom row mirrors that.
                assert!((at(&out, x, 0, c) + at(&seeded, x, 1, c)).abs() < 1e-4);
                assert!((at(&out, x, h - 1, c) + at(&seeded, x, h - 2, c)).abs() < 1e-4);
            }
            for y in 1..h - 1 {
                assert!((at(&out, 0, y, c) + at(&seeded, 1, y, c)).abs() < 1e-4);
                assert!((at(&out, w - 1, y, c) + at(&seeded, w - 2, y, c)).abs() < 1e-4);
            }
        }
    }

    /// The converged pressure field sits in slot 0 after an even number of
    /// iterations and slot 1 after an odd number, and is always the pair's
    /// read slot when the solve finishes.
    #[test]
    fn pressure_slot_identity_follows_iteration_parity() {
        for iterations in [2u32, 3, 4, 7] {
            let config = FluidConfig {
                iterations,
                ..test_config()
            };
            let Some(mut pipeline) = build_pipeline(8, 8, config) else {
                return;
            };
            let view = screen_view(&pipeline, 8, 8);
            let slot_ids = [
                pipeline.passes.as_ref().unwrap().pressure.slot(0).id(),
                pipeline.passes.as_ref().unwrap().pressure.slot(1).id(),
            ];

            pipeline.tick(1.0 / 60.0, idle_pointer(), &view);

            let expected = slot_ids[(iterations % 2) as usize];
            let read = pipeline.pressure().unwrap().id();
            assert_eq!(read, expected, "iterations = {iterations}");
        }
    }

    /// One full tick's projection strictly reduces the mean absolute
    /// divergence of a synthetically divergent velocity field.
    #[test]
    fn projection_reduces_divergence() {
        let Some(mut pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        let view = screen_view(&pipeline, 8, 8);
        seed_velocity(&pipeline, |x, y| {
            [(x as f32 - 3.5) * 0.1, (y as f32 - 3.5) * 0.1]
        });

        pipeline.tick(1.0 / 60.0, idle_pointer(), &view);

        // The divergence grid holds the pre-projection divergence of this
        // tick's velocity field; compare against the projected result.
        let before_data = read_grid(pipeline.gpu(), pipeline.divergence().unwrap()).unwrap();
        let before = before_data.iter().map(|d| d.abs()).sum::<f32>() / before_data.len() as f32;
        let after = pipeline.mean_abs_divergence().unwrap();

        assert!(before > 1e-4, "seed field must be divergent, got {before}");
        assert!(
            after < before * 0.5,
            "projection failed to reduce divergence: {before} -> {after}"
        );
    }

    #[test]
    fn resize_discards_all_state() {
        let Some(mut pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        seed_velocity(&pipeline, |_, _| [3.0, -2.0]);

        pollster::block_on(pipeline.resize(12, 10)).expect("resize failed");
        assert_eq!(pipeline.simulation_size(), Some((12, 10)));

        let velocity = read_grid(pipeline.gpu(), pipeline.velocity().unwrap()).unwrap();
        let pressure = read_grid(pipeline.gpu(), pipeline.pressure().unwrap()).unwrap();
        assert!(velocity.iter().all(|v| *v == 0.0), "stale velocity data");
        assert!(pressure.iter().all(|p| *p == 0.0), "stale pressure data");
    }

    #[test]
    fn failed_resize_disables_ticks_until_retried() {
        let Some(mut pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        let view = screen_view(&pipeline, 8, 8);

        // Far past any device's maximum texture dimension.
        let result = pollster::block_on(pipeline.resize(1 << 20, 8));
        assert!(result.is_err());
        assert!(!pipeline.is_operational());

        // Ticks on the dead pipeline are silent no-ops.
        pipeline.tick(1.0 / 60.0, idle_pointer(), &view);

        pollster::block_on(pipeline.resize(8, 8)).expect("recovery resize failed");
        assert!(pipeline.is_operational());
        pipeline.tick(1.0 / 60.0, idle_pointer(), &view);
    }

    /// Spec scenario: a unit force injected at the center of a 4x4 grid for
    /// one tick leaves a velocity field peaked at the injection point whose
    /// discrete divergence is driven toward zero by the solve.
    #[test]
    fn end_to_end_center_injection() {
        let config = FluidConfig {
            iterations: 20,
            ..test_config()
        };
        let Some(mut pipeline) = build_pipeline(4, 4, config) else {
            return;
        };
        let view = screen_view(&pipeline, 4, 4);

        // First tick establishes the pointer; the second drags it one pixel
        // right, which with this configuration is exactly a (1, 0) force.
        pipeline.tick(
            1.0 / 60.0,
            PointerSample {
                x: 1.0,
                y: 2.0,
                down: true,
            },
            &view,
        );
        pipeline.tick(
            1.0 / 60.0,
            PointerSample {
                x: 2.0,
                y: 2.0,
                down: true,
            },
            &view,
        );

        let velocity = read_grid(pipeline.gpu(), pipeline.velocity().unwrap()).unwrap();
        let speed_at = |x: u32, y: u32| {
            let i = ((y * 4 + x) * 4) as usize;
            (velocity[i] * velocity[i] + velocity[i + 1] * velocity[i + 1]).sqrt()
        };

        let mut peak = 0.0f32;
        let mut peak_cell = (0u32, 0u32);
        for y in 0..4 {
            for x in 0..4 {
                if speed_at(x, y) > peak {
                    peak = speed_at(x, y);
                    peak_cell = (x, y);
                }
            }
        }
        assert!(peak > 1e-4, "injection left no velocity");
        // The peak lies in the neighborhood of the injection point (the
        // grid center, between cells 1 and 2 on both axes).
        assert!(
            (1..=2).contains(&peak_cell.0) && (1..=2).contains(&peak_cell.1),
            "peak at {peak_cell:?}"
        );

        // Projection left the field near divergence-free relative to the
        // pre-solve divergence of the same tick.
        let before_data = read_grid(pipeline.gpu(), pipeline.divergence().unwrap()).unwrap();
        let before = before_data.iter().map(|d| d.abs()).sum::<f32>() / before_data.len() as f32;
        let after = pipeline.mean_abs_divergence().unwrap();
        assert!(
            after < before,
            "solve did not reduce divergence: {before} -> {after}"
        );
    }

    #[test]
    fn kernel_rejects_reading_its_own_output() {
        let Some(pipeline) = build_pipeline(8, 8, test_config()) else {
            return;
        };
        let ctx = pipeline.gpu();
        let front = pipeline.velocity().unwrap().clone();
        let sources = ShaderSources::embedded();

        let program =
            pollster::block_on(compile_program(ctx, &sources, "kernel", "divergence")).unwrap();
        let result = pollster::block_on(Kernel::new(
            ctx,
            program,
            Rc::new(DomainMesh::all_cells(ctx.device())),
            UniformBag::new()
                .with("px", UniformValue::Vec2([0.125, 0.125]))
                .with("velocity", UniformValue::Grid(front.clone())),
            Output::Grid(front),
            KernelOptions::default(),
        ));
        assert!(matches!(result, Err(BuildError::ReadWriteHazard(_))));
    }

    #[test]
    fn invalid_wgsl_is_a_compile_error() {
        let Some(pipeline) = build_pipeline(4, 4, test_config()) else {
            return;
        };
        let vs = ShaderSources::embedded().vertex("kernel").unwrap();
        let result = pollster::block_on(ShaderProgram::compile(
            pipeline.gpu(),
            "kernel",
            "broken",
            vs,
            "this is not wgsl",
        ));
        match result {
            Err(BuildError::ShaderCompile { name, message }) => {
                assert_eq!(name, "kernel/broken");
                assert!(!message.is_empty());
            }
            Err(e) => panic!("expected ShaderCompile error, got {e:?}"),
            Ok(_) => panic!("expected ShaderCompile error, got a program"),
        }
    }
}
