//! Stable fluids - GPU incompressible fluid simulation.
//!
//! This crate implements the stable-fluids method (semi-Lagrangian advection
//! plus Jacobi-iterated pressure projection) as a fixed sequence of GPU
//! render passes over double-buffered floating-point grids.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and validation
//! - `sim`: GPU resources, compute kernels and the per-tick pipeline
//!
//! # Example
//!
//! ```rust,no_run
//! use stable_fluids::{
//!     schema::FluidConfig,
//!     sim::{FluidPipeline, GpuContext, PointerSample, ShaderSources},
//! };
//!
//! let config = FluidConfig::default();
//!
//! // Acquire a device and build the pipeline at a 640x480 surface.
//! let ctx = pollster::block_on(GpuContext::headless(wgpu::TextureFormat::Rgba8Unorm)).unwrap();
//! let target = ctx.offscreen_target(640, 480);
//! let mut pipeline =
//!     pollster::block_on(FluidPipeline::new(ctx, config, ShaderSources::embedded(), (640, 480)))
//!         .unwrap();
//!
//! // Drive one tick from an external clock and pointer sample.
//! let view = target.create_view(&wgpu::TextureViewDescriptor::default());
//! pipeline.tick(1.0 / 60.0, PointerSample { x: 320.0, y: 240.0, down: false }, &view);
//! ```

pub mod schema;
pub mod sim;

// Re-export commonly used types
pub use schema::FluidConfig;
pub use sim::{BuildError, FluidPipeline, GpuContext, PointerSample, ResizeError, ShaderSources};
