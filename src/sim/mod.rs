//! Simulation module - GPU resources, compute kernels and the tick pipeline.

mod binding;
mod context;
mod grid;
mod kernel;
mod mesh;
mod pipeline;
mod readback;
mod shader;
mod uniform;

pub use binding::{BindingContext, TargetId};
pub use context::{GpuContext, REQUIRED_FEATURES};
pub use grid::{ChannelFormat, Grid, GridId, GridPair};
pub use kernel::{Blend, Kernel, KernelOptions, Output};
pub use mesh::{DomainMesh, MeshAttribute};
pub use pipeline::{FluidPipeline, PointerSample};
pub use readback::{read_grid, write_grid};
pub use shader::{ShaderProgram, ShaderSources};
pub use uniform::{UniformBag, UniformValue};

/// Fatal error raised while building (or rebuilding) the pipeline.
///
/// Every variant is detected at build time; ticks assume a successfully
/// built pipeline and perform no fallible work.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("No shader source registered for {0:?}")]
    MissingShaderSource(String),

    #[error("Shader {name:?} failed to compile: {message}")]
    ShaderCompile { name: String, message: String },

    #[error("Shader {shader:?} does not declare vertex attribute {attribute:?}")]
    MissingAttribute { shader: String, attribute: String },

    #[error("Kernel {0:?} reads the grid it writes in the same pass")]
    ReadWriteHazard(String),

    #[error("Render pipeline for kernel {name:?} failed to build: {message}")]
    PipelineBuild { name: String, message: String },

    #[error("Device failed to allocate a {width}x{height} grid: {message}")]
    GridAllocation {
        width: u32,
        height: u32,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::schema::ConfigError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
}

/// Error raised by a failed resize rebuild.
///
/// The previous grids are already freed when this is returned; the pipeline
/// stays unusable (ticks are no-ops) until a later resize succeeds.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline rebuild at {width}x{height} failed: {source}")]
pub struct ResizeError {
    pub width: u32,
    pub height: u32,
    #[source]
    pub source: BuildError,
}
