//! Stable fluids demo - drag the pointer across the window to stir the
//! fluid. Optionally takes a JSON configuration file.

use std::sync::Arc;
use std::time::{Duration, Instant};

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use stable_fluids::schema::FluidConfig;
use stable_fluids::sim::{
    FluidPipeline, GpuContext, PointerSample, REQUIRED_FEATURES, ShaderSources,
};

/// Collapse a burst of resize events into a single pipeline rebuild.
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(250);

/// Frames longer than this are display hiccups, not simulation time.
const MAX_DT: f32 = 0.25;

/// Log a divergence diagnostic this often.
const STATS_INTERVAL: u64 = 600;

struct App {
    config: FluidConfig,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    pipeline: Option<FluidPipeline>,
    pointer: PointerSample,
    last_frame: Option<Instant>,
    pending_resize: Option<(PhysicalSize<u32>, Instant)>,
    frame: u64,
}

impl App {
    fn new(config: FluidConfig) -> Self {
        Self {
            config,
            window: None,
            surface: None,
            surface_config: None,
            pipeline: None,
            pointer: PointerSample {
                x: 0.0,
                y: 0.0,
                down: false,
            },
            last_frame: None,
            pending_resize: None,
            frame: 0,
        }
    }

    /// Apply a debounced resize: reconfigure the surface and rebuild the
    /// pipeline once the burst has settled.
    fn apply_pending_resize(&mut self) {
        let Some((size, at)) = self.pending_resize else {
            return;
        };
        if at.elapsed() < RESIZE_DEBOUNCE {
            return;
        }
        self.pending_resize = None;

        let (Some(surface), Some(config), Some(pipeline)) = (
            &self.surface,
            &mut self.surface_config,
            &mut self.pipeline,
        ) else {
            return;
        };
        config.width = size.width.max(1);
        config.height = size.height.max(1);
        surface.configure(pipeline.gpu().device(), config);
        if let Err(e) = pollster::block_on(pipeline.resize(config.width, config.height)) {
            log::error!("{e}");
        }
        self.last_frame = None;
    }

    fn redraw(&mut self) {
        self.apply_pending_resize();

        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|t| (now - t).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        // Frame breaks and paused ticks: skip without touching the surface.
        if !(dt > 0.0 && dt < MAX_DT) {
            return;
        }

        let (Some(surface), Some(config), Some(pipeline)) =
            (&self.surface, &self.surface_config, &mut self.pipeline)
        else {
            return;
        };

        let output = match surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                surface.configure(pipeline.gpu().device(), config);
                return;
            }
            Err(e) => {
                log::error!("surface error: {e}");
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        pipeline.tick(dt, self.pointer, &view);
        output.present();

        self.frame += 1;
        if self.frame % STATS_INTERVAL == 0 && pipeline.is_operational() {
            match pipeline.mean_abs_divergence() {
                Ok(div) => log::info!("frame {}: mean |divergence| {div:.6}", self.frame),
                Err(e) => log::warn!("divergence readback failed: {e}"),
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("Stable Fluids")
            .with_inner_size(PhysicalSize::new(1024u32, 768));
        let window = Arc::new(event_loop.create_window(attrs).expect("create window"));

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .expect("create surface");
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .expect("no suitable GPU adapter");
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Stable Fluids Device"),
            required_features: REQUIRED_FEATURES,
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))
        .expect("create device (float32 filtering/blending required)");

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let ctx = GpuContext::from_device(device, queue, format);
        let pipeline = pollster::block_on(FluidPipeline::new(
            ctx,
            self.config.clone(),
            ShaderSources::embedded(),
            (surface_config.width, surface_config.height),
        ))
        .unwrap_or_else(|e| {
            // Fatal by contract: present nothing and bail.
            log::error!("failed to build pipeline: {e}");
            std::process::exit(1);
        });

        log::info!(
            "running on {} ({})",
            adapter.get_info().name,
            adapter.get_info().backend.to_str()
        );

        self.window = Some(window);
        self.surface = Some(surface);
        self.surface_config = Some(surface_config);
        self.pipeline = Some(pipeline);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                self.pending_resize = Some((size, Instant::now()));
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer.x = position.x as f32;
                self.pointer.y = position.y as f32;
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state,
                ..
            } => {
                self.pointer.down = state == ElementState::Pressed;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let config = match args.get(1).map(String::as_str) {
        Some("--example") => {
            println!("Example configuration (config.json):");
            println!(
                "{}",
                serde_json::to_string_pretty(&FluidConfig::default()).unwrap()
            );
            return;
        }
        Some("--help") | Some("-h") => {
            eprintln!("Usage: {} [config.json]", args[0]);
            eprintln!();
            eprintln!("Run the interactive stable-fluids demo.");
            eprintln!("Use --example to print a configuration template.");
            return;
        }
        Some(path) => FluidConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }),
        None => FluidConfig::default(),
    };

    let event_loop = EventLoop::new().expect("create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).expect("event loop failed");
}
