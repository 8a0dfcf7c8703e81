// =============================================================================
// HELLO TRIANGLE - Vulkan render loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (main loop, FPS title, shader hot reload)                  │
// │    ├── WinitSurface (window, events, resize flag)               │
// │    └── Renderer (owns every GPU object)                         │
// │          ├── Instance / Surface / Device                        │
// │          ├── Vertex buffer, command pool, frame sync            │
// │          └── Swap-chain set (rebuilt on resize)                 │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW: see frame.rs
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;
mod watch;
mod window;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameLoop, FrameTarget};
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Instant;
use watch::ShaderWatcher;
use window::{SurfaceProvider, WinitSurface};
use winit::keyboard::KeyCode;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, source) = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan renderer");
    source.log();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{}, validation {}",
        config.window.width,
        config.window.height,
        if config.validation_enabled() { "on" } else { "off" }
    );

    let mut app = App::new(config).context("Initialization failed")?;
    app.run()?;

    log::info!("Shutting down");
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG wins over the configured level
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Vulkan Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Failed to open log file {}: {}, logging to stderr",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer must go before the
/// window its surface was created for.
struct App {
    config: Config,
    watcher: Option<ShaderWatcher>,
    renderer: Renderer,
    surface: WinitSurface,
    frame_loop: FrameLoop,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let surface = WinitSurface::new(
            config.window.width,
            config.window.height,
            &config.window.title,
        )?;
        let renderer = Renderer::new(&surface, &config)?;
        let frame_loop = FrameLoop::new(config.debug.wait_idle_after_present);

        let watcher = if config.shaders.hot_reload {
            match ShaderWatcher::new(&config.shaders) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let now = Instant::now();
        Ok(Self {
            config,
            watcher,
            renderer,
            surface,
            frame_loop,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        })
    }

    /// Poll, draw, repeat until the window is asked to close
    fn run(&mut self) -> Result<()> {
        while !self.surface.should_close() {
            self.surface.poll_events();

            if self.surface.is_key_pressed(KeyCode::Escape) {
                log::info!("ESC pressed, exiting...");
                self.surface.set_should_close(true);
            }
            if self.surface.should_close() {
                break;
            }

            self.reload_shaders_if_changed()?;

            let presented = self
                .frame_loop
                .draw_frame(&mut self.renderer, &mut self.surface)
                .with_context(|| {
                    format!(
                        "Render loop failed in frame slot {}",
                        self.frame_loop.current_frame()
                    )
                })?;
            if presented {
                self.update_fps();
            }
        }

        self.renderer.wait_idle()
    }

    fn reload_shaders_if_changed(&mut self) -> Result<()> {
        let changed = self
            .watcher
            .as_ref()
            .is_some_and(|watcher| watcher.take_changed());
        if !changed {
            return Ok(());
        }

        // A broken binary would leave us without a pipeline
        let shaders = &self.config.shaders;
        for path in [shaders.vertex_path(), shaders.fragment_path()] {
            if let Err(e) = backend::shader::load_spirv(&path) {
                log::warn!("Keeping current shaders: {:#}", e);
                return Ok(());
            }
        }

        log::info!("Shaders changed, rebuilding pipeline");
        frame::rebuild(&mut self.renderer, &mut self.surface)
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            self.surface.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title,
                fps,
                frame_time * 1000.0
            ));

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}
