// =============================================================================
// SURFACE PROVIDER - OS window, presentation surface and input events
// =============================================================================
//
// winit normally owns the main loop through `run_app`. The renderer wants to
// own it instead (poll, draw, repeat; block while minimized), so the event
// loop is pumped by hand: a zero timeout for `poll_events`, no timeout for
// `wait_events`.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::collections::HashSet;
use std::ffi::CStr;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::error::InitError;

/// What the render loop needs from the windowing layer.
///
/// Callbacks run on the render thread while events are pumped, so the
/// resized flag needs no locking.
pub trait SurfaceProvider {
    /// Current framebuffer size in pixels; (0, 0) while minimized
    fn framebuffer_size(&self) -> (u32, u32);

    /// Process pending events without blocking
    fn poll_events(&mut self);

    /// Block until at least one event arrives, then process it
    fn wait_events(&mut self);

    /// Read and clear the resized flag
    fn take_resized(&mut self) -> bool;

    fn should_close(&self) -> bool;

    fn set_should_close(&mut self, value: bool);

    fn is_key_pressed(&self, key: KeyCode) -> bool;
}

/// Event sink handed to the pumped event loop
struct WindowState {
    attributes: Option<WindowAttributes>,
    window: Option<Window>,
    creation_error: Option<String>,
    resized: bool,
    should_close: bool,
    pressed_keys: HashSet<KeyCode>,
}

impl WindowState {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes: Some(attributes),
            window: None,
            creation_error: None,
            resized: false,
            should_close: false,
            pressed_keys: HashSet::new(),
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.attributes.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.creation_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.should_close = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Framebuffer resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.pressed_keys.insert(key);
                    } else {
                        self.pressed_keys.remove(&key);
                    }
                }
            }
            WindowEvent::Focused(false) => self.pressed_keys.clear(),
            _ => {}
        }
    }
}

/// winit-backed surface provider.
///
/// Field order matters for Drop: the window goes first, then the event loop.
pub struct WinitSurface {
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl WinitSurface {
    /// Start the windowing system and open a window without a graphics context
    pub fn new(width: u32, height: u32, title: &str) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height));
        let mut state = WindowState::new(attributes);

        // The window can only be created once the loop reports `resumed`
        while state.window.is_none() {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::ZERO), &mut state)
            {
                return Err(InitError::WindowCreation(format!(
                    "event loop exited with code {} before the window opened",
                    code
                ))
                .into());
            }
            if let Some(e) = state.creation_error.take() {
                return Err(InitError::WindowCreation(e).into());
            }
        }

        log::info!("Created window '{}' ({}x{})", title, width, height);

        Ok(Self { state, event_loop })
    }

    fn window(&self) -> Result<&Window> {
        self.state.window.as_ref().context("Window not created")
    }

    /// Instance extensions the platform needs to present to this window
    pub fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let window = self.window()?;
        let names = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .context("Failed to query required surface extensions")?;

        // Safety: ash-window returns pointers to static, nul-terminated names
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect())
    }

    /// Create the presentation surface for this window
    pub fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let window = self.window()?;
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            log::info!("Event loop exited with code {}", code);
            self.state.should_close = true;
        }
    }
}

impl SurfaceProvider for WinitSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state
            .window
            .as_ref()
            .map(|window| {
                let size = window.inner_size();
                (size.width, size.height)
            })
            .unwrap_or((0, 0))
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn should_close(&self) -> bool {
        self.state.should_close
    }

    fn set_should_close(&mut self, value: bool) {
        self.state.should_close = value;
    }

    fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.state.pressed_keys.contains(&key)
    }
}
