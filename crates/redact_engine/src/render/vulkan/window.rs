//! Window management using GLFW
//!
//! Provides cross-platform window creation and event handling for Vulkan.
//! [`WindowSystem`] bootstraps GLFW early so the Vulkan instance can enable
//! the platform surface extensions before any window exists; the
//! presentation stage later turns it into a fixed-size [`Window`].

use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("window creation failed")]
    CreationFailed,

    #[error("GLFW error: {0}")]
    GlfwError(String),
}

pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW library handle, initialized before any Vulkan object.
///
/// Exists so the instance extension query can happen before the window is
/// opened; consumed by [`WindowSystem::into_window`] when the presentation
/// stage initializes.
pub struct WindowSystem {
    glfw: glfw::Glfw,
}

impl WindowSystem {
    /// Initialize GLFW.
    pub fn init() -> WindowResult<Self> {
        let glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;
        Ok(Self { glfw })
    }

    /// Vulkan instance extensions the platform surface requires.
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("failed to get required extensions".to_string()))
    }

    /// Open the presentation window, consuming the system handle.
    pub fn into_window(mut self, title: &str, width: u32, height: u32) -> WindowResult<Window> {
        // Vulkan rendering: no client API context, and the surface is fixed
        // size for the lifetime of the swapchain (no recreation on resize).
        self.glfw
            .window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        self.glfw.window_hint(glfw::WindowHint::Resizable(false));

        let (mut window, events) = self
            .glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);

        Ok(Window {
            glfw: self.glfw,
            window,
            events,
        })
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Whether the platform has observed a close request.
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Drain the platform event queue once.
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        // Escape maps to a close request; everything else is discarded.
        for (_, event) in glfw::flush_messages(&self.events) {
            if let glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) = event {
                self.window.set_should_close(true);
            }
        }
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width as u32, height as u32)
    }

    /// Create a Vulkan surface using GLFW's built-in functionality.
    pub fn create_vulkan_surface(
        &mut self,
        instance: ash::vk::Instance,
    ) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!(
                "failed to create Vulkan surface: {:?}",
                result
            )))
        }
    }
}
