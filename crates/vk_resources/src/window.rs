//! Window boundary for presentation
//!
//! The resource layer never creates or owns a window. It only needs the
//! current framebuffer size in pixels and a way to block until the window
//! system has something new to report.

use ash::vk;

/// Source of the window's framebuffer extent
pub trait WindowExtentProvider {
    /// Current framebuffer size in pixels. A minimized window reports `0x0`.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Block until the window system delivers new events
    fn wait_events(&mut self);
}

/// Block until the window reports a framebuffer with both dimensions non-zero.
///
/// Minimized windows report a zero extent; a swapchain cannot be built for
/// them, so recreation waits here until the window becomes visible again.
pub fn wait_for_nonzero_extent(window: &mut dyn WindowExtentProvider) -> vk::Extent2D {
    let mut extent = window.framebuffer_extent();
    let mut waits = 0_u32;
    while extent.width == 0 || extent.height == 0 {
        if waits == 0 {
            log::debug!("Window framebuffer is 0x0, waiting for it to become visible");
        }
        window.wait_events();
        waits += 1;
        extent = window.framebuffer_extent();
    }
    if waits > 0 {
        log::debug!(
            "Window visible again at {}x{} after {} waits",
            extent.width,
            extent.height,
            waits
        );
    }
    extent
}

/// GLFW-backed extent provider
#[cfg(feature = "glfw")]
pub struct GlfwExtentProvider<'a> {
    glfw: &'a mut glfw::Glfw,
    window: &'a glfw::PWindow,
}

#[cfg(feature = "glfw")]
impl<'a> GlfwExtentProvider<'a> {
    /// Wrap a GLFW context and one of its windows
    pub fn new(glfw: &'a mut glfw::Glfw, window: &'a glfw::PWindow) -> Self {
        Self { glfw, window }
    }
}

#[cfg(feature = "glfw")]
impl WindowExtentProvider for GlfwExtentProvider<'_> {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
        }
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a scripted sequence of framebuffer sizes
    struct ScriptedWindow {
        sizes: Vec<(u32, u32)>,
        cursor: usize,
        waits: usize,
    }

    impl ScriptedWindow {
        fn new(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: sizes.to_vec(),
                cursor: 0,
                waits: 0,
            }
        }
    }

    impl WindowExtentProvider for ScriptedWindow {
        fn framebuffer_extent(&self) -> vk::Extent2D {
            let (width, height) = self.sizes[self.cursor.min(self.sizes.len() - 1)];
            vk::Extent2D { width, height }
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            self.cursor += 1;
        }
    }

    #[test]
    fn test_visible_window_returns_immediately() {
        let mut window = ScriptedWindow::new(&[(800, 600)]);
        let extent = wait_for_nonzero_extent(&mut window);

        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn test_minimized_window_waits_until_visible() {
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0), (1280, 0), (1280, 720)]);
        let extent = wait_for_nonzero_extent(&mut window);

        assert_eq!((extent.width, extent.height), (1280, 720));
        assert_eq!(window.waits, 3);
    }
}
