#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowMode {
    Windowed,
    BorderlessFullscreen,
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub title: &'static str,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub mode: WindowMode,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            title: "framegen-demo",
            width: 1280,
            height: 720,
            resizable: true,
            mode: WindowMode::Windowed,
        }
    }
}

#[derive(Debug)]
pub struct Window {
    raw_window: winit::window::Window,

    pub title: &'static str,
}

impl Window {
    pub fn new(
        event_loop: &winit::event_loop::EventLoop<()>,
        window_settings: WindowSettings,
    ) -> anyhow::Result<Self, winit::error::OsError> {
        let mut window_builder = winit::window::WindowBuilder::new()
            .with_title(window_settings.title)
            .with_resizable(window_settings.resizable);

        window_builder = match window_settings.mode {
            WindowMode::Windowed => window_builder.with_inner_size(winit::dpi::PhysicalSize::new(
                window_settings.width,
                window_settings.height,
            )),
            WindowMode::BorderlessFullscreen => window_builder.with_fullscreen(Some(
                winit::window::Fullscreen::Borderless(event_loop.primary_monitor()),
            )),
        };

        let raw_window = window_builder.build(event_loop)?;

        Ok(Self {
            raw_window,
            title: window_settings.title,
        })
    }

    #[inline]
    pub fn request_redraw(&self) {
        self.raw_window.request_redraw();
    }

    pub fn extent(&self) -> ash::vk::Extent2D {
        let size = self.raw_window.inner_size();

        ash::vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    #[inline]
    pub fn inner(&self) -> &winit::window::Window {
        &self.raw_window
    }
}
