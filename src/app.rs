use std::{ffi::CString, path::PathBuf, rc::Rc};

use anyhow::Context;
use ash::vk;
use winit::event::{ElementState, Event, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};

use crate::assets::{FrameAsset, FrameResourceLoader};
use crate::config::{self, DemoConfig, GenerationOptions};
use crate::framegen::{
    AssetCursor, BlitFrameGenerator, CreateDesc, DispatchThroughEngine, FrameClock, FrameGenerationContext,
    FrameResource, GenerateDesc, GenerationRect, GenerationSettings, PrepareDesc,
};
use crate::graphics::vulkan::{
    screenshot, ConversionPass, Device, PresentPass, PresentPush, PresentSource, Renderer,
    Texture,
};
use crate::graphics::{CameraParams, CameraUniform, MotionVectorScaling, RenderError, Window};
use crate::submission::FrameCommands;

const SAMPLED: vk::ImageLayout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

fn camera_params(extent: vk::Extent2D) -> CameraParams {
    CameraParams {
        fov_vertical: config::CAMERA_FOV_DEGREES.to_radians(),
        near: config::CAMERA_NEAR,
        far: config::CAMERA_FAR,
        aspect: extent.width as f32 / extent.height.max(1) as f32,
    }
}

/// The raw images of one asset frame on the GPU.
struct FrameTextures {
    extent: vk::Extent2D,
    color: Texture,
    depth: Texture,
    motion_vectors: Texture,
}

impl FrameTextures {
    fn upload(device: &Rc<Device>, asset: &FrameAsset) -> anyhow::Result<Self, RenderError> {
        let (width, height) = asset.color.dimensions();

        let color = Texture::from_pixels(
            device.clone(),
            asset.color.as_bytes(),
            vk::Format::R8G8B8A8_UNORM,
            width,
            height,
        )?;

        let depth = Texture::from_pixels(
            device.clone(),
            asset.depth.as_bytes(),
            vk::Format::R32_UINT,
            width,
            height,
        )?;

        let motion_vectors = Texture::from_pixels(
            device.clone(),
            asset.motion_vectors.as_bytes(),
            vk::Format::R16G16_UINT,
            width,
            height,
        )?;

        Ok(Self {
            extent: vk::Extent2D { width, height },
            color,
            depth,
            motion_vectors,
        })
    }

    fn uniform(&self, asset: &FrameAsset) -> CameraUniform {
        CameraUniform::new(
            &asset.matrices,
            &camera_params(self.extent),
            MotionVectorScaling::for_extent(self.extent).conversion,
        )
    }
}

pub struct App {
    renderer: Renderer,
    conversion: ConversionPass,
    present: PresentPass,

    context: FrameGenerationContext<BlitFrameGenerator>,
    max_render_size: vk::Extent2D,
    generation: GenerationOptions,

    loader: FrameResourceLoader,
    textures: FrameTextures,
    cursor: AssetCursor,
    clock: FrameClock,

    pending_screenshot: Option<PathBuf>,
    screenshots_requested: u32,

    window: Window,
}

impl App {
    pub fn new(event_loop: &EventLoop<()>, config: DemoConfig) -> anyhow::Result<Self> {
        let window =
            Window::new(event_loop, config.window.clone()).context("Failed to open the window")?;

        let device = Device::new(CString::new(window.title)?, window.inner(), config.validation)
            .context("Failed to initialize Vulkan")?;

        let renderer = Renderer::new(device.clone(), &window, config.async_compute)?;

        let extent = renderer.swapchain.extent;

        let conversion = ConversionPass::new(device.clone(), extent)?;

        let present = PresentPass::new(device.clone(), renderer.swapchain.render_pass)?;

        let mut context = FrameGenerationContext::new(BlitFrameGenerator::new(device.clone()))
            .with_producer(Box::new(DispatchThroughEngine));

        context
            .create(&CreateDesc {
                display_size: extent,
                max_render_size: extent,
                back_buffer_format: renderer.swapchain.image_format,
                flags: config.create_flags,
            })
            .context("Failed to create the frame generation context")?;

        let loader = FrameResourceLoader::new(config.layout.clone());

        let asset = loader.load(0).with_context(|| {
            format!(
                "Failed to load the first frame from {}",
                loader.layout().root().display()
            )
        })?;

        let textures = FrameTextures::upload(&device, &asset)?;

        let mut app = Self {
            renderer,
            conversion,
            present,

            context,
            max_render_size: extent,
            generation: config.generation,

            loader,
            textures,
            cursor: AssetCursor::new(0),
            clock: FrameClock::new(config.frame_count, config.frames_per_asset),

            pending_screenshot: config.screenshot,
            screenshots_requested: 0,

            window,
        };

        app.bind_asset(&asset)?;
        app.bind_present_sources()?;

        log::info!(
            "Playing {} frames of {}x{} from {}",
            config.frame_count,
            app.textures.extent.width,
            app.textures.extent.height,
            app.loader.layout().root().display()
        );

        Ok(app)
    }

    pub fn run(mut app: App, event_loop: EventLoop<()>) -> ! {
        event_loop.run(move |event, _, control_flow| {
            *control_flow = ControlFlow::Poll;

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }
                    WindowEvent::Resized(size) => {
                        if size.width > 0 && size.height > 0 {
                            if let Err(e) = app.renderer.recreate_swapchain(&app.window) {
                                Self::fail("Failed to recreate the swapchain", e.into());
                            }
                        }
                    }
                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state == ElementState::Pressed {
                            if let Some(key) = input.virtual_keycode {
                                app.handle_key(key);
                            }
                        }
                    }
                    _ => {}
                },
                Event::MainEventsCleared => {
                    app.window.request_redraw();
                }
                Event::RedrawRequested(_) => {
                    if let Err(e) = app.draw() {
                        Self::fail("Frame failed", e);
                    }
                }
                Event::LoopDestroyed => {
                    app.shutdown();
                }
                _ => {}
            }
        })
    }

    fn fail(what: &str, error: anyhow::Error) -> ! {
        log::error!("{}: {:?}", what, error);
        std::process::exit(1);
    }

    fn handle_key(&mut self, key: VirtualKeyCode) {
        match key {
            VirtualKeyCode::P => {
                self.screenshots_requested += 1;
                let path = PathBuf::from(format!("screenshot_{:03}.ppm", self.screenshots_requested));
                self.pending_screenshot = Some(path);
            }
            VirtualKeyCode::Space => {
                let paused = self.clock.toggle_pause();
                log::info!("Playback {}", if paused { "paused" } else { "resumed" });
            }
            VirtualKeyCode::Right => {
                self.clock.step();
                log::info!("Stepped to frame {}", self.clock.asset_frame_index());
            }
            VirtualKeyCode::F => {
                self.generation.enabled = !self.generation.enabled;
                if self.generation.enabled {
                    // frames generated before the gap are not history
                    self.clock.note_reload();
                }
                log::info!(
                    "Frame generation {}",
                    if self.generation.enabled { "on" } else { "off" }
                );
            }
            _ => {}
        }
    }

    fn draw(&mut self) -> anyhow::Result<()> {
        let window_extent = self.window.extent();
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(());
        }

        if self.renderer.take_swapchain_recreated() {
            self.on_swapchain_recreated()?;
        }

        self.sync_asset()?;

        let commands = match self.renderer.begin_frame(&self.window)? {
            Some(commands) => commands,
            None => return Ok(()),
        };

        self.conversion.record(commands.conversion);

        let output = self.context.interpolation_output()?;

        let settings = self.generation_settings();
        let (prepare, generate) = self.dispatch_descs(&commands, output);

        let outcome = self
            .context
            .dispatch_frame(&settings, prepare, generate)
            .with_context(|| format!("Frame generation failed on frame {}", prepare.frame_id))?;

        self.clock.note_dispatch(outcome);

        let target = commands.generate_target();
        let (source, push) = self.present_push(output);

        self.renderer.begin_swapchain_render_pass(target);
        self.present.record(target, source, &push);
        self.renderer.end_swapchain_render_pass(target);

        self.renderer.end_frame(&self.window)?;

        let next_frame_id = self.context.end_frame();
        self.clock.advance(next_frame_id);

        self.take_screenshot()
    }

    /// Uploads the asset frame the clock points at. A frame that fails to
    /// load is skipped and the previous one stays bound.
    fn sync_asset(&mut self) -> anyhow::Result<()> {
        let loader = &self.loader;

        let asset = match self.cursor.sync(&mut self.clock, |index| loader.load(index)) {
            Some(asset) => asset,
            None => return Ok(()),
        };

        self.renderer.device.wait_idle()?;

        self.textures = FrameTextures::upload(&self.renderer.device, &asset)?;
        self.bind_asset(&asset)?;

        log::trace!("Frame {} bound", asset.index);

        Ok(())
    }

    /// Points the conversion pass at the current textures. The GPU must be
    /// idle.
    fn bind_asset(&mut self, asset: &FrameAsset) -> anyhow::Result<(), RenderError> {
        self.conversion.bind_inputs(
            &self.textures.color,
            &self.textures.depth,
            &self.textures.motion_vectors,
        )?;

        self.conversion.update_uniform(&self.textures.uniform(asset))
    }

    fn bind_present_sources(&mut self) -> anyhow::Result<()> {
        let converted = self.conversion.framebuffer.color.descriptor_info(SAMPLED);
        self.present.set_source(PresentSource::Converted, converted)?;

        let output = self.context.interpolation_output()?;

        // sampled with the converted color's sampler
        self.present.set_source(
            PresentSource::Generated,
            vk::DescriptorImageInfo {
                image_view: output.view,
                image_layout: output.layout,
                ..converted
            },
        )?;

        Ok(())
    }

    fn on_swapchain_recreated(&mut self) -> anyhow::Result<()> {
        let extent = self.renderer.swapchain.extent;

        self.conversion.resize(extent)?;
        self.present.recreate(self.renderer.swapchain.render_pass)?;
        self.bind_present_sources()?;

        log::debug!("Render size is now {}x{}", extent.width, extent.height);

        Ok(())
    }

    fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            enabled: self.generation.enabled,
            generation_rect: GenerationRect::full(self.max_render_size),
            only_present_generated: self.generation.only_present_generated,
            dispatch_mode: self.generation.dispatch_mode,
            swapchain: self.renderer.swapchain.swapchain_khr,
        }
    }

    fn dispatch_descs(
        &self,
        commands: &FrameCommands,
        output: FrameResource,
    ) -> (PrepareDesc, GenerateDesc) {
        let attachments = &self.conversion.framebuffer;
        let frame_id = self.context.frame_id();

        let prepare = PrepareDesc {
            command_buffer: commands.prepare,
            depth: attachments.depth.resource(SAMPLED),
            motion_vectors: attachments.motion_vectors.resource(SAMPLED),
            jitter_offset: glam::Vec2::ZERO,
            motion_vector_scale: MotionVectorScaling::for_extent(self.textures.extent).engine,
            frame_time_delta: config::FRAME_TIME_DELTA_MS,
            render_size: attachments.extent,
            camera_fov_vertical: config::CAMERA_FOV_DEGREES.to_radians(),
            camera_near: config::CAMERA_NEAR,
            camera_far: config::CAMERA_FAR,
            view_space_to_meters: 0.0,
            frame_id,
        };

        let generate = GenerateDesc {
            command_buffer: commands.generate_target(),
            present_color: attachments.color.resource(SAMPLED),
            output,
            generation_rect: GenerationRect::full(self.max_render_size),
            num_generated_frames: 1,
            frame_id,
            reset: self.clock.reset_pending(),
        };

        (prepare, generate)
    }

    fn present_push(&self, output: FrameResource) -> (PresentSource, PresentPush) {
        let target = self.renderer.swapchain.extent;

        if self.generation.enabled && self.generation.only_present_generated {
            let push = PresentPush::new(
                GenerationRect::full(self.max_render_size),
                output.extent,
                target,
            );

            (PresentSource::Generated, push)
        } else {
            let extent = self.conversion.framebuffer.extent;
            let push = PresentPush::new(GenerationRect::full(extent), extent, target);

            (PresentSource::Converted, push)
        }
    }

    /// Saves the requested screenshot once an image has been presented.
    fn take_screenshot(&mut self) -> anyhow::Result<()> {
        let (path, image) = match (
            self.pending_screenshot.take(),
            self.renderer.last_presented_image(),
        ) {
            (Some(path), Some(image)) => (path, image),
            (path, _) => {
                self.pending_screenshot = path;
                return Ok(());
            }
        };

        if !self.renderer.swapchain.transfer_src {
            log::warn!("Swapchain images cannot be read back, screenshot skipped");
            return Ok(());
        }

        let device = self.renderer.device.clone();
        device.wait_idle()?;

        if let Err(e) = screenshot::capture(
            &device,
            image,
            self.renderer.swapchain.image_format,
            self.renderer.swapchain.extent,
            &path,
        ) {
            log::warn!(
                "Failed to save screenshot {}: {:#}",
                path.display(),
                anyhow::Error::new(e)
            );
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down after {} frames", self.context.frame_id());

        if let Err(e) = self.renderer.device.wait_idle() {
            log::error!("Failed to wait for the device: {}", e);
        }

        if let Err(e) = self.context.destroy() {
            log::warn!("Frame generation context: {}", e);
        }
    }
}
