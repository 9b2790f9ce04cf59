use std::rc::Rc;

use ash::vk;

use crate::graphics::Window;
use crate::submission::{FrameCommands, QueueSubmitter, SubmissionSequence};

use super::{Device, RenderError, Swapchain, MAX_FRAMES_IN_FLIGHT};

/// Command buffers for one frame in flight: conversion, prepare, generate.
type FrameBuffers = [vk::CommandBuffer; 3];

pub struct Renderer {
    pub device: Rc<Device>,
    pub swapchain: Swapchain,
    command_buffers: Vec<FrameBuffers>,
    split_generate: bool,
    current_image_index: usize,
    current_frame_index: usize,
    current_commands: Option<FrameCommands>,
    last_presented: Option<usize>,
    swapchain_recreated: bool,
}

impl Renderer {
    /// With `split_generate` the generate dispatch and present draw are
    /// submitted on their own after the prepare stage.
    pub fn new(
        device: Rc<Device>,
        window: &Window,
        split_generate: bool,
    ) -> anyhow::Result<Self, RenderError> {
        let swapchain = Swapchain::new(device.clone(), window.extent(), None)?;

        let command_buffers = device
            .allocate_command_buffers(3 * MAX_FRAMES_IN_FLIGHT as u32)?
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect();

        Ok(Self {
            device,
            swapchain,
            command_buffers,
            split_generate,
            current_image_index: 0,
            current_frame_index: 0,
            current_commands: None,
            last_presented: None,
            swapchain_recreated: false,
        })
    }

    /// Acquires a swapchain image and begins the frame's command buffers.
    /// Returns `None` when the swapchain had to be recreated first.
    pub fn begin_frame(
        &mut self,
        window: &Window,
    ) -> anyhow::Result<Option<FrameCommands>, RenderError> {
        assert!(
            self.current_commands.is_none(),
            "Cannot call begin_frame while already in progress"
        );

        match self.swapchain.acquire_next_image()? {
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
            Err(e) => return Err(RenderError::VulkanError(e)),
            Ok((image_index, _is_suboptimal)) => {
                self.current_image_index = image_index as usize;
            }
        }

        let [conversion, prepare, generate] = self.command_buffers[self.current_frame_index];

        let commands = FrameCommands {
            conversion,
            prepare,
            generate: self.split_generate.then(|| generate),
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        for command_buffer in commands.all() {
            unsafe {
                self.device
                    .logical_device
                    .begin_command_buffer(command_buffer, &begin_info)?;
            }
        }

        self.current_commands = Some(commands);

        Ok(Some(commands))
    }

    /// Submits the frame as a semaphore-chained sequence and presents it.
    ///
    /// The host does not wait for the GPU here; the in-flight fence paces
    /// reuse of the command buffers on the next acquire.
    pub fn end_frame(&mut self, window: &Window) -> anyhow::Result<(), RenderError> {
        let commands = match self.current_commands.take() {
            Some(commands) => commands,
            None => panic!("Cannot call end_frame while frame is not in progress"),
        };

        for command_buffer in commands.all() {
            unsafe {
                self.device
                    .logical_device
                    .end_command_buffer(command_buffer)?;
            }
        }

        let sequence = SubmissionSequence::for_frame(&commands, &self.swapchain.frame_semaphores());

        let fence = self.swapchain.claim_image(self.current_image_index)?;

        self.device.submit_sequence(&sequence, fence)?;

        let result = self
            .swapchain
            .present(self.current_image_index as u32, sequence.final_signals());

        self.current_frame_index = (self.current_frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        self.last_presented = Some(self.current_image_index);

        match result {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on present");
                self.recreate_swapchain(window)?;
            }
            Err(e) => return Err(RenderError::VulkanError(e)),
        }

        Ok(())
    }

    pub fn begin_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.current_commands.is_some(),
            "Cannot call begin_swapchain_render_pass while frame is not in progress"
        );

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent,
        };

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.01, 0.01, 0.01, 1.0],
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass)
            .framebuffer(self.swapchain.framebuffers[self.current_image_index])
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.swapchain.width() as f32,
            height: self.swapchain.height() as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];

        unsafe {
            self.device.logical_device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );

            self.device
                .logical_device
                .cmd_set_viewport(command_buffer, 0, &viewports);
            self.device
                .logical_device
                .cmd_set_scissor(command_buffer, 0, &[render_area]);
        }
    }

    pub fn end_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .logical_device
                .cmd_end_render_pass(command_buffer);
        }
    }

    /// Returns `false` while the window is minimized.
    pub fn recreate_swapchain(&mut self, window: &Window) -> anyhow::Result<bool, RenderError> {
        let extent = window.extent();

        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        log::debug!("Recreating vulkan swapchain");

        self.device.wait_idle()?;

        let new_swapchain = Swapchain::new(self.device.clone(), extent, Some(&self.swapchain))?;

        self.swapchain.compare_swap_formats(&new_swapchain)?;

        self.swapchain = new_swapchain;
        self.current_frame_index = 0;
        self.last_presented = None;
        self.swapchain_recreated = true;

        Ok(true)
    }

    /// Whether the swapchain changed since the last call.
    pub fn take_swapchain_recreated(&mut self) -> bool {
        std::mem::replace(&mut self.swapchain_recreated, false)
    }

    /// The image most recently queued for presentation.
    pub fn last_presented_image(&self) -> Option<vk::Image> {
        self.last_presented.map(|index| self.swapchain.images[index])
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan renderer");

        let command_buffers = self
            .command_buffers
            .drain(..)
            .flatten()
            .collect::<Vec<_>>();

        unsafe {
            self.device
                .logical_device
                .free_command_buffers(self.device.command_pool, &command_buffers);
        }
    }
}
