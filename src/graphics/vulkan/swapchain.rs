use std::rc::Rc;

use ash::vk;

use super::{Device, ImageView, RenderError};
use crate::submission::FrameSemaphores;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Semaphores and the pacing fence of one frame in flight.
struct FrameSync {
    semaphores: FrameSemaphores,
    in_flight: vk::Fence,
}

pub struct Swapchain {
    device: Rc<Device>,
    swapchain: ash::extensions::khr::Swapchain,
    pub swapchain_khr: vk::SwapchainKHR,
    pub image_format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    image_views: Vec<Rc<ImageView>>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    /// Whether the images can be read back by transfer commands.
    pub transfer_src: bool,
    frame_sync: Vec<FrameSync>,
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
}

impl Swapchain {
    pub fn new(
        device: Rc<Device>,
        window_extent: vk::Extent2D,
        old_swapchain: Option<&Swapchain>,
    ) -> anyhow::Result<Self, RenderError> {
        let swapchain = ash::extensions::khr::Swapchain::new(
            device.instance.inner(),
            &device.logical_device,
        );

        let old_swapchain_khr = old_swapchain
            .map(|old| old.swapchain_khr)
            .unwrap_or_else(vk::SwapchainKHR::null);

        let (swapchain_khr, surface_format, extent, transfer_src) =
            Self::create_swapchain(&device, &swapchain, window_extent, old_swapchain_khr)?;
        log::debug!("Vulkan swapchain created");

        let images = unsafe { swapchain.get_swapchain_images(swapchain_khr)? };

        let image_views = images
            .iter()
            .map(|image| ImageView::new(device.clone(), *image, surface_format.format))
            .collect::<Result<Vec<_>, _>>()?;

        let render_pass = Self::create_render_pass(&device, surface_format.format)?;
        log::debug!("Vulkan render pass created");

        let framebuffers = Self::create_framebuffers(&device, extent, &image_views, render_pass)?;
        log::debug!("Vulkan framebuffers created");

        let frame_sync = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::create_frame_sync(&device))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Vulkan sync objects created");

        let images_in_flight = vec![vk::Fence::null(); images.len()];

        Ok(Self {
            device,
            swapchain,
            swapchain_khr,
            image_format: surface_format.format,
            extent,
            images,
            image_views,
            framebuffers,
            render_pass,
            transfer_src,
            frame_sync,
            images_in_flight,
            current_frame: 0,
        })
    }

    pub fn compare_swap_formats(&self, other_swapchain: &Self) -> anyhow::Result<(), RenderError> {
        if other_swapchain.image_format == self.image_format {
            Ok(())
        } else {
            Err(RenderError::CompareSwapFormatsError)
        }
    }

    /// Waits until the current frame's previous submission has retired, then
    /// acquires an image. The inner result carries `ERROR_OUT_OF_DATE_KHR`.
    pub fn acquire_next_image(
        &self,
    ) -> anyhow::Result<Result<(u32, bool), vk::Result>, RenderError> {
        let sync = &self.frame_sync[self.current_frame];

        unsafe {
            self.device
                .logical_device
                .wait_for_fences(&[sync.in_flight], true, u64::MAX)?;

            Ok(self.swapchain.acquire_next_image(
                self.swapchain_khr,
                u64::MAX,
                sync.semaphores.image_available,
                vk::Fence::null(),
            ))
        }
    }

    /// Marks `image_index` as owned by the current frame and returns the
    /// fence its submission must signal, already reset.
    pub fn claim_image(&mut self, image_index: usize) -> anyhow::Result<vk::Fence, RenderError> {
        let in_flight = self.frame_sync[self.current_frame].in_flight;
        let previous = self.images_in_flight[image_index];

        unsafe {
            if previous != vk::Fence::null() && previous != in_flight {
                self.device
                    .logical_device
                    .wait_for_fences(&[previous], true, u64::MAX)?;
            }

            self.device.logical_device.reset_fences(&[in_flight])?;
        }

        self.images_in_flight[image_index] = in_flight;

        Ok(in_flight)
    }

    #[inline]
    pub fn frame_semaphores(&self) -> FrameSemaphores {
        self.frame_sync[self.current_frame].semaphores
    }

    /// Queues `image_index` for presentation and moves to the next frame in
    /// flight. `Ok(true)` means the swapchain is suboptimal.
    pub fn present(
        &mut self,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain_khr];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(std::slice::from_ref(&image_index));

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;

        unsafe {
            self.swapchain
                .queue_present(self.device.present_queue, &present_info)
        }
    }

    fn create_swapchain(
        device: &Rc<Device>,
        swapchain: &ash::extensions::khr::Swapchain,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> anyhow::Result<(vk::SwapchainKHR, vk::SurfaceFormatKHR, vk::Extent2D, bool), RenderError>
    {
        let support = device.get_swapchain_support()?;

        let surface_format =
            choose_surface_format(&support.formats).ok_or(RenderError::NoSuitableDevice)?;
        log::debug!("Vulkan surface format: {:?}", surface_format);

        let present_mode = choose_present_mode(&support.present_modes);
        log::debug!("Vulkan present mode: {:?}", present_mode);

        let extent = choose_extent(&support.capabilities, window_extent);

        let image_count = choose_image_count(&support.capabilities);

        let transfer_src = support
            .capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC);

        if !transfer_src {
            log::warn!("Swapchain images cannot be copied, screenshots are disabled");
        }

        let usage = if transfer_src {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };

        let queue_families = device.queue_families();

        let queue_family_indices = [
            queue_families.graphics_family.unwrap_or_default(),
            queue_families.present_family.unwrap_or_default(),
        ];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface_khr)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage);

        if queue_families.graphics_family != queue_families.present_family {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices);
        } else {
            create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        }

        let create_info = create_info
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain_khr = unsafe { swapchain.create_swapchain(&create_info, None)? };

        Ok((swapchain_khr, surface_format, extent, transfer_src))
    }

    fn create_render_pass(
        device: &Rc<Device>,
        image_format: vk::Format,
    ) -> anyhow::Result<vk::RenderPass, RenderError> {
        let attachments = [vk::AttachmentDescription {
            format: image_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];

        let color_attachment = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment)
            .build()];

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        }];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        Ok(unsafe {
            device
                .logical_device
                .create_render_pass(&render_pass_info, None)?
        })
    }

    fn create_framebuffers(
        device: &Rc<Device>,
        extent: vk::Extent2D,
        image_views: &[Rc<ImageView>],
        render_pass: vk::RenderPass,
    ) -> anyhow::Result<Vec<vk::Framebuffer>, RenderError> {
        image_views
            .iter()
            .map(|view| {
                let attachments = [view.inner()];

                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                Ok(unsafe {
                    device
                        .logical_device
                        .create_framebuffer(&framebuffer_info, None)?
                })
            })
            .collect()
    }

    fn create_frame_sync(device: &Rc<Device>) -> anyhow::Result<FrameSync, RenderError> {
        Ok(FrameSync {
            semaphores: FrameSemaphores {
                image_available: device.create_semaphore()?,
                conversion_done: device.create_semaphore()?,
                prepare_done: device.create_semaphore()?,
                render_complete: device.create_semaphore()?,
            },
            in_flight: device.create_fence(true)?,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }
}

/// Prefers a UNORM BGRA surface; the color data is already sRGB encoded.
pub fn choose_surface_format(
    available_formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

    preferred
        .iter()
        .find_map(|format| {
            available_formats.iter().copied().find(|available| {
                available.format == *format
                    && available.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| {
            let first = available_formats.first().copied();

            if let Some(format) = first {
                log::warn!(
                    "Could not find a UNORM surface format, using {:?}",
                    format.format
                );
            }

            first
        })
}

pub fn choose_present_mode(available_present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available_present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan swapchain");

        unsafe {
            self.framebuffers
                .iter()
                .for_each(|f| self.device.logical_device.destroy_framebuffer(*f, None));

            self.device
                .logical_device
                .destroy_render_pass(self.render_pass, None);

            for sync in &self.frame_sync {
                let semaphores = sync.semaphores;

                for semaphore in [
                    semaphores.image_available,
                    semaphores.conversion_done,
                    semaphores.prepare_done,
                    semaphores.render_complete,
                ] {
                    self.device.logical_device.destroy_semaphore(semaphore, None);
                }

                self.device.logical_device.destroy_fence(sync.in_flight, None);
            }

            self.image_views.clear();

            self.swapchain.destroy_swapchain(self.swapchain_khr, None);
        }
    }
}
