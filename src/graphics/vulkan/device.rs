use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::{
    ffi::{CStr, CString},
    rc::Rc,
};

use super::{Instance, RenderError};
use crate::submission::{QueueSubmitter, SequenceError, SubmissionStage};

pub struct SwapchainSupportDetails {
    pub capabilities: ash::vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<ash::vk::SurfaceFormatKHR>,
    pub present_modes: Vec<ash::vk::PresentModeKHR>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }
}

/// Access and stage on one side of an image layout transition.
#[derive(Debug, Clone, Copy)]
pub struct BarrierScope {
    pub stage: ash::vk::PipelineStageFlags,
    pub access: ash::vk::AccessFlags,
}

impl BarrierScope {
    pub const fn new(stage: ash::vk::PipelineStageFlags, access: ash::vk::AccessFlags) -> Self {
        Self { stage, access }
    }
}

pub struct Device {
    pub instance: Instance,
    surface: ash::extensions::khr::Surface,
    pub surface_khr: ash::vk::SurfaceKHR,
    physical_device: ash::vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    pub logical_device: ash::Device,
    pub command_pool: ash::vk::CommandPool,
    pub graphics_queue: ash::vk::Queue,
    pub present_queue: ash::vk::Queue,
}

impl Device {
    pub fn new(
        app_name: CString,
        window: &winit::window::Window,
        validation: bool,
    ) -> anyhow::Result<Rc<Self>, RenderError> {
        let instance = Instance::new(app_name, window, validation)?;
        log::debug!("Vulkan instance created");

        let (surface, surface_khr) = Self::create_surface(&instance, window)?;
        log::debug!("Vulkan surface created");

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface, surface_khr)?;
        log::debug!("Vulkan physical device selected");

        let (logical_device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;
        log::debug!("Vulkan logical device created");

        let command_pool = Self::create_command_pool(&logical_device, queue_families)?;

        Ok(Rc::new(Self {
            instance,
            surface,
            surface_khr,
            physical_device,
            queue_families,
            logical_device,
            command_pool,
            graphics_queue,
            present_queue,
        }))
    }

    pub fn get_swapchain_support(&self) -> anyhow::Result<SwapchainSupportDetails, RenderError> {
        Self::query_swapchain_support(&self.surface, self.surface_khr, self.physical_device)
    }

    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: ash::vk::MemoryPropertyFlags,
    ) -> anyhow::Result<(u32, bool), RenderError> {
        let mem_properties = unsafe {
            self.instance
                .inner()
                .get_physical_device_memory_properties(self.physical_device)
        };

        mem_properties.memory_types[..mem_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .find(|(i, m_type)| {
                type_filter & (1 << *i) != 0 && m_type.property_flags.contains(properties)
            })
            .map(|(i, m_type)| {
                (
                    i as u32,
                    m_type
                        .property_flags
                        .contains(ash::vk::MemoryPropertyFlags::HOST_COHERENT),
                )
            })
            .ok_or(RenderError::NoMemoryType(properties))
    }

    pub fn format_properties(&self, format: ash::vk::Format) -> ash::vk::FormatProperties {
        unsafe {
            self.instance
                .inner()
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn find_supported_format(
        &self,
        candidates: &[ash::vk::Format],
        tiling: ash::vk::ImageTiling,
        features: ash::vk::FormatFeatureFlags,
    ) -> anyhow::Result<ash::vk::Format, RenderError> {
        candidates
            .iter()
            .copied()
            .find(|format| {
                let properties = self.format_properties(*format);

                match tiling {
                    ash::vk::ImageTiling::LINEAR => {
                        properties.linear_tiling_features.contains(features)
                    }
                    ash::vk::ImageTiling::OPTIMAL => {
                        properties.optimal_tiling_features.contains(features)
                    }
                    _ => false,
                }
            })
            .ok_or(RenderError::UnsupportedFormat(features))
    }

    pub fn create_buffer(
        &self,
        size: ash::vk::DeviceSize,
        usage: ash::vk::BufferUsageFlags,
        properties: ash::vk::MemoryPropertyFlags,
    ) -> anyhow::Result<(ash::vk::Buffer, ash::vk::DeviceMemory, bool), RenderError> {
        let create_info = ash::vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(ash::vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.logical_device.create_buffer(&create_info, None)? };

        let mem_requirements =
            unsafe { self.logical_device.get_buffer_memory_requirements(buffer) };

        let (memory_type, coherent) =
            self.find_memory_type(mem_requirements.memory_type_bits, properties)?;

        let alloc_info = ash::vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type);

        let buffer_memory = unsafe { self.logical_device.allocate_memory(&alloc_info, None)? };

        unsafe {
            self.logical_device
                .bind_buffer_memory(buffer, buffer_memory, 0)?
        };

        Ok((buffer, buffer_memory, coherent))
    }

    pub fn create_semaphore(&self) -> anyhow::Result<ash::vk::Semaphore, RenderError> {
        let semaphore_info = ash::vk::SemaphoreCreateInfo::builder();

        Ok(unsafe {
            self.logical_device
                .create_semaphore(&semaphore_info, None)?
        })
    }

    pub fn create_fence(&self, signaled: bool) -> anyhow::Result<ash::vk::Fence, RenderError> {
        let flags = if signaled {
            ash::vk::FenceCreateFlags::SIGNALED
        } else {
            ash::vk::FenceCreateFlags::empty()
        };

        let fence_info = ash::vk::FenceCreateInfo::builder().flags(flags);

        Ok(unsafe { self.logical_device.create_fence(&fence_info, None)? })
    }

    pub fn allocate_command_buffers(
        &self,
        count: u32,
    ) -> anyhow::Result<Vec<ash::vk::CommandBuffer>, RenderError> {
        let alloc_info = ash::vk::CommandBufferAllocateInfo::builder()
            .level(ash::vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(count);

        Ok(unsafe { self.logical_device.allocate_command_buffers(&alloc_info)? })
    }

    pub fn begin_single_time_commands(
        &self,
    ) -> anyhow::Result<ash::vk::CommandBuffer, RenderError> {
        let command_buffer = self.allocate_command_buffers(1)?[0];

        let begin_info = ash::vk::CommandBufferBeginInfo::builder()
            .flags(ash::vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.logical_device
                .begin_command_buffer(command_buffer, &begin_info)?
        };

        Ok(command_buffer)
    }

    pub fn end_single_time_commands(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> anyhow::Result<(), RenderError> {
        unsafe {
            self.logical_device.end_command_buffer(command_buffer)?;

            let submit_info = ash::vk::SubmitInfo::builder()
                .command_buffers(std::slice::from_ref(&command_buffer));

            self.logical_device.queue_submit(
                self.graphics_queue,
                std::slice::from_ref(&submit_info),
                ash::vk::Fence::null(),
            )?;

            self.logical_device.queue_wait_idle(self.graphics_queue)?;

            self.logical_device
                .free_command_buffers(self.command_pool, &[command_buffer]);
        }

        Ok(())
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: ash::vk::Buffer,
        image: ash::vk::Image,
        width: u32,
        height: u32,
    ) -> anyhow::Result<(), RenderError> {
        let command_buffer = self.begin_single_time_commands()?;

        let region = ash::vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(ash::vk::ImageSubresourceLayers {
                aspect_mask: ash::vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(ash::vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(ash::vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            self.logical_device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                ash::vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };

        self.end_single_time_commands(command_buffer)
    }

    pub fn create_image_with_info(
        &self,
        image_info: &ash::vk::ImageCreateInfo,
        properties: ash::vk::MemoryPropertyFlags,
    ) -> anyhow::Result<(ash::vk::Image, ash::vk::DeviceMemory), RenderError> {
        let image = unsafe { self.logical_device.create_image(image_info, None)? };

        let mem_requirements = unsafe { self.logical_device.get_image_memory_requirements(image) };

        let (memory_type, _) =
            self.find_memory_type(mem_requirements.memory_type_bits, properties)?;

        let alloc_info = ash::vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type);

        let image_memory = unsafe { self.logical_device.allocate_memory(&alloc_info, None)? };

        unsafe {
            self.logical_device
                .bind_image_memory(image, image_memory, 0)?
        }

        Ok((image, image_memory))
    }

    /// Records a layout transition of the first mip and layer of `image`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn cmd_transition_image(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        image: ash::vk::Image,
        aspect_mask: ash::vk::ImageAspectFlags,
        old_layout: ash::vk::ImageLayout,
        new_layout: ash::vk::ImageLayout,
        src: BarrierScope,
        dst: BarrierScope,
    ) {
        let image_barriers = [ash::vk::ImageMemoryBarrier {
            src_access_mask: src.access,
            dst_access_mask: dst.access,
            old_layout,
            new_layout,
            src_queue_family_index: ash::vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: ash::vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: ash::vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        }];

        self.logical_device.cmd_pipeline_barrier(
            command_buffer,
            src.stage,
            dst.stage,
            ash::vk::DependencyFlags::empty(),
            &[],
            &[],
            &image_barriers,
        );
    }

    /// Transitions a color image outside of any frame and waits for it.
    pub fn transition_image_layout(
        &self,
        image: ash::vk::Image,
        old_layout: ash::vk::ImageLayout,
        new_layout: ash::vk::ImageLayout,
    ) -> anyhow::Result<(), RenderError> {
        let (src, dst) = transition_scopes(old_layout, new_layout)?;

        let command_buffer = self.begin_single_time_commands()?;

        unsafe {
            self.cmd_transition_image(
                command_buffer,
                image,
                ash::vk::ImageAspectFlags::COLOR,
                old_layout,
                new_layout,
                src,
                dst,
            );
        }

        self.end_single_time_commands(command_buffer)
    }

    pub fn wait_idle(&self) -> anyhow::Result<(), RenderError> {
        unsafe { Ok(self.logical_device.device_wait_idle()?) }
    }

    fn create_surface(
        instance: &Instance,
        window: &winit::window::Window,
    ) -> anyhow::Result<(ash::extensions::khr::Surface, ash::vk::SurfaceKHR), RenderError> {
        let surface = ash::extensions::khr::Surface::new(&instance.entry, instance.inner());

        let surface_khr =
            unsafe { ash_window::create_surface(
                &instance.entry,
                instance.inner(),
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )? };

        Ok((surface, surface_khr))
    }

    fn pick_physical_device(
        instance: &Instance,
        surface: &ash::extensions::khr::Surface,
        surface_khr: ash::vk::SurfaceKHR,
    ) -> anyhow::Result<(ash::vk::PhysicalDevice, QueueFamilyIndices), RenderError> {
        let physical_devices = unsafe { instance.inner().enumerate_physical_devices()? };

        log::debug!("Physical device count: {}", physical_devices.len());

        for physical_device in physical_devices {
            let queue_families =
                Self::find_queue_families(instance, surface, surface_khr, physical_device)?;

            if !queue_families.is_complete()
                || !Self::is_physical_device_suitable(
                    instance,
                    surface,
                    surface_khr,
                    physical_device,
                )?
            {
                continue;
            }

            let properties = unsafe {
                instance
                    .inner()
                    .get_physical_device_properties(physical_device)
            };

            log::info!("Selected physical device: {:?}", unsafe {
                CStr::from_ptr(properties.device_name.as_ptr())
            });

            return Ok((physical_device, queue_families));
        }

        Err(RenderError::NoSuitableDevice)
    }

    fn is_physical_device_suitable(
        instance: &Instance,
        surface: &ash::extensions::khr::Surface,
        surface_khr: ash::vk::SurfaceKHR,
        physical_device: ash::vk::PhysicalDevice,
    ) -> anyhow::Result<bool, RenderError> {
        if let Err(missing) = Self::check_physical_device_extension_support(instance, physical_device)
        {
            log::warn!("Skipping physical device: {}", missing);

            return Ok(false);
        }

        let swapchain_support =
            Self::query_swapchain_support(surface, surface_khr, physical_device)?;

        Ok(!swapchain_support.formats.is_empty() && !swapchain_support.present_modes.is_empty())
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: ash::vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> anyhow::Result<(ash::Device, ash::vk::Queue, ash::vk::Queue), RenderError> {
        let (graphics_family, present_family) =
            match (queue_families.graphics_family, queue_families.present_family) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => return Err(RenderError::NoSuitableDevice),
            };

        let queue_priorities = [1.0f32];

        let queue_create_infos = {
            let mut indices = vec![graphics_family, present_family];
            indices.dedup();

            indices
                .iter()
                .map(|index| {
                    ash::vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(*index)
                        .queue_priorities(&queue_priorities)
                        .build()
                })
                .collect::<Vec<_>>()
        };

        let physical_device_features = ash::vk::PhysicalDeviceFeatures::builder();

        let extension_ptrs = Self::get_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<_>>();

        let layer_name_ptrs = Instance::get_enabled_layers(instance.validation_enabled());

        let create_info = ash::vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&physical_device_features)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_name_ptrs);

        let logical_device = unsafe {
            instance
                .inner()
                .create_device(physical_device, &create_info, None)?
        };

        let graphics_queue = unsafe { logical_device.get_device_queue(graphics_family, 0) };

        let present_queue = unsafe { logical_device.get_device_queue(present_family, 0) };

        Ok((logical_device, graphics_queue, present_queue))
    }

    fn create_command_pool(
        logical_device: &ash::Device,
        queue_families: QueueFamilyIndices,
    ) -> anyhow::Result<ash::vk::CommandPool, RenderError> {
        let create_info = ash::vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_families.graphics_family.unwrap_or_default())
            .flags(
                ash::vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | ash::vk::CommandPoolCreateFlags::TRANSIENT,
            );

        Ok(unsafe { logical_device.create_command_pool(&create_info, None)? })
    }

    fn get_device_extensions() -> [&'static CStr; 1] {
        [ash::extensions::khr::Swapchain::name()]
    }

    fn check_physical_device_extension_support(
        instance: &Instance,
        physical_device: ash::vk::PhysicalDevice,
    ) -> anyhow::Result<(), RenderError> {
        let available_extensions = unsafe {
            instance
                .inner()
                .enumerate_device_extension_properties(physical_device)?
        };

        for extension in Self::get_device_extensions() {
            let found = available_extensions.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };

                extension == name
            });

            if !found {
                return Err(RenderError::MissingDeviceExtension(
                    extension.to_string_lossy().into_owned(),
                ));
            }
        }

        Ok(())
    }

    fn find_queue_families(
        instance: &Instance,
        surface: &ash::extensions::khr::Surface,
        surface_khr: ash::vk::SurfaceKHR,
        physical_device: ash::vk::PhysicalDevice,
    ) -> anyhow::Result<QueueFamilyIndices, RenderError> {
        let mut indices = QueueFamilyIndices::default();

        let queue_families = unsafe {
            instance
                .inner()
                .get_physical_device_queue_family_properties(physical_device)
        };

        for (index, queue_family) in queue_families.iter().enumerate() {
            if queue_family.queue_count == 0 {
                continue;
            }

            let index = index as u32;

            if indices.graphics_family.is_none()
                && queue_family
                    .queue_flags
                    .contains(ash::vk::QueueFlags::GRAPHICS)
            {
                indices.graphics_family = Some(index);
            }

            let present_support = unsafe {
                surface.get_physical_device_surface_support(physical_device, index, surface_khr)?
            };

            if indices.present_family.is_none() && present_support {
                indices.present_family = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    fn query_swapchain_support(
        surface: &ash::extensions::khr::Surface,
        surface_khr: ash::vk::SurfaceKHR,
        physical_device: ash::vk::PhysicalDevice,
    ) -> anyhow::Result<SwapchainSupportDetails, RenderError> {
        let capabilities = unsafe {
            surface.get_physical_device_surface_capabilities(physical_device, surface_khr)?
        };

        let formats =
            unsafe { surface.get_physical_device_surface_formats(physical_device, surface_khr)? };

        let present_modes = unsafe {
            surface.get_physical_device_surface_present_modes(physical_device, surface_khr)?
        };

        Ok(SwapchainSupportDetails {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Stage and access masks for the one-shot transitions used during setup.
pub fn transition_scopes(
    old_layout: ash::vk::ImageLayout,
    new_layout: ash::vk::ImageLayout,
) -> anyhow::Result<(BarrierScope, BarrierScope), RenderError> {
    use ash::vk::{AccessFlags, ImageLayout, PipelineStageFlags};

    let top = BarrierScope::new(PipelineStageFlags::TOP_OF_PIPE, AccessFlags::empty());
    let transfer_write = BarrierScope::new(PipelineStageFlags::TRANSFER, AccessFlags::TRANSFER_WRITE);
    let shader_read = BarrierScope::new(PipelineStageFlags::FRAGMENT_SHADER, AccessFlags::SHADER_READ);

    match (old_layout, new_layout) {
        (ImageLayout::UNDEFINED, ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((top, transfer_write)),
        (ImageLayout::TRANSFER_DST_OPTIMAL, ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok((transfer_write, shader_read))
        }
        (ImageLayout::UNDEFINED, ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((top, shader_read)),
        (ImageLayout::UNDEFINED, ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Ok((
            top,
            BarrierScope::new(
                PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
        )),
        (old, new) => Err(RenderError::UnsupportedLayoutTransition(old, new)),
    }
}

impl QueueSubmitter for Device {
    fn submit_stage(
        &self,
        stage: &SubmissionStage,
        fence: ash::vk::Fence,
    ) -> anyhow::Result<(), SequenceError> {
        let wait_semaphores = stage
            .waits
            .iter()
            .map(|wait| wait.semaphore)
            .collect::<Vec<_>>();

        let wait_stages = stage.waits.iter().map(|wait| wait.stage).collect::<Vec<_>>();

        let submit_info = ash::vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&stage.command_buffers)
            .signal_semaphores(&stage.signals);

        unsafe {
            self.logical_device
                .queue_submit(
                    self.graphics_queue,
                    std::slice::from_ref(&submit_info),
                    fence,
                )
                .map_err(|result| SequenceError::Vulkan {
                    stage: stage.name,
                    result,
                })
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan device");

        unsafe {
            self.logical_device
                .destroy_command_pool(self.command_pool, None);

            self.logical_device.destroy_device(None);

            self.surface.destroy_surface(self.surface_khr, None);
        }
    }
}
