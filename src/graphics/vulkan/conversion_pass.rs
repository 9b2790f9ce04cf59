use std::rc::Rc;

use ash::vk;

use super::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetWriter};
use super::{Buffer, Device, Pipeline, PipelineLayout, RenderError, Texture};
use crate::graphics::CameraUniform;

pub const MOTION_VECTOR_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const CONVERTED_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const CONVERTED_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const UNIFORM_BINDING: u32 = 0;
const COLOR_BINDING: u32 = 1;
const DEPTH_BINDING: u32 = 2;
const MOTION_BINDING: u32 = 3;

/// Attachments the conversion pass renders into, sized to the render
/// resolution. All three end the pass in `SHADER_READ_ONLY_OPTIMAL`.
pub struct ConversionFramebuffer {
    device: Rc<Device>,
    pub render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub motion_vectors: Texture,
    pub color: Texture,
    pub depth: Texture,
}

impl ConversionFramebuffer {
    pub fn new(device: Rc<Device>, extent: vk::Extent2D) -> anyhow::Result<Self, RenderError> {
        let render_pass = Self::create_render_pass(&device)?;
        log::debug!("Conversion render pass created");

        let (motion_vectors, color, depth) = Self::create_attachments(&device, extent)?;

        let framebuffer =
            Self::create_framebuffer(&device, render_pass, extent, [&motion_vectors, &color, &depth])?;

        Ok(Self {
            device,
            render_pass,
            framebuffer,
            extent,
            motion_vectors,
            color,
            depth,
        })
    }

    /// Rebuilds the attachments for a new render resolution. The render pass
    /// is kept so pipelines built against it stay valid.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> anyhow::Result<(), RenderError> {
        log::debug!(
            "Recreating conversion framebuffer at {}x{}",
            extent.width,
            extent.height
        );

        let (motion_vectors, color, depth) = Self::create_attachments(&self.device, extent)?;

        let framebuffer = Self::create_framebuffer(
            &self.device,
            self.render_pass,
            extent,
            [&motion_vectors, &color, &depth],
        )?;

        unsafe {
            self.device
                .logical_device
                .destroy_framebuffer(self.framebuffer, None);
        }

        self.framebuffer = framebuffer;
        self.extent = extent;
        self.motion_vectors = motion_vectors;
        self.color = color;
        self.depth = depth;

        Ok(())
    }

    fn create_attachments(
        device: &Rc<Device>,
        extent: vk::Extent2D,
    ) -> anyhow::Result<(Texture, Texture, Texture), RenderError> {
        let motion_vectors = Texture::new(
            device.clone(),
            MOTION_VECTOR_FORMAT,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )?;

        let color = Texture::new(
            device.clone(),
            CONVERTED_COLOR_FORMAT,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;

        let depth = Texture::new(
            device.clone(),
            CONVERTED_DEPTH_FORMAT,
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        Ok((motion_vectors, color, depth))
    }

    fn create_render_pass(device: &Rc<Device>) -> anyhow::Result<vk::RenderPass, RenderError> {
        let attachment = |format| vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ..Default::default()
        };

        let attachments = [
            attachment(MOTION_VECTOR_FORMAT),
            attachment(CONVERTED_COLOR_FORMAT),
            attachment(CONVERTED_DEPTH_FORMAT),
        ];

        let color_refs = [
            vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
        ];

        let depth_ref = vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let dependencies = subpass_dependencies();

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

    fn create_framebuffer(
        device: &Rc<Device>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        attachments: [&Texture; 3],
    ) -> anyhow::Result<vk::Framebuffer, RenderError> {
        let views = attachments.map(|texture| texture.view());

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        Ok(unsafe {
            device
                .logical_device
                .create_framebuffer(&framebuffer_info, None)?
        })
    }
}

impl Drop for ConversionFramebuffer {
    fn drop(&mut self) {
        log::debug!("Dropping conversion framebuffer");

        unsafe {
            self.device
                .logical_device
                .destroy_framebuffer(self.framebuffer, None);

            self.device
                .logical_device
                .destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Entry waits for last frame's readers (sampling and transfer), exit makes
/// every attachment readable by both.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let readers = vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER;
    let read_access = vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ;

    let writers = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let write_access =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: readers,
            dst_stage_mask: writers,
            src_access_mask: read_access,
            dst_access_mask: write_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: writers,
            dst_stage_mask: readers,
            src_access_mask: write_access,
            dst_access_mask: read_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ]
}

/// Full-screen pass that turns the raw uploaded textures into
/// floating-point motion vectors, color and normalized depth.
pub struct ConversionPass {
    device: Rc<Device>,
    pub framebuffer: ConversionFramebuffer,
    set_layout: Rc<DescriptorSetLayout>,
    pool: Rc<DescriptorPool>,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: PipelineLayout,
    pipeline: Rc<Pipeline>,
    uniform_buffer: Buffer<CameraUniform>,
}

impl ConversionPass {
    pub fn new(device: Rc<Device>, extent: vk::Extent2D) -> anyhow::Result<Self, RenderError> {
        let framebuffer = ConversionFramebuffer::new(device.clone(), extent)?;

        let set_layout = DescriptorSetLayout::new(device.clone())
            .add_binding(
                UNIFORM_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .add_binding(
                COLOR_BINDING,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .add_binding(
                DEPTH_BINDING,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .add_binding(
                MOTION_BINDING,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()?;

        let pool = DescriptorPool::new(device.clone())
            .max_sets(1)
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1)
            .pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3)
            .build()?;

        let descriptor_set = pool.allocate_descriptor(set_layout.inner())?;

        let pipeline_layout = PipelineLayout::new(device.clone(), &[set_layout.inner()], &[])?;

        let pipeline = Pipeline::start()
            .color_attachments(2)
            .depth_write(vk::CompareOp::ALWAYS)
            .build(
                device.clone(),
                crate::spirv!("fullscreen.vert.spv"),
                crate::spirv!("convert.frag.spv"),
                framebuffer.render_pass,
                pipeline_layout.inner(),
            )?;
        log::debug!("Conversion pipeline created");

        let mut uniform_buffer = Buffer::new(
            device.clone(),
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        uniform_buffer.map()?;

        Ok(Self {
            device,
            framebuffer,
            set_layout,
            pool,
            descriptor_set,
            pipeline_layout,
            pipeline,
            uniform_buffer,
        })
    }

    /// Points the pass at freshly uploaded textures. The GPU must be idle.
    pub fn bind_inputs(
        &mut self,
        color: &Texture,
        depth: &Texture,
        motion_vectors: &Texture,
    ) -> anyhow::Result<(), RenderError> {
        let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        DescriptorSetWriter::new(self.set_layout.clone(), self.pool.clone())
            .write_buffer(UNIFORM_BINDING, self.uniform_buffer.descriptor_info())?
            .write_image(COLOR_BINDING, color.descriptor_info(layout))?
            .write_image(DEPTH_BINDING, depth.descriptor_info(layout))?
            .write_image(MOTION_BINDING, motion_vectors.descriptor_info(layout))?
            .overwrite(self.descriptor_set);

        Ok(())
    }

    /// Writes the camera block. The GPU must not be reading it.
    pub fn update_uniform(&mut self, uniform: &CameraUniform) -> anyhow::Result<(), RenderError> {
        self.uniform_buffer
            .write_to_buffer(std::slice::from_ref(uniform));

        self.uniform_buffer.flush()
    }

    pub fn resize(&mut self, extent: vk::Extent2D) -> anyhow::Result<(), RenderError> {
        self.framebuffer.recreate(extent)
    }

    /// Records the pass. Afterwards all attachments are shader readable.
    pub fn record(&self, command_buffer: vk::CommandBuffer) {
        let extent = self.framebuffer.extent;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 0.0],
                },
            },
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.framebuffer.render_pass)
            .framebuffer(self.framebuffer.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];

        let logical_device = &self.device.logical_device;

        unsafe {
            logical_device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );

            logical_device.cmd_set_viewport(command_buffer, 0, &viewports);
            logical_device.cmd_set_scissor(command_buffer, 0, &[render_area]);

            self.pipeline.bind(command_buffer);

            logical_device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout.inner(),
                0,
                &[self.descriptor_set],
                &[],
            );

            logical_device.cmd_draw(command_buffer, 3, 1, 0, 0);

            logical_device.cmd_end_render_pass(command_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_are_by_region_and_mirror_each_other() {
        let [entry, exit] = subpass_dependencies();

        assert_eq!(entry.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(exit.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(entry.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert_eq!(exit.dependency_flags, vk::DependencyFlags::BY_REGION);

        assert_eq!(entry.src_stage_mask, exit.dst_stage_mask);
        assert_eq!(entry.dst_access_mask, exit.src_access_mask);
        assert!(exit
            .dst_access_mask
            .contains(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ));
    }

    #[test]
    fn attachment_formats_match_the_shader_outputs() {
        assert_eq!(super::super::texel_size(MOTION_VECTOR_FORMAT), Some(4));
        assert_eq!(
            super::super::aspect_for_format(CONVERTED_DEPTH_FORMAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            super::super::aspect_for_format(CONVERTED_COLOR_FORMAT),
            vk::ImageAspectFlags::COLOR
        );
    }
}
