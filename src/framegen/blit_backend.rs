use std::collections::HashMap;
use std::rc::Rc;

use ash::vk;

use super::*;
use crate::graphics::vulkan::{aspect_for_format, BarrierScope, Device, Texture};

/// Back buffer formats the engine accepts, with whether they can carry HDR.
const SUPPORTED_FORMATS: [(vk::Format, bool); 6] = [
    (vk::Format::B8G8R8A8_UNORM, false),
    (vk::Format::B8G8R8A8_SRGB, false),
    (vk::Format::R8G8B8A8_UNORM, false),
    (vk::Format::R8G8B8A8_SRGB, false),
    (vk::Format::A2B10G10R10_UNORM_PACK32, true),
    (vk::Format::R16G16B16A16_SFLOAT, true),
];

/// Checks a create descriptor the way a vendor engine would before
/// allocating anything.
pub fn validate_create_desc(desc: &CreateDesc) -> Result<(), FrameGenError> {
    let empty = |extent: vk::Extent2D| extent.width == 0 || extent.height == 0;

    if empty(desc.display_size) || empty(desc.max_render_size) {
        return Err(FrameGenError::ContextRejected(format!(
            "empty size: display {}x{}, render {}x{}",
            desc.display_size.width,
            desc.display_size.height,
            desc.max_render_size.width,
            desc.max_render_size.height
        )));
    }

    let hdr_capable = SUPPORTED_FORMATS
        .iter()
        .find(|(format, _)| *format == desc.back_buffer_format)
        .map(|(_, hdr)| *hdr)
        .ok_or_else(|| {
            FrameGenError::ContextRejected(format!(
                "unsupported back buffer format {:?}",
                desc.back_buffer_format
            ))
        })?;

    if desc.flags.hdr && !hdr_capable {
        return Err(FrameGenError::ContextRejected(format!(
            "HDR requested with 8-bit back buffer format {:?}",
            desc.back_buffer_format
        )));
    }

    Ok(())
}

/// Region copied from the whole of `source` into `rect` of the output.
pub fn blit_region(
    source: vk::Extent2D,
    rect: GenerationRect,
    output: vk::Extent2D,
) -> Result<vk::ImageBlit, FrameGenError> {
    if rect.is_empty() || source.width == 0 || source.height == 0 {
        return Err(FrameGenError::Engine("empty generation region".into()));
    }

    let right = rect.left as i64 + rect.width as i64;
    let bottom = rect.top as i64 + rect.height as i64;

    if rect.left < 0 || rect.top < 0 || right > output.width as i64 || bottom > output.height as i64
    {
        return Err(FrameGenError::Engine(format!(
            "generation rect {:?} outside the {}x{} output",
            rect, output.width, output.height
        )));
    }

    let subresource = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };

    Ok(vk::ImageBlit {
        src_subresource: subresource,
        src_offsets: [
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: source.width as i32,
                y: source.height as i32,
                z: 1,
            },
        ],
        dst_subresource: subresource,
        dst_offsets: [
            vk::Offset3D {
                x: rect.left,
                y: rect.top,
                z: 0,
            },
            vk::Offset3D {
                x: right as i32,
                y: bottom as i32,
                z: 1,
            },
        ],
    })
}

struct BlitContext {
    desc: CreateDesc,
    output: Texture,
    config: Option<ConfigureDesc>,
    prepared: Option<(u64, PrepareDesc)>,
}

/// Nearest-frame interpolation on the graphics queue: the generated frame is
/// a scaled copy of the present color.
pub struct BlitFrameGenerator {
    device: Rc<Device>,
    next_handle: u64,
    contexts: HashMap<ContextHandle, BlitContext>,
}

impl BlitFrameGenerator {
    pub fn new(device: Rc<Device>) -> Self {
        Self {
            device,
            next_handle: 1,
            contexts: HashMap::new(),
        }
    }

    fn context(&mut self, handle: ContextHandle) -> Result<&mut BlitContext, FrameGenError> {
        self.contexts
            .get_mut(&handle)
            .ok_or_else(|| FrameGenError::Engine(format!("unknown context {:?}", handle)))
    }

    fn engine_error(error: crate::graphics::RenderError) -> FrameGenError {
        FrameGenError::Engine(error.to_string())
    }
}

impl FrameGenerationBackend for BlitFrameGenerator {
    fn create_context(&mut self, desc: &CreateDesc) -> Result<ContextHandle, FrameGenError> {
        validate_create_desc(desc)?;

        self.device
            .find_supported_format(
                &[desc.back_buffer_format],
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::BLIT_DST | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            )
            .map_err(|_| {
                FrameGenError::ContextRejected(format!(
                    "{:?} cannot be blitted to on this device",
                    desc.back_buffer_format
                ))
            })?;

        let output = Texture::new(
            self.device.clone(),
            desc.back_buffer_format,
            desc.max_render_size,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
        )
        .map_err(Self::engine_error)?;

        self.device
            .transition_image_layout(
                output.image(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .map_err(Self::engine_error)?;

        let handle = ContextHandle(self.next_handle);
        self.next_handle += 1;

        log::debug!(
            "Blit frame generator context {:?}: output {}x{} {:?}, flags {:?}",
            handle,
            desc.max_render_size.width,
            desc.max_render_size.height,
            desc.back_buffer_format,
            desc.flags
        );

        self.contexts.insert(
            handle,
            BlitContext {
                desc: *desc,
                output,
                config: None,
                prepared: None,
            },
        );

        Ok(handle)
    }

    fn configure(
        &mut self,
        context: ContextHandle,
        desc: &ConfigureDesc,
    ) -> Result<(), FrameGenError> {
        let ctx = self.context(context)?;

        let max = ctx.desc.max_render_size;
        let rect = desc.generation_rect;

        if desc.enabled
            && (rect.left < 0
                || rect.top < 0
                || rect.left as i64 + rect.width as i64 > max.width as i64
                || rect.top as i64 + rect.height as i64 > max.height as i64)
        {
            return Err(FrameGenError::Engine(format!(
                "generation rect {:?} exceeds the {}x{} render size",
                rect, max.width, max.height
            )));
        }

        ctx.config = Some(*desc);

        Ok(())
    }

    fn dispatch_prepare(
        &mut self,
        context: ContextHandle,
        desc: &PrepareDesc,
    ) -> Result<(), FrameGenError> {
        let device = self.device.clone();
        let ctx = self.context(context)?;

        let attachment_writes = BarrierScope::new(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );
        let engine_reads = BarrierScope::new(
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
        );

        for input in [desc.depth, desc.motion_vectors] {
            unsafe {
                device.cmd_transition_image(
                    desc.command_buffer,
                    input.image,
                    aspect_for_format(input.format),
                    input.layout,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    attachment_writes,
                    engine_reads,
                );
            }
        }

        log::trace!(
            "Prepared frame {} ({}x{}, {:.1} ms)",
            desc.frame_id,
            desc.render_size.width,
            desc.render_size.height,
            desc.frame_time_delta
        );

        ctx.prepared = Some((desc.frame_id, *desc));

        Ok(())
    }

    fn dispatch_generate(
        &mut self,
        context: ContextHandle,
        desc: &GenerateDesc,
    ) -> Result<(), FrameGenError> {
        let device = self.device.clone();
        let ctx = self.context(context)?;

        let prepared = match ctx.prepared {
            Some((frame_id, prepared)) if frame_id == desc.frame_id => prepared,
            _ => return Err(FrameGenError::PrepareMissing(desc.frame_id)),
        };

        if !ctx.config.map_or(false, |config| config.enabled) {
            return Err(FrameGenError::NotConfigured("dispatch generate"));
        }

        if desc.num_generated_frames == 0 {
            return Ok(());
        }

        log::trace!(
            "Generating frame {} with jitter {:?}, motion vector scale {:?}",
            desc.frame_id,
            prepared.jitter_offset,
            prepared.motion_vector_scale
        );

        if desc.reset {
            log::debug!("Frame {}: interpolation history reset", desc.frame_id);
        }

        let region = blit_region(
            desc.present_color.extent,
            desc.generation_rect,
            desc.output.extent,
        )?;

        let color = vk::ImageAspectFlags::COLOR;
        let transfer_read =
            BarrierScope::new(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ);
        let transfer_write =
            BarrierScope::new(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE);
        let shader_read = BarrierScope::new(
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        );
        let attachment_write = BarrierScope::new(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        );

        let command_buffer = desc.command_buffer;
        let source = desc.present_color;
        let output = desc.output;

        unsafe {
            device.cmd_transition_image(
                command_buffer,
                source.image,
                color,
                source.layout,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                attachment_write,
                transfer_read,
            );

            device.cmd_transition_image(
                command_buffer,
                output.image,
                color,
                output.layout,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                shader_read,
                transfer_write,
            );

            device.logical_device.cmd_blit_image(
                command_buffer,
                source.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                output.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );

            device.cmd_transition_image(
                command_buffer,
                source.image,
                color,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                source.layout,
                transfer_read,
                shader_read,
            );

            device.cmd_transition_image(
                command_buffer,
                output.image,
                color,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                output.layout,
                transfer_write,
                shader_read,
            );
        }

        Ok(())
    }

    fn query_interpolation_output(
        &mut self,
        context: ContextHandle,
    ) -> Result<FrameResource, FrameGenError> {
        let ctx = self.context(context)?;

        Ok(ctx
            .output
            .resource(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
    }

    fn destroy_context(&mut self, context: ContextHandle) {
        if self.contexts.remove(&context).is_some() {
            log::debug!("Destroyed blit frame generator context {:?}", context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(format: vk::Format, hdr: bool) -> CreateDesc {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };

        CreateDesc {
            display_size: extent,
            max_render_size: extent,
            back_buffer_format: format,
            flags: CreateFlags {
                hdr,
                ..Default::default()
            },
        }
    }

    #[test]
    fn ldr_back_buffer_is_accepted() {
        assert!(validate_create_desc(&desc(vk::Format::B8G8R8A8_UNORM, false)).is_ok());
        assert!(validate_create_desc(&desc(vk::Format::R16G16B16A16_SFLOAT, true)).is_ok());
    }

    #[test]
    fn hdr_with_eight_bit_format_is_rejected() {
        assert!(matches!(
            validate_create_desc(&desc(vk::Format::B8G8R8A8_UNORM, true)),
            Err(FrameGenError::ContextRejected(_))
        ));
    }

    #[test]
    fn unknown_format_and_empty_size_are_rejected() {
        assert!(matches!(
            validate_create_desc(&desc(vk::Format::R32_UINT, false)),
            Err(FrameGenError::ContextRejected(_))
        ));

        let mut empty = desc(vk::Format::B8G8R8A8_UNORM, false);
        empty.max_render_size.height = 0;

        assert!(matches!(
            validate_create_desc(&empty),
            Err(FrameGenError::ContextRejected(_))
        ));
    }

    #[test]
    fn region_scales_source_into_rect() {
        let source = vk::Extent2D {
            width: 640,
            height: 360,
        };
        let output = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let rect = GenerationRect {
            left: 10,
            top: 20,
            width: 1200,
            height: 600,
        };

        let region = blit_region(source, rect, output).unwrap();

        assert_eq!(region.src_offsets[1].x, 640);
        assert_eq!(region.src_offsets[1].y, 360);
        assert_eq!((region.dst_offsets[0].x, region.dst_offsets[0].y), (10, 20));
        assert_eq!((region.dst_offsets[1].x, region.dst_offsets[1].y), (1210, 620));
    }

    #[test]
    fn region_outside_output_is_an_error() {
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let rect = GenerationRect {
            left: 32,
            top: 0,
            width: 64,
            height: 64,
        };

        assert!(blit_region(extent, rect, extent).is_err());
        assert!(blit_region(
            extent,
            GenerationRect {
                left: -1,
                top: 0,
                width: 8,
                height: 8
            },
            extent
        )
        .is_err());
        assert!(blit_region(extent, GenerationRect::full(vk::Extent2D::default()), extent).is_err());
    }
}
