use std::rc::Rc;

use ash::vk;

use super::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetWriter};
use super::{Device, Pipeline, PipelineLayout, RenderError};
use crate::framegen::GenerationRect;

/// Which image the quad samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentSource {
    /// The color attachment of the conversion pass.
    Converted,
    /// The frame generation output.
    Generated,
}

impl PresentSource {
    fn slot(self) -> usize {
        match self {
            PresentSource::Converted => 0,
            PresentSource::Generated => 1,
        }
    }
}

/// Push constant block of `present.vert.glsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PresentPush {
    /// Center and half size in clip space.
    pub rect: [f32; 4],
    /// Offset and scale in texture space.
    pub uv: [f32; 4],
}

impl PresentPush {
    /// Shows `region` of a texture of `texture_extent` letterboxed into
    /// `target`.
    pub fn new(region: GenerationRect, texture_extent: vk::Extent2D, target: vk::Extent2D) -> Self {
        let region_extent = vk::Extent2D {
            width: region.width,
            height: region.height,
        };

        Self {
            rect: fit_rect(region_extent, target),
            uv: uv_window(region, texture_extent),
        }
    }
}

/// Largest centered rectangle with the aspect ratio of `source` that fits in
/// `target`, as clip-space center and half size.
pub fn fit_rect(source: vk::Extent2D, target: vk::Extent2D) -> [f32; 4] {
    if source.width == 0 || source.height == 0 || target.width == 0 || target.height == 0 {
        return [0.0, 0.0, 0.0, 0.0];
    }

    let source_aspect = source.width as f32 / source.height as f32;
    let target_aspect = target.width as f32 / target.height as f32;

    if source_aspect > target_aspect {
        [0.0, 0.0, 1.0, target_aspect / source_aspect]
    } else {
        [0.0, 0.0, source_aspect / target_aspect, 1.0]
    }
}

/// Texture-space window over `region`. Rows are stored bottom-up, so the
/// window runs from the last row of the region to the first.
pub fn uv_window(region: GenerationRect, texture_extent: vk::Extent2D) -> [f32; 4] {
    let width = texture_extent.width.max(1) as f32;
    let height = texture_extent.height.max(1) as f32;

    let u = region.left as f32 / width;
    let v = region.top as f32 / height;
    let du = region.width as f32 / width;
    let dv = region.height as f32 / height;

    [u, v + dv, du, -dv]
}

/// Draws one textured quad into the swapchain render pass.
pub struct PresentPass {
    device: Rc<Device>,
    set_layout: Rc<DescriptorSetLayout>,
    pool: Rc<DescriptorPool>,
    descriptor_sets: [vk::DescriptorSet; 2],
    pipeline_layout: PipelineLayout,
    pipeline: Rc<Pipeline>,
}

impl PresentPass {
    pub fn new(device: Rc<Device>, render_pass: vk::RenderPass) -> anyhow::Result<Self, RenderError> {
        let set_layout = DescriptorSetLayout::new(device.clone())
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()?;

        let pool = DescriptorPool::new(device.clone())
            .max_sets(2)
            .pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2)
            .build()?;

        let descriptor_sets = [
            pool.allocate_descriptor(set_layout.inner())?,
            pool.allocate_descriptor(set_layout.inner())?,
        ];

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<PresentPush>() as u32,
        };

        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[set_layout.inner()], &[push_constant_range])?;

        let pipeline = Self::create_pipeline(&device, render_pass, &pipeline_layout)?;

        Ok(Self {
            device,
            set_layout,
            pool,
            descriptor_sets,
            pipeline_layout,
            pipeline,
        })
    }

    fn create_pipeline(
        device: &Rc<Device>,
        render_pass: vk::RenderPass,
        pipeline_layout: &PipelineLayout,
    ) -> anyhow::Result<Rc<Pipeline>, RenderError> {
        Pipeline::start().build(
            device.clone(),
            crate::spirv!("present.vert.spv"),
            crate::spirv!("present.frag.spv"),
            render_pass,
            pipeline_layout.inner(),
        )
    }

    /// Rebuilds the pipeline for a recreated swapchain render pass.
    pub fn recreate(&mut self, render_pass: vk::RenderPass) -> anyhow::Result<(), RenderError> {
        self.pipeline = Self::create_pipeline(&self.device, render_pass, &self.pipeline_layout)?;

        Ok(())
    }

    /// Points `source` at a new image. The GPU must not be using its set.
    pub fn set_source(
        &mut self,
        source: PresentSource,
        image_info: vk::DescriptorImageInfo,
    ) -> anyhow::Result<(), RenderError> {
        DescriptorSetWriter::new(self.set_layout.clone(), self.pool.clone())
            .write_image(0, image_info)?
            .overwrite(self.descriptor_sets[source.slot()]);

        Ok(())
    }

    /// Records the quad inside an active swapchain render pass.
    pub fn record(&self, command_buffer: vk::CommandBuffer, source: PresentSource, push: &PresentPush) {
        let logical_device = &self.device.logical_device;

        unsafe {
            self.pipeline.bind(command_buffer);

            logical_device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout.inner(),
                0,
                &[self.descriptor_sets[source.slot()]],
                &[],
            );

            logical_device.cmd_push_constants(
                command_buffer,
                self.pipeline_layout.inner(),
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(push),
            );

            logical_device.cmd_draw(command_buffer, 6, 1, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn wide_source_is_letterboxed() {
        let rect = fit_rect(extent(1920, 800), extent(1280, 720));

        assert_eq!(rect[2], 1.0);
        assert!((rect[3] - (16.0 / 9.0) / (1920.0 / 800.0)).abs() < 1e-6);
    }

    #[test]
    fn tall_source_is_pillarboxed() {
        let rect = fit_rect(extent(720, 720), extent(1280, 720));

        assert_eq!(rect[3], 1.0);
        assert!((rect[2] - 0.5625).abs() < 1e-6);
    }

    #[test]
    fn matching_aspect_fills_the_target() {
        assert_eq!(fit_rect(extent(640, 360), extent(1280, 720)), [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(fit_rect(extent(0, 360), extent(1280, 720)), [0.0; 4]);
    }

    #[test]
    fn uv_window_flips_rows() {
        let region = GenerationRect {
            left: 0,
            top: 0,
            width: 960,
            height: 540,
        };

        assert_eq!(uv_window(region, extent(1920, 1080)), [0.0, 0.5, 0.5, -0.5]);
        assert_eq!(
            uv_window(GenerationRect::full(extent(64, 64)), extent(64, 64)),
            [0.0, 1.0, 1.0, -1.0]
        );
    }

    #[test]
    fn push_block_is_two_vec4() {
        assert_eq!(std::mem::size_of::<PresentPush>(), 32);
    }
}
