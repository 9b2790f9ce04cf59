use std::{ffi::CStr, rc::Rc};

use super::{Device, RenderError, ShaderModule};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

struct PipelineInfo {
    input_assembly_info: ash::vk::PipelineInputAssemblyStateCreateInfo,
    viewport_info: ash::vk::PipelineViewportStateCreateInfo,
    rasterization_info: ash::vk::PipelineRasterizationStateCreateInfo,
    multisample_info: ash::vk::PipelineMultisampleStateCreateInfo,
    color_blend_attachment: ash::vk::PipelineColorBlendAttachmentState,
    color_attachment_count: usize,
    depth_stencil_info: ash::vk::PipelineDepthStencilStateCreateInfo,
    dynamic_state_enables: Vec<ash::vk::DynamicState>,
    subpass: u32,
}

/// Graphics pipelines without vertex input; vertices come from
/// `gl_VertexIndex`.
pub struct PipelineBuilder {
    pipeline_info: PipelineInfo,
}

impl PipelineBuilder {
    pub fn start() -> Self {
        let input_assembly_info = ash::vk::PipelineInputAssemblyStateCreateInfo {
            topology: ash::vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: ash::vk::FALSE,
            ..Default::default()
        };

        let viewport_info = ash::vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let rasterization_info = ash::vk::PipelineRasterizationStateCreateInfo {
            depth_clamp_enable: ash::vk::FALSE,
            rasterizer_discard_enable: ash::vk::FALSE,
            polygon_mode: ash::vk::PolygonMode::FILL,
            cull_mode: ash::vk::CullModeFlags::NONE,
            front_face: ash::vk::FrontFace::CLOCKWISE,
            depth_bias_enable: ash::vk::FALSE,
            line_width: 1.0,
            ..Default::default()
        };

        let multisample_info = ash::vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: ash::vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: ash::vk::FALSE,
            min_sample_shading: 1.0,
            alpha_to_coverage_enable: ash::vk::FALSE,
            alpha_to_one_enable: ash::vk::FALSE,
            ..Default::default()
        };

        let color_blend_attachment = ash::vk::PipelineColorBlendAttachmentState {
            blend_enable: ash::vk::FALSE,
            src_color_blend_factor: ash::vk::BlendFactor::ONE,
            dst_color_blend_factor: ash::vk::BlendFactor::ZERO,
            color_blend_op: ash::vk::BlendOp::ADD,
            src_alpha_blend_factor: ash::vk::BlendFactor::ONE,
            dst_alpha_blend_factor: ash::vk::BlendFactor::ZERO,
            alpha_blend_op: ash::vk::BlendOp::ADD,
            color_write_mask: ash::vk::ColorComponentFlags::RGBA,
        };

        let depth_stencil_info = ash::vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: ash::vk::FALSE,
            depth_write_enable: ash::vk::FALSE,
            depth_compare_op: ash::vk::CompareOp::LESS,
            depth_bounds_test_enable: ash::vk::FALSE,
            stencil_test_enable: ash::vk::FALSE,
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            ..Default::default()
        };

        let pipeline_info = PipelineInfo {
            input_assembly_info,
            viewport_info,
            rasterization_info,
            multisample_info,
            color_blend_attachment,
            color_attachment_count: 1,
            depth_stencil_info,
            dynamic_state_enables: vec![
                ash::vk::DynamicState::VIEWPORT,
                ash::vk::DynamicState::SCISSOR,
            ],
            subpass: 0,
        };

        Self { pipeline_info }
    }

    /// Every attachment shares the same blend state.
    pub fn color_attachments(mut self, count: usize) -> Self {
        self.pipeline_info.color_attachment_count = count;

        self
    }

    /// Enables depth testing and writes with `compare_op`.
    pub fn depth_write(mut self, compare_op: ash::vk::CompareOp) -> Self {
        self.pipeline_info.depth_stencil_info.depth_test_enable = ash::vk::TRUE;
        self.pipeline_info.depth_stencil_info.depth_write_enable = ash::vk::TRUE;
        self.pipeline_info.depth_stencil_info.depth_compare_op = compare_op;

        self
    }

    pub fn build(
        &self,
        device: Rc<Device>,
        vert_spirv: (&'static str, &[u8]),
        frag_spirv: (&'static str, &[u8]),
        render_pass: ash::vk::RenderPass,
        pipeline_layout: ash::vk::PipelineLayout,
    ) -> anyhow::Result<Rc<Pipeline>, RenderError> {
        let vert_shader_module = ShaderModule::new(device.clone(), vert_spirv)?;

        let frag_shader_module = ShaderModule::new(device.clone(), frag_spirv)?;

        let shader_stages = [
            ash::vk::PipelineShaderStageCreateInfo::builder()
                .stage(ash::vk::ShaderStageFlags::VERTEX)
                .module(vert_shader_module.inner())
                .name(ENTRY_POINT)
                .build(),
            ash::vk::PipelineShaderStageCreateInfo::builder()
                .stage(ash::vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader_module.inner())
                .name(ENTRY_POINT)
                .build(),
        ];

        let vertex_input_info = ash::vk::PipelineVertexInputStateCreateInfo::builder();

        let color_blend_attachments =
            vec![self.pipeline_info.color_blend_attachment; self.pipeline_info.color_attachment_count];

        let color_blend_info = ash::vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(ash::vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_state_info = ash::vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&self.pipeline_info.dynamic_state_enables);

        let pipeline_info = ash::vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&self.pipeline_info.input_assembly_info)
            .viewport_state(&self.pipeline_info.viewport_info)
            .rasterization_state(&self.pipeline_info.rasterization_info)
            .multisample_state(&self.pipeline_info.multisample_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.pipeline_info.depth_stencil_info)
            .dynamic_state(&dynamic_state_info)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(self.pipeline_info.subpass)
            .base_pipeline_index(-1)
            .base_pipeline_handle(ash::vk::Pipeline::null());

        let graphics_pipeline = unsafe {
            device
                .logical_device
                .create_graphics_pipelines(
                    ash::vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_info),
                    None,
                )
                .map_err(|(_, e)| e)?[0]
        };

        Ok(Rc::new(Pipeline {
            device,
            graphics_pipeline,
            _vert_shader_module: vert_shader_module,
            _frag_shader_module: frag_shader_module,
        }))
    }
}

pub struct Pipeline {
    device: Rc<Device>,
    graphics_pipeline: ash::vk::Pipeline,
    _vert_shader_module: Rc<ShaderModule>,
    _frag_shader_module: Rc<ShaderModule>,
}

impl Pipeline {
    pub fn start() -> PipelineBuilder {
        PipelineBuilder::start()
    }

    pub unsafe fn bind(&self, command_buffer: ash::vk::CommandBuffer) {
        self.device.logical_device.cmd_bind_pipeline(
            command_buffer,
            ash::vk::PipelineBindPoint::GRAPHICS,
            self.graphics_pipeline,
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan pipeline");

        unsafe {
            self.device
                .logical_device
                .destroy_pipeline(self.graphics_pipeline, None);
        }
    }
}

/// Owns a pipeline layout for one set layout list and push constant range.
pub struct PipelineLayout {
    device: Rc<Device>,
    layout: ash::vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Rc<Device>,
        set_layouts: &[ash::vk::DescriptorSetLayout],
        push_constant_ranges: &[ash::vk::PushConstantRange],
    ) -> anyhow::Result<Self, RenderError> {
        let pipeline_layout_info = ash::vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device
                .logical_device
                .create_pipeline_layout(&pipeline_layout_info, None)?
        };

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn inner(&self) -> ash::vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan pipeline layout");

        unsafe {
            self.device
                .logical_device
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}
