use std::{collections::BTreeMap, rc::Rc};

use super::{Device, RenderError};

pub struct DescriptorSetLayoutBuilder {
    device: Rc<Device>,
    bindings: BTreeMap<u32, ash::vk::DescriptorSetLayoutBinding>,
}

pub struct DescriptorSetLayout {
    device: Rc<Device>,
    layout: ash::vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, ash::vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: ash::vk::DescriptorType,
        stage_flags: ash::vk::ShaderStageFlags,
    ) -> Self {
        assert!(
            !self.bindings.contains_key(&binding),
            "Binding already in use"
        );

        let layout_binding = ash::vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count: 1,
            stage_flags,
            ..Default::default()
        };

        self.bindings.insert(binding, layout_binding);

        self
    }

    pub fn build(self) -> anyhow::Result<Rc<DescriptorSetLayout>, RenderError> {
        let DescriptorSetLayoutBuilder { device, bindings } = self;

        let set_layout_bindings = bindings.values().copied().collect::<Vec<_>>();

        let layout_info =
            ash::vk::DescriptorSetLayoutCreateInfo::builder().bindings(&set_layout_bindings);

        let layout = unsafe {
            device
                .logical_device
                .create_descriptor_set_layout(&layout_info, None)?
        };

        Ok(Rc::new(DescriptorSetLayout {
            device,
            layout,
            bindings,
        }))
    }
}

impl DescriptorSetLayout {
    pub fn new(device: Rc<Device>) -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder {
            device,
            bindings: BTreeMap::new(),
        }
    }

    pub fn binding(&self, binding: u32) -> anyhow::Result<ash::vk::DescriptorType, RenderError> {
        self.bindings
            .get(&binding)
            .map(|b| b.descriptor_type)
            .ok_or(RenderError::UnknownBinding(binding))
    }

    #[inline]
    pub fn inner(&self) -> ash::vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan descriptor set layout");

        unsafe {
            self.device
                .logical_device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
