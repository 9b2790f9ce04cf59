use std::rc::Rc;

use super::{DescriptorPool, DescriptorSetLayout, RenderError};

enum DescriptorInfo {
    Buffer(ash::vk::DescriptorBufferInfo),
    Image(ash::vk::DescriptorImageInfo),
}

/// Collects single-descriptor writes and applies them to a new or existing
/// set.
pub struct DescriptorSetWriter {
    set_layout: Rc<DescriptorSetLayout>,
    pool: Rc<DescriptorPool>,
    writes: Vec<(u32, ash::vk::DescriptorType, DescriptorInfo)>,
}

impl DescriptorSetWriter {
    pub fn new(set_layout: Rc<DescriptorSetLayout>, pool: Rc<DescriptorPool>) -> Self {
        DescriptorSetWriter {
            set_layout,
            pool,
            writes: Vec::new(),
        }
    }

    pub fn write_buffer(
        mut self,
        binding: u32,
        buffer_info: ash::vk::DescriptorBufferInfo,
    ) -> anyhow::Result<Self, RenderError> {
        let descriptor_type = self.set_layout.binding(binding)?;

        self.writes
            .push((binding, descriptor_type, DescriptorInfo::Buffer(buffer_info)));

        Ok(self)
    }

    pub fn write_image(
        mut self,
        binding: u32,
        image_info: ash::vk::DescriptorImageInfo,
    ) -> anyhow::Result<Self, RenderError> {
        let descriptor_type = self.set_layout.binding(binding)?;

        self.writes
            .push((binding, descriptor_type, DescriptorInfo::Image(image_info)));

        Ok(self)
    }

    pub fn build(&self) -> anyhow::Result<ash::vk::DescriptorSet, RenderError> {
        let set = self.pool.allocate_descriptor(self.set_layout.inner())?;

        self.overwrite(set);

        Ok(set)
    }

    /// The set must not be in use by pending command buffers.
    pub fn overwrite(&self, set: ash::vk::DescriptorSet) {
        let writes = self
            .writes
            .iter()
            .map(|(binding, descriptor_type, info)| {
                let write = ash::vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type);

                match info {
                    DescriptorInfo::Buffer(info) => {
                        write.buffer_info(std::slice::from_ref(info)).build()
                    }
                    DescriptorInfo::Image(info) => {
                        write.image_info(std::slice::from_ref(info)).build()
                    }
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.pool
                .device
                .logical_device
                .update_descriptor_sets(&writes, &[]);
        }
    }
}
