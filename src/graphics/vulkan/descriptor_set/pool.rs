use std::rc::Rc;

use super::{Device, RenderError};

pub struct DescriptorPoolBuilder {
    device: Rc<Device>,
    pool_sizes: Vec<ash::vk::DescriptorPoolSize>,
    max_sets: u32,
}

impl DescriptorPoolBuilder {
    pub fn pool_size(mut self, descriptor_type: ash::vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(ash::vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });

        self
    }

    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;

        self
    }

    pub fn build(self) -> anyhow::Result<Rc<DescriptorPool>, RenderError> {
        let DescriptorPoolBuilder {
            device,
            pool_sizes,
            max_sets,
        } = self;

        let pool_info = ash::vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = unsafe {
            device
                .logical_device
                .create_descriptor_pool(&pool_info, None)?
        };

        Ok(Rc::new(DescriptorPool { device, pool }))
    }
}

/// Sets are never freed one by one; the pool is dropped or reset as a whole.
pub struct DescriptorPool {
    pub device: Rc<Device>,
    pool: ash::vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(device: Rc<Device>) -> DescriptorPoolBuilder {
        DescriptorPoolBuilder {
            device,
            pool_sizes: Vec::new(),
            max_sets: 16,
        }
    }

    pub fn allocate_descriptor(
        &self,
        layout: ash::vk::DescriptorSetLayout,
    ) -> anyhow::Result<ash::vk::DescriptorSet, RenderError> {
        let layouts = [layout];

        let alloc_info = ash::vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        Ok(unsafe {
            self.device
                .logical_device
                .allocate_descriptor_sets(&alloc_info)?[0]
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan descriptor pool");

        unsafe {
            self.device
                .logical_device
                .destroy_descriptor_pool(self.pool, None)
        }
    }
}
