use std::{ffi::c_void, marker::PhantomData, rc::Rc};

use super::{Device, RenderError};

/// Device buffer holding `capacity` elements of `T`.
pub struct Buffer<T: bytemuck::Pod> {
    device: Rc<Device>,
    buffer: ash::vk::Buffer,
    memory: ash::vk::DeviceMemory,
    mapped: *mut c_void,
    capacity: usize,
    coherent: bool,

    _p: PhantomData<T>,
}

impl<T: bytemuck::Pod> Buffer<T> {
    pub fn new(
        device: Rc<Device>,
        capacity: usize,
        usage_flags: ash::vk::BufferUsageFlags,
        memory_property_flags: ash::vk::MemoryPropertyFlags,
    ) -> anyhow::Result<Self, RenderError> {
        let byte_len = std::mem::size_of::<T>() * capacity;

        let (buffer, memory, coherent) =
            device.create_buffer(byte_len as u64, usage_flags, memory_property_flags)?;

        Ok(Self {
            device,
            buffer,
            memory,
            mapped: std::ptr::null_mut(),
            capacity,
            coherent,

            _p: PhantomData {},
        })
    }

    /// Host-visible buffer filled with `elements`, for staging uploads.
    pub fn staging(device: Rc<Device>, elements: &[T]) -> anyhow::Result<Self, RenderError> {
        let mut buffer = Self::new(
            device,
            elements.len(),
            ash::vk::BufferUsageFlags::TRANSFER_SRC,
            ash::vk::MemoryPropertyFlags::HOST_VISIBLE
                | ash::vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        buffer.map()?;
        buffer.write_to_buffer(elements);
        buffer.unmap();

        Ok(buffer)
    }

    pub fn map(&mut self) -> anyhow::Result<(), RenderError> {
        if !self.mapped.is_null() {
            return Ok(());
        }

        let mem_size = (std::mem::size_of::<T>() * self.capacity) as u64;

        self.mapped = unsafe {
            self.device.logical_device.map_memory(
                self.memory,
                0,
                mem_size,
                ash::vk::MemoryMapFlags::empty(),
            )?
        };

        Ok(())
    }

    pub fn unmap(&mut self) {
        if !self.mapped.is_null() {
            unsafe { self.device.logical_device.unmap_memory(self.memory) };

            self.mapped = std::ptr::null_mut();
        }
    }

    /// Copies `elements` to the start of the mapped range.
    pub fn write_to_buffer(&mut self, elements: &[T]) {
        assert!(!self.mapped.is_null(), "Cannot copy to unmapped buffer");
        assert!(elements.len() <= self.capacity, "Buffer overflow");

        let bytes: &[u8] = bytemuck::cast_slice(elements);

        unsafe {
            bytes
                .as_ptr()
                .copy_to_nonoverlapping(self.mapped as *mut u8, bytes.len());
        }
    }

    pub fn flush(&self) -> anyhow::Result<(), RenderError> {
        if self.coherent {
            return Ok(());
        }

        let mapped_range = [ash::vk::MappedMemoryRange {
            memory: self.memory,
            offset: 0,
            size: ash::vk::WHOLE_SIZE,
            ..Default::default()
        }];

        Ok(unsafe {
            self.device
                .logical_device
                .flush_mapped_memory_ranges(&mapped_range)?
        })
    }

    #[inline]
    pub fn descriptor_info(&self) -> ash::vk::DescriptorBufferInfo {
        ash::vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: ash::vk::WHOLE_SIZE,
        }
    }

    #[inline]
    pub fn inner(&self) -> ash::vk::Buffer {
        self.buffer
    }
}

impl<T: bytemuck::Pod> Drop for Buffer<T> {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan buffer");

        self.unmap();

        unsafe {
            self.device.logical_device.destroy_buffer(self.buffer, None);
            self.device.logical_device.free_memory(self.memory, None);
        }
    }
}
