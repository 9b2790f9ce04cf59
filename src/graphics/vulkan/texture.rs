use std::rc::Rc;

use ash::vk;

use super::{Buffer, Device, RenderError};
use crate::framegen::FrameResource;

/// Bytes per texel for the formats this renderer creates.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_UINT
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        _ => None,
    }
}

pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Integer and depth formats are sampled unfiltered.
fn sampler_filter(format: vk::Format) -> vk::Filter {
    match format {
        vk::Format::R32_UINT | vk::Format::R16G16_UINT | vk::Format::D32_SFLOAT => {
            vk::Filter::NEAREST
        }
        _ => vk::Filter::LINEAR,
    }
}

pub struct ImageView {
    device: Rc<Device>,
    view: vk::ImageView,
}

impl ImageView {
    pub fn new(
        device: Rc<Device>,
        image: vk::Image,
        format: vk::Format,
    ) -> anyhow::Result<Rc<Self>, RenderError> {
        let view = unsafe {
            device.logical_device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .format(format)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect_for_format(format),
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
                None,
            )?
        };

        Ok(Rc::new(Self { device, view }))
    }

    #[inline]
    pub fn inner(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan image view");

        unsafe {
            self.device
                .logical_device
                .destroy_image_view(self.view, None);
        }
    }
}

/// A 2D device-local image with its view and sampler.
pub struct Texture {
    device: Rc<Device>,
    image: vk::Image,
    image_memory: vk::DeviceMemory,
    image_view: Rc<ImageView>,
    sampler: vk::Sampler,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Texture {
    /// Uploads tightly packed texels through a staging buffer.
    ///
    /// The returned texture is in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn from_pixels(
        device: Rc<Device>,
        bytes: &[u8],
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self, RenderError> {
        let expected = width as usize * height as usize * texel_size(format).unwrap_or(0);

        if bytes.len() != expected {
            return Err(RenderError::PixelSizeMismatch {
                expected,
                found: bytes.len(),
            });
        }

        let staging_buffer = Buffer::staging(device.clone(), bytes)?;

        let extent = vk::Extent2D { width, height };

        let texture = Self::new(
            device.clone(),
            format,
            extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        device.transition_image_layout(
            texture.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        device.copy_buffer_to_image(staging_buffer.inner(), texture.image, width, height)?;

        device.transition_image_layout(
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        Ok(texture)
    }

    /// An image rendered or copied into on the GPU. `SAMPLED` is always added
    /// to `usage`. The layout starts out undefined.
    pub fn new(
        device: Rc<Device>,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> anyhow::Result<Self, RenderError> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (image, image_memory) =
            device.create_image_with_info(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let image_view = ImageView::new(device.clone(), image, format)?;

        let sampler = Self::create_sampler(&device, sampler_filter(format))?;

        Ok(Self {
            device,
            image,
            image_memory,
            image_view,
            sampler,
            format,
            extent,
        })
    }

    fn create_sampler(
        device: &Rc<Device>,
        filter: vk::Filter,
    ) -> anyhow::Result<vk::Sampler, RenderError> {
        let sampler_create_info = vk::SamplerCreateInfo {
            mag_filter: filter,
            min_filter: filter,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mip_lod_bias: 0.0,
            anisotropy_enable: vk::FALSE,
            max_anisotropy: 1.0,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: 0.0,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };

        Ok(unsafe {
            device
                .logical_device
                .create_sampler(&sampler_create_info, None)?
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image_view.inner()
    }

    pub fn descriptor_info(&self, layout: vk::ImageLayout) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image_view.inner(),
            image_layout: layout,
        }
    }

    /// Hands the texture to the frame generation engine.
    pub fn resource(&self, layout: vk::ImageLayout) -> FrameResource {
        FrameResource {
            image: self.image,
            view: self.image_view.inner(),
            format: self.format,
            extent: self.extent,
            layout,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan texture");

        unsafe {
            self.device
                .logical_device
                .destroy_sampler(self.sampler, None);

            self.device.logical_device.destroy_image(self.image, None);

            self.device
                .logical_device
                .free_memory(self.image_memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploaded_formats_are_four_bytes_per_texel() {
        for format in [
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::R32_UINT,
            vk::Format::R16G16_UINT,
        ] {
            assert_eq!(texel_size(format), Some(4), "{:?}", format);
        }

        assert_eq!(texel_size(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::R16G16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn integer_formats_are_not_filtered() {
        assert_eq!(sampler_filter(vk::Format::R32_UINT), vk::Filter::NEAREST);
        assert_eq!(sampler_filter(vk::Format::R16G16_UINT), vk::Filter::NEAREST);
        assert_eq!(sampler_filter(vk::Format::D32_SFLOAT), vk::Filter::NEAREST);
        assert_eq!(sampler_filter(vk::Format::R8G8B8A8_UNORM), vk::Filter::LINEAR);
    }
}
