//! Copies a presented swapchain image to host memory and writes it as a
//! binary PPM file.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    rc::Rc,
};

use ash::vk;

use super::{BarrierScope, Device, RenderError};

const CAPTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Whether texels of `format` are stored blue first.
pub fn is_bgr(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_SNORM
    )
}

/// Drops alpha from 4-byte texels laid out with `row_pitch` bytes per row.
pub fn to_rgb(data: &[u8], row_pitch: usize, width: u32, height: u32, swizzle_bgr: bool) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);

    for row in data.chunks(row_pitch.max(1)).take(height as usize) {
        for texel in row.chunks_exact(4).take(width as usize) {
            if swizzle_bgr {
                rgb.extend_from_slice(&[texel[2], texel[1], texel[0]]);
            } else {
                rgb.extend_from_slice(&texel[..3]);
            }
        }
    }

    rgb
}

pub fn write_ppm<W: Write>(
    writer: &mut W,
    width: u32,
    height: u32,
    rgb: &[u8],
) -> std::io::Result<()> {
    write!(writer, "P6\n{}\n{}\n255\n", width, height)?;
    writer.write_all(rgb)?;
    writer.flush()
}

/// Whether the device can blit `format` into a linear RGBA8 image, which
/// also converts the channel order.
pub fn supports_blit(device: &Device, format: vk::Format) -> bool {
    let src = device.format_properties(format);
    let dst = device.format_properties(CAPTURE_FORMAT);

    src.optimal_tiling_features
        .contains(vk::FormatFeatureFlags::BLIT_SRC)
        && dst
            .linear_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST)
}

/// Host-visible copy target, destroyed on drop.
struct CaptureImage {
    device: Rc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl Drop for CaptureImage {
    fn drop(&mut self) {
        log::debug!("Dropping screenshot capture image");

        unsafe {
            self.device.logical_device.destroy_image(self.image, None);
            self.device.logical_device.free_memory(self.memory, None);
        }
    }
}

/// Writes `source` to `path`. `source` must be a presented image that the
/// GPU no longer touches, in `PRESENT_SRC_KHR`; it is returned to that
/// layout.
pub fn capture(
    device: &Rc<Device>,
    source: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    path: &Path,
) -> anyhow::Result<(), RenderError> {
    let blit = supports_blit(device, format);

    if !blit {
        log::debug!("Blit from {:?} not supported, copying instead", format);
    }

    let target_format = if blit { CAPTURE_FORMAT } else { format };

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(target_format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::LINEAR)
        .usage(vk::ImageUsageFlags::TRANSFER_DST)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let (image, memory) = device.create_image_with_info(
        &image_info,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let target = CaptureImage {
        device: device.clone(),
        image,
        memory,
    };

    record_copy(device, source, target.image, extent, blit)?;

    let layout = unsafe {
        device.logical_device.get_image_subresource_layout(
            target.image,
            vk::ImageSubresource {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            },
        )
    };

    let rgb = unsafe {
        let mapped = device.logical_device.map_memory(
            target.memory,
            0,
            vk::WHOLE_SIZE,
            vk::MemoryMapFlags::empty(),
        )? as *const u8;

        let len = layout.row_pitch as usize * extent.height as usize;
        let data = std::slice::from_raw_parts(mapped.add(layout.offset as usize), len);

        let rgb = to_rgb(
            data,
            layout.row_pitch as usize,
            extent.width,
            extent.height,
            !blit && is_bgr(format),
        );

        device.logical_device.unmap_memory(target.memory);

        rgb
    };

    let mut writer = BufWriter::new(File::create(path)?);
    write_ppm(&mut writer, extent.width, extent.height, &rgb)?;

    log::info!("Screenshot saved to {}", path.display());

    Ok(())
}

fn record_copy(
    device: &Rc<Device>,
    source: vk::Image,
    target: vk::Image,
    extent: vk::Extent2D,
    blit: bool,
) -> anyhow::Result<(), RenderError> {
    use vk::{AccessFlags, ImageLayout, PipelineStageFlags};

    let transfer = PipelineStageFlags::TRANSFER;
    let none = BarrierScope::new(transfer, AccessFlags::empty());
    let memory_read = BarrierScope::new(transfer, AccessFlags::MEMORY_READ);
    let transfer_read = BarrierScope::new(transfer, AccessFlags::TRANSFER_READ);
    let transfer_write = BarrierScope::new(transfer, AccessFlags::TRANSFER_WRITE);
    let host_read = BarrierScope::new(PipelineStageFlags::HOST, AccessFlags::HOST_READ);

    let color = vk::ImageAspectFlags::COLOR;

    let subresource = vk::ImageSubresourceLayers {
        aspect_mask: color,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };

    let command_buffer = device.begin_single_time_commands()?;

    unsafe {
        device.cmd_transition_image(
            command_buffer,
            target,
            color,
            ImageLayout::UNDEFINED,
            ImageLayout::TRANSFER_DST_OPTIMAL,
            none,
            transfer_write,
        );

        device.cmd_transition_image(
            command_buffer,
            source,
            color,
            ImageLayout::PRESENT_SRC_KHR,
            ImageLayout::TRANSFER_SRC_OPTIMAL,
            memory_read,
            transfer_read,
        );

        if blit {
            let corner = vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            };

            let region = vk::ImageBlit {
                src_subresource: subresource,
                src_offsets: [vk::Offset3D::default(), corner],
                dst_subresource: subresource,
                dst_offsets: [vk::Offset3D::default(), corner],
            };

            device.logical_device.cmd_blit_image(
                command_buffer,
                source,
                ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::NEAREST,
            );
        } else {
            let region = vk::ImageCopy {
                src_subresource: subresource,
                src_offset: vk::Offset3D::default(),
                dst_subresource: subresource,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };

            device.logical_device.cmd_copy_image(
                command_buffer,
                source,
                ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        device.cmd_transition_image(
            command_buffer,
            target,
            color,
            ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::GENERAL,
            transfer_write,
            host_read,
        );

        device.cmd_transition_image(
            command_buffer,
            source,
            color,
            ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::PRESENT_SRC_KHR,
            transfer_read,
            memory_read,
        );
    }

    device.end_single_time_commands(command_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_header_and_payload() {
        let mut out = Vec::new();

        write_ppm(&mut out, 2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(&out[..11], b"P6\n2\n1\n255\n");
        assert_eq!(&out[11..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn alpha_is_dropped_and_padding_skipped() {
        // two rows of one texel, each row padded to 8 bytes
        let data = [10, 20, 30, 255, 0, 0, 0, 0, 40, 50, 60, 255, 0, 0, 0, 0];

        assert_eq!(to_rgb(&data, 8, 1, 2, false), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn bgr_texels_are_swizzled() {
        let data = [30, 20, 10, 255];

        assert_eq!(to_rgb(&data, 4, 1, 1, true), vec![10, 20, 30]);
        assert!(is_bgr(vk::Format::B8G8R8A8_UNORM));
        assert!(!is_bgr(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn screenshot_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.ppm");

        let rgb = to_rgb(&[1, 2, 3, 4, 5, 6, 7, 8], 8, 2, 1, false);
        let mut file = File::create(&path).unwrap();
        write_ppm(&mut file, 2, 1, &rgb).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 11 + 6);
        assert_eq!(&written[11..], &[1, 2, 3, 5, 6, 7]);
    }
}
