use std::path::Path;

use super::AssetError;

/// Largest value a rebuilt depth word may hold (24-bit unsigned fixed point).
pub const DEPTH_MAX: u32 = (1 << 24) - 1;

const CHANNEL_MAX: u32 = 255;
const COMPOSITE_MAX: u32 = CHANNEL_MAX * CHANNEL_MAX * CHANNEL_MAX;

/// Decodes PNG bytes into tightly packed RGBA8 rows, bottom row first.
///
/// Every source is expanded to four 8-bit channels regardless of how it was
/// stored, so the rebuild functions below can index pixels with a fixed
/// stride of 4.
pub fn decode_rgba8(bytes: &[u8], path: &Path) -> Result<image::RgbaImage, AssetError> {
    let mut image = image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|source| AssetError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    // GPU rows start at the bottom
    image::imageops::flip_vertical_in_place(&mut image);

    Ok(image)
}

/// `r * 255² + g * 255 + b`, the value the depth encoding is linear in.
#[inline]
pub fn depth_composite(r: u8, g: u8, b: u8) -> u32 {
    r as u32 * CHANNEL_MAX * CHANNEL_MAX + g as u32 * CHANNEL_MAX + b as u32
}

/// Rebuilds one depth sample from three color channels.
///
/// The channels hold `r/255 + g/255² + b/255³`, which is scaled to a 24-bit
/// unsigned integer stored in a 32-bit word. The top 8 bits are always zero.
#[inline]
pub fn decode_depth(r: u8, g: u8, b: u8) -> u32 {
    let depth = depth_composite(r, g, b) as f64 / COMPOSITE_MAX as f64;

    ((depth * DEPTH_MAX as f64) as u32).min(DEPTH_MAX)
}

/// Inverse of [`decode_depth`], used to check that rebuilt depth survives a
/// round trip through the channel encoding.
#[cfg(test)]
pub fn encode_depth(depth: u32) -> [u8; 3] {
    let depth = depth.min(DEPTH_MAX);

    let composite = ((depth as f64 / DEPTH_MAX as f64) * COMPOSITE_MAX as f64).round() as u32;

    let r = composite / (CHANNEL_MAX * CHANNEL_MAX);
    let rem = composite % (CHANNEL_MAX * CHANNEL_MAX);

    [r as u8, (rem / CHANNEL_MAX) as u8, (rem % CHANNEL_MAX) as u8]
}

pub fn rebuild_depth(rgba: &[u8]) -> Vec<u32> {
    rgba.chunks_exact(4)
        .map(|px| decode_depth(px[0], px[1], px[2]))
        .collect()
}

/// Packs one RGBA8 pixel into two 16-bit words, high byte first.
#[inline]
pub fn pack_motion_vector(px: [u8; 4]) -> [u16; 2] {
    [
        (px[0] as u16) << 8 | px[1] as u16,
        (px[2] as u16) << 8 | px[3] as u16,
    ]
}

#[inline]
pub fn unpack_motion_vector(words: [u16; 2]) -> [u8; 4] {
    [
        (words[0] >> 8) as u8,
        words[0] as u8,
        (words[1] >> 8) as u8,
        words[1] as u8,
    ]
}

/// Rebuilds a motion-vector image as `R16G16_UINT` texels.
pub fn rebuild_motion_vectors(rgba: &[u8]) -> Vec<u16> {
    let mut words = Vec::with_capacity(rgba.len() / 2);

    for px in rgba.chunks_exact(4) {
        words.extend_from_slice(&pack_motion_vector([px[0], px[1], px[2], px[3]]));
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_extremes() {
        assert_eq!(decode_depth(0, 0, 0), 0);
        assert_eq!(decode_depth(255, 0, 0), DEPTH_MAX);
        // the channel encoding can overshoot 1.0, the word cannot
        assert_eq!(decode_depth(255, 255, 255), DEPTH_MAX);
    }

    #[test]
    fn depth_is_monotonic_in_composite() {
        let mut samples = Vec::new();
        for r in (0..=255u16).step_by(5) {
            for g in (0..=255u16).step_by(3) {
                for b in [0u16, 1, 127, 254, 255] {
                    let (r, g, b) = (r as u8, g as u8, b as u8);
                    samples.push((depth_composite(r, g, b), decode_depth(r, g, b)));
                }
            }
        }

        samples.sort_by_key(|&(composite, _)| composite);

        for pair in samples.windows(2) {
            assert!(
                pair[0].1 <= pair[1].1,
                "composite {} -> {} but {} -> {}",
                pair[0].0,
                pair[0].1,
                pair[1].0,
                pair[1].1
            );
        }
    }

    #[test]
    fn equal_composites_decode_equally() {
        // (g, 255) and (g + 1, 0) describe the same composite
        assert_eq!(depth_composite(10, 20, 255), depth_composite(10, 21, 0));
        assert_eq!(decode_depth(10, 20, 255), decode_depth(10, 21, 0));
    }

    #[test]
    fn depth_reencodes_within_one_step() {
        for depth in (0..=DEPTH_MAX).step_by(4099).chain([1, DEPTH_MAX - 1, DEPTH_MAX]) {
            let [r, g, b] = encode_depth(depth);
            let again = decode_depth(r, g, b);

            assert!(
                again.abs_diff(depth) <= 1,
                "depth {depth} re-encoded as {again}"
            );
        }
    }

    #[test]
    fn depth_words_keep_top_byte_clear() {
        let rgba = [255, 255, 255, 255, 12, 200, 7, 0, 0, 0, 1, 9];
        let words = rebuild_depth(&rgba);

        assert_eq!(words.len(), 3);
        assert!(words.iter().all(|w| w & 0xFF00_0000 == 0));
        // alpha does not take part in depth
        assert_eq!(words[2], decode_depth(0, 0, 1));
    }

    #[test]
    fn motion_vector_packing_is_lossless() {
        for r in (0..=255u16).step_by(17) {
            for g in (0..=255u16).step_by(15) {
                for b in [0u8, 1, 128, 255] {
                    for a in [0u8, 64, 255] {
                        let px = [r as u8, g as u8, b, a];
                        assert_eq!(unpack_motion_vector(pack_motion_vector(px)), px);
                    }
                }
            }
        }
    }

    #[test]
    fn motion_vector_words_are_high_byte_first() {
        assert_eq!(pack_motion_vector([0x12, 0x34, 0xAB, 0xCD]), [0x1234, 0xABCD]);

        let words = rebuild_motion_vectors(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(words, vec![0x0102, 0x0304, 0x0506, 0x0708]);
    }

    #[test]
    fn decode_flips_rows() {
        let mut source = image::RgbaImage::new(1, 2);
        source.put_pixel(0, 0, image::Rgba([1, 1, 1, 255]));
        source.put_pixel(0, 1, image::Rgba([2, 2, 2, 255]));

        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(source)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode_rgba8(&png, Path::new("flip.png")).unwrap();

        assert_eq!(decoded.get_pixel(0, 0).0, [2, 2, 2, 255]);
        assert_eq!(decoded.get_pixel(0, 1).0, [1, 1, 1, 255]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_rgba8(b"not a png", Path::new("bad.png")).unwrap_err();

        assert!(matches!(err, AssetError::Decode { .. }));
    }
}
