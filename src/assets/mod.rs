mod decode;
mod matrix;
mod paths;

pub use decode::*;
pub use matrix::*;
pub use paths::*;

use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Matrix file {path} holds {floats_read} of 20 floats")]
    ShortMatrixFile { path: PathBuf, floats_read: usize },
    #[error("{kind} image of frame {index} is {found:?}, color image is {expected:?}")]
    DimensionMismatch {
        index: u32,
        kind: &'static str,
        expected: (u32, u32),
        found: (u32, u32),
    },
}

/// Host-side pixels of one decoded image, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer<T> {
    pub width: u32,
    pub height: u32,
    pub data: Vec<T>,
}

impl<T: bytemuck::Pod> PixelBuffer<T> {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Everything needed to render one frame of the sequence.
#[derive(Debug, Clone)]
pub struct FrameAsset {
    pub index: u32,
    /// RGBA8, `R8G8B8A8_UNORM`.
    pub color: PixelBuffer<u8>,
    /// One word per pixel, low 24 bits meaningful, `R32_UINT`.
    pub depth: PixelBuffer<u32>,
    /// Two words per pixel, `R16G16_UINT`.
    pub motion_vectors: PixelBuffer<u16>,
    pub matrices: CameraMatrices,
}

/// Reads indexed frames from a sequence directory.
pub struct FrameResourceLoader {
    layout: FrameLayout,
}

impl FrameResourceLoader {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    #[inline]
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Loads and repacks frame `index`.
    ///
    /// Nothing is returned unless all three images and both matrix records
    /// were read completely, so a failed load never hands out partial data.
    pub fn load(&self, index: u32) -> Result<FrameAsset, AssetError> {
        let paths = self.layout.paths(index);

        let color = Self::load_rgba(&paths.color)?;
        let expected = color.dimensions();

        let depth_source = Self::load_rgba(&paths.depth)?;
        Self::check_dimensions(index, "depth", expected, depth_source.dimensions())?;

        let motion_source = Self::load_rgba(&paths.motion_vectors)?;
        Self::check_dimensions(index, "motion vector", expected, motion_source.dimensions())?;

        let matrices = CameraMatrices {
            current: Self::load_matrix(&paths.matrix)?,
            previous: Self::load_matrix(&paths.previous_matrix)?,
        };

        let (width, height) = expected;

        let depth = PixelBuffer {
            width,
            height,
            data: rebuild_depth(depth_source.as_raw()),
        };

        let motion_vectors = PixelBuffer {
            width,
            height,
            data: rebuild_motion_vectors(motion_source.as_raw()),
        };

        log::debug!(
            "Loaded frame {} ({}x{}) from {}",
            index,
            width,
            height,
            paths.color.display()
        );
        log::trace!("Frame {} camera extras {:?}", index, matrices.current.auxiliary());

        Ok(FrameAsset {
            index,
            color: PixelBuffer {
                width,
                height,
                data: color.into_raw(),
            },
            depth,
            motion_vectors,
            matrices,
        })
    }

    fn read_file(path: &Path) -> Result<Vec<u8>, AssetError> {
        std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_rgba(path: &Path) -> Result<image::RgbaImage, AssetError> {
        let bytes = Self::read_file(path)?;

        decode_rgba8(&bytes, path)
    }

    fn load_matrix(path: &Path) -> Result<MatrixRecord, AssetError> {
        let file = std::fs::File::open(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut floats = [0.0; MATRIX_FLOATS];

        read_matrix_record(std::io::BufReader::new(file), &mut floats).map_err(|e| match e {
            MatrixReadError::ShortRead { floats_read } => AssetError::ShortMatrixFile {
                path: path.to_path_buf(),
                floats_read,
            },
            MatrixReadError::Io(source) => AssetError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

        Ok(MatrixRecord::from_floats(&floats))
    }

    fn check_dimensions(
        index: u32,
        kind: &'static str,
        expected: (u32, u32),
        found: (u32, u32),
    ) -> Result<(), AssetError> {
        if expected == found {
            Ok(())
        } else {
            Err(AssetError::DimensionMismatch {
                index,
                kind,
                expected,
                found,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn write_png(path: &Path, width: u32, height: u32, pixel: [u8; 4]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbaImage::from_pixel(width, height, image::Rgba(pixel))
            .save(path)
            .unwrap();
    }

    pub fn write_matrix(path: &Path, floats: usize, value: f32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let bytes: Vec<u8> = (0..floats).flat_map(|_| value.to_le_bytes()).collect();
        std::fs::write(path, bytes).unwrap();
    }

    /// Writes a complete 4x2 frame, including the matrix record of the
    /// frame before it.
    pub fn write_frame(layout: &FrameLayout, index: u32) {
        let paths = layout.paths(index);

        write_png(&paths.color, 4, 2, [10, 20, 30, 255]);
        write_png(&paths.depth, 4, 2, [128, 0, 0, 255]);
        write_png(&paths.motion_vectors, 4, 2, [1, 2, 3, 4]);
        write_matrix(&paths.matrix, MATRIX_FLOATS, 2.0);
        write_matrix(&paths.previous_matrix, MATRIX_FLOATS, 1.0);
    }

    #[test]
    fn loads_raw_frame() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);
        write_frame(&layout, 5);

        assert!(dir.path().join("color/color_frame107.png").exists());

        let asset = FrameResourceLoader::new(layout).load(5).unwrap();

        assert_eq!(asset.index, 5);
        assert_eq!(asset.color.dimensions(), (4, 2));
        assert_eq!(asset.color.data.len(), 4 * 2 * 4);
        assert_eq!(asset.depth.data.len(), 4 * 2);
        assert_eq!(asset.depth.data[0], decode_depth(128, 0, 0));
        assert_eq!(asset.motion_vectors.data.len(), 4 * 2 * 2);
        assert_eq!(&asset.motion_vectors.data[..2], &[0x0102, 0x0304]);
        assert_eq!(asset.depth.as_bytes().len(), 4 * 2 * 4);
        assert_eq!(asset.matrices.current.rows[0].x, 2.0);
        assert_eq!(asset.matrices.previous.rows[4].w, 1.0);
    }

    #[test]
    fn loads_compressed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Compressed);
        write_frame(&layout, 5);

        assert!(dir.path().join("color_decode/color_frame0007.png").exists());
        assert!(dir.path().join("vpMatrix/vpMatrix_frame0006.bin").exists());

        assert!(FrameResourceLoader::new(layout).load(5).is_ok());
    }

    #[test]
    fn missing_image_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);

        let err = FrameResourceLoader::new(layout).load(0).unwrap_err();

        match err {
            AssetError::Io { path, .. } => assert!(path.ends_with("color/color_frame102.png")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_matrix_file_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);
        write_frame(&layout, 1);
        write_matrix(&layout.paths(1).matrix, 12, 3.0);

        let err = FrameResourceLoader::new(layout).load(1).unwrap_err();

        assert!(matches!(
            err,
            AssetError::ShortMatrixFile { floats_read: 12, .. }
        ));
    }

    #[test]
    fn missing_previous_matrix_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);
        write_frame(&layout, 1);
        std::fs::remove_file(&layout.paths(1).previous_matrix).unwrap();

        let err = FrameResourceLoader::new(layout).load(1).unwrap_err();

        match err {
            AssetError::Io { path, source } => {
                assert!(path.ends_with("vpMatrix/vpMatrix_frame102.bin"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FrameLayout::new(dir.path(), FrameAddressing::Raw);
        write_frame(&layout, 0);
        write_png(&layout.paths(0).depth, 2, 2, [0, 0, 0, 255]);

        let err = FrameResourceLoader::new(layout).load(0).unwrap_err();

        assert!(matches!(
            err,
            AssetError::DimensionMismatch {
                kind: "depth",
                found: (2, 2),
                ..
            }
        ));
    }
}
