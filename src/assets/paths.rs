use std::path::{Path, PathBuf};

/// How frame indices map to file names under the sequence directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAddressing {
    /// `color/color_frame107.png`: plain number, offset by 102.
    Raw,
    /// `color_decode/color_frame0007.png`: four digits, offset by 2.
    Compressed,
}

impl FrameAddressing {
    pub fn base(self) -> u32 {
        match self {
            FrameAddressing::Raw => 102,
            FrameAddressing::Compressed => 2,
        }
    }

    fn dir_suffix(self) -> &'static str {
        match self {
            FrameAddressing::Raw => "",
            FrameAddressing::Compressed => "_decode",
        }
    }

    fn file_number(self, number: u32) -> String {
        match self {
            FrameAddressing::Raw => number.to_string(),
            FrameAddressing::Compressed => format!("{number:04}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePaths {
    pub color: PathBuf,
    pub depth: PathBuf,
    pub motion_vectors: PathBuf,
    pub matrix: PathBuf,
    pub previous_matrix: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FrameLayout {
    root: PathBuf,
    addressing: FrameAddressing,
}

impl FrameLayout {
    pub fn new(root: impl Into<PathBuf>, addressing: FrameAddressing) -> Self {
        Self {
            root: root.into(),
            addressing,
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn addressing(&self) -> FrameAddressing {
        self.addressing
    }

    /// File number for an asset index, `index + base`.
    #[inline]
    pub fn file_index(&self, index: u32) -> u32 {
        index + self.addressing.base()
    }

    pub fn paths(&self, index: u32) -> FramePaths {
        let number = self.file_index(index);

        FramePaths {
            color: self.image_path("color", number),
            depth: self.image_path("depth", number),
            motion_vectors: self.image_path("mvBackward", number),
            matrix: self.matrix_path(number),
            previous_matrix: self.matrix_path(number.saturating_sub(1)),
        }
    }

    fn image_path(&self, kind: &str, number: u32) -> PathBuf {
        self.root
            .join(format!("{kind}{}", self.addressing.dir_suffix()))
            .join(format!("{kind}_frame{}.png", self.addressing.file_number(number)))
    }

    fn matrix_path(&self, number: u32) -> PathBuf {
        self.root
            .join("vpMatrix")
            .join(format!("vpMatrix_frame{}.bin", self.addressing.file_number(number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_addressing_offsets_by_102() {
        let paths = FrameLayout::new("/seq", FrameAddressing::Raw).paths(5);

        assert_eq!(paths.color, Path::new("/seq/color/color_frame107.png"));
        assert_eq!(paths.depth, Path::new("/seq/depth/depth_frame107.png"));
        assert_eq!(
            paths.motion_vectors,
            Path::new("/seq/mvBackward/mvBackward_frame107.png")
        );
        assert_eq!(paths.matrix, Path::new("/seq/vpMatrix/vpMatrix_frame107.bin"));
        assert_eq!(
            paths.previous_matrix,
            Path::new("/seq/vpMatrix/vpMatrix_frame106.bin")
        );
    }

    #[test]
    fn compressed_addressing_pads_and_offsets_by_2() {
        let paths = FrameLayout::new("/seq", FrameAddressing::Compressed).paths(5);

        assert_eq!(paths.color, Path::new("/seq/color_decode/color_frame0007.png"));
        assert_eq!(paths.depth, Path::new("/seq/depth_decode/depth_frame0007.png"));
        assert_eq!(
            paths.motion_vectors,
            Path::new("/seq/mvBackward_decode/mvBackward_frame0007.png")
        );
        assert_eq!(paths.matrix, Path::new("/seq/vpMatrix/vpMatrix_frame0007.bin"));
        assert_eq!(
            paths.previous_matrix,
            Path::new("/seq/vpMatrix/vpMatrix_frame0006.bin")
        );
    }

    #[test]
    fn wide_numbers_are_not_truncated() {
        let paths = FrameLayout::new("/seq", FrameAddressing::Compressed).paths(12_345);

        assert_eq!(paths.color, Path::new("/seq/color_decode/color_frame12347.png"));
    }
}
