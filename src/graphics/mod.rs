pub mod vulkan;
mod window;

pub use window::*;

use crate::framegen::FrameGenError;
use crate::submission::SequenceError;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Swapchain image format has changed")]
    CompareSwapFormatsError,
    #[error("Validation layers requested, but not available")]
    MissingValidationLayers,
    #[error("No suitable physical device found")]
    NoSuitableDevice,
    #[error("Physical device does not support the {0} extension")]
    MissingDeviceExtension(String),
    #[error("No device memory type with {0:?}")]
    NoMemoryType(ash::vk::MemoryPropertyFlags),
    #[error("None of the candidate formats support {0:?}")]
    UnsupportedFormat(ash::vk::FormatFeatureFlags),
    #[error("Unsupported layout transition {0:?} -> {1:?}")]
    UnsupportedLayoutTransition(ash::vk::ImageLayout, ash::vk::ImageLayout),
    #[error("Shader {name} is not valid SPIR-V (was glslc available at build time?)")]
    InvalidShader {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Descriptor set layout has no single binding {0}")]
    UnknownBinding(u32),
    #[error("Pixel data holds {found} bytes, {expected} expected")]
    PixelSizeMismatch { expected: usize, found: usize },
    #[error("Failed to write the screenshot")]
    ScreenshotIo(#[from] std::io::Error),
    #[error("Frame generation failed")]
    FrameGenError(#[from] FrameGenError),
    #[error("Queue submission failed")]
    SequenceError(#[from] SequenceError),
    #[error("Vulkan call failed: {0}")]
    VulkanError(#[from] ash::vk::Result),
    #[error("Failed to load the Vulkan library")]
    LoadingError(#[from] ash::LoadingError),
}

/// Uniform block of the conversion pass, mirrored by `CameraUbo` in
/// `convert.frag.glsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_projection: [[f32; 4]; 4],
    pub prev_view_projection: [[f32; 4]; 4],
    /// near, far, vertical fov in radians, aspect ratio
    pub camera_params: [f32; 4],
    /// xy scale applied to decoded motion vectors, zw unused
    pub motion_vector_scale: [f32; 4],
}

impl CameraUniform {
    pub fn new(
        matrices: &crate::assets::CameraMatrices,
        camera: &CameraParams,
        motion_vector_scale: glam::Vec2,
    ) -> Self {
        Self {
            view_projection: matrices.current.view_projection().to_cols_array_2d(),
            prev_view_projection: matrices.previous.view_projection().to_cols_array_2d(),
            camera_params: [camera.near, camera.far, camera.fov_vertical, camera.aspect],
            motion_vector_scale: [motion_vector_scale.x, motion_vector_scale.y, 0.0, 0.0],
        }
    }
}

/// Where decoded motion vectors are scaled. The conversion pass keeps them in
/// UV units and the engine scales them to pixels, so only one side applies
/// the render extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionVectorScaling {
    /// Written into [`CameraUniform::motion_vector_scale`].
    pub conversion: glam::Vec2,
    /// Handed to the engine with the prepare dispatch.
    pub engine: glam::Vec2,
}

impl MotionVectorScaling {
    pub fn for_extent(extent: ash::vk::Extent2D) -> Self {
        Self {
            conversion: glam::Vec2::ONE,
            engine: glam::Vec2::new(extent.width as f32, extent.height as f32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    /// Radians.
    pub fov_vertical: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{CameraMatrices, MatrixRecord, MATRIX_FLOATS};

    #[test]
    fn uniform_layout_matches_std140_block() {
        // two mat4 and two vec4, no padding
        assert_eq!(std::mem::size_of::<CameraUniform>(), 2 * 64 + 2 * 16);
    }

    #[test]
    fn uniform_carries_both_matrices() {
        let mut floats = [0.0; MATRIX_FLOATS];
        floats[3] = 7.0;
        let current = MatrixRecord::from_floats(&floats);

        let matrices = CameraMatrices {
            current,
            previous: MatrixRecord::default(),
        };
        let camera = CameraParams {
            fov_vertical: 1.0,
            near: 0.1,
            far: 512.0,
            aspect: 2.0,
        };

        let ubo = CameraUniform::new(&matrices, &camera, glam::Vec2::new(640.0, 360.0));

        // row 0, column 3 lands in column 3 of the column-major upload
        assert_eq!(ubo.view_projection[3][0], 7.0);
        assert_eq!(ubo.prev_view_projection, [[0.0; 4]; 4]);
        assert_eq!(ubo.camera_params, [0.1, 512.0, 1.0, 2.0]);
        assert_eq!(ubo.motion_vector_scale[..2], [640.0, 360.0]);
    }

    #[test]
    fn motion_vectors_reach_pixel_units_once() {
        let extent = ash::vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let scaling = MotionVectorScaling::for_extent(extent);

        // the attachment stays in UV units
        assert_eq!(scaling.conversion, glam::Vec2::ONE);

        let uv = glam::Vec2::new(0.25, -0.5);
        assert_eq!(uv * scaling.conversion * scaling.engine, glam::Vec2::new(480.0, -540.0));

        let ubo = CameraUniform::new(
            &CameraMatrices::default(),
            &CameraParams {
                fov_vertical: 1.0,
                near: 0.1,
                far: 512.0,
                aspect: 16.0 / 9.0,
            },
            scaling.conversion,
        );
        assert_eq!(ubo.motion_vector_scale[..2], [1.0, 1.0]);
    }
}
