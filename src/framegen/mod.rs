//! Frame generation: synthesizing intermediate frames from color, depth and
//! motion vectors.
//!
//! The interpolation engine sits behind [`FrameGenerationBackend`]. The
//! [`FrameGenerationContext`] drives it through the
//! create → configure → dispatch → destroy protocol and owns the frame id the
//! engine relies on for temporal continuity.

mod blit_backend;
mod context;
mod counters;

pub use blit_backend::*;
pub use context::*;
pub use counters::*;

use ash::vk;

#[derive(thiserror::Error, Debug)]
pub enum FrameGenError {
    #[error("Frame generation engine rejected the context: {0}")]
    ContextRejected(String),
    #[error("Cannot {operation} while the context is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ContextState,
    },
    #[error("Frame id {found} does not match the current frame {expected}")]
    StaleFrameId { expected: u64, found: u64 },
    #[error("{0} requires a configure call right before it")]
    NotConfigured(&'static str),
    #[error("Cannot {operation} in {mode:?} dispatch mode")]
    WrongDispatchMode {
        operation: &'static str,
        mode: DispatchMode,
    },
    #[error("Frame {0} was not prepared before generation")]
    PrepareMissing(u64),
    #[error("Callback dispatch mode needs an interpolated frame producer")]
    MissingProducer,
    #[error("Frame generation context was already destroyed")]
    AlreadyDestroyed,
    #[error("Frame generation engine failed: {0}")]
    Engine(String),
    #[error("Vulkan call failed during frame generation")]
    VulkanError(#[from] vk::Result),
}

/// Opaque engine-side context id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl GenerationRect {
    pub fn full(extent: vk::Extent2D) -> Self {
        Self {
            left: 0,
            top: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateFlags {
    pub depth_inverted: bool,
    pub depth_infinite: bool,
    pub async_workload: bool,
    pub hdr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateDesc {
    pub display_size: vk::Extent2D,
    pub max_render_size: vk::Extent2D,
    /// Must match the swapchain back buffer.
    pub back_buffer_format: vk::Format,
    pub flags: CreateFlags,
}

/// Who issues the generate dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The caller records the generate dispatch and queries the output.
    Manual,
    /// The engine asks an [`InterpolatedFrameProducer`] during present.
    Callback,
}

/// Per-frame configuration that does not depend on the frame id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub enabled: bool,
    pub generation_rect: GenerationRect,
    pub only_present_generated: bool,
    pub dispatch_mode: DispatchMode,
    pub swapchain: vk::SwapchainKHR,
}

/// Configuration applied before a single dispatch. Built fresh every time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigureDesc {
    pub frame_id: u64,
    pub enabled: bool,
    pub generation_rect: GenerationRect,
    pub only_present_generated: bool,
    pub dispatch_mode: DispatchMode,
    pub swapchain: vk::SwapchainKHR,
}

impl ConfigureDesc {
    pub fn for_frame(settings: &GenerationSettings, frame_id: u64) -> Self {
        Self {
            frame_id,
            enabled: settings.enabled,
            generation_rect: settings.generation_rect,
            only_present_generated: settings.only_present_generated,
            dispatch_mode: settings.dispatch_mode,
            swapchain: settings.swapchain,
        }
    }
}

/// An image handed to or returned from the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameResource {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Layout the image is in when the recorded work starts.
    pub layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareDesc {
    pub command_buffer: vk::CommandBuffer,
    pub depth: FrameResource,
    pub motion_vectors: FrameResource,
    pub jitter_offset: glam::Vec2,
    pub motion_vector_scale: glam::Vec2,
    /// Milliseconds.
    pub frame_time_delta: f32,
    pub render_size: vk::Extent2D,
    /// Radians.
    pub camera_fov_vertical: f32,
    pub camera_near: f32,
    pub camera_far: f32,
    pub view_space_to_meters: f32,
    pub frame_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateDesc {
    pub command_buffer: vk::CommandBuffer,
    pub present_color: FrameResource,
    /// Engine-owned texture in manual mode, caller target in callback mode.
    pub output: FrameResource,
    pub generation_rect: GenerationRect,
    pub num_generated_frames: u32,
    pub frame_id: u64,
    /// Drop history, set after a discontinuity such as an asset reload.
    pub reset: bool,
}

/// The interpolation engine boundary.
pub trait FrameGenerationBackend {
    fn create_context(&mut self, desc: &CreateDesc) -> Result<ContextHandle, FrameGenError>;

    fn configure(
        &mut self,
        context: ContextHandle,
        desc: &ConfigureDesc,
    ) -> Result<(), FrameGenError>;

    fn dispatch_prepare(
        &mut self,
        context: ContextHandle,
        desc: &PrepareDesc,
    ) -> Result<(), FrameGenError>;

    fn dispatch_generate(
        &mut self,
        context: ContextHandle,
        desc: &GenerateDesc,
    ) -> Result<(), FrameGenError>;

    /// Where manual mode writes the interpolated frame.
    fn query_interpolation_output(
        &mut self,
        context: ContextHandle,
    ) -> Result<FrameResource, FrameGenError>;

    fn destroy_context(&mut self, context: ContextHandle);
}

/// Produces the interpolated frame when the engine runs in callback mode.
pub trait InterpolatedFrameProducer {
    fn produce(
        &mut self,
        engine: &mut dyn FrameGenerationBackend,
        context: ContextHandle,
        desc: &GenerateDesc,
    ) -> Result<(), FrameGenError>;
}

/// Forwards the callback straight back into the engine's generate dispatch.
pub struct DispatchThroughEngine;

impl InterpolatedFrameProducer for DispatchThroughEngine {
    fn produce(
        &mut self,
        engine: &mut dyn FrameGenerationBackend,
        context: ContextHandle,
        desc: &GenerateDesc,
    ) -> Result<(), FrameGenError> {
        engine.dispatch_generate(context, desc)
    }
}
