mod buffer;
mod conversion_pass;
pub mod descriptor_set;
mod device;
mod instance;
mod pipeline;
mod present_pass;
mod renderer;
pub mod screenshot;
mod shader;
mod swapchain;
mod texture;

pub use buffer::*;
pub use conversion_pass::*;
pub use device::*;
pub use instance::*;
pub use pipeline::*;
pub use present_pass::*;
pub use renderer::*;
pub use shader::*;
pub use swapchain::*;
pub use texture::*;

pub use super::RenderError;

/// SPIR-V produced by `build.rs`, as raw bytes.
#[macro_export]
macro_rules! spirv {
    ($name:literal) => {
        (
            $name,
            include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name)).as_slice(),
        )
    };
}
