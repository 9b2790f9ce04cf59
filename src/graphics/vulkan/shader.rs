use std::rc::Rc;

use super::{Device, RenderError};

/// Reads SPIR-V words, rejecting empty or malformed modules.
pub fn parse_spirv(name: &'static str, bytes: &[u8]) -> anyhow::Result<Vec<u32>, RenderError> {
    let invalid = |source| RenderError::InvalidShader { name, source };

    if bytes.is_empty() {
        return Err(invalid(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty module",
        )));
    }

    ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(invalid)
}

pub struct ShaderModule {
    device: Rc<Device>,
    module: ash::vk::ShaderModule,
}

impl ShaderModule {
    pub fn new(
        device: Rc<Device>,
        (name, bytes): (&'static str, &[u8]),
    ) -> anyhow::Result<Rc<Self>, RenderError> {
        let code = parse_spirv(name, bytes)?;

        let create_info = ash::vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            device
                .logical_device
                .create_shader_module(&create_info, None)?
        };

        log::debug!("Loaded shader {}", name);

        Ok(Rc::new(Self { device, module }))
    }

    #[inline]
    pub fn inner(&self) -> ash::vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan shader module");

        unsafe {
            self.device
                .logical_device
                .destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_is_rejected() {
        let err = parse_spirv("convert.frag.spv", &[]).unwrap_err();

        assert!(matches!(
            err,
            RenderError::InvalidShader {
                name: "convert.frag.spv",
                ..
            }
        ));
    }

    #[test]
    fn truncated_word_is_rejected() {
        assert!(parse_spirv("bad.spv", &[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn valid_header_is_read() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = parse_spirv("ok.spv", &bytes).unwrap();

        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }
}
