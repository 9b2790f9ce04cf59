use raw_window_handle::HasRawDisplayHandle;
use std::ffi::{c_void, CStr, CString};

use super::RenderError;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

unsafe extern "system" fn vulkan_debug_callback(
    flag: ash::vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: ash::vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const ash::vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> ash::vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    if flag == ash::vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("{:?} - {:?}", typ, message);
    } else if flag == ash::vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("{:?} - {:?}", typ, message);
    } else {
        log::debug!("{:?} - {:?}", typ, message);
    }

    ash::vk::FALSE
}

pub struct Instance {
    pub entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<(
        ash::extensions::ext::DebugUtils,
        ash::vk::DebugUtilsMessengerEXT,
    )>,
    validation: bool,
}

impl Instance {
    pub fn new(
        app_name: CString,
        window: &winit::window::Window,
        validation: bool,
    ) -> anyhow::Result<Self, RenderError> {
        let entry = unsafe { ash::Entry::load()? };

        let app_info = ash::vk::ApplicationInfo::builder()
            .application_name(app_name.as_c_str())
            .application_version(ash::vk::make_api_version(0, 0, 1, 0))
            .engine_name(app_name.as_c_str())
            .engine_version(ash::vk::make_api_version(0, 0, 1, 0))
            .api_version(ash::vk::API_VERSION_1_2);

        let extensions = Self::get_required_extensions(window, validation)?;

        let mut create_info = ash::vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions);

        let layer_name_ptrs = Self::get_enabled_layers(validation);

        if validation {
            if !Self::check_validation_layer_support(&entry)? {
                return Err(RenderError::MissingValidationLayers);
            }

            create_info = create_info.enabled_layer_names(&layer_name_ptrs);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug_messenger = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            validation,
        })
    }

    fn setup_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> anyhow::Result<
        (
            ash::extensions::ext::DebugUtils,
            ash::vk::DebugUtilsMessengerEXT,
        ),
        RenderError,
    > {
        let create_info = ash::vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                ash::vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | ash::vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                ash::vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | ash::vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | ash::vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok((debug_utils, messenger))
    }

    fn check_validation_layer_support(entry: &ash::Entry) -> anyhow::Result<bool, RenderError> {
        let layer_properties = entry.enumerate_instance_layer_properties()?;

        if layer_properties.is_empty() {
            log::error!("No available layers");

            return Ok(false);
        }

        let found = layer_properties.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };

            layer_name == VALIDATION_LAYER
        });

        Ok(found)
    }

    pub fn get_enabled_layers(validation: bool) -> Vec<*const std::os::raw::c_char> {
        if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        }
    }

    fn get_required_extensions(
        window: &winit::window::Window,
        validation: bool,
    ) -> anyhow::Result<Vec<*const std::os::raw::c_char>, RenderError> {
        let mut extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())?.to_vec();

        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        log::debug!("Number of required extensions: {}", extensions.len());

        Ok(extensions)
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    #[inline]
    pub fn inner(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::debug!("Dropping vulkan instance");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
