// Vulkan instance - loader, layers, extensions and the debug messenger
//
// Responsibilities:
// - Verify requested layers/extensions before creating the instance
// - Create the instance with the surface provider's extensions + debug utils
// - Install the validation callback (optional: skipped if its entry points
//   cannot be resolved)

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

use crate::error::InitError;

/// The LunarG/Khronos validation bundle
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with automatic cleanup.
///
/// Owns the debug messenger; both are destroyed in `Drop`, messenger first.
pub struct Instance {
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Create the instance.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `surface_extensions` - Extensions the surface provider needs
    /// * `enable_validation` - Request the validation layer
    pub fn new(
        app_name: &str,
        surface_extensions: &[&CStr],
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let layers = requested_layers(enable_validation);
        let extensions = requested_extensions(surface_extensions);

        check_layers(&entry, &layers)?;
        check_extensions(&entry, &extensions)?;

        let instance = Self::create_instance(&entry, app_name, &layers, &extensions)?;

        let debug_utils = match Self::setup_debug_messenger(&entry, &instance) {
            Ok(debug_utils) => debug_utils,
            Err(e) => {
                log::warn!("Continuing without validation output: {:#}", e);
                None
            }
        };

        Ok(Self {
            instance,
            entry,
            debug_utils,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        layers: &[&CStr],
        extensions: &[&CStr],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let layer_names: Vec<*const c_char> = layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        for name in extensions {
            log::debug!("Enabling instance extension {}", name.to_string_lossy());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    /// Install the validation callback.
    ///
    /// The messenger functions are extension entry points; they are looked
    /// up through the instance proc-address table and the step is skipped
    /// (`Ok(None)`) when the driver does not expose them.
    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>> {
        let create_fn = unsafe {
            entry.get_instance_proc_addr(
                instance.handle(),
                c"vkCreateDebugUtilsMessengerEXT".as_ptr(),
            )
        };
        let destroy_fn = unsafe {
            entry.get_instance_proc_addr(
                instance.handle(),
                c"vkDestroyDebugUtilsMessengerEXT".as_ptr(),
            )
        };
        if create_fn.is_none() || destroy_fn.is_none() {
            log::warn!("Debug messenger entry points unavailable");
            return Ok(None);
        }

        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok(Some((debug_utils, messenger)))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn requested_layers(enable_validation: bool) -> Vec<&'static CStr> {
    if enable_validation {
        vec![VALIDATION_LAYER]
    } else {
        vec![]
    }
}

/// Surface provider extensions plus debug utils, without duplicates
fn requested_extensions<'a>(surface_extensions: &[&'a CStr]) -> Vec<&'a CStr> {
    let mut extensions = surface_extensions.to_vec();
    if !extensions.contains(&DebugUtils::name()) {
        extensions.push(DebugUtils::name());
    }
    extensions
}

fn check_layers(entry: &Entry, layers: &[&CStr]) -> Result<()> {
    if layers.is_empty() {
        return Ok(());
    }

    let available = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;
    let available: Vec<&CStr> = available
        .iter()
        .map(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) })
        .collect();

    let missing = missing_names(layers, &available);
    if !missing.is_empty() {
        return Err(InitError::ValidationLayersMissing(missing).into());
    }
    Ok(())
}

fn check_extensions(entry: &Entry, extensions: &[&CStr]) -> Result<()> {
    let available = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?;
    let available: Vec<&CStr> = available
        .iter()
        .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) })
        .collect();

    let missing = missing_names(extensions, &available);
    if !missing.is_empty() {
        return Err(InitError::ExtensionsMissing(missing).into());
    }
    Ok(())
}

/// Names from `requested` that do not appear in `available`
pub fn missing_names(requested: &[&CStr], available: &[&CStr]) -> Vec<String> {
    requested
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

// Validation never aborts the call that triggered it
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {:?}] {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {:?}] {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan {:?}] {}", message_type, message);
        }
        _ => {
            log::debug!("[Vulkan {:?}] {}", message_type, message);
        }
    }

    vk::FALSE
}
