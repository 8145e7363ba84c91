// SPDX-License-Identifier: CEPL-1.0
//! Instance ownership, diagnostic layers and the validation message sink.

use std::ffi::{c_char, c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RenderError, RenderResult, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl DiagnosticSeverity {
    fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        if flags.contains(S::ERROR) {
            DiagnosticSeverity::Error
        } else if flags.contains(S::WARNING) {
            DiagnosticSeverity::Warning
        } else if flags.contains(S::INFO) {
            DiagnosticSeverity::Info
        } else {
            DiagnosticSeverity::Verbose
        }
    }
}

pub type DiagnosticSink = Box<dyn Fn(DiagnosticSeverity, &str)>;

/// Forwards validation messages into tracing under the `vulkan` target.
pub fn tracing_sink() -> DiagnosticSink {
    Box::new(|severity, message| match severity {
        DiagnosticSeverity::Error => error!(target: "vulkan", "{message}"),
        DiagnosticSeverity::Warning => warn!(target: "vulkan", "{message}"),
        DiagnosticSeverity::Info => debug!(target: "vulkan", "{message}"),
        DiagnosticSeverity::Verbose => trace!(target: "vulkan", "{message}"),
    })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    let sink = unsafe { &*(user as *const DiagnosticSink) };
    let message = unsafe { (*data).message_as_c_str() }
        .map(CStr::to_string_lossy)
        .unwrap_or_default();
    sink(DiagnosticSeverity::from_vk(severity), &message);
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
    // Pointed to by the messenger's user data; must outlive `handle`.
    _sink: Box<DiagnosticSink>,
}

/// Owns the loader entry, the instance and (when validation is on) the debug
/// messenger. Everything else in the backend is created from this.
pub struct GraphicsApiContext {
    debug: Option<DebugMessenger>,
    instance: ash::Instance,
    entry: ash::Entry,
}

/// Required names missing from `available`, in the order they were asked for.
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|r| !available.contains(r))
        .collect()
}

impl GraphicsApiContext {
    /// # Safety
    /// Loads the system Vulkan library; the caller must not unload it while
    /// the context lives.
    pub unsafe fn new(
        display: RawDisplayHandle,
        validation: bool,
        sink: DiagnosticSink,
    ) -> RenderResult<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let validation = validation && unsafe { validation_layer_available(&entry) };

        let window_exts = ash_window::enumerate_required_extensions(display)
            .op("enumerate_required_extensions")?;
        let mut required: Vec<&CStr> = window_exts
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        if validation {
            required.push(debug_utils::NAME);
        }

        let available_props = unsafe { entry.enumerate_instance_extension_properties(None) }
            .op("enumerate_instance_extension_properties")?;
        let available: Vec<&CStr> = available_props
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();
        debug!(?available, "instance extensions available");
        debug!(?required, "instance extensions required");
        if let Some(missing) = missing_names(&required, &available).first() {
            return Err(RenderError::MissingInstanceExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Lumen")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Lumen")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let ext_ptrs: Vec<*const c_char> = required.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.op("create_instance")?;

        let debug = if validation {
            match unsafe { create_debug_messenger(&entry, &instance, sink) } {
                Ok(m) => Some(m),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };
        info!(validation, "graphics API instance created");

        Ok(GraphicsApiContext {
            debug,
            instance,
            entry,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

unsafe fn validation_layer_available(entry: &ash::Entry) -> bool {
    match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => {
            let found = layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
            if !found {
                warn!(layer = ?VALIDATION_LAYER, "validation layer not available; validation disabled");
            }
            found
        }
        Err(e) => {
            warn!(error = %e, "layer enumeration failed; validation disabled");
            false
        }
    }
}

unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
    sink: DiagnosticSink,
) -> RenderResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let sink = Box::new(sink);
    let user_data = &*sink as *const DiagnosticSink as *mut c_void;

    let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(user_data);

    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .op("create_debug_utils_messenger")?;
    Ok(DebugMessenger {
        loader,
        handle,
        _sink: sink,
    })
}

impl Drop for GraphicsApiContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
