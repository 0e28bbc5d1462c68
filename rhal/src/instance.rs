//! Vulkan instance creation and physical device queries.
//!
//! [`Instance`] wraps an `ash::Instance` together with the entry-point
//! loader, the optional debug messenger and the optional surface loader.
//! Everything the device selector needs to know about a physical device is
//! queried through it.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::config;
use crate::surface::{CreateSurfaceError, SurfaceQueryError};
use std::{
    ffi::{CStr, CString},
    fmt::Debug,
    str::FromStr,
};

/// Highest API version the layer asks the loader for.
pub const TARGET_API_VERSION: u32 = vk::API_VERSION_1_3;

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Minimum severity level for Vulkan validation layer messages.
///
/// Variants are ordered least-to-most severe: `Verbose < Info < Warning <
/// Error`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        match self {
            VulkanLogLevel::Verbose => {
                Severity::VERBOSE
                    | Severity::INFO
                    | Severity::WARNING
                    | Severity::ERROR
            }
            VulkanLogLevel::Info => {
                Severity::INFO | Severity::WARNING | Severity::ERROR
            }
            VulkanLogLevel::Warning => Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Error => Severity::ERROR,
        }
    }
}

/// A packed Vulkan API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkVersion(u32);

impl VkVersion {
    pub const V1_0: Self = Self(vk::API_VERSION_1_0);
    pub const V1_1: Self = Self(vk::API_VERSION_1_1);
    pub const V1_2: Self = Self(vk::API_VERSION_1_2);
    pub const V1_3: Self = Self(vk::API_VERSION_1_3);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(0, major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// `true` if `self` is at least `required`, ignoring the variant.
    pub fn satisfies(&self, required: VkVersion) -> bool {
        (self.major(), self.minor(), self.patch())
            >= (required.major(), required.minor(), required.patch())
    }

    /// The lower of two versions.
    pub fn min(self, other: VkVersion) -> VkVersion {
        if self.satisfies(other) { other } else { self }
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// The root Vulkan object.
///
/// All objects derived from an instance hold an `Arc<Instance>` to keep it
/// alive.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger:
        Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    surface_instance: Option<ash::khr::surface::Instance>,
    enabled_extensions: Vec<CString>,
    ver: VkVersion,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("version", &self.ver)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(crate::RwhHandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Loader only supports Vulkan {0}, 1.1 is required")]
    UnsupportedLoader(VkVersion),
    #[error("Unknown Vulkan Error {0}")]
    UnknownVulkan(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::UnknownVulkan(value)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some((debug_messenger, debug_utils_instance)) =
            self.debug_messenger.take()
        {
            //SAFETY: last use of this debug messenger, made from this
            //instance
            unsafe {
                debug_utils_instance
                    .destroy_debug_utils_messenger(debug_messenger, None)
            };
        }
        //SAFETY: We are in drop so this is the last use of instance. Every
        //derived object holds an Arc to us and is therefore gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid for the call
    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        //SAFETY: non-null p_message is a NUL terminated string
        unsafe { CStr::from_ptr(callback_data.p_message) }.to_string_lossy()
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: "rhal-debug-messenger", "[{type_str}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "rhal-debug-messenger", "[{type_str}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "rhal-debug-messenger", "[{type_str}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "rhal-debug-messenger", "[{type_str}] {message}");
        }
        _ => {
            tracing::debug!(target: "rhal-debug-messenger", "[{type_str}] {message}");
        }
    }

    vk::FALSE
}

/// What [`Instance::new`] should turn on.
#[derive(Debug, Clone)]
pub struct InstanceDesc<'a> {
    pub app_name: &'a str,
    /// `Some` enables the validation layer and a debug messenger at the
    /// given severity, if the layer is installed and not disabled.
    pub validation: Option<VulkanLogLevel>,
    /// Layers never enabled regardless of `validation`.
    pub disabled_layers: &'a [String],
}

impl InstanceDesc<'_> {
    fn validation_layer_disabled(&self) -> bool {
        VALIDATION_LAYER_NAME
            .to_str()
            .is_ok_and(|name| config::layer_disabled(self.disabled_layers, name))
    }
}

impl Instance {
    /// Load Vulkan and create an instance.
    ///
    /// Passing a `display_handle_source` enables the platform surface
    /// extensions and, when available, `VK_EXT_swapchain_colorspace`.
    ///
    /// # Safety
    /// This loads the Vulkan loader through libloading, which runs arbitrary
    /// code from the system library.
    pub unsafe fn new(
        desc: &InstanceDesc<'_>,
        display_handle_source: Option<&impl HasDisplayHandle>,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name_cstring = CString::from_str(desc.app_name)
            .map_err(|_| Error::InvalidAppName)?;
        //SAFETY: loading burden is passed on to the caller. Entry outlives
        //every other vulkan object because Instance owns it and drops it
        //last
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;

        // SAFETY: entry is a live Vulkan entry; vkEnumerateInstanceVersion
        // has no other preconditions.
        let loader_version = VkVersion::from_raw(
            unsafe { entry.try_enumerate_instance_version() }
                .unwrap_or(Some(vk::API_VERSION_1_0))
                .unwrap_or(vk::API_VERSION_1_0),
        );
        if !loader_version.satisfies(VkVersion::V1_1) {
            return Err(Error::UnsupportedLoader(loader_version));
        }
        let api_version =
            loader_version.min(VkVersion::from_raw(TARGET_API_VERSION));

        let mut mandatory_exts: Vec<&CStr> = Vec::new();
        if let Some(display_handle_source) = display_handle_source {
            let ash_window_exts = ash_window::enumerate_required_extensions(
                display_handle_source
                    .display_handle()
                    .map_err(Error::InvalidDisplayHandle)?
                    .as_raw(),
            )?;
            mandatory_exts.extend(
                ash_window_exts
                    .iter()
                    //SAFETY: ash_window documents that these are NUL
                    //terminated static strings
                    .map(|ext_cstr_ptr| unsafe {
                        CStr::from_ptr(*ext_cstr_ptr)
                    }),
            );
        }

        // SAFETY: entry is live; None queries global extensions.
        let instance_exts_avail =
            unsafe { entry.enumerate_instance_extension_properties(None) }?;
        // SAFETY: entry is live.
        let instance_layers_avail =
            unsafe { entry.enumerate_instance_layer_properties() };

        let ext_available = |name: &CStr| {
            instance_exts_avail
                .iter()
                .any(|avail| avail.extension_name_as_c_str() == Ok(name))
        };

        let missing_exts: Vec<_> = mandatory_exts
            .iter()
            .filter(|ext| !ext_available(ext))
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();
        if !missing_exts.is_empty() {
            return Err(Error::MissingExtensions(missing_exts));
        }

        let mut enabled_exts = mandatory_exts;
        if display_handle_source.is_some()
            && ext_available(ash::ext::swapchain_colorspace::NAME)
        {
            enabled_exts.push(ash::ext::swapchain_colorspace::NAME);
        }

        let debug_utils_ext_name = ash::ext::debug_utils::NAME;
        let debug_utils_available = ext_available(debug_utils_ext_name);
        let validation_layer_available = !desc.validation_layer_disabled()
            && instance_layers_avail
                .as_ref()
                .map(|layers| {
                    layers.iter().any(|layer| {
                        layer.layer_name_as_c_str()
                            == Ok(VALIDATION_LAYER_NAME)
                    })
                })
                .unwrap_or(false);

        if desc.validation.is_some() && !validation_layer_available {
            tracing::warn!(
                "Validation requested but {VALIDATION_LAYER_NAME:?} is \
                 unavailable or disabled, continuing without it"
            );
        }

        let mut enabled_layers: Vec<*const std::ffi::c_char> = Vec::new();
        let mut debug_messenger_create_info = if let Some(log_level) =
            desc.validation
            && debug_utils_available
            && validation_layer_available
        {
            enabled_exts.push(debug_utils_ext_name);
            enabled_layers.push(VALIDATION_LAYER_NAME.as_ptr());

            Some(
                vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(log_level.severity_flags())
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback)),
            )
        } else {
            None
        };

        let enabled_ext_ptrs: Vec<_> =
            enabled_exts.iter().map(|ext| ext.as_ptr()).collect();

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"rhal")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version.to_raw());

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_ext_ptrs)
            .enabled_layer_names(&enabled_layers);

        if let Some(ref mut debug_info) = debug_messenger_create_info {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: instance_create_info and everything it points to is alive
        let instance =
            unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger = if let Some(mut debug_messenger_create_info) =
            debug_messenger_create_info
        {
            debug_messenger_create_info.p_next = std::ptr::null();
            let debug_utils_instance =
                ash::ext::debug_utils::Instance::new(&entry, &instance);
            //SAFETY: valid create info, debug utils is enabled
            match unsafe {
                debug_utils_instance.create_debug_utils_messenger(
                    &debug_messenger_create_info,
                    None,
                )
            } {
                Ok(debug_messenger) => {
                    Some((debug_messenger, debug_utils_instance))
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to create debug messenger, continuing \
                         without validation output: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let surface_instance = display_handle_source
            .is_some()
            .then(|| ash::khr::surface::Instance::new(&entry, &instance));

        tracing::info!(
            "Created Vulkan {api_version} instance, validation {}",
            if debug_messenger.is_some() { "on" } else { "off" }
        );

        Ok(Instance {
            entry,
            handle: instance,
            debug_messenger,
            surface_instance,
            enabled_extensions: enabled_exts
                .into_iter()
                .map(CStr::to_owned)
                .collect(),
            ver: api_version,
        })
    }

    /// Destroy a raw VkSurfaceKHR.
    ///
    /// # Safety
    /// `surf` must be derived from this instance, and every object derived
    /// from it must be destroyed. No in-flight GPU work may reference it.
    pub unsafe fn destroy_raw_surface(
        &self,
        surf: vk::SurfaceKHR,
    ) -> Result<(), SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: surf is derived from this instance (caller contract)
        unsafe { surface_instance.destroy_surface(surf, None) };
        Ok(())
    }

    /// Get handles to the available physical devices, in enumeration order.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, vk::Result> {
        //SAFETY: instance is alive
        crate::fatal::check("vkEnumeratePhysicalDevices", unsafe {
            self.handle.enumerate_physical_devices()
        })
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// Fill `features` and its pNext chain.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance,
    /// and every struct chained to `features` must be supported by the
    /// device's API version.
    pub unsafe fn get_raw_physical_device_features2(
        &self,
        physical_device: vk::PhysicalDevice,
        features: &mut vk::PhysicalDeviceFeatures2<'_>,
    ) {
        //SAFETY: instance is at least 1.1 (checked in new), chain validity
        //is the caller's contract
        unsafe {
            self.handle
                .get_physical_device_features2(physical_device, features)
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        // SAFETY: physical_device was derived from this instance.
        unsafe {
            self.handle
                .get_physical_device_memory_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn enumerate_raw_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .enumerate_device_extension_properties(physical_device)
        }
    }

    /// Create a logical device.
    ///
    /// # Safety
    /// `physical_device` must be derived from this instance and
    /// `create_info` must be valid for it.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .create_device(physical_device, create_info, None)
        }
    }

    /// The API version requested at instance creation.
    pub fn supported_ver(&self) -> VkVersion {
        self.ver
    }

    /// `true` if `name` was enabled on this instance.
    pub fn has_extension(&self, name: &CStr) -> bool {
        self.enabled_extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// `true` if validation output is routed through a debug messenger.
    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }
}

// Surface queries
impl Instance {
    fn surface_loader(
        &self,
    ) -> Result<&ash::khr::surface::Instance, SurfaceQueryError> {
        self.surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)
    }

    /// # Safety
    /// `physical_device` and `surface` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceQueryError> {
        //SAFETY: caller guarantees provenance
        unsafe {
            self.surface_loader()?.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must be derived from this instance.
    pub unsafe fn get_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_capabilities(
                    physical_device,
                    surface,
                )
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must be derived from this instance.
    pub unsafe fn get_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must be derived from this instance.
    pub unsafe fn get_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_present_modes(
                    physical_device,
                    surface,
                )
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// Create a raw VkSurfaceKHR.
    ///
    /// # Safety
    /// The surface must be destroyed before `source` is dropped, and on
    /// platform events that invalidate it (winit suspend).
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateSurfaceError> {
        use CreateSurfaceError as Error;
        if self.surface_instance.is_none() {
            return Err(Error::MissingExtension);
        }
        //SAFETY: the surface extensions were enabled for the display this
        //source belongs to
        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.handle,
                source
                    .display_handle()
                    .map_err(Error::InvalidDisplayHandle)?
                    .as_raw(),
                source
                    .window_handle()
                    .map_err(Error::InvalidWindowHandle)?
                    .as_raw(),
                None,
            )
        }
        .map_err(Error::VulkanError)
    }
}

// Device extension loaders
impl Instance {
    pub fn create_swapchain_loader(
        &self,
        device: &ash::Device,
    ) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }

    pub fn create_debug_utils_device_loader(
        &self,
        device: &ash::Device,
    ) -> Option<ash::ext::debug_utils::Device> {
        self.debug_messenger
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&self.handle, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_layer_list_turns_validation_off() {
        fn desc(disabled_layers: &[String]) -> InstanceDesc<'_> {
            InstanceDesc {
                app_name: "test",
                validation: Some(VulkanLogLevel::Warning),
                disabled_layers,
            }
        }
        assert!(!desc(&[]).validation_layer_disabled());
        assert!(
            !desc(&[String::from("VK_LAYER_MESA_overlay")])
                .validation_layer_disabled()
        );
        assert!(
            desc(&[String::from("VK_LAYER_KHRONOS_validation")])
                .validation_layer_disabled()
        );
        assert!(desc(&[String::from("*")]).validation_layer_disabled());
    }

    #[test]
    fn version_comparison_ignores_variant_and_orders_by_components() {
        let v1_3_0 = VkVersion::new(1, 3, 0);
        let v1_2_199 = VkVersion::new(1, 2, 199);
        let v1_3_275 = VkVersion::from_raw(vk::make_api_version(0, 1, 3, 275));

        assert!(v1_3_0.satisfies(v1_2_199));
        assert!(!v1_2_199.satisfies(v1_3_0));
        assert!(v1_3_275.satisfies(VkVersion::V1_3));
        assert_eq!(v1_3_275.min(VkVersion::V1_3), VkVersion::V1_3);
        assert_eq!(VkVersion::V1_1.min(VkVersion::V1_3), VkVersion::V1_1);
    }

    #[test]
    fn version_display() {
        assert_eq!(VkVersion::new(1, 3, 275).to_string(), "1.3.275");
    }

    #[test]
    fn log_level_severity_is_cumulative() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(VulkanLogLevel::Error.severity_flags(), Severity::ERROR);
        assert!(
            VulkanLogLevel::Info
                .severity_flags()
                .contains(Severity::WARNING | Severity::ERROR)
        );
        assert!(
            !VulkanLogLevel::Warning
                .severity_flags()
                .contains(Severity::INFO)
        );
    }
}
