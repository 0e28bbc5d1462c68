//! Physical device selection.
//!
//! Selection runs in two halves. [`probe_device`] snapshots everything the
//! layer needs to know about one physical device into a [`DeviceProbe`];
//! [`evaluate_device`] and [`select_device`] are pure functions over those
//! snapshots. A device is compatible only if every check passes, and among
//! compatible devices the first one with the strictly highest rank wins.

use std::ffi::{CStr, CString};
use std::fmt;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    instance::{Instance, VkVersion},
    surface::{Surface, SurfaceSupport},
};

/// A required device extension. Any one of `names` satisfies it; earlier
/// names are preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequirement {
    pub names: Vec<&'static CStr>,
}

impl ExtensionRequirement {
    pub fn one(name: &'static CStr) -> Self {
        Self { names: vec![name] }
    }

    /// The same capability published under several names, typically the
    /// KHR name followed by the vendor name it was promoted from.
    pub fn any_of(names: impl IntoIterator<Item = &'static CStr>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// The first alternative for which `available` holds.
    pub fn resolve(
        &self,
        available: impl Fn(&CStr) -> bool,
    ) -> Option<&'static CStr> {
        self.names.iter().copied().find(|name| available(name))
    }
}

impl fmt::Display for ExtensionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", name.to_string_lossy())?;
        }
        Ok(())
    }
}

pub const CALIBRATED_TIMESTAMPS: [&CStr; 2] = [
    c"VK_KHR_calibrated_timestamps",
    c"VK_EXT_calibrated_timestamps",
];

/// Storage for every feature struct the layer compares, core through 1.3.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RawFeatures {
    pub core: vk::PhysicalDeviceFeatures,
    pub v11: vk::PhysicalDeviceVulkan11Features<'static>,
    pub v12: vk::PhysicalDeviceVulkan12Features<'static>,
    pub v13: vk::PhysicalDeviceVulkan13Features<'static>,
}

macro_rules! device_features {
    ($($name:ident: $src:ident . $field:ident),* $(,)?) => {
        /// Boolean device features across the Vulkan 1.0 to 1.3 feature
        /// structs.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct DeviceFeatures {
            $(pub $name: bool,)*
        }

        impl DeviceFeatures {
            /// Names of features set in `self` but not in `available`.
            pub fn missing_from(
                &self,
                available: &DeviceFeatures,
            ) -> Vec<&'static str> {
                let mut missing = Vec::new();
                $(
                    if self.$name && !available.$name {
                        missing.push(stringify!($name));
                    }
                )*
                missing
            }

            pub(crate) fn from_raw(raw: &RawFeatures) -> Self {
                Self {
                    $($name: raw.$src.$field == vk::TRUE,)*
                }
            }

            pub(crate) fn to_raw(self) -> RawFeatures {
                let mut raw = RawFeatures::default();
                $(
                    if self.$name {
                        raw.$src.$field = vk::TRUE;
                    }
                )*
                raw
            }
        }
    };
}

device_features! {
    sampler_anisotropy: core.sampler_anisotropy,
    shader_int64: core.shader_int64,
    shader_int16: core.shader_int16,
    fill_mode_non_solid: core.fill_mode_non_solid,
    multi_draw_indirect: core.multi_draw_indirect,
    independent_blend: core.independent_blend,
    depth_clamp: core.depth_clamp,
    texture_compression_bc: core.texture_compression_bc,

    shader_draw_parameters: v11.shader_draw_parameters,
    storage_buffer16_bit_access: v11.storage_buffer16_bit_access,

    descriptor_indexing: v12.descriptor_indexing,
    runtime_descriptor_array: v12.runtime_descriptor_array,
    descriptor_binding_partially_bound: v12.descriptor_binding_partially_bound,
    descriptor_binding_update_unused_while_pending:
        v12.descriptor_binding_update_unused_while_pending,
    descriptor_binding_sampled_image_update_after_bind:
        v12.descriptor_binding_sampled_image_update_after_bind,
    descriptor_binding_storage_image_update_after_bind:
        v12.descriptor_binding_storage_image_update_after_bind,
    descriptor_binding_storage_buffer_update_after_bind:
        v12.descriptor_binding_storage_buffer_update_after_bind,
    shader_sampled_image_array_non_uniform_indexing:
        v12.shader_sampled_image_array_non_uniform_indexing,
    timeline_semaphore: v12.timeline_semaphore,
    buffer_device_address: v12.buffer_device_address,
    host_query_reset: v12.host_query_reset,
    scalar_block_layout: v12.scalar_block_layout,
    draw_indirect_count: v12.draw_indirect_count,
    shader_float16: v12.shader_float16,
    shader_int8: v12.shader_int8,
    vulkan_memory_model: v12.vulkan_memory_model,

    synchronization2: v13.synchronization2,
    dynamic_rendering: v13.dynamic_rendering,
    maintenance4: v13.maintenance4,
    shader_demote_to_helper_invocation:
        v13.shader_demote_to_helper_invocation,
    subgroup_size_control: v13.subgroup_size_control,
}

/// One entry of the surface-format priority list: a color space and the
/// formats acceptable in it, most preferred first.
#[derive(Debug, Clone)]
pub struct SurfaceFormatQuery {
    pub color_space: vk::ColorSpaceKHR,
    pub formats: Vec<vk::Format>,
}

impl SurfaceFormatQuery {
    pub fn srgb() -> Self {
        Self {
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            formats: vec![
                vk::Format::B8G8R8A8_SRGB,
                vk::Format::R8G8B8A8_SRGB,
                vk::Format::B8G8R8A8_UNORM,
                vk::Format::R8G8B8A8_UNORM,
            ],
        }
    }
}

/// What a device must offer to be considered at all.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub min_api_version: VkVersion,
    pub extensions: Vec<ExtensionRequirement>,
    pub features: DeviceFeatures,
    /// Scanned in order; the first query with a supported format wins.
    pub surface_formats: Vec<SurfaceFormatQuery>,
    /// Prefer MAILBOX over FIFO.
    pub prefer_low_latency: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            min_api_version: VkVersion::V1_3,
            extensions: vec![ExtensionRequirement::one(
                ash::khr::swapchain::NAME,
            )],
            features: DeviceFeatures {
                synchronization2: true,
                dynamic_rendering: true,
                ..Default::default()
            },
            surface_formats: vec![SurfaceFormatQuery::srgb()],
            prefer_low_latency: true,
        }
    }
}

/// Rank per device class. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankTable {
    pub discrete: u32,
    pub integrated: u32,
    pub virtual_gpu: u32,
    pub cpu: u32,
    pub other: u32,
}

impl Default for RankTable {
    fn default() -> Self {
        Self {
            discrete: 4,
            integrated: 3,
            virtual_gpu: 2,
            cpu: 1,
            other: 0,
        }
    }
}

impl RankTable {
    pub fn rank_of(&self, device_type: vk::PhysicalDeviceType) -> u32 {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => self.discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => self.integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => self.virtual_gpu,
            vk::PhysicalDeviceType::CPU => self.cpu,
            _ => self.other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceLimits {
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    pub timestamp_compute_and_graphics: bool,
    pub non_coherent_atom_size: vk::DeviceSize,
}

/// Everything selection looks at for one physical device.
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    pub index: usize,
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    /// The lower of the device and instance API versions.
    pub api_version: VkVersion,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<CString>,
    pub features: DeviceFeatures,
    pub surface: SurfaceSupport,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub limits: DeviceLimits,
}

impl DeviceProbe {
    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }
}

/// Optional extensions found on the selected device. They are enabled
/// when present and never affect compatibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalExtensions {
    pub memory_budget: bool,
    pub calibrated_timestamps: Option<&'static CStr>,
}

/// The outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub index: usize,
    pub device_type: vk::PhysicalDeviceType,
    pub rank: u32,
    pub api_version: VkVersion,
    pub queue_family: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub supports_required_features: bool,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub limits: DeviceLimits,
    /// Resolved names for every required extension, in requirement order.
    pub required_extensions: Vec<&'static CStr>,
    pub optional_extensions: OptionalExtensions,
}

impl DeviceCandidate {
    /// Every extension to enable on the logical device.
    pub fn enabled_extensions(&self) -> Vec<&'static CStr> {
        let mut exts = self.required_extensions.clone();
        if self.optional_extensions.memory_budget {
            exts.push(ash::ext::memory_budget::NAME);
        }
        exts.extend(self.optional_extensions.calibrated_timestamps);
        exts.dedup();
        exts
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Rejection {
    #[error("API version {found} is below the required {required}")]
    ApiVersion {
        required: VkVersion,
        found: VkVersion,
    },
    #[error("no queue family supports graphics, compute and present")]
    NoQueueFamily,
    #[error("missing extension {0}")]
    MissingExtension(String),
    #[error("missing features {0:?}")]
    MissingFeatures(Vec<&'static str>),
    #[error("no requested surface format is supported")]
    NoSurfaceFormat,
    #[error("no usable present mode")]
    NoPresentMode,
    #[error("no usable composite alpha mode")]
    NoCompositeAlpha,
    #[error("failed to query the device: {0}")]
    ProbeFailed(String),
}

/// Why one device was not chosen.
#[derive(Debug, Clone)]
pub struct DeviceRejection {
    pub index: usize,
    pub name: String,
    pub reasons: Vec<Rejection>,
}

impl fmt::Display for DeviceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}:", self.index, self.name)?;
        for reason in &self.reasons {
            write!(f, "\n    - {reason}")?;
        }
        Ok(())
    }
}

/// Per-device diagnostic carried by [`SelectDeviceError::NoSupportedDevices`].
#[derive(Debug, Clone, Default)]
pub struct SelectionReport(pub Vec<DeviceRejection>);

impl fmt::Display for SelectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("  no physical devices were enumerated");
        }
        for (i, rejection) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "  {rejection}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SelectDeviceError {
    #[error("No supported devices:\n{0}")]
    NoSupportedDevices(SelectionReport),
    #[error("Failed to enumerate physical devices: {0}")]
    Enumeration(vk::Result),
}

/// Extension a color space depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpaceExtension {
    /// Enabled by [`Instance::new`](crate::instance::Instance::new) when
    /// available.
    Instance(&'static CStr),
    /// Has to be enabled on the logical device.
    Device(&'static CStr),
}

pub fn color_space_extension(
    color_space: vk::ColorSpaceKHR,
) -> Option<ColorSpaceExtension> {
    match color_space {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => None,
        vk::ColorSpaceKHR::DISPLAY_NATIVE_AMD => Some(
            ColorSpaceExtension::Device(ash::amd::display_native_hdr::NAME),
        ),
        _ => Some(ColorSpaceExtension::Instance(
            ash::ext::swapchain_colorspace::NAME,
        )),
    }
}

/// Scan `queries` in order and return the first supported format.
///
/// Queries whose color space is not `enabled` are skipped. A surface that
/// reports a single `UNDEFINED` format accepts anything.
pub fn resolve_surface_format(
    queries: &[SurfaceFormatQuery],
    available: &[vk::SurfaceFormatKHR],
    enabled: impl Fn(vk::ColorSpaceKHR) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    let unrestricted = matches!(
        available,
        [only] if only.format == vk::Format::UNDEFINED
    );
    queries
        .iter()
        .filter(|query| enabled(query.color_space))
        .find_map(|query| {
            query
                .formats
                .iter()
                .find(|&&format| {
                    unrestricted
                        || available.iter().any(|avail| {
                            avail.format == format
                                && avail.color_space == query.color_space
                        })
                })
                .map(|&format| vk::SurfaceFormatKHR {
                    format,
                    color_space: query.color_space,
                })
        })
}

/// MAILBOX when preferred and available, otherwise FIFO.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    prefer_low_latency: bool,
) -> Option<vk::PresentModeKHR> {
    if prefer_low_latency && available.contains(&vk::PresentModeKHR::MAILBOX)
    {
        Some(vk::PresentModeKHR::MAILBOX)
    } else if available.contains(&vk::PresentModeKHR::FIFO) {
        Some(vk::PresentModeKHR::FIFO)
    } else {
        None
    }
}

/// First supported of OPAQUE, PRE_MULTIPLIED, POST_MULTIPLIED, INHERIT.
pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> Option<vk::CompositeAlphaFlagsKHR> {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
}

fn find_queue_family(
    families: &[QueueFamilyInfo],
    surface: &SurfaceSupport,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .position(|(idx, family)| {
            family
                .flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && surface.can_present_from(idx)
                && family.queue_count > 0
        })
        .map(|idx| idx as u32)
}

/// Check one device against `requirements`.
///
/// Every check runs even after an earlier one failed, so the rejection
/// lists all reasons at once. `instance_has_extension` answers for
/// instance-level extensions such as `VK_EXT_swapchain_colorspace`.
pub fn evaluate_device(
    probe: &DeviceProbe,
    requirements: &DeviceRequirements,
    ranks: &RankTable,
    instance_has_extension: impl Fn(&CStr) -> bool,
) -> Result<DeviceCandidate, Vec<Rejection>> {
    let mut reasons = Vec::new();

    if !probe.api_version.satisfies(requirements.min_api_version) {
        reasons.push(Rejection::ApiVersion {
            required: requirements.min_api_version,
            found: probe.api_version,
        });
    }

    let queue_family =
        find_queue_family(&probe.queue_families, &probe.surface);
    if queue_family.is_none() {
        reasons.push(Rejection::NoQueueFamily);
    }

    let mut required_extensions = Vec::new();
    for requirement in &requirements.extensions {
        match requirement.resolve(|name| probe.has_extension(name)) {
            Some(name) => required_extensions.push(name),
            None => reasons
                .push(Rejection::MissingExtension(requirement.to_string())),
        }
    }

    let missing_features = requirements.features.missing_from(&probe.features);
    if !missing_features.is_empty() {
        reasons.push(Rejection::MissingFeatures(missing_features));
    }

    let surface_format = resolve_surface_format(
        &requirements.surface_formats,
        &probe.surface.formats,
        |color_space| match color_space_extension(color_space) {
            None => true,
            Some(ColorSpaceExtension::Instance(ext)) => {
                instance_has_extension(ext)
            }
            Some(ColorSpaceExtension::Device(ext)) => probe.has_extension(ext),
        },
    );
    if surface_format.is_none() {
        reasons.push(Rejection::NoSurfaceFormat);
    }

    let present_mode = choose_present_mode(
        &probe.surface.present_modes,
        requirements.prefer_low_latency,
    );
    if present_mode.is_none() {
        reasons.push(Rejection::NoPresentMode);
    }

    let composite_alpha =
        choose_composite_alpha(probe.surface.composite_alpha);
    if composite_alpha.is_none() {
        reasons.push(Rejection::NoCompositeAlpha);
    }

    let (
        Some(queue_family),
        Some(surface_format),
        Some(present_mode),
        Some(composite_alpha),
    ) = (queue_family, surface_format, present_mode, composite_alpha)
    else {
        return Err(reasons);
    };
    if !reasons.is_empty() {
        return Err(reasons);
    }
    if let Some(ColorSpaceExtension::Device(ext)) =
        color_space_extension(surface_format.color_space)
        && !required_extensions.contains(&ext)
    {
        required_extensions.push(ext);
    }

    let calibrated_timestamps = ExtensionRequirement::any_of(
        CALIBRATED_TIMESTAMPS,
    )
    .resolve(|name| probe.has_extension(name));

    Ok(DeviceCandidate {
        handle: probe.handle,
        name: probe.name.clone(),
        index: probe.index,
        device_type: probe.device_type,
        rank: ranks.rank_of(probe.device_type),
        api_version: probe.api_version,
        queue_family,
        surface_format,
        present_mode,
        composite_alpha,
        supports_required_features: true,
        memory_properties: probe.memory_properties,
        limits: probe.limits,
        required_extensions,
        optional_extensions: OptionalExtensions {
            memory_budget: probe.has_extension(ash::ext::memory_budget::NAME),
            calibrated_timestamps,
        },
    })
}

/// Pick the best compatible device.
///
/// Devices are visited in enumeration order and a compatible device only
/// replaces the current best if its rank is strictly greater.
pub fn select_device(
    probes: impl IntoIterator<Item = Result<DeviceProbe, DeviceRejection>>,
    requirements: &DeviceRequirements,
    ranks: &RankTable,
    instance_has_extension: impl Fn(&CStr) -> bool,
) -> Result<DeviceCandidate, SelectDeviceError> {
    let mut best: Option<DeviceCandidate> = None;
    let mut report = SelectionReport::default();

    for probe in probes {
        let evaluated = probe.and_then(|probe| {
            evaluate_device(
                &probe,
                requirements,
                ranks,
                &instance_has_extension,
            )
            .map_err(|reasons| DeviceRejection {
                index: probe.index,
                name: probe.name.clone(),
                reasons,
            })
        });
        match evaluated {
            Ok(candidate) => {
                tracing::debug!(
                    "Device {:?} is compatible with rank {}",
                    candidate.name,
                    candidate.rank
                );
                if best.as_ref().is_none_or(|b| candidate.rank > b.rank) {
                    best = Some(candidate);
                }
            }
            Err(rejection) => {
                tracing::info!("Rejected device {rejection}");
                report.0.push(rejection);
            }
        }
    }

    best.ok_or(SelectDeviceError::NoSupportedDevices(report))
}

/// Snapshot one physical device.
///
/// # Safety
/// `handle` must be a physical device enumerated from the instance that
/// owns `surface`.
pub unsafe fn probe_device<T: HasDisplayHandle + HasWindowHandle>(
    surface: &Surface<T>,
    index: usize,
    handle: vk::PhysicalDevice,
) -> Result<DeviceProbe, DeviceRejection> {
    let instance = surface.get_parent();
    // SAFETY: handle comes from this instance (caller contract)
    let props = unsafe { instance.get_raw_physical_device_properties(handle) };
    let name = props
        .device_name_as_c_str()
        .unwrap_or(c"unknown")
        .to_string_lossy()
        .into_owned();
    let reject = |reason: String| DeviceRejection {
        index,
        name: name.clone(),
        reasons: vec![Rejection::ProbeFailed(reason)],
    };

    let api_version = VkVersion::from_raw(props.api_version)
        .min(instance.supported_ver());

    // SAFETY: handle comes from this instance
    let raw_families = unsafe {
        instance.get_raw_physical_device_queue_family_properties(handle)
    };
    let queue_families = raw_families
        .iter()
        .map(|family| QueueFamilyInfo {
            flags: family.queue_flags,
            queue_count: family.queue_count,
        })
        .collect();

    // SAFETY: handle comes from this instance
    let extensions =
        unsafe { instance.enumerate_raw_device_extension_properties(handle) }
            .map_err(|e| reject(format!("extension enumeration: {e}")))?
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(CStr::to_owned)
            .collect();

    // SAFETY: only structs the device's API version knows are chained
    let features = unsafe { query_features(instance, handle, api_version) };

    // SAFETY: handle and surface share an instance, and raw_families is
    // this device's family list
    let surface = unsafe {
        surface.query_support(handle, raw_families.len() as u32)
    }
    .map_err(|e| reject(e.to_string()))?;

    // SAFETY: handle comes from this instance
    let memory_properties =
        unsafe { instance.get_raw_physical_device_memory_properties(handle) };

    Ok(DeviceProbe {
        index,
        handle,
        name,
        device_type: props.device_type,
        api_version,
        queue_families,
        extensions,
        features,
        surface,
        memory_properties,
        limits: DeviceLimits {
            timestamp_period: props.limits.timestamp_period,
            timestamp_compute_and_graphics: props
                .limits
                .timestamp_compute_and_graphics
                == vk::TRUE,
            non_coherent_atom_size: props.limits.non_coherent_atom_size,
        },
    })
}

/// # Safety
/// `handle` must come from `instance`.
unsafe fn query_features(
    instance: &Instance,
    handle: vk::PhysicalDevice,
    api_version: VkVersion,
) -> DeviceFeatures {
    let mut raw = RawFeatures::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default();
    if api_version.satisfies(VkVersion::V1_2) {
        features2 = features2.push_next(&mut raw.v11).push_next(&mut raw.v12);
    }
    if api_version.satisfies(VkVersion::V1_3) {
        features2 = features2.push_next(&mut raw.v13);
    }
    // SAFETY: the chain only holds structs valid for api_version
    unsafe { instance.get_raw_physical_device_features2(handle, &mut features2) };
    raw.core = features2.features;
    DeviceFeatures::from_raw(&raw)
}

/// Build the feature chain to enable `features` on a device of
/// `api_version` and hand it to `f`.
pub(crate) fn with_enabled_features<R>(
    features: DeviceFeatures,
    api_version: VkVersion,
    f: impl FnOnce(&mut vk::PhysicalDeviceFeatures2<'_>) -> R,
) -> R {
    let mut raw = features.to_raw();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().features(raw.core);
    if api_version.satisfies(VkVersion::V1_2) {
        features2 = features2.push_next(&mut raw.v11).push_next(&mut raw.v12);
    }
    if api_version.satisfies(VkVersion::V1_3) {
        features2 = features2.push_next(&mut raw.v13);
    }
    f(&mut features2)
}

/// Enumerate, probe and select in one go.
pub fn select_for_surface<T: HasDisplayHandle + HasWindowHandle>(
    surface: &Surface<T>,
    requirements: &DeviceRequirements,
    ranks: &RankTable,
) -> Result<DeviceCandidate, SelectDeviceError> {
    let instance = surface.get_parent();
    let handles = instance
        .fetch_raw_physical_devices()
        .map_err(SelectDeviceError::Enumeration)?;
    let probes = handles.into_iter().enumerate().map(|(index, handle)| {
        // SAFETY: handle was just enumerated from the surface's instance
        unsafe { probe_device(surface, index, handle) }
    });
    let candidate =
        select_device(probes, requirements, ranks, |ext| {
            instance.has_extension(ext)
        })?;
    tracing::info!(
        "Selected physical device {:?} ({:?}, rank {}, queue family {}, \
         {:?} / {:?}, {:?})",
        candidate.name,
        candidate.device_type,
        candidate.rank,
        candidate.queue_family,
        candidate.surface_format.format,
        candidate.surface_format.color_space,
        candidate.present_mode,
    );
    Ok(candidate)
}
