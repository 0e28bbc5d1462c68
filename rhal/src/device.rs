//! Logical device wrapper ([`Device`]).
//!
//! `Device` owns the `VkDevice` created for the physical device the
//! selector picked, its single graphics+compute+present queue, and the
//! swapchain and debug-utils loaders.
//!
//! Raw Vulkan operations are surfaced as `unsafe fn` methods, prefixed
//! with `raw_` where they take or return raw handles. The rest of the
//! crate calls these rather than touching `ash::Device` directly.
//!
//! The queue is not locked. Submission and presentation happen only from
//! the thread driving the [`Context`](crate::context::Context).

use std::ffi::{CString, c_void};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    fatal,
    frame::{FrameOps, Submission},
    instance::{Instance, VkVersion},
    memory::ResourceRequirements,
    selector::{
        DeviceCandidate, DeviceRequirements, RankTable, SelectDeviceError,
        select_for_surface, with_enabled_features,
    },
    surface::{Surface, SurfaceQueryError},
    swapchain::SwapchainOps,
};

/// A logical Vulkan device and its per-device state.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    candidate: DeviceCandidate,
    api_version: VkVersion,
    queue: vk::Queue,
    swapchain_device: ash::khr::swapchain::Device,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    live_allocations: AtomicUsize,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("physical_device", &self.candidate.name)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        debug_assert_eq!(
            self.live_allocations(),
            0,
            "device dropped with live memory allocations"
        );
        //SAFETY: All objects derived from this device are dropped before
        //the last Arc to it.
        unsafe { self.handle.destroy_device(None) };
    }
}

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error("Device selection failed: {0}")]
    Select(#[from] SelectDeviceError),
    #[error("Failed to create logical device: {0}")]
    Creation(vk::Result),
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

/// Budget and usage of one memory heap, as reported by
/// `VK_EXT_memory_budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBudget {
    pub heap_index: u32,
    pub budget: vk::DeviceSize,
    pub usage: vk::DeviceSize,
}

impl Device {
    /// Select the best physical device for `surface` and create a logical
    /// device with one queue on the chosen family.
    pub fn new<T: HasDisplayHandle + HasWindowHandle>(
        surface: &Surface<T>,
        requirements: &DeviceRequirements,
        ranks: &RankTable,
    ) -> Result<Self, CreateDeviceError> {
        let instance = surface.get_parent();
        let candidate = select_for_surface(surface, requirements, ranks)?;
        let api_version = candidate.api_version.min(instance.supported_ver());

        let priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(candidate.queue_family)
            .queue_priorities(&priorities)];

        let extensions = candidate.enabled_extensions();
        let ext_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();
        tracing::debug!("Enabling device extensions {extensions:?}");

        let device = with_enabled_features(
            requirements.features,
            api_version,
            |features2| {
                let create_info = vk::DeviceCreateInfo::default()
                    .queue_create_infos(&queue_create_infos)
                    .enabled_extension_names(&ext_ptrs)
                    .push_next(features2);
                // SAFETY: the physical device came from this instance and
                // every enabled extension and feature was checked by the
                // selector
                unsafe {
                    instance.create_ash_device(candidate.handle, &create_info)
                }
            },
        );
        let device = fatal::check("vkCreateDevice", device)
            .map_err(CreateDeviceError::Creation)?;

        // SAFETY: the device was created with one queue on this family
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };

        let this = Self {
            parent: Arc::clone(instance),
            swapchain_device: instance.create_swapchain_loader(&device),
            debug_utils_device: instance
                .create_debug_utils_device_loader(&device),
            handle: device,
            candidate,
            api_version,
            queue,
            live_allocations: AtomicUsize::new(0),
        };
        // SAFETY: the queue belongs to this device
        unsafe { this.name_or_warn(queue, "main queue") };
        Ok(this)
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn candidate(&self) -> &DeviceCandidate {
        &self.candidate
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.candidate.handle
    }

    /// The API version features were negotiated against.
    pub fn api_version(&self) -> VkVersion {
        self.api_version
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.candidate.memory_properties
    }

    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.candidate.limits.non_coherent_atom_size
    }

    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        self.candidate.limits.timestamp_period
    }

    pub fn supports_timestamps(&self) -> bool {
        self.candidate.limits.timestamp_compute_and_graphics
    }

    pub fn queue_family(&self) -> u32 {
        self.candidate.queue_family
    }

    pub fn raw_queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }

    /// Device memory allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.load(Ordering::Relaxed)
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// Blocks the calling thread; meant for shutdown, suspend and swapchain
    /// teardown rather than per-frame use.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        fatal::check("vkDeviceWaitIdle", unsafe {
            self.handle.device_wait_idle()
        })
    }

    /// Per-heap budgets, if `VK_EXT_memory_budget` was enabled.
    pub fn memory_budget(&self) -> Option<Vec<HeapBudget>> {
        if !self.candidate.optional_extensions.memory_budget {
            return None;
        }
        let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
        let mut props2 =
            vk::PhysicalDeviceMemoryProperties2::default().push_next(&mut budget);
        // SAFETY: the physical device belongs to the parent instance, which
        // is at least Vulkan 1.1
        unsafe {
            self.parent
                .ash_instance()
                .get_physical_device_memory_properties2(
                    self.candidate.handle,
                    &mut props2,
                )
        };
        let heap_count = props2.memory_properties.memory_heap_count;
        Some(
            (0..heap_count)
                .map(|i| HeapBudget {
                    heap_index: i,
                    budget: budget.heap_budget[i as usize],
                    usage: budget.heap_usage[i as usize],
                })
                .collect(),
        )
    }
}

// Debug naming
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// A no-op unless `VK_EXT_debug_utils` is enabled.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device and
    /// must remain valid for the duration of the call.
    pub unsafe fn set_object_name<H: vk::Handle>(
        &self,
        object: H,
        name: &str,
    ) -> Result<(), NameObjectError> {
        let Some(debug_utils) = self.debug_utils_device.as_ref() else {
            return Ok(());
        };
        let name = CString::new(name).map_err(NameObjectError::InvalidName)?;
        let object_name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name);

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// # Safety
    /// Same as [`set_object_name`](Self::set_object_name).
    pub(crate) unsafe fn name_or_warn<H: vk::Handle>(&self, object: H, name: &str) {
        // SAFETY: forwarded caller contract
        if let Err(e) = unsafe { self.set_object_name(object, name) } {
            tracing::warn!("Failed to name object {name:?}: {e}");
        }
    }
}

// Memory functionality
impl Device {
    /// # Safety
    /// `allocate_info` and its pNext chain must be valid for this device.
    pub unsafe fn allocate_raw_memory(
        &self,
        allocate_info: &vk::MemoryAllocateInfo<'_>,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        // SAFETY: forwarded caller contract
        let memory = fatal::check("vkAllocateMemory", unsafe {
            self.handle.allocate_memory(allocate_info, None)
        })?;
        self.live_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(memory)
    }

    /// # Safety
    /// Nothing bound to `memory` may still be in use by the GPU.
    pub unsafe fn free_raw_memory(&self, memory: vk::DeviceMemory) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.free_memory(memory, None) };
        self.live_allocations.fetch_sub(1, Ordering::Relaxed);
    }

    /// Map the whole allocation.
    ///
    /// # Safety
    /// `memory` must be host-visible and not already mapped.
    pub unsafe fn map_raw_memory(
        &self,
        memory: vk::DeviceMemory,
    ) -> Result<*mut c_void, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkMapMemory", unsafe {
            self.handle.map_memory(
                memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )
        })
    }

    /// # Safety
    /// `memory` must be mapped and no pointer into the mapping may be used
    /// afterwards.
    pub unsafe fn unmap_raw_memory(&self, memory: vk::DeviceMemory) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.unmap_memory(memory) };
    }

    /// # Safety
    /// `buffer` must not have memory bound yet and `offset` must satisfy its
    /// requirements within `memory`.
    pub unsafe fn bind_raw_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkBindBufferMemory", unsafe {
            self.handle.bind_buffer_memory(buffer, memory, offset)
        })
    }

    /// # Safety
    /// `image` must not have memory bound yet and `offset` must satisfy its
    /// requirements within `memory`.
    pub unsafe fn bind_raw_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkBindImageMemory", unsafe {
            self.handle.bind_image_memory(image, memory, offset)
        })
    }

    /// # Safety
    /// `buffer` must be a live buffer from this device.
    pub unsafe fn get_raw_buffer_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> ResourceRequirements {
        let info = vk::BufferMemoryRequirementsInfo2::default().buffer(buffer);
        let mut dedicated = vk::MemoryDedicatedRequirements::default();
        let mut reqs2 =
            vk::MemoryRequirements2::default().push_next(&mut dedicated);
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .get_buffer_memory_requirements2(&info, &mut reqs2)
        };
        ResourceRequirements {
            requirements: reqs2.memory_requirements,
            prefers_dedicated: dedicated.prefers_dedicated_allocation != 0,
            requires_dedicated: dedicated.requires_dedicated_allocation != 0,
        }
    }

    /// # Safety
    /// `image` must be a live image from this device.
    pub unsafe fn get_raw_image_requirements(
        &self,
        image: vk::Image,
    ) -> ResourceRequirements {
        let info = vk::ImageMemoryRequirementsInfo2::default().image(image);
        let mut dedicated = vk::MemoryDedicatedRequirements::default();
        let mut reqs2 =
            vk::MemoryRequirements2::default().push_next(&mut dedicated);
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .get_image_memory_requirements2(&info, &mut reqs2)
        };
        ResourceRequirements {
            requirements: reqs2.memory_requirements,
            prefers_dedicated: dedicated.prefers_dedicated_allocation != 0,
            requires_dedicated: dedicated.requires_dedicated_allocation != 0,
        }
    }
}

// Buffer, image and sampler functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid for this device.
    pub unsafe fn create_raw_buffer(
        &self,
        create_info: &vk::BufferCreateInfo<'_>,
    ) -> Result<vk::Buffer, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateBuffer", unsafe {
            self.handle.create_buffer(create_info, None)
        })
    }

    /// # Safety
    /// No pending work may reference `buffer`.
    pub unsafe fn destroy_raw_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_buffer(buffer, None) };
    }

    /// # Safety
    /// `create_info` must be valid for this device.
    pub unsafe fn create_raw_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
    ) -> Result<vk::Image, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateImage", unsafe {
            self.handle.create_image(create_info, None)
        })
    }

    /// # Safety
    /// No pending work may reference `image`.
    pub unsafe fn destroy_raw_image(&self, image: vk::Image) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_image(image, None) };
    }

    /// # Safety
    /// `create_info` must reference a live image from this device.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateImageView", unsafe {
            self.handle.create_image_view(create_info, None)
        })
    }

    /// # Safety
    /// No pending work may reference `image_view`.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }

    /// # Safety
    /// `create_info` must be valid for this device.
    pub unsafe fn create_raw_sampler(
        &self,
        create_info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<vk::Sampler, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateSampler", unsafe {
            self.handle.create_sampler(create_info, None)
        })
    }

    /// # Safety
    /// No pending work may reference `sampler`.
    pub unsafe fn destroy_raw_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_sampler(sampler, None) };
    }
}

// Descriptor functionality
impl Device {
    /// # Safety
    /// `create_info` and its pNext chain must be valid for this device.
    pub unsafe fn create_raw_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateDescriptorSetLayout", unsafe {
            self.handle.create_descriptor_set_layout(create_info, None)
        })
    }

    /// # Safety
    /// No live set may still be allocated from `layout` that is used later.
    pub unsafe fn destroy_raw_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) };
    }

    /// # Safety
    /// `create_info` must be valid for this device.
    pub unsafe fn create_raw_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkCreateDescriptorPool", unsafe {
            self.handle.create_descriptor_pool(create_info, None)
        })
    }

    /// # Safety
    /// No pending work may reference sets from `pool`.
    pub unsafe fn destroy_raw_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_descriptor_pool(pool, None) };
    }

    /// # Safety
    /// No pending work may reference sets from `pool`.
    pub unsafe fn reset_raw_descriptor_pool(
        &self,
        pool: vk::DescriptorPool,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkResetDescriptorPool", unsafe {
            self.handle.reset_descriptor_pool(
                pool,
                vk::DescriptorPoolResetFlags::empty(),
            )
        })
    }

    /// # Safety
    /// `allocate_info` must reference a live pool and layouts.
    pub unsafe fn allocate_raw_descriptor_sets(
        &self,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        // SAFETY: forwarded caller contract
        fatal::check("vkAllocateDescriptorSets", unsafe {
            self.handle.allocate_descriptor_sets(allocate_info)
        })
    }

    /// # Safety
    /// Every write must reference live sets and resources, and no pending
    /// work may use a written binding unless it is update-after-bind.
    pub unsafe fn update_raw_descriptor_sets(
        &self,
        writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.update_descriptor_sets(writes, &[]) };
    }
}

// Command recording
impl Device {
    /// # Safety
    /// `command_buffer` must be recording and `dependency_info` must
    /// reference live resources.
    pub unsafe fn cmd_pipeline_barrier2(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &vk::DependencyInfo<'_>,
    ) {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .cmd_pipeline_barrier2(command_buffer, dependency_info)
        };
    }

    /// # Safety
    /// `command_buffer` must be recording, both images must be in the given
    /// layouts when the command executes.
    pub unsafe fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle.cmd_blit_image(
                command_buffer,
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                filter,
            )
        };
    }

    /// # Safety
    /// `command_buffer` must be recording and `image` must be in `layout`
    /// when the command executes.
    pub unsafe fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
        ranges: &[vk::ImageSubresourceRange],
    ) {
        let clear = vk::ClearColorValue { float32: color };
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle.cmd_clear_color_image(
                command_buffer,
                image,
                layout,
                &clear,
                ranges,
            )
        };
    }
}

fn surface_query_result(e: SurfaceQueryError) -> vk::Result {
    match e {
        SurfaceQueryError::Vulkan(result) => result,
        SurfaceQueryError::ExtensionNotLoaded => {
            vk::Result::ERROR_EXTENSION_NOT_PRESENT
        }
    }
}

impl FrameOps for Device {
    unsafe fn create_frame_command_pool(
        &self,
    ) -> Result<vk::CommandPool, vk::Result> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.candidate.queue_family);
        // SAFETY: create info is fully initialised for this device
        unsafe { self.handle.create_command_pool(&create_info, None) }
    }

    unsafe fn destroy_frame_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    unsafe fn reset_frame_command_pool(
        &self,
        pool: vk::CommandPool,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
    }

    unsafe fn allocate_primary_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer, vk::Result> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: forwarded caller contract
        let buffers =
            unsafe { self.handle.allocate_command_buffers(&allocate_info) }?;
        buffers.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    unsafe fn begin_one_time_commands(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .begin_command_buffer(command_buffer, &begin_info)
        }
    }

    unsafe fn end_commands(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }

    unsafe fn create_fence(
        &self,
        signaled: bool,
    ) -> Result<vk::Fence, vk::Result> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: create info is fully initialised
        unsafe { self.handle.create_fence(&create_info, None) }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_fence(fence, None) };
    }

    unsafe fn wait_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.wait_for_fences(&[fence], true, u64::MAX) }
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.reset_fences(&[fence]) }
    }

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: default create info is valid
        unsafe {
            self.handle
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }

    unsafe fn create_timestamp_pool(
        &self,
        query_count: u32,
    ) -> Result<vk::QueryPool, vk::Result> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(query_count);
        // SAFETY: create info is fully initialised
        unsafe { self.handle.create_query_pool(&create_info, None) }
    }

    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool) {
        // SAFETY: forwarded caller contract
        unsafe { self.handle.destroy_query_pool(pool, None) };
    }

    unsafe fn cmd_reset_queries(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        query_count: u32,
    ) {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .cmd_reset_query_pool(command_buffer, pool, 0, query_count)
        };
    }

    unsafe fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        pool: vk::QueryPool,
        query: u32,
    ) {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle
                .cmd_write_timestamp2(command_buffer, stage, pool, query)
        };
    }

    unsafe fn read_timestamps(
        &self,
        pool: vk::QueryPool,
        results: &mut [u64],
    ) -> Result<(), vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe {
            self.handle.get_query_pool_results(
                pool,
                0,
                results,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
    }

    unsafe fn submit(
        &self,
        submission: &Submission<'_>,
    ) -> Result<(), vk::Result> {
        let command_buffers: Vec<_> = submission
            .command_buffers
            .iter()
            .map(|&cb| vk::CommandBufferSubmitInfo::default().command_buffer(cb))
            .collect();
        let waits: Vec<_> = submission
            .waits
            .iter()
            .map(|w| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(w.semaphore)
                    .stage_mask(w.stage)
            })
            .collect();
        let signals: Vec<_> = submission
            .signals
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffers)
            .wait_semaphore_infos(&waits)
            .signal_semaphore_infos(&signals);
        // SAFETY: forwarded caller contract; the queue is only used from
        // the thread driving the context
        unsafe {
            self.handle
                .queue_submit2(self.queue, &[submit_info], submission.fence)
        }
    }

    unsafe fn name_object<H: vk::Handle>(&self, object: H, name: &str) {
        // SAFETY: forwarded caller contract
        unsafe { self.name_or_warn(object, name) };
    }
}

impl SwapchainOps for Device {
    unsafe fn wait_device_idle(&self) -> Result<(), vk::Result> {
        self.wait_idle()
    }

    unsafe fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe {
            self.parent
                .get_surface_capabilities(self.candidate.handle, surface)
        }
        .map_err(surface_query_result)
    }

    unsafe fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.swapchain_device.create_swapchain(create_info, None) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: forwarded caller contract
        unsafe { self.swapchain_device.destroy_swapchain(swapchain, None) };
    }

    unsafe fn swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.swapchain_device.get_swapchain_images(swapchain) }
    }

    unsafe fn create_swapchain_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { self.create_raw_image_view(create_info) }
    }

    unsafe fn destroy_swapchain_image_view(&self, view: vk::ImageView) {
        // SAFETY: forwarded caller contract
        unsafe { self.destroy_raw_image_view(view) };
    }

    unsafe fn create_present_semaphore(
        &self,
    ) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: forwarded caller contract
        unsafe { FrameOps::create_semaphore(self) }
    }

    unsafe fn destroy_present_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: forwarded caller contract
        unsafe { FrameOps::destroy_semaphore(self, semaphore) };
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        // SAFETY: forwarded caller contract; the swapchain is only used
        // from the thread driving the context
        unsafe {
            self.swapchain_device.acquire_next_image(
                swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
    }

    unsafe fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let waits = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        // SAFETY: forwarded caller contract
        unsafe {
            self.swapchain_device
                .queue_present(self.queue, &present_info)
        }
    }

    unsafe fn name_object<H: vk::Handle>(&self, object: H, name: &str) {
        // SAFETY: forwarded caller contract
        unsafe { self.name_or_warn(object, name) };
    }
}
