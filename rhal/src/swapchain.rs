//! The swapchain acquire/present/recreate state machine.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::fatal;

/// Upper bound on images a platform may hand back for one swapchain.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

/// Device operations the swapchain manager relies on.
///
/// Implemented by [`Device`](crate::device::Device); tests substitute a
/// recording mock.
pub trait SwapchainOps {
    /// # Safety
    /// Implementations must be called on a live device.
    unsafe fn wait_device_idle(&self) -> Result<(), vk::Result>;
    /// # Safety
    /// `surface` must come from the device's instance.
    unsafe fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result>;
    /// # Safety
    /// `create_info` must reference live handles, `old_swapchain` included.
    unsafe fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, vk::Result>;
    /// # Safety
    /// No pending work may reference `swapchain` or its images.
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// # Safety
    /// `swapchain` must be live.
    unsafe fn swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, vk::Result>;
    /// # Safety
    /// `create_info` must reference a live image.
    unsafe fn create_swapchain_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result>;
    /// # Safety
    /// No pending work may reference `view`.
    unsafe fn destroy_swapchain_image_view(&self, view: vk::ImageView);
    /// # Safety
    /// Implementations must be called on a live device.
    unsafe fn create_present_semaphore(
        &self,
    ) -> Result<vk::Semaphore, vk::Result>;
    /// # Safety
    /// No pending work may wait on or signal `semaphore`.
    unsafe fn destroy_present_semaphore(&self, semaphore: vk::Semaphore);
    /// Acquire with an infinite timeout, signaling `signal`.
    ///
    /// # Safety
    /// `swapchain` must be live and `signal` unsignaled with no pending
    /// signal operation.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;
    /// Returns `true` when the presentation engine reported suboptimal.
    ///
    /// # Safety
    /// `image_index` must have been acquired and `wait` must be signaled
    /// by submitted work.
    unsafe fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    /// # Safety
    /// `object` must be a live handle from this device.
    unsafe fn name_object<H: vk::Handle>(&self, _object: H, _name: &str) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecreateSwapchainError {
    #[error("Waiting for the device to go idle failed: {0}")]
    WaitIdle(vk::Result),
    #[error("Failed while querying surface capabilities: {0}")]
    SurfaceQuery(vk::Result),
    #[error("Vulkan error creating swapchain: {0}")]
    Create(vk::Result),
    #[error("Vulkan error fetching swapchain images: {0}")]
    GetImages(vk::Result),
    #[error(
        "Platform returned {count} swapchain images, at most \
         {MAX_SWAPCHAIN_IMAGES} are supported"
    )]
    TooManyImages { count: usize },
    #[error("Vulkan error creating swapchain image view: {0}")]
    CreateImageView(vk::Result),
    #[error("Vulkan error creating present semaphore: {0}")]
    CreateSemaphore(vk::Result),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("Swapchain recreation failed: {0}")]
    Recreate(#[from] RecreateSwapchainError),
    #[error("vkAcquireNextImageKHR failed: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresentError {
    #[error("vkQueuePresentKHR failed: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Valid,
    NeedsRecreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    Recreated,
    /// The surface currently has no area. The old swapchain, if any, is
    /// kept and recreation is retried on the next acquire.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented.
    OutOfDate,
}

/// Surface parameters fixed at device selection.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub image_usage: vk::ImageUsageFlags,
    pub queue_family_index: u32,
}

impl SwapchainSettings {
    pub const DEFAULT_IMAGE_USAGE: vk::ImageUsageFlags =
        vk::ImageUsageFlags::from_raw(
            vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
                | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
        );
}

/// Everything rebuilt as a unit on recreate.
///
/// `images`, `views` and `ready_for_present` always have the same length.
#[derive(Debug, Default)]
struct SwapchainState {
    handle: vk::SwapchainKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    ready_for_present: Vec<vk::Semaphore>,
}

/// An image handed out by [`SwapchainManager::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    /// Signal this from the submission that finishes writing `image`.
    pub ready_for_present: vk::Semaphore,
    pub suboptimal: bool,
}

pub struct SwapchainManager<D: SwapchainOps> {
    device: Arc<D>,
    surface: vk::SurfaceKHR,
    settings: SwapchainSettings,
    state: SwapchainState,
    status: SwapchainStatus,
    /// Extent the caller asked for at the last recreate. Platforms that
    /// dictate `current_extent` may never match it.
    last_requested: vk::Extent2D,
    recreate_count: u64,
}

impl<D: SwapchainOps> std::fmt::Debug for SwapchainManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapchainManager")
            .field("surface", &self.surface)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("recreate_count", &self.recreate_count)
            .finish_non_exhaustive()
    }
}

pub(crate) fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub(crate) fn choose_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> u32 {
    let count = capabilities.min_image_count.saturating_add(1);
    match capabilities.max_image_count {
        0 => count,
        max => count.min(max),
    }
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Build one 2D color view per image, destroying the ones already built if
/// any creation fails.
fn create_swapchain_image_views<FCreate, FDestroy, FName>(
    images: &[vk::Image],
    format: vk::Format,
    mut create_image_view: FCreate,
    mut destroy_image_view: FDestroy,
    mut name_image_view: FName,
) -> Result<Vec<vk::ImageView>, vk::Result>
where
    FCreate:
        FnMut(&vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView, vk::Result>,
    FDestroy: FnMut(vk::ImageView),
    FName: FnMut(usize, vk::ImageView),
{
    let mut views = Vec::with_capacity(images.len());
    for (index, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        match create_image_view(&create_info) {
            Ok(view) => {
                name_image_view(index, view);
                views.push(view);
            }
            Err(e) => {
                views.drain(..).for_each(&mut destroy_image_view);
                return Err(e);
            }
        }
    }
    Ok(views)
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(1)
        .layer_count(1)
}

/// Barriers around a transfer write into a freshly acquired swapchain
/// image: `UNDEFINED -> TRANSFER_DST_OPTIMAL` before, and
/// `TRANSFER_DST_OPTIMAL -> PRESENT_SRC_KHR` after.
///
/// The first barrier's source stage matches the stage the acquire
/// semaphore is waited on, so the layout change happens after the
/// presentation engine releases the image.
pub fn present_blit_barriers(
    image: vk::Image,
) -> [vk::ImageMemoryBarrier2<'static>; 2] {
    let to_transfer = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::BLIT)
        .src_access_mask(vk::AccessFlags2::NONE)
        .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range());
    let to_present = to_transfer
        .src_stage_mask(vk::PipelineStageFlags2::BLIT)
        .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::NONE)
        .dst_access_mask(vk::AccessFlags2::NONE)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    [to_transfer, to_present]
}

/// Full-image blit region from a `src` sized image into a `dst` sized one.
pub fn full_blit_region(
    src: vk::Extent2D,
    dst: vk::Extent2D,
) -> vk::ImageBlit {
    let corner = |e: vk::Extent2D| vk::Offset3D {
        x: e.width as i32,
        y: e.height as i32,
        z: 1,
    };
    let layer = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .layer_count(1);
    vk::ImageBlit::default()
        .src_subresource(layer)
        .src_offsets([vk::Offset3D::default(), corner(src)])
        .dst_subresource(layer)
        .dst_offsets([vk::Offset3D::default(), corner(dst)])
}

impl<D: SwapchainOps> SwapchainManager<D> {
    /// No swapchain exists until the first [`acquire`](Self::acquire).
    pub fn new(
        device: Arc<D>,
        surface: vk::SurfaceKHR,
        settings: SwapchainSettings,
    ) -> Self {
        Self {
            device,
            surface,
            settings,
            state: SwapchainState::default(),
            status: SwapchainStatus::NeedsRecreate,
            last_requested: vk::Extent2D::default(),
            recreate_count: 0,
        }
    }

    pub fn status(&self) -> SwapchainStatus {
        self.status
    }

    pub fn mark_needs_recreate(&mut self) {
        self.status = SwapchainStatus::NeedsRecreate;
    }

    pub fn needs_recreate(&self, requested: vk::Extent2D) -> bool {
        self.status == SwapchainStatus::NeedsRecreate
            || self.state.handle == vk::SwapchainKHR::null()
            || (requested != self.state.extent
                && requested != self.last_requested)
    }

    pub fn raw_handle(&self) -> vk::SwapchainKHR {
        self.state.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.state.extent
    }

    pub fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.state.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.state.views
    }

    /// Number of completed recreations, the initial creation included.
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    /// # Safety
    /// No pending GPU work may reference the views or semaphores.
    unsafe fn destroy_image_resources(&mut self) {
        let device = &*self.device;
        // SAFETY: forwarded from caller
        unsafe {
            for view in self.state.views.drain(..) {
                device.destroy_swapchain_image_view(view);
            }
            for semaphore in self.state.ready_for_present.drain(..) {
                device.destroy_present_semaphore(semaphore);
            }
        }
        self.state.images.clear();
    }

    /// Rebuild the swapchain for `requested`.
    ///
    /// Waits for the device to go idle first: there is no fence that
    /// covers presentation, so idling is the only way to know the old
    /// images are released.
    pub fn recreate(
        &mut self,
        requested: vk::Extent2D,
    ) -> Result<RecreateOutcome, RecreateSwapchainError> {
        let _span = tracing::debug_span!("swapchain_recreate").entered();
        self.status = SwapchainStatus::NeedsRecreate;
        self.last_requested = requested;

        // SAFETY: device is alive for as long as the Arc
        fatal::check("vkDeviceWaitIdle", unsafe {
            self.device.wait_device_idle()
        })
        .map_err(RecreateSwapchainError::WaitIdle)?;

        // SAFETY: the device is idle
        unsafe { self.destroy_image_resources() };

        // SAFETY: the surface outlives the manager
        let capabilities = fatal::check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", unsafe {
            self.device.surface_capabilities(self.surface)
        })
        .map_err(RecreateSwapchainError::SurfaceQuery)?;

        let extent = choose_extent(&capabilities, requested);
        if is_zero_area(extent) {
            tracing::debug!("Surface has zero area, deferring recreate");
            return Ok(RecreateOutcome::Deferred);
        }

        let queue_family_indices = [self.settings.queue_family_index];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(self.settings.surface_format.format)
            .image_color_space(self.settings.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.settings.image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(self.settings.composite_alpha)
            .present_mode(self.settings.present_mode)
            .clipped(true)
            .old_swapchain(self.state.handle);

        let device = &*self.device;
        // SAFETY: create info references the live surface and the current
        // handle, or null
        let created = fatal::check("vkCreateSwapchainKHR", unsafe {
            device.create_swapchain(&create_info)
        });
        // The old handle is retired by the create call even when it fails,
        // and may never be passed as old_swapchain again.
        let retired =
            std::mem::replace(&mut self.state.handle, vk::SwapchainKHR::null());
        if retired != vk::SwapchainKHR::null() {
            // SAFETY: the device is idle and no image of the retired
            // swapchain is acquired
            unsafe { device.destroy_swapchain(retired) };
        }
        let handle = created.map_err(RecreateSwapchainError::Create)?;

        // SAFETY: handle was just created and nothing references it
        let destroy_new = || unsafe { device.destroy_swapchain(handle) };

        // SAFETY: handle is live
        let images = match fatal::check("vkGetSwapchainImagesKHR", unsafe {
            device.swapchain_images(handle)
        }) {
            Ok(images) if images.len() > MAX_SWAPCHAIN_IMAGES => {
                destroy_new();
                return Err(RecreateSwapchainError::TooManyImages {
                    count: images.len(),
                });
            }
            Ok(images) => images,
            Err(e) => {
                destroy_new();
                return Err(RecreateSwapchainError::GetImages(e));
            }
        };

        let generation = self.recreate_count;
        let views = create_swapchain_image_views(
            &images,
            self.settings.surface_format.format,
            |create_info| {
                // SAFETY: create_info references an image of the live
                // swapchain
                fatal::check("vkCreateImageView", unsafe {
                    device.create_swapchain_image_view(create_info)
                })
            },
            |view| {
                // SAFETY: view was just created and is unused
                unsafe { device.destroy_swapchain_image_view(view) }
            },
            |index, view| {
                // SAFETY: view is live
                unsafe {
                    device.name_object(
                        view,
                        &format!("swapchain{generation}.view{index}"),
                    )
                }
            },
        )
        .map_err(|e| {
            destroy_new();
            RecreateSwapchainError::CreateImageView(e)
        })?;

        let mut ready_for_present = Vec::with_capacity(images.len());
        for _ in &images {
            // SAFETY: device is live
            match fatal::check("vkCreateSemaphore", unsafe {
                device.create_present_semaphore()
            }) {
                Ok(semaphore) => ready_for_present.push(semaphore),
                Err(e) => {
                    // SAFETY: none of these were ever used
                    unsafe {
                        for semaphore in ready_for_present {
                            device.destroy_present_semaphore(semaphore);
                        }
                        for view in views {
                            device.destroy_swapchain_image_view(view);
                        }
                    }
                    destroy_new();
                    return Err(RecreateSwapchainError::CreateSemaphore(e));
                }
            }
        }

        // SAFETY: handle is live
        unsafe {
            device.name_object(handle, &format!("swapchain{generation}"))
        };

        tracing::debug!(
            "Recreated swapchain {handle:?}: {}x{}, {} images",
            extent.width,
            extent.height,
            images.len()
        );

        self.state.handle = handle;
        self.state.extent = extent;
        self.state.images = images;
        self.state.views = views;
        self.state.ready_for_present = ready_for_present;
        self.status = SwapchainStatus::Valid;
        self.recreate_count += 1;
        Ok(RecreateOutcome::Recreated)
    }

    /// Acquire the next image, signaling `image_available` when the
    /// presentation engine releases it.
    ///
    /// Recreates first if needed, and once more if the acquire reports the
    /// swapchain stale. `Ok(None)` means nothing was acquired this frame
    /// and `image_available` will not be signaled: the surface has no
    /// area, or the swapchain went stale again right after recreation.
    pub fn acquire(
        &mut self,
        image_available: vk::Semaphore,
        requested: vk::Extent2D,
    ) -> Result<Option<AcquiredImage>, AcquireError> {
        if is_zero_area(requested) {
            return Ok(None);
        }
        if self.needs_recreate(requested)
            && self.recreate(requested)? == RecreateOutcome::Deferred
        {
            return Ok(None);
        }

        for attempt in 0..2 {
            // SAFETY: the handle is live and the caller passes the frame
            // slot's unsignaled semaphore
            let result = fatal::check("vkAcquireNextImageKHR", unsafe {
                self.device
                    .acquire_next_image(self.state.handle, image_available)
            });
            match result {
                Ok((index, suboptimal)) => {
                    let i = index as usize;
                    return Ok(Some(AcquiredImage {
                        index,
                        image: self.state.images[i],
                        view: self.state.views[i],
                        extent: self.state.extent,
                        ready_for_present: self.state.ready_for_present[i],
                        suboptimal,
                    }));
                }
                Err(e) if fatal::is_stale_swapchain(e) => {
                    tracing::debug!("Acquire reported {e}, recreating");
                    self.status = SwapchainStatus::NeedsRecreate;
                    if attempt == 0
                        && self.recreate(requested)?
                            == RecreateOutcome::Deferred
                    {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(AcquireError::Vulkan(e)),
            }
        }
        Ok(None)
    }

    /// Queue `image` for presentation once its ready semaphore signals.
    ///
    /// Staleness is recorded and handled by the next acquire.
    pub fn present(
        &mut self,
        image: &AcquiredImage,
    ) -> Result<PresentOutcome, PresentError> {
        // SAFETY: image came from acquire on the current handle and the
        // caller submitted work signaling its ready semaphore
        let result = fatal::check("vkQueuePresentKHR", unsafe {
            self.device.queue_present(
                self.state.handle,
                image.index,
                image.ready_for_present,
            )
        });
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                self.status = SwapchainStatus::NeedsRecreate;
                Ok(PresentOutcome::Suboptimal)
            }
            Err(e) if fatal::is_stale_swapchain(e) => {
                self.status = SwapchainStatus::NeedsRecreate;
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(PresentError::Vulkan(e)),
        }
    }
}

impl<D: SwapchainOps> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        tracing::debug!("Dropping swapchain {:?}", self.state.handle);
        // SAFETY: the owner waits for the device to go idle before
        // dropping the manager
        unsafe {
            self.destroy_image_resources();
            if self.state.handle != vk::SwapchainKHR::null() {
                self.device.destroy_swapchain(self.state.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        WaitIdle,
        CreateSwapchain {
            handle: u64,
            old: u64,
            extent: vk::Extent2D,
        },
        DestroySwapchain(u64),
        CreateView(u64),
        DestroyView(u64),
        Acquire(u64),
        Present { swapchain: u64, index: u32 },
    }

    struct MockSwapchainDevice {
        next_handle: Cell<u64>,
        calls: RefCell<Vec<Call>>,
        capabilities: Cell<vk::SurfaceCapabilitiesKHR>,
        /// Images per swapchain; defaults to the requested minimum.
        image_count: Cell<Option<usize>>,
        acquire_results: RefCell<VecDeque<Result<(u32, bool), vk::Result>>>,
        present_results: RefCell<VecDeque<Result<bool, vk::Result>>>,
        fail_view_after: Cell<Option<usize>>,
        fail_create: Cell<bool>,
        live_semaphores: Cell<usize>,
    }

    impl MockSwapchainDevice {
        fn new(capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
            Self {
                next_handle: Cell::new(0),
                calls: RefCell::default(),
                capabilities: Cell::new(capabilities),
                image_count: Cell::new(None),
                acquire_results: RefCell::default(),
                present_results: RefCell::default(),
                fail_view_after: Cell::new(None),
                fail_create: Cell::new(false),
                live_semaphores: Cell::new(0),
            }
        }

        fn handle(&self) -> u64 {
            let next = self.next_handle.get() + 1;
            self.next_handle.set(next);
            next
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(c)).count()
        }
    }

    impl SwapchainOps for MockSwapchainDevice {
        unsafe fn wait_device_idle(&self) -> Result<(), vk::Result> {
            self.calls.borrow_mut().push(Call::WaitIdle);
            Ok(())
        }

        unsafe fn surface_capabilities(
            &self,
            _surface: vk::SurfaceKHR,
        ) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
            Ok(self.capabilities.get())
        }

        unsafe fn create_swapchain(
            &self,
            create_info: &vk::SwapchainCreateInfoKHR<'_>,
        ) -> Result<vk::SwapchainKHR, vk::Result> {
            if self.fail_create.get() {
                return Err(vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR);
            }
            let handle = self.handle();
            if self.image_count.get().is_none() {
                self.image_count
                    .set(Some(create_info.min_image_count as usize));
            }
            self.calls.borrow_mut().push(Call::CreateSwapchain {
                handle,
                old: create_info.old_swapchain.as_raw(),
                extent: create_info.image_extent,
            });
            Ok(vk::SwapchainKHR::from_raw(handle))
        }

        unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
            self.calls
                .borrow_mut()
                .push(Call::DestroySwapchain(swapchain.as_raw()));
        }

        unsafe fn swapchain_images(
            &self,
            _swapchain: vk::SwapchainKHR,
        ) -> Result<Vec<vk::Image>, vk::Result> {
            let count = self.image_count.get().unwrap_or(0);
            Ok((0..count)
                .map(|i| vk::Image::from_raw(1000 + i as u64))
                .collect())
        }

        unsafe fn create_swapchain_image_view(
            &self,
            _create_info: &vk::ImageViewCreateInfo<'_>,
        ) -> Result<vk::ImageView, vk::Result> {
            if let Some(left) = self.fail_view_after.get() {
                if left == 0 {
                    return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
                }
                self.fail_view_after.set(Some(left - 1));
            }
            let view = self.handle();
            self.calls.borrow_mut().push(Call::CreateView(view));
            Ok(vk::ImageView::from_raw(view))
        }

        unsafe fn destroy_swapchain_image_view(&self, view: vk::ImageView) {
            self.calls
                .borrow_mut()
                .push(Call::DestroyView(view.as_raw()));
        }

        unsafe fn create_present_semaphore(
            &self,
        ) -> Result<vk::Semaphore, vk::Result> {
            self.live_semaphores.set(self.live_semaphores.get() + 1);
            Ok(vk::Semaphore::from_raw(self.handle()))
        }

        unsafe fn destroy_present_semaphore(&self, _semaphore: vk::Semaphore) {
            self.live_semaphores.set(self.live_semaphores.get() - 1);
        }

        unsafe fn acquire_next_image(
            &self,
            swapchain: vk::SwapchainKHR,
            _signal: vk::Semaphore,
        ) -> Result<(u32, bool), vk::Result> {
            self.calls
                .borrow_mut()
                .push(Call::Acquire(swapchain.as_raw()));
            self.acquire_results
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok((0, false)))
        }

        unsafe fn queue_present(
            &self,
            swapchain: vk::SwapchainKHR,
            image_index: u32,
            _wait: vk::Semaphore,
        ) -> Result<bool, vk::Result> {
            self.calls.borrow_mut().push(Call::Present {
                swapchain: swapchain.as_raw(),
                index: image_index,
            });
            self.present_results
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(false))
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn fixed_caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: current,
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        }
    }

    fn variable_caps(
        min: vk::Extent2D,
        max: vk::Extent2D,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: min,
            max_image_extent: max,
            ..fixed_caps(extent(0, 0))
        }
    }

    fn manager(
        capabilities: vk::SurfaceCapabilitiesKHR,
    ) -> SwapchainManager<MockSwapchainDevice> {
        SwapchainManager::new(
            Arc::new(MockSwapchainDevice::new(capabilities)),
            vk::SurfaceKHR::from_raw(77),
            SwapchainSettings {
                surface_format: vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                present_mode: vk::PresentModeKHR::FIFO,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                image_usage: SwapchainSettings::DEFAULT_IMAGE_USAGE,
                queue_family_index: 0,
            },
        )
    }

    fn acquire(
        swapchain: &mut SwapchainManager<MockSwapchainDevice>,
        requested: vk::Extent2D,
    ) -> Option<AcquiredImage> {
        swapchain
            .acquire(vk::Semaphore::from_raw(5), requested)
            .unwrap()
    }

    #[test]
    fn choose_extent_uses_current_when_fixed() {
        let chosen = choose_extent(&fixed_caps(extent(1280, 720)), extent(1920, 1080));
        assert_eq!(chosen, extent(1280, 720));
    }

    #[test]
    fn choose_extent_clamps_only_for_the_any_extent_sentinel() {
        let caps = variable_caps(extent(640, 480), extent(1920, 1080));
        assert_eq!(choose_extent(&caps, extent(4000, 200)), extent(1920, 480));
    }

    #[test]
    fn choose_image_count_respects_max_when_set() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded), 3);
    }

    #[test]
    fn first_acquire_creates_the_swapchain() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        let image = acquire(&mut swapchain, extent(800, 600)).unwrap();

        assert_eq!(swapchain.status(), SwapchainStatus::Valid);
        assert_eq!(swapchain.extent(), extent(800, 600));
        assert_eq!(swapchain.images().len(), 3);
        assert_eq!(swapchain.image_views().len(), 3);
        assert_eq!(image.index, 0);
        assert_eq!(image.view, swapchain.image_views()[0]);
        assert_eq!(swapchain.device.live_semaphores.get(), 3);
        assert!(swapchain.device.calls.borrow().contains(&Call::CreateSwapchain {
            handle: swapchain.raw_handle().as_raw(),
            old: 0,
            extent: extent(800, 600),
        }));
    }

    #[test]
    fn out_of_date_acquire_recreates_once_and_retries() {
        let mut swapchain =
            manager(variable_caps(extent(64, 64), extent(1024, 768)));
        acquire(&mut swapchain, extent(800, 600)).unwrap();
        let first = swapchain.raw_handle();

        swapchain
            .device
            .acquire_results
            .borrow_mut()
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        swapchain
            .device
            .acquire_results
            .borrow_mut()
            .push_back(Ok((1, false)));

        // Same requested extent, so only the out-of-date result triggers
        // the recreate.
        let image = acquire(&mut swapchain, extent(800, 600)).unwrap();
        assert_eq!(image.index, 1);
        assert_eq!(swapchain.recreate_count(), 2);
        assert_ne!(swapchain.raw_handle(), first);

        let device = &swapchain.device;
        assert_eq!(device.count(|c| matches!(c, Call::Acquire(_))), 3);
        assert_eq!(
            device.count(|c| *c == Call::DestroySwapchain(first.as_raw())),
            1
        );

        // A larger request is reclamped into the platform's bounds.
        acquire(&mut swapchain, extent(2000, 2000)).unwrap();
        assert_eq!(swapchain.extent(), extent(1024, 768));
    }

    #[test]
    fn recreate_with_unchanged_extent_keeps_shape_and_rebuilds_views() {
        let mut swapchain = manager(fixed_caps(extent(640, 480)));
        acquire(&mut swapchain, extent(640, 480)).unwrap();
        let retired = swapchain.raw_handle();
        let old_views = swapchain.image_views().to_vec();
        let old_count = swapchain.images().len();

        assert_eq!(
            swapchain.recreate(extent(640, 480)),
            Ok(RecreateOutcome::Recreated)
        );

        assert_eq!(swapchain.extent(), extent(640, 480));
        assert_eq!(swapchain.images().len(), old_count);
        assert!(swapchain
            .image_views()
            .iter()
            .all(|view| !old_views.contains(view)));

        let device = &swapchain.device;
        let calls = device.calls.borrow();
        assert_eq!(
            device.count(|c| *c == Call::DestroySwapchain(retired.as_raw())),
            1
        );
        let created = calls
            .iter()
            .position(|c| matches!(c, Call::CreateSwapchain { old, .. } if *old == retired.as_raw()))
            .unwrap();
        let destroyed = calls
            .iter()
            .position(|c| *c == Call::DestroySwapchain(retired.as_raw()))
            .unwrap();
        assert!(created < destroyed);
        let idle = calls.iter().rposition(|c| *c == Call::WaitIdle).unwrap();
        assert!(idle < created);
        for view in old_views {
            assert!(calls.contains(&Call::DestroyView(view.as_raw())));
        }
        assert_eq!(device.live_semaphores.get(), old_count);
    }

    #[test]
    fn zero_area_skips_acquire() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        assert_eq!(acquire(&mut swapchain, extent(0, 600)), None);
        assert!(swapchain.device.calls.borrow().is_empty());

        // Minimized with a fixed zero extent reported by the platform.
        swapchain.device.capabilities.set(fixed_caps(extent(0, 0)));
        assert_eq!(acquire(&mut swapchain, extent(800, 600)), None);
        assert_eq!(swapchain.status(), SwapchainStatus::NeedsRecreate);
        assert_eq!(
            swapchain
                .device
                .count(|c| matches!(c, Call::CreateSwapchain { .. })),
            0
        );

        swapchain.device.capabilities.set(fixed_caps(extent(800, 600)));
        assert!(acquire(&mut swapchain, extent(800, 600)).is_some());
    }

    #[test]
    fn stale_twice_gives_up_for_the_frame() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        {
            let mut results = swapchain.device.acquire_results.borrow_mut();
            results.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
            results.push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        assert_eq!(acquire(&mut swapchain, extent(800, 600)), None);
        assert_eq!(swapchain.status(), SwapchainStatus::NeedsRecreate);
        assert_eq!(swapchain.recreate_count(), 2);
    }

    #[test]
    fn suboptimal_present_triggers_recreate_on_next_acquire() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        let image = acquire(&mut swapchain, extent(800, 600)).unwrap();
        swapchain
            .device
            .present_results
            .borrow_mut()
            .push_back(Ok(true));

        assert_eq!(swapchain.present(&image), Ok(PresentOutcome::Suboptimal));
        assert!(swapchain.needs_recreate(extent(800, 600)));

        acquire(&mut swapchain, extent(800, 600)).unwrap();
        assert_eq!(swapchain.recreate_count(), 2);
        assert_eq!(swapchain.status(), SwapchainStatus::Valid);
    }

    #[test]
    fn out_of_date_present_is_not_an_error() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        let image = acquire(&mut swapchain, extent(800, 600)).unwrap();
        swapchain
            .device
            .present_results
            .borrow_mut()
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(swapchain.present(&image), Ok(PresentOutcome::OutOfDate));
        assert_eq!(swapchain.status(), SwapchainStatus::NeedsRecreate);
    }

    #[test]
    fn platform_dictated_extent_does_not_loop() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        acquire(&mut swapchain, extent(1000, 1000)).unwrap();
        assert_eq!(swapchain.extent(), extent(800, 600));
        assert!(!swapchain.needs_recreate(extent(1000, 1000)));
        assert!(swapchain.needs_recreate(extent(1200, 1000)));
    }

    #[test]
    fn too_many_images_is_rejected_and_cleaned_up() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        swapchain.device.image_count.set(Some(MAX_SWAPCHAIN_IMAGES + 1));
        let err = swapchain
            .acquire(vk::Semaphore::from_raw(5), extent(800, 600))
            .unwrap_err();
        assert_eq!(
            err,
            AcquireError::Recreate(RecreateSwapchainError::TooManyImages {
                count: MAX_SWAPCHAIN_IMAGES + 1
            })
        );
        assert_eq!(swapchain.raw_handle(), vk::SwapchainKHR::null());
        assert_eq!(
            swapchain
                .device
                .count(|c| matches!(c, Call::DestroySwapchain(_))),
            1
        );
    }

    fn last_old_handle(device: &MockSwapchainDevice) -> u64 {
        device
            .calls
            .borrow()
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::CreateSwapchain { old, .. } => Some(*old),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn failed_view_creation_retires_old_handle() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        acquire(&mut swapchain, extent(800, 600)).unwrap();
        let old = swapchain.raw_handle();

        swapchain.device.fail_view_after.set(Some(1));
        let err = swapchain.recreate(extent(800, 600)).unwrap_err();
        assert!(matches!(err, RecreateSwapchainError::CreateImageView(_)));
        assert_eq!(swapchain.raw_handle(), vk::SwapchainKHR::null());
        assert_eq!(swapchain.status(), SwapchainStatus::NeedsRecreate);
        assert!(swapchain.images().is_empty());
        assert!(swapchain.image_views().is_empty());
        // Both the retired and the half-built swapchain are gone.
        assert_eq!(
            swapchain
                .device
                .count(|c| matches!(c, Call::DestroySwapchain(_))),
            2
        );
        assert_eq!(
            swapchain
                .device
                .count(|c| *c == Call::DestroySwapchain(old.as_raw())),
            1
        );

        swapchain.device.fail_view_after.set(None);
        assert_eq!(
            swapchain.recreate(extent(800, 600)),
            Ok(RecreateOutcome::Recreated)
        );
        assert_eq!(last_old_handle(&swapchain.device), 0);
    }

    #[test]
    fn failed_create_never_reuses_retired_handle() {
        let mut swapchain = manager(fixed_caps(extent(800, 600)));
        acquire(&mut swapchain, extent(800, 600)).unwrap();
        let old = swapchain.raw_handle();

        swapchain.device.fail_create.set(true);
        assert_eq!(
            swapchain.recreate(extent(800, 600)),
            Err(RecreateSwapchainError::Create(
                vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR
            ))
        );
        assert_eq!(swapchain.raw_handle(), vk::SwapchainKHR::null());
        assert_eq!(
            swapchain
                .device
                .count(|c| *c == Call::DestroySwapchain(old.as_raw())),
            1
        );

        swapchain.device.fail_create.set(false);
        acquire(&mut swapchain, extent(800, 600)).unwrap();
        assert_eq!(last_old_handle(&swapchain.device), 0);
    }

    #[test]
    fn image_view_helper_cleans_up_on_partial_failure() {
        let images = [
            vk::Image::from_raw(1),
            vk::Image::from_raw(2),
            vk::Image::from_raw(3),
        ];
        let created = RefCell::new(Vec::new());
        let destroyed = RefCell::new(Vec::new());

        let result = create_swapchain_image_views(
            &images,
            vk::Format::B8G8R8A8_UNORM,
            |_| {
                let mut created = created.borrow_mut();
                if created.len() == 2 {
                    return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
                }
                let view = vk::ImageView::from_raw(10 + created.len() as u64);
                created.push(view);
                Ok(view)
            },
            |view| destroyed.borrow_mut().push(view),
            |_, _| {},
        );

        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(*destroyed.borrow(), *created.borrow());
    }

    #[test]
    fn present_barriers_walk_undefined_to_present() {
        let image = vk::Image::from_raw(9);
        let [before, after] = present_blit_barriers(image);
        assert_eq!(before.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(before.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(after.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(after.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(before.image, image);
        assert_eq!(after.image, image);
        assert_eq!(after.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn blit_region_spans_both_images() {
        let region = full_blit_region(extent(320, 240), extent(800, 600));
        assert_eq!(region.src_offsets[1], vk::Offset3D { x: 320, y: 240, z: 1 });
        assert_eq!(region.dst_offsets[1], vk::Offset3D { x: 800, y: 600, z: 1 });
    }
}
