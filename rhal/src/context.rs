//! The per-frame API that ties the backend together.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::config::ContextConfig;
use crate::descriptor::{
    DescriptorUpdate, DescriptorUpdateBatcher, DescriptorUpdateError,
};
use crate::device::{CreateDeviceError, Device};
use crate::frame::{
    BeginFrameError, CreateFrameSchedulerError, EndFrameError,
    FrameScheduler, FrameSchedulerDesc, RecordError, SemaphoreWait,
};
use crate::instance::{Instance, InstanceCreationError, InstanceDesc};
use crate::memory::MemoryAllocator;
use crate::surface::{CreateSurfaceError, Surface};
use crate::swapchain::{
    AcquireError, PresentError, PresentOutcome, SwapchainManager,
    SwapchainSettings, full_blit_region, present_blit_barriers,
};

#[derive(Debug, Error)]
pub enum CreateContextError {
    #[error("Instance creation failed: {0}")]
    Instance(#[from] InstanceCreationError),
    #[error("Surface creation failed: {0}")]
    Surface(#[from] CreateSurfaceError),
    #[error(transparent)]
    Device(#[from] CreateDeviceError),
    #[error("Frame slot creation failed: {0}")]
    Frames(#[from] CreateFrameSchedulerError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Begin(#[from] BeginFrameError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    End(#[from] EndFrameError),
    #[error("Swapchain acquire failed: {0}")]
    Acquire(#[from] AcquireError),
    #[error("Present failed: {0}")]
    Present(#[from] PresentError),
}

/// Image to show at the end of a frame.
#[derive(Debug, Clone, Copy)]
pub struct PresentRequest {
    /// Blit source. Its writes must be visible to the blit stage and it
    /// must be in `layout` when the frame's commands execute.
    pub image: vk::Image,
    /// `TRANSFER_SRC_OPTIMAL` or `GENERAL`.
    pub layout: vk::ImageLayout,
    pub extent: vk::Extent2D,
    /// Current drawable size of the window.
    pub surface_extent: vk::Extent2D,
}

fn blit_filter(src: vk::Extent2D, dst: vk::Extent2D) -> vk::Filter {
    if src == dst {
        vk::Filter::NEAREST
    } else {
        vk::Filter::LINEAR
    }
}

/// Owns every backend object for one window.
///
/// Fields drop top to bottom after [`Drop`] waits for the device.
pub struct Context<W: HasDisplayHandle + HasWindowHandle> {
    swapchain: SwapchainManager<Device>,
    frames: FrameScheduler<Device>,
    descriptors: DescriptorUpdateBatcher,
    allocator: MemoryAllocator,
    device: Arc<Device>,
    surface: Surface<W>,
    instance: Arc<Instance>,
    config: ContextConfig,
}

impl<W: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Context<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device.candidate().name)
            .field("frame_index", &self.frames.frame_index())
            .field("swapchain", &self.swapchain.raw_handle())
            .finish_non_exhaustive()
    }
}

impl<W: HasDisplayHandle + HasWindowHandle> Context<W> {
    /// Create the instance, surface and device for `window`, and the
    /// frame slots. The swapchain is created by the first presented frame.
    ///
    /// # Safety
    /// Loads the system Vulkan library. The context must be dropped before
    /// the platform invalidates `window`'s surface (winit suspend).
    pub unsafe fn new(
        config: ContextConfig,
        window: Arc<W>,
    ) -> Result<Self, CreateContextError> {
        let desc = InstanceDesc {
            app_name: &config.app_name,
            validation: config
                .safe_mode
                .then_some(config.validation_log_level),
            disabled_layers: &config.disabled_layers,
        };
        // SAFETY: forwarded caller contract
        let instance =
            Arc::new(unsafe { Instance::new(&desc, Some(&*window)) }?);
        // SAFETY: forwarded caller contract
        let surface = unsafe { Surface::new(&instance, window) }?;
        let device = Arc::new(Device::new(
            &surface,
            &config.requirements,
            &config.ranks,
        )?);

        let timestamp_queries_per_frame = if device.supports_timestamps() {
            config.timestamp_queries_per_frame
        } else {
            if config.timestamp_queries_per_frame > 0 {
                tracing::warn!(
                    "{} has no graphics-queue timestamps, disabling queries",
                    device.candidate().name
                );
            }
            0
        };
        let frames = FrameScheduler::new(
            Arc::clone(&device),
            FrameSchedulerDesc {
                frames_in_flight: config.frames_in_flight,
                recreate_pools: config.safe_mode,
                timestamp_queries_per_frame,
                timestamp_period: device.timestamp_period(),
            },
        )?;

        let candidate = device.candidate();
        let swapchain = SwapchainManager::new(
            Arc::clone(&device),
            surface.raw_handle(),
            SwapchainSettings {
                surface_format: candidate.surface_format,
                present_mode: candidate.present_mode,
                composite_alpha: candidate.composite_alpha,
                image_usage: SwapchainSettings::DEFAULT_IMAGE_USAGE,
                queue_family_index: candidate.queue_family,
            },
        );

        tracing::info!(
            "Context ready on {} with {} frames in flight",
            candidate.name,
            config.frames_in_flight
        );
        Ok(Self {
            swapchain,
            frames,
            descriptors: DescriptorUpdateBatcher::new(),
            allocator: MemoryAllocator::new(Arc::clone(&device)),
            device,
            surface,
            instance,
            config,
        })
    }

    /// Wait until the current slot is free and start recording into it.
    pub fn begin_frame(&mut self) -> Result<(), FrameError> {
        Ok(self.frames.begin_frame()?)
    }

    pub fn command_buffer(&mut self) -> Result<vk::CommandBuffer, FrameError> {
        Ok(self.frames.command_buffer()?)
    }

    pub fn write_timestamp(
        &mut self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
    ) -> Result<u32, FrameError> {
        Ok(self.frames.write_timestamp(command_buffer, stage)?)
    }

    /// Submit the frame and, with `present`, blit `present.image` to the
    /// window.
    ///
    /// Returns `None` when nothing was presented: no request, a window
    /// without area, or a swapchain that went stale twice in a row. The
    /// frame is submitted in every case.
    pub fn end_frame(
        &mut self,
        present: Option<PresentRequest>,
    ) -> Result<Option<PresentOutcome>, FrameError> {
        if !self.frames.is_recording() {
            return Err(EndFrameError::FrameNotRecording.into());
        }
        let acquired = match present {
            Some(request) => self
                .swapchain
                .acquire(
                    self.frames.current_slot().image_available(),
                    request.surface_extent,
                )?
                .map(|image| (request, image)),
            None => None,
        };

        let Some((request, image)) = acquired else {
            self.frames.end_frame(&[], &[])?;
            return Ok(None);
        };

        let command_buffer = self.frames.command_buffer()?;
        let [to_transfer, to_present] = present_blit_barriers(image.image);
        // SAFETY: command_buffer is recording; the acquired image is
        // transitioned before and after the blit, and the caller
        // guarantees the source image's layout
        unsafe {
            self.device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default()
                    .image_memory_barriers(std::slice::from_ref(&to_transfer)),
            );
            self.device.cmd_blit_image(
                command_buffer,
                request.image,
                request.layout,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[full_blit_region(request.extent, image.extent)],
                blit_filter(request.extent, image.extent),
            );
            self.device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default()
                    .image_memory_barriers(std::slice::from_ref(&to_present)),
            );
        }

        let waits = [SemaphoreWait {
            semaphore: self.frames.current_slot().image_available(),
            stage: vk::PipelineStageFlags2::BLIT,
        }];
        self.frames.end_frame(&waits, &[image.ready_for_present])?;
        Ok(Some(self.swapchain.present(&image)?))
    }

    /// Write descriptors in one driver call.
    ///
    /// # Safety
    /// See [`DescriptorUpdateBatcher::update`].
    pub unsafe fn update_descriptors(
        &mut self,
        updates: &[DescriptorUpdate],
    ) -> Result<usize, DescriptorUpdateError> {
        // SAFETY: forwarded caller contract
        unsafe { self.descriptors.update(&self.device, updates) }
    }

    /// Block until the GPU is idle. Meant for shutdown and debugging.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        self.device.wait_idle()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub fn frames(&self) -> &FrameScheduler<Device> {
        &self.frames
    }

    pub fn swapchain(&self) -> &SwapchainManager<Device> {
        &self.swapchain
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn surface(&self) -> &Surface<W> {
        &self.surface
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Nanoseconds between two timestamps of the last completed use of the
    /// current slot.
    pub fn elapsed_ns(&self, start: u32, end: u32) -> Option<f64> {
        self.frames.elapsed_ns(start, end)
    }
}

impl<W: HasDisplayHandle + HasWindowHandle> Drop for Context<W> {
    fn drop(&mut self) {
        tracing::debug!("Dropping context");
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Waiting for device idle on shutdown failed: {e}");
        }
        debug_assert_eq!(
            self.device.live_allocations(),
            0,
            "device memory still allocated when the context was dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_extents_blit_without_filtering() {
        let e = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(blit_filter(e, e), vk::Filter::NEAREST);
        assert_eq!(
            blit_filter(
                e,
                vk::Extent2D {
                    width: 1600,
                    height: 1200
                }
            ),
            vk::Filter::LINEAR
        );
    }
}
