use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::Instance;

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Couldn't get display handle: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Couldn't get window handle: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan surface creation failed: {0}")]
    VulkanError(vk::Result),
    #[error(
        "Parent instance did not have the surface extensions \
         for this platform loaded"
    )]
    MissingExtension,
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error querying surface: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
#[error("Querying {query} failed: {source}")]
pub struct SurfaceSupportError {
    pub query: &'static str,
    pub source: SurfaceQueryError,
}

/// What one physical device can do with a surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceSupport {
    /// Indexed by queue family.
    pub presentable_families: Vec<bool>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SurfaceSupport {
    pub fn can_present_from(&self, queue_family: usize) -> bool {
        self.presentable_families
            .get(queue_family)
            .copied()
            .unwrap_or(false)
    }
}

/// A `VkSurfaceKHR` tied to the window it was created from.
///
/// Holds the window source alive for as long as the surface exists.
pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    parent_instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    _surface_source: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .field("parent", &self.parent_instance)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// # Safety
    /// Must be dropped on platform events that invalidate the surface
    /// (winit suspend). No in-flight GPU work may reference objects derived
    /// from it when it is dropped.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        source: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        //SAFETY: We hold Arcs to both the instance and the source, so both
        //outlive the surface
        let handle = unsafe { instance.create_raw_surface(&*source) }?;
        tracing::debug!("Created surface {handle:?}");
        Ok(Self {
            parent_instance: Arc::clone(instance),
            handle,
            _surface_source: source,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Query how `physical_device` can present to this surface.
    ///
    /// # Safety
    /// `physical_device` must be derived from the same instance as this
    /// surface and have `queue_family_count` queue families.
    pub unsafe fn query_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_count: u32,
    ) -> Result<SurfaceSupport, SurfaceSupportError> {
        let instance = &*self.parent_instance;
        let failed = |query| move |source| SurfaceSupportError { query, source };
        //SAFETY: forwarded caller contract, self.handle is alive
        unsafe {
            let presentable_families = (0..queue_family_count)
                .map(|family| {
                    instance.get_raw_physical_device_surface_support(
                        physical_device,
                        family,
                        self.handle,
                    )
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(failed("present support"))?;
            let formats = instance
                .get_surface_formats(physical_device, self.handle)
                .map_err(failed("surface formats"))?;
            let present_modes = instance
                .get_surface_present_modes(physical_device, self.handle)
                .map_err(failed("present modes"))?;
            let capabilities = instance
                .get_surface_capabilities(physical_device, self.handle)
                .map_err(failed("surface capabilities"))?;
            Ok(SurfaceSupport {
                presentable_families,
                formats,
                present_modes,
                composite_alpha: capabilities.supported_composite_alpha,
            })
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        //SAFETY: last use of the handle; the context drops every derived
        //object before the surface
        let _ =
            unsafe { self.parent_instance.destroy_raw_surface(self.handle) }
                .inspect_err(|e| {
                    tracing::error!(
                        "Error while dropping surface {:?}: {e}",
                        self.handle
                    )
                });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_past_the_queried_range_cannot_present() {
        let support = SurfaceSupport {
            presentable_families: vec![false, true],
            ..Default::default()
        };
        assert!(!support.can_present_from(0));
        assert!(support.can_present_from(1));
        assert!(!support.can_present_from(2));
    }
}
