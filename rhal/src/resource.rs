//! Buffers, images, image views and samplers.
//!
//! Each wrapper destroys its handle on drop. Buffers and images own their
//! dedicated memory, if any, and release it after the handle.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::{
    device::Device,
    memory::{
        AllocateMemoryError, Binding, MemoryAccess, MemoryAllocation,
        MemoryAllocator, MemoryPool, Resource,
    },
};

#[derive(Debug, Error)]
pub enum CreateResourceError {
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
    #[error("Failed to bind memory: {0}")]
    Memory(#[from] AllocateMemoryError),
}

/// Which allocation strategy backs a new resource.
#[derive(Debug)]
pub enum Placement<'a> {
    Dedicated,
    /// Bump-allocate into the pool. The pool's memory type decides the
    /// access kind.
    Placed(&'a mut MemoryPool),
    /// Dedicated if the driver prefers it, placed otherwise.
    Auto(&'a mut MemoryPool),
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub access: MemoryAccess,
    pub name: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub access: MemoryAccess,
    pub name: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }
}

/// # Panics
/// On a zero-sized buffer.
fn buffer_info(desc: &BufferDesc<'_>) -> vk::BufferCreateInfo<'static> {
    assert!(desc.size > 0, "buffer {:?} has zero size", desc.name);
    vk::BufferCreateInfo::default()
        .size(desc.size)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}

/// # Panics
/// On an image with zero width or height.
fn image_info(desc: &ImageDesc<'_>) -> vk::ImageCreateInfo<'static> {
    assert!(
        desc.extent.width > 0 && desc.extent.height > 0,
        "image {:?} has zero area",
        desc.name
    );
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

fn sampler_info(desc: &SamplerDesc) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(desc.filter)
        .min_filter(desc.filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(desc.address_mode)
        .address_mode_v(desc.address_mode)
        .address_mode_w(desc.address_mode)
        .max_lod(vk::LOD_CLAMP_NONE)
}

pub struct Buffer {
    device: Arc<Device>,
    handle: vk::Buffer,
    size: vk::DeviceSize,
    binding: Binding,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl Buffer {
    pub fn raw_handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The buffer's own memory, if it was allocated dedicated.
    pub fn dedicated_memory_mut(&mut self) -> Option<&mut MemoryAllocation> {
        match &mut self.binding {
            Binding::Dedicated(memory) => Some(memory),
            Binding::Placed { .. } => None,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        tracing::debug!("Dropping buffer {:?}", self.handle);
        // SAFETY: the owner guarantees the GPU is done with the buffer;
        // dedicated memory is freed after this, when `binding` drops
        unsafe { self.device.destroy_raw_buffer(self.handle) };
    }
}

pub struct Image {
    device: Arc<Device>,
    handle: vk::Image,
    extent: vk::Extent2D,
    format: vk::Format,
    binding: Binding,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl Image {
    pub fn raw_handle(&self) -> vk::Image {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// A 2D color view of the whole image.
    pub fn create_view(&self) -> Result<ImageView, CreateResourceError> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        // SAFETY: the image is live and the view covers its only level and
        // layer
        let handle = unsafe { self.device.create_raw_image_view(&create_info) }
            .map_err(|result| CreateResourceError::Vulkan {
                operation: "vkCreateImageView",
                result,
            })?;
        Ok(ImageView {
            device: Arc::clone(&self.device),
            handle,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        tracing::debug!("Dropping image {:?}", self.handle);
        // SAFETY: as for Buffer
        unsafe { self.device.destroy_raw_image(self.handle) };
    }
}

#[derive(Debug)]
pub struct ImageView {
    device: Arc<Device>,
    handle: vk::ImageView,
}

impl ImageView {
    pub fn raw_handle(&self) -> vk::ImageView {
        self.handle
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with the view
        unsafe { self.device.destroy_raw_image_view(self.handle) };
    }
}

#[derive(Debug)]
pub struct Sampler {
    device: Arc<Device>,
    handle: vk::Sampler,
}

impl Sampler {
    pub fn new(
        device: &Arc<Device>,
        desc: &SamplerDesc,
    ) -> Result<Self, CreateResourceError> {
        // SAFETY: the create info is fully initialised
        let handle = unsafe { device.create_raw_sampler(&sampler_info(desc)) }
            .map_err(|result| CreateResourceError::Vulkan {
                operation: "vkCreateSampler",
                result,
            })?;
        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // SAFETY: the owner guarantees the GPU is done with the sampler
        unsafe { self.device.destroy_raw_sampler(self.handle) };
    }
}

impl MemoryAllocator {
    /// # Safety
    /// `resource` must be a live resource of this device with no memory
    /// bound.
    unsafe fn bind_with(
        &self,
        resource: Resource,
        access: MemoryAccess,
        placement: Placement<'_>,
    ) -> Result<Binding, AllocateMemoryError> {
        // SAFETY: forwarded caller contract
        unsafe {
            match placement {
                Placement::Dedicated => self
                    .bind_dedicated(resource, access)
                    .map(Binding::Dedicated),
                Placement::Placed(pool) => self
                    .bind_placed(resource, pool)
                    .map(|offset| Binding::Placed { offset }),
                Placement::Auto(pool) => self.bind_auto(resource, access, pool),
            }
        }
    }

    /// Create a buffer and back it with memory.
    ///
    /// # Panics
    /// If `desc.size` is zero.
    pub fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        placement: Placement<'_>,
    ) -> Result<Buffer, CreateResourceError> {
        let device = self.device();
        // SAFETY: the create info is fully initialised
        let handle = unsafe { device.create_raw_buffer(&buffer_info(desc)) }
            .map_err(|result| CreateResourceError::Vulkan {
                operation: "vkCreateBuffer",
                result,
            })?;
        // SAFETY: the buffer was just created with no memory bound
        let binding = match unsafe {
            self.bind_with(Resource::Buffer(handle), desc.access, placement)
        } {
            Ok(binding) => binding,
            Err(e) => {
                // SAFETY: the buffer was never used
                unsafe { device.destroy_raw_buffer(handle) };
                return Err(e.into());
            }
        };
        // SAFETY: the buffer is live
        unsafe { device.name_or_warn(handle, desc.name) };
        Ok(Buffer {
            device: Arc::clone(device),
            handle,
            size: desc.size,
            binding,
        })
    }

    /// Create a 2D single-level image and back it with memory.
    ///
    /// # Panics
    /// If `desc.extent` has zero area.
    pub fn create_image(
        &self,
        desc: &ImageDesc<'_>,
        placement: Placement<'_>,
    ) -> Result<Image, CreateResourceError> {
        let device = self.device();
        // SAFETY: the create info is fully initialised
        let handle = unsafe { device.create_raw_image(&image_info(desc)) }
            .map_err(|result| CreateResourceError::Vulkan {
                operation: "vkCreateImage",
                result,
            })?;
        // SAFETY: the image was just created with no memory bound
        let binding = match unsafe {
            self.bind_with(Resource::Image(handle), desc.access, placement)
        } {
            Ok(binding) => binding,
            Err(e) => {
                // SAFETY: the image was never used
                unsafe { device.destroy_raw_image(handle) };
                return Err(e.into());
            }
        };
        // SAFETY: the image is live
        unsafe { device.name_or_warn(handle, desc.name) };
        Ok(Image {
            device: Arc::clone(device),
            handle,
            extent: desc.extent,
            format: desc.format,
            binding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size: vk::DeviceSize) -> BufferDesc<'static> {
        BufferDesc {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            access: MemoryAccess::None,
            name: "test buffer",
        }
    }

    #[test]
    fn buffer_info_is_exclusive() {
        let info = buffer_info(&buffer(64));
        assert_eq!(info.size, 64);
        assert_eq!(info.sharing_mode, vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    #[should_panic(expected = "zero size")]
    fn zero_sized_buffer_is_a_contract_violation() {
        buffer_info(&buffer(0));
    }

    #[test]
    #[should_panic(expected = "zero area")]
    fn zero_area_image_is_a_contract_violation() {
        image_info(&ImageDesc {
            extent: vk::Extent2D {
                width: 0,
                height: 16,
            },
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            access: MemoryAccess::None,
            name: "empty",
        });
    }

    #[test]
    fn image_info_is_single_level_2d() {
        let info = image_info(&ImageDesc {
            extent: vk::Extent2D {
                width: 320,
                height: 200,
            },
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::TRANSFER_SRC,
            access: MemoryAccess::None,
            name: "target",
        });
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.mip_levels, 1);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn sampler_info_applies_filter_to_all_axes() {
        let info = sampler_info(&SamplerDesc {
            filter: vk::Filter::NEAREST,
            address_mode: vk::SamplerAddressMode::REPEAT,
        });
        assert_eq!(info.min_filter, vk::Filter::NEAREST);
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
    }
}
