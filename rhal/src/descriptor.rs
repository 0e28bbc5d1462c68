//! Descriptor writes, batched.
//!
//! [`DescriptorUpdateBatcher`] turns a list of single-element
//! [`DescriptorUpdate`]s into as few `VkWriteDescriptorSet`s as the input
//! order allows and hands them to the driver in one
//! `vkUpdateDescriptorSets` call. Adjacent updates merge when they target
//! the same set, binding and descriptor kind with consecutive array
//! indices. Sorting the input by `(set, binding, kind, index)` gives the
//! minimal call count; any order gives the same result.

use std::collections::TryReserveError;
use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Sampler,
    SampledImage,
    StorageImage,
    CombinedImageSampler,
    UniformBuffer,
    StorageBuffer,
}

impl DescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::CombinedImageSampler => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    fn uses_buffer_info(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }
}

/// What one descriptor array element points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorPayload {
    Sampler(vk::Sampler),
    SampledImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    CombinedImageSampler {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
}

impl DescriptorPayload {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Sampler(_) => DescriptorKind::Sampler,
            Self::SampledImage { .. } => DescriptorKind::SampledImage,
            Self::StorageImage { .. } => DescriptorKind::StorageImage,
            Self::CombinedImageSampler { .. } => {
                DescriptorKind::CombinedImageSampler
            }
            Self::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            Self::StorageBuffer { .. } => DescriptorKind::StorageBuffer,
        }
    }

    fn image_info(&self) -> Option<vk::DescriptorImageInfo> {
        let info = vk::DescriptorImageInfo::default();
        match *self {
            Self::Sampler(sampler) => Some(info.sampler(sampler)),
            Self::SampledImage { view, layout }
            | Self::StorageImage { view, layout } => {
                Some(info.image_view(view).image_layout(layout))
            }
            Self::CombinedImageSampler {
                sampler,
                view,
                layout,
            } => Some(info.sampler(sampler).image_view(view).image_layout(layout)),
            Self::UniformBuffer { .. } | Self::StorageBuffer { .. } => None,
        }
    }

    fn buffer_info(&self) -> Option<vk::DescriptorBufferInfo> {
        match *self {
            Self::UniformBuffer {
                buffer,
                offset,
                range,
            }
            | Self::StorageBuffer {
                buffer,
                offset,
                range,
            } => Some(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(offset)
                    .range(range),
            ),
            _ => None,
        }
    }
}

/// Write one array element of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorUpdate {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub index: u32,
    pub payload: DescriptorPayload,
}

impl DescriptorUpdate {
    fn continues(&self, previous: &Self) -> bool {
        self.set == previous.set
            && self.binding == previous.binding
            && self.payload.kind() == previous.payload.kind()
            && previous.index.checked_add(1) == Some(self.index)
    }
}

/// Split `updates` into maximal runs that can share one write.
pub fn plan_batches(updates: &[DescriptorUpdate]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=updates.len() {
        if i == updates.len() || !updates[i].continues(&updates[i - 1]) {
            runs.push(start..i);
            start = i;
        }
    }
    runs
}

#[derive(Debug, Error)]
pub enum DescriptorUpdateError {
    #[error("Out of memory building descriptor writes: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

/// Reusable scratch space for building descriptor writes.
#[derive(Debug, Default)]
pub struct DescriptorUpdateBatcher {
    image_infos: Vec<vk::DescriptorImageInfo>,
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
}

impl DescriptorUpdateBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the writes for `updates` and pass them to `submit` in one
    /// call. Returns the number of writes.
    ///
    /// If building fails `submit` is never called.
    pub fn apply(
        &mut self,
        updates: &[DescriptorUpdate],
        submit: impl FnOnce(&[vk::WriteDescriptorSet<'_>]),
    ) -> Result<usize, DescriptorUpdateError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let runs = plan_batches(updates);
        let buffer_count = updates
            .iter()
            .filter(|u| u.payload.kind().uses_buffer_info())
            .count();

        self.image_infos.clear();
        self.buffer_infos.clear();
        self.image_infos
            .try_reserve(updates.len() - buffer_count)?;
        self.buffer_infos.try_reserve(buffer_count)?;
        let mut writes = Vec::new();
        writes.try_reserve_exact(runs.len())?;

        for update in updates {
            self.image_infos.extend(update.payload.image_info());
            self.buffer_infos.extend(update.payload.buffer_info());
        }

        let (mut next_image, mut next_buffer) = (0, 0);
        for run in runs {
            let first = &updates[run.start];
            let kind = first.payload.kind();
            let len = run.len();
            let write = vk::WriteDescriptorSet::default()
                .dst_set(first.set)
                .dst_binding(first.binding)
                .dst_array_element(first.index)
                .descriptor_type(kind.vk_type());
            let write = if kind.uses_buffer_info() {
                let infos = &self.buffer_infos[next_buffer..next_buffer + len];
                next_buffer += len;
                write.buffer_info(infos)
            } else {
                let infos = &self.image_infos[next_image..next_image + len];
                next_image += len;
                write.image_info(infos)
            };
            writes.push(write);
        }

        submit(&writes);
        Ok(writes.len())
    }

    /// Apply `updates` to descriptor sets of `device`.
    ///
    /// # Safety
    /// Every update must reference live sets and resources, and no pending
    /// work may use a written binding unless it was created
    /// update-after-bind.
    pub unsafe fn update(
        &mut self,
        device: &Device,
        updates: &[DescriptorUpdate],
    ) -> Result<usize, DescriptorUpdateError> {
        self.apply(updates, |writes| {
            // SAFETY: forwarded caller contract
            unsafe { device.update_raw_descriptor_sets(writes) }
        })
    }
}

#[derive(Debug, Error)]
pub enum CreateDescriptorError {
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

/// One binding of a set layout.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Partially bound and updatable after bind. Needs the matching
    /// Vulkan 1.2 descriptor-indexing features enabled on the device.
    pub bindless: bool,
}

fn binding_flags(
    bindings: &[DescriptorBinding],
) -> (Vec<vk::DescriptorBindingFlags>, vk::DescriptorSetLayoutCreateFlags) {
    let flags: Vec<_> = bindings
        .iter()
        .map(|b| {
            if b.bindless {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            } else {
                vk::DescriptorBindingFlags::empty()
            }
        })
        .collect();
    let layout_flags = if bindings.iter().any(|b| b.bindless) {
        vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
    } else {
        vk::DescriptorSetLayoutCreateFlags::empty()
    };
    (flags, layout_flags)
}

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    handle: vk::DescriptorSetLayout,
    update_after_bind: bool,
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("handle", &self.handle)
            .field("update_after_bind", &self.update_after_bind)
            .finish_non_exhaustive()
    }
}

impl DescriptorSetLayout {
    pub fn new(
        device: &Arc<Device>,
        bindings: &[DescriptorBinding],
    ) -> Result<Self, CreateDescriptorError> {
        let raw_bindings: Vec<_> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.kind.vk_type())
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();
        let (flags, layout_flags) = binding_flags(bindings);
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
                .binding_flags(&flags);
        let update_after_bind = !layout_flags.is_empty();

        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(layout_flags)
            .bindings(&raw_bindings);
        if update_after_bind {
            create_info = create_info.push_next(&mut flags_info);
        }

        // SAFETY: create info and flags chain are fully initialised
        let handle =
            unsafe { device.create_raw_descriptor_set_layout(&create_info) }
                .map_err(|result| CreateDescriptorError::Vulkan {
                    operation: "vkCreateDescriptorSetLayout",
                    result,
                })?;
        Ok(Self {
            device: Arc::clone(device),
            handle,
            update_after_bind,
        })
    }

    pub fn raw_handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    pub fn update_after_bind(&self) -> bool {
        self.update_after_bind
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor set layout {:?}", self.handle);
        // SAFETY: sets allocated with this layout are not used afterwards
        unsafe { self.device.destroy_raw_descriptor_set_layout(self.handle) };
    }
}

fn pool_sizes(sizes: &[(DescriptorKind, u32)]) -> Vec<vk::DescriptorPoolSize> {
    sizes
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|&(kind, count)| vk::DescriptorPoolSize {
            ty: kind.vk_type(),
            descriptor_count: count,
        })
        .collect()
}

pub struct DescriptorPool {
    device: Arc<Device>,
    handle: vk::DescriptorPool,
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl DescriptorPool {
    /// `update_after_bind` must be set to allocate sets of bindless
    /// layouts.
    pub fn new(
        device: &Arc<Device>,
        max_sets: u32,
        sizes: &[(DescriptorKind, u32)],
        update_after_bind: bool,
    ) -> Result<Self, CreateDescriptorError> {
        let sizes = pool_sizes(sizes);
        let flags = if update_after_bind {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        // SAFETY: create info is fully initialised
        let handle = unsafe { device.create_raw_descriptor_pool(&create_info) }
            .map_err(|result| CreateDescriptorError::Vulkan {
                operation: "vkCreateDescriptorPool",
                result,
            })?;
        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    /// Allocate one set per layout, in order.
    pub fn allocate(
        &self,
        layouts: &[&DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, CreateDescriptorError> {
        let raw_layouts: Vec<_> =
            layouts.iter().map(|layout| layout.handle).collect();
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(&raw_layouts);
        // SAFETY: pool and layouts are live
        unsafe { self.device.allocate_raw_descriptor_sets(&allocate_info) }
            .map_err(|result| CreateDescriptorError::Vulkan {
                operation: "vkAllocateDescriptorSets",
                result,
            })
    }

    /// Return every set to the pool.
    ///
    /// # Safety
    /// No pending work may use sets from this pool, and none may be used
    /// afterwards.
    pub unsafe fn reset(&mut self) -> Result<(), CreateDescriptorError> {
        // SAFETY: forwarded caller contract
        unsafe { self.device.reset_raw_descriptor_pool(self.handle) }.map_err(
            |result| CreateDescriptorError::Vulkan {
                operation: "vkResetDescriptorPool",
                result,
            },
        )
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor pool {:?}", self.handle);
        // SAFETY: the owner guarantees the GPU is done with the pool's sets
        unsafe { self.device.destroy_raw_descriptor_pool(self.handle) };
    }
}
