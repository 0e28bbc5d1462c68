//! Memory-type selection and allocation strategies.
//!
//! Three strategies bind memory to a buffer or image:
//!
//! * **dedicated**: one allocation sized for exactly one resource, bound at
//!   offset 0, with `VkMemoryDedicatedAllocateInfo` chained.
//! * **placed**: many resources share a caller-owned pool allocation. The
//!   caller keeps a bump cursor; each placement aligns it up, binds, and
//!   advances it by the resource's size.
//! * **auto**: dedicated if the driver prefers or requires it for the
//!   resource, placed otherwise.
//!
//! Host-visible allocations are mapped once at creation and stay mapped
//! until dropped.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use thiserror::Error;

use crate::device::Device;

/// How the CPU touches an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccess {
    /// GPU only.
    None,
    /// CPU writes, GPU reads.
    Write { prefer_device_local: bool },
    /// GPU writes, CPU reads back.
    Read,
}

impl MemoryAccess {
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        use vk::MemoryPropertyFlags as F;
        match self {
            Self::None => F::DEVICE_LOCAL,
            Self::Write {
                prefer_device_local: false,
            } => F::HOST_VISIBLE | F::HOST_COHERENT,
            Self::Write {
                prefer_device_local: true,
            } => F::HOST_VISIBLE | F::HOST_COHERENT | F::DEVICE_LOCAL,
            Self::Read => F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
        }
    }

    /// Flags to retry with when nothing matches [`required_flags`].
    ///
    /// [`required_flags`]: Self::required_flags
    fn fallback_flags(self) -> Option<vk::MemoryPropertyFlags> {
        use vk::MemoryPropertyFlags as F;
        match self {
            Self::Write {
                prefer_device_local: true,
            } => Some(F::HOST_VISIBLE | F::HOST_COHERENT),
            _ => None,
        }
    }

    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Memory requirements plus the driver's dedicated-allocation hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceRequirements {
    pub requirements: vk::MemoryRequirements,
    pub prefers_dedicated: bool,
    pub requires_dedicated: bool,
}

impl ResourceRequirements {
    pub fn wants_dedicated(&self) -> bool {
        self.prefers_dedicated || self.requires_dedicated
    }
}

/// A resource memory gets bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaceError {
    #[error(
        "Placing {size} bytes at offset {offset} overflows the \
         {capacity}-byte allocation"
    )]
    OutOfBounds {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },
}

#[derive(Debug, Error)]
pub enum AllocateMemoryError {
    #[error(
        "No memory type in mask {type_bits:#b} supports {access:?}; \
         the device violates platform guarantees"
    )]
    UnsupportedMemoryType { type_bits: u32, access: MemoryAccess },
    #[error(
        "Pool memory type {pool_type} is not allowed by the resource's \
         mask {type_bits:#b}"
    )]
    IncompatiblePool { pool_type: u32, type_bits: u32 },
    #[error(transparent)]
    Place(#[from] PlaceError),
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapAccessError {
    #[error("Allocation is not host-visible")]
    NotMapped,
    #[error(
        "Range {offset}..{offset}+{len} is outside the {size}-byte \
         allocation"
    )]
    OutOfRange {
        offset: vk::DeviceSize,
        len: usize,
        size: vk::DeviceSize,
    },
}

/// Index of the first memory type allowed by `type_bits` whose flags
/// contain everything `access` needs, relaxing preferences once if nothing
/// matches.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    access: MemoryAccess,
) -> Option<u32> {
    let search = |wanted: vk::MemoryPropertyFlags| {
        properties.memory_types[..properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .find(|(i, ty)| {
                type_bits & (1 << i) != 0 && ty.property_flags.contains(wanted)
            })
            .map(|(i, _)| i as u32)
    };
    search(access.required_flags())
        .or_else(|| access.fallback_flags().and_then(search))
}

/// Round `offset` up to `alignment`. An alignment of 0 means 1.
pub fn align_up(
    offset: vk::DeviceSize,
    alignment: vk::DeviceSize,
) -> vk::DeviceSize {
    offset.next_multiple_of(alignment.max(1))
}

/// Reserve room for `requirements` at `*cursor` in an allocation of
/// `capacity` bytes, returning the aligned offset. The cursor is left
/// untouched on error.
pub fn place(
    cursor: &mut vk::DeviceSize,
    requirements: &vk::MemoryRequirements,
    capacity: vk::DeviceSize,
) -> Result<vk::DeviceSize, PlaceError> {
    let offset = align_up(*cursor, requirements.alignment);
    let end = offset
        .checked_add(requirements.size)
        .filter(|&end| end <= capacity)
        .ok_or(PlaceError::OutOfBounds {
            offset,
            size: requirements.size,
            capacity,
        })?;
    *cursor = end;
    Ok(offset)
}

fn check_range(
    offset: vk::DeviceSize,
    len: usize,
    size: vk::DeviceSize,
) -> Result<usize, MapAccessError> {
    offset
        .checked_add(len as vk::DeviceSize)
        .filter(|&end| end <= size)
        .map(|_| offset as usize)
        .ok_or(MapAccessError::OutOfRange { offset, len, size })
}

/// A `VkDeviceMemory` freed on drop.
pub struct MemoryAllocation {
    device: Arc<Device>,
    handle: vk::DeviceMemory,
    size: vk::DeviceSize,
    access: MemoryAccess,
    memory_type_index: u32,
    mapped: Option<NonNull<u8>>,
}

// SAFETY: the mapping is owned by this allocation; writes need `&mut self`
unsafe impl Send for MemoryAllocation {}
// SAFETY: shared access only reads through the mapping
unsafe impl Sync for MemoryAllocation {}

impl std::fmt::Debug for MemoryAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocation")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("access", &self.access)
            .field("memory_type_index", &self.memory_type_index)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

impl MemoryAllocation {
    pub fn raw_handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn access(&self) -> MemoryAccess {
        self.access
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Copy `bytes` into the mapping at `offset`.
    ///
    /// The memory is host-coherent, so no flush is needed. The GPU must not
    /// be reading the range.
    pub fn write_bytes(
        &mut self,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> Result<(), MapAccessError> {
        let base = self.mapped.ok_or(MapAccessError::NotMapped)?;
        let start = check_range(offset, bytes.len(), self.size)?;
        // SAFETY: the range was checked against the mapped size and the
        // mapping cannot overlap `bytes`
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                base.as_ptr().add(start),
                bytes.len(),
            )
        };
        Ok(())
    }

    pub fn write_pod<T: Pod>(
        &mut self,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> Result<(), MapAccessError> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Copy `out.len()` bytes from the mapping at `offset`.
    pub fn read_bytes(
        &self,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> Result<(), MapAccessError> {
        let base = self.mapped.ok_or(MapAccessError::NotMapped)?;
        let start = check_range(offset, out.len(), self.size)?;
        // SAFETY: as in write_bytes
        unsafe {
            std::ptr::copy_nonoverlapping(
                base.as_ptr().add(start),
                out.as_mut_ptr(),
                out.len(),
            )
        };
        Ok(())
    }
}

impl Drop for MemoryAllocation {
    fn drop(&mut self) {
        tracing::debug!("Dropping memory {:?} ({} bytes)", self.handle, self.size);
        // SAFETY: resources bound to this memory are destroyed first and the
        // GPU is done with them
        unsafe {
            if self.mapped.is_some() {
                self.device.unmap_raw_memory(self.handle);
            }
            self.device.free_raw_memory(self.handle);
        }
    }
}

/// Where a resource's memory ended up.
#[derive(Debug)]
pub enum Binding {
    Dedicated(MemoryAllocation),
    /// Bound into a caller pool at `offset`.
    Placed { offset: vk::DeviceSize },
}

impl Binding {
    pub fn offset(&self) -> vk::DeviceSize {
        match self {
            Self::Dedicated(_) => 0,
            Self::Placed { offset } => *offset,
        }
    }
}

/// Shared pool for placed allocations, with its bump cursor.
#[derive(Debug)]
pub struct MemoryPool {
    pub memory: MemoryAllocation,
    pub cursor: vk::DeviceSize,
}

#[derive(Debug, Clone)]
pub struct MemoryAllocator {
    device: Arc<Device>,
}

impl MemoryAllocator {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn memory_type_for(
        &self,
        type_bits: u32,
        access: MemoryAccess,
    ) -> Result<u32, AllocateMemoryError> {
        find_memory_type(self.device.memory_properties(), type_bits, access)
            .ok_or(AllocateMemoryError::UnsupportedMemoryType {
                type_bits,
                access,
            })
    }

    /// # Safety
    /// `resource` must be a live resource from this allocator's device.
    pub unsafe fn requirements_of(
        &self,
        resource: Resource,
    ) -> ResourceRequirements {
        // SAFETY: forwarded caller contract
        unsafe {
            match resource {
                Resource::Buffer(buffer) => {
                    self.device.get_raw_buffer_requirements(buffer)
                }
                Resource::Image(image) => {
                    self.device.get_raw_image_requirements(image)
                }
            }
        }
    }

    /// Allocate `size` bytes of a type allowed by `type_bits`, optionally
    /// dedicated to `dedicated_to`, and map it if host-visible.
    pub fn allocate(
        &self,
        size: vk::DeviceSize,
        type_bits: u32,
        access: MemoryAccess,
        dedicated_to: Option<Resource>,
    ) -> Result<MemoryAllocation, AllocateMemoryError> {
        assert!(size > 0, "zero-sized allocation");
        let memory_type_index = self.memory_type_for(type_bits, access)?;

        let mut dedicated_info = match dedicated_to {
            Some(Resource::Buffer(buffer)) => {
                vk::MemoryDedicatedAllocateInfo::default().buffer(buffer)
            }
            Some(Resource::Image(image)) => {
                vk::MemoryDedicatedAllocateInfo::default().image(image)
            }
            None => vk::MemoryDedicatedAllocateInfo::default(),
        };
        let mut allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        if dedicated_to.is_some() {
            allocate_info = allocate_info.push_next(&mut dedicated_info);
        }

        // SAFETY: the info is fully initialised and any dedicated target is
        // a live resource of this device
        let handle = unsafe { self.device.allocate_raw_memory(&allocate_info) }
            .map_err(|result| AllocateMemoryError::Vulkan {
                operation: "vkAllocateMemory",
                result,
            })?;

        let mut allocation = MemoryAllocation {
            device: Arc::clone(&self.device),
            handle,
            size,
            access,
            memory_type_index,
            mapped: None,
        };
        if access.is_host_visible() {
            // SAFETY: the chosen type is host-visible and freshly allocated
            let ptr = unsafe { self.device.map_raw_memory(handle) }.map_err(
                |result| AllocateMemoryError::Vulkan {
                    operation: "vkMapMemory",
                    result,
                },
            )?;
            allocation.mapped = NonNull::new(ptr.cast::<u8>());
        }
        Ok(allocation)
    }

    /// A pool for placed allocations.
    pub fn allocate_pool(
        &self,
        size: vk::DeviceSize,
        type_bits: u32,
        access: MemoryAccess,
    ) -> Result<MemoryPool, AllocateMemoryError> {
        Ok(MemoryPool {
            memory: self.allocate(size, type_bits, access, None)?,
            cursor: 0,
        })
    }

    /// Allocate memory for exactly `resource` and bind it at offset 0.
    ///
    /// # Safety
    /// `resource` must be a live resource of this device with no memory
    /// bound.
    pub unsafe fn bind_dedicated(
        &self,
        resource: Resource,
        access: MemoryAccess,
    ) -> Result<MemoryAllocation, AllocateMemoryError> {
        // SAFETY: forwarded caller contract
        let reqs = unsafe { self.requirements_of(resource) }.requirements;
        let allocation =
            self.allocate(reqs.size, reqs.memory_type_bits, access, Some(resource))?;
        // SAFETY: forwarded caller contract; offset 0 satisfies any
        // alignment
        unsafe { self.bind(resource, allocation.handle, 0) }?;
        Ok(allocation)
    }

    /// Bind `resource` into `pool` at the next aligned offset.
    ///
    /// # Safety
    /// `resource` must be a live resource of this device with no memory
    /// bound.
    pub unsafe fn bind_placed(
        &self,
        resource: Resource,
        pool: &mut MemoryPool,
    ) -> Result<vk::DeviceSize, AllocateMemoryError> {
        // SAFETY: forwarded caller contract
        let reqs = unsafe { self.requirements_of(resource) }.requirements;
        // SAFETY: forwarded caller contract
        unsafe { self.place_into(resource, &reqs, pool) }
    }

    /// # Safety
    /// As for [`bind_placed`](Self::bind_placed).
    unsafe fn place_into(
        &self,
        resource: Resource,
        reqs: &vk::MemoryRequirements,
        pool: &mut MemoryPool,
    ) -> Result<vk::DeviceSize, AllocateMemoryError> {
        let pool_type = pool.memory.memory_type_index;
        if reqs.memory_type_bits & (1 << pool_type) == 0 {
            return Err(AllocateMemoryError::IncompatiblePool {
                pool_type,
                type_bits: reqs.memory_type_bits,
            });
        }
        let mut cursor = pool.cursor;
        let offset = place(&mut cursor, reqs, pool.memory.size)?;
        // SAFETY: forwarded caller contract; offset is aligned and in
        // bounds
        unsafe { self.bind(resource, pool.memory.handle, offset) }?;
        pool.cursor = cursor;
        Ok(offset)
    }

    /// Dedicated if the driver asks for it, placed into `pool` otherwise.
    ///
    /// # Safety
    /// `resource` must be a live resource of this device with no memory
    /// bound.
    pub unsafe fn bind_auto(
        &self,
        resource: Resource,
        access: MemoryAccess,
        pool: &mut MemoryPool,
    ) -> Result<Binding, AllocateMemoryError> {
        // SAFETY: forwarded caller contract
        let reqs = unsafe { self.requirements_of(resource) };
        if reqs.wants_dedicated() {
            let allocation = self.allocate(
                reqs.requirements.size,
                reqs.requirements.memory_type_bits,
                access,
                Some(resource),
            )?;
            // SAFETY: forwarded caller contract
            unsafe { self.bind(resource, allocation.handle, 0) }?;
            return Ok(Binding::Dedicated(allocation));
        }
        // SAFETY: forwarded caller contract
        let offset = unsafe { self.place_into(resource, &reqs.requirements, pool) }?;
        Ok(Binding::Placed { offset })
    }

    /// # Safety
    /// `resource` must have no memory bound and `offset` must satisfy its
    /// requirements within `memory`.
    unsafe fn bind(
        &self,
        resource: Resource,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), AllocateMemoryError> {
        // SAFETY: forwarded caller contract
        let result = unsafe {
            match resource {
                Resource::Buffer(buffer) => {
                    self.device.bind_raw_buffer_memory(buffer, memory, offset)
                }
                Resource::Image(image) => {
                    self.device.bind_raw_image_memory(image, memory, offset)
                }
            }
        };
        result.map_err(|result| AllocateMemoryError::Vulkan {
            operation: "vkBind*Memory",
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use vk::MemoryPropertyFlags as F;

    fn properties(types: &[F]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props
    }

    fn desktop() -> vk::PhysicalDeviceMemoryProperties {
        properties(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
        ])
    }

    #[test]
    fn picks_lowest_matching_index() {
        let props = desktop();
        assert_eq!(find_memory_type(&props, !0, MemoryAccess::None), Some(0));
        assert_eq!(
            find_memory_type(
                &props,
                !0,
                MemoryAccess::Write {
                    prefer_device_local: false
                }
            ),
            Some(1)
        );
        assert_eq!(
            find_memory_type(
                &props,
                !0,
                MemoryAccess::Write {
                    prefer_device_local: true
                }
            ),
            Some(3)
        );
    }

    #[test]
    fn never_returns_a_type_outside_the_mask() {
        let props = desktop();
        for mask in 1..16u32 {
            for access in [
                MemoryAccess::None,
                MemoryAccess::Read,
                MemoryAccess::Write {
                    prefer_device_local: true,
                },
                MemoryAccess::Write {
                    prefer_device_local: false,
                },
            ] {
                if let Some(index) = find_memory_type(&props, mask, access) {
                    assert_ne!(mask & (1 << index), 0);
                }
            }
        }
        assert_eq!(find_memory_type(&props, 0b0010, MemoryAccess::None), None);
    }

    #[test]
    fn read_prefers_cached_memory() {
        let props = desktop();
        assert_eq!(find_memory_type(&props, !0, MemoryAccess::Read), Some(2));
        // Readback never settles for uncached memory.
        assert_eq!(find_memory_type(&props, 0b0011, MemoryAccess::Read), None);
        let coherent_only = properties(&[F::HOST_VISIBLE | F::HOST_COHERENT]);
        assert_eq!(
            find_memory_type(&coherent_only, !0, MemoryAccess::Read),
            None
        );
    }

    #[test]
    fn device_local_write_falls_back_to_host_visible() {
        let props = properties(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
        ]);
        assert_eq!(
            find_memory_type(
                &props,
                !0,
                MemoryAccess::Write {
                    prefer_device_local: true
                }
            ),
            Some(1)
        );
    }

    #[test]
    fn device_only_has_no_fallback() {
        let props = properties(&[F::HOST_VISIBLE | F::HOST_COHERENT]);
        assert_eq!(find_memory_type(&props, !0, MemoryAccess::None), None);
    }

    #[test]
    fn align_up_rounds_to_alignment() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(300, 0), 300);
    }

    #[test]
    fn placement_aligns_then_bumps() {
        let reqs = |size, alignment| vk::MemoryRequirements {
            size,
            alignment,
            memory_type_bits: !0,
        };
        let mut cursor = 0;
        assert_eq!(place(&mut cursor, &reqs(100, 64), 1024), Ok(0));
        assert_eq!(cursor, 100);
        assert_eq!(place(&mut cursor, &reqs(200, 256), 1024), Ok(256));
        assert_eq!(cursor, 456);

        assert_eq!(
            place(&mut cursor, &reqs(600, 256), 1024),
            Err(PlaceError::OutOfBounds {
                offset: 512,
                size: 600,
                capacity: 1024
            })
        );
        assert_eq!(cursor, 456);

        assert_eq!(place(&mut cursor, &reqs(512, 256), 1024), Ok(512));
        assert_eq!(cursor, 1024);
    }

    #[test]
    fn placement_rejects_overflowing_sizes() {
        let mut cursor = 16;
        let reqs = vk::MemoryRequirements {
            size: u64::MAX,
            alignment: 16,
            memory_type_bits: !0,
        };
        assert!(place(&mut cursor, &reqs, u64::MAX).is_err());
        assert_eq!(cursor, 16);
    }

    #[test]
    fn mapped_range_checks() {
        assert_eq!(check_range(0, 16, 16), Ok(0));
        assert_eq!(check_range(8, 8, 16), Ok(8));
        assert_eq!(
            check_range(8, 9, 16),
            Err(MapAccessError::OutOfRange {
                offset: 8,
                len: 9,
                size: 16
            })
        );
        assert!(check_range(u64::MAX, 1, 16).is_err());
    }

    #[test]
    fn dedicated_hint() {
        let mut reqs = ResourceRequirements::default();
        assert!(!reqs.wants_dedicated());
        reqs.prefers_dedicated = true;
        assert!(reqs.wants_dedicated());
    }
}
