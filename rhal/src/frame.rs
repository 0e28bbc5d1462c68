//! Frame slots and the per-frame recycling protocol.
//!
//! A [`FrameScheduler`] owns `frames_in_flight` [`FrameSlot`]s. Each slot
//! moves through three states:
//!
//! ```text
//! Retired --begin_frame--> Recording --end_frame--> InFlight
//!    ^                                                  |
//!    +------------- fence observed signaled ------------+
//! ```
//!
//! Fences are created signaled, so every slot starts out `Retired`. A
//! slot's command pool is only reset after `begin_frame` has waited on the
//! slot's fence.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::{config::MAX_FRAMES_IN_FLIGHT, fatal};

/// A semaphore a submission waits on before `stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// Device operations the frame scheduler relies on.
///
/// Implemented by [`Device`](crate::device::Device); tests substitute a
/// recording mock.
pub trait FrameOps {
    /// # Safety
    /// Implementations create objects on a live device.
    unsafe fn create_frame_command_pool(
        &self,
    ) -> Result<vk::CommandPool, vk::Result>;
    /// # Safety
    /// No buffer from `pool` may be pending execution.
    unsafe fn destroy_frame_command_pool(&self, pool: vk::CommandPool);
    /// # Safety
    /// No buffer from `pool` may be pending execution.
    unsafe fn reset_frame_command_pool(
        &self,
        pool: vk::CommandPool,
    ) -> Result<(), vk::Result>;
    /// # Safety
    /// `pool` must be a live pool from this device.
    unsafe fn allocate_primary_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer, vk::Result>;
    /// # Safety
    /// `command_buffer` must be in the initial state.
    unsafe fn begin_one_time_commands(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result>;
    /// # Safety
    /// `command_buffer` must be in the recording state.
    unsafe fn end_commands(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result>;
    /// # Safety
    /// Implementations create objects on a live device.
    unsafe fn create_fence(&self, signaled: bool)
    -> Result<vk::Fence, vk::Result>;
    /// # Safety
    /// `fence` must not be pending.
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Block until `fence` is signaled.
    ///
    /// # Safety
    /// `fence` must be a live fence from this device.
    unsafe fn wait_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    /// # Safety
    /// `fence` must be signaled and not pending.
    unsafe fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;
    /// # Safety
    /// Implementations create objects on a live device.
    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result>;
    /// # Safety
    /// No pending work may wait on or signal `semaphore`.
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// # Safety
    /// Implementations create objects on a live device.
    unsafe fn create_timestamp_pool(
        &self,
        query_count: u32,
    ) -> Result<vk::QueryPool, vk::Result>;
    /// # Safety
    /// No pending work may reference `pool`.
    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool);
    /// # Safety
    /// `command_buffer` must be recording.
    unsafe fn cmd_reset_queries(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        query_count: u32,
    );
    /// # Safety
    /// `command_buffer` must be recording and `query` must have been reset.
    unsafe fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        pool: vk::QueryPool,
        query: u32,
    );
    /// Read `results.len()` timestamps starting at query 0, waiting for
    /// them to become available.
    ///
    /// # Safety
    /// Every read query must have been written by submitted work.
    unsafe fn read_timestamps(
        &self,
        pool: vk::QueryPool,
        results: &mut [u64],
    ) -> Result<(), vk::Result>;
    /// # Safety
    /// Every command buffer must be executable, `fence` unsignaled.
    unsafe fn submit(
        &self,
        submission: &Submission<'_>,
    ) -> Result<(), vk::Result>;

    /// Attach a debug name. A no-op unless the device supports naming.
    ///
    /// # Safety
    /// `object` must be a live handle from this device.
    unsafe fn name_object<H: vk::Handle>(&self, _object: H, _name: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// The GPU is done with the slot.
    Retired,
    Recording,
    /// Submitted; the GPU may still read the slot's command buffers.
    InFlight,
}

#[derive(Debug)]
struct TimestampQueries {
    pool: vk::QueryPool,
    capacity: u32,
    next: u32,
    /// Queries written by the slot's last submission.
    submitted: u32,
    results: Vec<u64>,
}

/// Per-frame resources.
#[derive(Debug)]
pub struct FrameSlot {
    command_pool: vk::CommandPool,
    pool_ready: vk::Fence,
    image_available: vk::Semaphore,
    queries: Option<TimestampQueries>,
    state: SlotState,
    /// Buffers allocated in an earlier use of the pool and free to reuse.
    spare_command_buffers: Vec<vk::CommandBuffer>,
    recorded: Vec<vk::CommandBuffer>,
}

impl FrameSlot {
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn pool_ready_fence(&self) -> vk::Fence {
        self.pool_ready
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Command buffers handed out since `begin_frame`.
    pub fn recorded_command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.recorded
    }
}

#[derive(Debug, Error)]
pub enum CreateFrameSchedulerError {
    #[error("Failed to create {object} for frame slot {slot}: {result}")]
    Vulkan {
        object: &'static str,
        slot: usize,
        result: vk::Result,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeginFrameError {
    #[error("Frame slot {0} is already recording")]
    AlreadyRecording(usize),
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("No frame is recording; call begin_frame first")]
    FrameNotRecording,
    /// Returned instead of asserting; the frame stays usable.
    #[error("All {budget} timestamp queries of this frame are used")]
    QueryBudgetExhausted { budget: u32 },
    #[error("Timestamp queries are disabled")]
    TimestampsDisabled,
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndFrameError {
    #[error("No frame is recording; call begin_frame first")]
    FrameNotRecording,
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },
}

/// Settings fixed for the scheduler's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct FrameSchedulerDesc {
    /// `1..=MAX_FRAMES_IN_FLIGHT`
    pub frames_in_flight: usize,
    /// Destroy and recreate command pools instead of resetting them.
    pub recreate_pools: bool,
    /// `0` disables timestamp queries.
    pub timestamp_queries_per_frame: u32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
}

pub struct FrameScheduler<D: FrameOps> {
    device: Arc<D>,
    slots: Box<[FrameSlot]>,
    frame: usize,
    frames_submitted: u64,
    recreate_pools: bool,
    timestamp_period: f32,
}

impl<D: FrameOps> std::fmt::Debug for FrameScheduler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frame", &self.frame)
            .field("frames_submitted", &self.frames_submitted)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl<D: FrameOps> FrameScheduler<D> {
    /// Create every slot up front.
    ///
    /// # Panics
    /// If `desc.frames_in_flight` is outside `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(
        device: Arc<D>,
        desc: FrameSchedulerDesc,
    ) -> Result<Self, CreateFrameSchedulerError> {
        assert!(
            (1..=MAX_FRAMES_IN_FLIGHT).contains(&desc.frames_in_flight),
            "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
            desc.frames_in_flight
        );

        let mut slots = Vec::with_capacity(desc.frames_in_flight);
        for slot in 0..desc.frames_in_flight {
            // SAFETY: device is alive for as long as the Arc
            match unsafe { Self::create_slot(&device, slot, &desc) } {
                Ok(created) => slots.push(created),
                Err(e) => {
                    for created in slots.drain(..) {
                        // SAFETY: nothing was ever submitted from these
                        unsafe { Self::destroy_slot(&device, created) };
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            "Created frame scheduler with {} slots ({} timestamp queries each)",
            desc.frames_in_flight,
            desc.timestamp_queries_per_frame
        );

        Ok(Self {
            device,
            slots: slots.into_boxed_slice(),
            frame: 0,
            frames_submitted: 0,
            recreate_pools: desc.recreate_pools,
            timestamp_period: desc.timestamp_period,
        })
    }

    /// # Safety
    /// `device` must be live.
    unsafe fn create_slot(
        device: &D,
        slot: usize,
        desc: &FrameSchedulerDesc,
    ) -> Result<FrameSlot, CreateFrameSchedulerError> {
        let err = |object| {
            move |result| CreateFrameSchedulerError::Vulkan {
                object,
                slot,
                result,
            }
        };

        // SAFETY: forwarded from caller
        let command_pool = fatal::check("vkCreateCommandPool", unsafe {
            device.create_frame_command_pool()
        })
        .map_err(err("command pool"))?;

        // SAFETY: forwarded from caller
        let pool_ready = match fatal::check("vkCreateFence", unsafe {
            device.create_fence(true)
        }) {
            Ok(fence) => fence,
            Err(e) => {
                // SAFETY: the pool is unused
                unsafe { device.destroy_frame_command_pool(command_pool) };
                return Err(err("fence")(e));
            }
        };

        // SAFETY: forwarded from caller
        let image_available = match fatal::check("vkCreateSemaphore", unsafe {
            device.create_semaphore()
        }) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                // SAFETY: both objects are unused
                unsafe {
                    device.destroy_fence(pool_ready);
                    device.destroy_frame_command_pool(command_pool);
                }
                return Err(err("semaphore")(e));
            }
        };

        let queries = if desc.timestamp_queries_per_frame > 0 {
            // SAFETY: forwarded from caller
            match fatal::check("vkCreateQueryPool", unsafe {
                device.create_timestamp_pool(desc.timestamp_queries_per_frame)
            }) {
                Ok(pool) => Some(TimestampQueries {
                    pool,
                    capacity: desc.timestamp_queries_per_frame,
                    next: 0,
                    submitted: 0,
                    results: Vec::with_capacity(
                        desc.timestamp_queries_per_frame as usize,
                    ),
                }),
                Err(e) => {
                    // SAFETY: all objects are unused
                    unsafe {
                        device.destroy_semaphore(image_available);
                        device.destroy_fence(pool_ready);
                        device.destroy_frame_command_pool(command_pool);
                    }
                    return Err(err("timestamp query pool")(e));
                }
            }
        } else {
            None
        };

        // SAFETY: all handles were just created on this device
        unsafe {
            device.name_object(command_pool, &format!("frame{slot}.pool"));
            device.name_object(pool_ready, &format!("frame{slot}.pool_ready"));
            device.name_object(
                image_available,
                &format!("frame{slot}.image_available"),
            );
        }

        Ok(FrameSlot {
            command_pool,
            pool_ready,
            image_available,
            queries,
            state: SlotState::Retired,
            spare_command_buffers: Vec::new(),
            recorded: Vec::new(),
        })
    }

    /// # Safety
    /// Nothing from `slot` may be pending on the GPU.
    unsafe fn destroy_slot(device: &D, slot: FrameSlot) {
        // SAFETY: forwarded from caller; destroying the pool frees its
        // command buffers
        unsafe {
            if let Some(queries) = slot.queries {
                device.destroy_query_pool(queries.pool);
            }
            device.destroy_semaphore(slot.image_available);
            device.destroy_fence(slot.pool_ready);
            if slot.command_pool != vk::CommandPool::null() {
                device.destroy_frame_command_pool(slot.command_pool);
            }
        }
    }

    /// Reclaim the current slot.
    ///
    /// Blocks until the GPU has finished the slot's previous submission,
    /// then resets its fence and command pool and reads back the
    /// timestamps that submission wrote.
    pub fn begin_frame(&mut self) -> Result<(), BeginFrameError> {
        let index = self.frame;
        let device = &*self.device;
        let slot = &mut self.slots[index];
        if slot.state == SlotState::Recording {
            return Err(BeginFrameError::AlreadyRecording(index));
        }
        let vk_err = |operation| {
            move |result| BeginFrameError::Vulkan { operation, result }
        };

        // SAFETY: the fence belongs to this device
        fatal::check("vkWaitForFences", unsafe {
            device.wait_fence(slot.pool_ready)
        })
        .map_err(vk_err("vkWaitForFences"))?;
        slot.state = SlotState::Retired;

        if self.recreate_pools {
            let retired = std::mem::replace(
                &mut slot.command_pool,
                vk::CommandPool::null(),
            );
            if retired != vk::CommandPool::null() {
                // SAFETY: the slot's fence was observed signaled, so none
                // of the pool's command buffers are pending
                unsafe { device.destroy_frame_command_pool(retired) };
            }
            slot.spare_command_buffers.clear();
            slot.recorded.clear();
            // SAFETY: device is alive for as long as the Arc
            let pool = fatal::check("vkCreateCommandPool", unsafe {
                device.create_frame_command_pool()
            })
            .map_err(vk_err("vkCreateCommandPool"))?;
            slot.command_pool = pool;
            // SAFETY: pool was just created on this device
            unsafe { device.name_object(pool, &format!("frame{index}.pool")) };
        } else {
            // SAFETY: as above, nothing from the pool is pending
            fatal::check("vkResetCommandPool", unsafe {
                device.reset_frame_command_pool(slot.command_pool)
            })
            .map_err(vk_err("vkResetCommandPool"))?;
            let recorded = std::mem::take(&mut slot.recorded);
            slot.spare_command_buffers.extend(recorded);
        }

        if let Some(queries) = slot.queries.as_mut() {
            queries.results.clear();
            if queries.submitted > 0 {
                queries.results.resize(queries.submitted as usize, 0);
                // SAFETY: the submission that wrote these queries has
                // completed
                fatal::check("vkGetQueryPoolResults", unsafe {
                    device.read_timestamps(queries.pool, &mut queries.results)
                })
                .map_err(vk_err("vkGetQueryPoolResults"))?;
            }
            queries.next = 0;
            queries.submitted = 0;
        }

        // Reset last: a failed reclaim leaves the fence signaled.
        // SAFETY: the wait above observed the fence signaled
        fatal::check("vkResetFences", unsafe {
            device.reset_fence(slot.pool_ready)
        })
        .map_err(vk_err("vkResetFences"))?;

        slot.state = SlotState::Recording;
        Ok(())
    }

    /// A command buffer in the recording state, owned by the current slot.
    ///
    /// The first buffer of each frame also resets the slot's timestamp
    /// queries.
    pub fn command_buffer(
        &mut self,
    ) -> Result<vk::CommandBuffer, RecordError> {
        let device = &*self.device;
        let slot = &mut self.slots[self.frame];
        if slot.state != SlotState::Recording {
            return Err(RecordError::FrameNotRecording);
        }
        let vk_err =
            |operation| move |result| RecordError::Vulkan { operation, result };

        let command_buffer = match slot.spare_command_buffers.pop() {
            Some(command_buffer) => command_buffer,
            // SAFETY: the pool belongs to the recording slot
            None => fatal::check("vkAllocateCommandBuffers", unsafe {
                device.allocate_primary_command_buffer(slot.command_pool)
            })
            .map_err(vk_err("vkAllocateCommandBuffers"))?,
        };

        // SAFETY: the pool was reset in begin_frame, so the buffer is in
        // the initial state
        if let Err(e) = fatal::check("vkBeginCommandBuffer", unsafe {
            device.begin_one_time_commands(command_buffer)
        }) {
            slot.spare_command_buffers.push(command_buffer);
            return Err(vk_err("vkBeginCommandBuffer")(e));
        }

        if slot.recorded.is_empty()
            && let Some(queries) = slot.queries.as_ref()
        {
            // SAFETY: command_buffer is recording
            unsafe {
                device.cmd_reset_queries(
                    command_buffer,
                    queries.pool,
                    queries.capacity,
                )
            };
        }

        slot.recorded.push(command_buffer);
        Ok(command_buffer)
    }

    /// Record a timestamp write and return its query id.
    ///
    /// `command_buffer` must have come from [`command_buffer`] this frame.
    /// Writing past the per-frame budget is not a panic: it returns
    /// [`RecordError::QueryBudgetExhausted`] and records nothing, so callers
    /// can drop the measurement and keep the frame.
    ///
    /// [`command_buffer`]: Self::command_buffer
    pub fn write_timestamp(
        &mut self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
    ) -> Result<u32, RecordError> {
        let device = &*self.device;
        let slot = &mut self.slots[self.frame];
        if slot.state != SlotState::Recording {
            return Err(RecordError::FrameNotRecording);
        }
        debug_assert!(slot.recorded.contains(&command_buffer));
        let queries =
            slot.queries.as_mut().ok_or(RecordError::TimestampsDisabled)?;
        if queries.next >= queries.capacity {
            return Err(RecordError::QueryBudgetExhausted {
                budget: queries.capacity,
            });
        }

        let query = queries.next;
        // SAFETY: the query was reset by the frame's first command buffer,
        // which is submitted before or as command_buffer
        unsafe {
            device.cmd_write_timestamp(command_buffer, stage, queries.pool, query)
        };
        queries.next += 1;
        Ok(query)
    }

    /// End and submit everything recorded this frame, then advance.
    ///
    /// With no recorded command buffers an empty submission still
    /// re-signals the slot fence.
    pub fn end_frame(
        &mut self,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
    ) -> Result<(), EndFrameError> {
        let device = &*self.device;
        let slot = &mut self.slots[self.frame];
        if slot.state != SlotState::Recording {
            return Err(EndFrameError::FrameNotRecording);
        }

        for &command_buffer in &slot.recorded {
            // SAFETY: every recorded buffer was begun in command_buffer()
            fatal::check("vkEndCommandBuffer", unsafe {
                device.end_commands(command_buffer)
            })
            .map_err(|result| EndFrameError::Vulkan {
                operation: "vkEndCommandBuffer",
                result,
            })?;
        }

        let submission = Submission {
            command_buffers: &slot.recorded,
            waits,
            signals,
            fence: slot.pool_ready,
        };
        // SAFETY: buffers are executable, the fence was reset in
        // begin_frame
        fatal::check("vkQueueSubmit2", unsafe { device.submit(&submission) })
            .map_err(|result| EndFrameError::Vulkan {
                operation: "vkQueueSubmit2",
                result,
            })?;

        if let Some(queries) = slot.queries.as_mut() {
            queries.submitted = queries.next;
        }
        slot.state = SlotState::InFlight;
        self.frame = (self.frame + 1) % self.slots.len();
        self.frames_submitted += 1;
        Ok(())
    }

    /// Index of the slot the next `begin_frame` reclaims.
    pub fn frame_index(&self) -> usize {
        self.frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.frame]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// `true` between `begin_frame` and `end_frame`.
    pub fn is_recording(&self) -> bool {
        self.current_slot().state == SlotState::Recording
    }

    /// Raw ticks written by the current slot's previous submission, indexed
    /// by query id. Empty if it wrote none.
    pub fn previous_timestamps(&self) -> &[u64] {
        self.current_slot()
            .queries
            .as_ref()
            .map(|q| q.results.as_slice())
            .unwrap_or(&[])
    }

    /// Nanoseconds between two previous timestamps of the current slot.
    pub fn elapsed_ns(&self, start: u32, end: u32) -> Option<f64> {
        let results = self.previous_timestamps();
        let start = *results.get(start as usize)?;
        let end = *results.get(end as usize)?;
        Some(end.wrapping_sub(start) as f64 * f64::from(self.timestamp_period))
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: FrameOps> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        tracing::debug!("Dropping frame scheduler ({} slots)", self.slots.len());
        let slots = std::mem::take(&mut self.slots);
        for slot in slots.into_vec() {
            if slot.state == SlotState::InFlight {
                // SAFETY: the fence belongs to this device
                if let Err(e) = unsafe { self.device.wait_fence(slot.pool_ready) }
                {
                    tracing::error!("Failed to wait for frame fence: {e}");
                }
            }
            // SAFETY: the slot's submission has completed
            unsafe { Self::destroy_slot(&self.device, slot) };
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        CreatePool(u64),
        DestroyPool(u64),
        ResetPool(u64),
        AllocateCommandBuffer { pool: u64, command_buffer: u64 },
        Begin(u64),
        End(u64),
        CreateFence { fence: u64, signaled: bool },
        WaitFence(u64),
        ResetFence(u64),
        ResetQueries { command_buffer: u64, count: u32 },
        WriteTimestamp { command_buffer: u64, query: u32 },
        ReadTimestamps { count: usize },
        Submit {
            command_buffers: Vec<u64>,
            waits: Vec<u64>,
            signals: Vec<u64>,
            fence: u64,
        },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FenceState {
        Unsignaled,
        Pending,
        Signaled,
    }

    /// Pretends to be a GPU that finishes work the moment a fence is
    /// waited on, and panics on any reuse of in-flight resources.
    #[derive(Default)]
    pub struct MockFrameDevice {
        next_handle: Cell<u64>,
        pub calls: RefCell<Vec<Call>>,
        fences: RefCell<HashMap<u64, FenceState>>,
        pool_of: RefCell<HashMap<u64, u64>>,
        /// Pool -> fence of the last submission that used it.
        pool_fence: RefCell<HashMap<u64, u64>>,
        fail_pool_create: Cell<bool>,
    }

    impl MockFrameDevice {
        fn handle(&self) -> u64 {
            let next = self.next_handle.get() + 1;
            self.next_handle.set(next);
            next
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }

        fn assert_pool_idle(&self, pool: u64) {
            if let Some(fence) = self.pool_fence.borrow().get(&pool) {
                assert_ne!(
                    self.fences.borrow()[fence],
                    FenceState::Pending,
                    "pool {pool} touched while its submission may run"
                );
            }
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameOps for MockFrameDevice {
        unsafe fn create_frame_command_pool(
            &self,
        ) -> Result<vk::CommandPool, vk::Result> {
            if self.fail_pool_create.get() {
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
            let pool = self.handle();
            self.record(Call::CreatePool(pool));
            Ok(vk::CommandPool::from_raw(pool))
        }

        unsafe fn destroy_frame_command_pool(&self, pool: vk::CommandPool) {
            assert_ne!(pool, vk::CommandPool::null(), "destroying a null pool");
            assert!(
                !self.calls.borrow().contains(&Call::DestroyPool(pool.as_raw())),
                "pool {} destroyed twice",
                pool.as_raw()
            );
            self.assert_pool_idle(pool.as_raw());
            self.record(Call::DestroyPool(pool.as_raw()));
        }

        unsafe fn reset_frame_command_pool(
            &self,
            pool: vk::CommandPool,
        ) -> Result<(), vk::Result> {
            self.assert_pool_idle(pool.as_raw());
            self.record(Call::ResetPool(pool.as_raw()));
            Ok(())
        }

        unsafe fn allocate_primary_command_buffer(
            &self,
            pool: vk::CommandPool,
        ) -> Result<vk::CommandBuffer, vk::Result> {
            let command_buffer = self.handle();
            self.pool_of
                .borrow_mut()
                .insert(command_buffer, pool.as_raw());
            self.record(Call::AllocateCommandBuffer {
                pool: pool.as_raw(),
                command_buffer,
            });
            Ok(vk::CommandBuffer::from_raw(command_buffer))
        }

        unsafe fn begin_one_time_commands(
            &self,
            command_buffer: vk::CommandBuffer,
        ) -> Result<(), vk::Result> {
            let pool = self.pool_of.borrow()[&command_buffer.as_raw()];
            self.assert_pool_idle(pool);
            self.record(Call::Begin(command_buffer.as_raw()));
            Ok(())
        }

        unsafe fn end_commands(
            &self,
            command_buffer: vk::CommandBuffer,
        ) -> Result<(), vk::Result> {
            self.record(Call::End(command_buffer.as_raw()));
            Ok(())
        }

        unsafe fn create_fence(
            &self,
            signaled: bool,
        ) -> Result<vk::Fence, vk::Result> {
            let fence = self.handle();
            let state = if signaled {
                FenceState::Signaled
            } else {
                FenceState::Unsignaled
            };
            self.fences.borrow_mut().insert(fence, state);
            self.record(Call::CreateFence { fence, signaled });
            Ok(vk::Fence::from_raw(fence))
        }

        unsafe fn destroy_fence(&self, fence: vk::Fence) {
            self.fences.borrow_mut().remove(&fence.as_raw());
        }

        unsafe fn wait_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
            let mut fences = self.fences.borrow_mut();
            let state = fences.get_mut(&fence.as_raw()).expect("unknown fence");
            assert_ne!(
                *state,
                FenceState::Unsignaled,
                "waiting on a fence nothing will signal"
            );
            *state = FenceState::Signaled;
            drop(fences);
            self.record(Call::WaitFence(fence.as_raw()));
            Ok(())
        }

        unsafe fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
            let mut fences = self.fences.borrow_mut();
            let state = fences.get_mut(&fence.as_raw()).expect("unknown fence");
            assert_eq!(*state, FenceState::Signaled, "reset of a pending fence");
            *state = FenceState::Unsignaled;
            drop(fences);
            self.record(Call::ResetFence(fence.as_raw()));
            Ok(())
        }

        unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
            Ok(vk::Semaphore::from_raw(self.handle()))
        }

        unsafe fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {}

        unsafe fn create_timestamp_pool(
            &self,
            _query_count: u32,
        ) -> Result<vk::QueryPool, vk::Result> {
            Ok(vk::QueryPool::from_raw(self.handle()))
        }

        unsafe fn destroy_query_pool(&self, _pool: vk::QueryPool) {}

        unsafe fn cmd_reset_queries(
            &self,
            command_buffer: vk::CommandBuffer,
            _pool: vk::QueryPool,
            query_count: u32,
        ) {
            self.record(Call::ResetQueries {
                command_buffer: command_buffer.as_raw(),
                count: query_count,
            });
        }

        unsafe fn cmd_write_timestamp(
            &self,
            command_buffer: vk::CommandBuffer,
            _stage: vk::PipelineStageFlags2,
            _pool: vk::QueryPool,
            query: u32,
        ) {
            self.record(Call::WriteTimestamp {
                command_buffer: command_buffer.as_raw(),
                query,
            });
        }

        unsafe fn read_timestamps(
            &self,
            _pool: vk::QueryPool,
            results: &mut [u64],
        ) -> Result<(), vk::Result> {
            for (i, result) in results.iter_mut().enumerate() {
                *result = 1000 + 250 * i as u64;
            }
            self.record(Call::ReadTimestamps {
                count: results.len(),
            });
            Ok(())
        }

        unsafe fn submit(
            &self,
            submission: &Submission<'_>,
        ) -> Result<(), vk::Result> {
            let fence = submission.fence.as_raw();
            {
                let mut fences = self.fences.borrow_mut();
                let state = fences.get_mut(&fence).expect("unknown fence");
                assert_eq!(*state, FenceState::Unsignaled);
                *state = FenceState::Pending;
            }
            for command_buffer in submission.command_buffers {
                let pool = self.pool_of.borrow()[&command_buffer.as_raw()];
                self.pool_fence.borrow_mut().insert(pool, fence);
            }
            self.record(Call::Submit {
                command_buffers: submission
                    .command_buffers
                    .iter()
                    .map(|c| c.as_raw())
                    .collect(),
                waits: submission
                    .waits
                    .iter()
                    .map(|w| w.semaphore.as_raw())
                    .collect(),
                signals: submission.signals.iter().map(|s| s.as_raw()).collect(),
                fence,
            });
            Ok(())
        }
    }

    fn scheduler(
        frames_in_flight: usize,
        recreate_pools: bool,
        queries: u32,
    ) -> FrameScheduler<MockFrameDevice> {
        FrameScheduler::new(
            Arc::new(MockFrameDevice::default()),
            FrameSchedulerDesc {
                frames_in_flight,
                recreate_pools,
                timestamp_queries_per_frame: queries,
                timestamp_period: 1.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn slots_start_retired_with_signaled_fences() {
        let frames = scheduler(3, false, 0);
        assert_eq!(frames.frames_in_flight(), 3);
        assert!(frames.slots().iter().all(|s| s.state() == SlotState::Retired));
        assert_eq!(
            frames.device().count(|c| matches!(
                c,
                Call::CreateFence { signaled: true, .. }
            )),
            3
        );
    }

    #[test]
    fn pool_reset_always_follows_fence_wait() {
        let mut frames = scheduler(2, false, 0);
        for _ in 0..6 {
            frames.begin_frame().unwrap();
            frames.command_buffer().unwrap();
            frames.end_frame(&[], &[]).unwrap();
        }

        let calls = frames.device().calls.borrow();
        for (i, call) in calls.iter().enumerate() {
            if let Call::ResetPool(pool) = call {
                let slot = frames
                    .slots()
                    .iter()
                    .find(|s| s.command_pool.as_raw() == *pool)
                    .unwrap();
                let fence = slot.pool_ready.as_raw();
                let last_wait = calls[..i]
                    .iter()
                    .rposition(|c| *c == Call::WaitFence(fence))
                    .expect("pool reset without a prior fence wait");
                let last_submit = calls[..i].iter().rposition(
                    |c| matches!(c, Call::Submit { fence: f, .. } if *f == fence),
                );
                assert!(last_submit.is_none_or(|s| s < last_wait));
            }
        }
    }

    #[test]
    fn frame_index_wraps_and_slots_go_in_flight() {
        let mut frames = scheduler(3, false, 0);
        for expected in [0, 1, 2, 0, 1] {
            assert_eq!(frames.frame_index(), expected);
            frames.begin_frame().unwrap();
            assert!(frames.is_recording());
            frames.end_frame(&[], &[]).unwrap();
            assert_eq!(frames.slots()[expected].state(), SlotState::InFlight);
        }
        assert_eq!(frames.frames_submitted(), 5);
    }

    #[test]
    fn empty_frame_still_submits_to_resignal_fence() {
        let mut frames = scheduler(1, false, 0);
        frames.begin_frame().unwrap();
        frames.end_frame(&[], &[]).unwrap();
        frames.begin_frame().unwrap();

        let submits = frames.device().count(|c| {
            matches!(c, Call::Submit { command_buffers, .. } if command_buffers.is_empty())
        });
        assert_eq!(submits, 1);
    }

    #[test]
    fn command_buffers_are_recycled_across_uses_of_a_slot() {
        let mut frames = scheduler(1, false, 0);
        let mut first = Vec::new();
        frames.begin_frame().unwrap();
        first.push(frames.command_buffer().unwrap());
        first.push(frames.command_buffer().unwrap());
        frames.end_frame(&[], &[]).unwrap();

        frames.begin_frame().unwrap();
        let again = [
            frames.command_buffer().unwrap(),
            frames.command_buffer().unwrap(),
        ];
        frames.end_frame(&[], &[]).unwrap();

        assert!(again.iter().all(|cb| first.contains(cb)));
        assert_eq!(
            frames
                .device()
                .count(|c| matches!(c, Call::AllocateCommandBuffer { .. })),
            2
        );
    }

    #[test]
    fn safe_mode_recreates_pools_instead_of_resetting() {
        let mut frames = scheduler(1, true, 0);
        frames.begin_frame().unwrap();
        frames.command_buffer().unwrap();
        frames.end_frame(&[], &[]).unwrap();
        frames.begin_frame().unwrap();
        frames.command_buffer().unwrap();
        frames.end_frame(&[], &[]).unwrap();

        let device = frames.device();
        assert_eq!(device.count(|c| matches!(c, Call::ResetPool(_))), 0);
        assert_eq!(device.count(|c| matches!(c, Call::DestroyPool(_))), 2);
        assert_eq!(device.count(|c| matches!(c, Call::CreatePool(_))), 3);
        assert_eq!(
            device.count(|c| matches!(c, Call::AllocateCommandBuffer { .. })),
            2
        );
    }

    #[test]
    fn failed_pool_recreation_is_retryable_and_never_double_frees() {
        let mut frames = scheduler(1, true, 0);
        frames.begin_frame().unwrap();
        frames.command_buffer().unwrap();
        frames.end_frame(&[], &[]).unwrap();

        frames.device().fail_pool_create.set(true);
        assert_eq!(
            frames.begin_frame(),
            Err(BeginFrameError::Vulkan {
                operation: "vkCreateCommandPool",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            })
        );
        assert_eq!(frames.current_slot().state(), SlotState::Retired);
        assert_eq!(
            frames.command_buffer(),
            Err(RecordError::FrameNotRecording)
        );

        frames.device().fail_pool_create.set(false);
        frames.begin_frame().unwrap();
        frames.command_buffer().unwrap();
        frames.end_frame(&[], &[]).unwrap();

        let device = Arc::clone(frames.device());
        drop(frames);
        let creates = device.count(|c| matches!(c, Call::CreatePool(_)));
        assert_eq!(creates, 2);
        assert_eq!(
            device.count(|c| matches!(c, Call::DestroyPool(_))),
            creates
        );
    }

    #[test]
    fn recording_outside_a_frame_is_rejected() {
        let mut frames = scheduler(2, false, 4);
        assert_eq!(
            frames.command_buffer(),
            Err(RecordError::FrameNotRecording)
        );
        assert_eq!(
            frames.end_frame(&[], &[]),
            Err(EndFrameError::FrameNotRecording)
        );
        frames.begin_frame().unwrap();
        assert_eq!(
            frames.begin_frame(),
            Err(BeginFrameError::AlreadyRecording(0))
        );
    }

    #[test]
    fn end_frame_passes_semaphores_and_slot_fence() {
        let mut frames = scheduler(2, false, 0);
        frames.begin_frame().unwrap();
        let cb = frames.command_buffer().unwrap();
        let wait = SemaphoreWait {
            semaphore: frames.current_slot().image_available(),
            stage: vk::PipelineStageFlags2::TRANSFER,
        };
        let signal = vk::Semaphore::from_raw(999);
        let fence = frames.current_slot().pool_ready_fence();
        frames.end_frame(&[wait], &[signal]).unwrap();

        let calls = frames.device().calls.borrow();
        assert_eq!(
            calls.last(),
            Some(&Call::Submit {
                command_buffers: vec![cb.as_raw()],
                waits: vec![wait.semaphore.as_raw()],
                signals: vec![999],
                fence: fence.as_raw(),
            })
        );
        assert!(calls.contains(&Call::End(cb.as_raw())));
    }

    #[test]
    fn first_command_buffer_resets_queries() {
        let mut frames = scheduler(1, false, 4);
        frames.begin_frame().unwrap();
        let first = frames.command_buffer().unwrap();
        let _second = frames.command_buffer().unwrap();
        frames.end_frame(&[], &[]).unwrap();

        let device = frames.device();
        assert_eq!(
            device.count(|c| matches!(c, Call::ResetQueries { .. })),
            1
        );
        assert!(device.calls.borrow().contains(&Call::ResetQueries {
            command_buffer: first.as_raw(),
            count: 4,
        }));
    }

    #[test]
    fn query_budget_is_per_frame() {
        let mut frames = scheduler(1, false, 2);
        frames.begin_frame().unwrap();
        let cb = frames.command_buffer().unwrap();
        let stage = vk::PipelineStageFlags2::ALL_COMMANDS;
        assert_eq!(frames.write_timestamp(cb, stage), Ok(0));
        assert_eq!(frames.write_timestamp(cb, stage), Ok(1));
        assert_eq!(
            frames.write_timestamp(cb, stage),
            Err(RecordError::QueryBudgetExhausted { budget: 2 })
        );
        assert_eq!(
            frames
                .device()
                .count(|c| matches!(c, Call::WriteTimestamp { .. })),
            2
        );
        frames.end_frame(&[], &[]).unwrap();

        frames.begin_frame().unwrap();
        let cb = frames.command_buffer().unwrap();
        assert_eq!(frames.write_timestamp(cb, stage), Ok(0));
    }

    #[test]
    fn timestamps_are_read_back_on_next_use_of_the_slot() {
        let mut frames = scheduler(2, false, 4);
        let stage = vk::PipelineStageFlags2::ALL_COMMANDS;

        frames.begin_frame().unwrap();
        let cb = frames.command_buffer().unwrap();
        let start = frames.write_timestamp(cb, stage).unwrap();
        let end = frames.write_timestamp(cb, stage).unwrap();
        frames.end_frame(&[], &[]).unwrap();

        frames.begin_frame().unwrap();
        assert!(frames.previous_timestamps().is_empty());
        frames.end_frame(&[], &[]).unwrap();

        frames.begin_frame().unwrap();
        assert_eq!(frames.previous_timestamps(), &[1000, 1250]);
        assert_eq!(frames.elapsed_ns(start, end), Some(250.0));
        assert_eq!(
            frames
                .device()
                .count(|c| *c == Call::ReadTimestamps { count: 2 }),
            1
        );
    }

    #[test]
    fn timestamps_disabled_without_budget() {
        let mut frames = scheduler(1, false, 0);
        frames.begin_frame().unwrap();
        let cb = frames.command_buffer().unwrap();
        assert_eq!(
            frames.write_timestamp(cb, vk::PipelineStageFlags2::ALL_COMMANDS),
            Err(RecordError::TimestampsDisabled)
        );
    }

    #[test]
    #[should_panic(expected = "frames_in_flight")]
    fn frames_in_flight_is_bounded() {
        scheduler(MAX_FRAMES_IN_FLIGHT + 1, false, 0);
    }
}
