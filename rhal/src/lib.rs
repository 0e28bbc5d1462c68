//! Vulkan device, resource-lifetime and frame synchronization layer.
//!
//! `rhal` is a thin hardware-abstraction layer built on [`ash`]. It does not
//! hide Vulkan's strictness; it owns the parts of a backend that carry
//! temporal invariants and fallback chains:
//!
//! ```text
//! Context
//! ├── Instance ── Surface<W>
//! ├── Device            (selected by selector::select_device)
//! ├── MemoryAllocator   (memory-type search, dedicated/placed/auto)
//! ├── FrameScheduler    (frame slots: pool, fence, semaphore, queries)
//! ├── SwapchainManager  (acquire / present / recreate)
//! └── DescriptorUpdateBatcher
//! ```
//!
//! Only one thread may use a [`context::Context`] between
//! [`begin_frame`](context::Context::begin_frame) and
//! [`end_frame`](context::Context::end_frame); nothing in the crate locks.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod fatal;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod resource;
pub mod selector;
pub mod surface;
pub mod swapchain;

pub use ash;
pub use raw_window_handle::HandleError as RwhHandleError;
