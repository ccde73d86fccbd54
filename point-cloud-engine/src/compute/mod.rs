//! Data-parallel compute device for the accelerated execution path.
//!
//! Kernels are plain closures invoked once per global invocation id. Shared state lives in
//! [`StorageBuffer`]s made of 32-bit atomic words, so kernels coordinate exclusively through
//! atomics and never assume an ordering between invocations.
//!
//! ## Execution model
//!
//! - [`ComputeDevice::dispatch`] runs `workgroups * workgroup_size` invocations on the device's
//!   worker pool and returns once all of them have finished. A dispatch is a synchronous barrier:
//!   a read-back issued after it observes every write made by the kernel.
//! - Kernels bound-check their invocation id against the element count, exactly as shader code
//!   does when the count is not a multiple of the workgroup size.
//! - Buffers are owned values. Dropping one returns its bytes to the device ledger, so every exit
//!   path of an operation releases what it allocated.
//!
//! ## Buffer layouts
//!
//! ```text
//! GpuPoint        { position: [f32; 4], colour: [f32; 4] }            32 bytes
//! GpuVoxelRecord  { coord: [i32; 3], count: u32, offset: u32, cursor: u32 }  24 bytes
//! ```

/// Atomic word storage with typed load/store and bounds-checked read-back.
pub mod buffer;

/// Worker pool, dispatch and allocation ledger.
pub mod device;

/// Point layout shared by every kernel.
pub mod point;

pub use buffer::StorageBuffer;
pub use device::{ComputeDevice, DeviceDescriptor, workgroup_count};
pub use point::{DevicePointCloud, GpuPoint};
