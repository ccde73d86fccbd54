//! Spatial filters and point synthesis.
//!
//! Every operation is a pure function of `(snapshot, grid, parameters)` and returns a new
//! snapshot. The `_cpu` variants run sequentially on the host; the `_gpu` variants dispatch
//! kernels on a [`crate::compute::ComputeDevice`] and agree with the host variants as sets of
//! points, not in order.

pub mod complementation;
pub mod density;
pub mod morphology;
pub mod noise;
pub mod placement;

pub use complementation::{Complementation, ComplementationParams, complement_cpu, complement_gpu};
pub use density::{density_filter_cpu, density_filter_gpu};
pub use morphology::{MorphologyOutcome, MorphologyParams, morphology_cpu, morphology_gpu};
pub use noise::{JobProgress, NoiseFilterJob, noise_filter_cpu, noise_filter_gpu};
pub use placement::Placement;

use crate::compute::{ComputeDevice, GpuPoint, StorageBuffer};
use crate::error::ComputeError;
use std::sync::atomic::Ordering;

/// Output buffer plus its atomic append counter.
pub(crate) struct AppendBuffer {
    pub(crate) items: StorageBuffer<GpuPoint>,
    counter: StorageBuffer<u32>,
}

impl AppendBuffer {
    pub(crate) fn new(device: &ComputeDevice, label: &str, capacity: usize) -> Result<Self, ComputeError> {
        Ok(Self {
            items: device.create_buffer(label, capacity)?,
            counter: device.create_buffer("append_counter", 1)?,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Reserves `count` consecutive slots and returns the first. Slots past capacity must not be
    /// written; the overflow shows up in [`AppendBuffer::len`].
    pub(crate) fn reserve(&self, count: u32) -> u32 {
        self.counter.word(0, 0).fetch_add(count, Ordering::Relaxed)
    }

    /// Writes `point` at `slot` when it fits.
    pub(crate) fn put(&self, slot: u32, point: GpuPoint) {
        if (slot as usize) < self.items.len() {
            self.items.store(slot as usize, point);
        }
    }

    pub(crate) fn reset(&self) {
        self.counter.store(0, 0);
    }

    /// Number of appended elements, which exceeds capacity after an overflow.
    pub(crate) fn len(&self) -> usize {
        self.counter.load(0) as usize
    }

    /// Reads back the appended points, failing when the kernel overflowed the buffer.
    pub(crate) fn read_appended(&self, resource: &'static str) -> Result<Vec<GpuPoint>, ComputeError> {
        let count = self.len();
        if count > self.capacity() {
            return Err(ComputeError::CapacityExceeded {
                resource,
                required: count,
                capacity: self.capacity(),
            });
        }
        self.items.read_back(0..count)
    }
}
