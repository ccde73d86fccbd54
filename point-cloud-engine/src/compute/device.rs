use super::buffer::{AllocationLedger, StorageBuffer};
use crate::error::ComputeError;
use bytemuck::Pod;
use constants::compute::DEFAULT_MAX_BUFFER_BYTES;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Creation parameters for a [`ComputeDevice`].
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub label: String,
    /// Worker threads, `None` picks one per logical core.
    pub threads: Option<usize>,
    /// Largest single allocation the device accepts.
    pub max_buffer_bytes: u64,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            label: "point-cloud-compute".to_string(),
            threads: None,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

/// Executes kernels over a dedicated worker pool and hands out storage buffers.
pub struct ComputeDevice {
    label: String,
    pool: rayon::ThreadPool,
    ledger: Arc<AllocationLedger>,
    max_buffer_bytes: u64,
}

impl ComputeDevice {
    /// Creates the device and its worker pool.
    /// A zero thread count or a pool that cannot be spawned means no device is available.
    pub fn new(descriptor: DeviceDescriptor) -> Result<Self, ComputeError> {
        if descriptor.threads == Some(0) {
            return Err(ComputeError::DeviceUnavailable(format!(
                "`{}` requested zero worker threads",
                descriptor.label
            )));
        }

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("compute-worker-{index}"));
        if let Some(threads) = descriptor.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| ComputeError::DeviceUnavailable(err.to_string()))?;

        info!(
            device = %descriptor.label,
            threads = pool.current_num_threads(),
            "compute device ready"
        );

        Ok(Self {
            label: descriptor.label,
            pool,
            ledger: Arc::new(AllocationLedger::default()),
            max_buffer_bytes: descriptor.max_buffer_bytes,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Buffers currently allocated and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.ledger.buffers()
    }

    pub fn live_bytes(&self) -> u64 {
        self.ledger.bytes()
    }

    /// Allocates a zero-initialised buffer of `len` elements.
    pub fn create_buffer<T: Pod>(&self, label: &str, len: usize) -> Result<StorageBuffer<T>, ComputeError> {
        StorageBuffer::allocate(label, len, self.max_buffer_bytes, Arc::clone(&self.ledger))
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn create_buffer_init<T: Pod>(&self, label: &str, data: &[T]) -> Result<StorageBuffer<T>, ComputeError> {
        let buffer = self.create_buffer(label, data.len())?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Runs `kernel` once for every id in `0..workgroups * workgroup_size` and blocks until all
    /// invocations have returned.
    pub fn dispatch<F>(&self, label: &str, workgroups: u32, workgroup_size: u32, kernel: F)
    where
        F: Fn(u32) + Sync + Send,
    {
        let invocations = workgroups.saturating_mul(workgroup_size);
        debug!(kernel = label, workgroups, workgroup_size, "dispatch");
        if invocations == 0 {
            return;
        }
        self.pool
            .install(|| (0..invocations).into_par_iter().for_each(|id| kernel(id)));
    }
}

impl std::fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("label", &self.label)
            .field("threads", &self.threads())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

/// Workgroups needed to cover `items` invocations.
pub fn workgroup_count(items: usize, workgroup_size: u32) -> u32 {
    let size = workgroup_size.max(1) as usize;
    u32::try_from(items.div_ceil(size)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn device() -> ComputeDevice {
        ComputeDevice::new(DeviceDescriptor {
            threads: Some(4),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn zero_threads_is_unavailable() {
        let err = ComputeDevice::new(DeviceDescriptor {
            threads: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn dispatch_covers_every_invocation_once() {
        let device = device();
        let hits = device.create_buffer::<u32>("hits", 1000).unwrap();

        device.dispatch("mark", workgroup_count(1000, 64), 64, |id| {
            if id as usize >= hits.len() {
                return;
            }
            hits.word(id as usize, 0).fetch_add(1, Ordering::Relaxed);
        });

        assert!(hits.read_all().unwrap().iter().all(|&h| h == 1));
    }

    #[test]
    fn ledger_tracks_release() {
        let device = device();
        let a = device.create_buffer::<u32>("a", 16).unwrap();
        let b = device.create_buffer::<[f32; 4]>("b", 4).unwrap();
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.live_bytes(), 64 + 64);

        drop(a);
        assert_eq!(device.live_buffers(), 1);
        b.release();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn allocation_limit_is_enforced() {
        let device = ComputeDevice::new(DeviceDescriptor {
            threads: Some(1),
            max_buffer_bytes: 128,
            ..Default::default()
        })
        .unwrap();

        assert!(device.create_buffer::<u32>("fits", 32).is_ok());
        let err = device.create_buffer::<u32>("too_big", 33).unwrap_err();
        assert!(matches!(err, ComputeError::OutOfDeviceMemory { requested: 132, .. }));
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count(0, 64), 0);
        assert_eq!(workgroup_count(64, 64), 1);
        assert_eq!(workgroup_count(65, 64), 2);
    }
}
