use super::{ComputeDevice, StorageBuffer};
use crate::error::ComputeError;
use crate::snapshot::PointCloudSnapshot;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuPoint {
    /// xyz + w = 1
    pub position: [f32; 4],
    pub colour: [f32; 4],
}

impl GpuPoint {
    pub fn new(position: Vec3, colour: Vec4) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            colour: colour.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn colour(&self) -> Vec4 {
        Vec4::from_array(self.colour)
    }
}

pub fn snapshot_to_gpu_points(snapshot: &PointCloudSnapshot) -> Vec<GpuPoint> {
    snapshot
        .iter()
        .map(|(position, colour)| GpuPoint::new(position, colour))
        .collect()
}

pub fn snapshot_from_gpu_points(points: &[GpuPoint]) -> PointCloudSnapshot {
    PointCloudSnapshot::from_points(points.iter().map(|p| (p.position(), p.colour())))
}

/// A snapshot uploaded to the device.
///
/// `len` is the number of live points, the buffer may be larger.
#[derive(Debug)]
pub struct DevicePointCloud {
    points: StorageBuffer<GpuPoint>,
    len: usize,
}

impl DevicePointCloud {
    pub fn upload(device: &ComputeDevice, snapshot: &PointCloudSnapshot) -> Result<Self, ComputeError> {
        let points = device.create_buffer_init("points", &snapshot_to_gpu_points(snapshot))?;
        Ok(Self {
            len: snapshot.len(),
            points,
        })
    }

    /// Wraps an existing buffer whose first `len` elements are live.
    pub fn from_buffer(points: StorageBuffer<GpuPoint>, len: usize) -> Result<Self, ComputeError> {
        if len > points.len() {
            return Err(ComputeError::CapacityExceeded {
                resource: "point buffer",
                required: len,
                capacity: points.len(),
            });
        }
        Ok(Self { points, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer(&self) -> &StorageBuffer<GpuPoint> {
        &self.points
    }

    pub fn download(&self) -> Result<PointCloudSnapshot, ComputeError> {
        Ok(snapshot_from_gpu_points(&self.points.read_back(0..self.len)?))
    }
}
