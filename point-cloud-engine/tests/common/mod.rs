#![allow(dead_code)]

use glam::{Vec3, Vec4};
use point_cloud_engine::PointCloudSnapshot;
use point_cloud_engine::compute::{ComputeDevice, DeviceDescriptor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn device() -> ComputeDevice {
    ComputeDevice::new(DeviceDescriptor {
        label: "test-device".to_string(),
        threads: Some(4),
        ..Default::default()
    })
    .expect("test device")
}

/// `count` points uniformly inside `[min, min + extent)`, coloured per point.
pub fn scattered(seed: u64, count: usize, min: Vec3, extent: f32) -> PointCloudSnapshot {
    let mut rng = StdRng::seed_from_u64(seed);
    PointCloudSnapshot::from_points((0..count).map(|_| {
        let offset = Vec3::new(
            rng.gen_range(0.0..extent),
            rng.gen_range(0.0..extent),
            rng.gen_range(0.0..extent),
        );
        let colour = Vec4::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), 1.0);
        (min + offset, colour)
    }))
}

/// Points as bit patterns, sorted, for order-independent comparison.
pub fn point_set(snapshot: &PointCloudSnapshot) -> Vec<[u32; 7]> {
    let mut points: Vec<[u32; 7]> = snapshot
        .iter()
        .map(|(p, c)| {
            [
                p.x.to_bits(),
                p.y.to_bits(),
                p.z.to_bits(),
                c.x.to_bits(),
                c.y.to_bits(),
                c.z.to_bits(),
                c.w.to_bits(),
            ]
        })
        .collect();
    points.sort_unstable();
    points
}
