mod common;

use common::{device, scattered};
use glam::{Vec3, Vec4};
use point_cloud_engine::compute::DeviceDescriptor;
use point_cloud_engine::settings::AccelerationSettings;
use point_cloud_engine::{Backend, Outcome, PointCloudPipeline, PointCloudSnapshot, SkipReason, ViewerSettings};

fn load(pipeline: &mut PointCloudPipeline, snapshot: PointCloudSnapshot) {
    pipeline.set_data(snapshot);
}

#[test]
fn zero_neighbour_threshold_keeps_every_point() {
    let mut settings = ViewerSettings::default();
    settings.processing.neighbor_threshold = 0;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap();
    load(&mut pipeline, scattered(1, 1_000, Vec3::ZERO, 1.0));

    let report = pipeline.apply_noise_filter().unwrap();
    assert_eq!(report.outcome, Outcome::Applied);
    assert_eq!(report.after, 1_000);
}

#[test]
fn isolated_point_is_removed_by_noise_filter() {
    let mut settings = ViewerSettings::default();
    settings.processing.neighbor_threshold = 5;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap();
    let mut snapshot = scattered(2, 200, Vec3::ZERO, 0.05);
    snapshot = snapshot.concat(&PointCloudSnapshot::with_uniform_colour(vec![Vec3::splat(10.0)], Vec4::ONE));
    load(&mut pipeline, snapshot);

    let report = pipeline.apply_noise_filter().unwrap();
    assert_eq!(report.before, 201);
    assert_eq!(report.after, 200);
    assert!(pipeline.snapshot().positions().iter().all(|p| p.x < 1.0));
}

#[test]
fn single_point_per_axis_adds_voxel_centre() {
    let mut settings = ViewerSettings::default();
    settings.processing.voxel_size = 1.0;
    settings.processing.complementation.density_threshold = 10;
    settings.processing.complementation.points_per_axis = 1;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap();
    load(&mut pipeline, scattered(3, 10, Vec3::ZERO, 0.9));

    let report = pipeline.apply_density_complementation().unwrap();
    assert_eq!(report.added(), 1);
    let added = pipeline.snapshot().positions()[10];
    assert!(added.abs_diff_eq(Vec3::splat(0.5), 1e-6));
}

#[test]
fn complementation_without_dense_voxels_is_skipped() {
    let mut settings = ViewerSettings::default();
    settings.processing.complementation.density_threshold = 50;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap();
    load(&mut pipeline, scattered(4, 20, Vec3::ZERO, 1.0));

    let report = pipeline.apply_density_complementation().unwrap();
    assert_eq!(report.outcome, Outcome::Skipped(SkipReason::NoQualifyingVoxels));
    assert_eq!(pipeline.snapshot().len(), 20);
}

#[test]
fn device_buffers_are_released_with_the_snapshot() {
    let mut settings = ViewerSettings::default();
    settings.acceleration = AccelerationSettings::all(Some(2));
    settings.processing.voxel_density_threshold = 2;
    settings.processing.neighbor_threshold = 3;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap().with_device(device());
    load(&mut pipeline, scattered(5, 2_000, Vec3::ZERO, 0.3));

    for report in [
        pipeline.apply_density_filter().unwrap(),
        pipeline.apply_noise_filter().unwrap(),
        pipeline.apply_morphology().unwrap(),
        pipeline.apply_density_complementation().unwrap(),
    ] {
        assert_eq!(report.backend, Backend::Device, "{}", report.operation);
    }
    pipeline.set_data(PointCloudSnapshot::empty());
    let live = pipeline.device().map(|device| device.live_buffers());
    assert_eq!(live, Some(0));
}

#[test]
fn unavailable_device_falls_back_to_cpu() {
    let mut settings = ViewerSettings::default();
    settings.acceleration.use_gpu_density_filter = true;
    settings.processing.voxel_density_threshold = 1;
    let mut pipeline = PointCloudPipeline::new(settings).unwrap();

    let attached = pipeline.try_attach_device(DeviceDescriptor {
        threads: Some(0),
        ..Default::default()
    });
    assert!(!attached);

    load(&mut pipeline, scattered(6, 50, Vec3::ZERO, 0.5));
    let report = pipeline.apply_density_filter().unwrap();
    assert_eq!(report.backend, Backend::Cpu);
    assert_eq!(report.after, 50);
}
