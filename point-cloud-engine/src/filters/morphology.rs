/// Iterative erosion followed by dilation over the voxel occupancy of a point set.
use super::AppendBuffer;
use super::placement::{Placement, place_points, points_per_voxel};
use crate::compute::point::{snapshot_from_gpu_points, snapshot_to_gpu_points};
use crate::compute::{ComputeDevice, GpuPoint, StorageBuffer, workgroup_count};
use crate::error::ComputeError;
use crate::grid::{GpuVoxelGrid, VoxelHashGrid, VoxelIndex};
use crate::snapshot::PointCloudSnapshot;
use crate::voxel::VoxelCoord;
use constants::compute::{
    MORPHOLOGY_GROWTH_FACTOR, MORPHOLOGY_INITIAL_CAPACITY_FACTOR, POINT_WORKGROUP_SIZE, VOXEL_WORKGROUP_SIZE,
};
use constants::processing::FACE_OFFSETS;
use glam::Vec4;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphologyParams {
    pub voxel_size: f32,
    pub erosion_iterations: u32,
    pub dilation_iterations: u32,
    /// Occupied face neighbours a voxel needs to survive erosion.
    pub erosion_neighbor_threshold: u32,
    /// Points synthesised per axis in every dilated voxel.
    pub points_per_axis: u32,
    pub placement: Placement,
}

impl MorphologyParams {
    pub fn total_iterations(&self) -> u32 {
        self.erosion_iterations.saturating_add(self.dilation_iterations)
    }

    fn step(&self, iteration: u32) -> Step {
        if iteration < self.erosion_iterations {
            Step::Erode
        } else {
            Step::Dilate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Erode,
    Dilate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphologyOutcome {
    pub snapshot: PointCloudSnapshot,
    pub iterations_run: u32,
    /// The point set emptied before the last iteration and the rest were skipped.
    pub stopped_early: bool,
}

/// A voxel survives erosion when enough of its face neighbours are occupied.
fn survives_erosion(grid: &impl VoxelIndex, coord: VoxelCoord, threshold: u32) -> bool {
    grid.occupied_face_neighbors(coord) >= threshold
}

/// First occupied face neighbour of `target` in canonical order.
fn canonical_owner(grid: &impl VoxelIndex, target: VoxelCoord) -> Option<VoxelCoord> {
    FACE_OFFSETS
        .iter()
        .map(|&delta| target.offset_by(delta))
        .find(|&neighbor| grid.contains(neighbor))
}

/// Empty face neighbours of `owner` that `owner` is responsible for filling.
///
/// Each empty voxel adjacent to the set has exactly one owner, so parallel owners never
/// synthesise the same voxel twice.
fn dilation_targets(grid: &impl VoxelIndex, owner: VoxelCoord, mut visit: impl FnMut(VoxelCoord)) {
    for delta in FACE_OFFSETS {
        let target = owner.offset_by(delta);
        if !grid.contains(target) && canonical_owner(grid, target) == Some(owner) {
            visit(target);
        }
    }
}

/// Runs `erosion_iterations` erosions then `dilation_iterations` dilations on the host.
pub fn morphology_cpu(snapshot: &PointCloudSnapshot, params: &MorphologyParams) -> MorphologyOutcome {
    let mut current = snapshot.clone();
    let total = params.total_iterations();

    for iteration in 0..total {
        if current.is_empty() {
            info!(iteration, total, "morphology stopped early, no points left");
            return MorphologyOutcome {
                snapshot: current,
                iterations_run: iteration,
                stopped_early: true,
            };
        }
        let grid = VoxelHashGrid::build(current.positions(), params.voxel_size);
        current = match params.step(iteration) {
            Step::Erode => erode_cpu(&current, &grid, params.erosion_neighbor_threshold),
            Step::Dilate => dilate_cpu(&current, &grid, params, params.placement.for_round(iteration)),
        };
        debug!(iteration, points = current.len(), "morphology step complete");
    }

    MorphologyOutcome {
        snapshot: current,
        iterations_run: total,
        stopped_early: false,
    }
}

fn erode_cpu(snapshot: &PointCloudSnapshot, grid: &VoxelHashGrid, threshold: u32) -> PointCloudSnapshot {
    let surviving: Vec<bool> = grid
        .iter()
        .map(|(coord, _)| survives_erosion(grid, coord, threshold))
        .collect();

    let keep: Vec<u32> = snapshot
        .positions()
        .iter()
        .enumerate()
        .filter(|(_, position)| {
            let coord = VoxelCoord::from_position(**position, grid.voxel_size());
            grid.slot_of(coord).is_some_and(|slot| surviving[slot])
        })
        .map(|(index, _)| index as u32)
        .collect();
    snapshot.select(&keep)
}

fn dilate_cpu(
    snapshot: &PointCloudSnapshot,
    grid: &VoxelHashGrid,
    params: &MorphologyParams,
    placement: Placement,
) -> PointCloudSnapshot {
    let mut synthesised = Vec::new();
    for (owner, members) in grid.iter() {
        let colour = mean_colour(members.iter().map(|&i| snapshot.colours()[i as usize]));
        dilation_targets(grid, owner, |target| {
            place_points(target, grid.voxel_size(), params.points_per_axis, placement, |_, p| {
                synthesised.push((p, colour));
            });
        });
    }
    snapshot.concat(&PointCloudSnapshot::from_points(synthesised))
}

fn mean_colour(colours: impl Iterator<Item = Vec4>) -> Vec4 {
    let (sum, count) = colours.fold((Vec4::ZERO, 0u32), |(sum, count), c| (sum + c, count + 1));
    if count == 0 { Vec4::ONE } else { sum / count as f32 }
}

/// Two equally sized point buffers whose roles swap after every step.
struct PingPong {
    buffers: [StorageBuffer<GpuPoint>; 2],
    current: usize,
}

impl PingPong {
    fn new(device: &ComputeDevice, capacity: usize) -> Result<Self, ComputeError> {
        Ok(Self {
            buffers: [
                device.create_buffer("morphology_a", capacity)?,
                device.create_buffer("morphology_b", capacity)?,
            ],
            current: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.buffers[0].len()
    }

    fn current(&self) -> &StorageBuffer<GpuPoint> {
        &self.buffers[self.current]
    }

    fn next(&self) -> &StorageBuffer<GpuPoint> {
        &self.buffers[1 - self.current]
    }

    fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Replaces both buffers with larger ones, carrying the first `live` points of the current
    /// buffer forward. The old buffers are released when replaced.
    fn grow(&mut self, device: &ComputeDevice, capacity: usize, live: usize) -> Result<(), ComputeError> {
        let grown = Self::new(device, capacity)?;
        let (source, target) = (self.current(), grown.current());
        device.dispatch(
            "blit",
            workgroup_count(live, POINT_WORKGROUP_SIZE),
            POINT_WORKGROUP_SIZE,
            |id| {
                if (id as usize) < live {
                    target.store(id as usize, source.load(id as usize));
                }
            },
        );
        *self = grown;
        Ok(())
    }
}

/// Device variant with double buffering and geometric buffer growth.
///
/// Buffers start at ten times the input size. When a dilation would overflow them, both are
/// reallocated at twice the required size before the merge. The grid and every buffer are
/// released when the function returns, on every path.
pub fn morphology_gpu(
    device: &ComputeDevice,
    snapshot: &PointCloudSnapshot,
    params: &MorphologyParams,
) -> Result<MorphologyOutcome, ComputeError> {
    let total = params.total_iterations();
    if snapshot.is_empty() || total == 0 {
        return Ok(MorphologyOutcome {
            snapshot: snapshot.clone(),
            iterations_run: 0,
            stopped_early: snapshot.is_empty() && total > 0,
        });
    }

    let mut capacity = snapshot.len() * MORPHOLOGY_INITIAL_CAPACITY_FACTOR;
    let mut buffers = PingPong::new(device, capacity)?;
    buffers.current().write(0, &snapshot_to_gpu_points(snapshot))?;
    let mut side = AppendBuffer::new(device, "dilation_points", capacity)?;
    let counter = device.create_buffer::<u32>("erosion_counter", 1)?;
    let mut grid = GpuVoxelGrid::new(params.voxel_size);
    grid.allocate(device, capacity)?;

    let mut live = snapshot.len();
    for iteration in 0..total {
        if live == 0 {
            info!(iteration, total, "morphology stopped early, no points left");
            return Ok(MorphologyOutcome {
                snapshot: PointCloudSnapshot::empty(),
                iterations_run: iteration,
                stopped_early: true,
            });
        }
        grid.build(device, buffers.current(), live)?;

        match params.step(iteration) {
            Step::Erode => {
                counter.store(0, 0);
                erode_gpu(device, &grid, buffers.current(), buffers.next(), &counter, params)?;
                live = counter.load(0) as usize;
                if live > buffers.capacity() {
                    return Err(ComputeError::CapacityExceeded {
                        resource: "erosion output",
                        required: live,
                        capacity: buffers.capacity(),
                    });
                }
            }
            Step::Dilate => {
                let placement = params.placement.for_round(iteration);
                let added = loop {
                    side.reset();
                    dilate_gpu(device, &grid, buffers.current(), &side, params, placement)?;
                    let appended = side.len();
                    if appended <= side.capacity() {
                        break appended;
                    }
                    let grown = appended * MORPHOLOGY_GROWTH_FACTOR;
                    warn!(from = side.capacity(), to = grown, "dilation side buffer overflow, growing and retrying");
                    side = AppendBuffer::new(device, "dilation_points", grown)?;
                };

                let required = live + added;
                if required > buffers.capacity() {
                    capacity = required * MORPHOLOGY_GROWTH_FACTOR;
                    warn!(from = buffers.capacity(), to = capacity, "morphology buffers exceeded, growing");
                    buffers.grow(device, capacity, live)?;
                    grid.allocate(device, capacity)?;
                }
                merge(device, buffers.current(), buffers.next(), &side.items, live, added);
                live = required;
            }
        }
        buffers.swap();
        debug!(iteration, points = live, "morphology step complete");
    }

    Ok(MorphologyOutcome {
        snapshot: snapshot_from_gpu_points(&buffers.current().read_back(0..live)?),
        iterations_run: total,
        stopped_early: false,
    })
}

/// Per voxel: copy all members of a surviving voxel into `output`.
fn erode_gpu(
    device: &ComputeDevice,
    grid: &GpuVoxelGrid,
    input: &StorageBuffer<GpuPoint>,
    output: &StorageBuffer<GpuPoint>,
    counter: &StorageBuffer<u32>,
    params: &MorphologyParams,
) -> Result<(), ComputeError> {
    let view = grid.view()?;
    let voxel_count = view.voxel_count();
    device.dispatch(
        "erosion",
        workgroup_count(voxel_count, VOXEL_WORKGROUP_SIZE),
        VOXEL_WORKGROUP_SIZE,
        |id| {
            if id as usize >= voxel_count {
                return;
            }
            let record = view.record(id as usize);
            if !survives_erosion(&view, VoxelCoord::from_array(record.coord), params.erosion_neighbor_threshold) {
                return;
            }
            let base = counter.word(0, 0).fetch_add(record.count, Ordering::Relaxed);
            for k in 0..record.count {
                let slot = (base + k) as usize;
                if slot < output.len() {
                    let index = view.point_index((record.offset + k) as usize);
                    output.store(slot, input.load(index as usize));
                }
            }
        },
    );
    Ok(())
}

/// Per voxel: synthesise points into every empty face neighbour this voxel owns.
fn dilate_gpu(
    device: &ComputeDevice,
    grid: &GpuVoxelGrid,
    points: &StorageBuffer<GpuPoint>,
    side: &AppendBuffer,
    params: &MorphologyParams,
    placement: Placement,
) -> Result<(), ComputeError> {
    let view = grid.view()?;
    let voxel_count = view.voxel_count();
    let per_voxel = points_per_voxel(params.points_per_axis);
    let voxel_size = view.voxel_size();
    device.dispatch(
        "dilation",
        workgroup_count(voxel_count, VOXEL_WORKGROUP_SIZE),
        VOXEL_WORKGROUP_SIZE,
        |id| {
            if id as usize >= voxel_count || per_voxel == 0 {
                return;
            }
            let slot = id as usize;
            let owner = VoxelCoord::from_array(view.record(slot).coord);
            let mut targets = [VoxelCoord::ORIGIN; FACE_OFFSETS.len()];
            let mut target_count = 0;
            dilation_targets(&view, owner, |target| {
                targets[target_count] = target;
                target_count += 1;
            });
            if target_count == 0 {
                return;
            }

            let mut colours = Vec::new();
            view.for_each_member(slot, |index| colours.push(points.load(index as usize).colour()));
            let colour = mean_colour(colours.into_iter());

            let base = side.reserve(target_count as u32 * per_voxel);
            for (i, &target) in targets[..target_count].iter().enumerate() {
                let first = base + i as u32 * per_voxel;
                place_points(target, voxel_size, params.points_per_axis, placement, |k, p| {
                    side.put(first + k, GpuPoint::new(p, colour));
                });
            }
        },
    );
    Ok(())
}

/// `output = current[..live] ++ side[..added]`.
fn merge(
    device: &ComputeDevice,
    current: &StorageBuffer<GpuPoint>,
    output: &StorageBuffer<GpuPoint>,
    side: &StorageBuffer<GpuPoint>,
    live: usize,
    added: usize,
) {
    let total = live + added;
    device.dispatch(
        "merge",
        workgroup_count(total, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            let index = id as usize;
            if index < live {
                output.store(index, current.load(index));
            } else if index < total {
                output.store(index, side.load(index - live));
            }
        },
    );
}
