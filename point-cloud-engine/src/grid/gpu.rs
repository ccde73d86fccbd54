use super::VoxelIndex;
use crate::compute::{ComputeDevice, GpuPoint, StorageBuffer, workgroup_count};
use crate::error::ComputeError;
use crate::voxel::{VoxelCoord, next_prime};
use bytemuck::{Pod, Zeroable};
use constants::compute::{HASH_EMPTY, POINT_WORKGROUP_SIZE, VOXEL_WORKGROUP_SIZE};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{debug, error};

/// One occupied voxel in CSR form: members live at `point_indices[offset..offset + count]`.
///
/// `cursor` is the scatter write position, seeded at `offset` by the scan pass. After a
/// successful build it equals `offset + count`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct GpuVoxelRecord {
    pub coord: [i32; 3],
    pub count: u32,
    pub offset: u32,
    pub cursor: u32,
}

const COUNT_WORD: usize = 3;
const CURSOR_WORD: usize = 5;

const ALLOCATED_COUNTER: usize = 0;
const LIVE_COUNTER: usize = 1;

/// Device buffers owned by a built grid.
#[derive(Debug)]
struct GridBuffers {
    records: StorageBuffer<GpuVoxelRecord>,
    point_indices: StorageBuffer<u32>,
    hash_table: StorageBuffer<u32>,
    hash_chain: StorageBuffer<u32>,
    remap: StorageBuffer<u32>,
    counters: StorageBuffer<u32>,
}

/// Voxel grid built on a compute device with atomic allocation and chained hash buckets.
///
/// Capacity is sized for a maximum point count (one voxel per point in the worst case) and only
/// ever grows.
#[derive(Debug)]
pub struct GpuVoxelGrid {
    voxel_size: f32,
    capacity: usize,
    table_size: usize,
    buffers: Option<GridBuffers>,
    built: bool,
    voxel_count: usize,
    point_count: usize,
}

impl GpuVoxelGrid {
    pub fn new(voxel_size: f32) -> Self {
        Self {
            voxel_size,
            capacity: 0,
            table_size: 0,
            buffers: None,
            built: false,
            voxel_count: 0,
            point_count: 0,
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// Maximum point count the current buffers can index.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hash_table_size(&self) -> usize {
        self.table_size
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Sizes buffers for `max_points`. Existing buffers are kept when they are already large
    /// enough; a larger request releases them and allocates new ones.
    pub fn allocate(&mut self, device: &ComputeDevice, max_points: usize) -> Result<(), ComputeError> {
        if self.buffers.is_some() && max_points <= self.capacity {
            return Ok(());
        }
        self.release_buffers();

        let capacity = max_points.max(1);
        let table_size = next_prime(capacity.saturating_mul(2));
        let buffers = GridBuffers {
            records: device.create_buffer("voxel_records", capacity)?,
            point_indices: device.create_buffer("point_indices", capacity)?,
            hash_table: device.create_buffer("hash_table", table_size)?,
            hash_chain: device.create_buffer("hash_chain", capacity)?,
            remap: device.create_buffer("record_remap", capacity)?,
            counters: device.create_buffer("grid_counters", 2)?,
        };

        debug!(capacity, table_size, "voxel grid buffers allocated");
        self.buffers = Some(buffers);
        self.capacity = capacity;
        self.table_size = table_size;
        Ok(())
    }

    /// Drops every device buffer. The next build reallocates.
    pub fn release_buffers(&mut self) {
        if self.buffers.take().is_some() {
            debug!(capacity = self.capacity, "voxel grid buffers released");
        }
        self.capacity = 0;
        self.table_size = 0;
        self.built = false;
        self.voxel_count = 0;
        self.point_count = 0;
    }

    /// Builds the grid over the first `point_count` elements of `points`.
    ///
    /// Runs five kernels (clear table, clear records, build, scan, scatter) and verifies the
    /// result. Any inconsistency is a capacity error and leaves the grid unbuilt.
    pub fn build(
        &mut self,
        device: &ComputeDevice,
        points: &StorageBuffer<GpuPoint>,
        point_count: usize,
    ) -> Result<(), ComputeError> {
        if point_count > points.len() {
            return Err(ComputeError::CapacityExceeded {
                resource: "point buffer",
                required: point_count,
                capacity: points.len(),
            });
        }
        self.allocate(device, point_count)?;
        self.built = false;
        self.voxel_count = 0;
        self.point_count = 0;

        let Some(buffers) = self.buffers.as_ref() else {
            return Err(ComputeError::GridNotBuilt);
        };
        let capacity = self.capacity;
        let table_size = self.table_size;
        let voxel_size = self.voxel_size;

        clear_hash_table(device, buffers, table_size);
        clear_voxel_data(device, buffers, capacity);
        build_grid(device, buffers, points, point_count, voxel_size, table_size, capacity);
        scan_offsets(device, buffers, capacity, table_size);
        build_indices(device, buffers, points, point_count, voxel_size, table_size);

        let voxel_count = verify(buffers, capacity, point_count).inspect_err(|err| {
            error!(%err, point_count, capacity, "voxel grid build failed verification");
        })?;

        self.built = true;
        self.voxel_count = voxel_count;
        self.point_count = point_count;
        debug!(voxel_count, point_count, "voxel grid built on device");
        Ok(())
    }

    /// Borrowed access for kernels. Fails until a build succeeded.
    pub fn view(&self) -> Result<DeviceGridView<'_>, ComputeError> {
        let buffers = match (&self.buffers, self.built) {
            (Some(buffers), true) => buffers,
            _ => return Err(ComputeError::GridNotBuilt),
        };
        Ok(DeviceGridView {
            buffers,
            voxel_size: self.voxel_size,
            table_size: self.table_size,
            voxel_count: self.voxel_count,
            point_count: self.point_count,
        })
    }

    /// Copies the built layout back to the host.
    pub fn read_back(&self) -> Result<GpuGridLayout, ComputeError> {
        let view = self.view()?;
        let records = view.buffers.records.read_back(0..self.voxel_count)?;
        let point_indices = view.buffers.point_indices.read_back(0..self.point_count)?;
        let lookup = records
            .iter()
            .enumerate()
            .map(|(slot, record)| (VoxelCoord::from_array(record.coord), slot))
            .collect();
        Ok(GpuGridLayout {
            voxel_size: self.voxel_size,
            records,
            point_indices,
            lookup,
        })
    }
}

fn clear_hash_table(device: &ComputeDevice, buffers: &GridBuffers, table_size: usize) {
    let table = &buffers.hash_table;
    device.dispatch(
        "clear_hash_table",
        workgroup_count(table_size, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            if (id as usize) < table_size {
                table.store(id as usize, HASH_EMPTY);
            }
        },
    );
}

fn clear_voxel_data(device: &ComputeDevice, buffers: &GridBuffers, capacity: usize) {
    let GridBuffers {
        records,
        hash_chain,
        counters,
        ..
    } = buffers;
    counters.store(ALLOCATED_COUNTER, 0);
    counters.store(LIVE_COUNTER, 0);
    device.dispatch(
        "clear_voxel_data",
        workgroup_count(capacity, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            let slot = id as usize;
            if slot < capacity {
                records.store(slot, GpuVoxelRecord::zeroed());
                hash_chain.store(slot, HASH_EMPTY);
            }
        },
    );
}

fn bucket_of(coord: VoxelCoord, table_size: usize) -> usize {
    coord.spatial_hash() as usize % table_size
}

/// Walks the chain starting at `head` looking for `coord`.
fn probe_chain(buffers: &GridBuffers, head: u32, coord: VoxelCoord) -> Option<u32> {
    let mut cursor = head;
    while cursor != HASH_EMPTY {
        let record = buffers.records.load(cursor as usize);
        if record.coord == coord.to_array() {
            return Some(cursor);
        }
        cursor = buffers.hash_chain.word(cursor as usize, 0).load(Ordering::Acquire);
    }
    None
}

/// Per point: find or allocate the voxel record and count the point into it.
///
/// New records are spliced in at the bucket head with a compare-and-swap. A thread that loses
/// the race keeps its reserved slot across retries; if the retry then finds the coordinate, the
/// reserved slot is left unlinked with a zero count and removed by the scan pass.
fn build_grid(
    device: &ComputeDevice,
    buffers: &GridBuffers,
    points: &StorageBuffer<GpuPoint>,
    point_count: usize,
    voxel_size: f32,
    table_size: usize,
    capacity: usize,
) {
    let GridBuffers {
        records,
        hash_table,
        hash_chain,
        counters,
        ..
    } = buffers;

    device.dispatch(
        "build_grid",
        workgroup_count(point_count, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            if id as usize >= point_count {
                return;
            }
            let coord = VoxelCoord::from_position(points.load(id as usize).position(), voxel_size);
            let head_word = hash_table.word(bucket_of(coord, table_size), 0);
            let mut reserved: Option<u32> = None;

            loop {
                let head = head_word.load(Ordering::Acquire);
                if let Some(found) = probe_chain(buffers, head, coord) {
                    records
                        .word(found as usize, COUNT_WORD)
                        .fetch_add(1, Ordering::Relaxed);
                    if let Some(orphan) = reserved {
                        records.word(orphan as usize, COUNT_WORD).store(0, Ordering::Relaxed);
                    }
                    return;
                }

                let slot = match reserved {
                    Some(slot) => slot,
                    None => {
                        let slot = counters
                            .word(ALLOCATED_COUNTER, 0)
                            .fetch_add(1, Ordering::Relaxed);
                        if slot as usize >= capacity {
                            // Overflow is detected from the counter after the build.
                            return;
                        }
                        records.store(
                            slot as usize,
                            GpuVoxelRecord {
                                coord: coord.to_array(),
                                count: 1,
                                offset: 0,
                                cursor: 0,
                            },
                        );
                        reserved = Some(slot);
                        slot
                    }
                };

                hash_chain.word(slot as usize, 0).store(head, Ordering::Relaxed);
                if head_word
                    .compare_exchange(head, slot, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            }
        },
    );
}

/// Single invocation: prefix sum over record counts, compacting away orphaned records.
fn scan_offsets(device: &ComputeDevice, buffers: &GridBuffers, capacity: usize, table_size: usize) {
    let GridBuffers {
        records,
        hash_table,
        hash_chain,
        remap,
        counters,
        ..
    } = buffers;

    device.dispatch("scan_offsets", 1, 1, |_| {
        let allocated = (counters.load(ALLOCATED_COUNTER) as usize).min(capacity);
        let mut running = 0u32;
        let mut live = 0u32;

        for slot in 0..allocated {
            let mut record = records.load(slot);
            if record.count == 0 {
                remap.store(slot, HASH_EMPTY);
                continue;
            }
            remap.store(slot, live);
            record.offset = running;
            record.cursor = running;
            running = running.wrapping_add(record.count);
            records.store(live as usize, record);
            live += 1;
        }

        if live as usize != allocated {
            let remapped = |link: u32| if link == HASH_EMPTY { HASH_EMPTY } else { remap.load(link as usize) };
            // Targets never run ahead of the slot being read, so the rewrite is safe in place.
            for slot in 0..allocated {
                let target = remap.load(slot);
                if target != HASH_EMPTY {
                    let next = hash_chain.load(slot);
                    hash_chain.store(target as usize, remapped(next));
                }
            }
            for bucket in 0..table_size {
                let head = hash_table.load(bucket);
                hash_table.store(bucket, remapped(head));
            }
        }

        counters.store(LIVE_COUNTER, live);
    });
}

/// Per point: re-locate the voxel record and claim the next slot of its index range.
fn build_indices(
    device: &ComputeDevice,
    buffers: &GridBuffers,
    points: &StorageBuffer<GpuPoint>,
    point_count: usize,
    voxel_size: f32,
    table_size: usize,
) {
    let GridBuffers {
        records,
        point_indices,
        hash_table,
        ..
    } = buffers;

    device.dispatch(
        "build_indices",
        workgroup_count(point_count, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            if id as usize >= point_count {
                return;
            }
            let coord = VoxelCoord::from_position(points.load(id as usize).position(), voxel_size);
            let head = hash_table.load(bucket_of(coord, table_size));
            let Some(slot) = probe_chain(buffers, head, coord) else {
                return;
            };
            let position = records
                .word(slot as usize, CURSOR_WORD)
                .fetch_add(1, Ordering::Relaxed);
            if (position as usize) < point_count {
                point_indices.store(position as usize, id);
            }
        },
    );
}

/// Reads back counters and records and checks the CSR invariants. Returns the voxel count.
fn verify(buffers: &GridBuffers, capacity: usize, point_count: usize) -> Result<usize, ComputeError> {
    let counters = buffers.counters.read_back(0..2)?;
    let allocated = counters[ALLOCATED_COUNTER] as usize;
    if allocated > capacity {
        return Err(ComputeError::CapacityExceeded {
            resource: "voxel records",
            required: allocated,
            capacity,
        });
    }

    let live = counters[LIVE_COUNTER] as usize;
    let records = buffers.records.read_back(0..live)?;
    let total: u64 = records.iter().map(|r| r.count as u64).sum();
    if total != point_count as u64 {
        return Err(ComputeError::CountMismatch {
            resource: "points indexed by voxel records",
            expected: point_count,
            actual: total as usize,
        });
    }
    if let Some(record) = records
        .iter()
        .find(|r| r.cursor as u64 != r.offset as u64 + r.count as u64)
    {
        return Err(ComputeError::CountMismatch {
            resource: "voxel scatter cursor",
            expected: record.offset as usize + record.count as usize,
            actual: record.cursor as usize,
        });
    }
    Ok(live)
}

/// Borrowed, read-only view of a built device grid for use inside kernels.
#[derive(Debug, Clone, Copy)]
pub struct DeviceGridView<'a> {
    buffers: &'a GridBuffers,
    voxel_size: f32,
    table_size: usize,
    voxel_count: usize,
    point_count: usize,
}

impl DeviceGridView<'_> {
    pub fn record(&self, slot: usize) -> GpuVoxelRecord {
        self.buffers.records.load(slot)
    }

    pub fn point_index(&self, position: usize) -> u32 {
        self.buffers.point_indices.load(position)
    }
}

impl VoxelIndex for DeviceGridView<'_> {
    fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    fn point_count(&self) -> usize {
        self.point_count
    }

    fn voxel(&self, slot: usize) -> Option<(VoxelCoord, u32)> {
        (slot < self.voxel_count).then(|| {
            let record = self.record(slot);
            (VoxelCoord::from_array(record.coord), record.count)
        })
    }

    fn slot_of(&self, coord: VoxelCoord) -> Option<usize> {
        if self.table_size == 0 || self.voxel_count == 0 {
            return None;
        }
        let head = self.buffers.hash_table.load(bucket_of(coord, self.table_size));
        probe_chain(self.buffers, head, coord).map(|slot| slot as usize)
    }

    fn for_each_member(&self, slot: usize, mut visit: impl FnMut(u32)) {
        if slot >= self.voxel_count {
            return;
        }
        let record = self.record(slot);
        for position in record.offset..record.offset + record.count {
            visit(self.point_index(position as usize));
        }
    }
}

/// Host copy of a built device grid.
#[derive(Debug, Clone)]
pub struct GpuGridLayout {
    pub voxel_size: f32,
    pub records: Vec<GpuVoxelRecord>,
    pub point_indices: Vec<u32>,
    lookup: HashMap<VoxelCoord, usize>,
}

impl GpuGridLayout {
    pub fn members_of(&self, slot: usize) -> &[u32] {
        self.records.get(slot).map_or(&[], |record| {
            let start = record.offset as usize;
            let end = start + record.count as usize;
            self.point_indices.get(start..end).unwrap_or(&[])
        })
    }
}

impl VoxelIndex for GpuGridLayout {
    fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    fn voxel_count(&self) -> usize {
        self.records.len()
    }

    fn point_count(&self) -> usize {
        self.point_indices.len()
    }

    fn voxel(&self, slot: usize) -> Option<(VoxelCoord, u32)> {
        self.records
            .get(slot)
            .map(|record| (VoxelCoord::from_array(record.coord), record.count))
    }

    fn slot_of(&self, coord: VoxelCoord) -> Option<usize> {
        self.lookup.get(&coord).copied()
    }

    fn for_each_member(&self, slot: usize, visit: impl FnMut(u32)) {
        self.members_of(slot).iter().copied().for_each(visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{DeviceDescriptor, DevicePointCloud};
    use crate::grid::VoxelHashGrid;
    use crate::snapshot::PointCloudSnapshot;
    use glam::{Vec3, Vec4};

    fn device() -> ComputeDevice {
        ComputeDevice::new(DeviceDescriptor {
            threads: Some(8),
            ..Default::default()
        })
        .unwrap()
    }

    fn lattice(per_axis: usize, spacing: f32) -> PointCloudSnapshot {
        let mut positions = Vec::new();
        for x in 0..per_axis {
            for y in 0..per_axis {
                for z in 0..per_axis {
                    positions.push(Vec3::new(x as f32, y as f32, z as f32) * spacing + 0.001);
                }
            }
        }
        PointCloudSnapshot::with_uniform_colour(positions, Vec4::ONE)
    }

    #[test]
    fn layout_is_complete_and_matches_host_grid() {
        let device = device();
        let snapshot = lattice(12, 0.037);
        let cloud = DevicePointCloud::upload(&device, &snapshot).unwrap();

        let mut grid = GpuVoxelGrid::new(0.1);
        grid.build(&device, cloud.buffer(), cloud.len()).unwrap();
        let layout = grid.read_back().unwrap();
        let host = VoxelHashGrid::build(snapshot.positions(), 0.1);

        assert_eq!(layout.voxel_count(), host.voxel_count());
        let mut seen = layout.point_indices.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..snapshot.len() as u32).collect::<Vec<_>>());

        for (coord, members) in host.iter() {
            let mut device_members = layout.members(coord);
            device_members.sort_unstable();
            assert_eq!(device_members, members, "voxel {coord:?}");
        }
    }

    #[test]
    fn contended_single_voxel_yields_one_record() {
        let device = device();
        let snapshot = PointCloudSnapshot::with_uniform_colour(vec![Vec3::splat(0.01); 5000], Vec4::ONE);
        let cloud = DevicePointCloud::upload(&device, &snapshot).unwrap();

        let mut grid = GpuVoxelGrid::new(0.1);
        grid.build(&device, cloud.buffer(), cloud.len()).unwrap();
        let layout = grid.read_back().unwrap();

        assert_eq!(layout.records.len(), 1);
        assert_eq!(layout.records[0].count, 5000);
        assert_eq!(layout.records[0].cursor, 5000);
    }

    #[test]
    fn capacity_grows_but_never_shrinks() {
        let device = device();
        let mut grid = GpuVoxelGrid::new(0.1);
        grid.allocate(&device, 100).unwrap();
        assert_eq!(grid.capacity(), 100);
        assert_eq!(grid.hash_table_size(), 211);

        let small = DevicePointCloud::upload(&device, &lattice(3, 0.1)).unwrap();
        grid.build(&device, small.buffer(), small.len()).unwrap();
        assert_eq!(grid.capacity(), 100);

        let large = DevicePointCloud::upload(&device, &lattice(5, 0.1)).unwrap();
        grid.build(&device, large.buffer(), large.len()).unwrap();
        assert_eq!(grid.capacity(), 125);
        assert_eq!(grid.voxel_count(), 125);
    }

    #[test]
    fn release_returns_buffers_to_device() {
        let device = device();
        let cloud = DevicePointCloud::upload(&device, &lattice(4, 0.1)).unwrap();
        let mut grid = GpuVoxelGrid::new(0.1);
        grid.build(&device, cloud.buffer(), cloud.len()).unwrap();
        assert_eq!(device.live_buffers(), 7);

        grid.release_buffers();
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(grid.view().unwrap_err(), ComputeError::GridNotBuilt);
    }

    #[test]
    fn point_count_beyond_buffer_is_rejected() {
        let device = device();
        let cloud = DevicePointCloud::upload(&device, &lattice(2, 0.1)).unwrap();
        let mut grid = GpuVoxelGrid::new(0.1);
        let err = grid.build(&device, cloud.buffer(), 9).unwrap_err();
        assert!(matches!(err, ComputeError::CapacityExceeded { required: 9, capacity: 8, .. }));
        assert!(!grid.is_built());
    }

    #[test]
    fn empty_build_is_valid() {
        let device = device();
        let cloud = DevicePointCloud::upload(&device, &PointCloudSnapshot::empty()).unwrap();
        let mut grid = GpuVoxelGrid::new(0.1);
        grid.build(&device, cloud.buffer(), 0).unwrap();
        assert_eq!(grid.voxel_count(), 0);
        assert!(grid.read_back().unwrap().records.is_empty());
    }
}
