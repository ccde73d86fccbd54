use crate::error::ComputeError;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

const WORD_BYTES: usize = size_of::<u32>();

/// Live allocation counters shared by a device and every buffer it created.
#[derive(Debug, Default)]
pub(crate) struct AllocationLedger {
    buffers: AtomicUsize,
    bytes: AtomicU64,
}

impl AllocationLedger {
    fn acquire(&self, bytes: u64) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn release(&self, bytes: u64) {
        self.buffers.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn buffers(&self) -> usize {
        self.buffers.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Fixed-length device buffer of `T`, stored as 32-bit atomic words.
///
/// `load` and `store` move whole elements with relaxed ordering; cross-dispatch visibility comes
/// from the dispatch barrier. Kernels that race on a field go through [`StorageBuffer::word`].
pub struct StorageBuffer<T: Pod> {
    label: String,
    words: Box<[AtomicU32]>,
    len: usize,
    ledger: Arc<AllocationLedger>,
    _element: PhantomData<T>,
}

impl<T: Pod> StorageBuffer<T> {
    pub(crate) fn allocate(
        label: &str,
        len: usize,
        max_bytes: u64,
        ledger: Arc<AllocationLedger>,
    ) -> Result<Self, ComputeError> {
        let size = size_of::<T>();
        let align = align_of::<T>();
        if size == 0 || size % WORD_BYTES != 0 || align != WORD_BYTES {
            return Err(ComputeError::UnsupportedElement {
                label: label.to_string(),
                size,
                align,
            });
        }

        let requested = (len as u64).saturating_mul(size as u64);
        if requested > max_bytes {
            return Err(ComputeError::OutOfDeviceMemory {
                label: label.to_string(),
                requested,
                limit: max_bytes,
            });
        }

        let words = (0..len * Self::words_per_element())
            .map(|_| AtomicU32::new(0))
            .collect::<Box<[_]>>();
        ledger.acquire(requested);

        Ok(Self {
            label: label.to_string(),
            words,
            len,
            ledger,
            _element: PhantomData,
        })
    }

    const fn words_per_element() -> usize {
        size_of::<T>() / WORD_BYTES
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> u64 {
        (self.len * size_of::<T>()) as u64
    }

    /// Atomic view of word `word` of element `index`.
    ///
    /// Panics when out of range, like an unchecked shader access would fault.
    pub fn word(&self, index: usize, word: usize) -> &AtomicU32 {
        debug_assert!(word < Self::words_per_element());
        &self.words[index * Self::words_per_element() + word]
    }

    pub fn load(&self, index: usize) -> T {
        let mut value = T::zeroed();
        let dst: &mut [u32] = bytemuck::cast_slice_mut(std::slice::from_mut(&mut value));
        let start = index * Self::words_per_element();
        let len = dst.len();
        for (slot, word) in dst.iter_mut().zip(&self.words[start..start + len]) {
            *slot = word.load(Ordering::Relaxed);
        }
        value
    }

    pub fn store(&self, index: usize, value: T) {
        let src: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&value));
        let start = index * Self::words_per_element();
        for (word, &bits) in self.words[start..start + src.len()].iter().zip(src) {
            word.store(bits, Ordering::Relaxed);
        }
    }

    /// Host upload of `data` starting at element `offset`.
    pub fn write(&self, offset: usize, data: &[T]) -> Result<(), ComputeError> {
        let end = self.checked_range(offset..offset.saturating_add(data.len()))?.end;
        for (index, value) in (offset..end).zip(data) {
            self.store(index, *value);
        }
        Ok(())
    }

    /// Copies `range` back to the host. Never truncates: an out-of-range request is an error.
    pub fn read_back(&self, range: Range<usize>) -> Result<Vec<T>, ComputeError> {
        let range = self.checked_range(range)?;
        Ok(range.map(|index| self.load(index)).collect())
    }

    pub fn read_all(&self) -> Result<Vec<T>, ComputeError> {
        self.read_back(0..self.len)
    }

    /// Releases the buffer now instead of at end of scope.
    pub fn release(self) {}

    fn checked_range(&self, range: Range<usize>) -> Result<Range<usize>, ComputeError> {
        if range.start > range.end || range.end > self.len {
            return Err(ComputeError::ReadbackOutOfBounds {
                label: self.label.clone(),
                start: range.start,
                end: range.end,
                len: self.len,
            });
        }
        Ok(range)
    }
}

impl<T: Pod> Drop for StorageBuffer<T> {
    fn drop(&mut self) {
        self.ledger.release(self.size_bytes());
    }
}

impl<T: Pod> std::fmt::Debug for StorageBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("label", &self.label)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::compute::{ComputeDevice, DeviceDescriptor};
    use crate::error::ComputeError;

    #[test]
    fn rejects_unaligned_element_types() {
        let device = ComputeDevice::new(DeviceDescriptor::default()).unwrap();
        let err = device.create_buffer::<u8>("bytes", 4).unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedElement { size: 1, .. }));
        let err = device.create_buffer::<u64>("wide", 4).unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedElement { align: 8, .. }));
    }

    #[test]
    fn typed_round_trip_through_words() {
        let device = ComputeDevice::new(DeviceDescriptor::default()).unwrap();
        let buffer = device
            .create_buffer_init("pairs", &[[1.5f32, -2.0], [0.25, 8.0]])
            .unwrap();
        assert_eq!(buffer.load(1), [0.25, 8.0]);

        buffer.store(0, [3.0, 4.0]);
        assert_eq!(buffer.read_all().unwrap(), vec![[3.0, 4.0], [0.25, 8.0]]);
    }

    #[test]
    fn load_reads_every_word_of_a_wide_element() {
        let device = ComputeDevice::new(DeviceDescriptor::default()).unwrap();
        let rows = [[1u32, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]];
        let buffer = device.create_buffer_init("rows", &rows).unwrap();

        assert_eq!(buffer.load(2), [9, 10, 11, 12]);
        assert_eq!(buffer.load(0), [1, 2, 3, 4]);
        assert_eq!(buffer.read_back(1..3).unwrap(), rows[1..].to_vec());
    }

    #[test]
    fn read_back_past_end_is_an_error() {
        let device = ComputeDevice::new(DeviceDescriptor::default()).unwrap();
        let buffer = device.create_buffer::<u32>("small", 3).unwrap();

        let err = buffer.read_back(1..5).unwrap_err();
        assert_eq!(
            err,
            ComputeError::ReadbackOutOfBounds {
                label: "small".to_string(),
                start: 1,
                end: 5,
                len: 3
            }
        );
        assert!(buffer.write(2, &[1, 2]).is_err());
        assert_eq!(buffer.read_back(3..3).unwrap(), Vec::<u32>::new());
    }
}
