//! Lock-free SPSC sample queue in shared memory
//!
//! One writer and one reader exchange fixed-size samples through a ring of
//! `queue_len` slots. Each slot holds a sequence number, a value count and
//! room for `sample_len` `f64` values.
//!
//! # Design
//! - Writer: check space -> fill slot -> publish `write_idx` (Release)
//! - Reader: observe `write_idx` (Acquire) -> copy slot -> release `read_idx`

use crate::error::{Result, ShmemError};
use crate::shm::ShmRegion;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic number for queue validation
const QUEUE_MAGIC: u32 = 0x5653_484D; // "VSHM"
const QUEUE_VERSION: u32 = 1;

/// Cache line size
const CACHE_LINE_SIZE: usize = 64;

#[inline(always)]
const fn align_up(size: usize) -> usize {
    (size + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
}

/// Padding to cache line
#[repr(C, align(64))]
struct CachePadded<T>(T);

/// Queue header stored at the beginning of shared memory
#[repr(C)]
struct QueueHeader {
    magic: u32,
    version: u32,
    queue_len: u64,
    sample_len: u64,
    slot_stride: u64,
    /// Non-zero once the writer has gone away
    closed: AtomicU32,
    /// Next sequence number to be written
    write_idx: CachePadded<AtomicU64>,
    /// Next sequence number to be read
    read_idx: CachePadded<AtomicU64>,
}

/// Per-slot header, followed by `sample_len` values
#[repr(C)]
struct SlotHeader {
    sequence: u64,
    len: u64,
}

const SLOT_HEADER_SIZE: usize = std::mem::size_of::<SlotHeader>();

/// One frame of signal values
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Position of the sample in the queue's history, starting at 0
    pub sequence: u64,
    pub values: Vec<f64>,
}

/// Handle on a sample queue mapped from shared memory
///
/// `push` and `pop` update the indices without locking, so a handle may move
/// between threads but is never shared by them:
///
/// ```compile_fail
/// fn shared<T: Sync>() {}
/// shared::<villas_shmem::queue::SampleQueue>();
/// ```
pub struct SampleQueue {
    shm: ShmRegion,
    header: *mut QueueHeader,
    slots: *mut u8,
    queue_len: usize,
    sample_len: usize,
    slot_stride: usize,
}

// SAFETY: the mapping stays valid wherever the handle goes. No Sync: each
// handle is one end of the queue and the raw pointers keep it !Sync
unsafe impl Send for SampleQueue {}

impl SampleQueue {
    /// Bytes needed for a queue of the given shape, `None` if it overflows
    pub fn size_for(queue_len: usize, sample_len: usize) -> Option<usize> {
        queue_len
            .checked_mul(Self::stride_for(sample_len)?)?
            .checked_add(align_up(std::mem::size_of::<QueueHeader>()))
    }

    fn stride_for(sample_len: usize) -> Option<usize> {
        let size = sample_len
            .checked_mul(std::mem::size_of::<f64>())?
            .checked_add(SLOT_HEADER_SIZE + CACHE_LINE_SIZE - 1)?;
        Some(size & !(CACHE_LINE_SIZE - 1))
    }

    /// Create and initialize a queue region, owned by this handle
    pub fn create(name: &str, queue_len: usize, sample_len: usize) -> Result<Self> {
        if queue_len == 0 {
            return Err(ShmemError::InvalidQueueLength);
        }
        let (Some(size), Some(slot_stride)) =
            (Self::size_for(queue_len, sample_len), Self::stride_for(sample_len))
        else {
            return Err(ShmemError::QueueTooLarge { queue_len, sample_len });
        };

        let shm = ShmRegion::create(name, size)?;
        let header = shm.as_ptr() as *mut QueueHeader;

        // Region is zeroed, so indices and the closed flag start at 0
        unsafe {
            (*header).version = QUEUE_VERSION;
            (*header).queue_len = queue_len as u64;
            (*header).sample_len = sample_len as u64;
            (*header).slot_stride = slot_stride as u64;
            std::sync::atomic::fence(Ordering::Release);
            std::ptr::write_volatile(&mut (*header).magic, QUEUE_MAGIC);
        }

        tracing::debug!(channel = name, queue_len, sample_len, "created sample queue");

        Ok(Self::from_region(shm, queue_len, sample_len, slot_stride))
    }

    /// Attach to a queue created by another handle or process
    pub fn attach(name: &str) -> Result<Self> {
        let shm = ShmRegion::open(name)?;
        if shm.size() < std::mem::size_of::<QueueHeader>() {
            return Err(truncated(name));
        }

        let header = shm.as_ptr() as *const QueueHeader;
        let (queue_len, sample_len, slot_stride) = unsafe {
            let magic = std::ptr::read_volatile(&(*header).magic);
            if magic != QUEUE_MAGIC {
                return Err(ShmemError::InvalidMagic {
                    expected: QUEUE_MAGIC,
                    got: magic,
                });
            }
            std::sync::atomic::fence(Ordering::Acquire);

            let version = (*header).version;
            if version != QUEUE_VERSION {
                return Err(ShmemError::VersionMismatch {
                    expected: QUEUE_VERSION,
                    got: version,
                });
            }

            (
                (*header).queue_len,
                (*header).sample_len,
                (*header).slot_stride,
            )
        };

        // The header comes from another process; trust none of it
        let (Ok(queue_len), Ok(sample_len), Ok(slot_stride)) = (
            usize::try_from(queue_len),
            usize::try_from(sample_len),
            usize::try_from(slot_stride),
        ) else {
            return Err(truncated(name));
        };
        let fits = Self::size_for(queue_len, sample_len).is_some_and(|size| shm.size() >= size);
        if queue_len == 0 || Self::stride_for(sample_len) != Some(slot_stride) || !fits {
            return Err(truncated(name));
        }

        tracing::debug!(channel = name, queue_len, sample_len, "attached sample queue");

        Ok(Self::from_region(shm, queue_len, sample_len, slot_stride))
    }

    fn from_region(shm: ShmRegion, queue_len: usize, sample_len: usize, slot_stride: usize) -> Self {
        let header = shm.as_ptr() as *mut QueueHeader;
        let slots = unsafe { shm.as_ptr().add(align_up(std::mem::size_of::<QueueHeader>())) };
        Self {
            shm,
            header,
            slots,
            queue_len,
            sample_len,
            slot_stride,
        }
    }

    #[inline(always)]
    fn header(&self) -> &QueueHeader {
        unsafe { &*self.header }
    }

    #[inline(always)]
    fn slot(&self, seq: u64) -> *mut SlotHeader {
        let idx = (seq % self.queue_len as u64) as usize;
        unsafe { self.slots.add(idx * self.slot_stride) as *mut SlotHeader }
    }

    /// Push one sample (writer side only)
    ///
    /// Returns the sequence number assigned to the sample.
    #[inline]
    pub fn push(&self, values: &[f64]) -> Result<u64> {
        if values.len() > self.sample_len {
            return Err(ShmemError::BufferOverflow {
                max: self.sample_len,
                got: values.len(),
            });
        }

        let header = self.header();
        let write = header.write_idx.0.load(Ordering::Relaxed);
        let read = header.read_idx.0.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.queue_len as u64 {
            return Err(ShmemError::QueueFull);
        }

        let slot = self.slot(write);
        unsafe {
            (*slot).sequence = write;
            (*slot).len = values.len() as u64;
            let data = (slot as *mut u8).add(SLOT_HEADER_SIZE) as *mut f64;
            std::ptr::copy_nonoverlapping(values.as_ptr(), data, values.len());
        }

        header.write_idx.0.store(write + 1, Ordering::Release);
        Ok(write)
    }

    /// Pop one sample into `buf` without allocating (reader side only)
    ///
    /// Returns `Some((sequence, len))`; values beyond `buf.len()` are dropped.
    #[inline]
    pub fn pop_into(&self, buf: &mut [f64]) -> Option<(u64, usize)> {
        let header = self.header();
        let read = header.read_idx.0.load(Ordering::Relaxed);
        let write = header.write_idx.0.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        let slot = self.slot(read);
        let result = unsafe {
            let sequence = (*slot).sequence;
            let len = ((*slot).len as usize).min(self.sample_len);
            let copy_len = len.min(buf.len());
            let data = (slot as *const u8).add(SLOT_HEADER_SIZE) as *const f64;
            std::ptr::copy_nonoverlapping(data, buf.as_mut_ptr(), copy_len);
            (sequence, len)
        };

        header.read_idx.0.store(read + 1, Ordering::Release);
        Some(result)
    }

    /// Pop one sample (reader side only)
    pub fn pop(&self) -> Option<Sample> {
        let mut values = vec![0.0; self.sample_len];
        let (sequence, len) = self.pop_into(&mut values)?;
        values.truncate(len);
        Some(Sample { sequence, values })
    }

    /// Number of samples waiting to be read
    #[inline]
    pub fn len(&self) -> usize {
        let header = self.header();
        let write = header.write_idx.0.load(Ordering::Acquire);
        let read = header.read_idx.0.load(Ordering::Acquire);
        write.wrapping_sub(read) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the queue as abandoned by its writer
    #[inline]
    pub fn close(&self) {
        self.header().closed.store(1, Ordering::Release);
    }

    /// Clear the closed mark when a new writer takes over
    #[inline]
    pub fn reopen(&self) {
        self.header().closed.store(0, Ordering::Release);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.header().closed.load(Ordering::Acquire) != 0
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    #[inline]
    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Whether this handle created (and will unlink) the region
    pub fn is_owner(&self) -> bool {
        self.shm.is_owner()
    }
}

fn truncated(name: &str) -> ShmemError {
    ShmemError::ShmOpen {
        name: name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidData, "region too small for queue layout"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_sequence() {
        let queue = SampleQueue::create("/villas_test_queue_fifo", 4, 3).unwrap();

        assert_eq!(queue.push(&[1.0, 2.0, 3.0]).unwrap(), 0);
        assert_eq!(queue.push(&[4.0]).unwrap(), 1);
        assert_eq!(queue.len(), 2);

        let first = queue.pop().unwrap();
        assert_eq!(first, Sample { sequence: 0, values: vec![1.0, 2.0, 3.0] });

        let second = queue.pop().unwrap();
        assert_eq!(second, Sample { sequence: 1, values: vec![4.0] });

        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_and_wraparound() {
        let queue = SampleQueue::create("/villas_test_queue_full", 2, 1).unwrap();

        queue.push(&[1.0]).unwrap();
        queue.push(&[2.0]).unwrap();
        assert!(matches!(queue.push(&[3.0]), Err(ShmemError::QueueFull)));

        assert_eq!(queue.pop().unwrap().values, vec![1.0]);
        assert_eq!(queue.push(&[3.0]).unwrap(), 2);
        assert_eq!(queue.pop().unwrap().values, vec![2.0]);
        assert_eq!(queue.pop().unwrap(), Sample { sequence: 2, values: vec![3.0] });
    }

    #[test]
    fn test_oversized_sample_rejected() {
        let queue = SampleQueue::create("/villas_test_queue_overflow", 2, 2).unwrap();
        assert!(matches!(
            queue.push(&[1.0, 2.0, 3.0]),
            Err(ShmemError::BufferOverflow { max: 2, got: 3 })
        ));
    }

    #[test]
    fn test_zero_queue_length_rejected() {
        assert!(matches!(
            SampleQueue::create("/villas_test_queue_zero", 0, 4),
            Err(ShmemError::InvalidQueueLength)
        ));
    }

    #[test]
    fn test_oversized_layout_rejected() {
        assert_eq!(SampleQueue::size_for(usize::MAX, 1), None);
        assert_eq!(SampleQueue::size_for(1, usize::MAX), None);
        assert!(matches!(
            SampleQueue::create("/villas_test_queue_huge", usize::MAX, 4),
            Err(ShmemError::QueueTooLarge { .. })
        ));
    }

    #[test]
    fn test_attach_rejects_forged_header() {
        let name = "/villas_test_queue_forged";
        let region = ShmRegion::create(name, 4096).unwrap();
        let header = region.as_ptr() as *mut QueueHeader;
        unsafe {
            (*header).version = QUEUE_VERSION;
            (*header).queue_len = u64::MAX;
            (*header).sample_len = 1;
            (*header).slot_stride = SampleQueue::stride_for(1).unwrap() as u64;
            (*header).magic = QUEUE_MAGIC;
        }

        assert!(matches!(SampleQueue::attach(name), Err(ShmemError::ShmOpen { .. })));

        unsafe {
            (*header).queue_len = 1 << 40;
        }
        assert!(matches!(SampleQueue::attach(name), Err(ShmemError::ShmOpen { .. })));
    }

    #[test]
    fn test_attach_sees_writer_samples() {
        let name = "/villas_test_queue_attach";
        let owner = SampleQueue::create(name, 8, 2).unwrap();
        let peer = SampleQueue::attach(name).unwrap();

        assert!(owner.is_owner());
        assert!(!peer.is_owner());
        assert_eq!(peer.queue_len(), 8);
        assert_eq!(peer.sample_len(), 2);

        owner.push(&[0.5, -0.5]).unwrap();
        assert_eq!(peer.pop().unwrap().values, vec![0.5, -0.5]);

        owner.close();
        assert!(peer.is_closed());
    }

    #[test]
    fn test_attach_rejects_foreign_region() {
        let name = "/villas_test_queue_foreign";
        let _region = ShmRegion::create(name, 4096).unwrap();
        assert!(matches!(
            SampleQueue::attach(name),
            Err(ShmemError::InvalidMagic { got: 0, .. })
        ));
    }
}
