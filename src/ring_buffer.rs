//! Fixed-capacity overwrite ring buffer shared between the capture thread and
//! readers.
//!
//! A single producer appends at the write cursor with [`SampleRingBuffer::tail_insert`].
//! Readers either peek at the freshest samples with [`SampleRingBuffer::head_read`]
//! or drain the oldest resident samples in order with
//! [`SampleRingBuffer::tail_read`].
//!
//! The producer never waits for readers to catch up. When the buffer is full,
//! every insert overwrites the oldest samples. A tail reader that falls behind
//! therefore loses data; with [`OverrunPolicy::Overwrite`] the loss is only
//! visible through [`SampleRingBuffer::dropped`], with [`OverrunPolicy::Report`]
//! the next tail read fails with [`DigitizerError::Overrun`].
//!
//! All state lives behind one mutex. Each critical section copies at most one
//! insert or one read window, so the producer is never held up for longer than
//! a reader's copy.

use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;

use crate::error::{DigitizerError, Result};

/// What a tail read does after the producer has lapped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Overwritten samples are lost silently.
    #[default]
    Overwrite,
    /// The first tail read after a loss fails with `Overrun`.
    Report,
}

/// Samples returned by a read, tagged with their place in the insert stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<T> {
    /// Stream index of `samples[0]`, counting every sample ever inserted
    pub start: u64,
    pub samples: Vec<T>,
}

/// Counters taken together under one lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub len: usize,
    pub total_inserted: u64,
    pub dropped: u64,
}

struct RingState<T> {
    storage: Vec<T>,
    write: usize,
    fill: usize,
    total_inserted: u64,
    dropped: u64,
}

impl<T: Copy> RingState<T> {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Stream index of the sample `count` positions back from the newest.
    fn stream_index(&self, count: usize) -> u64 {
        self.total_inserted - count as u64
    }

    fn oldest(&self) -> usize {
        (self.write + self.capacity() - self.fill) % self.capacity()
    }

    /// Copy `count` samples starting at physical index `start`, unwrapping
    /// at the end of storage.
    fn copy_out(&self, start: usize, count: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(count);
        let first = count.min(self.capacity() - start);
        out.extend_from_slice(&self.storage[start..start + first]);
        out.extend_from_slice(&self.storage[..count - first]);
        out
    }
}

/// Circular sample store with overwrite-on-full semantics.
pub struct SampleRingBuffer<T> {
    state: Mutex<RingState<T>>,
    policy: OverrunPolicy,
}

impl<T: Copy + Default> SampleRingBuffer<T> {
    /// Create a ring holding up to `capacity` samples that overwrites silently.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_policy(capacity, OverrunPolicy::Overwrite)
    }

    pub fn with_policy(capacity: usize, policy: OverrunPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(DigitizerError::InvalidParameter(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(RingState {
                storage: vec![T::default(); capacity],
                write: 0,
                fill: 0,
                total_inserted: 0,
                dropped: 0,
            }),
            policy,
        })
    }

    // A reader or writer that panicked mid-copy cannot leave the cursors
    // inconsistent (they are only updated after the copy), so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `source` at the write cursor.
    ///
    /// Samples beyond capacity overwrite the oldest resident data. If
    /// `source` is longer than the ring, only its last `capacity` samples are
    /// kept.
    pub fn tail_insert(&self, source: &[T]) {
        if source.is_empty() {
            return;
        }

        let mut state = self.lock();
        let capacity = state.capacity();

        let skipped = source.len().saturating_sub(capacity);
        let kept = &source[skipped..];

        let write = state.write;
        let first = kept.len().min(capacity - write);
        state.storage[write..write + first].copy_from_slice(&kept[..first]);
        let rest = kept.len() - first;
        state.storage[..rest].copy_from_slice(&kept[first..]);
        state.write = (write + kept.len()) % capacity;

        let overwritten = (state.fill + kept.len()).saturating_sub(capacity);
        state.fill = (state.fill + kept.len()).min(capacity);
        state.total_inserted += source.len() as u64;
        state.dropped += (overwritten + skipped) as u64;
    }

    /// Return the `count` most recently inserted samples, oldest first.
    ///
    /// Does not consume anything: repeated calls without an insert in
    /// between return the same samples.
    pub fn head_read(&self, count: usize) -> Result<Vec<T>> {
        self.head_window(count).map(|w| w.samples)
    }

    /// [`head_read`](Self::head_read) with the stream index of the first sample.
    pub fn head_window(&self, count: usize) -> Result<Window<T>> {
        let state = self.lock();
        if count > state.fill {
            return Err(DigitizerError::InsufficientData {
                needed: count,
                available: state.fill,
            });
        }
        let start = (state.write + state.capacity() - count) % state.capacity();
        Ok(Window {
            start: state.stream_index(count),
            samples: state.copy_out(start, count),
        })
    }

    /// Remove and return the `count` oldest resident samples, oldest first.
    pub fn tail_read(&self, count: usize) -> Result<Vec<T>> {
        self.tail_window(count).map(|w| w.samples)
    }

    /// [`tail_read`](Self::tail_read) with the stream index of the first sample.
    pub fn tail_window(&self, count: usize) -> Result<Window<T>> {
        let mut state = self.lock();

        if self.policy == OverrunPolicy::Report && state.dropped > 0 {
            let lost = std::mem::take(&mut state.dropped);
            return Err(DigitizerError::Overrun { lost });
        }

        if count > state.fill {
            return Err(DigitizerError::InsufficientData {
                needed: count,
                available: state.fill,
            });
        }

        let window = Window {
            start: state.stream_index(state.fill),
            samples: state.copy_out(state.oldest(), count),
        };
        state.fill -= count;
        state.dropped = 0;
        Ok(window)
    }

    /// Discard all resident samples. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.fill = 0;
        state.dropped = 0;
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of samples currently resident
    pub fn len(&self) -> usize {
        self.lock().fill
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples ever passed to `tail_insert`
    pub fn total_inserted(&self) -> u64 {
        self.lock().total_inserted
    }

    /// Samples overwritten before a tail read reached them, since the last
    /// successful tail read.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn stats(&self) -> RingStats {
        let state = self.lock();
        RingStats {
            len: state.fill,
            total_inserted: state.total_inserted,
            dropped: state.dropped,
        }
    }

    pub fn policy(&self) -> OverrunPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> SampleRingBuffer<u16> {
        SampleRingBuffer::new(capacity).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            SampleRingBuffer::<u16>::new(0),
            Err(DigitizerError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_four_chunks_concatenate_in_order() {
        let rb = ring(1024);
        for i in 0..4u16 {
            rb.tail_insert(&[i + 1; 256]);
        }
        assert_eq!(rb.len(), 1024);

        let data = rb.tail_read(1024).unwrap();
        for (i, chunk) in data.chunks(256).enumerate() {
            assert!(chunk.iter().all(|&v| v == i as u16 + 1), "chunk {}", i);
        }
        assert!(rb.is_empty());
    }

    #[test]
    fn test_oversized_insert_keeps_newest() {
        let rb = ring(256);
        let source: Vec<u16> = (1..=300).collect();
        rb.tail_insert(&source);

        assert_eq!(rb.len(), 256);
        assert_eq!(rb.total_inserted(), 300);
        assert_eq!(rb.dropped(), 44);

        let data = rb.tail_read(256).unwrap();
        let expected: Vec<u16> = (45..=300).collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_overwrite_across_wraparound() {
        let rb = ring(10);
        rb.tail_insert(&[1, 2, 3, 4, 5, 6, 7]);
        rb.tail_insert(&[8, 9, 10, 11, 12]);

        assert_eq!(rb.len(), 10);
        assert_eq!(rb.tail_read(10).unwrap(), (3..=12).collect::<Vec<u16>>());
    }

    #[test]
    fn test_tail_read_consumes_in_order() {
        let rb = ring(8);
        rb.tail_insert(&[1, 2, 3, 4, 5]);

        assert_eq!(rb.tail_read(2).unwrap(), vec![1, 2]);
        assert_eq!(rb.tail_read(3).unwrap(), vec![3, 4, 5]);
        assert!(rb.is_empty());

        // Cursor state survives draining: next inserts wrap correctly.
        rb.tail_insert(&[6, 7, 8, 9, 10, 11]);
        assert_eq!(rb.tail_read(6).unwrap(), vec![6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_head_read_is_a_snapshot() {
        let rb = ring(8);
        rb.tail_insert(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        let first = rb.head_read(3).unwrap();
        let second = rb.head_read(3).unwrap();
        assert_eq!(first, vec![8, 9, 10]);
        assert_eq!(first, second);
        assert_eq!(rb.len(), 8);
    }

    #[test]
    fn test_head_read_after_partial_tail_drain() {
        let rb = ring(6);
        rb.tail_insert(&[1, 2, 3, 4]);
        rb.tail_read(3).unwrap();

        assert_eq!(rb.head_read(1).unwrap(), vec![4]);
        assert!(rb.head_read(2).is_err());
    }

    #[test]
    fn test_insufficient_data_leaves_state_unchanged() {
        let rb = ring(16);
        rb.tail_insert(&[1, 2, 3]);

        match rb.tail_read(4) {
            Err(DigitizerError::InsufficientData { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
        assert!(matches!(
            rb.head_read(4),
            Err(DigitizerError::InsufficientData { .. })
        ));

        assert_eq!(rb.len(), 3);
        assert_eq!(rb.tail_read(3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_length_reads_succeed() {
        let rb = ring(4);
        assert!(rb.tail_read(0).unwrap().is_empty());
        assert!(rb.head_read(0).unwrap().is_empty());
    }

    #[test]
    fn test_fill_never_exceeds_capacity() {
        let rb = ring(100);
        for n in 1..50u16 {
            let chunk: Vec<u16> = (0..n).collect();
            rb.tail_insert(&chunk);
            assert!(rb.len() <= rb.capacity());
            if n % 7 == 0 {
                let take = rb.len() / 2;
                rb.tail_read(take).unwrap();
            }
        }
    }

    #[test]
    fn test_report_policy_flags_overrun_once() {
        let rb = SampleRingBuffer::<u16>::with_policy(4, OverrunPolicy::Report).unwrap();
        rb.tail_insert(&[1, 2, 3, 4, 5, 6]);

        match rb.tail_read(2) {
            Err(DigitizerError::Overrun { lost }) => assert_eq!(lost, 2),
            other => panic!("expected overrun, got {:?}", other),
        }

        // Resident data was not touched by the report.
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.tail_read(4).unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_windows_carry_stream_index() {
        let rb = ring(5);
        rb.tail_insert(&[10, 11, 12, 13, 14, 15, 16]);

        let head = rb.head_window(2).unwrap();
        assert_eq!(head.start, 5);
        assert_eq!(head.samples, vec![15, 16]);

        let tail = rb.tail_window(3).unwrap();
        assert_eq!(tail.start, 2);
        assert_eq!(tail.samples, vec![12, 13, 14]);
        assert_eq!(rb.tail_window(1).unwrap().start, 5);
    }

    #[test]
    fn test_stats_snapshot() {
        let rb = ring(4);
        rb.tail_insert(&[1, 2, 3, 4, 5, 6]);
        rb.tail_read(1).unwrap();
        assert_eq!(
            rb.stats(),
            RingStats {
                len: 3,
                total_inserted: 6,
                dropped: 0
            }
        );
    }

    #[test]
    fn test_overwrite_policy_counts_loss_silently() {
        let rb = ring(4);
        rb.tail_insert(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(rb.dropped(), 2);
        assert_eq!(rb.tail_read(2).unwrap(), vec![3, 4]);
        assert_eq!(rb.dropped(), 0);
    }

    #[test]
    fn test_clear() {
        let rb = ring(4);
        rb.tail_insert(&[1, 2, 3]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.total_inserted(), 3);
        rb.tail_insert(&[9]);
        assert_eq!(rb.tail_read(1).unwrap(), vec![9]);
    }
}
