use ndarray::{Array2, ArrayView1, Axis};
use parking_lot::RwLock;
use crate::drivers::source::SampleVector;
use crate::drivers::AcquisitionError;
/// Trailing slice of the history: a time axis plus `channels x n` values.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    sample_rate_hz: f64,
    start_index: u64,
    time_axis: Vec<f64>,
    values: Array2<f64>,
}

impl Window {
    /// Builds a window whose first column carries sample index `start_index`.
    pub fn new(sample_rate_hz: f64, start_index: u64, values: Array2<f64>) -> Self {
        let time_axis = (0..values.ncols() as u64)
            .map(|i| (start_index + i) as f64 / sample_rate_hz)
            .collect();
        Self {
            sample_rate_hz,
            start_index,
            time_axis,
            values,
        }
    }

    pub fn empty(channels: usize, sample_rate_hz: f64) -> Self {
        Self::new(sample_rate_hz, 0, Array2::zeros((channels, 0)))
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.values.ncols()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn num_channels(&self) -> usize {
        self.values.nrows()
    }
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    pub fn start_index(&self) -> u64 {
        self.start_index
    }
    pub fn time_axis(&self) -> &[f64] {
        &self.time_axis
    }
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
    pub fn channel(&self, channel: usize) -> Option<ArrayView1<'_, f64>> {
        (channel < self.num_channels()).then(|| self.values.row(channel))
    }
    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / self.sample_rate_hz
    }
    pub fn into_values(self) -> Array2<f64> {
        self.values
    }
}

/// Fixed arena, one time step per slot (`slot * channels + channel`).
struct Ring {
    data: Vec<f64>,
    head: usize,
    len: usize,
    next_index: u64,
}

/// Capacity-bounded multi-channel history shared between the acquisition
/// thread and any number of readers.
///
/// A push writes a whole time step under the write lock, so readers never see
/// channels out of step. Readers hold the read lock only while copying the
/// columns they asked for.
pub struct SampleStore {
    ring: RwLock<Ring>,
    channels: usize,
    capacity: usize,
    sample_rate_hz: f64,
}

impl SampleStore {
    pub fn new(
        channels: usize,
        capacity: usize,
        sample_rate_hz: f64,
    ) -> Result<Self, AcquisitionError> {
        if !(sample_rate_hz > 0.0) || !sample_rate_hz.is_finite() {
            return Err(AcquisitionError::InvalidSampleRate);
        }
        if channels == 0 {
            return Err(AcquisitionError::InvalidChannelCount);
        }
        if capacity == 0 {
            return Err(AcquisitionError::InvalidCapacity);
        }
        Ok(Self {
            ring: RwLock::new(Ring {
                data: vec![0.0; channels * capacity],
                head: 0,
                len: 0,
                next_index: 0,
            }),
            channels,
            capacity,
            sample_rate_hz,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    /// Occupied length, at most `capacity()`.
    pub fn size(&self) -> usize {
        self.ring.read().len
    }
    /// Sample index the next push will receive.
    pub fn total_pushed(&self) -> u64 {
        self.ring.read().next_index
    }

    /// Appends one time step across all channels, evicting the oldest when
    /// full. Returns the sample index assigned to it.
    pub fn push(&self, sample: &SampleVector) -> Result<u64, AcquisitionError> {
        if sample.num_channels() != self.channels {
            return Err(AcquisitionError::ChannelMismatch {
                expected: self.channels,
                actual: sample.num_channels(),
            });
        }
        let mut ring = self.ring.write();
        let slot = if ring.len == self.capacity {
            let oldest = ring.head;
            ring.head = (ring.head + 1) % self.capacity;
            oldest
        } else {
            ring.len += 1;
            (ring.head + ring.len - 1) % self.capacity
        };
        let offset = slot * self.channels;
        ring.data[offset..offset + self.channels].copy_from_slice(sample.values());
        let index = ring.next_index;
        ring.next_index += 1;
        Ok(index)
    }

    /// The most recent `min(length, size())` samples.
    pub fn window(&self, length: usize) -> Window {
        let ring = self.ring.read();
        let take = length.min(ring.len);
        self.copy_tail(&ring, take)
    }

    /// Every retained sample whose index is at least `index`.
    pub fn since(&self, index: u64) -> Window {
        let ring = self.ring.read();
        let newer = ring.next_index.saturating_sub(index);
        let take = (newer.min(ring.len as u64)) as usize;
        self.copy_tail(&ring, take)
    }

    fn copy_tail(&self, ring: &Ring, take: usize) -> Window {
        if take == 0 {
            return Window::empty(self.channels, self.sample_rate_hz);
        }
        let mut values = Array2::zeros((self.channels, take));
        let first = ring.head + ring.len - take;
        for (i, mut column) in values.axis_iter_mut(Axis(1)).enumerate() {
            let offset = ((first + i) % self.capacity) * self.channels;
            for (c, v) in column.iter_mut().enumerate() {
                *v = ring.data[offset + c];
            }
        }
        let start_index = ring.next_index - take as u64;
        Window::new(self.sample_rate_hz, start_index, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    fn step(value: f64, channels: usize) -> SampleVector {
        SampleVector::new((0..channels).map(|c| value + c as f64 * 1000.0).collect())
    }

    #[test]
    fn empty_store_yields_empty_window() {
        let store = SampleStore::new(9, 100, 500.0).unwrap();
        let window = store.window(100);
        assert!(window.is_empty());
        assert_eq!(window.num_channels(), 9);
        assert!(window.time_axis().is_empty());
        assert!(store.since(0).is_empty());
    }

    #[test]
    fn window_is_min_of_request_and_size() {
        let store = SampleStore::new(3, 100, 500.0).unwrap();
        for i in 0..40 {
            store.push(&step(i as f64, 3)).unwrap();
        }
        assert_eq!(store.window(10).len(), 10);
        assert_eq!(store.window(1000).len(), 40);

        let window = store.window(10);
        assert_eq!(window.start_index(), 30);
        assert_eq!(window.channel(0).unwrap()[0], 30.0);
        assert_eq!(window.channel(2).unwrap()[9], 39.0 + 2000.0);
        let axis = window.time_axis();
        assert_eq!(axis.len(), window.channel(1).unwrap().len());
        for pair in axis.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!((pair[1] - pair[0] - 1.0 / 500.0).abs() < 1e-12);
        }
        assert!((axis[0] - 30.0 / 500.0).abs() < 1e-12);
        assert!(window.channel(3).is_none());
    }

    #[test]
    fn ring_keeps_the_last_capacity_samples() {
        let capacity = 16;
        let k = 37;
        let store = SampleStore::new(2, capacity, 250.0).unwrap();
        for i in 0..capacity + k {
            store.push(&step(i as f64, 2)).unwrap();
        }
        assert_eq!(store.size(), capacity);
        assert_eq!(store.total_pushed(), (capacity + k) as u64);
        let window = store.window(usize::MAX);
        let expected: Vec<f64> = (k..capacity + k).map(|i| i as f64).collect();
        assert_eq!(window.channel(0).unwrap().to_vec(), expected);
        assert_eq!(window.start_index(), k as u64);
    }

    #[test]
    fn since_returns_retained_suffix() {
        let store = SampleStore::new(1, 8, 100.0).unwrap();
        for i in 0..20 {
            store.push(&step(i as f64, 1)).unwrap();
        }
        assert_eq!(store.since(15).channel(0).unwrap().to_vec(), vec![15.0, 16.0, 17.0, 18.0, 19.0]);
        // Older than the ring holds: clipped to what is retained.
        assert_eq!(store.since(2).len(), 8);
        assert!(store.since(20).is_empty());
    }

    #[test]
    fn mismatched_push_leaves_store_untouched() {
        let store = SampleStore::new(9, 10, 500.0).unwrap();
        assert!(store.push(&step(0.0, 8)).is_err());
        assert_eq!(store.size(), 0);
        assert_eq!(store.total_pushed(), 0);
    }

    #[test]
    fn readers_never_see_torn_time_steps() {
        let channels = 9;
        let store = Arc::new(SampleStore::new(channels, 512, 500.0).unwrap());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..20_000 {
                    store.push(&SampleVector::new(vec![i as f64; channels])).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let window = store.window(128);
                        for column in window.values().axis_iter(Axis(1)) {
                            assert!(column.iter().all(|v| *v == column[0]));
                        }
                        let first = window.channel(0).map(|c| c.to_vec()).unwrap_or_default();
                        for pair in first.windows(2) {
                            assert_eq!(pair[1], pair[0] + 1.0);
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.size(), 512);
    }

    #[test]
    fn rejects_degenerate_construction() {
        assert!(matches!(
            SampleStore::new(9, 0, 500.0),
            Err(AcquisitionError::InvalidCapacity)
        ));
        assert!(matches!(
            SampleStore::new(0, 10, 500.0),
            Err(AcquisitionError::InvalidChannelCount)
        ));
        assert!(matches!(
            SampleStore::new(9, 10, -1.0),
            Err(AcquisitionError::InvalidSampleRate)
        ));
    }
}
