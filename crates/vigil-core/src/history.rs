//! Fixed-capacity FIFO history buffers.
//!
//! A [`HistoryBuffer`] backs every chart series and log in the engine.
//! Insertion always appends the newest sample; once the buffer is full the
//! oldest sample is evicted. The *presentation* order is a property of the
//! buffer instance ([`HistoryOrder`]), not of the caller: charts read
//! oldest-to-newest, logs newest-to-oldest.

use std::collections::VecDeque;

use vigil_types::{HistoryOrder, Sample};

/// Errors raised when creating a history buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// A buffer must hold at least one sample.
    #[error("history buffer capacity must be at least 1")]
    ZeroCapacity,
}

/// A bounded, ordered sequence of tick-stamped samples.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer<T> {
    /// Maximum number of samples retained.
    capacity: usize,
    /// Order in which samples are presented.
    order: HistoryOrder,
    /// Samples in insertion order (oldest at the front).
    samples: VecDeque<Sample<T>>,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::ZeroCapacity`] if `capacity` is 0.
    pub fn new(capacity: usize, order: HistoryOrder) -> Result<Self, HistoryError> {
        if capacity == 0 {
            return Err(HistoryError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            order,
            samples: VecDeque::with_capacity(capacity),
        })
    }

    /// Chart buffer: newest sample last.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::ZeroCapacity`] if `capacity` is 0.
    pub fn chart(capacity: usize) -> Result<Self, HistoryError> {
        Self::new(capacity, HistoryOrder::OldestFirst)
    }

    /// Log buffer: newest sample first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::ZeroCapacity`] if `capacity` is 0.
    pub fn log(capacity: usize) -> Result<Self, HistoryError> {
        Self::new(capacity, HistoryOrder::NewestFirst)
    }

    /// Append a sample, returning the evicted oldest sample when full.
    pub fn push(&mut self, tick: u64, value: T) -> Option<Sample<T>> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(Sample { tick, value });
        evicted
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the next push will evict a sample.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Maximum number of samples retained.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Presentation order of this buffer.
    pub const fn order(&self) -> HistoryOrder {
        self.order
    }

    /// The most recently inserted sample.
    pub fn latest(&self) -> Option<&Sample<T>> {
        self.samples.back()
    }

    /// The oldest retained sample.
    pub fn oldest(&self) -> Option<&Sample<T>> {
        self.samples.front()
    }

    /// Iterate in presentation order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Sample<T>> + '_> {
        match self.order {
            HistoryOrder::OldestFirst => Box::new(self.samples.iter()),
            HistoryOrder::NewestFirst => Box::new(self.samples.iter().rev()),
        }
    }

    /// Copy the samples out in presentation order.
    pub fn to_vec(&self) -> Vec<Sample<T>> {
        self.iter().cloned().collect()
    }

    /// Copy only the values out in presentation order.
    pub fn values(&self) -> Vec<T> {
        self.iter().map(|s| s.value.clone()).collect()
    }

    /// Remove every sample, keeping capacity and order.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let result = HistoryBuffer::<f64>::chart(0);
        assert_eq!(result.err(), Some(HistoryError::ZeroCapacity));
    }

    #[test]
    fn weekly_buffer_keeps_last_seven_days() {
        let mut week = HistoryBuffer::chart(7).unwrap();
        for day in 1..=10_u64 {
            week.push(day, day);
        }
        assert_eq!(week.len(), 7);
        assert_eq!(week.values(), vec![4, 5, 6, 7, 8, 9, 10]);
        let ticks: Vec<u64> = week.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn log_order_presents_newest_first() {
        let mut log = HistoryBuffer::log(3).unwrap();
        for n in 1..=5_u64 {
            log.push(n, format!("entry {n}"));
        }
        assert_eq!(log.values(), vec!["entry 5", "entry 4", "entry 3"]);
        assert_eq!(log.latest().map(|s| s.tick), Some(5));
        assert_eq!(log.oldest().map(|s| s.tick), Some(3));
    }

    #[test]
    fn push_reports_evicted_sample() {
        let mut buf = HistoryBuffer::chart(2).unwrap();
        assert!(buf.push(1, 'a').is_none());
        assert!(buf.push(2, 'b').is_none());
        assert!(buf.is_full());
        let evicted = buf.push(3, 'c').unwrap();
        assert_eq!(evicted.tick, 1);
        assert_eq!(evicted.value, 'a');
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut buf = HistoryBuffer::chart(5).unwrap();
        for n in 0..100_u64 {
            buf.push(n, n);
            assert!(buf.len() <= 5);
        }
        assert_eq!(buf.values(), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn clear_keeps_configuration() {
        let mut buf = HistoryBuffer::log(4).unwrap();
        buf.push(1, 1.5);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.order(), HistoryOrder::NewestFirst);
    }
}
