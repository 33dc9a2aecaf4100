//! Interval-quantized views over a growing array.
//!
//! A timelapse binds storage to a time grid: index 0 is the base timestamp and
//! index `i` sits at `base + i * interval`. All conversions are strict; a stamp
//! that is off-grid or before the base is a caller error, never silently rounded.

use chrono::{DateTime, Utc};

use crate::domain::Interval;
use crate::error::{Result, SeriesError};
use crate::models::growing_array::GrowingArray;
use crate::utils::time_utils::epoch_sec_to_utc;

#[derive(Debug)]
pub struct Timelapse<T: Copy> {
    data: GrowingArray<T>,
    interval: Interval,
    base_timestamp: DateTime<Utc>,
}

impl<T: Copy> Timelapse<T> {
    pub fn new(data: GrowingArray<T>, interval: Interval, base_timestamp: DateTime<Utc>) -> Self {
        Timelapse { data, interval, base_timestamp }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn base_timestamp(&self) -> DateTime<Utc> {
        self.base_timestamp
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> usize {
        self.data.width()
    }

    /// Grid index of `stamp`. The stamp must be at or after the base and an exact
    /// number of intervals past it.
    pub fn index_for(&self, stamp: DateTime<Utc>) -> Result<usize> {
        let delta = stamp.timestamp() - self.base_timestamp.timestamp();
        if delta < 0 {
            return Err(SeriesError::Alignment(format!(
                "timestamp {} precedes the series base {}",
                epoch_sec_to_utc(stamp.timestamp()),
                epoch_sec_to_utc(self.base_timestamp.timestamp())
            )));
        }
        let quantum = self.interval.seconds();
        if delta % quantum != 0 {
            return Err(SeriesError::Alignment(format!(
                "timestamp {} is not aligned on the {} grid",
                epoch_sec_to_utc(stamp.timestamp()),
                self.interval
            )));
        }
        Ok((delta / quantum) as usize)
    }

    /// Timestamp of grid index `index`.
    pub fn timestamp_for(&self, index: usize) -> DateTime<Utc> {
        let secs = self.base_timestamp.timestamp() + index as i64 * self.interval.seconds();
        DateTime::from_timestamp(secs, 0).expect("grid timestamp is representable")
    }

    pub fn get(&self, index: usize) -> Result<Vec<T>> {
        self.data.get(index)
    }

    /// Single value of a width-1 row.
    pub fn get_value(&self, index: usize) -> Result<T> {
        debug_assert_eq!(self.data.width(), 1);
        Ok(self.data.row(index)?[0])
    }

    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<T>> {
        self.data.get_slice(start, stop)
    }

    pub fn set(&mut self, index: usize, row: &[T]) -> Result<()> {
        self.data.set(index, row)
    }

    pub fn set_slice(&mut self, start: usize, stop: usize, data: &[T]) -> Result<()> {
        self.data.set_slice(start, stop, data)
    }

    pub(crate) fn release(&mut self) {
        self.data.release();
    }
}

/// Where a push lands: either a raw sequence index or a grid-aligned timestamp.
#[derive(Debug, Clone, Copy)]
pub enum PushIndex {
    Sequence(usize),
    Timestamp(DateTime<Utc>),
}

impl From<usize> for PushIndex {
    fn from(index: usize) -> Self {
        PushIndex::Sequence(index)
    }
}

impl From<DateTime<Utc>> for PushIndex {
    fn from(stamp: DateTime<Utc>) -> Self {
        PushIndex::Timestamp(stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute_lapse() -> Timelapse<u64> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Timelapse::new(
            GrowingArray::new(16, 1, 0).unwrap(),
            Interval::Minute,
            base,
        )
    }

    #[test]
    fn index_and_timestamp_are_inverses() {
        let lapse = minute_lapse();
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 0).unwrap();
        assert_eq!(lapse.index_for(stamp).unwrap(), 7);
        assert_eq!(lapse.timestamp_for(7), stamp);
        assert_eq!(lapse.index_for(lapse.base_timestamp()).unwrap(), 0);
    }

    #[test]
    fn off_grid_stamps_are_rejected() {
        let lapse = minute_lapse();
        let misaligned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 30).unwrap();
        assert!(matches!(lapse.index_for(misaligned), Err(SeriesError::Alignment(_))));
        let before_base = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap();
        assert!(matches!(lapse.index_for(before_base), Err(SeriesError::Alignment(_))));
    }

    #[test]
    fn push_index_converts_from_both_shapes() {
        let lapse = minute_lapse();
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap();
        match PushIndex::from(stamp) {
            PushIndex::Timestamp(ts) => assert_eq!(lapse.index_for(ts).unwrap(), 3),
            other => panic!("expected a timestamp variant, got {:?}", other),
        }
        match PushIndex::from(5usize) {
            PushIndex::Sequence(index) => assert_eq!(index, 5),
            other => panic!("expected a sequence variant, got {:?}", other),
        }
    }
}
