//! Source series: where raw data enters the graph.
//!
//! A source is an append-only timelapse of prices or candles. Pushes land at the
//! next free index by default, at an explicit index or grid timestamp on demand;
//! pushing past the end back-fills the gap by linear interpolation from the last
//! known value (or the configured initial value on an empty series).
//!
//! Every write fans out two notifications over the written window, in a fixed
//! order: linked coarser sources first, then indicators. Linked sources must
//! finish ingesting before indicators of this source observe a refreshed
//! snapshot.
//!
//! A candle source can additionally *link* to a finer source, acting as a live
//! digest of it while staying an ordinary source for its own dependents.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::domain::{Candle, Interval, PricingValue, StandardizedPrice, fold_candle};
use crate::engine::event::{Disposable, Event, NodeId, RefreshCallback};
use crate::error::{Result, SeriesError};
use crate::models::{GrowingArray, PushIndex, Timelapse};

/// Rows per storage chunk for raw sources. An hour of second-level ticks.
pub(crate) const SOURCE_CHUNK_ROWS: usize = 3600;

pub type PriceSource = Source<StandardizedPrice>;
pub type CandleSource = Source<Candle>;

/// Handle to a source node. Clones share the node; the graph is single-threaded
/// and every operation runs to completion before returning.
pub struct Source<T: PricingValue> {
    inner: Rc<RefCell<SourceInner<T>>>,
}

impl<T: PricingValue> Clone for Source<T> {
    fn clone(&self) -> Self {
        Source { inner: Rc::clone(&self.inner) }
    }
}

struct SourceInner<T: PricingValue> {
    lapse: Timelapse<T>,
    initial: Option<T>,
    node_id: NodeId,
    on_refresh_indicators: Event,
    on_refresh_linked_sources: Event,
    link: Option<LinkState>,
}

/// Live subscription of a candle source onto a finer source.
struct LinkState {
    callback: RefreshCallback,
    unsubscribe: Box<dyn Fn(&RefreshCallback)>,
    relative_bin_size: usize,
    last_read_ubound: usize,
    /// Offset of the finer source's index 0 on this source's grid.
    base_index: usize,
}

impl<T: PricingValue> Source<T> {
    /// Create a source at `stamp` (grid index 0) sampled every `interval`.
    ///
    /// `initial` is the last value of the previous period; it seeds back-fill
    /// interpolation when the first push does not land at index 0.
    pub fn new(stamp: DateTime<Utc>, interval: Interval, initial: Option<T>) -> Result<Self> {
        if !interval.allowed_as_source() {
            return Err(SeriesError::Alignment(format!(
                "interval {} is not allowed for a raw source",
                interval
            )));
        }
        let lapse = Timelapse::new(
            GrowingArray::new(SOURCE_CHUNK_ROWS, 1, T::fill())?,
            interval,
            stamp,
        );
        Ok(Source {
            inner: Rc::new(RefCell::new(SourceInner {
                lapse,
                initial,
                node_id: NodeId::next(),
                on_refresh_indicators: Event::new(),
                on_refresh_linked_sources: Event::new(),
                link: None,
            })),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().lapse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn interval(&self) -> Interval {
        self.inner.borrow().lapse.interval()
    }

    pub fn base_timestamp(&self) -> DateTime<Utc> {
        self.inner.borrow().lapse.base_timestamp()
    }

    pub fn initial(&self) -> Option<T> {
        self.inner.borrow().initial
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.inner.borrow().lapse.get_value(index)
    }

    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<T>> {
        self.inner.borrow().lapse.get_slice(start, stop)
    }

    pub fn index_for(&self, stamp: DateTime<Utc>) -> Result<usize> {
        self.inner.borrow().lapse.index_for(stamp)
    }

    pub fn timestamp_for(&self, index: usize) -> DateTime<Utc> {
        self.inner.borrow().lapse.timestamp_for(index)
    }

    /// Append `data` at the next free index.
    pub fn push(&self, data: &[T]) -> Result<()> {
        let next = self.len();
        self.push_at(data, next)
    }

    /// Write `data` starting at an explicit index or grid timestamp.
    ///
    /// Pushing past the end interpolates the gap from the last known value to
    /// `data[0]` and warns through the log sink; interpolated prices are a
    /// stopgap, not data. Writing below the end rewrites history in place and
    /// re-notifies dependents over the written window.
    pub fn push_at(&self, data: &[T], index: impl Into<PushIndex>) -> Result<()> {
        if data.is_empty() {
            return Err(SeriesError::InvalidInput("cannot push an empty batch".to_string()));
        }
        let (start, end) = {
            let mut inner = self.inner.borrow_mut();
            let index = match index.into() {
                PushIndex::Sequence(sequence) => sequence,
                PushIndex::Timestamp(stamp) => inner.lapse.index_for(stamp)?,
            };
            let length = inner.lapse.len();
            if index > length {
                let left = match (length, inner.initial) {
                    (0, None) => return Err(SeriesError::MissingInitial),
                    (0, Some(initial)) => initial,
                    _ => inner.lapse.get_value(length - 1)?,
                };
                log::warn!(
                    "back-filling {} rows by interpolation; interpolated prices can be misleading",
                    index - length
                );
                let right = data[0];
                let distance = (index - length + 1) as i64;
                for offset in 0..(index - length) {
                    let value = T::lerp(left, right, (offset + 1) as i64, distance);
                    inner.lapse.set(length + offset, &[value])?;
                }
            }
            inner.lapse.set_slice(index, index + data.len(), data)?;
            (index, index + data.len())
        };
        self.fire_linked_sources(start, end);
        self.fire_indicators(start, end);
        Ok(())
    }

    /// Observe refreshes meant for indicators of this source.
    pub fn subscribe_indicators(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_indicators.register(callback);
    }

    pub fn unsubscribe_indicators(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_indicators.unregister(callback);
    }

    /// Observe refreshes meant for linked coarser sources and digests.
    pub fn subscribe_linked_sources(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_linked_sources.register(callback);
    }

    pub fn unsubscribe_linked_sources(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_linked_sources.unregister(callback);
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.inner.borrow().node_id
    }

    pub(crate) fn register_indicator_dependent(
        &self,
        callback: &RefreshCallback,
        receiver: std::rc::Weak<dyn Disposable>,
    ) {
        self.inner
            .borrow()
            .on_refresh_indicators
            .register_dependent(callback, Some(receiver));
    }

    fn fire_linked_sources(&self, start: usize, end: usize) {
        let (origin, callbacks) = {
            let inner = self.inner.borrow();
            (inner.node_id, inner.on_refresh_linked_sources.callbacks())
        };
        for callback in callbacks {
            callback(origin, start, end);
        }
    }

    fn fire_indicators(&self, start: usize, end: usize) {
        let (origin, callbacks) = {
            let inner = self.inner.borrow();
            (inner.node_id, inner.on_refresh_indicators.callbacks())
        };
        for callback in callbacks {
            callback(origin, start, end);
        }
    }
}

impl Source<Candle> {
    /// Start digesting `finer` into this source. The finer source must tick on a
    /// strictly smaller, exactly dividing interval, start at or after this
    /// source's base, and sit aligned on this source's grid. Any previous link
    /// is replaced; a failed validation leaves the previous link untouched.
    pub fn link<U: PricingValue>(&self, finer: &Source<U>) -> Result<()> {
        let interval = self.interval();
        let finer_interval = finer.interval();
        if !interval.allowed_as_digest(finer_interval) {
            return Err(SeriesError::Alignment(format!(
                "cannot digest a {} series into a {} series",
                finer_interval, interval
            )));
        }
        let finer_base = finer.base_timestamp();
        if finer_base < self.base_timestamp() {
            return Err(SeriesError::Alignment(
                "the finer source starts before this series".to_string(),
            ));
        }
        if interval.round(finer_base) != finer_base {
            return Err(SeriesError::Alignment(format!(
                "the finer source's base is not aligned on the {} grid",
                interval
            )));
        }
        let base_index = self.index_for(finer_base)?;
        let relative_bin_size = (interval.seconds() / finer_interval.seconds()) as usize;

        self.unlink();

        let weak = Rc::downgrade(&self.inner);
        let upstream = finer.clone();
        let callback: RefreshCallback = Rc::new(move |_origin, start, end| {
            if let Some(cell) = weak.upgrade() {
                Source { inner: cell }.linked_refresh(&upstream, start, end);
            }
        });
        finer.subscribe_linked_sources(&callback);
        let subscribed = finer.clone();
        let unsubscribe: Box<dyn Fn(&RefreshCallback)> =
            Box::new(move |cb| subscribed.unsubscribe_linked_sources(cb));
        self.inner.borrow_mut().link = Some(LinkState {
            callback,
            unsubscribe,
            relative_bin_size,
            last_read_ubound: 0,
            base_index,
        });

        // Catch up on whatever the finer source already holds.
        self.linked_refresh(finer, 0, finer.len());
        Ok(())
    }

    /// Stop digesting the currently linked source, if any. Idempotent.
    pub fn unlink(&self) {
        let link = self.inner.borrow_mut().link.take();
        if let Some(link) = link {
            (link.unsubscribe)(&link.callback);
        }
    }

    pub fn linked(&self) -> bool {
        self.inner.borrow().link.is_some()
    }

    /// Rebin the finer window `[start, end)` into this source's grid.
    ///
    /// Bins already seen below `start` are re-folded from scratch, which makes
    /// replays idempotent; the trailing partial bin is folded from whatever rows
    /// exist and re-folded again once the bin fills up.
    fn linked_refresh<U: PricingValue>(&self, finer: &Source<U>, start: usize, end: usize) {
        let (window_start, window_end) = {
            let mut inner = self.inner.borrow_mut();
            let (relative_bin_size, base_index, resume) = match inner.link.as_ref() {
                Some(link) => (
                    link.relative_bin_size,
                    link.base_index,
                    start.min(link.last_read_ubound),
                ),
                None => return,
            };
            let min_index = resume / relative_bin_size;
            let max_index = end.div_ceil(relative_bin_size);
            let finer_len = finer.len();
            for bin_index in min_index..max_index {
                let lo = bin_index * relative_bin_size;
                let hi = ((bin_index + 1) * relative_bin_size).min(finer_len);
                if lo >= hi {
                    continue;
                }
                let Ok(rows) = finer.get_slice(lo, hi) else { continue };
                if let Some(candle) = fold_candle(&rows) {
                    let _ = inner.lapse.set(bin_index + base_index, &[candle]);
                }
            }
            if let Some(link) = inner.link.as_mut() {
                link.last_read_ubound = link.last_read_ubound.max(end);
            }
            (min_index + base_index, max_index + base_index)
        };
        self.fire_linked_sources(window_start, window_end);
        self.fire_indicators(window_start, window_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn price_source(initial: Option<u64>) -> PriceSource {
        let _ = env_logger::builder().is_test(true).try_init();
        Source::new(base(), Interval::Minute, initial).unwrap()
    }

    #[test]
    fn plain_pushes_append_in_order() {
        let source = price_source(None);
        source.push(&[100, 101, 102]).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.get_slice(0, 3).unwrap(), vec![100, 101, 102]);
        source.push(&[103]).unwrap();
        assert_eq!(source.get(3).unwrap(), 103);
    }

    #[test]
    fn day_scale_intervals_cannot_be_sources() {
        assert!(matches!(
            Source::<StandardizedPrice>::new(base(), Interval::Day, None),
            Err(SeriesError::Alignment(_))
        ));
    }

    #[test]
    fn sparse_push_interpolates_from_the_initial_value() {
        let source = price_source(Some(100));
        source.push_at(&[200], 4).unwrap();
        assert_eq!(source.len(), 5);
        assert_eq!(
            source.get_slice(0, 5).unwrap(),
            vec![120, 140, 160, 180, 200]
        );
    }

    #[test]
    fn sparse_push_interpolates_from_the_last_row() {
        let source = price_source(None);
        source.push(&[100]).unwrap();
        source.push_at(&[130], 3).unwrap();
        // Gap rows 1 and 2 interpolate 100 -> 130 over three steps.
        assert_eq!(source.get_slice(0, 4).unwrap(), vec![100, 110, 120, 130]);
    }

    #[test]
    fn sparse_push_on_an_empty_source_needs_an_initial() {
        let source = price_source(None);
        assert!(matches!(source.push_at(&[200], 4), Err(SeriesError::MissingInitial)));
        assert_eq!(source.len(), 0, "a failed push must leave the series unchanged");
    }

    #[test]
    fn candle_gaps_interpolate_per_field() {
        let source: CandleSource = Source::new(base(), Interval::Minute, None).unwrap();
        source.push(&[Candle::new(100, 110, 90, 120)]).unwrap();
        source.push_at(&[Candle::new(130, 140, 120, 150)], 3).unwrap();
        let between = source.get(1).unwrap();
        assert_eq!(between, Candle::new(110, 120, 100, 130));
        let between = source.get(2).unwrap();
        assert_eq!(between, Candle::new(120, 130, 110, 140));
    }

    #[test]
    fn timestamp_pushes_must_sit_on_the_grid() {
        let source = price_source(None);
        let aligned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap();
        source.push(&[100]).unwrap();
        source.push_at(&[102, 103], aligned).unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.get(2).unwrap(), 102);

        let off_grid = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 30).unwrap();
        assert!(matches!(
            source.push_at(&[999], off_grid),
            Err(SeriesError::Alignment(_))
        ));
    }

    #[test]
    fn rewriting_history_renotifies_the_window() {
        let source = price_source(None);
        source.push(&[100, 101, 102]).unwrap();

        let seen: Rc<RefCell<Vec<(usize, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let callback: RefreshCallback =
            Rc::new(move |_origin, start, end| sink.borrow_mut().push((start, end)));
        source.subscribe_indicators(&callback);

        source.push_at(&[111], 1).unwrap();
        assert_eq!(source.get(1).unwrap(), 111);
        assert_eq!(seen.borrow().as_slice(), &[(1, 2)]);
    }

    #[test]
    fn linked_sources_hear_about_a_push_before_indicators() {
        let source = price_source(None);
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = order.clone();
        let linked: RefreshCallback =
            Rc::new(move |_origin, _start, _end| sink.borrow_mut().push("linked"));
        let sink = order.clone();
        let indicators: RefreshCallback =
            Rc::new(move |_origin, _start, _end| sink.borrow_mut().push("indicators"));

        source.subscribe_linked_sources(&linked);
        source.subscribe_indicators(&indicators);
        source.push(&[100]).unwrap();
        assert_eq!(order.borrow().as_slice(), &["linked", "indicators"]);
    }

    #[test]
    fn linking_digests_existing_and_future_data() {
        let coarse: CandleSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        let finer = price_source(None);
        finer.push(&[10, 20, 5, 15, 12]).unwrap();

        coarse.link(&finer).unwrap();
        assert!(coarse.linked());
        assert_eq!(coarse.len(), 1, "one full bin should exist after catch-up");
        assert_eq!(coarse.get(0).unwrap(), Candle::new(10, 12, 5, 20));

        // Two more ticks open a partial second bin.
        finer.push(&[30, 8]).unwrap();
        assert_eq!(coarse.len(), 2);
        assert_eq!(coarse.get(1).unwrap(), Candle::new(30, 8, 8, 30));

        // Filling the bin re-folds it completely.
        finer.push(&[40, 41, 42]).unwrap();
        assert_eq!(coarse.get(1).unwrap(), Candle::new(30, 42, 8, 42));
    }

    #[test]
    fn linking_respects_the_base_offset() {
        let coarse: CandleSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let finer: PriceSource = Source::new(later, Interval::Minute, None).unwrap();
        finer.push(&[10, 20, 5, 15, 12]).unwrap();

        coarse.link(&finer).unwrap();
        // The finer source's index 0 maps onto coarse index 1.
        assert_eq!(coarse.len(), 2);
        assert_eq!(coarse.get(0).unwrap(), Candle::default());
        assert_eq!(coarse.get(1).unwrap(), Candle::new(10, 12, 5, 20));
    }

    #[test]
    fn unlink_stops_the_flow() {
        let coarse: CandleSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        let finer = price_source(None);
        coarse.link(&finer).unwrap();
        coarse.unlink();
        assert!(!coarse.linked());
        finer.push(&[10, 20, 5, 15, 12]).unwrap();
        assert_eq!(coarse.len(), 0);
        // Unlinking twice is harmless.
        coarse.unlink();
    }

    #[test]
    fn a_failed_link_keeps_the_previous_one() {
        let coarse: CandleSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        let finer = price_source(None);
        coarse.link(&finer).unwrap();

        // Same interval as the coarse series: rejected as a digest source.
        let rejected: PriceSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        assert!(coarse.link(&rejected).is_err());

        finer.push(&[10, 20, 5, 15, 12]).unwrap();
        assert_eq!(coarse.len(), 1, "the original link must keep digesting");
    }

    #[test]
    fn misaligned_finer_bases_are_rejected() {
        let coarse: CandleSource =
            Source::new(base(), Interval::FiveMinutes, None).unwrap();
        let off = Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 0).unwrap();
        let finer: PriceSource = Source::new(off, Interval::Minute, None).unwrap();
        assert!(matches!(coarse.link(&finer), Err(SeriesError::Alignment(_))));

        let earlier = Utc.with_ymd_and_hms(2023, 12, 31, 23, 55, 0).unwrap();
        let finer: PriceSource = Source::new(earlier, Interval::Minute, None).unwrap();
        assert!(matches!(coarse.link(&finer), Err(SeriesError::Alignment(_))));
    }
}
