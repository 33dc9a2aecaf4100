//! Digests: coarse-interval summaries of a finer source.
//!
//! A digest owns a candle series on a coarser grid and keeps it in sync with its
//! source: every source refresh re-folds the affected bins with the candle merge.
//! Bins are always folded from scratch out of the source rows, so replaying a
//! window the digest has already seen converges to the same contents.
//!
//! Digests feed linked coarser sources but not indicators directly; chain an
//! indicator to a linked source when both behaviours are needed.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::domain::{Candle, Interval, PricingValue, fold_candle};
use crate::engine::event::{Event, NodeId, RefreshCallback};
use crate::engine::source::Source;
use crate::error::{Result, SeriesError};
use crate::models::{GrowingArray, Timelapse};

/// Rows per storage chunk for digests. Coarser grids fill far slower than raw
/// sources, so chunks are smaller.
pub(crate) const DIGEST_CHUNK_ROWS: usize = 240;

/// Handle to a digest node over a source of `T` values.
pub struct Digest<T: PricingValue> {
    inner: Rc<RefCell<DigestInner<T>>>,
}

impl<T: PricingValue> Clone for Digest<T> {
    fn clone(&self) -> Self {
        Digest { inner: Rc::clone(&self.inner) }
    }
}

struct DigestInner<T: PricingValue> {
    lapse: Timelapse<Candle>,
    source: Source<T>,
    relative_bin_size: usize,
    last_read_ubound: usize,
    attached: bool,
    node_id: NodeId,
    on_refresh_linked_sources: Event,
    callback: Option<RefreshCallback>,
}

impl<T: PricingValue> Digest<T> {
    /// Create a digest of `source` on the coarser `interval` and catch up on the
    /// data the source already holds.
    pub fn new(source: &Source<T>, interval: Interval) -> Result<Self> {
        if !interval.allowed_as_digest(source.interval()) {
            return Err(SeriesError::Alignment(format!(
                "a {} digest cannot summarize a {} source",
                interval,
                source.interval()
            )));
        }
        if interval.round(source.base_timestamp()) != source.base_timestamp() {
            return Err(SeriesError::Alignment(format!(
                "the source base is not aligned on the {} grid",
                interval
            )));
        }
        let relative_bin_size = (interval.seconds() / source.interval().seconds()) as usize;
        let lapse = Timelapse::new(
            GrowingArray::new(DIGEST_CHUNK_ROWS, 1, Candle::fill())?,
            interval,
            source.base_timestamp(),
        );
        let cell = Rc::new(RefCell::new(DigestInner {
            lapse,
            source: source.clone(),
            relative_bin_size,
            last_read_ubound: 0,
            attached: true,
            node_id: NodeId::next(),
            on_refresh_linked_sources: Event::new(),
            callback: None,
        }));
        let weak = Rc::downgrade(&cell);
        let callback: RefreshCallback = Rc::new(move |_origin, start, end| {
            if let Some(cell) = weak.upgrade() {
                Digest { inner: cell }.refresh(start, end);
            }
        });
        source.subscribe_linked_sources(&callback);
        cell.borrow_mut().callback = Some(callback);

        let digest = Digest { inner: cell };
        let existing = source.len();
        digest.refresh(0, existing);
        Ok(digest)
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

    /// The digest rides on the source's clock.
    pub fn base_timestamp(&self) -> DateTime<Utc> {
        self.inner.borrow().source.base_timestamp()
    }

    pub fn source(&self) -> Source<T> {
        self.inner.borrow().source.clone()
    }

    /// Source rows per digest bin.
    pub fn relative_bin_size(&self) -> usize {
        self.inner.borrow().relative_bin_size
    }

    pub fn get(&self, index: usize) -> Result<Candle> {
        self.inner.borrow().lapse.get_value(index)
    }

    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<Candle>> {
        self.inner.borrow().lapse.get_slice(start, stop)
    }

    /// Whether this digest still follows its source.
    pub fn attached(&self) -> bool {
        self.inner.borrow().attached
    }

    /// Stop following the source. The summarized data stays readable but will
    /// not update anymore. Idempotent.
    pub fn detach(&self) {
        let (source, callback) = {
            let mut inner = self.inner.borrow_mut();
            inner.attached = false;
            (inner.source.clone(), inner.callback.take())
        };
        if let Some(callback) = callback {
            source.unsubscribe_linked_sources(&callback);
        }
    }

    /// Observe bin refreshes of this digest.
    pub fn subscribe_linked_sources(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_linked_sources.register(callback);
    }

    pub fn unsubscribe_linked_sources(&self, callback: &RefreshCallback) {
        self.inner.borrow().on_refresh_linked_sources.unregister(callback);
    }

    /// Re-fold the bins covering the source window `[start, end)`.
    fn refresh(&self, start: usize, end: usize) {
        let (window_start, window_end) = {
            let mut inner = self.inner.borrow_mut();
            let relative_bin_size = inner.relative_bin_size;
            let resume = start.min(inner.last_read_ubound);
            let min_index = resume / relative_bin_size;
            let max_index = end.div_ceil(relative_bin_size);
            let source = inner.source.clone();
            let source_len = source.len();
            for bin_index in min_index..max_index {
                let lo = bin_index * relative_bin_size;
                let hi = ((bin_index + 1) * relative_bin_size).min(source_len);
                if lo >= hi {
                    continue;
                }
                let Ok(rows) = source.get_slice(lo, hi) else { continue };
                if let Some(candle) = fold_candle(&rows) {
                    let _ = inner.lapse.set(bin_index, &[candle]);
                }
            }
            inner.last_read_ubound = inner.last_read_ubound.max(end);
            (min_index, max_index)
        };
        let (origin, callbacks) = {
            let inner = self.inner.borrow();
            (inner.node_id, inner.on_refresh_linked_sources.callbacks())
        };
        for callback in callbacks {
            callback(origin, window_start, window_end);
        }
    }
}
