//! Rolling-window statistics: moving mean and moving variance.
//!
//! These are rarely read directly; they mostly feed further indicators (a
//! variance needs its mean, bands need both). A mean can read a price source, a
//! candle source through one projected component, or any width-1 indicator.

use crate::error::{Result, SeriesError};
use crate::indicators::{INDICATOR_CHUNK_ROWS, Indicator, Parent, UpdateFn};
use crate::models::Timelapse;

/// Moving mean with tail size `T`: row `i` averages the projected parent rows
/// `[i-T+1, i]`. Rows with an incomplete tail hold NaN unless partial means are
/// requested at construction.
#[derive(Clone)]
pub struct MovingMean {
    handle: Indicator,
    parent: Parent,
    tail_size: usize,
    nan_on_short_tail: bool,
}

impl MovingMean {
    /// Standard form: NaN until the tail is complete.
    pub fn new(parent: Parent, tail_size: usize) -> Result<Self> {
        Self::build(parent, tail_size, true)
    }

    /// Short-tail rows hold a partial sum still divided by the full tail size.
    /// The early rows are biased low; callers opt in knowingly.
    pub fn with_partial_means(parent: Parent, tail_size: usize) -> Result<Self> {
        Self::build(parent, tail_size, false)
    }

    fn build(parent: Parent, tail_size: usize, nan_on_short_tail: bool) -> Result<Self> {
        if tail_size < 2 {
            return Err(SeriesError::InvalidArgument(
                "the tail size of a moving mean must be greater than 1".to_string(),
            ));
        }
        if let Parent::Indicator(upstream) = &parent {
            if upstream.width() != 1 {
                return Err(SeriesError::InvalidArgument(
                    "an indicator feeding a moving mean must have width 1".to_string(),
                ));
            }
        }
        let reader = parent.clone();
        let update: Box<UpdateFn> = Box::new(move |lapse, start, end| {
            update_mean(&reader, tail_size, nan_on_short_tail, lapse, start, end)
        });
        let handle = Indicator::build(vec![parent.clone()], 1, INDICATOR_CHUNK_ROWS, update)?;
        Ok(MovingMean { handle, parent, tail_size, nan_on_short_tail })
    }

    pub fn tail_size(&self) -> usize {
        self.tail_size
    }

    pub fn parent(&self) -> &Parent {
        &self.parent
    }

    pub fn nan_on_short_tail(&self) -> bool {
        self.nan_on_short_tail
    }

    /// The underlying indicator node, e.g. to feed further indicators.
    pub fn indicator(&self) -> &Indicator {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn value_at(&self, index: usize) -> Result<f64> {
        self.handle.value_at(index)
    }

    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<f64>> {
        self.handle.get_slice(start, stop)
    }

    pub fn disposed(&self) -> bool {
        self.handle.disposed()
    }

    pub fn dispose(&self) {
        self.handle.dispose();
    }
}

fn update_mean(
    parent: &Parent,
    tail_size: usize,
    nan_on_short_tail: bool,
    lapse: &mut Timelapse<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    if start >= end {
        return Ok(());
    }
    let lo = start.saturating_sub(tail_size - 1);
    let span = parent.read_projected(lo, end)?;
    for index in start..end {
        let value = if index + 1 < tail_size && nan_on_short_tail {
            f64::NAN
        } else {
            let tail_lo = index.saturating_sub(tail_size - 1);
            let window = &span[tail_lo - lo..=index - lo];
            window.iter().sum::<f64>() / tail_size as f64
        };
        lapse.set(index, &[value])?;
    }
    Ok(())
}

/// Moving variance and/or standard error over a moving mean's window.
///
/// Reads the mean for the center and the mean's own parent for the raw values,
/// so mean and variance always describe the same tail.
#[derive(Clone)]
pub struct MovingVariance {
    handle: Indicator,
    with_variance: bool,
    with_stderr: bool,
    unbiased: bool,
    tail_size: usize,
}

impl MovingVariance {
    /// At least one of `variance`/`stderr` must be requested. Columns come out
    /// in `[variance, stderr]` order, narrowed to the enabled ones.
    pub fn new(mean: &MovingMean, variance: bool, stderr: bool, unbiased: bool) -> Result<Self> {
        if !(variance || stderr) {
            return Err(SeriesError::InvalidArgument(
                "a moving variance needs at least one of the variance or stderr columns"
                    .to_string(),
            ));
        }
        let tail_size = mean.tail_size();
        let width = if variance && stderr { 2 } else { 1 };
        let center = mean.indicator().clone();
        let values = mean.parent().clone();
        let update: Box<UpdateFn> = Box::new(move |lapse, start, end| {
            update_variance(
                &center, &values, tail_size, variance, stderr, unbiased, lapse, start, end,
            )
        });
        let handle = Indicator::build(
            vec![Parent::indicator(mean.indicator())],
            width,
            INDICATOR_CHUNK_ROWS,
            update,
        )?;
        Ok(MovingVariance {
            handle,
            with_variance: variance,
            with_stderr: stderr,
            unbiased,
            tail_size,
        })
    }

    pub fn tail_size(&self) -> usize {
        self.tail_size
    }

    pub fn with_variance(&self) -> bool {
        self.with_variance
    }

    pub fn with_stderr(&self) -> bool {
        self.with_stderr
    }

    pub fn unbiased(&self) -> bool {
        self.unbiased
    }

    pub fn indicator(&self) -> &Indicator {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Vec<f64>> {
        self.handle.get(index)
    }

    pub fn disposed(&self) -> bool {
        self.handle.disposed()
    }

    pub fn dispose(&self) {
        self.handle.dispose();
    }
}

#[allow(clippy::too_many_arguments)]
fn update_variance(
    center: &Indicator,
    values: &Parent,
    tail_size: usize,
    with_variance: bool,
    with_stderr: bool,
    unbiased: bool,
    lapse: &mut Timelapse<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    if start >= end {
        return Ok(());
    }
    let means = center.get_slice(start, end)?;
    let lo = start.saturating_sub(tail_size - 1);
    let span = values.read_projected(lo, end)?;
    let divisor = if unbiased { tail_size - 1 } else { tail_size } as f64;
    for index in start..end {
        let mean = means[index - start];
        let tail_lo = index.saturating_sub(tail_size - 1);
        let window = &span[tail_lo - lo..=index - lo];
        let variance = window.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / divisor;
        if with_variance && with_stderr {
            lapse.set(index, &[variance, variance.sqrt()])?;
        } else if with_variance {
            lapse.set(index, &[variance])?;
        } else {
            lapse.set(index, &[variance.sqrt()])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, CandleComponent, Interval};
    use crate::engine::source::{CandleSource, PriceSource, Source};
    use chrono::{TimeZone, Utc};
    use statrs::statistics::Statistics;

    fn price_source(values: &[u64]) -> PriceSource {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let source = Source::new(base, Interval::Minute, None).unwrap();
        if !values.is_empty() {
            source.push(values).unwrap();
        }
        source
    }

    #[test]
    fn the_tail_must_hold_at_least_two_rows() {
        let source = price_source(&[]);
        assert!(matches!(
            MovingMean::new(Parent::prices(&source), 1),
            Err(SeriesError::InvalidArgument(_))
        ));
        assert!(MovingMean::new(Parent::prices(&source), 2).is_ok());
    }

    #[test]
    fn the_mean_matches_the_hand_computed_table() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let mean = MovingMean::new(Parent::prices(&source), 3).unwrap();
        assert_eq!(mean.len(), 5);
        assert!(mean.value_at(0).unwrap().is_nan());
        assert!(mean.value_at(1).unwrap().is_nan());
        assert_eq!(mean.value_at(2).unwrap(), 20.0);
        assert_eq!(mean.value_at(3).unwrap(), 30.0);
        assert_eq!(mean.value_at(4).unwrap(), 40.0);
    }

    #[test]
    fn tickwise_pushes_equal_one_batch_push() {
        let values: Vec<u64> = vec![10, 20, 30, 40, 50, 60, 70];
        let batch = price_source(&values);
        let batch_mean = MovingMean::new(Parent::prices(&batch), 3).unwrap();

        let trickle = price_source(&[]);
        let trickle_mean = MovingMean::new(Parent::prices(&trickle), 3).unwrap();
        for value in &values {
            trickle.push(&[*value]).unwrap();
        }

        for index in 2..values.len() {
            assert_eq!(
                batch_mean.value_at(index).unwrap(),
                trickle_mean.value_at(index).unwrap(),
                "row {} should not depend on push batching",
                index
            );
        }
    }

    #[test]
    fn partial_means_divide_by_the_full_tail() {
        let source = price_source(&[10, 20, 30]);
        let mean = MovingMean::with_partial_means(Parent::prices(&source), 3).unwrap();
        assert!((mean.value_at(0).unwrap() - 10.0 / 3.0).abs() < 1e-12);
        assert_eq!(mean.value_at(1).unwrap(), 10.0);
        assert_eq!(mean.value_at(2).unwrap(), 20.0);
    }

    #[test]
    fn candle_parents_project_the_chosen_component() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let source: CandleSource = Source::new(base, Interval::Minute, None).unwrap();
        source
            .push(&[
                Candle::new(10, 12, 8, 14),
                Candle::new(12, 16, 10, 18),
                Candle::new(16, 14, 12, 20),
            ])
            .unwrap();

        let closes =
            MovingMean::new(Parent::candles(&source), 2).unwrap();
        assert_eq!(closes.value_at(1).unwrap(), 14.0);
        assert_eq!(closes.value_at(2).unwrap(), 15.0);

        let lows = MovingMean::new(
            Parent::candles_component(&source, CandleComponent::Min),
            2,
        )
        .unwrap();
        assert_eq!(lows.value_at(1).unwrap(), 9.0);
        assert_eq!(lows.value_at(2).unwrap(), 11.0);
    }

    #[test]
    fn means_stack_on_width_one_indicators() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let inner = MovingMean::with_partial_means(Parent::prices(&source), 2).unwrap();
        let outer = MovingMean::new(Parent::indicator(inner.indicator()), 2).unwrap();
        // inner = [5, 15, 25, 35, 45]; outer row 2 = (15 + 25) / 2.
        assert_eq!(outer.value_at(2).unwrap(), 20.0);
    }

    #[test]
    fn wide_indicators_cannot_feed_a_mean() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let mean = MovingMean::new(Parent::prices(&source), 3).unwrap();
        let both = MovingVariance::new(&mean, true, true, true).unwrap();
        assert!(matches!(
            MovingMean::new(Parent::indicator(both.indicator()), 3),
            Err(SeriesError::InvalidArgument(_))
        ));
    }

    #[test]
    fn variance_and_stderr_match_the_hand_computed_row() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let mean = MovingMean::new(Parent::prices(&source), 3).unwrap();
        let spread = MovingVariance::new(&mean, true, true, true).unwrap();
        assert_eq!(spread.indicator().width(), 2);

        // Window [10, 20, 30] around mean 20: variance 100, stderr 10.
        assert_eq!(spread.get(2).unwrap(), vec![100.0, 10.0]);
        assert_eq!(spread.get(3).unwrap(), vec![100.0, 10.0]);
        // Short-tail rows inherit the mean's NaN.
        assert!(spread.get(0).unwrap()[0].is_nan());
        assert!(spread.get(1).unwrap()[1].is_nan());
    }

    #[test]
    fn single_column_layouts_narrow_correctly() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let mean = MovingMean::new(Parent::prices(&source), 3).unwrap();

        let variance_only = MovingVariance::new(&mean, true, false, true).unwrap();
        assert_eq!(variance_only.indicator().width(), 1);
        assert_eq!(variance_only.get(2).unwrap(), vec![100.0]);

        let stderr_only = MovingVariance::new(&mean, false, true, true).unwrap();
        assert_eq!(stderr_only.indicator().width(), 1);
        assert_eq!(stderr_only.get(2).unwrap(), vec![10.0]);

        assert!(matches!(
            MovingVariance::new(&mean, false, false, true),
            Err(SeriesError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rolling_statistics_agree_with_batch_statistics() {
        let values: Vec<u64> = vec![103, 99, 121, 110, 95, 130, 104, 118, 101, 126];
        let source = price_source(&values);
        let tail = 4;
        let mean = MovingMean::new(Parent::prices(&source), tail).unwrap();
        let spread = MovingVariance::new(&mean, true, false, true).unwrap();

        for index in (tail - 1)..values.len() {
            let window: Vec<f64> = values[index + 1 - tail..=index]
                .iter()
                .map(|value| *value as f64)
                .collect();
            let expected_mean = window.as_slice().mean();
            let expected_variance = window.as_slice().variance();
            assert!(
                (mean.value_at(index).unwrap() - expected_mean).abs() < 1e-9,
                "mean at row {}",
                index
            );
            assert!(
                (spread.get(index).unwrap()[0] - expected_variance).abs() < 1e-9,
                "variance at row {}",
                index
            );
        }
    }

    #[test]
    fn disposing_the_mean_cascades_to_the_variance() {
        let source = price_source(&[10, 20, 30, 40, 50]);
        let mean = MovingMean::new(Parent::prices(&source), 3).unwrap();
        let spread = MovingVariance::new(&mean, true, true, true).unwrap();

        mean.dispose();
        assert!(mean.disposed());
        assert!(spread.disposed(), "dependents must be disposed recursively");
        assert!(matches!(mean.value_at(0), Err(SeriesError::Disposed)));
        assert!(matches!(spread.get(0), Err(SeriesError::Disposed)));

        // The source keeps working and no longer reaches either node.
        source.push(&[60, 70]).unwrap();
        assert!(mean.disposed() && spread.disposed());
    }
}
