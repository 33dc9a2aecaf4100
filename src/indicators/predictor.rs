//! One-step-ahead prediction over a scalar series.
//!
//! The indicator machinery here is algorithm-agnostic: a `PredictorAlgorithm`
//! consumes a fixed-size window and answers a prediction plus its structural
//! error, and the `Predictor` indicator drives it across the series, tracking
//! prediction error statistics alongside. `LeastSquaresLine` is the bundled
//! linear algorithm; anything implementing the trait plugs in the same way.

use crate::engine::source::PriceSource;
use crate::error::{Result, SeriesError};
use crate::indicators::{INDICATOR_CHUNK_ROWS, Indicator, Parent, UpdateFn};
use crate::models::Timelapse;
use serde::{Deserialize, Serialize};

/// Which side of the book a source-fed predictor reads.
///
/// Sources currently carry a single price column, so both sides resolve to it;
/// the selector is part of the interface so feeds can grow a second side
/// without breaking callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// Column layout of a predictor's float series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorColumn {
    Prediction = 0,
    StructuralErrorAtPredictionTime = 1,
    StructuralErrorAtPredictedTime = 2,
    PredictionDifference = 3,
    StandardError = 4,
}

const PREDICTOR_WIDTH: usize = 5;

/// A pluggable prediction strategy.
///
/// `tail_size` is how many trailing values a prediction needs, `step` how far
/// into the future the prediction lands. `predict` answers the predicted value
/// and a structural error characterizing the fit quality at prediction time.
pub trait PredictorAlgorithm {
    fn tail_size(&self) -> usize;
    fn step(&self) -> usize;
    fn predict(&self, window: &[f64]) -> (f64, f64);
}

/// Ordinary least-squares line fit over the window, extrapolated `step` indices
/// past the window end. The structural error is the regression standard error
/// (zero for windows too short to have residual degrees of freedom).
#[derive(Debug, Clone)]
pub struct LeastSquaresLine {
    tail_size: usize,
    step: usize,
}

impl LeastSquaresLine {
    pub fn new(tail_size: usize, step: usize) -> Result<Self> {
        if tail_size < 2 {
            return Err(SeriesError::InvalidArgument(
                "a line fit needs at least two points".to_string(),
            ));
        }
        if step < 1 {
            return Err(SeriesError::InvalidArgument(
                "the prediction step must be at least 1".to_string(),
            ));
        }
        Ok(LeastSquaresLine { tail_size, step })
    }
}

impl PredictorAlgorithm for LeastSquaresLine {
    fn tail_size(&self) -> usize {
        self.tail_size
    }

    fn step(&self) -> usize {
        self.step
    }

    fn predict(&self, window: &[f64]) -> (f64, f64) {
        let n = window.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = window.iter().sum::<f64>() / n;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (i, y) in window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            sxx += dx * dx;
            sxy += dx * (y - mean_y);
        }
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let prediction = slope * (n - 1.0 + self.step as f64) + intercept;
        let sse: f64 = window
            .iter()
            .enumerate()
            .map(|(i, y)| {
                let residual = y - (slope * i as f64 + intercept);
                residual * residual
            })
            .sum();
        let structural_error = if window.len() > 2 { (sse / (n - 2.0)).sqrt() } else { 0.0 };
        (prediction, structural_error)
    }
}

/// Prediction indicator over a price source or a width-1 indicator.
///
/// Five columns per row: the prediction made at that row, the structural error
/// at prediction time, the structural error laid forward at the predicted row,
/// the difference between prediction and the value actually observed at the
/// row, and a rolling standard error over the recent differences.
pub struct Predictor {
    handle: Indicator,
    side: Option<Side>,
    tail_size: usize,
    step: usize,
    moving_stderr_tail_size: usize,
}

impl Predictor {
    /// Predict over a price source. A side must be chosen up front.
    pub fn from_source<A: PredictorAlgorithm + 'static>(
        source: &PriceSource,
        side: Side,
        algorithm: A,
        moving_stderr_tail_size: usize,
    ) -> Result<Self> {
        Self::build(Parent::prices(source), Some(side), algorithm, moving_stderr_tail_size)
    }

    /// Predict over a width-1 indicator.
    pub fn from_indicator<A: PredictorAlgorithm + 'static>(
        indicator: &Indicator,
        algorithm: A,
        moving_stderr_tail_size: usize,
    ) -> Result<Self> {
        if indicator.width() != 1 {
            return Err(SeriesError::InvalidArgument(
                "an indicator feeding a predictor must have width 1".to_string(),
            ));
        }
        Self::build(Parent::indicator(indicator), None, algorithm, moving_stderr_tail_size)
    }

    fn build<A: PredictorAlgorithm + 'static>(
        input: Parent,
        side: Option<Side>,
        algorithm: A,
        moving_stderr_tail_size: usize,
    ) -> Result<Self> {
        if moving_stderr_tail_size < 2 {
            return Err(SeriesError::InvalidArgument(
                "the moving standard error tail size must be at least 2".to_string(),
            ));
        }
        if moving_stderr_tail_size < 10 {
            log::warn!(
                "a standard error tail of {} rows will be noisy; 10 or more is advisable",
                moving_stderr_tail_size
            );
        }
        let tail_size = algorithm.tail_size();
        let step = algorithm.step();
        if tail_size < 1 || step < 1 {
            return Err(SeriesError::InvalidArgument(
                "the algorithm must declare a positive tail size and step".to_string(),
            ));
        }

        let reader = input.clone();
        let update: Box<UpdateFn> = Box::new(move |lapse, start, end| {
            update_predictor(
                &reader,
                &algorithm,
                moving_stderr_tail_size,
                lapse,
                start,
                end,
            )
        });
        let handle = Indicator::build(vec![input], PREDICTOR_WIDTH, INDICATOR_CHUNK_ROWS, update)?;
        Ok(Predictor { handle, side, tail_size, step, moving_stderr_tail_size })
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// Window length the algorithm consumes per prediction.
    pub fn prediction_tail_size(&self) -> usize {
        self.tail_size
    }

    /// How far past the last sample each prediction lands.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn moving_stderr_tail_size(&self) -> usize {
        self.moving_stderr_tail_size
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

    /// Copy of row `index` in `PredictorColumn` order.
    pub fn get(&self, index: usize) -> Result<Vec<f64>> {
        self.handle.get(index)
    }

    pub fn cell(&self, index: usize, column: PredictorColumn) -> Result<f64> {
        Ok(self.handle.get(index)?[column as usize])
    }

    pub fn disposed(&self) -> bool {
        self.handle.disposed()
    }

    pub fn dispose(&self) {
        self.handle.dispose();
    }
}

fn set_cell(
    lapse: &mut Timelapse<f64>,
    row: usize,
    column: PredictorColumn,
    value: f64,
) -> Result<()> {
    let mut cells = if row < lapse.len() {
        lapse.get(row)?
    } else {
        vec![f64::NAN; lapse.width()]
    };
    cells[column as usize] = value;
    lapse.set(row, &cells)
}

fn update_predictor<A: PredictorAlgorithm>(
    input: &Parent,
    algorithm: &A,
    moving_stderr_tail_size: usize,
    lapse: &mut Timelapse<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let tail_size = algorithm.tail_size();
    let step = algorithm.step();
    for index in start..end {
        // Not enough history yet; the row stays NaN.
        if index < tail_size {
            continue;
        }
        let window = input.read_projected(index + 1 - tail_size, index + 1)?;
        let (prediction, structural_error) = algorithm.predict(&window);
        set_cell(lapse, index, PredictorColumn::Prediction, prediction)?;
        set_cell(
            lapse,
            index,
            PredictorColumn::StructuralErrorAtPredictionTime,
            structural_error,
        )?;
        // The forward write may extend the series past the input's end.
        set_cell(
            lapse,
            index + step,
            PredictorColumn::StructuralErrorAtPredictedTime,
            structural_error,
        )?;

        let observed = input.value_projected(index)?;
        let difference = prediction - observed;
        set_cell(lapse, index, PredictorColumn::PredictionDifference, difference)?;

        let standard_error = if index >= moving_stderr_tail_size {
            let mut sum_of_squares = 0.0;
            for tail_row in (index + 1 - moving_stderr_tail_size)..=index {
                let tail_difference =
                    lapse.get(tail_row)?[PredictorColumn::PredictionDifference as usize];
                sum_of_squares += tail_difference * tail_difference;
            }
            (sum_of_squares / (moving_stderr_tail_size as f64 - 1.0)).sqrt()
        } else {
            f64::NAN
        };
        set_cell(lapse, index, PredictorColumn::StandardError, standard_error)?;
    }
    Ok(())
}
