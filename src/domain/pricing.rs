//! Standardized integer prices and Japanese candles.
//!
//! Raw prices are standardized to unsigned integers before they reach this crate:
//! satoshis carry no scaling, fiat conversions are fixed-point scaled (e.g. six
//! digits) and the point dropped. Keeping the raw data integral avoids float noise
//! in storage; floats only appear in derived indicators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally scaled integer price.
pub type StandardizedPrice = u64;

/// OHLC record over one interval: start, end, minimum and maximum price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub start: StandardizedPrice,
    pub end: StandardizedPrice,
    pub min: StandardizedPrice,
    pub max: StandardizedPrice,
}

impl Candle {
    pub fn new(
        start: StandardizedPrice,
        end: StandardizedPrice,
        min: StandardizedPrice,
        max: StandardizedPrice,
    ) -> Self {
        debug_assert!(min <= start && min <= end && start <= max && end <= max);
        Candle { start, end, min, max }
    }

    /// A degenerate candle sitting entirely at one price.
    pub fn at(price: StandardizedPrice) -> Self {
        Candle { start: price, end: price, min: price, max: price }
    }

    /// Extend this candle with one more tick.
    pub fn merge_price(&self, price: StandardizedPrice) -> Candle {
        Candle {
            start: self.start,
            end: price,
            min: self.min.min(price),
            max: self.max.max(price),
        }
    }

    /// Merge a sibling candle into this one.
    // TODO: `end` keeps max(self.start, other.start); the close of the later
    // candle (other.end) is the more plausible value. Pinned by tests until the
    // downstream consumers are audited.
    pub fn merge(&self, other: &Candle) -> Candle {
        Candle {
            start: self.start.min(other.start),
            end: self.start.max(other.start),
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "O:{} C:{} L:{} H:{}",
            self.start, self.end, self.min, self.max
        )
    }
}

/// Which scalar a candle projects to when a float consumer reads it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::EnumIter,
)]
pub enum CandleComponent {
    Start,
    #[default]
    End,
    Min,
    Max,
}

impl CandleComponent {
    pub fn pluck(&self, candle: &Candle) -> StandardizedPrice {
        match self {
            CandleComponent::Start => candle.start,
            CandleComponent::End => candle.end,
            CandleComponent::Min => candle.min,
            CandleComponent::Max => candle.max,
        }
    }
}

impl fmt::Display for CandleComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CandleComponent::Start => write!(f, "start"),
            CandleComponent::End => write!(f, "end"),
            CandleComponent::Min => write!(f, "min"),
            CandleComponent::Max => write!(f, "max"),
        }
    }
}

/// The two value shapes a raw series can carry: scalar prices and candles.
///
/// The trait covers everything the storage and rebinning layers need without
/// boxing: a fill value for unwritten cells, linear back-fill interpolation,
/// candle seeding/merging for coarse bins, and scalar projection for float
/// consumers.
pub trait PricingValue: Copy + fmt::Debug + 'static {
    /// Value used for allocated-but-unwritten cells.
    fn fill() -> Self;

    /// Linear interpolation at `step` of `distance` between two boundary values,
    /// in integer arithmetic (truncation toward zero).
    fn lerp(left: Self, right: Self, step: i64, distance: i64) -> Self;

    /// Open a candle from this value.
    fn seed_candle(self) -> Candle;

    /// Fold this value into an already-open candle.
    fn merge_into(self, accumulated: Candle) -> Candle;

    /// The scalar a float consumer reads, picking `component` for candles.
    fn project(self, component: CandleComponent) -> f64;
}

fn lerp_price(left: u64, right: u64, step: i64, distance: i64) -> u64 {
    let delta = right as i128 - left as i128;
    (left as i128 + delta * step as i128 / distance as i128) as u64
}

impl PricingValue for StandardizedPrice {
    fn fill() -> Self {
        0
    }

    fn lerp(left: Self, right: Self, step: i64, distance: i64) -> Self {
        lerp_price(left, right, step, distance)
    }

    fn seed_candle(self) -> Candle {
        Candle::at(self)
    }

    fn merge_into(self, accumulated: Candle) -> Candle {
        accumulated.merge_price(self)
    }

    fn project(self, _component: CandleComponent) -> f64 {
        self as f64
    }
}

impl PricingValue for Candle {
    fn fill() -> Self {
        Candle::default()
    }

    fn lerp(left: Self, right: Self, step: i64, distance: i64) -> Self {
        Candle {
            start: lerp_price(left.start, right.start, step, distance),
            end: lerp_price(left.end, right.end, step, distance),
            min: lerp_price(left.min, right.min, step, distance),
            max: lerp_price(left.max, right.max, step, distance),
        }
    }

    fn seed_candle(self) -> Candle {
        self
    }

    fn merge_into(self, accumulated: Candle) -> Candle {
        accumulated.merge(&self)
    }

    fn project(self, component: CandleComponent) -> f64 {
        component.pluck(&self) as f64
    }
}

/// Fold a run of prices or candles into a single candle: the first element opens
/// the candle, the rest merge in. Returns `None` on an empty run.
pub fn fold_candle<V: PricingValue>(values: &[V]) -> Option<Candle> {
    let mut iter = values.iter();
    let mut candle = iter.next()?.seed_candle();
    for value in iter {
        candle = value.merge_into(candle);
    }
    Some(candle)
}
