//! Streaming time-series engine for financial price data.
//!
//! Raw ticks and candles land in append-only sources; digests, linked sources
//! and indicators derive from them along a directed acyclic graph. Every push
//! propagates synchronously: each derived node recomputes exactly the index
//! window its dependencies just produced, so the whole graph converges before
//! the push returns.

// Core modules
pub mod domain;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use domain::{Candle, CandleComponent, Interval, PricingValue, StandardizedPrice};
pub use engine::{CandleSource, Digest, Event, NodeId, PriceSource, RefreshCallback, Source};
pub use error::{Result, SeriesError};
pub use indicators::{
    Indicator, LeastSquaresLine, MovingMean, MovingVariance, Parent, Predictor,
    PredictorAlgorithm, PredictorColumn, Side,
};
pub use models::{GrowingArray, PushIndex, Timelapse};
