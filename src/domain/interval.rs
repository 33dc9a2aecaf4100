//! Time quanta for sampled series.
//!
//! Every series is sampled on a fixed grid: index 0 sits at the base timestamp and
//! index `i` at `base + i * interval`. Intervals also gate what a series may be used
//! for: intraday quanta can receive raw pushes, while the day-scale quanta only make
//! sense as digest targets built from a finer feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SeriesError;
use crate::utils::TimeUtils;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::EnumIter,
)]
pub enum Interval {
    Second,
    Minute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    Hour,
    FourHours,
    Day,
    Week,
}

impl Interval {
    /// The quantum length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::Second => TimeUtils::SECS_IN_S,
            Interval::Minute => TimeUtils::SECS_IN_MIN,
            Interval::FiveMinutes => TimeUtils::SECS_IN_5_MIN,
            Interval::FifteenMinutes => TimeUtils::SECS_IN_15_MIN,
            Interval::ThirtyMinutes => TimeUtils::SECS_IN_30_MIN,
            Interval::Hour => TimeUtils::SECS_IN_H,
            Interval::FourHours => TimeUtils::SECS_IN_4_H,
            Interval::Day => TimeUtils::SECS_IN_D,
            Interval::Week => TimeUtils::SECS_IN_W,
        }
    }

    /// Whether raw data may be pushed at this quantum. Day-scale quanta are
    /// reserved for digests built from a finer source.
    pub fn allowed_as_source(&self) -> bool {
        self.seconds() <= TimeUtils::SECS_IN_H
    }

    /// Whether this quantum can digest a series sampled at `finer`: it must be
    /// strictly coarser and an exact multiple.
    pub fn allowed_as_digest(&self, finer: Interval) -> bool {
        self.seconds() > finer.seconds() && self.seconds() % finer.seconds() == 0
    }

    /// Floor a timestamp to the nearest multiple of this quantum.
    pub fn round(&self, stamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = stamp.timestamp();
        let floored = secs - secs.rem_euclid(self.seconds());
        DateTime::from_timestamp(floored, 0).expect("floored timestamp is representable")
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let shorthand = match self {
            Interval::Second => "1s",
            Interval::Minute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::Hour => "1h",
            Interval::FourHours => "4h",
            Interval::Day => "1d",
            Interval::Week => "1w",
        };
        write!(f, "{}", shorthand)
    }
}

impl FromStr for Interval {
    type Err = SeriesError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "1s" => Ok(Interval::Second),
            "1m" => Ok(Interval::Minute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "30m" => Ok(Interval::ThirtyMinutes),
            "1h" => Ok(Interval::Hour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::Day),
            "1w" => Ok(Interval::Week),
            other => Err(SeriesError::InvalidArgument(format!(
                "unknown interval shorthand: {}",
                other
            ))),
        }
    }
}
