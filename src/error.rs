use thiserror::Error;

/// Errors surfaced by series storage and the derived-series graph.
///
/// Validation errors are raised at the call site and never retried; a failed
/// operation leaves the node it was called on unchanged. Non-fatal conditions
/// (interpolation back-fill, small chunk sizes, small tails) go through the
/// `log` facade instead of this enum.
#[derive(Debug, Error)]
pub enum SeriesError {
    /// A read past the current length of a series.
    #[error("index {index} is out of range for a series of length {length}")]
    OutOfRange { index: usize, length: usize },

    /// Slice bounds that are not a forward unit-step range.
    #[error("invalid slice bounds [{start}, {stop})")]
    InvalidSlice { start: usize, stop: usize },

    /// Input data whose shape does not match the series layout.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A back-fill was required on an empty series with no initial value.
    #[error("cannot back-fill an empty series without an initial value")]
    MissingInitial,

    /// Interval/timestamp preconditions not met (divisibility, rounding, ordering).
    #[error("alignment error: {0}")]
    Alignment(String),

    /// A construction argument outside its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any read on a disposed indicator.
    #[error("the indicator has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, SeriesError>;
