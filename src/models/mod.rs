// Storage models for sampled series
// These modules contain pure data structures independent of the update graph

pub mod growing_array;
pub mod timelapse;

// Re-export key types for convenience
pub use growing_array::GrowingArray;
pub use timelapse::{PushIndex, Timelapse};
