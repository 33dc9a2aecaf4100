pub mod digest;
pub mod event;
pub mod source;

// Re-export key components
pub use digest::Digest;
pub use event::{Event, NodeId, RefreshCallback};
pub use source::{CandleSource, PriceSource, Source};
