pub mod config;
pub mod error;
pub mod events;
pub mod tracker;

pub use config::{FramingConfig, TrackerConfig};
pub use error::TrackError;
pub use events::{SegmentReport, SessionReport, TeardownReason, TeardownReport};
pub use tracker::{Dissection, StreamTracker};
