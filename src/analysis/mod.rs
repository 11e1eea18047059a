pub mod flags;
pub mod sequence;

pub use flags::{SegmentAnalysis, SegmentClass};
pub use sequence::{Classification, Thresholds, analyze_segment, track_segment};
