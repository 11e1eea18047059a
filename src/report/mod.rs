pub mod stream;
pub mod throughput;

pub use stream::{DirectionSummary, MetaDirectionSummary, MetaReport, StreamReport, SubflowRole};
pub use throughput::{RatePoint, goodput, throughput};
