pub mod analysis;
pub mod engine;
pub mod itree;
pub mod mptcp;
pub mod packet;
pub mod reassembly;
pub mod report;
pub mod state;

pub use engine::{
    Dissection, FramingConfig, SegmentReport, SessionReport, StreamTracker, TrackError,
    TrackerConfig,
};
pub use packet::{Segment, TcpFlags};
