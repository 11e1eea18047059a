use std::fmt;

use crate::analysis::Classification;
use crate::mptcp::{MptcpAnalysis, PendingSpan};
use crate::report::{MetaReport, StreamReport};
use crate::state::Direction;

use super::error::TrackError;

/// Why a connection stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Reset,
    /// Both directions sent FIN.
    Closed,
    /// A new SYN took over the 4-tuple.
    Reused,
    Evicted,
    Idle,
    SessionEnd,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownReason::Reset => "reset",
            TeardownReason::Closed => "closed",
            TeardownReason::Reused => "reused",
            TeardownReason::Evicted => "evicted",
            TeardownReason::Idle => "idle",
            TeardownReason::SessionEnd => "session end",
        };
        f.write_str(name)
    }
}

/// State thrown away when a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub stream: u32,
    pub reason: TeardownReason,
    /// Partial PDUs dropped without delivery.
    pub discarded_pdus: usize,
    /// PDUs delivered because the flow reassembled until close.
    pub delivered_at_close: usize,
    /// Bytes still waiting behind a sequence gap.
    pub dropped_out_of_order_bytes: usize,
    /// Subflow payload no DSS mapping ever covered.
    pub unattributed: Vec<(Direction, PendingSpan)>,
}

impl TeardownReport {
    pub fn unattributed_bytes(&self) -> u64 {
        self.unattributed
            .iter()
            .map(|(_, span)| u64::from(span.len))
            .sum()
    }
}

/// Everything learned from one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReport {
    pub stream: u32,
    pub direction: Direction,
    pub frame: u32,
    /// Relative to the sender's initial sequence number.
    pub seq: u32,
    pub next_seq: u32,
    /// Relative to the receiver's initial sequence number.
    pub ack: Option<u32>,
    pub len: u32,
    pub analysis: Classification,
    pub pdus_delivered: usize,
    pub pdu_error: Option<TrackError>,
    pub mptcp: Option<MptcpAnalysis>,
    /// Set when this segment closed or reset the connection.
    pub teardown: Option<TeardownReport>,
    /// Other connections retired while handling this segment.
    pub retired: Vec<TeardownReport>,
}

/// Final state of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub teardowns: Vec<TeardownReport>,
    /// Every connection seen, ordered by stream index.
    pub streams: Vec<StreamReport>,
    pub metas: Vec<MetaReport>,
}
