use std::fmt;

bitflags::bitflags! {
    /// Everything sequence analysis noticed about one segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SegmentAnalysis: u32 {
        const RETRANSMISSION = 1 << 0;
        /// A gap precedes this segment: earlier data was not captured.
        const LOST_PACKET = 1 << 1;
        /// Acknowledges data that was never seen.
        const ACK_LOST_PACKET = 1 << 2;
        const KEEP_ALIVE = 1 << 3;
        const DUPLICATE_ACK = 1 << 4;
        const ZERO_WINDOW = 1 << 5;
        const ZERO_WINDOW_PROBE = 1 << 6;
        const ZERO_WINDOW_PROBE_ACK = 1 << 7;
        const KEEP_ALIVE_ACK = 1 << 8;
        const OUT_OF_ORDER = 1 << 9;
        const FAST_RETRANSMISSION = 1 << 10;
        const WINDOW_UPDATE = 1 << 11;
        const WINDOW_FULL = 1 << 12;
        const REUSED_PORTS = 1 << 13;
        /// Retransmitted data the peer had already acknowledged.
        const SPURIOUS_RETRANSMISSION = 1 << 14;
    }
}

/// Single tag summarising a segment, for graphs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentClass {
    KeepAlive,
    ZeroWindowProbe,
    WindowUpdate,
    ZeroWindow,
    Retransmission,
    FastRetransmission,
    OutOfOrder,
    LostSegment,
    InOrder,
    DuplicateAck,
    Other,
}

impl SegmentAnalysis {
    /// Picks the primary class. Fast retransmission outranks out-of-order
    /// when both were raised for the same segment.
    pub fn primary_class(self, carries_sequence: bool) -> SegmentClass {
        if self.intersects(Self::KEEP_ALIVE | Self::KEEP_ALIVE_ACK) {
            SegmentClass::KeepAlive
        } else if self.intersects(Self::ZERO_WINDOW_PROBE | Self::ZERO_WINDOW_PROBE_ACK) {
            SegmentClass::ZeroWindowProbe
        } else if self.contains(Self::WINDOW_UPDATE) {
            SegmentClass::WindowUpdate
        } else if self.contains(Self::ZERO_WINDOW) {
            SegmentClass::ZeroWindow
        } else if self.intersects(Self::RETRANSMISSION | Self::SPURIOUS_RETRANSMISSION) {
            SegmentClass::Retransmission
        } else if self.contains(Self::FAST_RETRANSMISSION) {
            SegmentClass::FastRetransmission
        } else if self.contains(Self::OUT_OF_ORDER) {
            SegmentClass::OutOfOrder
        } else if self.intersects(Self::LOST_PACKET | Self::ACK_LOST_PACKET) {
            SegmentClass::LostSegment
        } else if carries_sequence {
            SegmentClass::InOrder
        } else if self.contains(Self::DUPLICATE_ACK) {
            SegmentClass::DuplicateAck
        } else {
            SegmentClass::Other
        }
    }

    /// Any of the retransmission family.
    pub fn is_retransmission(self) -> bool {
        self.intersects(
            Self::RETRANSMISSION | Self::FAST_RETRANSMISSION | Self::SPURIOUS_RETRANSMISSION,
        )
    }
}

impl fmt::Display for SegmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentClass::KeepAlive => "keep-alive",
            SegmentClass::ZeroWindowProbe => "zero-window-probe",
            SegmentClass::WindowUpdate => "window-update",
            SegmentClass::ZeroWindow => "zero-window",
            SegmentClass::Retransmission => "retransmission",
            SegmentClass::FastRetransmission => "fast-retransmission",
            SegmentClass::OutOfOrder => "out-of-order",
            SegmentClass::LostSegment => "lost-segment",
            SegmentClass::InOrder => "in-order",
            SegmentClass::DuplicateAck => "dup-ack",
            SegmentClass::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{SegmentAnalysis, SegmentClass};

    #[test]
    fn keep_alive_outranks_everything() {
        let flags = SegmentAnalysis::KEEP_ALIVE | SegmentAnalysis::ZERO_WINDOW;
        assert_eq!(flags.primary_class(true), SegmentClass::KeepAlive);
    }

    #[test]
    fn fast_retransmission_beats_out_of_order() {
        let flags = SegmentAnalysis::FAST_RETRANSMISSION | SegmentAnalysis::OUT_OF_ORDER;
        assert_eq!(flags.primary_class(true), SegmentClass::FastRetransmission);
    }

    #[test]
    fn clean_segments_split_on_payload() {
        assert_eq!(SegmentAnalysis::empty().primary_class(true), SegmentClass::InOrder);
        assert_eq!(SegmentAnalysis::empty().primary_class(false), SegmentClass::Other);
        assert_eq!(
            SegmentAnalysis::DUPLICATE_ACK.primary_class(false),
            SegmentClass::DuplicateAck
        );
    }

    #[test]
    fn spurious_counts_as_retransmission() {
        let flags = SegmentAnalysis::SPURIOUS_RETRANSMISSION;
        assert!(flags.is_retransmission());
        assert_eq!(flags.primary_class(true), SegmentClass::Retransmission);
    }
}
