use std::collections::VecDeque;
use std::time::Duration;

use crate::analysis::SegmentAnalysis;
use crate::reassembly::PduAssembler;

use super::reorder::ReorderBuffer;
use super::seq_space::SeqNum;

/// A segment waiting to be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnackedSegment {
    pub frame: u32,
    pub seq: u32,
    pub next_seq: u32,
    pub timestamp: Duration,
}

/// Window scaling as negotiated in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowScale {
    /// The SYN was not captured.
    #[default]
    Unknown,
    NotUsed,
    Shift(u8),
}

impl WindowScale {
    pub fn apply(self, window: u16) -> u32 {
        match self {
            WindowScale::Shift(shift) => u32::from(window) << shift,
            WindowScale::Unknown | WindowScale::NotUsed => u32::from(window),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCounters {
    pub segments: u64,
    pub payload_bytes: u64,
    pub retransmissions: u64,
    pub out_of_order: u64,
    pub duplicate_acks: u64,
    pub lost_segments: u64,
    pub keep_alives: u64,
    pub zero_windows: u64,
}

impl FlowCounters {
    pub fn record(&mut self, payload_len: u32, flags: SegmentAnalysis) {
        self.segments += 1;
        self.payload_bytes += u64::from(payload_len);
        if flags.is_retransmission() {
            self.retransmissions += 1;
        }
        if flags.contains(SegmentAnalysis::OUT_OF_ORDER) {
            self.out_of_order += 1;
        }
        if flags.contains(SegmentAnalysis::DUPLICATE_ACK) {
            self.duplicate_acks += 1;
        }
        if flags.contains(SegmentAnalysis::LOST_PACKET) {
            self.lost_segments += 1;
        }
        if flags.contains(SegmentAnalysis::KEEP_ALIVE) {
            self.keep_alives += 1;
        }
        if flags.contains(SegmentAnalysis::ZERO_WINDOW) {
            self.zero_windows += 1;
        }
    }
}

/// One direction of a connection. Sequence fields hold absolute values;
/// `relative` converts them for display.
#[derive(Debug, Default)]
pub struct Flow {
    pub base_seq: Option<u32>,
    pub next_seq: Option<u32>,
    pub next_seq_time: Duration,
    /// Highest byte sent contiguously; an ACK beyond it acknowledges
    /// something never seen.
    pub max_seq_acked: Option<u32>,
    pub last_ack: Option<u32>,
    pub last_ack_time: Duration,
    pub last_nondup_ack: u32,
    pub dup_ack_count: u32,
    /// Advertised window, already scaled.
    pub window: Option<u32>,
    pub win_scale: WindowScale,
    pub last_segment_flags: SegmentAnalysis,
    pub unacked: VecDeque<UnackedSegment>,
    pub fin_frame: Option<u32>,
    pub counters: FlowCounters,
    pub reorder: ReorderBuffer,
    pub assembler: PduAssembler,
}

impl Flow {
    /// Anchors relative numbering. A SYN consumes one sequence number, so
    /// data after it starts at relative 1 either way.
    pub fn set_base(&mut self, seq: u32, syn: bool) {
        if self.base_seq.is_none() {
            self.base_seq = Some(if syn { seq } else { seq.wrapping_sub(1) });
        }
    }

    pub fn relative(&self, seq: u32) -> u32 {
        seq.wrapping_sub(self.base_seq.unwrap_or(0))
    }

    /// Scales a window advertised outside the handshake.
    pub fn scaled_window(&self, window: u16, syn: bool) -> u32 {
        if syn {
            u32::from(window)
        } else {
            self.win_scale.apply(window)
        }
    }

    /// Drops every record `ack` covers. Returns the record whose end the ACK
    /// matches exactly, if there was one.
    pub fn prune_acked(&mut self, ack: u32) -> Option<UnackedSegment> {
        let mut matched = None;
        self.unacked.retain(|record| {
            if record.next_seq.at_or_before(ack) {
                if record.next_seq == ack {
                    matched = Some(*record);
                }
                false
            } else {
                true
            }
        });
        matched
    }

    pub fn is_finished(&self) -> bool {
        self.fin_frame.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Flow, UnackedSegment, WindowScale};

    fn record(frame: u32, seq: u32, next_seq: u32) -> UnackedSegment {
        UnackedSegment {
            frame,
            seq,
            next_seq,
            timestamp: Duration::from_millis(frame as u64),
        }
    }

    #[test]
    fn base_sequence_skips_syn() {
        let mut syn_side = Flow::default();
        syn_side.set_base(1000, true);
        assert_eq!(syn_side.relative(1001), 1);

        let mut midstream = Flow::default();
        midstream.set_base(5000, false);
        midstream.set_base(9000, false);
        assert_eq!(midstream.relative(5000), 1);
    }

    #[test]
    fn ack_prunes_covered_records() {
        let mut flow = Flow::default();
        flow.unacked.extend([record(1, 0, 100), record(2, 100, 200), record(3, 200, 300)]);

        let acked = flow.prune_acked(200).expect("exact match on second record");
        assert_eq!(acked.frame, 2);
        assert_eq!(flow.unacked.len(), 1);
        assert!(flow.prune_acked(250).is_none());
        assert_eq!(flow.unacked.len(), 1);
    }

    #[test]
    fn window_scaling_ignores_syn() {
        let flow = Flow {
            win_scale: WindowScale::Shift(7),
            ..Flow::default()
        };
        assert_eq!(flow.scaled_window(512, false), 65_536);
        assert_eq!(flow.scaled_window(512, true), 512);
    }
}
