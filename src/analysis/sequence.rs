//! Per-segment sequence analysis.
//!
//! Checks run in a fixed order against the sending flow and its peer:
//! window probes, gaps, keep-alives, window changes, ACK kinds, ACKs of
//! unseen data, then the retransmission family. The sending flow is updated
//! afterwards and the peer's unacknowledged list is pruned by the ACK.

use std::time::Duration;

use crate::engine::TrackerConfig;
use crate::packet::Segment;
use crate::state::timers::within;
use crate::state::{Flow, SeqNum, UnackedSegment, WindowScale};

use super::flags::{SegmentAnalysis, SegmentClass};

/// Time limits used while classifying.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub out_of_order: Duration,
    pub fast_retransmit_window: Duration,
    pub fast_retransmit_dup_acks: u32,
}

impl Thresholds {
    /// The handshake RTT, once known, replaces the configured out-of-order
    /// window.
    pub fn new(config: &TrackerConfig, first_rtt: Option<Duration>) -> Self {
        Self {
            out_of_order: first_rtt
                .filter(|rtt| !rtt.is_zero())
                .unwrap_or(config.out_of_order_threshold),
            fast_retransmit_window: config.fast_retransmit_window,
            fast_retransmit_dup_acks: config.fast_retransmit_dup_acks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub flags: SegmentAnalysis,
    pub class: SegmentClass,
    /// Running count of duplicates and the frame they repeat.
    pub dup_ack: Option<(u32, u32)>,
    pub acked_frame: Option<u32>,
    pub ack_rtt: Option<Duration>,
    pub bytes_in_flight: Option<u32>,
}

/// Classifies `segment`, sent by the owner of `fwd`, and updates both flows.
pub fn analyze_segment(fwd: &mut Flow, rev: &mut Flow, segment: &Segment, thresholds: &Thresholds) -> Classification {
    let window = fwd.scaled_window(segment.window, segment.flags.syn);

    let mut flags = window_and_gap_checks(fwd, rev, segment, window);
    let mut dup_ack = None;
    if !flags.contains(SegmentAnalysis::ZERO_WINDOW_PROBE) {
        let (ack_flags, dup) = ack_checks(fwd, rev, segment, window);
        flags |= ack_flags;
        dup_ack = dup;

        if !ack_flags.intersects(SegmentAnalysis::KEEP_ALIVE_ACK | SegmentAnalysis::ZERO_WINDOW_PROBE_ACK) {
            flags |= ack_of_unseen(rev, segment);
            if !flags.contains(SegmentAnalysis::KEEP_ALIVE) {
                flags |= retransmission_checks(fwd, rev, segment, thresholds);
            }
        }
    }

    record_segment(fwd, segment, flags, window);
    finish(fwd, rev, segment, flags, dup_ack)
}

/// Keeps the flow state current without classifying anything.
pub fn track_segment(fwd: &mut Flow, rev: &mut Flow, segment: &Segment) -> Classification {
    let window = fwd.scaled_window(segment.window, segment.flags.syn);
    record_segment(fwd, segment, SegmentAnalysis::empty(), window);
    finish(fwd, rev, segment, SegmentAnalysis::empty(), None)
}

fn window_and_gap_checks(fwd: &Flow, rev: &Flow, segment: &Segment, window: u32) -> SegmentAnalysis {
    let seglen = segment.payload_len();
    let control = segment.flags.has_control();

    if seglen == 1 && fwd.next_seq == Some(segment.seq) && rev.window == Some(0) {
        return SegmentAnalysis::ZERO_WINDOW_PROBE;
    }

    let mut flags = SegmentAnalysis::empty();
    if window == 0 && !control {
        flags |= SegmentAnalysis::ZERO_WINDOW;
    }

    if let Some(next) = fwd.next_seq
        && segment.seq.after(next)
        && !segment.flags.rst
    {
        flags |= SegmentAnalysis::LOST_PACKET;
    }

    if seglen <= 1
        && !control
        && fwd.next_seq.is_some_and(|next| next.wrapping_sub(1) == segment.seq)
    {
        flags |= SegmentAnalysis::KEEP_ALIVE;
    }

    if seglen == 0
        && window != 0
        && !control
        && fwd.window.is_some_and(|old| old != window)
        && fwd.next_seq == Some(segment.seq)
        && fwd.last_ack == Some(segment.ack)
    {
        flags |= SegmentAnalysis::WINDOW_UPDATE;
    }

    if seglen > 0
        && !control
        && rev.win_scale != WindowScale::Unknown
        && let (Some(ack), Some(rev_window)) = (rev.last_ack, rev.window)
        && segment.seq.wrapping_add(seglen) == ack.wrapping_add(rev_window)
    {
        flags |= SegmentAnalysis::WINDOW_FULL;
    }

    flags
}

/// Pure-ACK kinds. Any segment that is not a duplicate ends the duplicate
/// run, except the ACKs of keep-alives and window probes.
fn ack_checks(fwd: &mut Flow, rev: &Flow, segment: &Segment, window: u32) -> (SegmentAnalysis, Option<(u32, u32)>) {
    let same_position = segment.payload.is_empty()
        && segment.flags.ack
        && !segment.flags.has_control()
        && fwd.next_seq == Some(segment.seq)
        && fwd.last_ack == Some(segment.ack)
        && fwd.window == Some(window);

    if same_position && window != 0 && rev.last_segment_flags.contains(SegmentAnalysis::KEEP_ALIVE) {
        return (SegmentAnalysis::KEEP_ALIVE_ACK, None);
    }
    if same_position
        && window == 0
        && rev.last_segment_flags.contains(SegmentAnalysis::ZERO_WINDOW_PROBE)
    {
        return (SegmentAnalysis::ZERO_WINDOW_PROBE_ACK, None);
    }
    if same_position && window != 0 {
        fwd.dup_ack_count += 1;
        return (
            SegmentAnalysis::DUPLICATE_ACK,
            Some((fwd.dup_ack_count, fwd.last_nondup_ack)),
        );
    }

    fwd.last_nondup_ack = segment.frame;
    fwd.dup_ack_count = 0;
    (SegmentAnalysis::empty(), None)
}

fn ack_of_unseen(rev: &mut Flow, segment: &Segment) -> SegmentAnalysis {
    if !segment.flags.ack {
        return SegmentAnalysis::empty();
    }
    match rev.max_seq_acked {
        Some(max) if segment.ack.after(max) => {
            // report once, not on every later ACK
            rev.max_seq_acked = rev.next_seq;
            SegmentAnalysis::ACK_LOST_PACKET
        }
        _ => SegmentAnalysis::empty(),
    }
}

fn retransmission_checks(fwd: &Flow, rev: &Flow, segment: &Segment, thresholds: &Thresholds) -> SegmentAnalysis {
    let seglen = segment.payload_len();
    if seglen == 0 && !segment.flags.syn && !segment.flags.fin {
        return SegmentAnalysis::empty();
    }
    let Some(next) = fwd.next_seq else {
        return SegmentAnalysis::empty();
    };
    if !segment.seq.before(next) {
        return SegmentAnalysis::empty();
    }
    let end = segment.seq.wrapping_add(seglen);

    if rev.dup_ack_count >= thresholds.fast_retransmit_dup_acks
        && rev.last_ack == Some(segment.seq)
        && within(segment.timestamp, rev.last_ack_time, thresholds.fast_retransmit_window)
    {
        return SegmentAnalysis::FAST_RETRANSMISSION;
    }

    if within(segment.timestamp, fwd.next_seq_time, thresholds.out_of_order) && next != end {
        return SegmentAnalysis::OUT_OF_ORDER;
    }

    if seglen > 0 && rev.last_ack.is_some_and(|ack| end.at_or_before(ack)) {
        return SegmentAnalysis::RETRANSMISSION | SegmentAnalysis::SPURIOUS_RETRANSMISSION;
    }

    SegmentAnalysis::RETRANSMISSION
}

fn record_segment(fwd: &mut Flow, segment: &Segment, flags: SegmentAnalysis, window: u32) {
    let seq_len = segment.payload_len().wrapping_add(segment.flags.sequence_len());
    let end = segment.seq.wrapping_add(seq_len);
    let probe_like = flags.intersects(SegmentAnalysis::ZERO_WINDOW_PROBE | SegmentAnalysis::KEEP_ALIVE);

    let advanced = !probe_like && fwd.next_seq.is_none_or(|next| end.after(next));
    if advanced {
        fwd.next_seq = Some(end);
        fwd.next_seq_time = segment.timestamp;
    }

    if !flags.contains(SegmentAnalysis::ZERO_WINDOW_PROBE)
        && fwd.max_seq_acked.is_none_or(|max| max == segment.seq)
    {
        fwd.max_seq_acked = fwd.next_seq;
    }

    fwd.window = Some(window);
    if segment.flags.ack {
        fwd.last_ack = Some(segment.ack);
        fwd.last_ack_time = segment.timestamp;
    }
    fwd.last_segment_flags = flags;

    // only first transmissions are timed
    if advanced && seq_len > 0 {
        fwd.unacked.push_back(UnackedSegment {
            frame: segment.frame,
            seq: segment.seq,
            next_seq: end,
            timestamp: segment.timestamp,
        });
    }
}

fn finish(
    fwd: &Flow,
    rev: &mut Flow,
    segment: &Segment,
    flags: SegmentAnalysis,
    dup_ack: Option<(u32, u32)>,
) -> Classification {
    let acked = if segment.flags.ack {
        rev.prune_acked(segment.ack)
    } else {
        None
    };

    let bytes_in_flight = match (fwd.next_seq, rev.last_ack) {
        (Some(next), Some(ack)) if segment.payload_len() > 0 && ack.at_or_before(next) => {
            Some(next.wrapping_sub(ack))
        }
        _ => None,
    };

    let carries_sequence = segment.payload_len() > 0 || segment.flags.sequence_len() > 0;
    Classification {
        flags,
        class: flags.primary_class(carries_sequence),
        dup_ack,
        acked_frame: acked.map(|record| record.frame),
        ack_rtt: acked.map(|record| segment.timestamp.saturating_sub(record.timestamp)),
        bytes_in_flight,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::{Thresholds, analyze_segment};
    use crate::analysis::{SegmentAnalysis, SegmentClass};
    use crate::engine::TrackerConfig;
    use crate::packet::{Segment, TcpFlags};
    use crate::state::Flow;

    const CLIENT: &str = "10.0.0.1:40000";
    const SERVER: &str = "10.0.0.2:80";

    fn addr(text: &str) -> SocketAddr {
        text.parse().expect("valid socket address")
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(&TrackerConfig::default(), None)
    }

    fn data(frame: u32, ms: u64, seq: u32, len: usize) -> Segment {
        Segment::new(addr(CLIENT), addr(SERVER))
            .with_seq(seq)
            .with_ack(1)
            .with_window(1000)
            .with_payload(vec![0u8; len])
            .at(frame, Duration::from_millis(ms))
    }

    fn ack(frame: u32, ms: u64, ack: u32) -> Segment {
        Segment::new(addr(SERVER), addr(CLIENT))
            .with_seq(1)
            .with_ack(ack)
            .with_window(1000)
            .at(frame, Duration::from_millis(ms))
    }

    #[test]
    fn in_order_data_advances_next_seq() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        let first = analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let second = analyze_segment(&mut client, &mut server, &data(2, 1, 101, 100), &t);

        assert_eq!(first.class, SegmentClass::InOrder);
        assert_eq!(second.class, SegmentClass::InOrder);
        assert_eq!(client.next_seq, Some(201));
        assert_eq!(client.max_seq_acked, Some(201));
        assert_eq!(client.unacked.len(), 2);
    }

    #[test]
    fn replayed_acknowledged_segment_is_a_spurious_retransmission() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let acked = analyze_segment(&mut server, &mut client, &ack(2, 50, 101), &t);
        assert_eq!(acked.acked_frame, Some(1));
        assert_eq!(acked.ack_rtt, Some(Duration::from_millis(50)));

        let replay = analyze_segment(&mut client, &mut server, &data(3, 400, 1, 100), &t);
        assert!(replay.flags.contains(SegmentAnalysis::RETRANSMISSION));
        assert!(replay.flags.contains(SegmentAnalysis::SPURIOUS_RETRANSMISSION));
        assert_eq!(replay.class, SegmentClass::Retransmission);
        assert_eq!(client.next_seq, Some(101));
        assert_eq!(client.max_seq_acked, Some(101));
    }

    #[test]
    fn gap_then_fill_is_lost_then_out_of_order() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let jump = analyze_segment(&mut client, &mut server, &data(2, 1, 201, 100), &t);
        assert_eq!(jump.class, SegmentClass::LostSegment);
        assert_eq!(client.max_seq_acked, Some(101));

        let fill = analyze_segment(&mut client, &mut server, &data(3, 2, 101, 100), &t);
        assert_eq!(fill.class, SegmentClass::OutOfOrder);
        assert_eq!(client.next_seq, Some(301));
    }

    #[test]
    fn late_fill_is_a_plain_retransmission() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        analyze_segment(&mut client, &mut server, &data(2, 1, 201, 100), &t);
        let late = analyze_segment(&mut client, &mut server, &data(3, 500, 101, 100), &t);
        assert_eq!(late.flags, SegmentAnalysis::RETRANSMISSION);
    }

    #[test]
    fn duplicate_acks_arm_fast_retransmission() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        analyze_segment(&mut client, &mut server, &data(2, 1, 101, 100), &t);
        analyze_segment(&mut client, &mut server, &data(3, 2, 201, 100), &t);

        analyze_segment(&mut server, &mut client, &ack(4, 10, 101), &t);
        let dup1 = analyze_segment(&mut server, &mut client, &ack(5, 11, 101), &t);
        let dup2 = analyze_segment(&mut server, &mut client, &ack(6, 12, 101), &t);
        assert_eq!(dup1.class, SegmentClass::DuplicateAck);
        assert_eq!(dup1.dup_ack, Some((1, 4)));
        assert_eq!(dup2.dup_ack, Some((2, 4)));

        let resend = analyze_segment(&mut client, &mut server, &data(7, 15, 101, 100), &t);
        assert_eq!(resend.flags, SegmentAnalysis::FAST_RETRANSMISSION);
        assert_eq!(resend.class, SegmentClass::FastRetransmission);
    }

    #[test]
    fn keep_alive_does_not_move_next_seq() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let probe = analyze_segment(&mut client, &mut server, &data(2, 5_000, 100, 1), &t);
        assert_eq!(probe.class, SegmentClass::KeepAlive);
        assert_eq!(client.next_seq, Some(101));

        analyze_segment(&mut server, &mut client, &ack(3, 5_001, 101), &t);
        let answer = analyze_segment(&mut server, &mut client, &ack(4, 10_000, 101), &t);
        assert_eq!(answer.flags, SegmentAnalysis::KEEP_ALIVE_ACK);
    }

    #[test]
    fn zero_window_and_probe() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let closed = analyze_segment(&mut server, &mut client, &ack(2, 1, 101).with_window(0), &t);
        assert_eq!(closed.class, SegmentClass::ZeroWindow);

        let probe = analyze_segment(&mut client, &mut server, &data(3, 200, 101, 1), &t);
        assert_eq!(probe.flags, SegmentAnalysis::ZERO_WINDOW_PROBE);
        assert_eq!(client.next_seq, Some(101));
    }

    #[test]
    fn window_update_is_recognised() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        analyze_segment(&mut server, &mut client, &ack(2, 1, 101), &t);
        let update = analyze_segment(&mut server, &mut client, &ack(3, 2, 101).with_window(4000), &t);
        assert_eq!(update.class, SegmentClass::WindowUpdate);
    }

    #[test]
    fn ack_beyond_seen_data_is_flagged_once() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let t = thresholds();

        analyze_segment(&mut client, &mut server, &data(1, 0, 1, 100), &t);
        let early = analyze_segment(&mut server, &mut client, &ack(2, 1, 301), &t);
        assert!(early.flags.contains(SegmentAnalysis::ACK_LOST_PACKET));
        assert_eq!(early.class, SegmentClass::LostSegment);
    }

    #[test]
    fn syn_counts_as_one_sequence_number() {
        let (mut client, mut server) = (Flow::default(), Flow::default());
        let syn = Segment::new(addr(CLIENT), addr(SERVER))
            .with_seq(1000)
            .with_flags(TcpFlags::SYN)
            .with_window(64_240);
        let verdict = analyze_segment(&mut client, &mut server, &syn, &thresholds());
        assert_eq!(verdict.class, SegmentClass::InOrder);
        assert_eq!(client.next_seq, Some(1001));
    }
}
