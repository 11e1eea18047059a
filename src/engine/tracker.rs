use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::analysis::{SegmentAnalysis, Thresholds, analyze_segment, track_segment};
use crate::mptcp::{MptcpConnection, MptcpRegistry, correlate_segment};
use crate::packet::{SackBlock, SackBlocks, Segment};
use crate::reassembly::{Framing, PduConsumer, PduLengthProbe, PduOrigin, SegmentBytes};
use crate::report::{MetaReport, StreamReport};
use crate::state::{
    Connection, ConnectionTable, Direction, Flow, FlowKey, OrderedChunk, ReorderEvent,
    SegmentRecord, WindowScale,
};

use super::config::TrackerConfig;
use super::error::TrackError;
use super::events::{SegmentReport, SessionReport, TeardownReason, TeardownReport};

/// Largest shift RFC 7323 allows.
const MAX_WINDOW_SHIFT: u8 = 14;

/// Call-scoped PDU dissection hooks. Without them segments are still
/// classified, but nothing is reassembled.
pub struct Dissection<'a> {
    pub probe: &'a dyn PduLengthProbe,
    pub consumer: &'a mut dyn PduConsumer,
}

/// One capture session: every TCP connection and MPTCP meta connection seen
/// so far, fed one segment at a time in capture order.
#[derive(Debug)]
pub struct StreamTracker {
    config: TrackerConfig,
    connections: ConnectionTable,
    mptcp: MptcpRegistry,
    finished: Vec<StreamReport>,
    last_sweep: Duration,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl StreamTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            connections: ConnectionTable::new(config.max_connections),
            mptcp: MptcpRegistry::default(),
            finished: Vec::new(),
            last_sweep: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Classifies `segment`, updates its connection and, when `dissection` is
    /// given, reassembles its payload into PDUs.
    pub fn process(
        &mut self,
        segment: &Segment,
        dissection: Option<Dissection<'_>>,
    ) -> Result<SegmentReport, TrackError> {
        let mut retired = self.sweep_idle(segment.timestamp);

        let (key, direction) =
            FlowKey::from_endpoints(segment.src, segment.src_port, segment.dst, segment.dst_port);
        let (stream, reused, pushed_out) = self.resolve(key, segment)?;
        retired.extend(pushed_out);

        let conn = self
            .connections
            .get_mut(stream)
            .ok_or_else(|| unknown_connection(segment))?;
        let mptcp = self.config.mptcp.then_some(&mut self.mptcp);
        let mut report = handle_segment(conn, mptcp, &self.config, direction, segment, dissection);
        self.connections.touch(stream, segment.timestamp);

        if reused {
            report.analysis.flags |= SegmentAnalysis::REUSED_PORTS;
        }
        report.retired = retired;
        Ok(report)
    }

    /// Tears down every live connection and returns the session summary.
    /// Partial PDUs, including ones collected until a FIN that never came,
    /// are discarded. The tracker starts over afterwards.
    pub fn finish(&mut self) -> SessionReport {
        let mut teardowns = Vec::new();
        for mut conn in self.connections.drain() {
            if !conn.closed {
                teardowns.push(teardown(&mut conn, TeardownReason::SessionEnd));
            }
            self.finished.push(StreamReport::from_connection(&conn));
        }

        let mut streams = std::mem::take(&mut self.finished);
        streams.sort_by_key(|report| report.stream);
        let metas = self.mptcp.iter().map(MetaReport::from_meta).collect();
        debug!(
            streams = streams.len(),
            teardowns = teardowns.len(),
            "capture session finished"
        );

        self.reset();
        SessionReport {
            teardowns,
            streams,
            metas,
        }
    }

    /// Forgets all connections, tokens and stream counters.
    pub fn reset(&mut self) {
        self.connections.clear();
        self.mptcp.clear();
        self.finished.clear();
        self.last_sweep = Duration::ZERO;
    }

    pub fn connection(&self, stream: u32) -> Option<&Connection> {
        self.connections.get(stream)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn meta(&self, meta: u32) -> Option<&MptcpConnection> {
        self.mptcp.get(meta)
    }

    pub fn mptcp(&self) -> &MptcpRegistry {
        &self.mptcp
    }

    /// Summary of a live or already retired connection.
    pub fn stream_report(&self, stream: u32) -> Option<StreamReport> {
        self.connections
            .get(stream)
            .map(StreamReport::from_connection)
            .or_else(|| {
                self.finished
                    .iter()
                    .find(|report| report.stream == stream)
                    .cloned()
            })
    }

    /// Finds the connection for `key`, or opens one. The flag is set when a
    /// SYN reused the tuple of an earlier connection.
    fn resolve(
        &mut self,
        key: FlowKey,
        segment: &Segment,
    ) -> Result<(u32, bool, Vec<TeardownReport>), TrackError> {
        let opening = segment.flags.syn && !segment.flags.ack;

        let reused = match self.connections.lookup(&key) {
            Some(stream) => {
                let takes_over = opening
                    && self
                        .connections
                        .get(stream)
                        .is_some_and(|conn| is_port_reuse(conn, segment));
                if !takes_over {
                    return Ok((stream, false, Vec::new()));
                }
                debug!(stream, frame = segment.frame, "SYN reuses ports of a finished connection");
                true
            }
            None if opening || self.config.accept_midstream => false,
            None => return Err(unknown_connection(segment)),
        };

        let (stream, pushed_out) = self.connections.open(key, segment.timestamp);
        let retired = pushed_out
            .into_iter()
            .filter_map(|conn| {
                let reason = if conn.key == key {
                    TeardownReason::Reused
                } else {
                    TeardownReason::Evicted
                };
                self.retire(conn, reason)
            })
            .collect();
        Ok((stream, reused, retired))
    }

    fn sweep_idle(&mut self, now: Duration) -> Vec<TeardownReport> {
        let interval = self.config.idle_timeout / 4;
        if now.saturating_sub(self.last_sweep) <= interval {
            return Vec::new();
        }
        self.last_sweep = now;

        let expired = self.connections.expire_idle(now, self.config.idle_timeout);
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired idle connections");
        }
        expired
            .into_iter()
            .filter_map(|conn| self.retire(conn, TeardownReason::Idle))
            .collect()
    }

    /// Records the summary of a connection leaving the table. Connections
    /// already closed were torn down when they closed.
    fn retire(&mut self, mut conn: Connection, reason: TeardownReason) -> Option<TeardownReport> {
        let report = (!conn.closed).then(|| teardown(&mut conn, reason));
        self.finished.push(StreamReport::from_connection(&conn));
        report
    }
}

fn unknown_connection(segment: &Segment) -> TrackError {
    TrackError::UnknownConnection {
        src: segment.src,
        src_port: segment.src_port,
        dst: segment.dst,
        dst_port: segment.dst_port,
    }
}

/// A SYN starts over on a tuple whose connection already ended, or whose
/// sender picked a new initial sequence number after data was exchanged.
fn is_port_reuse(conn: &Connection, segment: &Segment) -> bool {
    if conn.closed || conn.both_finished() {
        return true;
    }
    let saw_data = conn.forward.counters.payload_bytes + conn.reverse.counters.payload_bytes > 0;
    let (_, direction) =
        FlowKey::from_endpoints(segment.src, segment.src_port, segment.dst, segment.dst_port);
    saw_data
        && conn
            .flow(direction)
            .base_seq
            .is_some_and(|base| base != segment.seq)
}

fn handle_segment(
    conn: &mut Connection,
    mptcp: Option<&mut MptcpRegistry>,
    config: &TrackerConfig,
    direction: Direction,
    segment: &Segment,
    mut dissection: Option<Dissection<'_>>,
) -> SegmentReport {
    let flags = segment.flags;
    conn.note_handshake(direction, segment);
    negotiate_window_scale(conn, direction, segment);

    let flow = conn.flow_mut(direction);
    flow.set_base(segment.seq, flags.syn);
    if flags.syn {
        flow.reorder.sync(1);
    }

    let thresholds = Thresholds::new(config, conn.first_rtt);
    let (fwd, rev) = conn.flows_mut(direction);
    let analysis = if config.analyze_sequence {
        analyze_segment(fwd, rev, segment, &thresholds)
    } else {
        track_segment(fwd, rev, segment)
    };
    fwd.counters.record(segment.payload_len(), analysis.flags);

    let len = segment.payload_len();
    let seq = fwd.relative(segment.seq);
    let next_seq = seq.wrapping_add(len + flags.sequence_len());
    let ack = flags.ack.then(|| rev.relative(segment.ack));
    let mut sack = SackBlocks::default();
    for block in segment.sack.as_slice() {
        sack.push(SackBlock {
            left: rev.relative(block.left),
            right: rev.relative(block.right),
        });
    }
    let window = fwd.window.unwrap_or_else(|| u32::from(segment.window));
    trace!(
        stream = conn.stream,
        frame = segment.frame,
        seq,
        len,
        class = %analysis.class,
        "segment classified"
    );

    let mptcp = mptcp.and_then(|registry| correlate_segment(registry, conn, direction, segment, seq));

    let mut pdus_delivered = 0;
    let mut pdu_error = None;
    let probing = analysis
        .flags
        .intersects(SegmentAnalysis::KEEP_ALIVE | SegmentAnalysis::ZERO_WINDOW_PROBE);
    if let Some(hooks) = dissection.as_mut()
        && len > 0
        && !probing
    {
        match reassemble(conn, direction, segment, seq, config, hooks) {
            Ok(delivered) => pdus_delivered = delivered,
            Err(err) => {
                warn!(stream = conn.stream, frame = segment.frame, %err, "PDU reassembly failed");
                pdu_error = Some(err);
            }
        }
    }

    if flags.fin {
        pdus_delivered += close_direction(conn, direction, segment.frame, dissection.as_mut());
    }

    let teardown = end_of_connection(conn, segment);

    if config.record_history {
        conn.history.push(SegmentRecord {
            frame: segment.frame,
            direction,
            timestamp: segment.timestamp,
            seq,
            next_seq,
            ack,
            len,
            window,
            tcp_flags: flags.bits(),
            sack,
            analysis: analysis.flags,
            class: analysis.class,
        });
    }

    SegmentReport {
        stream: conn.stream,
        direction,
        frame: segment.frame,
        seq,
        next_seq,
        ack,
        len,
        analysis,
        pdus_delivered,
        pdu_error,
        mptcp,
        teardown,
        retired: Vec::new(),
    }
}

/// RST, or the second FIN, ends the connection. It stays in the table so
/// late segments still find it.
fn end_of_connection(conn: &mut Connection, segment: &Segment) -> Option<TeardownReport> {
    if conn.closed || !(segment.flags.rst || conn.both_finished()) {
        return None;
    }
    conn.closed = true;
    let reason = if segment.flags.rst {
        TeardownReason::Reset
    } else {
        TeardownReason::Closed
    };
    Some(teardown(conn, reason))
}

/// SYN options set each side's shift. Scaling only applies when both sides
/// offered it.
fn negotiate_window_scale(conn: &mut Connection, direction: Direction, segment: &Segment) {
    if !segment.flags.syn {
        return;
    }
    let (fwd, rev) = conn.flows_mut(direction);
    fwd.win_scale = match segment.window_scale {
        Some(shift) => WindowScale::Shift(shift.min(MAX_WINDOW_SHIFT)),
        None => WindowScale::NotUsed,
    };
    if segment.flags.ack
        && (fwd.win_scale == WindowScale::NotUsed || rev.win_scale == WindowScale::NotUsed)
    {
        fwd.win_scale = WindowScale::NotUsed;
        rev.win_scale = WindowScale::NotUsed;
    }
}

fn reassemble(
    conn: &mut Connection,
    direction: Direction,
    segment: &Segment,
    rel_seq: u32,
    config: &TrackerConfig,
    hooks: &mut Dissection<'_>,
) -> Result<usize, TrackError> {
    let stream = conn.stream;
    let flow = conn.flow_mut(direction);
    let chunks = match flow.reorder.push(OrderedChunk {
        seq: rel_seq,
        frame: segment.frame,
        timestamp: segment.timestamp,
        data: segment.payload.clone(),
    }) {
        ReorderEvent::InOrder(chunks) => chunks,
        ReorderEvent::Gap {
            expected_seq,
            got_seq,
        } => {
            trace!(stream, expected_seq, got_seq, "holding segment behind a gap");
            if flow.reorder.buffered_bytes() <= config.max_reorder_bytes {
                return Ok(0);
            }
            skip_gap(flow, stream)
        }
        ReorderEvent::Duplicate { seq } => {
            trace!(stream, seq, "payload already delivered");
            return Ok(0);
        }
    };

    let origin = PduOrigin { stream, direction };
    let mut framing = Framing {
        config: config.framing,
        probe: hooks.probe,
        consumer: &mut *hooks.consumer,
    };
    let mut delivered = 0;
    for chunk in &chunks {
        let bytes = SegmentBytes {
            seq: chunk.seq,
            frame: chunk.frame,
            timestamp: chunk.timestamp,
            data: &chunk.data,
        };
        delivered += flow.assembler.feed(bytes, origin, &mut framing)?;
    }
    Ok(delivered)
}

/// Gives up on the earliest hole. The PDU open in front of it can never
/// complete, so it is dropped and framing restarts after the hole.
fn skip_gap(flow: &mut Flow, stream: u32) -> Vec<OrderedChunk> {
    let discarded = flow.assembler.discard();
    let Some((skipped, released)) = flow.reorder.skip_gap() else {
        return Vec::new();
    };
    warn!(
        stream,
        skipped,
        resume_seq = ?flow.reorder.next_seq(),
        discarded,
        "out-of-order data over limit, skipping sequence gap"
    );
    released
}

/// A FIN ends one direction: a PDU collected until close is delivered, a
/// partial one can no longer complete.
fn close_direction(
    conn: &mut Connection,
    direction: Direction,
    frame: u32,
    hooks: Option<&mut Dissection<'_>>,
) -> usize {
    let stream = conn.stream;
    let flow = conn.flow_mut(direction);
    flow.fin_frame.get_or_insert(frame);

    let Some(hooks) = hooks else {
        return 0;
    };
    let origin = PduOrigin { stream, direction };
    let (delivered, discarded) = flow.assembler.close(frame, origin, &mut *hooks.consumer);
    if discarded > 0 {
        debug!(stream, ?direction, discarded, "FIN left a partial PDU");
    }
    delivered
}

/// Drops whatever is still buffered. Only a FIN completes a PDU collected
/// until close, so nothing is delivered here.
fn teardown(conn: &mut Connection, reason: TeardownReason) -> TeardownReport {
    let stream = conn.stream;
    let mut report = TeardownReport {
        stream,
        reason,
        discarded_pdus: 0,
        delivered_at_close: 0,
        dropped_out_of_order_bytes: 0,
        unattributed: Vec::new(),
    };

    for direction in [Direction::Forward, Direction::Reverse] {
        let flow = conn.flow_mut(direction);
        report.dropped_out_of_order_bytes += flow.reorder.buffered_bytes();
        flow.reorder.clear();
        report.discarded_pdus += flow.assembler.discard();
    }

    if let Some(link) = conn.kind.link_mut() {
        report.unattributed = link.take_pending();
    }
    if !report.unattributed.is_empty() {
        warn!(
            stream,
            spans = report.unattributed.len(),
            bytes = report.unattributed_bytes(),
            "dropping subflow payload no DSS mapping covered"
        );
    }

    debug!(stream, %reason, discarded = report.discarded_pdus, "connection torn down");
    report
}
