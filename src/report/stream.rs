use std::time::Duration;

use crate::mptcp::{HmacAlgorithm, MetaFlow, MetaSide, MptcpConnection, MptcpState};
use crate::packet::SackBlock;
use crate::state::{Connection, ConnectionKind, Direction, Flow, FlowCounters, FlowKey, SegmentRecord, WindowScale};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionSummary {
    pub counters: FlowCounters,
    pub base_seq: Option<u32>,
    /// Relative next sequence number.
    pub next_seq: Option<u32>,
    pub window_scale: WindowScale,
    pub fin_frame: Option<u32>,
    pub unacked: usize,
}

impl DirectionSummary {
    fn of(flow: &Flow) -> Self {
        Self {
            counters: flow.counters,
            base_seq: flow.base_seq,
            next_seq: flow.next_seq.map(|next| flow.relative(next)),
            window_scale: flow.win_scale,
            fin_frame: flow.fin_frame,
            unacked: flow.unacked.len(),
        }
    }
}

/// Multipath role of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubflowRole {
    Initial { meta: Option<u32> },
    Joined { meta: Option<u32>, addr_id: Option<u8> },
}

/// Read-only summary of one TCP connection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub stream: u32,
    pub key: FlowKey,
    pub client: Option<Direction>,
    pub server_port: Option<u16>,
    pub first_rtt: Option<Duration>,
    pub ts_first: Duration,
    pub ts_last: Duration,
    pub subflow: Option<SubflowRole>,
    pub forward: DirectionSummary,
    pub reverse: DirectionSummary,
    pub segments: Vec<SegmentRecord>,
    pub closed: bool,
}

impl StreamReport {
    pub fn from_connection(conn: &Connection) -> Self {
        let subflow = match &conn.kind {
            ConnectionKind::Plain => None,
            ConnectionKind::Multipath(link) if link.joined => Some(SubflowRole::Joined {
                meta: link.meta,
                addr_id: link.addr_id,
            }),
            ConnectionKind::Multipath(link) => Some(SubflowRole::Initial { meta: link.meta }),
        };

        Self {
            stream: conn.stream,
            key: conn.key,
            client: conn.client,
            server_port: conn.server_port(),
            first_rtt: conn.first_rtt,
            ts_first: conn.ts_first,
            ts_last: conn.ts_prev,
            subflow,
            forward: DirectionSummary::of(&conn.forward),
            reverse: DirectionSummary::of(&conn.reverse),
            segments: conn.history.clone(),
            closed: conn.closed,
        }
    }

    pub fn direction(&self, direction: Direction) -> &DirectionSummary {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    pub fn segments_in(&self, direction: Direction) -> impl Iterator<Item = &SegmentRecord> {
        self.segments
            .iter()
            .filter(move |record| record.direction == direction)
    }

    /// SACK blocks sent in `direction`, with the frame that carried them.
    /// Ranges are relative to the opposite flow.
    pub fn sack_blocks(&self, direction: Direction) -> impl Iterator<Item = (u32, SackBlock)> + '_ {
        self.segments_in(direction)
            .flat_map(|record| record.sack.as_slice().iter().map(move |block| (record.frame, *block)))
    }

    pub fn duration(&self) -> Duration {
        self.ts_last.saturating_sub(self.ts_first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaDirectionSummary {
    pub token: Option<u32>,
    /// Data-level bytes mapped so far.
    pub mapped_bytes: Option<u64>,
    /// Highest data ACK, relative.
    pub acked: Option<u64>,
    pub reinjections: u64,
    pub mapped_spans: usize,
    pub data_fin_frame: Option<u32>,
}

impl MetaDirectionSummary {
    fn of(flow: &MetaFlow) -> Self {
        Self {
            token: flow.token,
            mapped_bytes: flow.next_dsn.map(|next| flow.relative(next)),
            acked: flow.max_dsn_acked.map(|acked| flow.relative(acked)),
            reinjections: flow.reinjections,
            mapped_spans: flow.mapped_spans(),
            data_fin_frame: flow.data_fin_frame,
        }
    }
}

/// Read-only summary of one multipath connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaReport {
    pub stream: u32,
    pub state: MptcpState,
    pub hmac: Option<HmacAlgorithm>,
    pub checksum_required: bool,
    pub subflows: Vec<u32>,
    pub client: MetaDirectionSummary,
    pub server: MetaDirectionSummary,
    pub fail_frame: Option<u32>,
    pub fastclose_frame: Option<u32>,
}

impl MetaReport {
    pub fn from_meta(meta: &MptcpConnection) -> Self {
        Self {
            stream: meta.stream,
            state: meta.state,
            hmac: meta.hmac,
            checksum_required: meta.checksum_required,
            subflows: meta.subflows.clone(),
            client: MetaDirectionSummary::of(meta.flow(MetaSide::Client)),
            server: MetaDirectionSummary::of(meta.flow(MetaSide::Server)),
            fail_frame: meta.fail_frame,
            fastclose_frame: meta.fastclose_frame,
        }
    }
}
