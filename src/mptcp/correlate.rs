use tracing::{debug, trace, warn};

use crate::packet::Segment;
use crate::state::{Connection, ConnectionKind, Direction};

use super::mapping::AttributedSpan;
use super::meta::{DsnSpan, MetaSide, MptcpConnection, MptcpState};
use super::option::{Dss, MpCapable, MpJoin, MptcpOption};
use super::registry::MptcpRegistry;
use super::subflow::SubflowLink;

/// Multipath view of one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MptcpAnalysis {
    pub meta: Option<u32>,
    /// `Incorrect` for orphan subflows that carry data-level options.
    pub state: Option<MptcpState>,
    /// This segment's payload, placed in the data sequence space.
    pub attributed: Vec<AttributedSpan>,
    /// Earlier payload a mapping in this segment resolved.
    pub resolved: Vec<AttributedSpan>,
    /// Spans on other subflows that already carried the mapped data.
    pub reinjection_of: Vec<DsnSpan>,
    /// Data ACK, relative to the peer's initial DSN.
    pub data_ack: Option<u64>,
    pub data_fin: bool,
    pub orphan: bool,
}

/// Correlates a segment of `conn` with its meta connection. Returns `None`
/// for plain TCP segments.
pub fn correlate_segment(
    registry: &mut MptcpRegistry,
    conn: &mut Connection,
    direction: Direction,
    segment: &Segment,
    rel_seq: u32,
) -> Option<MptcpAnalysis> {
    handshake(registry, conn, direction, segment);

    let has_dss = segment
        .mptcp
        .iter()
        .any(|option| matches!(option, MptcpOption::Dss(_)));
    if has_dss && matches!(conn.kind, ConnectionKind::Plain) {
        trace!(stream = conn.stream, frame = segment.frame, "DSS without handshake");
        conn.kind = ConnectionKind::Multipath(SubflowLink::orphan(direction));
    }

    let stream = conn.stream;
    let ConnectionKind::Multipath(link) = &mut conn.kind else {
        return None;
    };

    let mut analysis = MptcpAnalysis {
        meta: link.meta,
        orphan: link.is_orphan(),
        ..MptcpAnalysis::default()
    };

    let Some(meta_id) = link.meta else {
        if has_dss {
            analysis.state = Some(MptcpState::Incorrect);
        }
        return Some(analysis);
    };
    let Some(meta) = registry.get_mut(meta_id) else {
        return Some(analysis);
    };

    let side = link.meta_side(direction);
    for option in &segment.mptcp {
        match option {
            MptcpOption::Dss(dss) => {
                let at = SubflowPosition {
                    stream,
                    frame: segment.frame,
                    direction,
                    side,
                };
                apply_dss(dss, link, meta, at, &mut analysis);
            }
            MptcpOption::Fail { dsn } => {
                warn!(meta = meta_id, frame = segment.frame, dsn, "MP_FAIL");
                meta.fail(segment.frame);
            }
            MptcpOption::FastClose { .. } => {
                meta.fastclose_frame.get_or_insert(segment.frame);
            }
            MptcpOption::Prio { backup, .. } => link.backup = *backup,
            MptcpOption::Capable(_)
            | MptcpOption::Join(_)
            | MptcpOption::AddAddr { .. }
            | MptcpOption::RemoveAddr { .. } => {}
        }
    }

    if !segment.payload.is_empty() {
        analysis.attributed =
            link.mappings_mut(direction)
                .attribute(rel_seq, segment.payload_len(), segment.frame);
    }

    analysis.state = Some(meta.state);
    Some(analysis)
}

fn handshake(registry: &mut MptcpRegistry, conn: &mut Connection, direction: Direction, segment: &Segment) {
    let flags = segment.flags;
    let capable = segment.mptcp.iter().find_map(|option| match option {
        MptcpOption::Capable(capable) => Some(*capable),
        _ => None,
    });
    let join = segment.mptcp.iter().find_map(|option| match option {
        MptcpOption::Join(join) => Some(*join),
        _ => None,
    });

    match (flags.syn, flags.ack) {
        (true, false) => {
            if matches!(conn.kind, ConnectionKind::Multipath(_)) {
                // retransmitted SYN, the link from the first one stands
                trace!(stream = conn.stream, frame = segment.frame, "repeated MPTCP SYN");
            } else if let Some(capable) = capable {
                conn.kind =
                    ConnectionKind::Multipath(SubflowLink::initial(direction, capable.sender_key));
            } else if let Some(join) = join {
                conn.kind = ConnectionKind::Multipath(joining_link(registry, conn.stream, direction, &join));
            }
        }
        (true, true) => server_answer(registry, conn, capable),
        (false, true) => {
            if let Some(capable) = capable
                && capable.receiver_key.is_some()
            {
                confirm(registry, conn, &capable);
            }
        }
        (false, false) => {}
    }
}

fn joining_link(registry: &mut MptcpRegistry, stream: u32, direction: Direction, join: &MpJoin) -> SubflowLink {
    let found = join.token.and_then(|token| {
        let meta_id = registry.lookup_token(token)?;
        let meta = registry.get_mut(meta_id)?;
        let receiver = meta.side_for_token(token)?;
        meta.add_subflow(stream);
        Some((meta_id, receiver))
    });

    match found {
        Some((meta_id, receiver)) => {
            let client_direction = match receiver.opposite() {
                MetaSide::Client => direction,
                MetaSide::Server => direction.opposite(),
            };
            debug!(stream, meta = meta_id, addr_id = join.addr_id, "subflow joined");
            SubflowLink::join(Some(meta_id), client_direction, join.addr_id, join.backup)
        }
        None => {
            warn!(
                stream,
                token = ?join.token,
                "MP_JOIN token matches no connection, tracking subflow as orphan"
            );
            SubflowLink::join(None, direction, join.addr_id, join.backup)
        }
    }
}

fn server_answer(registry: &mut MptcpRegistry, conn: &mut Connection, capable: Option<MpCapable>) {
    let stream = conn.stream;
    let ConnectionKind::Multipath(link) = &mut conn.kind else {
        return;
    };
    if link.joined || link.meta.is_some() {
        return;
    }
    match capable {
        Some(answer) => {
            let meta_id = registry.open(link.syn_key, &answer);
            if let Some(meta) = registry.get_mut(meta_id) {
                meta.add_subflow(stream);
            }
            link.meta = Some(meta_id);
        }
        None => {
            debug!(stream, "server declined MP_CAPABLE, falling back to TCP");
            conn.kind = ConnectionKind::Plain;
        }
    }
}

fn confirm(registry: &mut MptcpRegistry, conn: &mut Connection, echo: &MpCapable) {
    let Some(link) = conn.kind.link_mut() else {
        return;
    };
    if link.joined {
        return;
    }
    if let Some(meta) = link.meta.and_then(|id| registry.get_mut(id)) {
        meta.confirm(echo);
    }
}

/// Where a DSS option was seen.
#[derive(Debug, Clone, Copy)]
struct SubflowPosition {
    stream: u32,
    frame: u32,
    direction: Direction,
    side: MetaSide,
}

fn apply_dss(
    dss: &Dss,
    link: &mut SubflowLink,
    meta: &mut MptcpConnection,
    at: SubflowPosition,
    analysis: &mut MptcpAnalysis,
) {
    let SubflowPosition {
        stream,
        frame,
        direction,
        side,
    } = at;
    if let Some(mapping) = dss.mapping {
        let dsn = meta.flow(side).expand(mapping.dsn);
        if mapping.length == 0 {
            link.fallback_frame.get_or_insert(frame);
            let resolved = link.mappings_mut(direction).set_infinite(mapping.ssn, dsn, frame);
            analysis.resolved.extend(resolved);
        } else {
            let len = u32::from(mapping.length);
            match link.mappings_mut(direction).insert(mapping.ssn, len, dsn, frame) {
                Ok(resolved) => analysis.resolved.extend(resolved),
                Err(err) => warn!(stream, frame, %err, "DSS mapping rejected"),
            }
            let span = DsnSpan {
                stream,
                frame,
                ssn: mapping.ssn,
            };
            match meta.flow_mut(side).record_mapping(dsn, len, span) {
                Ok(earlier) => analysis.reinjection_of.extend(earlier),
                Err(err) => warn!(stream, frame, %err, "DSS mapping not indexed"),
            }
        }
        if mapping.checksum_valid == Some(false) {
            warn!(meta = meta.stream, frame, "DSS checksum failed");
            meta.fail(frame);
        }
    }

    if let Some(data_ack) = dss.data_ack {
        let peer = meta.flow_mut(side.opposite());
        let value = peer.expand(data_ack);
        peer.acknowledge(value);
        analysis.data_ack = Some(peer.relative(value));
    }

    if dss.data_fin {
        meta.flow_mut(side).data_fin_frame.get_or_insert(frame);
        analysis.data_fin = true;
    }
}
