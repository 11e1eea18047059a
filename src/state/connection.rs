use std::time::Duration;

use crate::analysis::{SegmentAnalysis, SegmentClass};
use crate::mptcp::SubflowLink;
use crate::packet::{SackBlocks, Segment};

use super::flow::Flow;
use super::flow_key::{Direction, FlowKey};

/// Plain TCP, or a subflow of a multipath connection.
#[derive(Debug)]
pub enum ConnectionKind {
    Plain,
    Multipath(SubflowLink),
}

impl ConnectionKind {
    pub fn link(&self) -> Option<&SubflowLink> {
        match self {
            ConnectionKind::Plain => None,
            ConnectionKind::Multipath(link) => Some(link),
        }
    }

    pub fn link_mut(&mut self) -> Option<&mut SubflowLink> {
        match self {
            ConnectionKind::Plain => None,
            ConnectionKind::Multipath(link) => Some(link),
        }
    }
}

/// What one segment looked like after analysis. Sequence numbers are
/// relative to the sending flow, `ack` to the receiving one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRecord {
    pub frame: u32,
    pub direction: Direction,
    pub timestamp: Duration,
    pub seq: u32,
    pub next_seq: u32,
    pub ack: Option<u32>,
    pub len: u32,
    pub window: u32,
    pub tcp_flags: u16,
    /// SACK blocks, relative to the receiving flow like `ack`.
    pub sack: SackBlocks,
    pub analysis: SegmentAnalysis,
    pub class: SegmentClass,
}

#[derive(Debug)]
pub struct Connection {
    pub stream: u32,
    pub key: FlowKey,
    pub forward: Flow,
    pub reverse: Flow,
    /// Direction of the SYN, once the handshake was seen.
    pub client: Option<Direction>,
    pub ts_first: Duration,
    pub ts_prev: Duration,
    pub ts_mru_syn: Option<Duration>,
    pub first_rtt: Option<Duration>,
    pub kind: ConnectionKind,
    pub history: Vec<SegmentRecord>,
    pub closed: bool,
}

impl Connection {
    pub fn new(stream: u32, key: FlowKey, now: Duration) -> Self {
        Self {
            stream,
            key,
            forward: Flow::default(),
            reverse: Flow::default(),
            client: None,
            ts_first: now,
            ts_prev: now,
            ts_mru_syn: None,
            first_rtt: None,
            kind: ConnectionKind::Plain,
            history: Vec::new(),
            closed: false,
        }
    }

    pub fn flow(&self, direction: Direction) -> &Flow {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    pub fn flow_mut(&mut self, direction: Direction) -> &mut Flow {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }

    /// The sending flow for `direction` and its peer.
    pub fn flows_mut(&mut self, direction: Direction) -> (&mut Flow, &mut Flow) {
        match direction {
            Direction::Forward => (&mut self.forward, &mut self.reverse),
            Direction::Reverse => (&mut self.reverse, &mut self.forward),
        }
    }

    pub fn server_port(&self) -> Option<u16> {
        self.client
            .map(|client| self.key.sender(client.opposite()).1)
    }

    pub fn is_multipath(&self) -> bool {
        matches!(self.kind, ConnectionKind::Multipath(_))
    }

    /// Handshake timing: the most recent SYN, and the first RTT measured
    /// from it to the final handshake ACK.
    pub fn note_handshake(&mut self, direction: Direction, segment: &Segment) {
        let flags = segment.flags;
        if flags.syn {
            let client = if flags.ack { direction.opposite() } else { direction };
            self.client.get_or_insert(client);
            if !flags.ack {
                self.ts_mru_syn = Some(segment.timestamp);
            }
        } else if flags.ack
            && self.first_rtt.is_none()
            && let Some(syn) = self.ts_mru_syn
        {
            self.first_rtt = Some(segment.timestamp.saturating_sub(syn));
        }
    }

    /// Both directions sent FIN.
    pub fn both_finished(&self) -> bool {
        self.forward.is_finished() && self.reverse.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::Connection;
    use crate::packet::{Segment, TcpFlags};
    use crate::state::{Direction, FlowKey};

    fn addr(text: &str) -> SocketAddr {
        text.parse().expect("valid socket address")
    }

    #[test]
    fn handshake_sets_client_and_first_rtt() {
        let client = addr("10.0.0.1:40000");
        let server = addr("10.0.0.2:80");
        let (key, dir) = FlowKey::from_endpoints(client.ip(), client.port(), server.ip(), server.port());
        let mut conn = Connection::new(0, key, Duration::ZERO);

        let syn = Segment::new(client, server)
            .with_flags(TcpFlags::SYN)
            .at(1, Duration::from_millis(10));
        let syn_ack = Segment::new(server, client)
            .with_flags(TcpFlags::SYN | TcpFlags::ACK)
            .at(2, Duration::from_millis(30));
        let ack = Segment::new(client, server)
            .with_ack(1)
            .at(3, Duration::from_millis(50));

        conn.note_handshake(dir, &syn);
        conn.note_handshake(dir.opposite(), &syn_ack);
        conn.note_handshake(dir, &ack);

        assert_eq!(conn.client, Some(dir));
        assert_eq!(conn.first_rtt, Some(Duration::from_millis(40)));
        assert_eq!(conn.server_port(), Some(80));
    }

    #[test]
    fn split_borrow_returns_sender_first() {
        let (key, _) = FlowKey::from_endpoints(
            addr("10.0.0.1:1").ip(),
            1,
            addr("10.0.0.2:2").ip(),
            2,
        );
        let mut conn = Connection::new(3, key, Duration::ZERO);
        let (sender, peer) = conn.flows_mut(Direction::Reverse);
        sender.dup_ack_count = 4;
        peer.dup_ack_count = 1;
        assert_eq!(conn.reverse.dup_ack_count, 4);
        assert_eq!(conn.forward.dup_ack_count, 1);
    }
}
