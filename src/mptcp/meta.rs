use std::fmt;

use tracing::debug;

use crate::engine::TrackError;
use crate::itree::{IntervalTree, Range};
use crate::state::SeqNum;

use super::option::{DataSeq, HmacAlgorithm, MpCapable};
use super::token::{key_idsn, key_token};

/// Multipath handshake progress. `Ok` and `Incorrect` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MptcpState {
    SawServerAnswer,
    NoAlgoSelected,
    Pending,
    Incorrect,
    Ok,
}

impl MptcpState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MptcpState::Ok | MptcpState::Incorrect)
    }
}

impl fmt::Display for MptcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MptcpState::SawServerAnswer => "saw-server-answer",
            MptcpState::NoAlgoSelected => "no-algo-selected",
            MptcpState::Pending => "pending",
            MptcpState::Incorrect => "incorrect",
            MptcpState::Ok => "ok",
        };
        f.write_str(name)
    }
}

/// Which end of the meta connection sent data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaSide {
    Client,
    Server,
}

impl MetaSide {
    pub fn index(self) -> usize {
        match self {
            MetaSide::Client => 0,
            MetaSide::Server => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            MetaSide::Client => MetaSide::Server,
            MetaSide::Server => MetaSide::Client,
        }
    }
}

/// Where a stretch of data-level bytes was first mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsnSpan {
    pub stream: u32,
    pub frame: u32,
    /// Relative subflow sequence of the first byte.
    pub ssn: u32,
}

/// One direction of a meta connection. DSNs are stored absolute; the span
/// tree is keyed by DSN relative to `base_dsn` so it never wraps.
#[derive(Debug, Default)]
pub struct MetaFlow {
    pub key: Option<u64>,
    pub token: Option<u32>,
    pub base_dsn: Option<u64>,
    pub next_dsn: Option<u64>,
    pub max_dsn_acked: Option<u64>,
    pub data_fin_frame: Option<u32>,
    pub reinjections: u64,
    spans: IntervalTree<u64, DsnSpan>,
}

impl MetaFlow {
    pub fn with_key(key: u64) -> Self {
        Self {
            key: Some(key),
            token: Some(key_token(key)),
            base_dsn: Some(key_idsn(key)),
            ..Self::default()
        }
    }

    pub fn relative(&self, dsn: u64) -> u64 {
        dsn.wrapping_sub(self.base_dsn.unwrap_or(0))
    }

    /// Widens a 32-bit wire value to the candidate closest to the current
    /// position of this flow.
    pub fn expand(&self, value: DataSeq) -> u64 {
        match value {
            DataSeq::Wide(dsn) => dsn,
            DataSeq::Short(low) => {
                let Some(anchor) = self.next_dsn.or(self.base_dsn) else {
                    return u64::from(low);
                };
                let candidate = (anchor & !0xffff_ffff) | u64::from(low);
                let step = 1u64 << 32;
                [candidate.wrapping_sub(step), candidate, candidate.wrapping_add(step)]
                    .into_iter()
                    .min_by_key(|c| c.wrapping_sub(anchor).min(anchor.wrapping_sub(*c)))
                    .unwrap_or(candidate)
            }
        }
    }

    /// Records a data-level mapping and returns earlier spans of other
    /// subflows that carried the same bytes.
    pub fn record_mapping(&mut self, dsn: u64, len: u32, span: DsnSpan) -> Result<Vec<DsnSpan>, TrackError> {
        let relative = self.relative(dsn);
        let range = Range::with_len(relative, u64::from(len))?;

        let mut seen_elsewhere = Vec::new();
        let mut already_mapped = false;
        for (_, earlier) in self.spans.find_all(&range) {
            if earlier.stream == span.stream {
                already_mapped = true;
            } else {
                seen_elsewhere.push(*earlier);
            }
        }

        if !seen_elsewhere.is_empty() {
            self.reinjections += 1;
        }
        if !already_mapped {
            self.spans.insert(range, span);
        }

        let end = dsn.wrapping_add(u64::from(len));
        if self.next_dsn.is_none_or(|next| end.after(next)) {
            self.next_dsn = Some(end);
        }
        Ok(seen_elsewhere)
    }

    pub fn acknowledge(&mut self, data_ack: u64) {
        if self.max_dsn_acked.is_none_or(|acked| data_ack.after(acked)) {
            self.max_dsn_acked = Some(data_ack);
        }
    }

    /// Origin of the data byte at absolute `dsn`.
    pub fn span_at(&self, dsn: u64) -> Option<(Range<u64>, DsnSpan)> {
        self.spans
            .find_point(self.relative(dsn))
            .map(|(range, span)| (*range, *span))
    }

    pub fn mapped_spans(&self) -> usize {
        self.spans.len()
    }
}

/// A multipath connection spanning one or more subflows.
#[derive(Debug)]
pub struct MptcpConnection {
    pub stream: u32,
    pub state: MptcpState,
    pub hmac: Option<HmacAlgorithm>,
    pub checksum_required: bool,
    /// Indexed by `MetaSide::index`.
    pub flows: [MetaFlow; 2],
    pub subflows: Vec<u32>,
    pub fail_frame: Option<u32>,
    pub fastclose_frame: Option<u32>,
}

impl MptcpConnection {
    /// Created on the server's MP_CAPABLE answer.
    pub fn new(stream: u32, client_key: Option<u64>, answer: &MpCapable) -> Self {
        let client = client_key.map(MetaFlow::with_key).unwrap_or_default();
        let server = answer.sender_key.map(MetaFlow::with_key).unwrap_or_default();
        Self {
            stream,
            state: MptcpState::SawServerAnswer,
            hmac: None,
            checksum_required: answer.checksum_required(),
            flows: [client, server],
            subflows: Vec::new(),
            fail_frame: None,
            fastclose_frame: None,
        }
    }

    pub fn flow(&self, side: MetaSide) -> &MetaFlow {
        &self.flows[side.index()]
    }

    pub fn flow_mut(&mut self, side: MetaSide) -> &mut MetaFlow {
        &mut self.flows[side.index()]
    }

    /// Side whose token is `token`.
    pub fn side_for_token(&self, token: u32) -> Option<MetaSide> {
        [MetaSide::Client, MetaSide::Server]
            .into_iter()
            .find(|side| self.flow(*side).token == Some(token))
    }

    /// Applies the algorithm the server's answer selected.
    pub fn select_algorithm(&mut self, answer: &MpCapable) {
        if self.state != MptcpState::SawServerAnswer {
            return;
        }
        self.hmac = answer.hmac();
        match self.hmac {
            Some(_) => self.transition(MptcpState::Pending),
            None => self.transition(MptcpState::NoAlgoSelected),
        }
    }

    /// Third handshake ACK: both keys must echo what was exchanged.
    pub fn confirm(&mut self, echo: &MpCapable) -> MptcpState {
        match self.state {
            MptcpState::NoAlgoSelected => self.transition(MptcpState::Incorrect),
            MptcpState::Pending => {
                let client_ok = echo.sender_key.is_some() && echo.sender_key == self.flows[0].key;
                let server_ok =
                    echo.receiver_key.is_some() && echo.receiver_key == self.flows[1].key;
                if client_ok && server_ok {
                    self.transition(MptcpState::Ok);
                } else {
                    self.transition(MptcpState::Incorrect);
                }
            }
            MptcpState::SawServerAnswer | MptcpState::Incorrect | MptcpState::Ok => {}
        }
        self.state
    }

    /// MP_FAIL or a bad DSS checksum. A connection already judged keeps its
    /// verdict; the frame is recorded either way.
    pub fn fail(&mut self, frame: u32) {
        self.fail_frame.get_or_insert(frame);
        if !self.state.is_terminal() {
            self.transition(MptcpState::Incorrect);
        }
    }

    pub fn add_subflow(&mut self, stream: u32) {
        if !self.subflows.contains(&stream) {
            self.subflows.push(stream);
        }
    }

    fn transition(&mut self, next: MptcpState) {
        if self.state != next {
            debug!(meta = self.stream, from = %self.state, to = %next, "MPTCP state change");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DsnSpan, MetaFlow, MetaSide, MptcpConnection, MptcpState};
    use crate::mptcp::option::{CAPABLE_FLAG_SHA1, DataSeq, MpCapable};
    use crate::mptcp::token::{key_idsn, key_token};

    const CLIENT_KEY: u64 = 0x1111_2222_3333_4444;
    const SERVER_KEY: u64 = 0x5555_6666_7777_8888;

    fn answer(flags: u8) -> MpCapable {
        MpCapable {
            version: 0,
            flags,
            sender_key: Some(SERVER_KEY),
            receiver_key: None,
        }
    }

    fn echo(sender: u64, receiver: u64) -> MpCapable {
        MpCapable {
            version: 0,
            flags: CAPABLE_FLAG_SHA1,
            sender_key: Some(sender),
            receiver_key: Some(receiver),
        }
    }

    fn negotiated(flags: u8) -> MptcpConnection {
        let mut meta = MptcpConnection::new(0, Some(CLIENT_KEY), &answer(flags));
        assert_eq!(meta.state, MptcpState::SawServerAnswer);
        meta.select_algorithm(&answer(flags));
        meta
    }

    #[test]
    fn matching_keys_complete_the_handshake() {
        let mut meta = negotiated(CAPABLE_FLAG_SHA1);
        assert_eq!(meta.state, MptcpState::Pending);
        assert_eq!(meta.confirm(&echo(CLIENT_KEY, SERVER_KEY)), MptcpState::Ok);

        assert_eq!(meta.flow(MetaSide::Server).token, Some(key_token(SERVER_KEY)));
        assert_eq!(meta.side_for_token(key_token(CLIENT_KEY)), Some(MetaSide::Client));
        assert_eq!(meta.flow(MetaSide::Client).base_dsn, Some(key_idsn(CLIENT_KEY)));
    }

    #[test]
    fn wrong_echo_or_missing_algorithm_is_incorrect() {
        let mut mismatched = negotiated(CAPABLE_FLAG_SHA1);
        assert_eq!(mismatched.confirm(&echo(CLIENT_KEY, 1)), MptcpState::Incorrect);

        let mut no_algo = negotiated(0);
        assert_eq!(no_algo.state, MptcpState::NoAlgoSelected);
        assert_eq!(no_algo.confirm(&echo(CLIENT_KEY, SERVER_KEY)), MptcpState::Incorrect);
    }

    #[test]
    fn terminal_states_are_never_left() {
        let mut meta = negotiated(CAPABLE_FLAG_SHA1);
        meta.confirm(&echo(CLIENT_KEY, SERVER_KEY));
        meta.fail(9);
        assert_eq!(meta.state, MptcpState::Ok);
        assert_eq!(meta.fail_frame, Some(9));

        let mut pending = negotiated(CAPABLE_FLAG_SHA1);
        pending.fail(3);
        assert_eq!(pending.state, MptcpState::Incorrect);
        assert_eq!(pending.confirm(&echo(CLIENT_KEY, SERVER_KEY)), MptcpState::Incorrect);
    }

    #[test]
    fn short_dsn_expands_near_current_position() {
        let flow = MetaFlow {
            next_dsn: Some(0x0000_0001_ffff_fff0),
            ..MetaFlow::default()
        };
        assert_eq!(flow.expand(DataSeq::Short(0x10)), 0x0000_0002_0000_0010);
        assert_eq!(flow.expand(DataSeq::Short(0xffff_ff00)), 0x0000_0001_ffff_ff00);
        assert_eq!(flow.expand(DataSeq::Wide(5)), 5);
    }

    #[test]
    fn reinjected_data_is_reported() {
        let mut flow = MetaFlow::with_key(CLIENT_KEY);
        let base = flow.base_dsn.expect("keyed flow has a base");
        let first = DsnSpan {
            stream: 0,
            frame: 4,
            ssn: 1,
        };
        let again = DsnSpan {
            stream: 1,
            frame: 9,
            ssn: 1,
        };

        assert!(flow.record_mapping(base + 1, 100, first).expect("valid mapping").is_empty());
        let earlier = flow
            .record_mapping(base + 51, 100, again)
            .expect("valid mapping");
        assert_eq!(earlier, vec![first]);
        assert_eq!(flow.reinjections, 1);
        assert_eq!(flow.next_dsn, Some(base + 151));

        let (range, span) = flow.span_at(base + 120).expect("byte is mapped");
        assert_eq!(span.stream, 1);
        assert_eq!(range.low(), 51);
    }
}
