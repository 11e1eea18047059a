use std::collections::BTreeMap;
use std::time::Duration;

/// The next segment belongs to the PDU in full, whatever its length.
pub const REASSEMBLE_ENTIRE_SEGMENT: u32 = 0x0000_0001;

/// One PDU spanning several segments of a flow. Sequence numbers are
/// relative to the flow's base sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisegmentPdu {
    pub seq: u32,
    /// First byte after the PDU, once its length is known.
    pub nxtpdu: Option<u32>,
    pub first_frame: u32,
    pub last_frame: u32,
    pub last_frame_time: Duration,
    pub flags: u32,
}

impl MultisegmentPdu {
    pub fn covers(&self, seq: u32) -> bool {
        seq >= self.seq && self.nxtpdu.is_none_or(|end| seq < end)
    }
}

/// In-flight PDU descriptors of one flow, keyed by starting sequence.
#[derive(Debug, Default)]
pub struct PduTable {
    entries: BTreeMap<u32, MultisegmentPdu>,
}

impl PduTable {
    pub fn upsert(&mut self, pdu: MultisegmentPdu) {
        self.entries.insert(pdu.seq, pdu);
    }

    pub fn get(&self, seq: u32) -> Option<&MultisegmentPdu> {
        self.entries.get(&seq)
    }

    /// Descriptor whose span contains `seq`.
    pub fn covering_mut(&mut self, seq: u32) -> Option<&mut MultisegmentPdu> {
        self.entries
            .range_mut(..=seq)
            .next_back()
            .map(|(_, pdu)| pdu)
            .filter(|pdu| pdu.covers(seq))
    }

    pub fn remove(&mut self, seq: u32) -> Option<MultisegmentPdu> {
        self.entries.remove(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every descriptor, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultisegmentPdu> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MultisegmentPdu, PduTable};

    fn pdu(seq: u32, nxtpdu: Option<u32>) -> MultisegmentPdu {
        MultisegmentPdu {
            seq,
            nxtpdu,
            first_frame: 1,
            last_frame: 1,
            last_frame_time: Duration::ZERO,
            flags: 0,
        }
    }

    #[test]
    fn covering_lookup_respects_pdu_end() {
        let mut table = PduTable::default();
        table.upsert(pdu(1, Some(151)));
        table.upsert(pdu(300, None));

        assert_eq!(table.covering_mut(100).map(|p| p.seq), Some(1));
        assert!(table.covering_mut(151).is_none());
        assert_eq!(table.covering_mut(10_000).map(|p| p.seq), Some(300));
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
