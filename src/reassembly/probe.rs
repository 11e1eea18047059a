use crate::packet::Cursor;
use crate::state::Direction;

/// What a length probe learned from the bytes buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduLength {
    /// Total PDU length in bytes, header included.
    Known(usize),
    /// The header is not complete yet.
    NeedMore,
    /// Append the whole next segment, then ask again.
    OneMoreSegment,
    /// The rest of this direction is one PDU, ending at FIN.
    UntilClose,
}

pub trait PduLengthProbe {
    fn pdu_length(&self, header: &[u8]) -> PduLength;
}

impl<F> PduLengthProbe for F
where
    F: Fn(&[u8]) -> PduLength,
{
    fn pdu_length(&self, header: &[u8]) -> PduLength {
        self(header)
    }
}

/// A PDU handed to the consumer. `complete` is false only for fragments
/// delivered with desegmentation disabled.
#[derive(Debug, Clone, Copy)]
pub struct Pdu<'a> {
    pub stream: u32,
    pub direction: Direction,
    /// Relative sequence number of the first byte.
    pub seq: u32,
    pub data: &'a [u8],
    pub first_frame: u32,
    pub last_frame: u32,
    pub complete: bool,
}

pub trait PduConsumer {
    fn consume(&mut self, pdu: Pdu<'_>);
}

impl<F> PduConsumer for F
where
    F: FnMut(Pdu<'_>),
{
    fn consume(&mut self, pdu: Pdu<'_>) {
        self(pdu)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    U8,
    U16,
    U24,
    U32,
}

impl PrefixWidth {
    pub fn bytes(self) -> usize {
        match self {
            PrefixWidth::U8 => 1,
            PrefixWidth::U16 => 2,
            PrefixWidth::U24 => 3,
            PrefixWidth::U32 => 4,
        }
    }
}

/// Reads a big-endian length field at `offset` and adds `header_len`, the
/// bytes the field does not count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefixProbe {
    pub offset: usize,
    pub width: PrefixWidth,
    pub header_len: usize,
}

impl LengthPrefixProbe {
    /// Smallest buffer the probe can decide on.
    pub fn fixed_len(&self) -> usize {
        self.offset + self.width.bytes()
    }
}

impl PduLengthProbe for LengthPrefixProbe {
    fn pdu_length(&self, header: &[u8]) -> PduLength {
        let Some(mut cursor) = Cursor::with_pos(header, self.offset) else {
            return PduLength::NeedMore;
        };
        let value = match self.width {
            PrefixWidth::U8 => cursor.read_u8().map(u32::from),
            PrefixWidth::U16 => cursor.read_u16_be().map(u32::from),
            PrefixWidth::U24 => cursor.read_u24_be(),
            PrefixWidth::U32 => cursor.read_u32_be(),
        };
        let Some(len) = value else {
            return PduLength::NeedMore;
        };
        match usize::try_from(len).ok().and_then(|len| len.checked_add(self.header_len)) {
            Some(total) => PduLength::Known(total),
            // unrepresentable, let the assembler reject it
            None => PduLength::Known(usize::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LengthPrefixProbe, PduLength, PduLengthProbe, PrefixWidth};

    #[test]
    fn length_prefix_probe_adds_header() {
        let probe = LengthPrefixProbe {
            offset: 1,
            width: PrefixWidth::U16,
            header_len: 3,
        };
        assert_eq!(probe.fixed_len(), 3);
        assert_eq!(probe.pdu_length(&[0x17, 0x00, 0x10]), PduLength::Known(19));
        assert_eq!(probe.pdu_length(&[0x17, 0x00]), PduLength::NeedMore);
    }

    #[test]
    fn length_prefix_saturates_on_overflow() {
        let probe = LengthPrefixProbe {
            offset: 0,
            width: PrefixWidth::U32,
            header_len: usize::MAX,
        };
        assert_eq!(probe.pdu_length(&[0, 0, 0, 1]), PduLength::Known(usize::MAX));
    }

    #[test]
    fn closures_act_as_probes() {
        let probe = |header: &[u8]| match header.first() {
            Some(&n) => PduLength::Known(n as usize),
            None => PduLength::NeedMore,
        };
        assert_eq!(probe.pdu_length(&[9]), PduLength::Known(9));
    }
}
