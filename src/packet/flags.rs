/// TCP flags as carried in the 12-bit flag field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool, // 0x001 - Finish, no more data from sender
    pub syn: bool, // 0x002 - Synchronize sequence numbers
    pub rst: bool, // 0x004 - Reset the connection
    pub psh: bool, // 0x008 - Push function
    pub ack: bool, // 0x010 - Acknowledgment field is significant
    pub urg: bool, // 0x020 - Urgent pointer field is significant
    pub ece: bool, // 0x040 - ECN-Echo
    pub cwr: bool, // 0x080 - Congestion Window Reduced
    pub ns: bool,  // 0x100 - ECN-nonce concealment protection (RFC 3540)
}

impl TcpFlags {
    pub const FIN: u16 = 0x001;
    pub const SYN: u16 = 0x002;
    pub const RST: u16 = 0x004;
    pub const PSH: u16 = 0x008;
    pub const ACK: u16 = 0x010;
    pub const URG: u16 = 0x020;
    pub const ECE: u16 = 0x040;
    pub const CWR: u16 = 0x080;
    pub const NS: u16 = 0x100;

    pub fn from_bits(bits: u16) -> Self {
        Self {
            fin: bits & Self::FIN != 0,
            syn: bits & Self::SYN != 0,
            rst: bits & Self::RST != 0,
            psh: bits & Self::PSH != 0,
            ack: bits & Self::ACK != 0,
            urg: bits & Self::URG != 0,
            ece: bits & Self::ECE != 0,
            cwr: bits & Self::CWR != 0,
            ns: bits & Self::NS != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        [
            (self.fin, Self::FIN),
            (self.syn, Self::SYN),
            (self.rst, Self::RST),
            (self.psh, Self::PSH),
            (self.ack, Self::ACK),
            (self.urg, Self::URG),
            (self.ece, Self::ECE),
            (self.cwr, Self::CWR),
            (self.ns, Self::NS),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    /// SYN, FIN or RST set.
    pub fn has_control(&self) -> bool {
        self.syn || self.fin || self.rst
    }

    /// SYN and FIN each occupy one sequence number.
    pub fn sequence_len(&self) -> u32 {
        u32::from(self.syn) + u32::from(self.fin)
    }
}

#[cfg(test)]
mod tests {
    use super::TcpFlags;

    #[test]
    fn bits_round_trip_through_fields() {
        let flags = TcpFlags::from_bits(TcpFlags::SYN | TcpFlags::ACK);
        assert!(flags.syn && flags.ack);
        assert!(!flags.fin && !flags.rst);
        assert_eq!(flags.bits(), 0x012);
        assert!(flags.has_control());
        assert_eq!(flags.sequence_len(), 1);
    }

    #[test]
    fn plain_ack_has_no_control_bits() {
        let flags = TcpFlags::from_bits(TcpFlags::ACK | TcpFlags::PSH);
        assert!(!flags.has_control());
        assert_eq!(flags.sequence_len(), 0);
    }
}
