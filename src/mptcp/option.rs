use std::net::IpAddr;

/// MP_CAPABLE flag bit H: HMAC-SHA1 selected.
pub const CAPABLE_FLAG_SHA1: u8 = 0x01;
/// MP_CAPABLE flag bits reserved for crypto algorithm negotiation.
pub const CAPABLE_CRYPTO_MASK: u8 = 0x3f;
/// MP_CAPABLE flag bit A: DSS checksums required.
pub const CAPABLE_CHECKSUM_MASK: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha1,
}

/// One MPTCP sub-option carried in TCP option kind 30.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MptcpOption {
    Capable(MpCapable),
    Join(MpJoin),
    Dss(Dss),
    AddAddr {
        addr_id: u8,
        addr: IpAddr,
        port: Option<u16>,
    },
    RemoveAddr {
        addr_ids: Vec<u8>,
    },
    Prio {
        backup: bool,
        addr_id: Option<u8>,
    },
    Fail {
        dsn: u64,
    },
    FastClose {
        key: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpCapable {
    pub version: u8,
    pub flags: u8,
    pub sender_key: Option<u64>,
    pub receiver_key: Option<u64>,
}

impl MpCapable {
    pub fn hmac(&self) -> Option<HmacAlgorithm> {
        (self.flags & CAPABLE_CRYPTO_MASK & CAPABLE_FLAG_SHA1 != 0).then_some(HmacAlgorithm::Sha1)
    }

    pub fn checksum_required(&self) -> bool {
        self.flags & CAPABLE_CHECKSUM_MASK != 0
    }
}

/// MP_JOIN in any of its three handshake forms. Only the SYN form carries
/// the token of the connection being joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MpJoin {
    pub backup: bool,
    pub addr_id: u8,
    pub token: Option<u32>,
    pub nonce: Option<u32>,
}

/// Data sequence value as found on the wire, 4 or 8 bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSeq {
    Short(u32),
    Wide(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DssMapping {
    pub dsn: DataSeq,
    /// Subflow sequence number, relative to the subflow's initial sequence.
    pub ssn: u32,
    /// Data-level length; 0 announces an infinite mapping.
    pub length: u16,
    pub checksum: Option<u16>,
    /// Set by a decoder that verified the DSS checksum.
    pub checksum_valid: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dss {
    pub data_ack: Option<DataSeq>,
    pub mapping: Option<DssMapping>,
    pub data_fin: bool,
}
