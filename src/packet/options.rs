use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{trace, warn};

use crate::mptcp::{DataSeq, Dss, DssMapping, MpCapable, MpJoin, MptcpOption};

use super::cursor::Cursor;
use super::segment::{MAX_SACK_BLOCKS, SackBlock, SackBlocks};

const KIND_END: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WINDOW_SCALE: u8 = 3;
const KIND_SACK_PERMITTED: u8 = 4;
const KIND_SACK: u8 = 5;
const KIND_TIMESTAMP: u8 = 8;
const KIND_MPTCP: u8 = 30;

const MPTCP_CAPABLE: u8 = 0x0;
const MPTCP_JOIN: u8 = 0x1;
const MPTCP_DSS: u8 = 0x2;
const MPTCP_ADD_ADDR: u8 = 0x3;
const MPTCP_REMOVE_ADDR: u8 = 0x4;
const MPTCP_PRIO: u8 = 0x5;
const MPTCP_FAIL: u8 = 0x6;
const MPTCP_FASTCLOSE: u8 = 0x7;

const DSS_DATA_ACK: u8 = 0x01;
const DSS_DATA_ACK_WIDE: u8 = 0x02;
const DSS_MAPPING: u8 = 0x04;
const DSS_DSN_WIDE: u8 = 0x08;
const DSS_DATA_FIN: u8 = 0x10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpOptions {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
    pub sack: SackBlocks,
    pub ts_val: Option<u32>,
    pub ts_ecr: Option<u32>,
    pub mptcp: Vec<MptcpOption>,
}

/// Decodes the option area of a TCP header. A malformed option ends decoding;
/// everything decoded before it is kept.
pub fn parse_tcp_options(blob: &[u8]) -> TcpOptions {
    let mut out = TcpOptions::default();
    let mut i = 0;
    while i < blob.len() {
        let kind = blob[i];
        if kind == KIND_END {
            break;
        }
        if kind == KIND_NOP {
            i += 1;
            continue;
        }
        if i + 2 > blob.len() {
            break;
        }
        let len = blob[i + 1] as usize;
        if len < 2 || i + len > blob.len() {
            trace!(kind, len, "truncated TCP option");
            break;
        }
        let body = &blob[i + 2..i + len];
        match kind {
            KIND_MSS if body.len() >= 2 => {
                out.mss = Some(u16::from_be_bytes([body[0], body[1]]));
            }
            KIND_WINDOW_SCALE if !body.is_empty() => {
                // RFC 7323: shifts above 14 are treated as 14
                out.window_scale = Some(body[0].min(14));
            }
            KIND_SACK_PERMITTED => out.sack_permitted = true,
            KIND_SACK => out.sack = parse_sack(body),
            KIND_TIMESTAMP => {
                let mut cursor = Cursor::new(body);
                out.ts_val = cursor.read_u32_be();
                out.ts_ecr = cursor.read_u32_be();
            }
            KIND_MPTCP => {
                if let Some(option) = parse_mptcp(body) {
                    out.mptcp.push(option);
                }
            }
            _ => {}
        }
        i += len;
    }
    out
}

fn parse_sack(body: &[u8]) -> SackBlocks {
    let mut sack = SackBlocks::default();
    let offered = body.len() / 8;
    if offered > MAX_SACK_BLOCKS {
        warn!(offered, "SACK option carries more than {} blocks", MAX_SACK_BLOCKS);
    }
    let mut cursor = Cursor::new(body);
    while let (Some(left), Some(right)) = (cursor.read_u32_be(), cursor.read_u32_be()) {
        if !sack.push(SackBlock { left, right }) {
            break;
        }
    }
    sack
}

/// `body` starts at the subtype byte.
fn parse_mptcp(body: &[u8]) -> Option<MptcpOption> {
    let mut cursor = Cursor::new(body);
    let first = cursor.peek_u8_at(0)?;
    let subtype = first >> 4;
    match subtype {
        MPTCP_CAPABLE => {
            cursor.advance(1)?;
            let flags = cursor.read_u8()?;
            Some(MptcpOption::Capable(MpCapable {
                version: first & 0x0f,
                flags,
                sender_key: cursor.read_u64_be(),
                receiver_key: cursor.read_u64_be(),
            }))
        }
        MPTCP_JOIN => {
            cursor.advance(1)?;
            let addr_id = cursor.read_u8()?;
            let mut join = MpJoin {
                backup: first & 0x01 != 0,
                addr_id,
                ..MpJoin::default()
            };
            // SYN form is 12 bytes on the wire: token then nonce
            if body.len() == 10 {
                join.token = cursor.read_u32_be();
                join.nonce = cursor.read_u32_be();
            } else if body.len() == 14 {
                cursor.advance(8)?;
                join.nonce = cursor.read_u32_be();
            }
            Some(MptcpOption::Join(join))
        }
        MPTCP_DSS => parse_dss(&mut cursor).map(MptcpOption::Dss),
        MPTCP_ADD_ADDR => {
            cursor.advance(1)?;
            let addr_id = cursor.read_u8()?;
            let addr = match first & 0x0f {
                4 => {
                    let octets: [u8; 4] = cursor.read_exact(4)?.try_into().ok()?;
                    IpAddr::V4(Ipv4Addr::from(octets))
                }
                6 => {
                    let octets: [u8; 16] = cursor.read_exact(16)?.try_into().ok()?;
                    IpAddr::V6(Ipv6Addr::from(octets))
                }
                _ => return None,
            };
            let port = (cursor.remaining() >= 2)
                .then(|| cursor.read_u16_be())
                .flatten();
            Some(MptcpOption::AddAddr {
                addr_id,
                addr,
                port,
            })
        }
        MPTCP_REMOVE_ADDR => {
            cursor.advance(1)?;
            let addr_ids = cursor.read_exact(cursor.remaining())?.to_vec();
            Some(MptcpOption::RemoveAddr { addr_ids })
        }
        MPTCP_PRIO => {
            cursor.advance(1)?;
            Some(MptcpOption::Prio {
                backup: first & 0x01 != 0,
                addr_id: cursor.read_u8(),
            })
        }
        MPTCP_FAIL => {
            cursor.advance(2)?;
            Some(MptcpOption::Fail {
                dsn: cursor.read_u64_be()?,
            })
        }
        MPTCP_FASTCLOSE => {
            cursor.advance(2)?;
            Some(MptcpOption::FastClose {
                key: cursor.read_u64_be()?,
            })
        }
        _ => None,
    }
}

fn parse_dss(cursor: &mut Cursor<'_>) -> Option<Dss> {
    cursor.advance(1)?;
    let flags = cursor.read_u8()?;
    let mut dss = Dss {
        data_fin: flags & DSS_DATA_FIN != 0,
        ..Dss::default()
    };

    if flags & DSS_DATA_ACK != 0 {
        dss.data_ack = Some(read_data_seq(cursor, flags & DSS_DATA_ACK_WIDE != 0)?);
    }
    if flags & DSS_MAPPING != 0 {
        let dsn = read_data_seq(cursor, flags & DSS_DSN_WIDE != 0)?;
        let ssn = cursor.read_u32_be()?;
        let length = cursor.read_u16_be()?;
        let checksum = (cursor.remaining() >= 2)
            .then(|| cursor.read_u16_be())
            .flatten();
        dss.mapping = Some(DssMapping {
            dsn,
            ssn,
            length,
            checksum,
            checksum_valid: None,
        });
    }
    Some(dss)
}

fn read_data_seq(cursor: &mut Cursor<'_>, wide: bool) -> Option<DataSeq> {
    if wide {
        cursor.read_u64_be().map(DataSeq::Wide)
    } else {
        cursor.read_u32_be().map(DataSeq::Short)
    }
}
