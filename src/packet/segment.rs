use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::warn;

use crate::mptcp::MptcpOption;

use super::flags::TcpFlags;
use super::options::TcpOptions;

/// Most SACK blocks a TCP header can carry (RFC 2018, section 3).
pub const MAX_SACK_BLOCKS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SackBlock {
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SackBlocks {
    blocks: [SackBlock; MAX_SACK_BLOCKS],
    len: usize,
}

impl SackBlocks {
    /// Keeps the first four blocks. The flag reports whether any were dropped.
    pub fn clamped(blocks: &[SackBlock]) -> (Self, bool) {
        let mut out = Self::default();
        for block in blocks {
            if !out.push(*block) {
                return (out, true);
            }
        }
        (out, false)
    }

    pub fn push(&mut self, block: SackBlock) -> bool {
        let Some(slot) = self.blocks.get_mut(self.len) else {
            return false;
        };
        *slot = block;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[SackBlock] {
        &self.blocks[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One observed TCP segment, already decoded.
#[derive(Debug, Clone)]
pub struct Segment {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    /// Window scale shift offered in a SYN.
    pub window_scale: Option<u8>,
    pub sack: SackBlocks,
    pub mptcp: Vec<MptcpOption>,
    pub payload: Vec<u8>,
    /// Capture time, relative to any fixed origin.
    pub timestamp: Duration,
    pub frame: u32,
}

impl Segment {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src: src.ip(),
            dst: dst.ip(),
            src_port: src.port(),
            dst_port: dst.port(),
            seq: 0,
            ack: 0,
            flags: TcpFlags::default(),
            window: 0,
            window_scale: None,
            sack: SackBlocks::default(),
            mptcp: Vec::new(),
            payload: Vec::new(),
            timestamp: Duration::ZERO,
            frame: 0,
        }
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Sets the acknowledgment number and the ACK flag.
    pub fn with_ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self.flags.ack = true;
        self
    }

    pub fn with_flags(mut self, bits: u16) -> Self {
        self.flags = TcpFlags::from_bits(bits);
        self
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_sack(mut self, blocks: &[SackBlock]) -> Self {
        let (sack, truncated) = SackBlocks::clamped(blocks);
        if truncated {
            warn!(
                frame = self.frame,
                offered = blocks.len(),
                "SACK block list clamped to {}",
                MAX_SACK_BLOCKS
            );
        }
        self.sack = sack;
        self
    }

    pub fn with_mptcp(mut self, option: MptcpOption) -> Self {
        self.mptcp.push(option);
        self
    }

    /// Applies decoded TCP options.
    pub fn with_options(mut self, options: TcpOptions) -> Self {
        if options.window_scale.is_some() {
            self.window_scale = options.window_scale;
        }
        self.sack = options.sack;
        self.mptcp.extend(options.mptcp);
        self
    }

    pub fn at(mut self, frame: u32, timestamp: Duration) -> Self {
        self.frame = frame;
        self.timestamp = timestamp;
        self
    }

    pub fn payload_len(&self) -> u32 {
        u32::try_from(self.payload.len()).unwrap_or(u32::MAX)
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.src, self.src_port)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.dst, self.dst_port)
    }
}
