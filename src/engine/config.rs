use std::time::Duration;

/// How payload is cut into PDUs.
#[derive(Debug, Clone, Copy)]
pub struct FramingConfig {
    /// Buffer PDUs that cross segment boundaries.
    pub desegment: bool,
    /// Bytes the length probe needs before it can answer.
    pub fixed_len: usize,
    /// Treat each direction as a single PDU that ends at FIN.
    pub reassemble_until_close: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            desegment: true,
            fixed_len: 0,
            reassemble_until_close: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Classify segments (retransmission, dup ACK, ...).
    pub analyze_sequence: bool,
    /// Track connections whose handshake was not captured.
    pub accept_midstream: bool,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    /// Out-of-order window used until the handshake RTT is known.
    pub out_of_order_threshold: Duration,
    pub fast_retransmit_window: Duration,
    /// Duplicate ACKs, beyond the original, that arm fast retransmission.
    pub fast_retransmit_dup_acks: u32,
    /// Keep a per-segment history for reporting.
    pub record_history: bool,
    pub mptcp: bool,
    /// Out-of-order bytes one direction may hold before the hole in front
    /// of them is given up on.
    pub max_reorder_bytes: usize,
    pub framing: FramingConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            analyze_sequence: true,
            accept_midstream: true,
            max_connections: 100_000,
            idle_timeout: Duration::from_secs(300),
            out_of_order_threshold: Duration::from_millis(3),
            fast_retransmit_window: Duration::from_millis(20),
            fast_retransmit_dup_acks: 2,
            record_history: true,
            mptcp: true,
            max_reorder_bytes: 4 << 20,
            framing: FramingConfig::default(),
        }
    }
}
