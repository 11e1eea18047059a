use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("inverted range: low {low} > high {high}")]
    InvertedRange { low: u64, high: u64 },

    #[error("invalid declared PDU length {declared} (fixed header is {min} bytes)")]
    BadPduLength { declared: usize, min: usize },

    #[error("no connection for {src}:{src_port} -> {dst}:{dst_port} and mid-stream tracking is disabled")]
    UnknownConnection {
        src: std::net::IpAddr,
        src_port: u16,
        dst: std::net::IpAddr,
        dst_port: u16,
    },

    #[error("DSS mapping at {start} with length {length} overflows the sequence space")]
    MappingOverflow { start: u64, length: u64 },
}
