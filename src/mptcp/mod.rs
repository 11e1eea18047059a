//! Multipath TCP: option model, token derivation, meta connections and the
//! mapping of subflow bytes onto the connection-wide data sequence space.

pub mod correlate;
pub mod mapping;
pub mod meta;
pub mod option;
pub mod registry;
pub mod subflow;
pub mod token;

pub use correlate::{MptcpAnalysis, correlate_segment};
pub use mapping::{AttributedSpan, InfiniteMapping, PendingSpan, SubflowMappings};
pub use meta::{DsnSpan, MetaFlow, MetaSide, MptcpConnection, MptcpState};
pub use option::{
    CAPABLE_CHECKSUM_MASK, CAPABLE_CRYPTO_MASK, CAPABLE_FLAG_SHA1, DataSeq, Dss, DssMapping,
    HmacAlgorithm, MpCapable, MpJoin, MptcpOption,
};
pub use registry::MptcpRegistry;
pub use subflow::SubflowLink;
pub use token::{TokenRegistry, key_idsn, key_token};
