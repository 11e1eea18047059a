pub mod assembler;
pub mod pdu;
pub mod probe;

pub use assembler::{AssemblyState, Framing, PduAssembler, PduOrigin, SegmentBytes};
pub use pdu::{MultisegmentPdu, PduTable, REASSEMBLE_ENTIRE_SEGMENT};
pub use probe::{LengthPrefixProbe, Pdu, PduConsumer, PduLength, PduLengthProbe, PrefixWidth};
