pub mod connection;
pub mod connection_table;
pub mod flow;
pub mod flow_key;
pub mod reorder;
pub mod seq_space;
pub mod timers;

pub use connection::{Connection, ConnectionKind, SegmentRecord};
pub use connection_table::ConnectionTable;
pub use flow::{Flow, FlowCounters, UnackedSegment, WindowScale};
pub use flow_key::{Direction, FlowKey};
pub use reorder::{OrderedChunk, ReorderBuffer, ReorderEvent};
pub use seq_space::SeqNum;
