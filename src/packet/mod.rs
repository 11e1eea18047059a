pub mod cursor;
pub mod flags;
pub mod options;
pub mod segment;

pub use cursor::Cursor;
pub use flags::TcpFlags;
pub use options::{TcpOptions, parse_tcp_options};
pub use segment::{MAX_SACK_BLOCKS, SackBlock, SackBlocks, Segment};
