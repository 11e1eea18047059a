pub mod range;
pub mod tree;

pub use range::{Endpoint, Range};
pub use tree::{IntervalTree, Iter};
