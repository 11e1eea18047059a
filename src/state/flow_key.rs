use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

/// Which of a connection's two flows a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }
}

/// Canonical TCP 4-tuple. The endpoint that orders higher is always stored
/// as `a`, so both directions of a connection map to the same key and
/// traffic from `a` is the forward flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub a: IpAddr,
    pub a_port: u16,
    pub b: IpAddr,
    pub b_port: u16,
}

impl FlowKey {
    pub fn from_endpoints(src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16) -> (Self, Direction) {
        // addresses first, ports break ties; identical endpoints fall to forward
        let src_first = match src.cmp(&dst) {
            Ordering::Equal => src_port >= dst_port,
            order => order == Ordering::Greater,
        };

        if src_first {
            (
                Self {
                    a: src,
                    a_port: src_port,
                    b: dst,
                    b_port: dst_port,
                },
                Direction::Forward,
            )
        } else {
            (
                Self {
                    a: dst,
                    a_port: dst_port,
                    b: src,
                    b_port: src_port,
                },
                Direction::Reverse,
            )
        }
    }

    /// Sender endpoint for traffic in `direction`.
    pub fn sender(&self, direction: Direction) -> (IpAddr, u16) {
        match direction {
            Direction::Forward => (self.a, self.a_port),
            Direction::Reverse => (self.b, self.b_port),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} <-> {}:{}", self.a, self.a_port, self.b, self.b_port)
    }
}
