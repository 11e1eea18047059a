use crate::state::Direction;

use super::mapping::{PendingSpan, SubflowMappings};
use super::meta::MetaSide;

/// Multipath half of a TCP connection. `meta` stays `None` for orphans:
/// joins whose token matched nothing, or data seen without a handshake.
#[derive(Debug)]
pub struct SubflowLink {
    pub meta: Option<u32>,
    /// Key offered in the MP_CAPABLE SYN, until the server answers.
    pub syn_key: Option<u64>,
    /// Direction whose sender is the meta connection's client.
    pub client_direction: Direction,
    pub joined: bool,
    pub addr_id: Option<u8>,
    pub backup: bool,
    pub fallback_frame: Option<u32>,
    mappings: [SubflowMappings; 2],
}

impl SubflowLink {
    pub fn initial(client_direction: Direction, syn_key: Option<u64>) -> Self {
        Self {
            meta: None,
            syn_key,
            client_direction,
            joined: false,
            addr_id: Some(0),
            backup: false,
            fallback_frame: None,
            mappings: Default::default(),
        }
    }

    pub fn join(meta: Option<u32>, client_direction: Direction, addr_id: u8, backup: bool) -> Self {
        Self {
            meta,
            syn_key: None,
            client_direction,
            joined: true,
            addr_id: Some(addr_id),
            backup,
            fallback_frame: None,
            mappings: Default::default(),
        }
    }

    pub fn orphan(client_direction: Direction) -> Self {
        Self {
            meta: None,
            syn_key: None,
            client_direction,
            joined: false,
            addr_id: None,
            backup: false,
            fallback_frame: None,
            mappings: Default::default(),
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.meta.is_none()
    }

    pub fn meta_side(&self, direction: Direction) -> MetaSide {
        if direction == self.client_direction {
            MetaSide::Client
        } else {
            MetaSide::Server
        }
    }

    pub fn mappings(&self, direction: Direction) -> &SubflowMappings {
        &self.mappings[direction.index()]
    }

    pub fn mappings_mut(&mut self, direction: Direction) -> &mut SubflowMappings {
        &mut self.mappings[direction.index()]
    }

    /// Drains bytes no mapping ever covered, in both directions.
    pub fn take_pending(&mut self) -> Vec<(Direction, PendingSpan)> {
        [Direction::Forward, Direction::Reverse]
            .into_iter()
            .flat_map(|direction| {
                self.mappings[direction.index()]
                    .take_pending()
                    .into_iter()
                    .map(move |span| (direction, span))
            })
            .collect()
    }
}
