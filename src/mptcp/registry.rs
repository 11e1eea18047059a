use tracing::debug;

use super::meta::MptcpConnection;
use super::option::MpCapable;
use super::token::TokenRegistry;

/// Session-wide store of meta connections and the token index used to
/// attach joining subflows. Lives until the session is reset.
#[derive(Debug, Default)]
pub struct MptcpRegistry {
    metas: Vec<MptcpConnection>,
    tokens: TokenRegistry,
}

impl MptcpRegistry {
    /// Starts a meta connection from the server's MP_CAPABLE answer and
    /// indexes both tokens. Returns the new meta stream index.
    pub fn open(&mut self, client_key: Option<u64>, answer: &MpCapable) -> u32 {
        let stream = self.metas.len() as u32;
        let mut meta = MptcpConnection::new(stream, client_key, answer);
        meta.select_algorithm(answer);

        for token in meta.flows.iter().filter_map(|flow| flow.token) {
            self.tokens.register(token, stream);
        }
        debug!(meta = stream, state = %meta.state, "MPTCP connection opened");
        self.metas.push(meta);
        stream
    }

    pub fn lookup_token(&self, token: u32) -> Option<u32> {
        self.tokens.lookup(token)
    }

    pub fn get(&self, stream: u32) -> Option<&MptcpConnection> {
        self.metas.get(stream as usize)
    }

    pub fn get_mut(&mut self, stream: u32) -> Option<&mut MptcpConnection> {
        self.metas.get_mut(stream as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MptcpConnection> {
        self.metas.iter()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn clear(&mut self) {
        self.metas.clear();
        self.tokens.clear();
    }
}
