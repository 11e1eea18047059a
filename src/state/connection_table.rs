use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tracing::debug;

use super::connection::Connection;
use super::flow_key::FlowKey;
use super::timers::is_expired;

/// Live connections by 4-tuple. Stream indices come from a counter owned by
/// the table, so they stay dense and restart at zero on `clear`.
///
/// `ts_prev` keys the activity index, so it only changes through `touch`.
#[derive(Debug)]
pub struct ConnectionTable {
    by_key: HashMap<FlowKey, u32>,
    entries: HashMap<u32, Connection>,
    by_activity: BTreeSet<(Duration, u32)>,
    next_stream: u32,
    max_entries: usize,
}

impl ConnectionTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            entries: HashMap::new(),
            by_activity: BTreeSet::new(),
            next_stream: 0,
            max_entries,
        }
    }

    pub fn lookup(&self, key: &FlowKey) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    pub fn get(&self, stream: u32) -> Option<&Connection> {
        self.entries.get(&stream)
    }

    pub fn get_mut(&mut self, stream: u32) -> Option<&mut Connection> {
        self.entries.get_mut(&stream)
    }

    /// Starts a new connection on `key`. Returns its stream index and the
    /// connections it pushed out: an earlier one on the same tuple, and the
    /// least recently active one when the table is full.
    pub fn open(&mut self, key: FlowKey, now: Duration) -> (u32, Vec<Connection>) {
        let mut retired = Vec::new();

        if let Some(old) = self.by_key.remove(&key)
            && let Some(conn) = self.entries.remove(&old)
        {
            retired.push(conn);
        }

        if self.entries.len() >= self.max_entries
            && let Some(conn) = self.evict_oldest()
        {
            retired.push(conn);
        }

        let stream = self.next_stream;
        self.next_stream += 1;
        self.by_key.insert(key, stream);
        self.by_activity.insert((now, stream));
        self.entries.insert(stream, Connection::new(stream, key, now));
        debug!(stream, %key, "connection opened");
        (stream, retired)
    }

    /// Records activity on `stream` at `now`.
    pub fn touch(&mut self, stream: u32, now: Duration) {
        let Some(conn) = self.entries.get_mut(&stream) else {
            return;
        };
        self.by_activity.remove(&(conn.ts_prev, stream));
        conn.ts_prev = now;
        self.by_activity.insert((now, stream));
    }

    /// Removes connections idle for longer than `ttl`.
    pub fn expire_idle(&mut self, now: Duration, ttl: Duration) -> Vec<Connection> {
        let mut expired: Vec<u32> = self
            .by_activity
            .iter()
            .take_while(|(last_seen, _)| is_expired(now, *last_seen, ttl))
            .map(|(_, stream)| *stream)
            .collect();
        expired.sort_unstable();
        expired
            .into_iter()
            .filter_map(|stream| self.remove(stream))
            .collect()
    }

    pub fn remove(&mut self, stream: u32) -> Option<Connection> {
        let conn = self.entries.remove(&stream)?;
        self.by_activity.remove(&(conn.ts_prev, stream));
        if self.by_key.get(&conn.key) == Some(&stream) {
            self.by_key.remove(&conn.key);
        }
        Some(conn)
    }

    /// Takes every connection out, ordered by stream index.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.by_key.clear();
        self.by_activity.clear();
        let mut all: Vec<Connection> = self.entries.drain().map(|(_, conn)| conn).collect();
        all.sort_by_key(|conn| conn.stream);
        all
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything, including the stream counter.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_activity.clear();
        self.entries.clear();
        self.next_stream = 0;
    }

    fn evict_oldest(&mut self) -> Option<Connection> {
        let &(_, oldest) = self.by_activity.first()?;
        debug!(stream = oldest, "evicting least recently active connection");
        self.remove(oldest)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::ConnectionTable;
    use crate::state::FlowKey;

    fn key(last: u8, port: u16) -> FlowKey {
        FlowKey::from_endpoints(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            port,
            IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)),
            80,
        )
        .0
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn reopening_a_tuple_retires_the_old_connection() {
        let mut table = ConnectionTable::new(16);
        let (first, retired) = table.open(key(1, 1000), secs(1));
        assert!(retired.is_empty());

        let (second, retired) = table.open(key(1, 1000), secs(2));
        assert_eq!((first, second), (0, 1));
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].stream, 0);
        assert_eq!(table.lookup(&key(1, 1000)), Some(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn evicts_least_recently_active_when_full() {
        let mut table = ConnectionTable::new(2);
        table.open(key(1, 1111), secs(1));
        table.open(key(2, 2222), secs(2));
        table.touch(0, secs(5));

        let (_, retired) = table.open(key(3, 3333), secs(6));
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].stream, 1);
        assert!(table.lookup(&key(2, 2222)).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn eviction_follows_the_latest_activity() {
        let mut table = ConnectionTable::new(3);
        table.open(key(1, 1111), secs(1));
        table.open(key(2, 2222), secs(2));
        table.open(key(3, 3333), secs(3));
        table.touch(0, secs(4));
        table.touch(1, secs(5));
        // touching a retired stream is a no-op
        table.touch(42, secs(6));

        let (_, retired) = table.open(key(4, 4444), secs(7));
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].stream, 2);

        let (_, retired) = table.open(key(5, 5555), secs(8));
        assert_eq!(retired[0].stream, 0);
        assert_eq!(
            table.get(1).expect("recently active connection is live").ts_prev,
            secs(5)
        );

        let expired = table.expire_idle(secs(9), Duration::from_millis(2_500));
        let streams: Vec<u32> = expired.iter().map(|conn| conn.stream).collect();
        assert_eq!(streams, vec![1]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn idle_connections_expire_and_counter_resets() {
        let mut table = ConnectionTable::new(16);
        table.open(key(1, 1000), secs(1));
        table.open(key(2, 1000), secs(100));

        let expired = table.expire_idle(secs(200), secs(150));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].stream, 0);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.open(key(9, 9), secs(1)).0, 0);
    }
}
