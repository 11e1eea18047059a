use std::time::Duration;

use super::seq_space::SeqNum;

/// Payload bytes known to be contiguous with everything delivered before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedChunk {
    pub seq: u32,
    pub frame: u32,
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

impl OrderedChunk {
    fn end(&self) -> u32 {
        self.seq.wrapping_add(self.data.len() as u32)
    }

    /// Drops bytes before `seq`.
    fn trim_to(&mut self, seq: u32) {
        let skip = seq.wrapping_sub(self.seq) as usize;
        self.data.drain(..skip.min(self.data.len()));
        self.seq = seq;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderEvent {
    InOrder(Vec<OrderedChunk>),
    Gap { expected_seq: u32, got_seq: u32 },
    Duplicate { seq: u32 },
}

/// Holds segments that arrive ahead of a hole and releases bytes strictly in
/// sequence order. Already delivered bytes are never released twice.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next_seq: Option<u32>,
    buffered: Vec<OrderedChunk>,
}

impl ReorderBuffer {
    /// Anchors the stream at `next_seq` unless data was already seen.
    pub fn sync(&mut self, next_seq: u32) {
        if self.next_seq.is_none() {
            self.next_seq = Some(next_seq);
        }
    }

    pub fn next_seq(&self) -> Option<u32> {
        self.next_seq
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered.iter().map(|c| c.data.len()).sum()
    }

    pub fn clear(&mut self) {
        self.buffered.clear();
    }

    pub fn push(&mut self, chunk: OrderedChunk) -> ReorderEvent {
        if chunk.data.is_empty() {
            return ReorderEvent::InOrder(Vec::new());
        }

        let expected = match self.next_seq {
            Some(s) => s,
            None => {
                self.next_seq = Some(chunk.end());
                return ReorderEvent::InOrder(vec![chunk]);
            }
        };

        if chunk.end().at_or_before(expected) {
            return ReorderEvent::Duplicate { seq: chunk.seq };
        }

        if chunk.seq.after(expected) {
            let got_seq = chunk.seq;
            let known = self
                .buffered
                .iter()
                .any(|c| c.seq == chunk.seq && c.data.len() >= chunk.data.len());
            if !known {
                self.buffered.push(chunk);
            }
            return ReorderEvent::Gap {
                expected_seq: expected,
                got_seq,
            };
        }

        ReorderEvent::InOrder(self.release(chunk, expected))
    }

    /// Gives up on the hole in front of the earliest buffered chunk and
    /// releases everything contiguous with it. Returns the number of
    /// sequence numbers skipped and the released chunks.
    pub fn skip_gap(&mut self) -> Option<(u32, Vec<OrderedChunk>)> {
        let expected = self.next_seq?;
        let idx = self
            .buffered
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.seq.wrapping_sub(expected))
            .map(|(idx, _)| idx)?;
        let first = self.buffered.swap_remove(idx);
        let skipped = first.seq.wrapping_sub(expected);
        let start = first.seq;
        Some((skipped, self.release(first, start)))
    }

    fn release(&mut self, mut chunk: OrderedChunk, from: u32) -> Vec<OrderedChunk> {
        chunk.trim_to(from);
        let mut next = chunk.end();
        let mut out = vec![chunk];

        while let Some(idx) = self.buffered.iter().position(|c| c.seq.at_or_before(next)) {
            let mut ready = self.buffered.swap_remove(idx);
            if ready.end().at_or_before(next) {
                continue;
            }
            ready.trim_to(next);
            next = ready.end();
            out.push(ready);
        }

        self.next_seq = Some(next);
        out
    }
}
