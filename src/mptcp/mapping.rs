use tracing::trace;

use crate::engine::TrackError;
use crate::itree::{IntervalTree, Range};

/// Subflow bytes placed in the data sequence space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributedSpan {
    /// Relative subflow sequence of the first byte.
    pub ssn: u32,
    pub dsn: u64,
    pub len: u32,
    /// Frame that announced the mapping.
    pub mapping_frame: u32,
}

/// Subflow bytes seen before any mapping covered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSpan {
    pub ssn: u32,
    pub len: u32,
    pub frame: u32,
}

/// Fallback announced by a zero-length DSS mapping: every later subflow
/// byte maps one-to-one from here on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfiniteMapping {
    pub ssn: u32,
    pub dsn: u64,
    pub frame: u32,
}

#[derive(Debug, Clone, Copy)]
struct SsnMapping {
    dsn: u64,
    frame: u32,
}

/// DSS mappings one subflow direction announced, keyed by relative SSN.
#[derive(Debug, Default)]
pub struct SubflowMappings {
    tree: IntervalTree<u32, SsnMapping>,
    pending: Vec<PendingSpan>,
    infinite: Option<InfiniteMapping>,
}

impl SubflowMappings {
    /// Adds a mapping of `len` bytes and returns pending bytes it resolved.
    pub fn insert(&mut self, ssn: u32, len: u32, dsn: u64, frame: u32) -> Result<Vec<AttributedSpan>, TrackError> {
        let range = Range::with_len(ssn, u64::from(len))?;
        self.tree.insert(range, SsnMapping { dsn, frame });
        Ok(self.resolve_pending())
    }

    /// First fallback wins; later ones are ignored.
    pub fn set_infinite(&mut self, ssn: u32, dsn: u64, frame: u32) -> Vec<AttributedSpan> {
        if self.infinite.is_some() {
            return Vec::new();
        }
        self.infinite = Some(InfiniteMapping { ssn, dsn, frame });
        self.resolve_pending()
    }

    pub fn infinite(&self) -> Option<InfiniteMapping> {
        self.infinite
    }

    /// Maps `len` bytes at `ssn`. Whatever no mapping covers yet is kept
    /// pending.
    pub fn attribute(&mut self, ssn: u32, len: u32, frame: u32) -> Vec<AttributedSpan> {
        let (found, gaps) = self.cover(ssn, len);
        for (start, gap_len) in gaps {
            trace!(ssn = start, len = gap_len, frame, "subflow bytes wait for a mapping");
            self.pending.push(PendingSpan {
                ssn: start,
                len: gap_len,
                frame,
            });
        }
        found
    }

    pub fn mapping_count(&self) -> usize {
        self.tree.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending.iter().map(|span| u64::from(span.len)).sum()
    }

    /// Hands out every span still waiting, leaving none behind.
    pub fn take_pending(&mut self) -> Vec<PendingSpan> {
        std::mem::take(&mut self.pending)
    }

    fn resolve_pending(&mut self) -> Vec<AttributedSpan> {
        let waiting = std::mem::take(&mut self.pending);
        let mut resolved = Vec::new();
        for span in waiting {
            let (found, gaps) = self.cover(span.ssn, span.len);
            resolved.extend(found);
            self.pending.extend(gaps.into_iter().map(|(ssn, len)| PendingSpan {
                ssn,
                len,
                frame: span.frame,
            }));
        }
        resolved
    }

    /// Splits `[ssn, ssn+len)` into mapped pieces and uncovered gaps.
    fn cover(&self, ssn: u32, len: u32) -> (Vec<AttributedSpan>, Vec<(u32, u32)>) {
        if len == 0 {
            return (Vec::new(), Vec::new());
        }
        let Ok(query) = Range::with_len(ssn, u64::from(len)) else {
            return (Vec::new(), vec![(ssn, len)]);
        };

        let end = u64::from(query.high()) + 1;
        let mut cursor = u64::from(ssn);
        let mut found = Vec::new();
        let mut gaps = Vec::new();

        for (range, mapping) in self.tree.find_all(&query) {
            let Some(part) = range.intersection(&query) else {
                continue;
            };
            let high = u64::from(part.high()) + 1;
            if high <= cursor {
                continue;
            }
            let low = u64::from(part.low()).max(cursor);
            if low > cursor {
                gaps.push((cursor, low - cursor));
            }
            found.push(AttributedSpan {
                ssn: low as u32,
                dsn: mapping.dsn.wrapping_add(low - u64::from(range.low())),
                len: (high - low) as u32,
                mapping_frame: mapping.frame,
            });
            cursor = high;
        }
        if cursor < end {
            gaps.push((cursor, end - cursor));
        }

        let Some(infinite) = self.infinite else {
            return (found, narrow(gaps));
        };

        let mut remaining = Vec::new();
        let from = u64::from(infinite.ssn);
        for (start, gap_len) in gaps {
            let stop = start + gap_len;
            if stop <= from {
                remaining.push((start, gap_len));
                continue;
            }
            let mapped_from = start.max(from);
            if mapped_from > start {
                remaining.push((start, mapped_from - start));
            }
            found.push(AttributedSpan {
                ssn: mapped_from as u32,
                dsn: infinite.dsn.wrapping_add(mapped_from - from),
                len: (stop - mapped_from) as u32,
                mapping_frame: infinite.frame,
            });
        }
        found.sort_by_key(|span| span.ssn);
        (found, narrow(remaining))
    }
}

fn narrow(gaps: Vec<(u64, u64)>) -> Vec<(u32, u32)> {
    gaps.into_iter()
        .map(|(start, len)| (start as u32, len as u32))
        .collect()
}
