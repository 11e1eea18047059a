use std::fmt;

use crate::engine::TrackError;

/// Endpoint type of an interval: an unsigned counter that is totally ordered
/// within one reassembly window.
pub trait Endpoint: Copy + Ord + fmt::Debug + Into<u64> {
    /// Last point of a span of `len` points starting at `self`, if it fits.
    fn span_end(self, len: u64) -> Option<Self>;
}

impl Endpoint for u32 {
    fn span_end(self, len: u64) -> Option<Self> {
        let delta = u32::try_from(len.checked_sub(1)?).ok()?;
        self.checked_add(delta)
    }
}

impl Endpoint for u64 {
    fn span_end(self, len: u64) -> Option<Self> {
        self.checked_add(len.checked_sub(1)?)
    }
}

/// Closed interval `[low, high]`. A single point has `low == high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range<K> {
    low: K,
    high: K,
}

impl<K: Endpoint> Range<K> {
    pub fn new(low: K, high: K) -> Result<Self, TrackError> {
        if low > high {
            return Err(TrackError::InvertedRange {
                low: low.into(),
                high: high.into(),
            });
        }
        Ok(Self { low, high })
    }

    /// Range covering `len` points starting at `start`.
    pub fn with_len(start: K, len: u64) -> Result<Self, TrackError> {
        let high = start.span_end(len).ok_or(TrackError::MappingOverflow {
            start: start.into(),
            length: len,
        })?;
        Ok(Self { low: start, high })
    }

    pub fn point(at: K) -> Self {
        Self { low: at, high: at }
    }

    pub fn low(&self) -> K {
        self.low
    }

    pub fn high(&self) -> K {
        self.high
    }

    pub fn overlaps(&self, other: &Range<K>) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    pub fn contains(&self, point: K) -> bool {
        self.low <= point && point <= self.high
    }

    /// Overlapping part of two ranges, if any.
    pub fn intersection(&self, other: &Range<K>) -> Option<Range<K>> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            low: self.low.max(other.low),
            high: self.high.min(other.high),
        })
    }
}

impl<K: fmt::Display> fmt::Display for Range<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}
