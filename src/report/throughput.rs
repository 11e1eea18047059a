use std::collections::VecDeque;
use std::time::Duration;

use crate::state::{Direction, SegmentRecord, SeqNum};

/// One sample of a rate series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub frame: u32,
    pub time: Duration,
    pub bits_per_sec: f64,
}

/// Moving average of the payload sent in `direction`, over the trailing
/// `window`. One point per data segment.
pub fn throughput(segments: &[SegmentRecord], direction: Direction, window: Duration) -> Vec<RatePoint> {
    let samples = segments
        .iter()
        .filter(|record| record.direction == direction && record.len > 0)
        .map(|record| (record.frame, record.timestamp, u64::from(record.len)));
    moving_rate(samples, window)
}

/// Moving average of the data the receiver acknowledged for `direction`,
/// measured from the advancing ACKs flowing the other way.
pub fn goodput(segments: &[SegmentRecord], direction: Direction, window: Duration) -> Vec<RatePoint> {
    let mut highest: Option<u32> = None;
    let samples = segments
        .iter()
        .filter(|record| record.direction == direction.opposite())
        .filter_map(|record| {
            let ack = record.ack?;
            let gained = match highest {
                Some(prev) if ack.after(prev) => ack.wrapping_sub(prev),
                Some(_) => return None,
                None => 0,
            };
            highest = Some(ack);
            (gained > 0).then_some((record.frame, record.timestamp, u64::from(gained)))
        })
        .collect::<Vec<_>>();
    moving_rate(samples, window)
}

fn moving_rate(samples: impl IntoIterator<Item = (u32, Duration, u64)>, window: Duration) -> Vec<RatePoint> {
    let span = window.as_secs_f64();
    if span <= 0.0 {
        return Vec::new();
    }

    let mut in_window: VecDeque<(Duration, u64)> = VecDeque::new();
    let mut bytes = 0u64;
    let mut points = Vec::new();

    for (frame, time, len) in samples {
        in_window.push_back((time, len));
        bytes += len;
        while let Some(&(oldest, old_len)) = in_window.front() {
            if time.saturating_sub(oldest) < window {
                break;
            }
            in_window.pop_front();
            bytes -= old_len;
        }
        points.push(RatePoint {
            frame,
            time,
            bits_per_sec: (bytes * 8) as f64 / span,
        });
    }
    points
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{goodput, throughput};
    use crate::analysis::{SegmentAnalysis, SegmentClass};
    use crate::packet::SackBlocks;
    use crate::state::{Direction, SegmentRecord};

    fn record(frame: u32, ms: u64, direction: Direction, len: u32, ack: Option<u32>) -> SegmentRecord {
        SegmentRecord {
            frame,
            direction,
            timestamp: Duration::from_millis(ms),
            seq: 1,
            next_seq: 1 + len,
            ack,
            len,
            window: 1000,
            tcp_flags: 0x10,
            sack: SackBlocks::default(),
            analysis: SegmentAnalysis::empty(),
            class: SegmentClass::InOrder,
        }
    }

    #[test]
    fn throughput_averages_over_trailing_window() {
        let segments = [
            record(1, 0, Direction::Forward, 1000, None),
            record(2, 500, Direction::Forward, 1000, None),
            record(3, 600, Direction::Reverse, 0, Some(2001)),
            record(4, 1500, Direction::Forward, 1000, None),
        ];
        let points = throughput(&segments, Direction::Forward, Duration::from_secs(1));

        let rates: Vec<f64> = points.iter().map(|p| p.bits_per_sec).collect();
        assert_eq!(rates, vec![8_000.0, 16_000.0, 8_000.0]);
        assert_eq!(points[2].frame, 4);
    }

    #[test]
    fn goodput_counts_only_advancing_acks() {
        let segments = [
            record(1, 0, Direction::Reverse, 0, Some(1)),
            record(2, 100, Direction::Reverse, 0, Some(1001)),
            record(3, 200, Direction::Reverse, 0, Some(1001)),
            record(4, 300, Direction::Reverse, 0, Some(3001)),
        ];
        let points = goodput(&segments, Direction::Forward, Duration::from_secs(1));

        let rates: Vec<f64> = points.iter().map(|p| p.bits_per_sec).collect();
        assert_eq!(rates, vec![8_000.0, 24_000.0]);
    }
}
