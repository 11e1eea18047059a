use std::time::Duration;

use tracing::{debug, trace};

use crate::engine::{FramingConfig, TrackError};
use crate::state::Direction;

use super::pdu::{MultisegmentPdu, PduTable, REASSEMBLE_ENTIRE_SEGMENT};
use super::probe::{Pdu, PduConsumer, PduLength, PduLengthProbe};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssemblyState {
    #[default]
    Idle,
    /// Not enough bytes to learn the PDU length yet.
    WaitingForMore,
    /// Length known; collecting bytes up to `next_pdu_seq`.
    Accumulating { next_pdu_seq: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct PduOrigin {
    pub stream: u32,
    pub direction: Direction,
}

/// In-order payload of one segment. `seq` is relative.
#[derive(Debug, Clone, Copy)]
pub struct SegmentBytes<'a> {
    pub seq: u32,
    pub frame: u32,
    pub timestamp: Duration,
    pub data: &'a [u8],
}

/// Call-scoped collaborators of the assembler.
pub struct Framing<'a> {
    pub config: FramingConfig,
    pub probe: &'a dyn PduLengthProbe,
    pub consumer: &'a mut dyn PduConsumer,
}

/// Per-flow PDU reassembly state machine. Expects payload in sequence order.
#[derive(Debug, Default)]
pub struct PduAssembler {
    state: AssemblyState,
    buffer: Vec<u8>,
    start_seq: u32,
    first_frame: u32,
    until_close: bool,
    descriptors: PduTable,
}

impl PduAssembler {
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn descriptors(&self) -> &PduTable {
        &self.descriptors
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn reassembles_until_close(&self) -> bool {
        self.until_close
    }

    /// Makes the open PDU swallow the whole next segment.
    pub fn mark_entire_segment(&mut self) -> bool {
        match self.descriptors.covering_mut(self.start_seq) {
            Some(pdu) if self.state != AssemblyState::Idle => {
                pdu.flags |= REASSEMBLE_ENTIRE_SEGMENT;
                true
            }
            _ => false,
        }
    }

    /// Feeds one segment's payload and returns the number of PDUs delivered.
    pub fn feed(
        &mut self,
        bytes: SegmentBytes<'_>,
        origin: PduOrigin,
        framing: &mut Framing<'_>,
    ) -> Result<usize, TrackError> {
        if bytes.data.is_empty() {
            return Ok(0);
        }
        if !framing.config.desegment {
            return Ok(deliver_unbuffered(bytes, origin, framing));
        }

        if self.state == AssemblyState::Idle {
            self.start_seq = bytes.seq;
            self.first_frame = bytes.frame;
        }

        let mut entire = false;
        if let Some(pdu) = self.descriptors.covering_mut(bytes.seq) {
            pdu.last_frame = bytes.frame;
            pdu.last_frame_time = bytes.timestamp;
            entire = pdu.flags & REASSEMBLE_ENTIRE_SEGMENT != 0;
            pdu.flags &= !REASSEMBLE_ENTIRE_SEGMENT;
        }
        self.buffer.extend_from_slice(bytes.data);

        if self.until_close || framing.config.reassemble_until_close {
            self.until_close = true;
            self.state = AssemblyState::WaitingForMore;
            self.record(None, bytes.frame, bytes.timestamp, 0);
            trace!(
                stream = origin.stream,
                buffered = self.buffer.len(),
                "collecting until connection close"
            );
            return Ok(0);
        }

        if entire
            && self.state != AssemblyState::Idle
            && let Ok(buffered) = u32::try_from(self.buffer.len())
        {
            let next_pdu_seq = self.start_seq.wrapping_add(buffered);
            self.state = AssemblyState::Accumulating { next_pdu_seq };
        }

        self.drain_complete(bytes.frame, bytes.timestamp, origin, framing)
    }

    /// Delivers the collected bytes when the flow reassembles until close,
    /// otherwise drops any partial PDU. Returns (delivered, discarded).
    pub fn close(&mut self, last_frame: u32, origin: PduOrigin, consumer: &mut dyn PduConsumer) -> (usize, usize) {
        if self.until_close && !self.buffer.is_empty() {
            consumer.consume(Pdu {
                stream: origin.stream,
                direction: origin.direction,
                seq: self.start_seq,
                data: &self.buffer,
                first_frame: self.first_frame,
                last_frame,
                complete: true,
            });
            debug!(
                stream = origin.stream,
                len = self.buffer.len(),
                "delivered PDU at connection close"
            );
            self.buffer.clear();
            self.descriptors.clear();
            self.state = AssemblyState::Idle;
            return (1, 0);
        }
        (0, self.discard())
    }

    /// Drops all partial state. Returns the number of descriptors dropped.
    pub fn discard(&mut self) -> usize {
        self.buffer.clear();
        self.state = AssemblyState::Idle;
        self.descriptors.clear()
    }

    fn drain_complete(
        &mut self,
        frame: u32,
        timestamp: Duration,
        origin: PduOrigin,
        framing: &mut Framing<'_>,
    ) -> Result<usize, TrackError> {
        let mut delivered = 0;
        loop {
            if self.buffer.is_empty() {
                self.state = AssemblyState::Idle;
                break;
            }

            let declared = match self.state {
                AssemblyState::Accumulating { next_pdu_seq } => next_pdu_seq.wrapping_sub(self.start_seq),
                AssemblyState::Idle | AssemblyState::WaitingForMore => {
                    if self.buffer.len() < framing.config.fixed_len {
                        self.wait(frame, timestamp, 0);
                        break;
                    }
                    match framing.probe.pdu_length(&self.buffer) {
                        PduLength::Known(len) => match u32::try_from(len) {
                            // sequence space is 32 bits, longer PDUs cannot be framed
                            Ok(declared) if declared > 0 && len >= framing.config.fixed_len => declared,
                            _ => {
                                self.discard();
                                return Err(TrackError::BadPduLength {
                                    declared: len,
                                    min: framing.config.fixed_len,
                                });
                            }
                        },
                        PduLength::NeedMore => {
                            self.wait(frame, timestamp, 0);
                            break;
                        }
                        PduLength::OneMoreSegment => {
                            self.wait(frame, timestamp, REASSEMBLE_ENTIRE_SEGMENT);
                            break;
                        }
                        PduLength::UntilClose => {
                            self.until_close = true;
                            self.wait(frame, timestamp, 0);
                            break;
                        }
                    }
                }
            };

            let declared_len = declared as usize;
            if self.buffer.len() < declared_len {
                let next_pdu_seq = self.start_seq.wrapping_add(declared);
                self.state = AssemblyState::Accumulating { next_pdu_seq };
                self.record(Some(next_pdu_seq), frame, timestamp, 0);
                break;
            }

            let rest = self.buffer.split_off(declared_len);
            framing.consumer.consume(Pdu {
                stream: origin.stream,
                direction: origin.direction,
                seq: self.start_seq,
                data: &self.buffer,
                first_frame: self.first_frame,
                last_frame: frame,
                complete: true,
            });
            debug!(
                stream = origin.stream,
                seq = self.start_seq,
                len = declared,
                first_frame = self.first_frame,
                last_frame = frame,
                "PDU complete"
            );

            self.descriptors.remove(self.start_seq);
            self.buffer = rest;
            self.start_seq = self.start_seq.wrapping_add(declared);
            self.first_frame = frame;
            self.state = AssemblyState::Idle;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn wait(&mut self, frame: u32, timestamp: Duration, flags: u32) {
        self.state = AssemblyState::WaitingForMore;
        self.record(None, frame, timestamp, flags);
    }

    fn record(&mut self, nxtpdu: Option<u32>, frame: u32, timestamp: Duration, flags: u32) {
        self.descriptors.upsert(MultisegmentPdu {
            seq: self.start_seq,
            nxtpdu,
            first_frame: self.first_frame,
            last_frame: frame,
            last_frame_time: timestamp,
            flags,
        });
    }
}

/// Without desegmentation every segment stands alone: whole PDUs inside it
/// are delivered complete, a trailing piece is delivered as a fragment.
fn deliver_unbuffered(bytes: SegmentBytes<'_>, origin: PduOrigin, framing: &mut Framing<'_>) -> usize {
    let mut offset = 0;
    let mut delivered = 0;
    while offset < bytes.data.len() {
        let rest = &bytes.data[offset..];
        let known = if rest.len() < framing.config.fixed_len {
            None
        } else {
            match framing.probe.pdu_length(rest) {
                PduLength::Known(len) if len > 0 => Some(len),
                _ => None,
            }
        };
        let (take, complete) = match known {
            Some(len) if len <= rest.len() => (len, true),
            _ => (rest.len(), false),
        };

        framing.consumer.consume(Pdu {
            stream: origin.stream,
            direction: origin.direction,
            seq: bytes.seq.wrapping_add(offset as u32),
            data: &rest[..take],
            first_frame: bytes.frame,
            last_frame: bytes.frame,
            complete,
        });
        offset += take;
        delivered += 1;
    }
    delivered
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AssemblyState, Framing, PduAssembler, PduOrigin, SegmentBytes};
    use crate::engine::{FramingConfig, TrackError};
    use crate::reassembly::{LengthPrefixProbe, Pdu, PduLength, PrefixWidth};
    use crate::state::Direction;

    const ORIGIN: PduOrigin = PduOrigin {
        stream: 0,
        direction: Direction::Forward,
    };

    #[derive(Debug, PartialEq)]
    struct Seen {
        seq: u32,
        data: Vec<u8>,
        first_frame: u32,
        last_frame: u32,
        complete: bool,
    }

    fn seg(seq: u32, frame: u32, data: &[u8]) -> SegmentBytes<'_> {
        SegmentBytes {
            seq,
            frame,
            timestamp: Duration::from_millis(frame as u64),
            data,
        }
    }

    fn run(
        assembler: &mut PduAssembler,
        config: FramingConfig,
        probe: &dyn crate::reassembly::PduLengthProbe,
        segments: &[SegmentBytes<'_>],
    ) -> (Vec<Seen>, Vec<Result<usize, TrackError>>) {
        let mut seen = Vec::new();
        let mut results = Vec::new();
        let mut consumer = |pdu: Pdu<'_>| {
            seen.push(Seen {
                seq: pdu.seq,
                data: pdu.data.to_vec(),
                first_frame: pdu.first_frame,
                last_frame: pdu.last_frame,
                complete: pdu.complete,
            })
        };
        let mut framing = Framing {
            config,
            probe,
            consumer: &mut consumer,
        };
        for bytes in segments {
            results.push(assembler.feed(*bytes, ORIGIN, &mut framing));
        }
        (seen, results)
    }

    fn declares(len: usize) -> impl Fn(&[u8]) -> PduLength {
        move |_: &[u8]| PduLength::Known(len)
    }

    #[test]
    fn pdu_spanning_three_segments_is_delivered_once() {
        let mut assembler = PduAssembler::default();
        let payload: Vec<u8> = (0..150u8).collect();
        let segments = [
            seg(100, 1, &payload[..50]),
            seg(150, 2, &payload[50..100]),
            seg(200, 3, &payload[100..]),
        ];
        let probe = declares(150);

        let (seen, results) = run(&mut assembler, FramingConfig::default(), &probe, &segments);
        assert_eq!(results, vec![Ok(0), Ok(0), Ok(1)]);
        assert_eq!(
            seen,
            vec![Seen {
                seq: 100,
                data: payload.clone(),
                first_frame: 1,
                last_frame: 3,
                complete: true,
            }]
        );
        assert_eq!(assembler.state(), AssemblyState::Idle);
        assert!(assembler.descriptors().is_empty());
    }

    #[test]
    fn descriptor_tracks_open_pdu() {
        let mut assembler = PduAssembler::default();
        let probe = declares(150);
        let (seen, _) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(100, 1, &[0; 50]), seg(150, 2, &[0; 50])],
        );
        assert!(seen.is_empty());
        assert_eq!(assembler.state(), AssemblyState::Accumulating { next_pdu_seq: 250 });

        let pdu = assembler.descriptors().get(100).expect("descriptor for open PDU");
        assert_eq!(pdu.nxtpdu, Some(250));
        assert_eq!((pdu.first_frame, pdu.last_frame), (1, 2));
    }

    #[test]
    fn waits_for_header_then_splits_back_to_back_pdus() {
        let probe = LengthPrefixProbe {
            offset: 0,
            width: PrefixWidth::U16,
            header_len: 2,
        };
        let config = FramingConfig {
            fixed_len: probe.fixed_len(),
            ..FramingConfig::default()
        };
        // two PDUs: [0,3,a,b,c] and [0,1,z]; the first header is split
        let mut assembler = PduAssembler::default();
        let (seen, _) = run(
            &mut assembler,
            config,
            &probe,
            &[seg(1, 1, &[0]), seg(2, 2, &[3, b'a', b'b', b'c', 0, 1, b'z'])],
        );
        let bodies: Vec<&[u8]> = seen.iter().map(|s| s.data.as_slice()).collect();
        assert_eq!(bodies, vec![&[0, 3, b'a', b'b', b'c'][..], &[0, 1, b'z'][..]]);
        assert_eq!(seen[1].seq, 6);
        assert_eq!(seen[0].first_frame, 1);
        assert_eq!(seen[1].first_frame, 2);
    }

    #[test]
    fn teardown_discards_partial_pdu() {
        let mut assembler = PduAssembler::default();
        let probe = declares(150);
        let (seen, _) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(100, 1, &[1; 50]), seg(150, 2, &[2; 50])],
        );
        assert!(seen.is_empty());

        let mut late = Vec::new();
        let mut consumer = |pdu: Pdu<'_>| late.push(pdu.data.len());
        assert_eq!(assembler.close(3, ORIGIN, &mut consumer), (0, 1));
        assert!(late.is_empty());
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn desegmentation_disabled_delivers_fragments() {
        let mut assembler = PduAssembler::default();
        let probe = declares(4);
        let config = FramingConfig {
            desegment: false,
            ..FramingConfig::default()
        };
        let (seen, results) = run(&mut assembler, config, &probe, &[seg(1, 1, b"abcdef")]);
        assert_eq!(results, vec![Ok(2)]);
        assert_eq!(seen[0].data, b"abcd");
        assert!(seen[0].complete);
        assert_eq!(seen[1].data, b"ef");
        assert!(!seen[1].complete);
        assert!(assembler.descriptors().is_empty());
    }

    #[test]
    fn until_close_collects_everything_and_delivers_at_close() {
        let mut assembler = PduAssembler::default();
        let probe = |_: &[u8]| PduLength::UntilClose;
        let (seen, _) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(1, 1, b"hello "), seg(7, 2, b"world")],
        );
        assert!(seen.is_empty());
        assert!(assembler.reassembles_until_close());

        let mut out = Vec::new();
        let mut consumer = |pdu: Pdu<'_>| out.push((pdu.data.to_vec(), pdu.first_frame, pdu.last_frame));
        assert_eq!(assembler.close(3, ORIGIN, &mut consumer), (1, 0));
        assert_eq!(out, vec![(b"hello world".to_vec(), 1, 3)]);
    }

    #[test]
    fn one_more_segment_takes_the_whole_next_segment() {
        let mut assembler = PduAssembler::default();
        let probe = |header: &[u8]| {
            if header.len() < 4 {
                PduLength::OneMoreSegment
            } else {
                PduLength::Known(6)
            }
        };
        let (seen, results) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(1, 1, b"ab"), seg(3, 2, b"cdefgh")],
        );
        assert_eq!(results, vec![Ok(0), Ok(1)]);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data, b"abcdefgh");
        assert_eq!(assembler.state(), AssemblyState::Idle);
    }

    #[test]
    fn entire_segment_flag_extends_open_pdu() {
        let mut assembler = PduAssembler::default();
        let probe = |header: &[u8]| {
            if header.len() < 4 {
                PduLength::NeedMore
            } else {
                PduLength::Known(6)
            }
        };
        let (seen, _) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(1, 1, b"ab"), seg(3, 2, b"cdefgh")],
        );
        // header completes on the second segment and declares 6 bytes
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data, b"abcdef");
        assert_eq!(assembler.state(), AssemblyState::WaitingForMore);

        assert!(assembler.mark_entire_segment());
        let (seen, _) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(9, 3, b"ijklmn")],
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data, b"ghijklmn");
        assert_eq!(assembler.state(), AssemblyState::Idle);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn declared_length_beyond_sequence_space_is_rejected() {
        let mut assembler = PduAssembler::default();
        let probe = declares((1usize << 32) + 5);
        let (seen, results) = run(
            &mut assembler,
            FramingConfig::default(),
            &probe,
            &[seg(1, 1, b"abc"), seg(4, 2, b"defgh")],
        );
        assert!(seen.is_empty());
        let rejected = Err(TrackError::BadPduLength {
            declared: (1usize << 32) + 5,
            min: 0,
        });
        assert_eq!(results, vec![rejected.clone(), rejected]);
        assert_eq!(assembler.state(), AssemblyState::Idle);
        assert!(assembler.descriptors().is_empty());
    }

    #[test]
    fn zero_length_declaration_is_rejected() {
        let mut assembler = PduAssembler::default();
        let probe = declares(0);
        let (seen, results) = run(&mut assembler, FramingConfig::default(), &probe, &[seg(1, 1, b"x")]);
        assert!(seen.is_empty());
        assert_eq!(results, vec![Err(TrackError::BadPduLength { declared: 0, min: 0 })]);
        assert_eq!(assembler.state(), AssemblyState::Idle);
    }
}
