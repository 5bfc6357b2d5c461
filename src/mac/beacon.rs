//! Beacon negotiation: message formats and per-station grant/request policy.
//!
//! Wire layout (big-endian, fixed width):
//!
//! ```text
//! kind u8 | source [6] | destination [6] | body
//! Request   body: duration u32 (µs) | count u8 | count × address [6]
//! Grant     body: duration u32 (µs) | delay u32 (µs)
//! KeepAlive body: empty
//! ```
//!
//! A grant's destination is the reservation target: the requester for a
//! unicast grant, a group address for a self-declared broadcast reservation.
//! The grantor is always the receiver of a unicast reservation.

use embassy_time::{Duration, Instant};

use super::agreement_book::{Agreement, AgreementBook, Request};
use super::queue::OutboundQueue;
use crate::common::types::MacAddress;

const KIND_REQUEST: u8 = 1;
const KIND_GRANT: u8 = 2;
const KIND_KEEP_ALIVE: u8 = 3;

const HEADER_LEN: usize = 1 + 6 + 6;
const GRANT_BODY_LEN: usize = 4 + 4;
const ADDRESS_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconMessage {
    /// Ask each listed station for a window of `duration`.
    Request { duration: Duration, targets: Vec<MacAddress> },
    /// Reservation of `duration` starting `delay` after the beacon ends.
    Grant { duration: Duration, delay: Duration },
    KeepAlive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFrame {
    pub source: MacAddress,
    pub destination: MacAddress,
    pub message: BeaconMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconDecodeError {
    Truncated { needed: usize, available: usize },
    UnknownKind(u8),
    TrailingBytes(usize),
}

impl std::fmt::Display for BeaconDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeaconDecodeError::Truncated { needed, available } => {
                write!(f, "Beacon truncated: needed {} bytes, {} available", needed, available)
            }
            BeaconDecodeError::UnknownKind(kind) => write!(f, "Unknown beacon kind {}", kind),
            BeaconDecodeError::TrailingBytes(n) => write!(f, "{} trailing bytes after beacon body", n),
        }
    }
}

impl std::error::Error for BeaconDecodeError {}

/// # Panics
///
/// If `d` does not fit the 32-bit microsecond wire field.
fn micros_u32(d: Duration) -> u32 {
    let micros = d.as_micros();
    assert!(micros <= u32::MAX as u64, "beacon field of {}us exceeds the 32-bit wire range", micros);
    micros as u32
}

fn read_address(bytes: &[u8]) -> MacAddress {
    let mut octets = [0u8; ADDRESS_LEN];
    octets.copy_from_slice(&bytes[..ADDRESS_LEN]);
    MacAddress(octets)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn require(bytes: &[u8], needed: usize) -> Result<(), BeaconDecodeError> {
    if bytes.len() < needed {
        return Err(BeaconDecodeError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

impl BeaconFrame {
    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + match &self.message {
                BeaconMessage::Request { targets, .. } => 4 + 1 + targets.len() * ADDRESS_LEN,
                BeaconMessage::Grant { .. } => GRANT_BODY_LEN,
                BeaconMessage::KeepAlive => 0,
            }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        let kind = match self.message {
            BeaconMessage::Request { .. } => KIND_REQUEST,
            BeaconMessage::Grant { .. } => KIND_GRANT,
            BeaconMessage::KeepAlive => KIND_KEEP_ALIVE,
        };
        out.push(kind);
        out.extend_from_slice(&self.source.0);
        out.extend_from_slice(&self.destination.0);
        match &self.message {
            BeaconMessage::Request { duration, targets } => {
                // Callers bound the list; anything past 255 entries is not representable.
                let count = targets.len().min(u8::MAX as usize);
                out.extend_from_slice(&micros_u32(*duration).to_be_bytes());
                out.push(count as u8);
                for target in &targets[..count] {
                    out.extend_from_slice(&target.0);
                }
            }
            BeaconMessage::Grant { duration, delay } => {
                out.extend_from_slice(&micros_u32(*duration).to_be_bytes());
                out.extend_from_slice(&micros_u32(*delay).to_be_bytes());
            }
            BeaconMessage::KeepAlive => {}
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BeaconDecodeError> {
        require(bytes, HEADER_LEN)?;
        let kind = bytes[0];
        let source = read_address(&bytes[1..]);
        let destination = read_address(&bytes[7..]);
        let body = &bytes[HEADER_LEN..];

        let (message, used) = match kind {
            KIND_REQUEST => {
                require(body, 5)?;
                let duration = Duration::from_micros(read_u32(body) as u64);
                let count = body[4] as usize;
                let used = 5 + count * ADDRESS_LEN;
                require(body, used)?;
                let targets = body[5..used].chunks_exact(ADDRESS_LEN).map(read_address).collect();
                (BeaconMessage::Request { duration, targets }, used)
            }
            KIND_GRANT => {
                require(body, GRANT_BODY_LEN)?;
                let duration = Duration::from_micros(read_u32(body) as u64);
                let delay = Duration::from_micros(read_u32(&body[4..]) as u64);
                (BeaconMessage::Grant { duration, delay }, GRANT_BODY_LEN)
            }
            KIND_KEEP_ALIVE => (BeaconMessage::KeepAlive, 0),
            other => return Err(BeaconDecodeError::UnknownKind(other)),
        };

        if body.len() > used {
            return Err(BeaconDecodeError::TrailingBytes(body.len() - used));
        }
        Ok(Self {
            source,
            destination,
            message,
        })
    }
}

/// What a received beacon did to the local book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconEffect {
    Ignored,
    RequestQueued,
    AgreementRecorded(Agreement),
    AgreementRejected,
}

/// Per-station beacon policy.
#[derive(Debug, Clone)]
pub struct BeaconNegotiator {
    address: MacAddress,
    window_duration: Duration,
    max_request_targets: usize,
    keep_alive: bool,
}

impl BeaconNegotiator {
    pub fn new(address: MacAddress, window_duration: Duration, max_request_targets: usize, keep_alive: bool) -> Self {
        Self {
            address,
            window_duration,
            max_request_targets,
            keep_alive,
        }
    }

    /// Pick the beacon to send at this opportunity.
    ///
    /// Received requests are served before new ones are originated, so a
    /// station with its own backlog cannot starve its neighbours' asks.
    /// Grants are recorded in `book` before the beacon leaves.
    ///
    /// `airtime` maps an encoded beacon length to its time on air.
    pub fn next_beacon(&self, now: Instant, book: &mut AgreementBook, queue: &OutboundQueue, airtime: &dyn Fn(usize) -> Duration) -> Option<BeaconFrame> {
        book.sweep_expired(now);
        let earliest_start = now + airtime(HEADER_LEN + GRANT_BODY_LEN);

        if let Some(request) = book.pop_oldest_request() {
            let start = book.new_agreement(now, request.initiator, self.address, earliest_start, self.window_duration);
            log::debug!(
                "[{}] Granting {} a window at {}us (+{}us)",
                self.address,
                request.initiator,
                start.as_micros(),
                (start - earliest_start).as_micros()
            );
            return Some(BeaconFrame {
                source: self.address,
                destination: request.initiator,
                message: BeaconMessage::Grant {
                    duration: self.window_duration,
                    delay: start - earliest_start,
                },
            });
        }

        if let Some(head) = queue.head_destination() {
            if head.is_group() && !book.find_agreement(self.address, head) {
                let start = book.new_agreement(now, self.address, head, earliest_start, self.window_duration);
                log::debug!("[{}] Announcing broadcast window to {} at {}us", self.address, head, start.as_micros());
                return Some(BeaconFrame {
                    source: self.address,
                    destination: head,
                    message: BeaconMessage::Grant {
                        duration: self.window_duration,
                        delay: start - earliest_start,
                    },
                });
            }

            let targets: Vec<MacAddress> = queue
                .destinations()
                .into_iter()
                .filter(|d| !d.is_group() && !book.find_agreement(self.address, *d))
                .take(self.max_request_targets)
                .collect();
            if !targets.is_empty() {
                log::debug!("[{}] Requesting windows from {:?}", self.address, targets);
                return Some(BeaconFrame {
                    source: self.address,
                    destination: MacAddress::BROADCAST,
                    message: BeaconMessage::Request {
                        duration: self.window_duration,
                        targets,
                    },
                });
            }
        }

        if self.keep_alive {
            return Some(BeaconFrame {
                source: self.address,
                destination: MacAddress::BROADCAST,
                message: BeaconMessage::KeepAlive,
            });
        }
        None
    }

    /// Apply a beacon whose reception completed at `now`.
    pub fn on_beacon(&self, now: Instant, frame: &BeaconFrame, book: &mut AgreementBook) -> BeaconEffect {
        if frame.source == self.address {
            return BeaconEffect::Ignored;
        }
        match &frame.message {
            BeaconMessage::Request { duration, targets } => {
                if !targets.contains(&self.address) {
                    return BeaconEffect::Ignored;
                }
                let queued = book.add_request(Request {
                    initiator: frame.source,
                    target: self.address,
                    duration: *duration,
                    received_at: now,
                });
                if queued { BeaconEffect::RequestQueued } else { BeaconEffect::Ignored }
            }
            BeaconMessage::Grant { duration, delay } => {
                let (transmitter, receiver) = if frame.destination.is_group() {
                    (frame.source, frame.destination)
                } else {
                    (frame.destination, frame.source)
                };
                let agreement = Agreement {
                    transmitter,
                    receiver,
                    start: now + *delay,
                    duration: *duration,
                };
                book.sweep_expired(now);
                if book.add_agreement(agreement) {
                    BeaconEffect::AgreementRecorded(agreement)
                } else {
                    BeaconEffect::AgreementRejected
                }
            }
            BeaconMessage::KeepAlive => BeaconEffect::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::queue::QueuedFrame;

    fn station(id: u32) -> MacAddress {
        MacAddress::from_station_id(id)
    }

    fn fixed_airtime(_len: usize) -> Duration {
        Duration::from_micros(100)
    }

    fn negotiator(id: u32) -> BeaconNegotiator {
        BeaconNegotiator::new(station(id), Duration::from_millis(5), 2, false)
    }

    fn queue_with(dests: &[MacAddress]) -> OutboundQueue {
        let mut q = OutboundQueue::new(16);
        for d in dests {
            q.enqueue(QueuedFrame {
                destination: *d,
                payload: vec![0; 100],
            });
        }
        q
    }

    #[test]
    fn grant_frame_encodes_to_fixed_layout() {
        let frame = BeaconFrame {
            source: station(1),
            destination: station(2),
            message: BeaconMessage::Grant {
                duration: Duration::from_micros(5000),
                delay: Duration::from_micros(258),
            },
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 21);
        assert_eq!(bytes[0], KIND_GRANT);
        assert_eq!(&bytes[13..17], &5000u32.to_be_bytes());
        assert_eq!(&bytes[17..21], &[0, 0, 1, 2]);
        assert_eq!(BeaconFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    #[should_panic(expected = "exceeds the 32-bit wire range")]
    fn grant_delay_beyond_wire_range_is_refused() {
        let frame = BeaconFrame {
            source: station(1),
            destination: station(2),
            message: BeaconMessage::Grant {
                duration: Duration::from_micros(5000),
                delay: Duration::from_micros(u32::MAX as u64 + 1),
            },
        };
        frame.encode();
    }

    #[test]
    fn request_frame_carries_target_list() {
        let frame = BeaconFrame {
            source: station(1),
            destination: MacAddress::BROADCAST,
            message: BeaconMessage::Request {
                duration: Duration::from_millis(5),
                targets: vec![station(2), station(3)],
            },
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), frame.encoded_len());
        assert_eq!(bytes[17], 2);
        assert_eq!(BeaconFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(BeaconFrame::decode(&[KIND_GRANT, 0, 0]), Err(BeaconDecodeError::Truncated { .. })));

        let mut bytes = BeaconFrame {
            source: station(1),
            destination: station(2),
            message: BeaconMessage::KeepAlive,
        }
        .encode();
        bytes[0] = 9;
        assert_eq!(BeaconFrame::decode(&bytes), Err(BeaconDecodeError::UnknownKind(9)));

        bytes[0] = KIND_KEEP_ALIVE;
        bytes.push(0);
        assert_eq!(BeaconFrame::decode(&bytes), Err(BeaconDecodeError::TrailingBytes(1)));

        // Count claims three addresses, only one present.
        let mut request = vec![KIND_REQUEST];
        request.extend_from_slice(&[0u8; 12]);
        request.extend_from_slice(&5000u32.to_be_bytes());
        request.push(3);
        request.extend_from_slice(&[0u8; 6]);
        assert!(matches!(BeaconFrame::decode(&request), Err(BeaconDecodeError::Truncated { .. })));
    }

    #[test]
    fn pending_request_is_granted_before_own_traffic() {
        let n = negotiator(1);
        let now = Instant::from_millis(10);
        let mut book = AgreementBook::new();
        book.add_request(Request {
            initiator: station(7),
            target: station(1),
            duration: Duration::from_millis(5),
            received_at: now,
        });
        let queue = queue_with(&[station(2)]);

        let beacon = n.next_beacon(now, &mut book, &queue, &fixed_airtime).unwrap();
        assert_eq!(beacon.destination, station(7));
        assert_eq!(
            beacon.message,
            BeaconMessage::Grant {
                duration: Duration::from_millis(5),
                delay: Duration::from_micros(0),
            }
        );
        assert!(book.find_agreement(station(7), station(1)));
        assert!(!book.has_pending_request());
    }

    #[test]
    fn grant_delay_reflects_existing_reservations() {
        let n = negotiator(1);
        let now = Instant::from_millis(0);
        let mut book = AgreementBook::new();
        book.new_agreement(now, station(5), station(6), Instant::from_micros(100), Duration::from_millis(2));
        book.add_request(Request {
            initiator: station(7),
            target: station(1),
            duration: Duration::from_millis(5),
            received_at: now,
        });
        let beacon = n.next_beacon(now, &mut book, &queue_with(&[]), &fixed_airtime).unwrap();
        assert_eq!(
            beacon.message,
            BeaconMessage::Grant {
                duration: Duration::from_millis(5),
                delay: Duration::from_millis(2),
            }
        );
    }

    #[test]
    fn group_head_produces_self_grant() {
        let n = negotiator(1);
        let now = Instant::from_millis(0);
        let mut book = AgreementBook::new();
        let queue = queue_with(&[MacAddress::BROADCAST, station(2)]);

        let beacon = n.next_beacon(now, &mut book, &queue, &fixed_airtime).unwrap();
        assert_eq!(beacon.destination, MacAddress::BROADCAST);
        assert!(matches!(beacon.message, BeaconMessage::Grant { .. }));
        assert!(book.find_agreement(station(1), MacAddress::BROADCAST));

        // Reservation held: the next opportunity asks for the unicast peer instead.
        let beacon = n.next_beacon(now, &mut book, &queue, &fixed_airtime).unwrap();
        assert_eq!(
            beacon.message,
            BeaconMessage::Request {
                duration: Duration::from_millis(5),
                targets: vec![station(2)],
            }
        );
    }

    #[test]
    fn request_lists_only_uncovered_destinations_up_to_bound() {
        let n = negotiator(1);
        let now = Instant::from_millis(0);
        let mut book = AgreementBook::new();
        book.new_agreement(now, station(1), station(2), Instant::from_millis(1), Duration::from_millis(5));
        let queue = queue_with(&[station(2), station(3), station(4), station(5)]);

        let beacon = n.next_beacon(now, &mut book, &queue, &fixed_airtime).unwrap();
        assert_eq!(
            beacon.message,
            BeaconMessage::Request {
                duration: Duration::from_millis(5),
                targets: vec![station(3), station(4)],
            }
        );
    }

    #[test]
    fn nothing_to_say_yields_none_or_keep_alive() {
        let now = Instant::from_millis(0);
        let mut book = AgreementBook::new();
        let queue = queue_with(&[]);
        assert!(negotiator(1).next_beacon(now, &mut book, &queue, &fixed_airtime).is_none());

        let chatty = BeaconNegotiator::new(station(1), Duration::from_millis(5), 2, true);
        let beacon = chatty.next_beacon(now, &mut book, &queue, &fixed_airtime).unwrap();
        assert_eq!(beacon.message, BeaconMessage::KeepAlive);
    }

    #[test]
    fn request_naming_us_is_queued_once() {
        let n = negotiator(2);
        let mut book = AgreementBook::new();
        let frame = BeaconFrame {
            source: station(1),
            destination: MacAddress::BROADCAST,
            message: BeaconMessage::Request {
                duration: Duration::from_millis(5),
                targets: vec![station(3), station(2)],
            },
        };
        let now = Instant::from_millis(1);
        assert_eq!(n.on_beacon(now, &frame, &mut book), BeaconEffect::RequestQueued);
        assert_eq!(n.on_beacon(now, &frame, &mut book), BeaconEffect::Ignored);
        assert_eq!(negotiator(9).on_beacon(now, &frame, &mut AgreementBook::new()), BeaconEffect::Ignored);
    }

    #[test]
    fn grantor_and_requester_converge_on_same_interval() {
        let grantor = negotiator(2);
        let requester = negotiator(1);
        let mut grantor_book = AgreementBook::new();
        let mut requester_book = AgreementBook::new();
        let tx_start = Instant::from_millis(20);

        grantor_book.add_request(Request {
            initiator: station(1),
            target: station(2),
            duration: Duration::from_millis(5),
            received_at: tx_start,
        });
        let beacon = grantor.next_beacon(tx_start, &mut grantor_book, &queue_with(&[]), &fixed_airtime).unwrap();
        let wire = BeaconFrame::decode(&beacon.encode()).unwrap();

        let rx_end = tx_start + fixed_airtime(wire.encoded_len());
        let effect = requester.on_beacon(rx_end, &wire, &mut requester_book);
        let BeaconEffect::AgreementRecorded(recorded) = effect else {
            panic!("expected the grant to be recorded, got {:?}", effect);
        };
        assert_eq!(recorded.transmitter, station(1));
        assert_eq!(recorded.receiver, station(2));
        assert_eq!(grantor_book.agreements(), &[recorded]);
    }

    #[test]
    fn broadcast_grant_is_recorded_with_sender_as_transmitter() {
        let n = negotiator(3);
        let mut book = AgreementBook::new();
        let frame = BeaconFrame {
            source: station(1),
            destination: MacAddress::BROADCAST,
            message: BeaconMessage::Grant {
                duration: Duration::from_millis(5),
                delay: Duration::from_millis(1),
            },
        };
        let now = Instant::from_millis(10);
        let BeaconEffect::AgreementRecorded(a) = n.on_beacon(now, &frame, &mut book) else {
            panic!("broadcast grant not recorded");
        };
        assert_eq!(a.transmitter, station(1));
        assert_eq!(a.receiver, MacAddress::BROADCAST);
        assert_eq!(a.start, Instant::from_millis(11));
    }

    #[test]
    fn overlapping_overheard_grant_is_rejected() {
        let n = negotiator(3);
        let now = Instant::from_millis(0);
        let mut book = AgreementBook::new();
        book.new_agreement(now, station(3), station(4), Instant::from_millis(1), Duration::from_millis(5));
        let frame = BeaconFrame {
            source: station(1),
            destination: station(2),
            message: BeaconMessage::Grant {
                duration: Duration::from_millis(5),
                delay: Duration::from_millis(2),
            },
        };
        assert_eq!(n.on_beacon(now, &frame, &mut book), BeaconEffect::AgreementRejected);
    }
}
