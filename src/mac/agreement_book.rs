//! Pending reservation requests and confirmed agreements held by one station.
//!
//! The book is a single-resource interval scheduler: agreements never
//! overlap and are kept sorted by start time. Requests are served FIFO so a
//! station grants asks in the order it heard them.

use embassy_time::{Duration, Instant};
use std::collections::VecDeque;

use crate::common::types::MacAddress;

/// Unconfirmed ask for a window, held by `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub initiator: MacAddress,
    pub target: MacAddress,
    pub duration: Duration,
    /// When the request beacon was received; drives request timeouts.
    pub received_at: Instant,
}

/// Exclusive reservation of `[start, start + duration)` for one sender/receiver pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agreement {
    pub transmitter: MacAddress,
    pub receiver: MacAddress,
    pub start: Instant,
    pub duration: Duration,
}

impl Agreement {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }

    /// Half-open interval intersection.
    pub fn overlaps(&self, start: Instant, duration: Duration) -> bool {
        start < self.end() && self.start < start + duration
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.end() <= now
    }

    pub fn contains(&self, now: Instant) -> bool {
        self.start <= now && now < self.end()
    }
}

#[derive(Debug, Default)]
pub struct AgreementBook {
    requests: VecDeque<Request>,
    agreements: Vec<Agreement>,
}

impl AgreementBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_request(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn has_any_agreement(&self) -> bool {
        !self.agreements.is_empty()
    }

    /// Queue a request unless one from the same initiator to the same target
    /// is already waiting. Returns whether it was queued.
    pub fn add_request(&mut self, request: Request) -> bool {
        if self.requests.iter().any(|r| r.initiator == request.initiator && r.target == request.target) {
            return false;
        }
        self.requests.push_back(request);
        true
    }

    pub fn remove_request(&mut self, initiator: MacAddress, target: MacAddress) -> bool {
        let before = self.requests.len();
        self.requests.retain(|r| !(r.initiator == initiator && r.target == target));
        self.requests.len() != before
    }

    /// Oldest waiting request, removed from the book.
    pub fn pop_oldest_request(&mut self) -> Option<Request> {
        self.requests.pop_front()
    }

    /// Drop requests that waited longer than `timeout`. Returns how many were dropped.
    pub fn expire_requests(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.requests.len();
        self.requests.retain(|r| now.saturating_duration_since(r.received_at) <= timeout);
        before - self.requests.len()
    }

    pub fn find_agreement(&self, transmitter: MacAddress, receiver: MacAddress) -> bool {
        self.agreements.iter().any(|a| a.transmitter == transmitter && a.receiver == receiver)
    }

    /// Reserve the earliest interval of `duration` starting no earlier than
    /// `earliest_start` that does not intersect any held agreement.
    ///
    /// # Panics
    ///
    /// If `earliest_start` lies before `now`: a past-dated reservation means
    /// the caller's clock bookkeeping is broken.
    pub fn new_agreement(&mut self, now: Instant, transmitter: MacAddress, receiver: MacAddress, earliest_start: Instant, duration: Duration) -> Instant {
        assert!(
            earliest_start >= now,
            "agreement start {}us lies before now {}us",
            earliest_start.as_micros(),
            now.as_micros()
        );
        self.sweep_expired(now);
        self.agreements.sort_by_key(|a| a.start);

        // Sorted and pairwise disjoint, so one forward pass finds the first gap.
        let mut start = earliest_start;
        for existing in &self.agreements {
            if existing.overlaps(start, duration) {
                start = existing.end();
            }
        }

        self.agreements.push(Agreement {
            transmitter,
            receiver,
            start,
            duration,
        });
        self.agreements.sort_by_key(|a| a.start);
        start
    }

    /// Store an agreement decided elsewhere. Conflicting agreements are not
    /// stored; the return value tells whether it was accepted.
    pub fn add_agreement(&mut self, agreement: Agreement) -> bool {
        if self.agreements.iter().any(|a| a.overlaps(agreement.start, agreement.duration)) {
            log::debug!(
                "Rejecting agreement {} -> {} at {}us: conflicts with a held reservation",
                agreement.transmitter,
                agreement.receiver,
                agreement.start.as_micros()
            );
            return false;
        }
        self.agreements.push(agreement);
        self.agreements.sort_by_key(|a| a.start);
        true
    }

    /// Remove every agreement whose interval has fully elapsed.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.agreements.len();
        self.agreements.retain(|a| !a.is_expired(now));
        before - self.agreements.len()
    }

    /// Earliest agreement transmitted by `transmitter`.
    pub fn next_agreement_for(&self, transmitter: MacAddress) -> Option<&Agreement> {
        self.agreements.iter().find(|a| a.transmitter == transmitter)
    }

    pub fn agreements(&self) -> &[Agreement] {
        &self.agreements
    }

    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }
}
