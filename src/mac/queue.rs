//! Address-keyed outbound queue.
//!
//! Frames keep global FIFO order; per-destination dequeues take the oldest
//! frame for that destination. A frame that does not fit the remaining
//! window is pushed back to the front so it keeps its turn.

use std::collections::VecDeque;

use crate::common::types::MacAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub destination: MacAddress,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
    dropped: u64,
}

/// Warn when the queue crosses this share of its capacity.
const QUEUE_WARNING_THRESHOLD: f32 = 0.8;

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append a frame, dropping the oldest one when at capacity.
    pub fn enqueue(&mut self, frame: QueuedFrame) {
        if self.frames.len() >= self.capacity {
            log::warn!("Outbound queue full ({}), dropping oldest frame", self.capacity);
            self.frames.pop_front();
            self.dropped += 1;
        } else if self.frames.len() as f32 >= self.capacity as f32 * QUEUE_WARNING_THRESHOLD {
            log::debug!("Outbound queue approaching capacity: {}/{}", self.frames.len(), self.capacity);
        }
        self.frames.push_back(frame);
    }

    /// Destination of the oldest queued frame.
    pub fn head_destination(&self) -> Option<MacAddress> {
        self.frames.front().map(|f| f.destination)
    }

    /// Distinct destinations in order of first appearance.
    pub fn destinations(&self) -> Vec<MacAddress> {
        let mut out: Vec<MacAddress> = Vec::new();
        for frame in &self.frames {
            if !out.contains(&frame.destination) {
                out.push(frame.destination);
            }
        }
        out
    }

    /// Oldest frame for `destination`.
    pub fn dequeue_for(&mut self, destination: MacAddress) -> Option<QueuedFrame> {
        let index = self.frames.iter().position(|f| f.destination == destination)?;
        self.frames.remove(index)
    }

    /// Oldest group-addressed frame.
    pub fn dequeue_group(&mut self) -> Option<QueuedFrame> {
        let index = self.frames.iter().position(|f| f.destination.is_group())?;
        self.frames.remove(index)
    }

    /// Return a frame to the head of the queue.
    pub fn push_front(&mut self, frame: QueuedFrame) {
        self.frames.push_front(frame);
    }
}
