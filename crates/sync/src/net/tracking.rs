use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

const MIN_RTO: Duration = Duration::from_millis(50);
const MAX_RTO: Duration = Duration::from_secs(2);
pub const MAX_REORDER_WINDOW: u32 = 1024;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }
}

impl RttEstimator {
    pub fn update(&mut self, rtt: Duration) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let rtt = rtt.as_secs_f32() * 1000.0;
        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn rto(&self) -> Duration {
        let millis = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(millis.max(0.0) / 1000.0).clamp(MIN_RTO, MAX_RTO)
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    sequence: u32,
    datagram: Vec<u8>,
    last_sent: Instant,
    attempts: u32,
}

/// Reliable datagrams that have been sent but not yet acknowledged.
#[derive(Debug, Default)]
pub struct SendWindow {
    in_flight: VecDeque<InFlight>,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, sequence: u32, datagram: Vec<u8>, now: Instant) {
        self.in_flight.push_back(InFlight {
            sequence,
            datagram,
            last_sent: now,
            attempts: 1,
        });
    }

    /// Returns an RTT sample when the acknowledged datagram was only sent
    /// once; retransmitted datagrams give ambiguous samples.
    pub fn acknowledge(&mut self, sequence: u32, now: Instant) -> Option<Duration> {
        let index = self
            .in_flight
            .iter()
            .position(|pending| pending.sequence == sequence)?;
        let pending = self.in_flight.remove(index)?;

        (pending.attempts == 1).then(|| now.duration_since(pending.last_sent))
    }

    pub fn due_for_retransmit(&mut self, now: Instant, rto: Duration) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for pending in &mut self.in_flight {
            if now.duration_since(pending.last_sent) >= rto {
                pending.last_sent = now;
                pending.attempts += 1;
                due.push(pending.datagram.clone());
            }
        }
        due
    }

    pub fn unacked_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Reorders incoming reliable payloads and releases them strictly in
/// sequence order.
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    next_expected: u32,
    buffered: HashMap<u32, Vec<u8>>,
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Returns false when the sequence is a duplicate or too far ahead to
    /// buffer. Deliverable payloads are appended to `ready`.
    pub fn accept(&mut self, sequence: u32, payload: Vec<u8>, ready: &mut Vec<Vec<u8>>) -> bool {
        if sequence_greater_than(self.next_expected, sequence) {
            return false;
        }
        if sequence.wrapping_sub(self.next_expected) >= MAX_REORDER_WINDOW {
            return false;
        }
        if self.buffered.contains_key(&sequence) {
            return false;
        }

        self.buffered.insert(sequence, payload);
        while let Some(next) = self.buffered.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected = self.next_expected.wrapping_add(1);
        }

        true
    }

    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }
}
