//! Backpressure coordination for the capture pipeline
//!
//! Two independent primitives pace each stream:
//!
//! - [`DrainBarrier`]: a reference-counted "in use" signal. Every delivery
//!   holds a [`ClaimGuard`] for its duration; a sink that processes a
//!   payload on its own thread moves a claim there. The producer drains
//!   back to zero before reusing a buffer slot.
//! - [`RendezvousGate`]: the designated primary consumer (the forwarding
//!   sink) signals once per unit it finishes; the producer waits for a
//!   permit before publishing the next unit.
//!
//! Both waits are fail-open: on timeout the producer proceeds, accepting
//! a dropped unit instead of a stalled capture loop.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Drain barrier: counts in-flight payload claims per stream.
#[derive(Debug, Default)]
pub struct DrainBarrier {
    count: Mutex<usize>,
    zero: Condvar,
}

impl DrainBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the current payload. The claim is released when the guard
    /// drops, on every exit path including unwinding.
    pub fn claim(self: &Arc<Self>) -> ClaimGuard {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        ClaimGuard {
            barrier: Arc::clone(self),
        }
    }

    /// Number of claims currently outstanding.
    pub fn in_flight(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Wait until all claims are released, or the timeout elapses.
    /// Returns false on timeout; the caller is expected to proceed anyway.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.zero.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count > 0 {
                return false;
            }
        }
        true
    }
}

/// RAII claim on a payload; releasing wakes a draining producer.
pub struct ClaimGuard {
    barrier: Arc<DrainBarrier>,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut count = self.barrier.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.barrier.zero.notify_all();
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    permits: usize,
    primaries: usize,
}

/// Rendezvous gate pacing production to the primary consumer.
///
/// With no primary engaged the gate is wide open, so a stream without a
/// network consumer runs at the peripheral's native cadence.
#[derive(Debug, Default)]
pub struct RendezvousGate {
    state: Mutex<GateState>,
    ready: Condvar,
}

impl RendezvousGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register as the designated primary consumer. Pacing is active
    /// while the returned guard lives.
    pub fn engage(self: &Arc<Self>) -> EngagedGuard {
        let mut state = self.state.lock().unwrap();
        state.primaries += 1;
        EngagedGuard {
            gate: Arc::clone(self),
        }
    }

    /// Discard permits left over from a previous stream. Engaged
    /// consumers stay engaged.
    pub fn reset(&self) {
        self.state.lock().unwrap().permits = 0;
    }

    /// Signal that one unit has been fully consumed.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.permits += 1;
        self.ready.notify_one();
    }

    /// Wait until the primary consumer has caught up, or the timeout
    /// elapses. Returns false on timeout (the caller drops the unit).
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.primaries == 0 {
                return true;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.ready.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() && state.permits == 0 && state.primaries > 0 {
                return false;
            }
        }
    }
}

/// RAII registration of a primary consumer.
pub struct EngagedGuard {
    gate: Arc<RendezvousGate>,
}

impl Drop for EngagedGuard {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock().unwrap();
        state.primaries = state.primaries.saturating_sub(1);
        // A departing consumer must not strand a waiting producer.
        self.gate.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_without_claims_is_immediate() {
        let barrier = DrainBarrier::new();
        assert!(barrier.drain(Duration::from_millis(1)));
    }

    #[test]
    fn test_drain_waits_for_claim_release() {
        let barrier = DrainBarrier::new();
        let claim = barrier.claim();
        assert_eq!(barrier.in_flight(), 1);

        let barrier2 = Arc::clone(&barrier);
        let handle = thread::spawn(move || barrier2.drain(Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(20));
        drop(claim);

        assert!(handle.join().unwrap());
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn test_drain_times_out_on_held_claim() {
        let barrier = DrainBarrier::new();
        let _claim = barrier.claim();
        let start = Instant::now();
        assert!(!barrier.drain(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_claim_released_on_unwind() {
        let barrier = DrainBarrier::new();
        let barrier2 = Arc::clone(&barrier);
        let result = thread::spawn(move || {
            let _claim = barrier2.claim();
            panic!("sink exploded");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn test_gate_open_without_primary() {
        let gate = RendezvousGate::new();
        assert!(gate.wait_ready(Duration::from_millis(1)));
    }

    #[test]
    fn test_gate_blocks_until_signal() {
        let gate = RendezvousGate::new();
        let _engaged = gate.engage();

        let gate2 = Arc::clone(&gate);
        let handle = thread::spawn(move || gate2.wait_ready(Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(20));
        gate.signal();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_gate_times_out_without_signal() {
        let gate = RendezvousGate::new();
        let _engaged = gate.engage();
        assert!(!gate.wait_ready(Duration::from_millis(30)));
    }

    #[test]
    fn test_gate_reopens_when_primary_leaves() {
        let gate = RendezvousGate::new();
        let engaged = gate.engage();

        let gate2 = Arc::clone(&gate);
        let handle = thread::spawn(move || gate2.wait_ready(Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(20));
        drop(engaged);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_gate_permits_are_consumed() {
        let gate = RendezvousGate::new();
        let _engaged = gate.engage();
        gate.signal();
        assert!(gate.wait_ready(Duration::from_millis(1)));
        assert!(!gate.wait_ready(Duration::from_millis(1)));
    }
}
