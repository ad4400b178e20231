//! Scheduled wake-ups for the provisioning state machine
//!
//! Each timer kind has at most one pending deadline. Scheduling or cancelling
//! bumps a generation counter; a wake-up whose generation no longer matches
//! is stale and must be ignored by the receiver.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimerKind {
    ProvisioningTimeout,
    DhcpActionTimeout,
    Ipv6AutoconfTimeout,
    DtimRecheck,
    PacketFilterPoll,
}

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `Instant`, counting from construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-advanced clock for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        *self.now.lock() += delta_ms;
    }

    pub fn set(&self, now_ms: u64) {
        *self.now.lock() = now_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    deadline_ms: u64,
    generation: u64,
}

/// Pending deadlines keyed by timer kind
#[derive(Debug, Default)]
pub struct TimerQueue {
    pending: HashMap<TimerKind, Pending>,
    generations: HashMap<TimerKind, u64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self, kind: TimerKind) -> u64 {
        let generation = self.generations.entry(kind).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Schedule (or reschedule) `kind`, returning its new generation
    pub fn schedule(&mut self, kind: TimerKind, deadline_ms: u64) -> u64 {
        let generation = self.bump(kind);
        self.pending.insert(
            kind,
            Pending {
                deadline_ms,
                generation,
            },
        );
        generation
    }

    /// Cancel `kind`; any wake-up already in flight becomes stale
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let was_pending = self.pending.remove(&kind).is_some();
        self.bump(kind);
        was_pending
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.pending.get(&kind).map(|p| p.deadline_ms)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().map(|p| p.deadline_ms).min()
    }

    /// Remove and return every timer due at `now_ms`, earliest first
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<(TimerKind, u64)> {
        let mut due: Vec<(TimerKind, Pending)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now_ms)
            .map(|(k, p)| (*k, *p))
            .collect();
        due.sort_by_key(|(kind, p)| (p.deadline_ms, *kind));
        for (kind, _) in &due {
            self.pending.remove(kind);
        }
        due.into_iter().map(|(k, p)| (k, p.generation)).collect()
    }

    /// True when a fired wake-up still belongs to the latest schedule call
    pub fn is_current(&self, kind: TimerKind, generation: u64) -> bool {
        self.generations.get(&kind).copied() == Some(generation)
            && !self.pending.contains_key(&kind)
    }

    pub fn clear(&mut self) {
        let kinds: Vec<TimerKind> = self.pending.keys().copied().collect();
        for kind in kinds {
            self.cancel(kind);
        }
    }
}
