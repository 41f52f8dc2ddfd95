//! Inbound frame queues shared between the classifier and the PHY server

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use heapless::{spsc::Queue, LinearMap};
use log::warn;

use crate::frame::MacAddress;
use super::TailKind;

/// Queue storage size, one slot is reserved so this holds `QUEUE_LEN - 1`
pub const QUEUE_LEN: usize = 64;

/// Maximum number of tracked neighbours
pub const MAX_NEIGHBORS: usize = 16;

/// Most recent beacon heard from a neighbour
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub address: MacAddress,
    pub ssid: Vec<u8>,
    /// Timestamp advertised in the beacon (µs)
    pub timestamp: u64,
    /// Advertised beacon interval in time units
    pub interval_tu: u16,
    /// Local receive time (µs) less the advertised timestamp
    pub offset_us: i64,
    /// Number of beacons received
    pub count: u32,
}

type FrameQueue = Mutex<Queue<Vec<u8>, QUEUE_LEN>>;

/// Per kind inbound FIFOs plus the neighbour table.
///
/// Written by a single classifier and drained by a single consumer,
/// every accessor is non-blocking beyond the short internal lock.
#[derive(Debug)]
pub struct SharedLinkState {
    data: FrameQueue,
    ack: FrameQueue,
    rts: FrameQueue,
    cts: FrameQueue,
    neighbors: Mutex<LinearMap<MacAddress, Neighbor, MAX_NEIGHBORS>>,
    other: AtomicU32,
    dropped: AtomicU32,
}

impl Default for SharedLinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLinkState {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Queue::new()),
            ack: Mutex::new(Queue::new()),
            rts: Mutex::new(Queue::new()),
            cts: Mutex::new(Queue::new()),
            neighbors: Mutex::new(LinearMap::new()),
            other: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    fn queue(&self, kind: TailKind) -> Option<&FrameQueue> {
        match kind {
            TailKind::Data => Some(&self.data),
            TailKind::Ack => Some(&self.ack),
            TailKind::Rts => Some(&self.rts),
            TailKind::Cts => Some(&self.cts),
            TailKind::Node | TailKind::SampRate => None,
        }
    }

    /// Append a frame, dropping it if the queue is full
    pub fn push(&self, kind: TailKind, frame: Vec<u8>) -> bool {
        let q = match self.queue(kind) {
            Some(q) => q,
            None => return false,
        };

        let mut q = lock(q);

        if q.enqueue(frame).is_err() {
            warn!("{} queue full, dropping frame", kind);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        true
    }

    /// Remove the oldest frame of a kind
    pub fn pop(&self, kind: TailKind) -> Option<Vec<u8>> {
        let q = self.queue(kind)?;
        let mut q = lock(q);
        q.dequeue()
    }

    /// Copy of the oldest frame of a kind
    pub fn peek(&self, kind: TailKind) -> Option<Vec<u8>> {
        let q = self.queue(kind)?;
        let q = lock(q);
        q.peek().cloned()
    }

    pub fn len(&self, kind: TailKind) -> usize {
        self.queue(kind).map(|q| lock(q).len()).unwrap_or(0)
    }

    /// Record a beacon, replacing any earlier one from the same sender
    pub fn update_neighbor(&self, n: Neighbor) {
        let mut map = lock(&self.neighbors);

        let count = map.get(&n.address).map(|e| e.count).unwrap_or(0);
        let n = Neighbor{ count: count.saturating_add(1), ..n };

        if map.insert(n.address, n).is_err() {
            warn!("Neighbor table full, ignoring beacon");
        }
    }

    /// Snapshot of the neighbour table
    pub fn neighbors(&self) -> Vec<Neighbor> {
        let map = lock(&self.neighbors);
        map.values().cloned().collect()
    }

    /// Count a frame that was not queued
    pub fn count_other(&self) {
        self.other.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames received but not queued (not addressed to us, or malformed)
    pub fn other(&self) -> u32 {
        self.other.load(Ordering::Relaxed)
    }

    /// Frames lost to full queues
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Take a lock, recovering the data from a poisoned mutex
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn per_kind_fifo() {
        let s = SharedLinkState::new();

        assert!(s.push(TailKind::Data, vec![1]));
        assert!(s.push(TailKind::Data, vec![2]));
        assert!(s.push(TailKind::Ack, vec![3]));
        assert!(!s.push(TailKind::Node, vec![4]));

        assert_eq!(s.len(TailKind::Data), 2);
        assert_eq!(s.peek(TailKind::Data), Some(vec![1]));
        assert_eq!(s.pop(TailKind::Data), Some(vec![1]));
        assert_eq!(s.pop(TailKind::Data), Some(vec![2]));
        assert_eq!(s.pop(TailKind::Data), None);
        assert_eq!(s.pop(TailKind::Rts), None);
        assert_eq!(s.pop(TailKind::Ack), Some(vec![3]));
    }

    #[test]
    fn full_queue_drops() {
        let s = SharedLinkState::new();
        for i in 0..QUEUE_LEN - 1 {
            assert!(s.push(TailKind::Cts, vec![i as u8]));
        }
        assert!(!s.push(TailKind::Cts, vec![0xff]));
        assert_eq!(s.dropped(), 1);
        assert_eq!(s.pop(TailKind::Cts), Some(vec![0]));
    }

    #[test]
    fn neighbor_dedup() {
        let s = SharedLinkState::new();
        let n = Neighbor {
            address: MacAddress::from_node(3),
            ssid: b"a".to_vec(),
            timestamp: 10,
            interval_tu: 977,
            offset_us: 0,
            count: 0,
        };

        s.update_neighbor(n.clone());
        s.update_neighbor(Neighbor{ timestamp: 20, ..n.clone() });
        s.update_neighbor(Neighbor{ address: MacAddress::from_node(4), ..n });

        let mut all = s.neighbors();
        all.sort_by_key(|n| n.address);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, 20);
        assert_eq!(all[0].count, 2);
        assert_eq!(all[1].count, 1);
    }
}
