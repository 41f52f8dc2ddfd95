//! Link test doubles
//!
//! [`MockPhy`] keeps per kind receive queues, records every transmitted
//! frame and can answer transmissions through a responder closure, so MAC
//! scenarios can script a peer station. Clones share state.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::LinkError;
use crate::frame::{self, Frame};
use crate::service::UpperBuffer;
use crate::timer::mock::MockTimer;
use super::{PhyLink, TailKind};

/// A frame handed to the PHY
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub bytes: Vec<u8>,
    pub encoding: u8,
    pub timestamp_us: u64,
}

impl Sent {
    pub fn frame(&self) -> Frame {
        frame::decode(&self.bytes).unwrap()
    }
}

/// Produces the frames a peer sends back in response to a transmission
pub type Responder = Box<dyn FnMut(&Frame) -> Vec<(TailKind, Vec<u8>)> + Send>;

struct Inner {
    data: VecDeque<Vec<u8>>,
    ack: VecDeque<Vec<u8>>,
    rts: VecDeque<Vec<u8>>,
    cts: VecDeque<Vec<u8>>,
    sent: Vec<Sent>,

    cca: VecDeque<f32>,
    cca_default: f32,

    node: Option<u8>,
    sample_rate: Option<f64>,

    responder: Option<Responder>,
    latency: Option<(MockTimer, u64)>,
    calls: usize,
}

impl Inner {
    fn queue(&mut self, kind: TailKind) -> Option<&mut VecDeque<Vec<u8>>> {
        match kind {
            TailKind::Data => Some(&mut self.data),
            TailKind::Ack => Some(&mut self.ack),
            TailKind::Rts => Some(&mut self.rts),
            TailKind::Cts => Some(&mut self.cts),
            _ => None,
        }
    }

    fn call(&mut self) {
        self.calls += 1;
        if let Some((t, us)) = &self.latency {
            t.advance_us(*us);
        }
    }
}

/// Scripted PHY
#[derive(Clone)]
pub struct MockPhy(Arc<Mutex<Inner>>);

impl Default for MockPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPhy {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Inner {
            data: VecDeque::new(),
            ack: VecDeque::new(),
            rts: VecDeque::new(),
            cts: VecDeque::new(),
            sent: Vec::new(),
            cca: VecDeque::new(),
            cca_default: -90.0,
            node: None,
            sample_rate: None,
            responder: None,
            latency: None,
            calls: 0,
        })))
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap()
    }

    /// Queue a received frame
    pub fn push(&self, kind: TailKind, frame: Vec<u8>) {
        if let Some(q) = self.inner().queue(kind) {
            q.push_back(frame);
        }
    }

    pub fn queued(&self, kind: TailKind) -> usize {
        self.inner().queue(kind).map(|q| q.len()).unwrap_or(0)
    }

    /// Frames transmitted so far
    pub fn sent(&self) -> Vec<Sent> {
        self.inner().sent.clone()
    }

    /// Take the frames transmitted since the last call
    pub fn take_sent(&self) -> Vec<Sent> {
        std::mem::take(&mut self.inner().sent)
    }

    /// Decoded transmitted frames
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.inner().sent.iter().map(|s| s.frame()).collect()
    }

    /// Channel power readings returned by successive CCA requests
    pub fn set_cca(&self, readings: &[f32]) {
        self.inner().cca = readings.iter().copied().collect();
    }

    /// Channel power once the scripted readings run out
    pub fn set_cca_default(&self, dbw: f32) {
        self.inner().cca_default = dbw;
    }

    pub fn set_node(&self, node: u8) {
        self.inner().node = Some(node);
    }

    pub fn set_sample_rate(&self, rate: f64) {
        self.inner().sample_rate = Some(rate);
    }

    /// Answer transmissions with frames from a scripted peer
    pub fn set_responder<F>(&self, f: F)
    where
        F: FnMut(&Frame) -> Vec<(TailKind, Vec<u8>)> + Send + 'static,
    {
        self.inner().responder = Some(Box::new(f));
    }

    /// Advance a virtual clock by `us` on every PHY call
    pub fn set_latency(&self, timer: MockTimer, us: u64) {
        self.inner().latency = Some((timer, us));
    }

    /// Number of PHY calls made
    pub fn calls(&self) -> usize {
        self.inner().calls
    }
}

impl PhyLink for MockPhy {
    fn tail(&mut self, kind: TailKind) -> Result<Option<Vec<u8>>, LinkError> {
        let mut i = self.inner();
        i.call();

        let v = match kind {
            TailKind::Node => i.node.map(|n| vec![n]),
            TailKind::SampRate => i.sample_rate.map(|r| r.to_le_bytes().to_vec()),
            k => i.queue(k).and_then(|q| q.pop_front()),
        };
        Ok(v)
    }

    fn transmit(&mut self, bytes: &[u8], encoding: u8, timestamp_us: u64) -> Result<(), LinkError> {
        let mut i = self.inner();
        i.call();

        i.sent.push(Sent{ bytes: bytes.to_vec(), encoding, timestamp_us });

        let replies = match (frame::decode(bytes), i.responder.as_mut()) {
            (Ok(f), Some(r)) => r(&f),
            _ => Vec::new(),
        };
        for (kind, f) in replies {
            if let Some(q) = i.queue(kind) {
                q.push_back(f);
            }
        }

        Ok(())
    }

    fn cca(&mut self) -> Result<f32, LinkError> {
        let mut i = self.inner();
        i.call();

        let d = i.cca_default;
        Ok(i.cca.pop_front().unwrap_or(d))
    }
}

/// Upper layer double, an [`UpperBuffer`] shared between a test and the MAC
#[derive(Clone, Default)]
pub struct MockUpper(Arc<UpperBuffer>);

impl MockUpper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for MockUpper {
    type Target = UpperBuffer;

    fn deref(&self) -> &UpperBuffer {
        &self.0
    }
}
