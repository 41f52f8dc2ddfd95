//! Upper layer transmit / receive buffer
//!
//! A pair of FIFOs between the traffic source and the MAC: the source pushes
//! payloads (or beacon markers) into the transmit queue, the MAC peeks and
//! removes them, and received payloads are copied into the receive queue.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::error::LinkError;
use crate::link::wire::{self, UpperRequest, UpperResponse};
use crate::link::{UpperLink, UpperPoll};
use super::{serve, ServerHandle};

/// Transmit queue entry
#[derive(Debug, Clone, PartialEq)]
pub enum TxItem {
    Payload(Vec<u8>),
    Beacon,
}

/// In-process upper layer buffer
#[derive(Debug, Default)]
pub struct UpperBuffer {
    tx: Mutex<VecDeque<TxItem>>,
    rx: Mutex<VecDeque<Vec<u8>>>,
    removed: AtomicU32,
    delivered: AtomicU32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl UpperBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload for transmission
    pub fn push_payload(&self, payload: Vec<u8>) {
        lock(&self.tx).push_back(TxItem::Payload(payload));
    }

    /// Queue a beacon marker
    pub fn push_beacon(&self) {
        lock(&self.tx).push_back(TxItem::Beacon);
    }

    /// Head of the transmit queue
    pub fn peek(&self) -> UpperPoll {
        match lock(&self.tx).front() {
            Some(TxItem::Payload(p)) => UpperPoll::Payload(p.clone()),
            Some(TxItem::Beacon) => UpperPoll::Beacon,
            None => UpperPoll::Empty,
        }
    }

    /// Pop the head of the transmit queue
    pub fn pop(&self) -> Option<TxItem> {
        let item = lock(&self.tx).pop_front();
        if item.is_some() {
            self.removed.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Append a received payload
    pub fn push_rx(&self, payload: Vec<u8>) {
        lock(&self.rx).push_back(payload);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the oldest received payload
    pub fn pop_rx(&self) -> Option<Vec<u8>> {
        lock(&self.rx).pop_front()
    }

    pub fn tx_len(&self) -> usize {
        lock(&self.tx).len()
    }

    pub fn rx_len(&self) -> usize {
        lock(&self.rx).len()
    }

    /// Transmit queue entries removed by the MAC
    pub fn removed(&self) -> u32 {
        self.removed.load(Ordering::Relaxed)
    }

    /// Payloads delivered by the MAC
    pub fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Apply a control channel request, returning the response if one is due
    pub fn handle(&self, req: UpperRequest) -> Option<UpperResponse> {
        match req {
            UpperRequest::NoPacket => Some(match self.peek() {
                UpperPoll::Payload(p) => UpperResponse::Yes(p),
                UpperPoll::Beacon => UpperResponse::Beacon,
                UpperPoll::Empty => UpperResponse::No,
            }),
            UpperRequest::Remove => {
                self.pop();
                None
            },
            UpperRequest::Copy(p) => {
                debug!("RX payload: {} bytes", p.len());
                self.push_rx(p);
                None
            },
            UpperRequest::Payload(p) => {
                self.push_payload(p);
                None
            },
            UpperRequest::Beacon(_) => {
                self.push_beacon();
                None
            },
        }
    }
}

/// Any handle to a buffer is an in-process upper link
impl<B: Deref<Target = UpperBuffer>> UpperLink for B {
    fn poll(&mut self) -> Result<UpperPoll, LinkError> {
        Ok(self.peek())
    }

    fn remove(&mut self) -> Result<(), LinkError> {
        self.pop();
        Ok(())
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        self.push_rx(payload.to_vec());
        Ok(())
    }
}

/// Serves an [`UpperBuffer`] over TCP
pub struct UpperServer {
    buffer: Arc<UpperBuffer>,
    listener: TcpListener,
    handle: ServerHandle,
}

impl UpperServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, buffer: Arc<UpperBuffer>) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(addr)?;
        let handle = ServerHandle::new(listener.local_addr()?);
        Ok(Self { buffer, listener, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.addr()
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn buffer(&self) -> &Arc<UpperBuffer> {
        &self.buffer
    }

    /// Serve requests until stopped
    pub fn run(&self) -> Result<(), LinkError> {
        info!("Upper layer buffer listening on {}", self.handle.addr());

        let buffer = &self.buffer;
        serve(&self.listener, &self.handle, |s: &mut TcpStream| {
            let req: UpperRequest = wire::read_message(s)?;
            if let Some(resp) = buffer.handle(req) {
                wire::write_message(s, &resp)?;
            }
            Ok(())
        })
    }
}
