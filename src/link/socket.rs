//! TCP clients for the PHY and upper layer services.
//!
//! Each request opens a fresh connection, writes one message and, where
//! the request expects one, reads a single response.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use log::trace;

use crate::error::LinkError;
use super::wire::{self, Message, PhyRequest, PhyResponse, UpperRequest, UpperResponse};
use super::{PhyLink, TailKind, UpperLink, UpperPoll};

/// Default bound on a single request / response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

fn connect(addr: &SocketAddr, timeout: Duration) -> Result<TcpStream, LinkError> {
    let s = TcpStream::connect_timeout(addr, timeout)?;
    s.set_read_timeout(Some(timeout))?;
    s.set_write_timeout(Some(timeout))?;
    s.set_nodelay(true)?;
    Ok(s)
}

fn send<Req: Message>(addr: &SocketAddr, timeout: Duration, req: &Req) -> Result<(), LinkError> {
    let mut s = connect(addr, timeout)?;
    wire::write_message(&mut s, req)?;
    let _ = s.shutdown(Shutdown::Both);
    Ok(())
}

fn exchange<Req: Message, Resp: Message>(addr: &SocketAddr, timeout: Duration, req: &Req) -> Result<Resp, LinkError> {
    let mut s = connect(addr, timeout)?;
    wire::write_message(&mut s, req)?;
    let resp = wire::read_message(&mut s)?;
    let _ = s.shutdown(Shutdown::Both);
    Ok(resp)
}

/// PHY client
#[derive(Debug, Clone)]
pub struct SocketPhy {
    addr: SocketAddr,
    timeout: Duration,
}

impl SocketPhy {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

impl PhyLink for SocketPhy {
    fn tail(&mut self, kind: TailKind) -> Result<Option<Vec<u8>>, LinkError> {
        match exchange(&self.addr, self.timeout, &PhyRequest::Tail(kind))? {
            PhyResponse::Yes(d) => {
                trace!("TAIL {}: {} bytes", kind, d.len());
                Ok(Some(d))
            },
            PhyResponse::No => Ok(None),
            PhyResponse::Cca(_) => Err(LinkError::Protocol),
        }
    }

    fn transmit(&mut self, frame: &[u8], encoding: u8, timestamp_us: u64) -> Result<(), LinkError> {
        let req = PhyRequest::Pkt{ encoding, timestamp_us, frame: frame.to_vec() };
        send(&self.addr, self.timeout, &req)
    }

    fn cca(&mut self) -> Result<f32, LinkError> {
        match exchange(&self.addr, self.timeout, &PhyRequest::Cca)? {
            PhyResponse::Cca(p) => Ok(p),
            _ => Err(LinkError::Protocol),
        }
    }
}

/// Upper layer buffer client
#[derive(Debug, Clone)]
pub struct SocketUpper {
    addr: SocketAddr,
    timeout: Duration,
}

impl SocketUpper {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Queue a payload for transmission
    pub fn push_payload(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        send(&self.addr, self.timeout, &UpperRequest::Payload(payload.to_vec()))
    }

    /// Queue a beacon marker
    pub fn push_beacon(&mut self) -> Result<(), LinkError> {
        send(&self.addr, self.timeout, &UpperRequest::Beacon(Vec::new()))
    }
}

impl UpperLink for SocketUpper {
    fn poll(&mut self) -> Result<UpperPoll, LinkError> {
        let resp = exchange(&self.addr, self.timeout, &UpperRequest::NoPacket)?;
        Ok(match resp {
            UpperResponse::Yes(p) => UpperPoll::Payload(p),
            UpperResponse::Beacon => UpperPoll::Beacon,
            UpperResponse::No => UpperPoll::Empty,
        })
    }

    fn remove(&mut self) -> Result<(), LinkError> {
        send(&self.addr, self.timeout, &UpperRequest::Remove)
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        send(&self.addr, self.timeout, &UpperRequest::Copy(payload.to_vec()))
    }
}
