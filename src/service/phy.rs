//! PHY request server
//!
//! Answers MAC requests on behalf of a PHY: `TAIL` from the classifier's
//! [`SharedLinkState`] queues, `PKT` and `CCA` through a [`PhyBackend`].

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use log::{debug, info, trace};

use crate::error::LinkError;
use crate::frame::{self, FrameKind};
use crate::link::wire::{self, PhyRequest, PhyResponse};
use crate::link::{SharedLinkState, TailKind};
use super::{serve, ServerHandle};

/// Radio side of the PHY
pub trait PhyBackend {
    /// Put a frame on the air
    fn transmit(&mut self, frame: &[u8], encoding: u8, timestamp_us: u64) -> Result<(), LinkError>;

    /// Current channel power in dBW
    fn channel_power_dbw(&mut self) -> Result<f32, LinkError>;
}

/// Request counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhyCounters {
    pub cca: u32,
    pub data_tx: u32,
    pub data_retx: u32,
    pub ack_tx: u32,
    pub ack_rx: u32,
    pub data_rx: u32,
}

/// Serves MAC requests for one node
pub struct PhyServer<B> {
    node: u8,
    sample_rate: f64,
    state: Arc<SharedLinkState>,
    backend: B,
    counters: PhyCounters,
}

impl <B: PhyBackend> PhyServer<B> {
    pub fn new(node: u8, sample_rate: f64, state: Arc<SharedLinkState>, backend: B) -> Self {
        Self {
            node,
            sample_rate,
            state,
            backend,
            counters: PhyCounters::default(),
        }
    }

    pub fn counters(&self) -> &PhyCounters {
        &self.counters
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Apply a request, returning the response if one is due
    pub fn handle(&mut self, req: PhyRequest) -> Result<Option<PhyResponse>, LinkError> {
        let resp = match req {
            PhyRequest::Pkt{ encoding, timestamp_us, frame } => {
                match frame::decode(&frame).map(|f| f.kind()) {
                    Ok(FrameKind::Data) | Ok(FrameKind::DataFrag) => self.counters.data_tx += 1,
                    Ok(FrameKind::DataRetx) => self.counters.data_retx += 1,
                    Ok(FrameKind::Ack) => self.counters.ack_tx += 1,
                    _ => (),
                }

                self.backend.transmit(&frame, encoding, timestamp_us)?;
                self.log_counters();
                None
            },
            PhyRequest::Cca => {
                self.counters.cca += 1;
                let p = self.backend.channel_power_dbw()?;
                trace!("CCA: {:.1} dBW", p);
                Some(PhyResponse::Cca(p))
            },
            PhyRequest::Tail(TailKind::Node) => Some(PhyResponse::Yes(vec![self.node])),
            PhyRequest::Tail(TailKind::SampRate) => Some(PhyResponse::Yes(self.sample_rate.to_le_bytes().to_vec())),
            PhyRequest::Tail(kind) => match self.state.pop(kind) {
                Some(f) => {
                    match kind {
                        TailKind::Data => self.counters.data_rx += 1,
                        TailKind::Ack => self.counters.ack_rx += 1,
                        _ => (),
                    }
                    self.log_counters();
                    Some(PhyResponse::Yes(f))
                },
                None => Some(PhyResponse::No),
            },
        };

        Ok(resp)
    }

    fn log_counters(&self) {
        let c = &self.counters;
        debug!("CCA: {}, DATA TX: {}, DATA RETX: {}, ACK RX: {}, DATA RX: {}, ACK TX: {}",
            c.cca, c.data_tx, c.data_retx, c.ack_rx, c.data_rx, c.ack_tx);
    }

    /// Serve MAC requests on a listener until the handle is stopped
    pub fn run(&mut self, listener: &TcpListener, handle: &ServerHandle) -> Result<(), LinkError> {
        info!("PHY for node {} listening on {}", self.node, handle.addr());

        serve(listener, handle, |s: &mut TcpStream| {
            let req: PhyRequest = wire::read_message(s)?;
            if let Some(resp) = self.handle(req)? {
                wire::write_message(s, &resp)?;
            }
            Ok(())
        })
    }
}

/// Bind a listener for [`PhyServer::run`] along with its stop handle
pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<(TcpListener, ServerHandle), LinkError> {
    let listener = TcpListener::bind(addr)?;
    let local: SocketAddr = listener.local_addr()?;
    Ok((listener, ServerHandle::new(local)))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;
    use crate::frame::{FrameCodec, FrameFields, MacAddress, rates::symbol_duration};
    use crate::link::{PhyLink, SocketPhy};

    #[derive(Clone, Default)]
    struct Loopback {
        sent: Arc<Mutex<Vec<(Vec<u8>, u8)>>>,
    }

    impl PhyBackend for Loopback {
        fn transmit(&mut self, frame: &[u8], encoding: u8, _timestamp_us: u64) -> Result<(), LinkError> {
            self.sent.lock().unwrap().push((frame.to_vec(), encoding));
            Ok(())
        }

        fn channel_power_dbw(&mut self) -> Result<f32, LinkError> {
            Ok(-60.0)
        }
    }

    fn data_frame(kind: FrameKind) -> Vec<u8> {
        let codec = FrameCodec::new(symbol_duration(10e6));
        let f = FrameFields {
            source: MacAddress::from_node(1),
            destination: MacAddress::from_node(2),
            payload: b"TEST_4",
            ..Default::default()
        };
        codec.encode(kind, &f, 2).unwrap().bytes
    }

    #[test]
    fn request_handling() {
        let state = Arc::new(SharedLinkState::new());
        let backend = Loopback::default();
        let mut phy = PhyServer::new(7, 10e6, state.clone(), backend.clone());

        assert_eq!(phy.handle(PhyRequest::Tail(TailKind::Node)).unwrap(), Some(PhyResponse::Yes(vec![7])));
        assert_eq!(phy.handle(PhyRequest::Tail(TailKind::Data)).unwrap(), Some(PhyResponse::No));

        state.push(TailKind::Data, vec![1, 2, 3]);
        assert_eq!(phy.handle(PhyRequest::Tail(TailKind::Data)).unwrap(), Some(PhyResponse::Yes(vec![1, 2, 3])));

        assert_eq!(phy.handle(PhyRequest::Cca).unwrap(), Some(PhyResponse::Cca(-60.0)));

        let f = data_frame(FrameKind::DataRetx);
        assert_eq!(phy.handle(PhyRequest::Pkt{ encoding: 2, timestamp_us: 0, frame: f.clone() }).unwrap(), None);
        assert_eq!(backend.sent.lock().unwrap()[0], (f, 2));

        let c = phy.counters();
        assert_eq!((c.cca, c.data_rx, c.data_retx, c.data_tx), (1, 1, 1, 0));
    }

    #[test]
    fn served_over_tcp() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let state = Arc::new(SharedLinkState::new());
        let backend = Loopback::default();
        let (listener, handle) = bind("127.0.0.1:0").unwrap();
        let addr = handle.addr();

        let mut phy = PhyServer::new(3, 20e6, state.clone(), backend.clone());
        let h = handle.clone();
        let t = std::thread::spawn(move || phy.run(&listener, &h));

        let mut c = SocketPhy::new(addr);
        assert_eq!(c.node_id().unwrap(), Some(3));
        assert_eq!(c.sample_rate().unwrap(), Some(20e6));
        assert_eq!(c.cca().unwrap(), -60.0);
        assert_eq!(c.tail(TailKind::Ack).unwrap(), None);

        state.push(TailKind::Ack, vec![0xd4]);
        assert_eq!(c.tail(TailKind::Ack).unwrap(), Some(vec![0xd4]));

        let f = data_frame(FrameKind::Data);
        c.transmit(&f, 2, 1).unwrap();
        // Served in order, the CCA response implies the packet was handled
        c.cca().unwrap();
        assert_eq!(backend.sent.lock().unwrap().len(), 1);

        handle.stop();
        t.join().unwrap().unwrap();
    }
}
