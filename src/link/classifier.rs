//! Inbound frame classifier
//!
//! Reads raw MAC frames from the PHY receive chain and sorts them into the
//! [`SharedLinkState`] queues the MAC polls.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::frame::{self, Frame, MacAddress};
use crate::service::{self, ServerHandle};
use crate::timer::Timer;
use super::wire::{self, MAX_BODY_LEN};
use super::{Neighbor, SharedLinkState, TailKind};

/// Read timeout used so the receive loops notice a stop request
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A source of raw MAC frames
pub trait FrameSource {
    /// Receive one frame, `None` if nothing arrived within the poll interval
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

fn timed_out(e: &LinkError) -> bool {
    matches!(e, LinkError::Io(ErrorKind::WouldBlock) | LinkError::Io(ErrorKind::TimedOut))
}

/// Length prefixed frames on a stream
impl FrameSource for TcpStream {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        match wire::read_frame(self) {
            Ok(f) => Ok(Some(f)),
            Err(e) if timed_out(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One frame per datagram
impl FrameSource for UdpSocket {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let mut buf = vec![0u8; MAX_BODY_LEN];
        match self.recv_from(&mut buf) {
            Ok((n, _)) => {
                buf.truncate(n);
                Ok(Some(buf))
            },
            Err(e) => {
                let e = LinkError::from(e);
                if timed_out(&e) { Ok(None) } else { Err(e) }
            },
        }
    }
}

/// Demultiplexes received frames by type
pub struct Classifier<T> {
    address: MacAddress,
    state: Arc<SharedLinkState>,
    timer: T,
    running: Arc<AtomicBool>,
}

impl <T: Timer> Classifier<T> {
    pub fn new(address: MacAddress, state: Arc<SharedLinkState>, timer: T) -> Self {
        Self {
            address,
            state,
            timer,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that keeps the receive loops running, clear to stop them
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn state(&self) -> &Arc<SharedLinkState> {
        &self.state
    }

    /// Sort one frame into its queue, returning the queue it landed in
    pub fn handle(&self, bytes: &[u8]) -> Option<TailKind> {
        let f = match frame::decode(bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!("Dropping malformed frame ({} bytes): {}", bytes.len(), e);
                self.state.count_other();
                return None;
            },
        };

        trace!("RX {} ({} bytes)", f.kind(), bytes.len());

        let kind = match &f {
            Frame::Data(_) | Frame::DataFrag(_) | Frame::DataRetx(_) if f.receiver() == self.address => TailKind::Data,
            Frame::Ack(_) if f.receiver() == self.address => TailKind::Ack,
            // Overheard RTS / CTS still update the NAV
            Frame::Rts(r) if r.transmitter != self.address => TailKind::Rts,
            Frame::Cts(_) => TailKind::Cts,
            Frame::Beacon(b) if b.source != self.address => {
                let now = self.timer.ticks_us();
                debug!("Beacon from {} (seq {})", b.source, b.seq);

                self.state.update_neighbor(Neighbor {
                    address: b.source,
                    ssid: b.ssid.clone(),
                    timestamp: b.timestamp,
                    interval_tu: b.interval_tu,
                    offset_us: now as i64 - b.timestamp as i64,
                    count: 0,
                });
                return None;
            },
            _ => {
                self.state.count_other();
                return None;
            },
        };

        if self.state.push(kind, bytes.to_vec()) {
            Some(kind)
        } else {
            None
        }
    }

    /// Classify frames from a source until it closes or the classifier is stopped
    pub fn run<S: FrameSource>(&self, source: &mut S) -> Result<(), LinkError> {
        self.pump(source, || true)
    }

    fn pump<S, F>(&self, source: &mut S, keep_going: F) -> Result<(), LinkError>
    where
        S: FrameSource,
        F: Fn() -> bool,
    {
        while self.running.load(Ordering::SeqCst) && keep_going() {
            match source.recv_frame() {
                Ok(Some(f)) => { self.handle(&f); },
                Ok(None) => (),
                Err(LinkError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Accept PHY frame streams one at a time until the handle is stopped.
    ///
    /// An open stream is dropped within [`POLL_INTERVAL`] of the stop.
    pub fn serve(&self, listener: &TcpListener, handle: &ServerHandle) -> Result<(), LinkError> {
        info!("Classifier listening on {}", handle.addr());

        service::serve(listener, handle, |stream: &mut TcpStream| {
            stream.set_read_timeout(Some(POLL_INTERVAL))?;
            self.pump(stream, || handle.is_running())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use crate::frame::{FrameCodec, FrameFields, FrameKind, rates::symbol_duration};
    use crate::timer::mock::MockTimer;

    fn setup() -> (Classifier<MockTimer>, FrameCodec) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());
        let c = Classifier::new(MacAddress::from_node(1), Arc::new(SharedLinkState::new()), MockTimer::new());
        (c, FrameCodec::new(symbol_duration(10e6)))
    }

    fn encode(codec: &FrameCodec, kind: FrameKind, src: u8, dst: u8) -> Vec<u8> {
        let f = FrameFields {
            source: MacAddress::from_node(src),
            destination: MacAddress::from_node(dst),
            payload: b"TEST_1",
            ssid: b"net",
            ..Default::default()
        };
        codec.encode(kind, &f, 0).unwrap().bytes
    }

    #[test]
    fn demultiplex() {
        let (c, codec) = setup();

        assert_eq!(c.handle(&encode(&codec, FrameKind::Data, 2, 1)), Some(TailKind::Data));
        assert_eq!(c.handle(&encode(&codec, FrameKind::DataRetx, 2, 1)), Some(TailKind::Data));
        assert_eq!(c.handle(&encode(&codec, FrameKind::Data, 2, 3)), None);
        assert_eq!(c.handle(&encode(&codec, FrameKind::Ack, 2, 1)), Some(TailKind::Ack));
        assert_eq!(c.handle(&encode(&codec, FrameKind::Ack, 2, 3)), None);
        assert_eq!(c.handle(&encode(&codec, FrameKind::Rts, 2, 3)), Some(TailKind::Rts));
        assert_eq!(c.handle(&encode(&codec, FrameKind::Rts, 1, 3)), None);
        assert_eq!(c.handle(&encode(&codec, FrameKind::Cts, 2, 3)), Some(TailKind::Cts));
        assert_eq!(c.handle(&[0x42, 0x00]), None);

        let s = c.state();
        assert_eq!(s.len(TailKind::Data), 2);
        assert_eq!(s.len(TailKind::Ack), 1);
        assert_eq!(s.other(), 4);
    }

    #[test]
    fn beacons_fill_the_neighbor_table() {
        let (c, codec) = setup();

        for _ in 0..3 {
            assert_eq!(c.handle(&encode(&codec, FrameKind::Beacon, 5, 0)), None);
        }
        c.handle(&encode(&codec, FrameKind::Beacon, 6, 0));
        // Our own beacons are ignored
        c.handle(&encode(&codec, FrameKind::Beacon, 1, 0));

        let mut n = c.state().neighbors();
        n.sort_by_key(|n| n.address);
        assert_eq!(n.len(), 2);
        assert_eq!(n[0].address, MacAddress::from_node(5));
        assert_eq!(n[0].count, 3);
        assert_eq!(&n[0].ssid[..], b"net");
    }

    #[test]
    fn stream_source() {
        let (c, codec) = setup();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let data = encode(&codec, FrameKind::Data, 2, 1);
        let ack = encode(&codec, FrameKind::Ack, 2, 1);
        let t = std::thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            wire::write_frame(&mut s, &data).unwrap();
            wire::write_frame(&mut s, &ack).unwrap();
            s.flush().unwrap();
        });

        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(POLL_INTERVAL)).unwrap();
        c.run(&mut stream).unwrap();
        t.join().unwrap();

        assert_eq!(c.state().len(TailKind::Data), 1);
        assert_eq!(c.state().len(TailKind::Ack), 1);
    }

    #[test]
    fn stream_server_stops_with_open_stream() {
        let (c, codec) = setup();
        let state = c.state().clone();

        let (listener, handle) = service::phy::bind("127.0.0.1:0").unwrap();
        let h = handle.clone();
        let t = std::thread::spawn(move || c.serve(&listener, &h));

        let mut s = TcpStream::connect(handle.addr()).unwrap();
        wire::write_frame(&mut s, &encode(&codec, FrameKind::Data, 2, 1)).unwrap();
        s.flush().unwrap();

        for _ in 0..100 {
            if state.len(TailKind::Data) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(state.len(TailKind::Data), 1);

        // The sender keeps its stream open, stop still returns
        handle.stop();
        t.join().unwrap().unwrap();
        drop(s);
    }

    #[test]
    fn datagram_source() {
        let (c, codec) = setup();

        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        rx.set_read_timeout(Some(POLL_INTERVAL)).unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();

        tx.send_to(&encode(&codec, FrameKind::Cts, 2, 1), rx.local_addr().unwrap()).unwrap();

        let mut rx = rx;
        let f = rx.recv_frame().unwrap().unwrap();
        assert_eq!(c.handle(&f), Some(TailKind::Cts));

        // Nothing else queued
        assert_eq!(rx.recv_frame().unwrap(), None);
    }
}
