//! UDP loopback PHY
//!
//! Stands in for the radio: frames the MAC transmits are sent as UDP
//! datagrams to the peer PHYs, datagrams received are classified into the
//! queues the MAC polls. Run one per node to exercise MACs on one host.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use structopt::StructOpt;

use dcf_mac::prelude::*;
use dcf_mac::link::{Classifier, SharedLinkState};
use dcf_mac::link::classifier::POLL_INTERVAL;
use dcf_mac::service::phy::bind;


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long)]
    /// Node identifier reported to the MAC
    pub node: u8,

    #[structopt(long, default_value = "10e6")]
    /// Sample rate reported to the MAC
    pub sample_rate: f64,

    #[structopt(long, default_value = "127.0.0.1:8013")]
    /// Address to serve MAC requests on
    pub listen: SocketAddr,

    #[structopt(long, default_value = "127.0.0.1:8500")]
    /// Local medium socket
    pub medium: SocketAddr,

    #[structopt(long)]
    /// Peer PHY medium sockets
    pub peer: Vec<SocketAddr>,

    #[structopt(long)]
    /// Also accept length prefixed frame streams on TCP port 8500
    pub stream: bool,

    #[structopt(long, default_value = "-90", allow_hyphen_values = true)]
    /// Channel power reported for CCA, dBW
    pub noise_floor: f32,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

/// Sends transmitted frames to every peer
struct UdpBackend {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    noise_floor: f32,
}

impl PhyBackend for UdpBackend {
    fn transmit(&mut self, frame: &[u8], encoding: u8, timestamp_us: u64) -> Result<(), LinkError> {
        debug!("TX {} bytes at encoding {} (t {} us)", frame.len(), encoding, timestamp_us);
        for p in &self.peers {
            self.socket.send_to(frame, p)?;
        }
        Ok(())
    }

    fn channel_power_dbw(&mut self) -> Result<f32, LinkError> {
        Ok(self.noise_floor)
    }
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let opts = Options::from_args();

    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting UDP PHY for node {} (medium {}, peers {:?})", opts.node, opts.medium, opts.peer);

    let socket = UdpSocket::bind(opts.medium)?;
    let mut rx = socket.try_clone()?;
    rx.set_read_timeout(Some(POLL_INTERVAL))?;

    // Receive chain
    let state = Arc::new(SharedLinkState::new());
    let classifier = Classifier::new(MacAddress::from_node(opts.node), state.clone(), SystemTimer::new());
    let classifying = classifier.running();
    let rx_thread = std::thread::spawn(move || classifier.run(&mut rx));

    // Optional frame stream from an external receive chain
    let stream = if opts.stream {
        let c = Classifier::new(MacAddress::from_node(opts.node), state.clone(), SystemTimer::new());
        let (listener, handle) = bind(("127.0.0.1", PHY_RX_PORT))?;
        let h = handle.clone();
        Some((handle, std::thread::spawn(move || c.serve(&listener, &h))))
    } else {
        None
    };

    // MAC request server
    let backend = UdpBackend{ socket, peers: opts.peer.clone(), noise_floor: opts.noise_floor };
    let mut phy = PhyServer::new(opts.node, opts.sample_rate, state.clone(), backend);
    let (listener, handle) = bind(opts.listen)?;
    let h = handle.clone();
    let phy_thread = std::thread::spawn(move || phy.run(&listener, &h));

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));

        for n in state.neighbors() {
            debug!("Neighbor {} ssid '{}' beacons {} offset {} us",
                n.address, String::from_utf8_lossy(&n.ssid), n.count, n.offset_us);
        }
    }

    info!("Exiting (unclassified frames: {}, queue overflows: {})", state.other(), state.dropped());

    handle.stop();
    classifying.store(false, Ordering::SeqCst);

    let mut threads = vec![("PHY server", phy_thread), ("classifier", rx_thread)];
    if let Some((handle, t)) = stream {
        handle.stop();
        threads.push(("stream classifier", t));
    }

    for (name, t) in threads {
        match t.join() {
            Ok(Err(e)) => warn!("{} error: {}", name, e),
            Err(_) => warn!("{} panicked", name),
            Ok(Ok(())) => (),
        }
    }

    Ok(())
}
