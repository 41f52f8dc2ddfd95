//! DCF MAC node
//!
//! Runs the MAC against a PHY request server and an upper layer buffer,
//! see `phy-udp` and `upper-buffer` for local stand-ins for both.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use structopt::StructOpt;

use rand_core::OsRng;

use dcf_mac::prelude::*;
use dcf_mac::timing::{SIFS_BASE, SLOT_BASE};


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long, default_value = "127.0.0.1:8013")]
    /// PHY request server address
    pub phy: SocketAddr,

    #[structopt(long, default_value = "127.0.0.1:8001")]
    /// Upper layer buffer address
    pub upper: SocketAddr,

    #[structopt(long)]
    /// Node identifier, queried from the PHY when omitted
    pub node: Option<u8>,

    #[structopt(long)]
    /// Destination node, defaults to node + 1
    pub dest: Option<u8>,

    #[structopt(long)]
    /// Baseband sample rate in Hz, queried from the PHY when omitted
    pub sample_rate: Option<f64>,

    #[structopt(long, default_value = "2")]
    /// Initial OFDM encoding (0..8)
    pub encoding: usize,

    #[structopt(long, default_value = "1000")]
    /// Inter-frame interval scaling factor
    pub beta: f64,

    #[structopt(long, default_value = "9e-6")]
    /// Unscaled slot time in seconds
    pub slot_time: f64,

    #[structopt(long, default_value = "16e-6")]
    /// Unscaled SIFS in seconds
    pub sifs: f64,

    #[structopt(long, default_value = "4")]
    /// Retransmissions per payload, 0 disables retries
    pub retx_max: u32,

    #[structopt(long)]
    /// Enable the RTS / CTS handshake
    pub rts: bool,

    #[structopt(long, default_value = "150")]
    /// RTS threshold in bytes
    pub rts_threshold: usize,

    #[structopt(long, default_value = "1036")]
    /// Fragmentation threshold in bytes
    pub frag_threshold: usize,

    #[structopt(long, default_value = "aarf")]
    /// Rate control (none, minstrel, aarf)
    pub rate_control: RateControl,

    #[structopt(long, default_value = "-35", allow_hyphen_values = true)]
    /// Channel busy threshold in dBW
    pub cca_threshold: f32,

    #[structopt(long, default_value = "1s")]
    /// Interval advertised in beacons
    pub beacon_interval: humantime::Duration,

    #[structopt(long, default_value = "")]
    /// SSID carried in beacons
    pub ssid: String,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

impl Options {
    fn mac_config(&self) -> MacConfig {
        MacConfig {
            node: self.node,
            dest_node: self.dest,
            sample_rate: self.sample_rate,
            encoding: self.encoding,
            beta: self.beta,
            slot_time: self.slot_time,
            sifs: self.sifs,
            retx_max: self.retx_max,
            rts: self.rts,
            rts_threshold: self.rts_threshold,
            frag_threshold: self.frag_threshold,
            rate_control: self.rate_control,
            cca_threshold: self.cca_threshold,
            beacon_interval: *self.beacon_interval,
            ssid: self.ssid.as_bytes().to_vec(),
            ..Default::default()
        }
    }
}


fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting mac-node");

    let config = opts.mac_config();
    if config.slot_time != SLOT_BASE || config.sifs != SIFS_BASE {
        info!("Non-standard base timing: slot {} s, SIFS {} s", config.slot_time, config.sifs);
    }

    debug!("Connecting to PHY at {} and upper layer at {}", opts.phy, opts.upper);
    let phy = SocketPhy::new(opts.phy);
    let upper = SocketUpper::new(opts.upper);

    debug!("Initialising MAC");
    let mut mac = Dcf::new(config, phy, upper, SystemTimer::new(), OsRng)
        .map_err(|e| anyhow::anyhow!("Error initialising MAC: {}", e))?;

    debug!("Starting loop");
    mac.run(&running)?;

    let s = mac.stats();
    info!("Exiting (busy CCA: {}, CTS timeouts: {}, ACK timeouts: {}, malformed: {}, duplicates: {})",
        s.busy_cca, s.cts_timeouts, s.ack_timeouts, s.malformed, s.duplicates);

    Ok(())
}
