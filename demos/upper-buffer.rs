//! Upper layer buffer and traffic generator
//!
//! Serves the MAC's transmit / receive FIFOs and feeds the transmit queue
//! with `TEST_1`..`TEST_4` payloads and optional beacon markers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use structopt::StructOpt;
use humantime::Duration;

use rand::Rng;

use dcf_mac::prelude::*;


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long, default_value = "127.0.0.1:8001")]
    /// Address to serve the MAC on
    pub listen: SocketAddr,

    #[structopt(short = "n", long, default_value = "50")]
    /// Number of payloads to generate
    pub pkt_num: u32,

    #[structopt(short = "t", long, default_value = "20ms")]
    /// Payload generation interval
    pub interval: Duration,

    #[structopt(long)]
    /// Queue a beacon marker at this interval
    pub beacon: Option<Duration>,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
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

    info!("Upper layer traffic generator: {} payloads every {}", opts.pkt_num, opts.interval);

    let buffer = Arc::new(UpperBuffer::new());
    let server = UpperServer::bind(opts.listen, buffer.clone())?;
    let handle = server.handle();
    let t = std::thread::spawn(move || server.run());

    let mut rng = rand::thread_rng();
    let mut remaining = opts.pkt_num;
    let mut last_beacon = Instant::now();

    while running.load(Ordering::SeqCst) {
        if remaining > 0 {
            let payload = format!("TEST_{}", rng.gen_range(1..=4));
            debug!("Queueing {}", payload);
            buffer.push_payload(payload.into_bytes());
            remaining -= 1;
        }

        if let Some(b) = &opts.beacon {
            if last_beacon.elapsed() >= **b {
                debug!("Queueing beacon");
                buffer.push_beacon();
                last_beacon = Instant::now();
            }
        }

        while let Some(p) = buffer.pop_rx() {
            info!("Received: {}", String::from_utf8_lossy(&p));
        }

        std::thread::sleep(*opts.interval);
    }

    info!("Queued: {}, removed by MAC: {}, delivered: {}",
        opts.pkt_num - remaining, buffer.removed(), buffer.delivered());

    handle.stop();
    match t.join() {
        Ok(Err(e)) => warn!("Upper layer server error: {}", e),
        Err(_) => warn!("Upper layer server panicked"),
        Ok(Ok(())) => (),
    }

    Ok(())
}
