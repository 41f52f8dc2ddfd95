//! Request servers standing in for the PHY and upper layer processes

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::error::LinkError;

pub mod phy;
pub use phy::{PhyBackend, PhyCounters, PhyServer};

pub mod upper;
pub use upper::{TxItem, UpperBuffer, UpperServer};

/// Bound on a single request exchange on the server side
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Stops a running server from another thread
#[derive(Debug, Clone)]
pub struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub(crate) fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Request shutdown, waking the server if it is blocked in accept
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = TcpStream::connect_timeout(&self.addr, REQUEST_TIMEOUT);
    }
}

/// Accept one connection at a time until the handle is stopped
pub(crate) fn serve<F>(listener: &TcpListener, handle: &ServerHandle, mut f: F) -> Result<(), LinkError>
where
    F: FnMut(&mut TcpStream) -> Result<(), LinkError>,
{
    for stream in listener.incoming() {
        if !handle.is_running() {
            break;
        }

        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            },
        };

        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

        match f(&mut stream) {
            Ok(()) => (),
            Err(LinkError::Closed) => debug!("Peer closed before sending a request"),
            Err(e) => warn!("Request failed: {}", e),
        }
    }

    debug!("Server on {} stopped", handle.addr);

    Ok(())
}
