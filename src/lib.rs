//! 802.11 Distributed Coordination Function MAC for software-defined radio
//! front ends, talking to an external PHY and upper layer over local sockets

pub mod timer;

pub mod frame;

pub mod timing;

pub mod backoff;

pub mod nav;

pub mod rate;

pub mod link;

pub mod service;

pub mod mac;

pub mod error;

pub mod prelude;
