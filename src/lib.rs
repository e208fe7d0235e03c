#![warn(rust_2018_idioms)]
#![allow(dead_code)]

// re-export sub-crates
pub use {ice, rtp, util};

pub mod data_channel;
pub mod engine;
pub mod error;
pub mod ice_transport;
pub mod media;
pub mod peer_connection;
pub mod rtp_transceiver;
pub mod stats;
pub mod track;

pub use error::{Error, Result};

pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";

/// Upper bound for an SDP payload produced or accepted by a connection.
pub const MAX_SDP_SIZE: usize = 64 * 1024;
