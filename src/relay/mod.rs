//! # Call Relay
//!
//! Everything needed to run one live practice call: the wire protocol on both
//! sides, the persona session configuration, the upstream connector and the
//! relay engine that ties them together.

pub mod client;
pub mod engine;
pub mod protocol;
pub mod session_config;
pub mod termination;
pub mod timer;
pub mod transcript;
pub mod upstream;

#[cfg(test)]
pub mod testing;
