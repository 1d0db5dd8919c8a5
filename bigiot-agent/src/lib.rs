//! # bigiot-agent
//!
//! Host-side agent around the `bigiot-core` client engine: reads a TOML
//! config, provisions or checks the saved network identity, then runs
//! one device session against the broker until Ctrl-C.

pub mod config;
pub mod device;
