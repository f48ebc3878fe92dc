//! The produce pipeline: sample, encode, publish with backpressure, track
//! deliveries, drain on shutdown.

pub mod controller;
pub mod delivery;
pub mod encoder;
pub mod lifecycle;
pub mod publisher;
pub mod retry;
pub mod sample;
