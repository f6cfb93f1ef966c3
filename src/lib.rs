//! Driver and event bridge for the SRF02 ultrasonic range finder.

pub mod api;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod sensor;
