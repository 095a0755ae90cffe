//! # Soil Link Library
//!
//! Session engine for a BLE soil-moisture sensor.
//!
//! This library provides the checksummed line protocol, the connection state
//! machine, the telemetry pipeline and the formula evaluator used to turn raw
//! sensor values into physical quantities.

pub mod config;
pub mod discovery;
pub mod equation;
pub mod error;
pub mod formula;
pub mod protocol;
pub mod radio;
pub mod session;
pub mod telemetry;
