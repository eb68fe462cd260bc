//! # EX Bus RX Library
//!
//! Decoder for the Jeti EX Bus receiver protocol with in-band telemetry
//! and failsafe supervision.
//!
//! The receiver streams framed channel data over a half-duplex serial
//! line. This library recovers frame boundaries, validates them, exposes
//! the decoded channels to a flight-control consumer, answers telemetry
//! requests, and forces the channels to a safe value when frames stop.

pub mod config;
pub mod error;
pub mod exbus;
pub mod serial;
pub mod status;
