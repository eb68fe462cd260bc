//! # EX Bus Protocol Module
//!
//! Implementation of the Jeti EX Bus receiver protocol.
//!
//! This module handles:
//! - Frame synchronisation and CRC-16 validation, one byte at a time
//! - Channel extraction into an atomically readable store
//! - In-band telemetry replies with CRC-8 protected records
//! - Stall and failsafe supervision from a fixed-rate tick

pub mod channels;
pub mod crc;
pub mod decoder;
pub mod device;
pub mod protocol;
pub mod supervisor;
pub mod telemetry;
