//! # Link Status Module
//!
//! Periodic JSON snapshots of the receiver link.
//!
//! Each snapshot is a single JSON line carrying:
//! - Capture time (UTC)
//! - Good and bad frame counters
//! - Failsafe state
//! - Current channel values

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::exbus::device::ExBusHandle;

/// Point-in-time view of the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub timestamp: DateTime<Utc>,
    pub success_count: u32,
    pub error_count: u32,
    pub failsafe: bool,
    pub channels: Vec<u16>,
}

impl LinkStatus {
    /// Capture the current state behind a device handle
    pub fn capture(handle: &ExBusHandle) -> Self {
        Self {
            timestamp: Utc::now(),
            success_count: handle.success_count(),
            error_count: handle.error_count(),
            failsafe: handle.is_failsafe(),
            channels: handle.channels().to_vec(),
        }
    }

    /// Frames received since the previous snapshot
    pub fn frames_since(&self, previous: &LinkStatus) -> u32 {
        self.success_count.wrapping_sub(previous.success_count)
    }

    /// Serialize as one line of JSON
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
